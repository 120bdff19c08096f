//! An asynchronous [RakNet](https://github.com/facebookarchive/RakNet) server
//! implementation on top of tokio.
//!
//! The crate is split the same way the protocol is:
//! - [`protocol`] holds the wire types: frames, acknowledgements, and the
//!   offline/online packet catalog.
//! - [`session`] is the per-peer reliability engine: ordering, sequencing,
//!   fragmentation, recovery and keep-alive.
//! - [`server`] owns the socket, demultiplexes datagrams to sessions and
//!   drives their ticks.
//!
//! ```rust ignore
//! use rakkit::identifier::MinecraftIdentifier;
//! use rakkit::server::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut server = Server::new(
//!         ServerConfig::default(),
//!         Box::new(MinecraftIdentifier::default()),
//!     );
//!     server.start("0.0.0.0:19132".parse().unwrap()).await.unwrap();
//! }
//! ```
pub mod error;
pub mod identifier;
pub mod protocol;
pub mod server;
pub mod session;
pub mod util;

pub use server::handler::Handler;
pub use server::{Server, ServerConfig};
