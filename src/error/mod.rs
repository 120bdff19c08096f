//! Error types for the server control surface and the per-session engine.
pub mod server;
pub mod session;

pub use self::server::ServerError;
pub use self::session::SessionError;
