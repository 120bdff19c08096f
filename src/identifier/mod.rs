//! The advertised identity of the server.
//!
//! The server does not care what the identifier string means; it asks the
//! capability for a fresh string and connection descriptor whenever it
//! answers a discovery ping.
mod minecraft;

pub use self::minecraft::MinecraftIdentifier;

use crate::protocol::types::ConnectionType;

/// Builds the string and connection descriptor advertised in
/// UnconnectedPong replies.
pub trait Identifier: Send + Sync {
    /// The advertised identifier string. Called per pong, so a dynamic
    /// implementation can reflect a live player count.
    fn build(&self) -> String;

    /// The connection descriptor attached to the pong.
    fn connection_type(&self) -> ConnectionType {
        ConnectionType::vanilla()
    }
}

/// A fixed string identifier, useful for tests and non-game deployments.
impl Identifier for String {
    fn build(&self) -> String {
        self.clone()
    }
}
