use std::fmt;

use super::session::SessionError;

/// Lifecycle errors returned by the server control surface.
///
/// Per-datagram failures never surface here: a malformed datagram is logged
/// and dropped without affecting the ingress loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerError {
    /// `start` was called while the server is already serving.
    AlreadyRunning,
    /// `start` was called after the server has been shut down.
    AlreadyClosed,
    /// The UDP socket could not be bound.
    AddrBind,
    /// An operation that requires a running server was called before `start`.
    NotRunning,
    /// No session exists for the given address or guid.
    SessionNotFound,
    /// The session rejected the operation.
    Session(SessionError),
}

impl fmt::Display for ServerError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ServerError::AlreadyRunning => write!(fmt, "server is already running"),
            ServerError::AlreadyClosed => write!(fmt, "server has been closed"),
            ServerError::AddrBind => write!(fmt, "failed to bind the udp socket"),
            ServerError::NotRunning => write!(fmt, "server is not running"),
            ServerError::SessionNotFound => write!(fmt, "no session for the given peer"),
            ServerError::Session(error) => write!(fmt, "{}", error),
        }
    }
}

impl std::error::Error for ServerError {}
