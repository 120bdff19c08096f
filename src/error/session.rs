use std::fmt;

/// Errors surfaced by the per-session send path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionError {
    /// The order channel is outside `0..32`.
    InvalidChannel(u8),
    /// The session is disconnected and no longer accepts traffic.
    Closed,
}

impl fmt::Display for SessionError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            SessionError::InvalidChannel(channel) => {
                write!(fmt, "order channel {} is out of range", channel)
            }
            SessionError::Closed => write!(fmt, "session is closed"),
        }
    }
}

impl std::error::Error for SessionError {}
