use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

/// Observer of server and session lifecycle events.
///
/// Every method has an empty default body, so an implementation only picks
/// the events it cares about. Handlers are called synchronously from the
/// ingress and tick paths and must not block for long.
pub trait Handler: Send + Sync {
    /// The server started serving.
    fn start_server(&self) {}

    /// The server shut down.
    fn close_server(&self) {}

    /// A discovery ping was received.
    fn handle_ping(&self, _addr: SocketAddr) {}

    /// The offline handshake succeeded and a session is being created.
    fn open_pre_conn(&self, _addr: SocketAddr) {}

    /// The peer acknowledged the connected handshake; the session is live.
    fn open_conn(&self, _guid: i64, _addr: SocketAddr) {}

    /// A session is about to close.
    fn close_pre_conn(&self, _guid: i64) {}

    /// A session was removed.
    fn close_conn(&self, _guid: i64) {}

    /// A session went silent past the timeout threshold.
    fn timeout(&self, _guid: i64) {}

    /// An address was banned.
    fn add_blocked_address(&self, _ip: IpAddr, _reason: &str) {}

    /// An address ban was lifted.
    fn remove_blocked_address(&self, _ip: IpAddr) {}

    /// A frame sent with an ack-receipt reliability was acknowledged by the
    /// peer.
    fn handle_send_packet(&self, _addr: SocketAddr, _payload: &[u8]) {}

    /// A datagram the server does not process itself.
    fn handle_raw_packet(&self, _addr: SocketAddr, _payload: &[u8]) {}

    /// A user payload (leading byte >= 0x86) arrived on a connected session.
    fn handle_packet(&self, _guid: i64, _payload: &[u8]) {}

    /// A payload below the user threshold that is not a control packet.
    fn handle_unknown_packet(&self, _guid: i64, _payload: &[u8]) {}
}

/// The ordered list of observers events fan out to.
#[derive(Default)]
pub struct Handlers {
    list: Vec<Arc<dyn Handler>>,
}

impl Handlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, handler: Arc<dyn Handler>) {
        self.list.push(handler);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Arc<dyn Handler>> {
        self.list.iter()
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }
}

impl From<Vec<Arc<dyn Handler>>> for Handlers {
    fn from(list: Vec<Arc<dyn Handler>>) -> Self {
        Self { list }
    }
}
