use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the unix epoch.
/// Used for the timestamps carried in ping/pong packets.
pub fn current_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Tokenizes an address into the `<ip>:<port>` form used as the key of the
/// server's session map.
pub fn to_address_token(remote: SocketAddr) -> String {
    let mut token = remote.ip().to_string();
    token.push(':');
    token.push_str(&remote.port().to_string());
    token
}
