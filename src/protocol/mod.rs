//! Protocol implementation for RakNet.
//!
//! This module contains everything that crosses the wire: the 24-bit counter
//! type, the offline magic, reliability metadata, encapsulated frames, the
//! acknowledgement packets and the typed offline/online packet catalog.
pub mod ack;
pub mod frame;
pub mod magic;
pub mod packet;
pub mod reliability;
pub mod triad;
pub mod types;

pub use magic::Magic;

/// Version of the RakNet protocol spoken by this crate.
/// Clients announcing a different version in OpenConnectionRequest1 are
/// answered with IncompatibleProtocol.
pub const NETWORK_PROTOCOL: u8 = 8;

/// The maximum size of a negotiated MTU.
pub const MAX_MTU: u16 = 1492;
/// The minimum size of a negotiated MTU.
pub const MIN_MTU: u16 = 400;

/// The number of order channels on a connection. A raknet limitation,
/// not configurable.
pub const MAX_CHANNELS: u8 = 32;
/// The channel used when the caller does not care.
pub const DEFAULT_CHANNEL: u8 = 0;

/// The maximum number of fragments a single payload may be split into.
pub const MAX_SPLIT_COUNT: i32 = 128;
/// The maximum number of split payloads that may be in flight per session.
pub const MAX_SPLITS_PER_SESSION: usize = 4;

/// Datagram budget per session per second before the address is banned.
pub const MAX_PACKETS_PER_SECOND: usize = 500;

/// Custom datagram overhead: packet id plus the 24-bit sequence number.
pub const CUSTOM_PACKET_BASE_SIZE: usize = 1 + 3;

/// Payloads whose first byte is at or above this value are handed to user
/// packet handlers; anything below that is protocol-internal or unknown.
pub const USER_PACKET_THRESHOLD: u8 = 0x86;
