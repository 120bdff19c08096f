//! Connectionless packets: discovery pings and the four-packet offline
//! handshake that precedes session creation.
use binary_util::interfaces::{Reader, Writer};
use binary_util::io::{ByteReader, ByteWriter};
use binary_util::BinaryIo;

use crate::protocol::magic::Magic;
use crate::protocol::types::{read_string, write_string, ConnectionType, SystemAddress};
use crate::register_packets;

/// id(1) + magic(16) + protocol(1); everything past that in an
/// OpenConnectionRequest1 is padding the client sized to its desired MTU.
pub const MTU_PADDING: usize = 18;

/// A enum of all offline packets.
#[derive(Clone, Debug, BinaryIo)]
#[repr(u8)]
pub enum OfflinePacket {
    UnconnectedPing(UnconnectedPing) = 0x01,
    UnconnectedPingOpenConnections(UnconnectedPingOpenConnections) = 0x02,
    OpenConnectionRequest1(OpenConnectionRequest1) = 0x05,
    OpenConnectionReply1(OpenConnectionReply1) = 0x06,
    OpenConnectionRequest2(OpenConnectionRequest2) = 0x07,
    OpenConnectionReply2(OpenConnectionReply2) = 0x08,
    AlreadyConnected(AlreadyConnected) = 0x12,
    NoFreeIncomingConnections(NoFreeIncomingConnections) = 0x14,
    ConnectionBanned(ConnectionBanned) = 0x17,
    IncompatibleProtocol(IncompatibleProtocol) = 0x19,
    UnconnectedPong(UnconnectedPong) = 0x1c,
}

register_packets! {
    Offline is OfflinePacket,
    UnconnectedPing,
    UnconnectedPingOpenConnections,
    OpenConnectionRequest1,
    OpenConnectionReply1,
    OpenConnectionRequest2,
    OpenConnectionReply2,
    AlreadyConnected,
    NoFreeIncomingConnections,
    ConnectionBanned,
    IncompatibleProtocol,
    UnconnectedPong
}

/// A discovery ping. Always answered while broadcasting is enabled.
#[derive(Debug, Clone, BinaryIo)]
pub struct UnconnectedPing {
    pub timestamp: i64,
    pub magic: Magic,
    pub client_guid: i64,
    pub connection: ConnectionType,
}

/// The open-connections variant of the ping: identical body, but the server
/// stays silent once it is at its connection limit.
#[derive(Debug, Clone, BinaryIo)]
pub struct UnconnectedPingOpenConnections {
    pub timestamp: i64,
    pub magic: Magic,
    pub client_guid: i64,
    pub connection: ConnectionType,
}

/// The reply to either ping variant, carrying the advertised identifier.
#[derive(Debug, Clone)]
pub struct UnconnectedPong {
    pub timestamp: i64,
    pub pong_id: i64,
    pub magic: Magic,
    pub identifier: String,
    pub connection: ConnectionType,
}

impl Reader<UnconnectedPong> for UnconnectedPong {
    fn read(buf: &mut ByteReader) -> Result<UnconnectedPong, std::io::Error> {
        Ok(UnconnectedPong {
            timestamp: buf.read_i64()?,
            pong_id: buf.read_i64()?,
            magic: buf.read_struct::<Magic>()?,
            identifier: read_string(buf)?,
            connection: buf.read_struct::<ConnectionType>()?,
        })
    }
}

impl Writer for UnconnectedPong {
    fn write(&self, buf: &mut ByteWriter) -> Result<(), std::io::Error> {
        buf.write_i64(self.timestamp)?;
        buf.write_i64(self.pong_id)?;
        buf.write_type::<Magic>(&self.magic)?;
        write_string(buf, &self.identifier)?;
        buf.write_type::<ConnectionType>(&self.connection)?;
        Ok(())
    }
}

/// First half of the offline handshake. The client pads the datagram out to
/// the MTU it wants; the server reads the MTU off the datagram length.
#[derive(Debug, Clone)]
pub struct OpenConnectionRequest1 {
    pub protocol_version: u8,
    pub mtu: u16,
}

impl Reader<OpenConnectionRequest1> for OpenConnectionRequest1 {
    fn read(buf: &mut ByteReader) -> Result<OpenConnectionRequest1, std::io::Error> {
        // the packet id was consumed by the enum dispatch; the rest of the
        // datagram is magic + protocol + padding
        let padded = buf.as_slice().len() + 1;

        buf.read_struct::<Magic>()?;
        let protocol_version = buf.read_u8()?;

        Ok(OpenConnectionRequest1 {
            protocol_version,
            mtu: padded as u16,
        })
    }
}

impl Writer for OpenConnectionRequest1 {
    fn write(&self, buf: &mut ByteWriter) -> Result<(), std::io::Error> {
        buf.write_type::<Magic>(&Magic::new())?;
        buf.write_u8(self.protocol_version)?;

        for _ in 0..(self.mtu as usize).saturating_sub(MTU_PADDING) {
            buf.write_u8(0)?;
        }

        Ok(())
    }
}

#[derive(Debug, Clone, BinaryIo)]
pub struct OpenConnectionReply1 {
    pub magic: Magic,
    pub server_guid: i64,
    pub use_security: bool,
    pub mtu: u16,
}

#[derive(Debug, Clone, BinaryIo)]
pub struct OpenConnectionRequest2 {
    pub magic: Magic,
    pub server_address: SystemAddress,
    pub mtu: u16,
    pub client_guid: i64,
    pub connection: ConnectionType,
}

#[derive(Debug, Clone, BinaryIo)]
pub struct OpenConnectionReply2 {
    pub magic: Magic,
    pub server_guid: i64,
    pub client_address: SystemAddress,
    pub mtu: u16,
    pub encryption_enabled: bool,
    pub connection: ConnectionType,
}

/// Sent when a handshake arrives for a guid or address that already has a
/// session.
#[derive(Debug, Clone, BinaryIo)]
pub struct AlreadyConnected {}

/// Sent when the server is at its configured connection limit.
#[derive(Debug, Clone, BinaryIo)]
pub struct NoFreeIncomingConnections {}

#[derive(Debug, Clone, BinaryIo)]
pub struct ConnectionBanned {
    pub server_guid: i64,
}

/// Sent when the client speaks a different raknet protocol version.
#[derive(Debug, Clone, BinaryIo)]
pub struct IncompatibleProtocol {
    pub network_protocol: u8,
    pub magic: Magic,
    pub server_guid: i64,
}
