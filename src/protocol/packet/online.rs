//! Packets exchanged inside a session's frames: keep-alives, the connected
//! handshake and disconnection notices.
use binary_util::interfaces::{Reader, Writer};
use binary_util::io::{ByteReader, ByteWriter};
use binary_util::BinaryIo;

use crate::protocol::types::SystemAddress;
use crate::register_packets;

/// The number of internal addresses padded into the connected handshake.
const SYSTEM_ADDRESS_COUNT: usize = 10;

/// An enum of all online packets.
#[derive(Clone, Debug, BinaryIo)]
#[repr(u8)]
pub enum OnlinePacket {
    ConnectedPing(ConnectedPing) = 0x00,
    ConnectedPong(ConnectedPong) = 0x03,
    DetectLostConnections(DetectLostConnections) = 0x04,
    ConnectionRequest(ConnectionRequest) = 0x09,
    ConnectionRequestAccepted(ConnectionRequestAccepted) = 0x10,
    NewIncomingConnection(NewIncomingConnection) = 0x13,
    DisconnectionNotification(DisconnectionNotification) = 0x15,
}

register_packets! {
    Online is OnlinePacket,
    ConnectedPing,
    ConnectedPong,
    DetectLostConnections,
    ConnectionRequest,
    ConnectionRequestAccepted,
    NewIncomingConnection,
    DisconnectionNotification
}

/// Sent by either peer to keep the session alive; answered with a
/// [`ConnectedPong`] echoing the timestamp.
#[derive(Clone, Debug, BinaryIo)]
pub struct ConnectedPing {
    pub timestamp: i64,
}

#[derive(Clone, Debug, BinaryIo)]
pub struct ConnectedPong {
    pub timestamp: i64,
}

/// A keep-alive probe sent after prolonged silence.
#[derive(Clone, Debug, BinaryIo)]
pub struct DetectLostConnections {}

/// The client's request to complete the connection, sent reliably once the
/// offline handshake created the session.
#[derive(Clone, Debug, BinaryIo)]
pub struct ConnectionRequest {
    pub client_guid: i64,
    pub timestamp: i64,
    pub use_security: bool,
}

/// The server's answer to [`ConnectionRequest`]. The session is considered
/// connected once the peer acknowledges the datagram carrying this packet.
#[derive(Clone, Debug)]
pub struct ConnectionRequestAccepted {
    pub client_address: SystemAddress,
    pub system_index: u16,
    pub internal_addresses: Vec<SystemAddress>,
    pub client_timestamp: i64,
    pub server_timestamp: i64,
}

impl Reader<ConnectionRequestAccepted> for ConnectionRequestAccepted {
    fn read(buf: &mut ByteReader) -> Result<ConnectionRequestAccepted, std::io::Error> {
        let client_address = buf.read_struct::<SystemAddress>()?;
        let system_index = buf.read_u16()?;

        let mut internal_addresses = Vec::with_capacity(SYSTEM_ADDRESS_COUNT);
        for _ in 0..SYSTEM_ADDRESS_COUNT {
            internal_addresses.push(buf.read_struct::<SystemAddress>()?);
        }

        Ok(ConnectionRequestAccepted {
            client_address,
            system_index,
            internal_addresses,
            client_timestamp: buf.read_i64()?,
            server_timestamp: buf.read_i64()?,
        })
    }
}

impl Writer for ConnectionRequestAccepted {
    fn write(&self, buf: &mut ByteWriter) -> Result<(), std::io::Error> {
        buf.write_type::<SystemAddress>(&self.client_address)?;
        buf.write_u16(self.system_index)?;

        for i in 0..SYSTEM_ADDRESS_COUNT {
            let address = self
                .internal_addresses
                .get(i)
                .copied()
                .unwrap_or_else(SystemAddress::unspecified);
            buf.write_type::<SystemAddress>(&address)?;
        }

        buf.write_i64(self.client_timestamp)?;
        buf.write_i64(self.server_timestamp)?;
        Ok(())
    }
}

/// Sent by the client after it received [`ConnectionRequestAccepted`].
#[derive(Clone, Debug)]
pub struct NewIncomingConnection {
    pub server_address: SystemAddress,
    pub addresses: Vec<SystemAddress>,
    pub server_timestamp: i64,
    pub client_timestamp: i64,
}

impl Reader<NewIncomingConnection> for NewIncomingConnection {
    fn read(buf: &mut ByteReader) -> Result<NewIncomingConnection, std::io::Error> {
        let server_address = buf.read_struct::<SystemAddress>()?;

        let mut addresses = Vec::with_capacity(SYSTEM_ADDRESS_COUNT);
        for _ in 0..SYSTEM_ADDRESS_COUNT {
            addresses.push(buf.read_struct::<SystemAddress>()?);
        }

        Ok(NewIncomingConnection {
            server_address,
            addresses,
            server_timestamp: buf.read_i64()?,
            client_timestamp: buf.read_i64()?,
        })
    }
}

impl Writer for NewIncomingConnection {
    fn write(&self, buf: &mut ByteWriter) -> Result<(), std::io::Error> {
        buf.write_type::<SystemAddress>(&self.server_address)?;

        for i in 0..SYSTEM_ADDRESS_COUNT {
            let address = self
                .addresses
                .get(i)
                .copied()
                .unwrap_or_else(SystemAddress::unspecified);
            buf.write_type::<SystemAddress>(&address)?;
        }

        buf.write_i64(self.server_timestamp)?;
        buf.write_i64(self.client_timestamp)?;
        Ok(())
    }
}

/// Tells the peer the session is over. Sent best effort on close.
#[derive(Clone, Debug, BinaryIo)]
pub struct DisconnectionNotification {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_round_trip() {
        let buffer = OnlinePacket::from(ConnectedPing { timestamp: 99 })
            .write_to_bytes()
            .unwrap();
        assert_eq!(buffer.as_slice()[0], 0x00);

        match OnlinePacket::read_from_slice(buffer.as_slice()).unwrap() {
            OnlinePacket::ConnectedPing(pk) => assert_eq!(pk.timestamp, 99),
            other => panic!("unexpected packet {:?}", other),
        }
    }

    #[test]
    fn accepted_pads_to_ten_addresses() {
        let accepted = ConnectionRequestAccepted {
            client_address: SystemAddress::new("127.0.0.1".parse().unwrap(), 40000),
            system_index: 0,
            internal_addresses: vec![SystemAddress::new("127.0.0.1".parse().unwrap(), 19132)],
            client_timestamp: 5,
            server_timestamp: 6,
        };

        let buffer = OnlinePacket::from(accepted).write_to_bytes().unwrap();
        // id + address(7) + index(2) + 10 * address(7) + two longs
        assert_eq!(buffer.as_slice().len(), 1 + 7 + 2 + 10 * 7 + 16);

        match OnlinePacket::read_from_slice(buffer.as_slice()).unwrap() {
            OnlinePacket::ConnectionRequestAccepted(pk) => {
                assert_eq!(pk.internal_addresses.len(), 10);
                assert_eq!(pk.client_timestamp, 5);
                assert_eq!(pk.server_timestamp, 6);
            }
            other => panic!("unexpected packet {:?}", other),
        }
    }
}
