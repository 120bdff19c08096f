//! The typed packet catalog.
//!
//! Every raknet datagram starts with a one byte id. [`PacketKind::of`] is the
//! 256-entry demux table the server consults before doing anything else;
//! [`RakPacket`] is the typed decode of the offline/online subset.
pub mod offline;
pub mod online;

use binary_util::interfaces::{Reader, Writer};
use binary_util::io::{ByteReader, ByteWriter};

use self::offline::OfflinePacket;
use self::online::OnlinePacket;
use super::ack::{ACK_ID, NACK_ID};
use super::frame::FrameSet;

/// What a packet id stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// Connectionless packets: discovery pings and the offline handshake.
    Offline,
    /// Packets carried inside a session's frames.
    Online,
    Ack,
    Nack,
    /// A custom datagram (0x80..=0x8F) carrying encapsulated frames.
    FrameSet,
}

impl PacketKind {
    /// Classifies a packet id. `None` is a catalog miss: log and drop.
    pub fn of(id: u8) -> Option<PacketKind> {
        match id {
            0x01 | 0x02 | 0x05 | 0x06 | 0x07 | 0x08 | 0x12 | 0x14 | 0x17 | 0x19 | 0x1c => {
                Some(PacketKind::Offline)
            }
            0x00 | 0x03 | 0x04 | 0x09 | 0x10 | 0x13 | 0x15 => Some(PacketKind::Online),
            ACK_ID => Some(PacketKind::Ack),
            NACK_ID => Some(PacketKind::Nack),
            id if FrameSet::ID_RANGE.contains(&id) => Some(PacketKind::FrameSet),
            _ => None,
        }
    }
}

/// Any typed offline or online packet.
#[derive(Debug, Clone)]
pub enum RakPacket {
    Offline(OfflinePacket),
    Online(OnlinePacket),
}

impl Reader<RakPacket> for RakPacket {
    fn read(buf: &mut ByteReader) -> Result<RakPacket, std::io::Error> {
        let id = buf.as_slice().first().copied().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "empty packet")
        })?;

        match PacketKind::of(id) {
            Some(PacketKind::Offline) => Ok(RakPacket::Offline(OfflinePacket::read(buf)?)),
            Some(PacketKind::Online) => Ok(RakPacket::Online(OnlinePacket::read(buf)?)),
            _ => Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "id is not a typed raknet packet",
            )),
        }
    }
}

impl Writer for RakPacket {
    fn write(&self, buf: &mut ByteWriter) -> Result<(), std::io::Error> {
        match self {
            RakPacket::Offline(packet) => packet.write(buf),
            RakPacket::Online(packet) => packet.write(buf),
        }
    }
}

/// Adds `From` conversions between a packet struct and its enum family, so a
/// packet body can be passed wherever a [`RakPacket`] is expected.
#[macro_export]
macro_rules! register_packets {
    ($name: ident is $kind: ident, $($packet: ident),*) => {
        $(
            impl From<$packet> for $kind {
                fn from(packet: $packet) -> Self {
                    $kind::$packet(packet)
                }
            }

            impl From<$packet> for $crate::protocol::packet::RakPacket {
                fn from(packet: $packet) -> Self {
                    $crate::protocol::packet::RakPacket::$name(packet.into())
                }
            }
        )*
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_covers_the_id_table() {
        assert_eq!(PacketKind::of(0x00), Some(PacketKind::Online));
        assert_eq!(PacketKind::of(0x01), Some(PacketKind::Offline));
        assert_eq!(PacketKind::of(0x10), Some(PacketKind::Online));
        assert_eq!(PacketKind::of(0x1c), Some(PacketKind::Offline));
        assert_eq!(PacketKind::of(0xc0), Some(PacketKind::Ack));
        assert_eq!(PacketKind::of(0xa0), Some(PacketKind::Nack));

        for id in 0x80..=0x8f {
            assert_eq!(PacketKind::of(id), Some(PacketKind::FrameSet));
        }

        assert_eq!(PacketKind::of(0x42), None);
        assert_eq!(PacketKind::of(0xff), None);
    }
}
