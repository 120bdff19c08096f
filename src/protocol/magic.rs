use binary_util::interfaces::{Reader, Writer};
use binary_util::io::{ByteReader, ByteWriter};

/// The 16 byte constant prefixed to every offline message, identifying the
/// datagram as raknet traffic.
pub const MAGIC: [u8; 16] = [
    0x00, 0xff, 0xff, 0x00, 0xfe, 0xfe, 0xfe, 0xfe, 0xfd, 0xfd, 0xfd, 0xfd, 0x12, 0x34, 0x56, 0x78,
];

/// Typed form of the offline magic. Reading validates the bytes; a mismatch
/// is a malformed packet.
#[derive(Debug, Clone, Default)]
pub struct Magic;

impl Magic {
    pub fn new() -> Self {
        Self {}
    }
}

impl Reader<Magic> for Magic {
    fn read(buf: &mut ByteReader) -> Result<Magic, std::io::Error> {
        let mut magic = [0u8; 16];
        buf.read(&mut magic)?;

        if magic != MAGIC {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "invalid offline magic",
            ));
        }

        Ok(Magic)
    }
}

impl Writer for Magic {
    fn write(&self, buf: &mut ByteWriter) -> Result<(), std::io::Error> {
        buf.write(&MAGIC)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_bytes() {
        let mut bytes = MAGIC;
        bytes[3] = 0xff;
        let mut reader = ByteReader::from(&bytes[..]);
        assert!(Magic::read(&mut reader).is_err());
    }

    #[test]
    fn accepts_magic() {
        let mut reader = ByteReader::from(&MAGIC[..]);
        assert!(Magic::read(&mut reader).is_ok());
    }
}
