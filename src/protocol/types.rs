use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use binary_util::interfaces::{Reader, Writer};
use binary_util::io::{ByteReader, ByteWriter};

/// The 7 byte constant that precedes a non-vanilla connection descriptor.
pub const CONNECTION_TYPE_MAGIC: [u8; 7] = [0x03, 0x08, 0x05, 0x0b, 0x43, 0x54, 0x49];

/// The maximum number of metadata entries a connection descriptor may carry.
pub const MAX_METADATA_VALUES: usize = 0xff;

/// Reads a raknet string: a big-endian u16 length followed by raw bytes.
/// The bytes are not validated as UTF-8; invalid sequences render lossily.
pub(crate) fn read_string(buf: &mut ByteReader) -> Result<String, std::io::Error> {
    let len = buf.read_u16()?;
    let mut bytes = vec![0u8; len as usize];
    buf.read(&mut bytes)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Writes a raknet string: a big-endian u16 length followed by raw bytes.
pub(crate) fn write_string(buf: &mut ByteWriter, value: &str) -> Result<(), std::io::Error> {
    buf.write_u16(value.len() as u16)?;
    buf.write(value.as_bytes())?;
    Ok(())
}

/// An (ip, port) pair in raknet's on-wire address form.
///
/// IPv4 is the bit-exact legacy form: a version byte of 4, the four address
/// octets each bitwise inverted, then a big-endian u16 port. IPv6 is carried
/// symmetrically (version byte 6, 16 raw octets, port) but is not part of the
/// bit-exact contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SystemAddress {
    pub ip: IpAddr,
    pub port: u16,
}

impl SystemAddress {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }

    /// The `0.0.0.0:0` placeholder used to pad internal address lists.
    pub fn unspecified() -> Self {
        Self {
            ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
        }
    }

    pub fn version(&self) -> u8 {
        match self.ip {
            IpAddr::V4(_) => 4,
            IpAddr::V6(_) => 6,
        }
    }
}

impl From<SocketAddr> for SystemAddress {
    fn from(addr: SocketAddr) -> Self {
        Self {
            ip: addr.ip(),
            port: addr.port(),
        }
    }
}

impl From<SystemAddress> for SocketAddr {
    fn from(addr: SystemAddress) -> Self {
        SocketAddr::new(addr.ip, addr.port)
    }
}

impl Reader<SystemAddress> for SystemAddress {
    fn read(buf: &mut ByteReader) -> Result<SystemAddress, std::io::Error> {
        let version = buf.read_u8()?;

        match version {
            4 => {
                let mut octets = [0u8; 4];
                buf.read(&mut octets)?;
                for octet in octets.iter_mut() {
                    *octet = !*octet;
                }
                let port = buf.read_u16()?;
                Ok(SystemAddress::new(IpAddr::V4(Ipv4Addr::from(octets)), port))
            }
            6 => {
                let mut octets = [0u8; 16];
                buf.read(&mut octets)?;
                let port = buf.read_u16()?;
                Ok(SystemAddress::new(IpAddr::V6(Ipv6Addr::from(octets)), port))
            }
            _ => Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "unknown address version",
            )),
        }
    }
}

impl Writer for SystemAddress {
    fn write(&self, buf: &mut ByteWriter) -> Result<(), std::io::Error> {
        buf.write_u8(self.version())?;

        match self.ip {
            IpAddr::V4(ip) => {
                for octet in ip.octets() {
                    buf.write_u8(!octet)?;
                }
            }
            IpAddr::V6(ip) => {
                buf.write(&ip.octets())?;
            }
        }

        buf.write_u16(self.port)?;
        Ok(())
    }
}

/// Identifies which implementation of the raknet protocol a peer runs.
///
/// A vanilla descriptor is the absence of one: clients that do not write the
/// connection type magic decode as [`ConnectionType::vanilla`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionType {
    pub uuid: [u8; 16],
    pub name: String,
    pub lang: String,
    pub version: String,
    pub metadata: HashMap<String, String>,
    pub is_vanilla: bool,
}

impl ConnectionType {
    pub fn vanilla() -> Self {
        Self {
            uuid: [0u8; 16],
            name: "Vanilla".into(),
            lang: String::new(),
            version: String::new(),
            metadata: HashMap::new(),
            is_vanilla: true,
        }
    }

    pub fn new<S: Into<String>>(uuid: [u8; 16], name: S, lang: S, version: S) -> Self {
        Self {
            uuid,
            name: name.into(),
            lang: lang.into(),
            version: version.into(),
            metadata: HashMap::new(),
            is_vanilla: false,
        }
    }
}

impl Default for ConnectionType {
    fn default() -> Self {
        Self::vanilla()
    }
}

impl Reader<ConnectionType> for ConnectionType {
    fn read(buf: &mut ByteReader) -> Result<ConnectionType, std::io::Error> {
        if buf.as_slice().len() < CONNECTION_TYPE_MAGIC.len() {
            return Ok(ConnectionType::vanilla());
        }

        let mut magic = [0u8; 7];
        buf.read(&mut magic)?;
        if magic != CONNECTION_TYPE_MAGIC {
            return Ok(ConnectionType::vanilla());
        }

        let mut uuid = [0u8; 16];
        buf.read(&mut uuid)?;

        let name = read_string(buf)?;
        let lang = read_string(buf)?;
        let version = read_string(buf)?;

        let meta_len = buf.read_u8()?;
        let mut metadata = HashMap::new();

        for _ in 0..meta_len {
            let key = read_string(buf)?;
            let value = read_string(buf)?;

            if metadata.insert(key, value).is_some() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "duplicate metadata key",
                ));
            }
        }

        Ok(ConnectionType {
            uuid,
            name,
            lang,
            version,
            metadata,
            is_vanilla: false,
        })
    }
}

impl Writer for ConnectionType {
    fn write(&self, buf: &mut ByteWriter) -> Result<(), std::io::Error> {
        buf.write(&CONNECTION_TYPE_MAGIC)?;
        buf.write(&self.uuid)?;

        write_string(buf, &self.name)?;
        write_string(buf, &self.lang)?;
        write_string(buf, &self.version)?;

        if self.metadata.len() > MAX_METADATA_VALUES {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "too many metadata values",
            ));
        }

        buf.write_u8(self.metadata.len() as u8)?;
        for (key, value) in &self.metadata {
            write_string(buf, key)?;
            write_string(buf, value)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_v4_round_trip() {
        let addr = SystemAddress::new(IpAddr::V4(Ipv4Addr::new(192, 168, 11, 1)), 19132);
        let buf = addr.write_to_bytes().unwrap();
        let back = SystemAddress::read(&mut ByteReader::from(buf.as_slice())).unwrap();
        assert_eq!(back, addr);
    }

    #[test]
    fn address_v4_octets_are_inverted() {
        let addr = SystemAddress::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 255)), 0x1234);
        let buf = addr.write_to_bytes().unwrap();
        let bytes = buf.as_slice();
        assert_eq!(bytes[0], 4);
        assert_eq!(bytes[1], !10u8);
        assert_eq!(bytes[2], !0u8);
        assert_eq!(bytes[3], !0u8);
        assert_eq!(bytes[4], !255u8);
        assert_eq!(&bytes[5..7], &[0x12, 0x34]);
    }

    #[test]
    fn address_v6_round_trip() {
        let addr = SystemAddress::new("fc00::1".parse().unwrap(), 8080);
        let buf = addr.write_to_bytes().unwrap();
        let back = SystemAddress::read(&mut ByteReader::from(buf.as_slice())).unwrap();
        assert_eq!(back, addr);
    }

    #[test]
    fn connection_type_round_trip() {
        let mut ct = ConnectionType::new([7u8; 16], "rakkit", "Rust", "0.1.0");
        ct.metadata.insert("flavor".into(), "server".into());

        let buf = ct.write_to_bytes().unwrap();
        let back = ConnectionType::read(&mut ByteReader::from(buf.as_slice())).unwrap();
        assert_eq!(back, ct);
    }

    #[test]
    fn missing_descriptor_is_vanilla() {
        let back = ConnectionType::read(&mut ByteReader::from(&[][..])).unwrap();
        assert!(back.is_vanilla);
    }
}
