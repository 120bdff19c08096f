use std::fmt;
use std::io::{Read, Write};

use byteorder::{BigEndian, LittleEndian, ReadBytesExt, WriteBytesExt};

/// Number of bytes a triad occupies on the wire.
pub const TRIAD_SIZE: usize = 3;

/// The largest value a triad can hold.
pub const MAX_TRIAD: u32 = (1 << 24) - 1;

/// A 24-bit unsigned integer.
///
/// Raknet uses triads for datagram sequence numbers, message indexes and
/// order/sequence indexes. Both byte orders appear on the wire: datagram
/// sequence numbers and ack records are little-endian, everything else is
/// big-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Triad(u32);

impl Triad {
    pub fn new(value: u32) -> Self {
        Self(value & MAX_TRIAD)
    }

    pub fn get(self) -> u32 {
        self.0
    }

    /// Advances the counter.
    ///
    /// Bumping is not a wrapping add: the maximum value bumps to 1, never
    /// to 0, because 0 is a legitimate fresh counter value.
    pub fn bump(self) -> Self {
        Self((self.0 % MAX_TRIAD) + 1)
    }

    /// The forward distance from `earlier` to `self`, modulo 2^24.
    pub fn gap_from(self, earlier: Triad) -> u32 {
        self.0.wrapping_sub(earlier.0) & MAX_TRIAD
    }

    pub fn add(self, d: u32) -> Self {
        Self::new(self.0.wrapping_add(d))
    }

    pub fn sub(self, d: u32) -> Self {
        Self::new(self.0.wrapping_sub(d))
    }

    pub fn read_be<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        Ok(Self(reader.read_u24::<BigEndian>()?))
    }

    pub fn write_be<W: Write>(self, writer: &mut W) -> std::io::Result<()> {
        writer.write_u24::<BigEndian>(self.0)
    }

    pub fn read_le<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        Ok(Self(reader.read_u24::<LittleEndian>()?))
    }

    pub fn write_le<W: Write>(self, writer: &mut W) -> std::io::Result<()> {
        writer.write_u24::<LittleEndian>(self.0)
    }
}

impl From<u32> for Triad {
    fn from(value: u32) -> Self {
        Self::new(value)
    }
}

impl From<Triad> for u32 {
    fn from(value: Triad) -> Self {
        value.0
    }
}

impl fmt::Display for Triad {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}", self.0)
    }
}
