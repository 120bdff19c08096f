use std::io::{Cursor, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::reliability::Reliability;
use super::triad::Triad;
use super::CUSTOM_PACKET_BASE_SIZE;

/// Bit 4 of the flag byte marks the frame as one fragment of a split payload.
pub const FLAG_SPLIT: u8 = 0x10;
/// The reliability bits live in the high three bits of the flag byte.
pub const RELIABILITY_SHIFT: u8 = 5;

/// Frame overhead: flag byte plus the payload bit-length.
const FRAME_HEADER_SIZE: usize = 1 + 2;
const MESSAGE_INDEX_SIZE: usize = 3;
const ORDER_SIZE: usize = 3 + 1;
const SPLIT_SIZE: usize = 4 + 2 + 4;

/// Fragmentation metadata of a frame.
///
/// All fragments of one payload share `count` and `id`; `index` is the
/// fragment's position in the reassembled payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitMeta {
    pub count: i32,
    pub id: u16,
    pub index: i32,
}

/// A single encapsulated packet: one application or control payload inside a
/// custom datagram, together with its reliability metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub reliability: Reliability,
    /// Present iff the reliability is reliable.
    pub message_index: Option<Triad>,
    /// Present iff the reliability is ordered or sequenced.
    pub order_index: Option<Triad>,
    /// Present iff the reliability is ordered or sequenced. Must be < 32.
    pub order_channel: Option<u8>,
    pub split: Option<SplitMeta>,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(reliability: Reliability, payload: Vec<u8>) -> Self {
        Self {
            reliability,
            message_index: None,
            order_index: None,
            order_channel: None,
            split: None,
            payload,
        }
    }

    pub fn is_split(&self) -> bool {
        self.split.is_some()
    }

    /// The encoded size of this frame.
    pub fn size(&self) -> usize {
        Self::size_of(self.reliability, self.is_split(), &self.payload)
    }

    /// The encoded size of a frame with the given shape, without building it.
    pub fn size_of(reliability: Reliability, split: bool, payload: &[u8]) -> usize {
        let mut size = FRAME_HEADER_SIZE;

        if reliability.is_reliable() {
            size += MESSAGE_INDEX_SIZE;
        }

        if reliability.is_sequenced_or_ordered() {
            size += ORDER_SIZE;
        }

        if split {
            size += SPLIT_SIZE;
        }

        size + payload.len()
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        let mut flags = self.reliability.to_bits() << RELIABILITY_SHIFT;
        if self.is_split() {
            flags |= FLAG_SPLIT;
        }

        writer.write_u8(flags)?;
        writer.write_u16::<BigEndian>((self.payload.len() as u16) * 8)?;

        if self.reliability.is_reliable() {
            self.message_index.unwrap_or_default().write_le(writer)?;
        }

        if self.reliability.is_sequenced_or_ordered() {
            self.order_index.unwrap_or_default().write_le(writer)?;
            writer.write_u8(self.order_channel.unwrap_or_default())?;
        }

        if let Some(meta) = self.split {
            writer.write_i32::<BigEndian>(meta.count)?;
            writer.write_u16::<BigEndian>(meta.id)?;
            writer.write_i32::<BigEndian>(meta.index)?;
        }

        writer.write_all(&self.payload)?;
        Ok(())
    }

    pub fn read(cursor: &mut Cursor<&[u8]>) -> std::io::Result<Self> {
        let flags = cursor.read_u8()?;
        let reliability = Reliability::from_bits(flags >> RELIABILITY_SHIFT);
        let split = (flags & FLAG_SPLIT) > 0;

        let length = (cursor.read_u16::<BigEndian>()? / 8) as usize;

        let mut frame = Frame::new(reliability, Vec::new());

        if reliability.is_reliable() {
            frame.message_index = Some(Triad::read_le(cursor)?);
        }

        if reliability.is_sequenced_or_ordered() {
            frame.order_index = Some(Triad::read_le(cursor)?);
            frame.order_channel = Some(cursor.read_u8()?);
        }

        if split {
            frame.split = Some(SplitMeta {
                count: cursor.read_i32::<BigEndian>()?,
                id: cursor.read_u16::<BigEndian>()?,
                index: cursor.read_i32::<BigEndian>()?,
            });
        }

        let mut payload = vec![0u8; length];
        cursor.read_exact(&mut payload)?;
        frame.payload = payload;

        Ok(frame)
    }
}

/// The envelope of all session traffic: one or more frames behind a 24-bit
/// little-endian sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSet {
    pub sequence: Triad,
    pub frames: Vec<Frame>,
}

impl FrameSet {
    /// The id this implementation stamps on outbound datagrams. Inbound
    /// datagrams are accepted across the whole custom range.
    pub const ID: u8 = 0x84;

    pub const ID_RANGE: std::ops::RangeInclusive<u8> = 0x80..=0x8f;

    pub fn new(sequence: Triad) -> Self {
        Self {
            sequence,
            frames: Vec::new(),
        }
    }

    pub fn size(&self) -> usize {
        CUSTOM_PACKET_BASE_SIZE + self.frames.iter().map(Frame::size).sum::<usize>()
    }

    pub fn write_to_vec(&self) -> std::io::Result<Vec<u8>> {
        let mut buffer = Vec::with_capacity(self.size());
        buffer.write_u8(Self::ID)?;
        self.sequence.write_le(&mut buffer)?;

        for frame in &self.frames {
            frame.write(&mut buffer)?;
        }

        Ok(buffer)
    }

    pub fn read_from_slice(source: &[u8]) -> std::io::Result<Self> {
        let mut cursor = Cursor::new(source);

        let id = cursor.read_u8()?;
        if !Self::ID_RANGE.contains(&id) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "not a custom datagram",
            ));
        }

        let sequence = Triad::read_le(&mut cursor)?;
        let mut frames = Vec::new();

        // a frame header is at least 3 bytes; anything shorter is padding
        while source.len() - (cursor.position() as usize) >= FRAME_HEADER_SIZE {
            frames.push(Frame::read(&mut cursor)?);
        }

        Ok(Self { sequence, frames })
    }
}
