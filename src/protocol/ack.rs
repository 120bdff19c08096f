use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::triad::Triad;

pub const ACK_ID: u8 = 0xc0;
pub const NACK_ID: u8 = 0xa0;

/// A single acknowledged sequence number, or an inclusive range of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record {
    pub index: Triad,
    pub end_index: Triad,
}

impl Record {
    pub fn single(index: Triad) -> Self {
        Self {
            index,
            end_index: Triad::new(0),
        }
    }

    pub fn ranged(index: Triad, end_index: Triad) -> Self {
        Self { index, end_index }
    }

    /// A record is ranged iff its end lies beyond its start.
    pub fn is_ranged(&self) -> bool {
        self.index < self.end_index
    }

    pub fn count(&self) -> u32 {
        if !self.is_ranged() {
            return 1;
        }

        (self.end_index.get() - self.index.get()) + 1
    }

    /// The inclusive set of sequence numbers this record covers.
    pub fn numbers(&self) -> Vec<u32> {
        if !self.is_ranged() {
            return vec![self.index.get()];
        }

        (self.index.get()..=self.end_index.get()).collect()
    }
}

/// Collapses a multiset of sequence numbers into the smallest list of
/// records: `[0, 2, 3, 5, 8, 9, 10, 15]` -> `[0, 2..3, 5, 8..10, 15]`.
pub fn condense_records(numbers: &[u32]) -> Vec<Record> {
    let mut ids: Vec<u32> = numbers.to_vec();
    ids.sort_unstable();
    ids.dedup();

    let mut records = Vec::new();
    let mut i = 0;

    while i < ids.len() {
        let start = ids[i];
        let mut end = start;

        while i + 1 < ids.len() && ids[i + 1] == end + 1 {
            end = ids[i + 1];
            i += 1;
        }

        if start == end {
            records.push(Record::single(Triad::new(start)));
        } else {
            records.push(Record::ranged(Triad::new(start), Triad::new(end)));
        }

        i += 1;
    }

    records
}

/// Positive or negative acknowledgement of received datagram sequence
/// numbers. The two packets share a wire shape and differ only in id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acknowledge {
    pub records: Vec<Record>,
    nack: bool,
}

impl Acknowledge {
    pub fn ack(records: Vec<Record>) -> Self {
        Self {
            records,
            nack: false,
        }
    }

    pub fn nack(records: Vec<Record>) -> Self {
        Self {
            records,
            nack: true,
        }
    }

    pub fn is_nack(&self) -> bool {
        self.nack
    }

    pub fn id(&self) -> u8 {
        if self.nack {
            NACK_ID
        } else {
            ACK_ID
        }
    }

    /// Every sequence number covered by this packet's records.
    pub fn numbers(&self) -> Vec<u32> {
        self.records.iter().flat_map(Record::numbers).collect()
    }

    pub fn write_to_vec(&self) -> std::io::Result<Vec<u8>> {
        let mut buffer = Vec::new();
        buffer.write_u8(self.id())?;

        let records = condense_records(&self.numbers());
        buffer.write_u16::<BigEndian>(records.len() as u16)?;

        for record in records {
            let no_range = !record.is_ranged();

            buffer.write_u8(no_range as u8)?;
            record.index.write_le(&mut buffer)?;

            if !no_range {
                record.end_index.write_le(&mut buffer)?;
            }
        }

        Ok(buffer)
    }

    pub fn read_from_slice(source: &[u8]) -> std::io::Result<Self> {
        let mut cursor = Cursor::new(source);

        let id = cursor.read_u8()?;
        let nack = match id {
            ACK_ID => false,
            NACK_ID => true,
            _ => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "not an acknowledge packet",
                ))
            }
        };

        let count = cursor.read_u16::<BigEndian>()?;
        let mut records = Vec::with_capacity(count as usize);

        for _ in 0..count {
            let no_range = cursor.read_u8()? != 0;
            let index = Triad::read_le(&mut cursor)?;

            if no_range {
                records.push(Record::single(index));
            } else {
                let end_index = Triad::read_le(&mut cursor)?;
                records.push(Record::ranged(index, end_index));
            }
        }

        Ok(Self { records, nack })
    }
}
