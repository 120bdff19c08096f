use std::collections::HashMap;

use log::warn;

use crate::protocol::frame::Frame;
use crate::protocol::reliability::Reliability;
use crate::protocol::{MAX_SPLITS_PER_SESSION, MAX_SPLIT_COUNT};

#[derive(Debug)]
struct SplitEntry {
    count: i32,
    reliability: Reliability,
    parts: HashMap<i32, Vec<u8>>,
}

/// Reassembles split payloads.
///
/// Fragments sharing a split id accumulate until every index is present,
/// then the payload is emitted in index order regardless of arrival order.
#[derive(Debug, Default)]
pub struct SplitAssembler {
    entries: HashMap<u16, SplitEntry>,
}

impl SplitAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Feeds one fragment in. Returns the reassembled payload once the last
    /// missing fragment arrives, `None` while fragments are outstanding or
    /// the fragment was rejected.
    pub fn insert(&mut self, frame: &Frame) -> Option<Vec<u8>> {
        let meta = frame.split?;

        if meta.count <= 0 || meta.count > MAX_SPLIT_COUNT {
            warn!("rejected split {} with count {}", meta.id, meta.count);
            return None;
        }

        if meta.index < 0 || meta.index >= meta.count {
            warn!("rejected split {} fragment index {}", meta.id, meta.index);
            return None;
        }

        if !self.entries.contains_key(&meta.id) {
            // the queue is full; unreliable splits in progress are fair game
            if self.entries.len() + 1 > MAX_SPLITS_PER_SESSION {
                self.entries
                    .retain(|_, entry| entry.reliability.is_reliable());

                if self.entries.len() + 1 > MAX_SPLITS_PER_SESSION {
                    warn!("failed to make space in the split queue");
                    return None;
                }
            }

            self.entries.insert(
                meta.id,
                SplitEntry {
                    count: meta.count,
                    reliability: frame.reliability,
                    parts: HashMap::new(),
                },
            );
        }

        let entry = self.entries.get_mut(&meta.id)?;

        if entry.count != meta.count || entry.reliability != frame.reliability {
            warn!("split {} fragment disagrees with its group", meta.id);
            return None;
        }

        entry
            .parts
            .entry(meta.index)
            .or_insert_with(|| frame.payload.clone());

        if entry.parts.len() as i32 == entry.count {
            let mut entry = self.entries.remove(&meta.id)?;
            let mut payload = Vec::new();

            for index in 0..entry.count {
                payload.extend(entry.parts.remove(&index)?);
            }

            return Some(payload);
        }

        None
    }
}
