/*
Copyright 2026  The Hyperlight Authors.

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/
//! Operation table for in-flight ring accesses.
//!
//! A fixed arena of [`OpEntry`] records indexed by [`OpTag`]. The tag handed
//! back on reservation is the arena index, so lookups on commit are O(1).
//!
//! # Allocation
//!
//! Free tags are kept on a stack. Reservation pops, release pushes, so a
//! recently released tag is the next one handed out. Occupancy is tracked
//! separately in a bitmap (`FixedBitSet`), which is what release validates
//! against: releasing a tag that is not set is a protocol violation, never a
//! silent double free.
//!
//! The table itself does not order anything. Ordering of pointer updates is
//! the job of each queue's reorder window; the table only has to remember,
//! for each outstanding tag, which queue and which pointer it reserved.

use fixedbitset::FixedBitSet;

use crate::error::{QueueError, Result};
use crate::queue::RingPtr;

/// Handle for an outstanding operation, returned in the response and
/// quoted back in the commit.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "fuzzing", derive(arbitrary::Arbitrary))]
pub struct OpTag(pub u16);

/// Which side reserved the entry.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OpKind {
    /// Descriptor consumed by the device.
    Dequeue,
    /// Completion produced by the device.
    Enqueue,
}

/// One in-flight ring access.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct OpEntry {
    pub queue_index: u16,
    /// Pending pointer value reserved by the request.
    pub slot_ptr: RingPtr,
    /// Caller supplied correlation id.
    pub request_tag: u32,
    pub kind: OpKind,
    /// Queue epoch at reservation.
    pub(crate) epoch: u32,
    /// Manager request sequence number at reservation.
    pub(crate) issued_at: u64,
}

/// Fixed capacity arena of [`OpEntry`].
#[derive(Debug, Clone)]
pub struct OpTable {
    entries: Vec<Option<OpEntry>>,
    /// Flat bitmap of reserved tags
    used: FixedBitSet,
    /// Stack of free tags
    free: Vec<u16>,
}

impl OpTable {
    /// Create a table holding `capacity` entries.
    pub fn new(capacity: u16) -> Self {
        let capacity = capacity as usize;
        Self {
            entries: vec![None; capacity],
            used: FixedBitSet::with_capacity(capacity),
            // reversed so that tag 0 is handed out first
            free: (0..capacity as u16).rev().collect(),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Number of reserved entries.
    #[inline]
    pub fn in_use(&self) -> usize {
        self.entries.len() - self.free.len()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.free.is_empty()
    }

    /// Reserve an entry, or return `None` when every tag is outstanding.
    pub fn alloc(&mut self, entry: OpEntry) -> Option<OpTag> {
        let tag = self.free.pop()?;
        let idx = tag as usize;
        debug_assert!(!self.used.contains(idx));

        self.used.insert(idx);
        self.entries[idx] = Some(entry);
        Some(OpTag(tag))
    }

    /// Release a reserved entry and return what it held.
    pub fn release(&mut self, tag: OpTag) -> Result<OpEntry> {
        let idx = tag.0 as usize;
        if idx >= self.entries.len() {
            return Err(QueueError::OpTagOutOfRange(tag.0, self.entries.len()));
        }
        if !self.used.contains(idx) {
            return Err(QueueError::UnknownOpTag(tag.0));
        }

        let entry = self.entries[idx]
            .take()
            .ok_or(QueueError::UnknownOpTag(tag.0))?;
        self.used.set(idx, false);
        self.free.push(tag.0);
        Ok(entry)
    }

    /// Look at a reserved entry without releasing it.
    pub fn get(&self, tag: OpTag) -> Option<&OpEntry> {
        self.entries.get(tag.0 as usize)?.as_ref()
    }

    /// Iterate over all reserved entries.
    pub fn outstanding(&self) -> impl Iterator<Item = (OpTag, &OpEntry)> {
        self.used.ones().filter_map(|idx| {
            self.entries[idx]
                .as_ref()
                .map(|entry| (OpTag(idx as u16), entry))
        })
    }

    /// Entries reserved more than `max_age` requests before `now`.
    pub fn older_than(&self, now: u64, max_age: u64) -> impl Iterator<Item = (OpTag, &OpEntry)> {
        self.outstanding()
            .filter(move |(_, entry)| now.saturating_sub(entry.issued_at) > max_age)
    }
}
