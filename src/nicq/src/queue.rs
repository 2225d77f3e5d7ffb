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

//! Ring Descriptor Table
//!
//! Per-queue persistent state: where the ring lives, how large it is, which
//! notification queue it is linked to, and the three pointers that describe
//! its occupancy.
//!
//! # Pointers
//!
//! All pointers are free-running 16-bit counters. For a ring of
//! `2^size_log2` slots the low `size_log2` bits select the slot and bit
//! `size_log2` is the phase bit, which flips on every full traversal:
//!
//! ```text
//!  15          size_log2+1  size_log2   size_log2-1        0
//! ┌───────────────────────┬───────────┬─────────────────────┐
//! │      lap (ignored)    │   phase   │        slot         │
//! └───────────────────────┴───────────┴─────────────────────┘
//! ```
//!
//! Occupancy is always the wrapping difference of two pointers, so no
//! separate full/empty flag is needed as long as the ring never holds more
//! than `2^size_log2 <= 2^15` entries.
//!
//! # Reorder window
//!
//! Commits may arrive out of reservation order. Each queue keeps one bit per
//! slot recording that the slot's commit has arrived; the committed pointer
//! only moves across a contiguous run of set bits starting at its current
//! position.

use bitflags::bitflags;
use fixedbitset::FixedBitSet;

use crate::error::{QueueError, Result};

/// Largest ring size exponent. A ring of `2^16` slots would make full and
/// empty indistinguishable with 16-bit pointers.
pub const MAX_SIZE_LOG2: u8 = 15;

/// Ring base addresses are page aligned; the low bits are dropped on write.
pub const BASE_ADDR_ALIGN: u64 = 0x1000;

bitflags! {
    /// Status bits reported in the low byte of the control/status register.
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct QueueFlags: u32 {
        /// Queue accepts requests.
        const ENABLE = 1 << 0;
        /// Next retired completion raises an event.
        const ARMED  = 1 << 1;
        /// Slots have been handed out but not yet retired.
        const ACTIVE = 1 << 3;
    }
}

/// A free-running ring pointer.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RingPtr(pub u16);

impl RingPtr {
    /// Slot index selected by this pointer.
    #[inline]
    pub fn slot(self, size_log2: u8) -> u16 {
        self.0 & ring_mask(size_log2)
    }

    /// Phase bit of this pointer.
    #[inline]
    pub fn phase(self, size_log2: u8) -> bool {
        (self.0 >> size_log2) & 1 != 0
    }

    /// Number of increments needed to get from `older` to `self`.
    #[inline]
    pub fn distance_from(self, older: RingPtr) -> u16 {
        self.0.wrapping_sub(older.0)
    }

    #[inline]
    pub fn next(self) -> RingPtr {
        RingPtr(self.0.wrapping_add(1))
    }
}

impl From<u16> for RingPtr {
    fn from(v: u16) -> Self {
        RingPtr(v)
    }
}

#[inline]
pub(crate) const fn ring_mask(size_log2: u8) -> u16 {
    ((1u32 << size_log2) - 1) as u16
}

/// Persistent state of one queue.
#[derive(Debug, Clone)]
pub struct QueueState {
    /// Ring base address, page aligned.
    pub(crate) base_address: u64,
    /// Virtual function the ring belongs to.
    pub(crate) vf_id: u16,
    /// Ring holds `2^size_log2` slots.
    pub(crate) size_log2: u8,
    /// Completion queue (descriptor side) or event queue (completion side)
    /// notified on behalf of this queue.
    pub(crate) linked_index: u16,
    pub(crate) enabled: bool,
    pub(crate) armed: bool,
    pub(crate) producer_ptr: u16,
    pub(crate) consumer_ptr: u16,
    /// Next pointer to hand out.
    pub(crate) pending_ptr: u16,
    /// Bumped whenever in-flight work is invalidated.
    pub(crate) epoch: u32,
    /// Slots whose commit arrived ahead of an older outstanding slot.
    committed: FixedBitSet,
}

impl Default for QueueState {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueState {
    /// An unconfigured, disabled queue with a single-slot ring at address 0.
    pub fn new() -> Self {
        Self {
            base_address: 0,
            vf_id: 0,
            size_log2: 0,
            linked_index: 0,
            enabled: false,
            armed: false,
            producer_ptr: 0,
            consumer_ptr: 0,
            pending_ptr: 0,
            epoch: 0,
            committed: FixedBitSet::with_capacity(1),
        }
    }

    pub fn base_address(&self) -> u64 {
        self.base_address
    }

    pub fn vf_id(&self) -> u16 {
        self.vf_id
    }

    pub fn size_log2(&self) -> u8 {
        self.size_log2
    }

    pub fn linked_index(&self) -> u16 {
        self.linked_index
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn armed(&self) -> bool {
        self.armed
    }

    pub fn producer_ptr(&self) -> u16 {
        self.producer_ptr
    }

    pub fn consumer_ptr(&self) -> u16 {
        self.consumer_ptr
    }

    pub fn pending_ptr(&self) -> u16 {
        self.pending_ptr
    }

    /// Number of slots in the ring.
    #[inline]
    pub fn ring_size(&self) -> u32 {
        1u32 << self.size_log2
    }

    /// Set the base address, dropping the sub-page bits.
    pub(crate) fn set_base_address(&mut self, addr: u64) {
        self.base_address = addr & !(BASE_ADDR_ALIGN - 1);
    }

    /// Resize the ring. Any reorder state is discarded.
    pub(crate) fn set_size_log2(&mut self, size_log2: u8) -> Result<()> {
        if size_log2 > MAX_SIZE_LOG2 {
            return Err(QueueError::InvalidSize(size_log2, MAX_SIZE_LOG2));
        }
        self.size_log2 = size_log2;
        self.committed = FixedBitSet::with_capacity(1 << size_log2);
        Ok(())
    }

    /// Address of the slot selected by `ptr`.
    #[inline]
    pub fn slot_address(&self, ptr: RingPtr, stride: u32) -> u64 {
        self.base_address
            .wrapping_add(u64::from(ptr.slot(self.size_log2)) * u64::from(stride))
    }

    /// Hand out the pending pointer and advance it.
    #[inline]
    pub(crate) fn reserve(&mut self) -> RingPtr {
        let ptr = RingPtr(self.pending_ptr);
        self.pending_ptr = self.pending_ptr.wrapping_add(1);
        ptr
    }

    /// Whether `ptr` lies in `[committed, pending)`, i.e. was handed out and
    /// has not been retired.
    #[inline]
    pub(crate) fn in_flight(&self, committed: u16, ptr: RingPtr) -> bool {
        let base = RingPtr(committed);
        ptr.distance_from(base) < RingPtr(self.pending_ptr).distance_from(base)
    }

    /// Record that the commit for `ptr` has arrived.
    #[inline]
    pub(crate) fn mark_committed(&mut self, ptr: RingPtr) {
        let slot = ptr.slot(self.size_log2) as usize;
        debug_assert!(!self.committed.contains(slot), "slot {slot} committed twice");
        self.committed.insert(slot);
    }

    /// If the slot at `committed` has its commit recorded, clear it and
    /// return true. The caller then advances its committed pointer.
    #[inline]
    pub(crate) fn take_retirable(&mut self, committed: u16) -> bool {
        let slot = RingPtr(committed).slot(self.size_log2) as usize;
        if self.committed.contains(slot) {
            self.committed.set(slot, false);
            true
        } else {
            false
        }
    }

    /// Number of slots sitting in the reorder window.
    pub fn reorder_depth(&self) -> usize {
        self.committed.count_ones(..)
    }

    /// Drop every in-flight reservation: the pending pointer snaps back to
    /// `committed`, the reorder window is cleared and the epoch moves on so
    /// late commits can be recognised.
    pub(crate) fn invalidate_inflight(&mut self, committed: u16) {
        self.pending_ptr = committed;
        self.committed.clear();
        self.epoch = self.epoch.wrapping_add(1);
    }
}

/// The table of all queues owned by one manager.
#[derive(Debug, Clone)]
pub struct QueueTable {
    queues: Vec<QueueState>,
}

impl QueueTable {
    pub fn new(queue_count: u32) -> Self {
        Self {
            queues: (0..queue_count).map(|_| QueueState::new()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    pub fn get(&self, index: u16) -> Result<&QueueState> {
        let len = self.queues.len() as u32;
        self.queues
            .get(index as usize)
            .ok_or(QueueError::InvalidQueue(u32::from(index), len))
    }

    pub fn get_mut(&mut self, index: u16) -> Result<&mut QueueState> {
        let len = self.queues.len() as u32;
        self.queues
            .get_mut(index as usize)
            .ok_or(QueueError::InvalidQueue(u32::from(index), len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_and_phase() {
        // size 16: bit 4 is the phase
        assert_eq!(RingPtr(0).slot(4), 0);
        assert!(!RingPtr(15).phase(4));
        assert_eq!(RingPtr(16).slot(4), 0);
        assert!(RingPtr(16).phase(4));
        assert_eq!(RingPtr(33).slot(4), 1);
        assert!(!RingPtr(33).phase(4));
    }

    #[test]
    fn test_phase_at_max_size() {
        assert_eq!(RingPtr(0x8001).slot(MAX_SIZE_LOG2), 1);
        assert!(RingPtr(0x8001).phase(MAX_SIZE_LOG2));
        assert_eq!(ring_mask(MAX_SIZE_LOG2), 0x7FFF);
    }

    #[test]
    fn test_distance_wraps() {
        assert_eq!(RingPtr(2).distance_from(RingPtr(0xFFFE)), 4);
        assert_eq!(RingPtr(0xFFFF).next(), RingPtr(0));
    }

    #[test]
    fn test_base_address_is_page_aligned() {
        let mut q = QueueState::new();
        q.set_base_address(0x1234_5678_9ABC);
        assert_eq!(q.base_address(), 0x1234_5678_9000);
    }

    #[test]
    fn test_set_size_rejects_oversized_ring() {
        let mut q = QueueState::new();
        assert_eq!(q.set_size_log2(16), Err(QueueError::InvalidSize(16, 15)));
        q.set_size_log2(10).unwrap();
        assert_eq!(q.ring_size(), 1024);
    }

    #[test]
    fn test_slot_address() {
        let mut q = QueueState::new();
        q.set_base_address(0x10000);
        q.set_size_log2(3).unwrap();
        assert_eq!(q.slot_address(RingPtr(0), 16), 0x10000);
        assert_eq!(q.slot_address(RingPtr(3), 16), 0x10030);
        // wraps back to slot 1
        assert_eq!(q.slot_address(RingPtr(9), 16), 0x10010);
    }

    #[test]
    fn test_reserve_and_in_flight() {
        let mut q = QueueState::new();
        q.set_size_log2(2).unwrap();
        let a = q.reserve();
        let b = q.reserve();
        assert_eq!((a, b), (RingPtr(0), RingPtr(1)));
        assert!(q.in_flight(0, a));
        assert!(q.in_flight(0, b));
        assert!(!q.in_flight(0, RingPtr(2)));
        assert!(!q.in_flight(1, a));
    }

    #[test]
    fn test_retire_in_order_only() {
        let mut q = QueueState::new();
        q.set_size_log2(2).unwrap();
        let a = q.reserve();
        let b = q.reserve();

        q.mark_committed(b);
        assert!(!q.take_retirable(0));
        assert_eq!(q.reorder_depth(), 1);

        q.mark_committed(a);
        assert!(q.take_retirable(0));
        assert!(q.take_retirable(1));
        assert!(!q.take_retirable(2));
        assert_eq!(q.reorder_depth(), 0);
    }

    #[test]
    fn test_invalidate_resets_window() {
        let mut q = QueueState::new();
        q.set_size_log2(2).unwrap();
        let a = q.reserve();
        q.reserve();
        q.mark_committed(a);

        q.invalidate_inflight(0);
        assert_eq!(q.pending_ptr(), 0);
        assert_eq!(q.reorder_depth(), 0);
        assert_eq!(q.epoch, 1);
    }

    #[test]
    fn test_table_bounds() {
        let mut t = QueueTable::new(4);
        assert_eq!(t.len(), 4);
        assert!(t.get(3).is_ok());
        assert_eq!(t.get(4).unwrap_err(), QueueError::InvalidQueue(4, 4));
        assert!(t.get_mut(7).is_err());
    }
}
