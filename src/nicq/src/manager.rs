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

//! Request/commit engine shared by both queue managers.
//!
//! The descriptor side and the completion side run the same state machine;
//! they only differ in which pointer the device owns, what "no slot" means,
//! and what a retired slot announces. Those rules live behind the [`Side`]
//! trait, implemented by the zero-sized markers [`Dequeue`](crate::Dequeue)
//! and [`Enqueue`](crate::Enqueue).
//!
//! # Lifecycle of a slot
//!
//! ```text
//!   request ──> reserve pending_ptr, alloc OpTag ──> Response (Granted)
//!                                                          │
//!         caller moves the data, in any order w.r.t. other slots
//!                                                          │
//!   commit(OpTag) ──> release tag, mark slot in reorder window
//!                          │
//!                          └─> while slot at committed ptr is marked:
//!                                committed ptr += 1, announce
//! ```
//!
//! The committed pointer is the only pointer anyone outside the manager
//! can observe, and it crosses a slot only when every older slot of the
//! same queue has committed too.

use core::marker::PhantomData;

use smallvec::SmallVec;
use tracing::{Span, instrument};

use crate::config::ManagerConfig;
use crate::error::{QueueError, Result};
use crate::metrics::{CounterMetric, EmittableMetric, HistogramMetric};
use crate::notify::{Doorbell, DoorbellKind, Event, Notification, Notifier};
use crate::optable::{OpEntry, OpKind, OpTable, OpTag};
use crate::queue::{QueueState, QueueTable};

mod sealed {
    pub trait Sealed {}
    impl Sealed for crate::Dequeue {}
    impl Sealed for crate::Enqueue {}
}

/// One of the two committed pointers of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtrField {
    Producer,
    Consumer,
}

impl PtrField {
    #[inline]
    pub(crate) fn get(self, q: &QueueState) -> u16 {
        match self {
            PtrField::Producer => q.producer_ptr,
            PtrField::Consumer => q.consumer_ptr,
        }
    }

    #[inline]
    pub(crate) fn get_mut(self, q: &mut QueueState) -> &mut u16 {
        match self {
            PtrField::Producer => &mut q.producer_ptr,
            PtrField::Consumer => &mut q.consumer_ptr,
        }
    }

    #[inline]
    fn other(self) -> PtrField {
        match self {
            PtrField::Producer => PtrField::Consumer,
            PtrField::Consumer => PtrField::Producer,
        }
    }
}

/// Direction-specific rules of a queue manager.
pub trait Side: sealed::Sealed + Send + 'static {
    /// Kind recorded in table entries.
    const KIND: OpKind;
    /// Label used in logs and metrics.
    const NAME: &'static str;
    /// Whether the arm flag has any effect on this side.
    const ARMABLE: bool;
    /// The pointer written by the host. The other one is advanced by
    /// commits.
    const HOST_PTR: PtrField;

    /// Status to report when the queue cannot hand out a slot, or `None` if
    /// a slot is available at `pending_ptr`.
    fn unavailable(q: &QueueState) -> Option<Status>;

    /// Announcement for one retired slot.
    fn on_retire(q: &mut QueueState, queue_index: u16) -> Option<Notification>;

    /// Announcement for a host write to its own pointer of an enabled queue,
    /// also used when a queue is enabled.
    fn on_host_write(q: &mut QueueState, queue_index: u16) -> Option<Notification>;

    /// The pointer advanced by commits.
    #[inline]
    fn committed(q: &QueueState) -> u16 {
        Self::HOST_PTR.other().get(q)
    }

    #[inline]
    fn committed_mut(q: &mut QueueState) -> &mut u16 {
        Self::HOST_PTR.other().get_mut(q)
    }
}

/// Slot handed out by a successful request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grant {
    /// Handle to quote in the commit.
    pub op_tag: OpTag,
    /// Ring slot index.
    pub slot: u16,
    /// Phase bit of the reserved pointer, frozen at reservation.
    pub phase: bool,
    /// Full reserved pointer.
    pub pointer: u16,
    /// Host address of the slot.
    pub address: u64,
    /// Completion queue (dequeue side) or event queue (enqueue side) tag.
    pub linked_index: u16,
    pub vf_id: u16,
}

/// Outcome of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Granted(Grant),
    /// Nothing to consume, or the queue is disabled (dequeue side).
    Empty,
    /// No free slot, or the queue is disabled (enqueue side).
    Full,
    /// Every operation table entry is outstanding.
    TableFull,
    /// Queue index beyond the configured queue count.
    InvalidQueue,
}

/// Answer to a request, always produced, in request order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Response {
    pub queue_index: u16,
    pub request_tag: u32,
    pub status: Status,
}

impl Response {
    pub fn grant(&self) -> Option<&Grant> {
        match &self.status {
            Status::Granted(grant) => Some(grant),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.status == Status::Empty
    }

    pub fn is_full(&self) -> bool {
        self.status == Status::Full
    }

    /// Table exhaustion or a bad queue index.
    pub fn is_error(&self) -> bool {
        matches!(self.status, Status::TableFull | Status::InvalidQueue)
    }
}

/// Result of an applied commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitOutcome {
    pub queue_index: u16,
    pub request_tag: u32,
    /// Slots the committed pointer moved across. Zero while an older slot of
    /// the same queue is still outstanding.
    pub retired: u16,
    /// The queue was disabled or reset after the reservation; the commit
    /// released its entry and changed nothing else.
    pub stale: bool,
}

/// A queue manager: per-queue ring state, an operation table, and a
/// notification sink.
#[derive(Debug)]
pub struct Manager<S: Side, N: Notifier = ()> {
    pub(crate) config: ManagerConfig,
    pub(crate) queues: QueueTable,
    pub(crate) table: OpTable,
    pub(crate) notifier: N,
    /// Accepted requests so far
    seq: u64,
    marker: PhantomData<S>,
}

impl<S: Side> Manager<S, ()> {
    /// Create a manager that discards notifications.
    pub fn new(config: ManagerConfig) -> Self {
        Self::with_notifier(config, ())
    }
}

impl<S: Side, N: Notifier> Manager<S, N> {
    /// Create a manager publishing notifications to `notifier`.
    pub fn with_notifier(config: ManagerConfig, notifier: N) -> Self {
        log::debug!(
            "{} manager: {} queues, {} op table entries",
            S::NAME,
            config.queue_count(),
            config.op_table_size()
        );
        Self {
            queues: QueueTable::new(config.queue_count()),
            table: OpTable::new(config.op_table_size()),
            config,
            notifier,
            seq: 0,
            marker: PhantomData,
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    /// Read-only view of one queue.
    pub fn queue(&self, queue_index: u16) -> Result<&QueueState> {
        self.queues.get(queue_index)
    }

    /// Operation table entries currently outstanding.
    pub fn in_flight(&self) -> usize {
        self.table.in_use()
    }

    /// Look up an outstanding entry.
    pub fn op(&self, op_tag: OpTag) -> Option<&OpEntry> {
        self.table.get(op_tag)
    }

    /// Reserve the next slot of `queue_index`.
    ///
    /// Never blocks and never fails hard: every outcome, including
    /// backpressure, is reported in the returned [`Response`].
    #[instrument(skip_all, parent = Span::current(), level = "Trace", fields(queue_index = queue_index))]
    pub fn request(&mut self, queue_index: u16, request_tag: u32) -> Response {
        let respond = |status| Response {
            queue_index,
            request_tag,
            status,
        };

        let Ok(q) = self.queues.get_mut(queue_index) else {
            log::warn!(
                "{} request {request_tag:#x} for unknown queue {queue_index}",
                S::NAME
            );
            return respond(Status::InvalidQueue);
        };

        if let Some(status) = S::unavailable(q) {
            return respond(status);
        }

        if self.table.is_full() {
            log::trace!("{} op table full, refusing queue {queue_index}", S::NAME);
            CounterMetric::table_exhausted(S::NAME).emit();
            self.audit(self.config.leak_threshold());
            return respond(Status::TableFull);
        }

        let ptr = q.reserve();
        let entry = OpEntry {
            queue_index,
            slot_ptr: ptr,
            request_tag,
            kind: S::KIND,
            epoch: q.epoch,
            issued_at: self.seq,
        };
        let grant = Grant {
            op_tag: OpTag(0),
            slot: ptr.slot(q.size_log2),
            phase: ptr.phase(q.size_log2),
            pointer: ptr.0,
            address: q.slot_address(ptr, self.config.slot_stride()),
            linked_index: q.linked_index,
            vf_id: q.vf_id,
        };

        let Some(op_tag) = self.table.alloc(entry) else {
            // checked above; undo the reservation rather than leak a slot
            q.pending_ptr = ptr.0;
            return respond(Status::TableFull);
        };
        self.seq = self.seq.wrapping_add(1);

        log::trace!(
            "{} queue {queue_index} reserved ptr {:#06x} as op {}",
            S::NAME,
            ptr.0,
            op_tag.0
        );
        respond(Status::Granted(Grant { op_tag, ..grant }))
    }

    /// Apply the commit for `op_tag`.
    ///
    /// The entry is released immediately. The queue's committed pointer moves
    /// across this slot, and any later slots already committed, once every
    /// older slot of the queue has committed.
    ///
    /// # Errors
    ///
    /// An unknown or out-of-range tag is a protocol violation. With
    /// [`ManagerConfig::strict`] set this panics; otherwise the commit is
    /// dropped, logged and counted, and the error is returned.
    #[instrument(skip_all, parent = Span::current(), level = "Trace", fields(op_tag = op_tag.0))]
    pub fn commit(&mut self, op_tag: OpTag) -> Result<CommitOutcome> {
        let entry = match self.table.release(op_tag) {
            Ok(entry) => entry,
            Err(e) => return Err(self.protocol_violation(e)),
        };

        let queue_index = entry.queue_index;
        let q = self.queues.get_mut(queue_index)?;
        let mut outcome = CommitOutcome {
            queue_index,
            request_tag: entry.request_tag,
            retired: 0,
            stale: false,
        };

        if entry.epoch != q.epoch {
            log::debug!(
                "{} queue {queue_index} was reset, discarding commit of op {} (ptr {:#06x})",
                S::NAME,
                op_tag.0,
                entry.slot_ptr.0
            );
            outcome.stale = true;
            return Ok(outcome);
        }

        debug_assert!(
            q.in_flight(S::committed(q), entry.slot_ptr),
            "op {} ptr {:#06x} outside the window of queue {queue_index}",
            op_tag.0,
            entry.slot_ptr.0
        );
        q.mark_committed(entry.slot_ptr);

        let mut announce: SmallVec<[Notification; 4]> = SmallVec::new();
        while q.take_retirable(S::committed(q)) {
            let committed = S::committed_mut(q);
            *committed = committed.wrapping_add(1);
            outcome.retired += 1;
            if let Some(n) = S::on_retire(q, queue_index) {
                announce.push(n);
            }
        }

        if outcome.retired > 0 {
            log::trace!(
                "{} queue {queue_index} committed ptr now {:#06x} (+{})",
                S::NAME,
                S::committed(q),
                outcome.retired
            );
            HistogramMetric::RetireBatch {
                side: S::NAME,
                slots: u64::from(outcome.retired),
            }
            .emit();
        }
        self.publish(announce);

        Ok(outcome)
    }

    /// Report table entries reserved more than `max_age` requests ago.
    ///
    /// Returns the number of such entries. Each one is logged and the total
    /// is added to the stale entry counter.
    pub fn audit(&self, max_age: u64) -> usize {
        let mut stale = 0;
        for (tag, entry) in self.table.older_than(self.seq, max_age) {
            log::warn!(
                "{} op {} for queue {} (ptr {:#06x}, request {:#x}) outstanding for {} requests",
                S::NAME,
                tag.0,
                entry.queue_index,
                entry.slot_ptr.0,
                entry.request_tag,
                self.seq.saturating_sub(entry.issued_at)
            );
            stale += 1;
        }
        if stale > 0 {
            CounterMetric::stale_entries(S::NAME, stale as u64).emit();
        }
        stale
    }

    /// Enable or disable a queue. Disabling drops all in-flight work of the
    /// queue: the pending pointer snaps back to the committed pointer, the arm
    /// flag clears, and commits for earlier reservations become no-ops.
    pub fn set_enable(&mut self, queue_index: u16, enable: bool) -> Result<()> {
        let q = self.queues.get_mut(queue_index)?;
        if q.enabled == enable {
            return Ok(());
        }

        q.enabled = enable;
        let mut announce: SmallVec<[Notification; 4]> = SmallVec::new();
        if enable {
            log::debug!("{} queue {queue_index} enabled", S::NAME);
            announce.extend(S::on_host_write(q, queue_index));
        } else {
            log::debug!("{} queue {queue_index} disabled", S::NAME);
            q.armed = false;
            let committed = S::committed(q);
            q.invalidate_inflight(committed);
        }
        self.publish(announce);
        Ok(())
    }

    /// Set or clear the arm flag. Arming a completion queue that already
    /// holds unacknowledged entries raises the event at once.
    pub fn set_arm(&mut self, queue_index: u16, arm: bool) -> Result<()> {
        let q = self.queues.get_mut(queue_index)?;
        if !S::ARMABLE {
            log::warn!("{} queue {queue_index}: arm has no effect on this side", S::NAME);
            return Ok(());
        }

        q.armed = arm;
        if arm && q.enabled && q.producer_ptr != q.consumer_ptr {
            q.armed = false;
            let event = Event {
                event_index: q.linked_index,
                source: queue_index,
            };
            self.publish([Notification::Event(event)]);
        }
        Ok(())
    }

    /// Write the producer pointer.
    pub fn set_producer_ptr(&mut self, queue_index: u16, ptr: u16) -> Result<()> {
        self.write_ptr(queue_index, PtrField::Producer, ptr)
    }

    /// Write the consumer pointer.
    pub fn set_consumer_ptr(&mut self, queue_index: u16, ptr: u16) -> Result<()> {
        self.write_ptr(queue_index, PtrField::Consumer, ptr)
    }

    /// The host-owned pointer may be written at any time. The device-owned
    /// pointer may only be written while the queue is disabled, and doing so
    /// also rewinds the pending pointer.
    fn write_ptr(&mut self, queue_index: u16, field: PtrField, ptr: u16) -> Result<()> {
        let q = self.queues.get_mut(queue_index)?;

        let mut announce: SmallVec<[Notification; 4]> = SmallVec::new();
        if field == S::HOST_PTR {
            *field.get_mut(q) = ptr;
            if q.enabled {
                announce.extend(S::on_host_write(q, queue_index));
            }
        } else if q.enabled {
            log::warn!(
                "{} queue {queue_index}: ignoring write of device pointer {ptr:#06x} while enabled",
                S::NAME
            );
        } else {
            *field.get_mut(q) = ptr;
            q.invalidate_inflight(ptr);
        }
        self.publish(announce);
        Ok(())
    }

    pub(crate) fn publish(&self, notifications: impl IntoIterator<Item = Notification>) {
        for n in notifications {
            match n {
                Notification::Doorbell(db) => {
                    CounterMetric::Doorbells.emit();
                    self.notifier.doorbell(db);
                }
                Notification::Event(ev) => {
                    CounterMetric::Events.emit();
                    self.notifier.event(ev);
                }
            }
        }
    }

    #[allow(clippy::panic)]
    fn protocol_violation(&self, err: QueueError) -> QueueError {
        if self.config.strict() {
            panic!("{} protocol violation: {err}", S::NAME);
        }
        log::error!("{} protocol violation, commit dropped: {err}", S::NAME);
        CounterMetric::protocol_violation(S::NAME).emit();
        err
    }
}

impl<S: Side, N: Notifier> Drop for Manager<S, N> {
    fn drop(&mut self) {
        let outstanding = self.table.in_use();
        if outstanding > 0 {
            log::warn!(
                "{} manager dropped with {outstanding} uncommitted operations",
                S::NAME
            );
        }
    }
}

pub(crate) fn doorbell(queue_index: u16, kind: DoorbellKind) -> Notification {
    Notification::Doorbell(Doorbell { queue_index, kind })
}
