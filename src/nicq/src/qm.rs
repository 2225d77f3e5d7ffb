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

//! The descriptor side. The host produces descriptors and owns the producer
//! pointer; the device consumes them and owns the consumer pointer.

use crate::manager::{Manager, PtrField, Side, Status, doorbell};
use crate::notify::{DoorbellKind, Notification};
use crate::optable::OpKind;
use crate::queue::QueueState;

/// Marker for the dequeue side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Dequeue;

/// Hands out descriptor slots published by the host.
pub type QueueManager<N = ()> = Manager<Dequeue, N>;

impl Side for Dequeue {
    const KIND: OpKind = OpKind::Dequeue;
    const NAME: &'static str = "dequeue";
    const ARMABLE: bool = false;
    const HOST_PTR: PtrField = PtrField::Producer;

    fn unavailable(q: &QueueState) -> Option<Status> {
        // A producer pointer more than a ring ahead of the consumer pointer is
        // a host bug; nothing past the ring is handed out.
        let reserved = u32::from(q.pending_ptr.wrapping_sub(q.consumer_ptr));
        if !q.enabled || q.pending_ptr == q.producer_ptr || reserved >= q.ring_size() {
            Some(Status::Empty)
        } else {
            None
        }
    }

    fn on_retire(_q: &mut QueueState, queue_index: u16) -> Option<Notification> {
        Some(doorbell(queue_index, DoorbellKind::Consumed))
    }

    fn on_host_write(q: &mut QueueState, queue_index: u16) -> Option<Notification> {
        (q.producer_ptr != q.pending_ptr).then(|| doorbell(queue_index, DoorbellKind::Published))
    }
}
