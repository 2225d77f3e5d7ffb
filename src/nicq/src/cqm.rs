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

//! The completion side. The device produces completions and owns the
//! producer pointer; the host consumes them, owns the consumer pointer, and
//! decides through the arm flag when it wants to hear about new ones.

use crate::manager::{Manager, PtrField, Side, Status};
use crate::notify::{Event, Notification};
use crate::optable::OpKind;
use crate::queue::QueueState;

/// Marker for the enqueue side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Enqueue;

/// Hands out free completion slots and raises events for armed queues.
pub type CplQueueManager<N = ()> = Manager<Enqueue, N>;

impl Side for Enqueue {
    const KIND: OpKind = OpKind::Enqueue;
    const NAME: &'static str = "enqueue";
    const ARMABLE: bool = true;
    const HOST_PTR: PtrField = PtrField::Consumer;

    fn unavailable(q: &QueueState) -> Option<Status> {
        let used = u32::from(q.pending_ptr.wrapping_sub(q.consumer_ptr));
        // a consumer pointer written past the producer pointer must not let
        // the in-flight window outgrow the ring
        let in_flight = u32::from(q.pending_ptr.wrapping_sub(q.producer_ptr));
        if !q.enabled || used >= q.ring_size() || in_flight >= q.ring_size() {
            Some(Status::Full)
        } else {
            None
        }
    }

    fn on_retire(q: &mut QueueState, queue_index: u16) -> Option<Notification> {
        if !q.armed {
            return None;
        }
        q.armed = false;
        Some(Notification::Event(Event {
            event_index: q.linked_index,
            source: queue_index,
        }))
    }

    fn on_host_write(_q: &mut QueueState, _queue_index: u16) -> Option<Notification> {
        None
    }
}
