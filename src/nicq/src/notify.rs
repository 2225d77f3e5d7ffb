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

//! Doorbell and event notifications
//!
//! The managers never talk to the DMA dispatcher or the interrupt
//! controller directly. Pointer movement is published through a
//! [`Notifier`], and whoever owns the manager decides where the
//! notifications go.

use std::sync::Arc;

use crossbeam_channel::Sender;

/// Why a doorbell was rung.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DoorbellKind {
    /// The host advanced the producer pointer of an enabled descriptor
    /// queue; there is new work to fetch.
    Published,
    /// A retired commit advanced the consumer pointer; ring space was freed.
    Consumed,
}

/// Notification that a descriptor queue's pointers moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Doorbell {
    pub queue_index: u16,
    pub kind: DoorbellKind,
}

/// Host notification raised by an armed completion queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Event {
    /// Event queue to post to (the completion queue's linked index).
    pub event_index: u16,
    /// Completion queue that produced the event.
    pub source: u16,
}

/// Either kind of notification, for transports that carry both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Notification {
    Doorbell(Doorbell),
    Event(Event),
}

/// Sink for notifications produced by a manager.
pub trait Notifier {
    fn doorbell(&self, doorbell: Doorbell);
    fn event(&self, event: Event);
}

/// Discard everything.
impl Notifier for () {
    fn doorbell(&self, _doorbell: Doorbell) {}
    fn event(&self, _event: Event) {}
}

impl Notifier for Sender<Notification> {
    fn doorbell(&self, doorbell: Doorbell) {
        if self.send(Notification::Doorbell(doorbell)).is_err() {
            log::debug!("doorbell for queue {} dropped, receiver gone", doorbell.queue_index);
        }
    }

    fn event(&self, event: Event) {
        if self.send(Notification::Event(event)).is_err() {
            log::debug!(
                "event {} from queue {} dropped, receiver gone",
                event.event_index,
                event.source
            );
        }
    }
}

impl<N: Notifier + ?Sized> Notifier for Arc<N> {
    fn doorbell(&self, doorbell: Doorbell) {
        (**self).doorbell(doorbell)
    }

    fn event(&self, event: Event) {
        (**self).event(event)
    }
}

impl<N: Notifier + ?Sized> Notifier for &N {
    fn doorbell(&self, doorbell: Doorbell) {
        (**self).doorbell(doorbell)
    }

    fn event(&self, event: Event) {
        (**self).event(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_notifier() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let db = Doorbell {
            queue_index: 3,
            kind: DoorbellKind::Consumed,
        };
        let ev = Event {
            event_index: 1,
            source: 7,
        };
        tx.doorbell(db);
        tx.event(ev);

        assert_eq!(rx.try_recv(), Ok(Notification::Doorbell(db)));
        assert_eq!(rx.try_recv(), Ok(Notification::Event(ev)));
    }

    #[test]
    fn test_channel_notifier_receiver_gone() {
        let (tx, rx) = crossbeam_channel::unbounded::<Notification>();
        drop(rx);
        // must not panic
        tx.event(Event {
            event_index: 0,
            source: 0,
        });
    }
}
