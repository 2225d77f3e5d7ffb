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

// This crate contains testing utilities which need to be shared across multiple
// crates in this project.

use std::sync::Mutex;

use nicq::{Doorbell, DoorbellKind, Event, Notification, Notifier};

pub mod simplelogger;

/// A [`Notifier`] that keeps everything it is handed, in order.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    seen: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take everything recorded so far.
    pub fn drain(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.seen.lock().unwrap())
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Doorbells of `kind` rung for `queue_index`.
    pub fn doorbells(&self, queue_index: u16, kind: DoorbellKind) -> usize {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|n| {
                matches!(n, Notification::Doorbell(db) if db.queue_index == queue_index && db.kind == kind)
            })
            .count()
    }

    pub fn events(&self) -> Vec<Event> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter_map(|n| match n {
                Notification::Event(ev) => Some(*ev),
                Notification::Doorbell(_) => None,
            })
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn doorbell(&self, doorbell: Doorbell) {
        self.seen.lock().unwrap().push(Notification::Doorbell(doorbell));
    }

    fn event(&self, event: Event) {
        self.seen.lock().unwrap().push(Notification::Event(event));
    }
}
