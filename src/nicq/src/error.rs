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

use thiserror::Error;

/// The error type for queue manager operations.
///
/// Backpressure (empty, full, table exhaustion) is never an error; it is
/// reported through [`Status`](crate::Status) in the response. The variants
/// here are caller bugs or malformed register traffic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The actor thread has gone away
    #[error("Manager actor panicked")]
    ActorPanicked,

    /// A register access hit an offset that is not part of the block
    #[error("Register offset {0:#x} is not mapped")]
    BadRegister(u64),

    /// Sending to or receiving from the actor failed
    #[error("Manager channel closed")]
    ChannelClosed,

    /// A commit carried a tag beyond the operation table
    #[error("Operation tag {0} is out of range, table holds {1} entries")]
    OpTagOutOfRange(u16, usize),

    /// Queue index outside the configured queue count
    #[error("Queue index {0} is out of range, {1} queues configured")]
    InvalidQueue(u32, u32),

    /// A linked index command carried a value that does not fit in 16 bits
    #[error("Linked index {0:#x} does not fit in 16 bits")]
    InvalidLinkedIndex(u32),

    /// A size command asked for a ring larger than the pointer space allows
    #[error("Ring size exponent {0} exceeds the maximum of {1}")]
    InvalidSize(u8, u8),

    /// The OS refused to start the actor thread
    #[error("Failed to spawn manager thread: {0}")]
    SpawnFailed(String),

    /// A commit referenced a table entry that is not reserved
    #[error("Operation tag {0} is not outstanding")]
    UnknownOpTag(u16),

    /// The command word written to the control register has no known opcode
    #[error("Unknown queue command {0:#010x}")]
    UnknownCommand(u32),
}

impl<T> From<crossbeam_channel::SendError<T>> for QueueError {
    fn from(_: crossbeam_channel::SendError<T>) -> Self {
        QueueError::ChannelClosed
    }
}

impl From<crossbeam_channel::RecvError> for QueueError {
    fn from(_: crossbeam_channel::RecvError) -> Self {
        QueueError::ChannelClosed
    }
}

/// The result type used throughout the crate.
pub type Result<T> = core::result::Result<T, QueueError>;
