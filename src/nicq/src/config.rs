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

use std::cmp::{max, min};

use tracing::{Span, instrument};

/// Deployment parameters for a queue manager instance
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ManagerConfig {
    /// Number of queues addressable through the register block and the
    /// request channel.
    queue_count: u32,
    /// Capacity of the operation table, i.e. how many ring accesses may be
    /// in flight at once across all queues.
    op_table_size: u16,
    /// Size in bytes of one ring slot. Used to turn a slot index into an
    /// address.
    slot_stride: u32,
    /// Age, in accepted requests, after which an uncommitted table entry is
    /// reported as leaked.
    leak_threshold: u64,
    /// Panic on protocol violations instead of dropping and counting them.
    strict: bool,
}

impl ManagerConfig {
    /// The default number of queues
    pub const DEFAULT_QUEUE_COUNT: u32 = 256;
    /// The minimum number of queues
    pub const MIN_QUEUE_COUNT: u32 = 1;
    /// The maximum number of queues; queue indices travel as u16 on the wire
    pub const MAX_QUEUE_COUNT: u32 = 1 << 16;
    /// The default operation table capacity
    pub const DEFAULT_OP_TABLE_SIZE: u16 = 32;
    /// The minimum operation table capacity
    pub const MIN_OP_TABLE_SIZE: u16 = 1;
    /// The maximum operation table capacity
    pub const MAX_OP_TABLE_SIZE: u16 = 4096;
    /// The default slot stride, one 16 byte transmit/receive descriptor
    pub const DEFAULT_SLOT_STRIDE: u32 = 16;
    /// The slot stride usually chosen for completion rings
    pub const CPL_SLOT_STRIDE: u32 = 32;
    /// The default leak threshold in requests
    pub const DEFAULT_LEAK_THRESHOLD: u64 = 1 << 20;

    /// Create a new configuration, clamping every value into its legal range.
    /// A zero for any numeric parameter selects its default.
    pub fn new(queue_count: u32, op_table_size: u16, slot_stride: u32) -> Self {
        let mut cfg = Self::default();
        cfg.set_queue_count(queue_count);
        cfg.set_op_table_size(op_table_size);
        cfg.set_slot_stride(slot_stride);
        cfg
    }

    /// Set the number of queues. If set to 0 the default of
    /// `DEFAULT_QUEUE_COUNT` is used, otherwise the value is clamped to
    /// `MIN_QUEUE_COUNT..=MAX_QUEUE_COUNT`.
    #[instrument(skip_all, parent = Span::current(), level = "Trace")]
    pub fn set_queue_count(&mut self, queue_count: u32) {
        self.queue_count = match queue_count {
            0 => Self::DEFAULT_QUEUE_COUNT,
            1.. => min(Self::MAX_QUEUE_COUNT, max(queue_count, Self::MIN_QUEUE_COUNT)),
        };
    }

    /// Get the number of queues
    pub fn queue_count(&self) -> u32 {
        self.queue_count
    }

    /// Set the operation table capacity. If set to 0 the default of
    /// `DEFAULT_OP_TABLE_SIZE` is used, otherwise the value is clamped to
    /// `MIN_OP_TABLE_SIZE..=MAX_OP_TABLE_SIZE`.
    #[instrument(skip_all, parent = Span::current(), level = "Trace")]
    pub fn set_op_table_size(&mut self, op_table_size: u16) {
        self.op_table_size = match op_table_size {
            0 => Self::DEFAULT_OP_TABLE_SIZE,
            1.. => min(
                Self::MAX_OP_TABLE_SIZE,
                max(op_table_size, Self::MIN_OP_TABLE_SIZE),
            ),
        };
    }

    /// Get the operation table capacity
    pub fn op_table_size(&self) -> u16 {
        self.op_table_size
    }

    /// Set the slot stride in bytes. If set to 0 the default of
    /// `DEFAULT_SLOT_STRIDE` is used.
    pub fn set_slot_stride(&mut self, slot_stride: u32) {
        self.slot_stride = match slot_stride {
            0 => Self::DEFAULT_SLOT_STRIDE,
            1.. => slot_stride,
        };
    }

    /// Get the slot stride in bytes
    pub fn slot_stride(&self) -> u32 {
        self.slot_stride
    }

    /// Set the leak threshold. If set to 0 the default of
    /// `DEFAULT_LEAK_THRESHOLD` is used.
    pub fn set_leak_threshold(&mut self, leak_threshold: u64) {
        self.leak_threshold = match leak_threshold {
            0 => Self::DEFAULT_LEAK_THRESHOLD,
            1.. => leak_threshold,
        };
    }

    /// Get the leak threshold
    pub fn leak_threshold(&self) -> u64 {
        self.leak_threshold
    }

    /// Choose whether protocol violations panic (`true`) or are dropped,
    /// logged and counted (`false`).
    pub fn set_strict(&mut self, strict: bool) {
        self.strict = strict;
    }

    /// Whether protocol violations panic
    pub fn strict(&self) -> bool {
        self.strict
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            queue_count: Self::DEFAULT_QUEUE_COUNT,
            op_table_size: Self::DEFAULT_OP_TABLE_SIZE,
            slot_stride: Self::DEFAULT_SLOT_STRIDE,
            leak_threshold: Self::DEFAULT_LEAK_THRESHOLD,
            strict: cfg!(debug_assertions),
        }
    }
}
