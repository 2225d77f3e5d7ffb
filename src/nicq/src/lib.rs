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

#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::panic))]
#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::expect_used))]
#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::unwrap_used))]

//! Queue manager core for a descriptor-ring NIC.
//!
//! Two managers sit between host-visible rings and the engines that move
//! data:
//!
//! - the [`QueueManager`] hands out descriptor slots the host has published
//!   and, once their commits arrive, advances the consumer pointer;
//! - the [`CplQueueManager`] hands out free completion slots and, once their
//!   commits arrive, advances the producer pointer and raises host events.
//!
//! Requests are answered immediately. Commits may arrive out of order; the
//! pointer the host sees still advances in reservation order.
//!
//! ```no_run
//! use nicq::{Command, ManagerConfig, QueueManager};
//!
//! let mut qm = QueueManager::new(ManagerConfig::default());
//! qm.apply(0, Command::SetSize(4))?;
//! qm.apply(0, Command::SetEnable(true))?;
//! qm.apply(0, Command::SetProducerPtr(1))?;
//!
//! let rsp = qm.request(0, 0xabc);
//! let grant = rsp.grant().copied().unwrap();
//! // ... fetch the descriptor at grant.address ...
//! qm.commit(grant.op_tag)?;
//! # Ok::<(), nicq::QueueError>(())
//! ```

/// Single-owner thread driving a manager over channels
pub mod actor;
/// Manager sizing and policy
pub mod config;
/// Completion queue manager (enqueue side)
pub mod cqm;
/// Errors returned by the managers
pub mod error;
/// The request/commit engine shared by both managers
pub mod manager;
pub(crate) mod metrics;
/// Doorbells, events and the sink they go to
pub mod notify;
/// In-flight operation table
pub mod optable;
/// Queue manager (dequeue side)
pub mod qm;
/// Per-queue ring state
pub mod queue;
/// Register block decode
pub mod regs;

pub use actor::{CommitMsg, ManagerHandle, RegOp, RequestMsg, spawn};
pub use config::ManagerConfig;
pub use cqm::{CplQueueManager, Enqueue};
pub use error::{QueueError, Result};
pub use manager::{CommitOutcome, Grant, Manager, PtrField, Response, Side, Status};
pub use notify::{Doorbell, DoorbellKind, Event, Notification, Notifier};
pub use optable::{OpEntry, OpKind, OpTable, OpTag};
pub use qm::{Dequeue, QueueManager};
pub use queue::{MAX_SIZE_LOG2, QueueFlags, QueueState, RingPtr};
pub use regs::{Command, QueueRegs, REG_STRIDE};
