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

//! A manager running on its own thread.
//!
//! [`spawn`] moves a [`Manager`] onto a dedicated thread that is the only
//! code ever touching its queues and table. Requests, commits and register
//! operations arrive on three channels and are serviced one at a time;
//! responses leave on a fourth, in request order.
//!
//! Messages on different channels are not ordered against each other. A
//! caller that needs a commit applied before its next request waits for the
//! commit's outcome; register operations always wait for their reply.

use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, bounded, select, unbounded};
use tracing::{Span, instrument};

use crate::error::{QueueError, Result};
use crate::manager::{CommitOutcome, Manager, Response, Side};
use crate::notify::Notifier;
use crate::optable::OpTag;

/// Ask for the next slot of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestMsg {
    pub queue_index: u16,
    pub request_tag: u32,
}

/// Report that the operation behind `op_tag` is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitMsg {
    pub op_tag: OpTag,
}

/// Register access, answered on `reply`.
#[derive(Debug)]
pub enum RegOp {
    Write {
        offset: u64,
        value: u32,
        reply: Sender<Result<()>>,
    },
    Read {
        offset: u64,
        reply: Sender<Result<u32>>,
    },
}

/// Caller side of a running manager.
#[derive(Debug)]
pub struct ManagerHandle<S: Side, N: Notifier> {
    requests: Sender<RequestMsg>,
    commits: Sender<CommitMsg>,
    regs: Sender<RegOp>,
    responses: Receiver<Response>,
    outcomes: Receiver<Result<CommitOutcome>>,
    thread: JoinHandle<Manager<S, N>>,
}

/// Start `manager` on a thread of its own.
pub fn spawn<S, N>(manager: Manager<S, N>) -> Result<ManagerHandle<S, N>>
where
    S: Side,
    N: Notifier + Send + 'static,
{
    let (requests, request_rx) = unbounded();
    let (commits, commit_rx) = unbounded();
    let (regs, reg_rx) = unbounded();
    let (response_tx, responses) = unbounded();
    let (outcome_tx, outcomes) = unbounded();

    let thread = thread::Builder::new()
        .name(format!("nicq-{}", S::NAME))
        .spawn(move || {
            run(
                manager,
                request_rx,
                commit_rx,
                reg_rx,
                response_tx,
                outcome_tx,
            )
        })
        .map_err(|e| QueueError::SpawnFailed(e.to_string()))?;

    Ok(ManagerHandle {
        requests,
        commits,
        regs,
        responses,
        outcomes,
        thread,
    })
}

#[instrument(skip_all, parent = Span::current(), level = "Trace", fields(side = S::NAME))]
fn run<S: Side, N: Notifier>(
    mut manager: Manager<S, N>,
    requests: Receiver<RequestMsg>,
    commits: Receiver<CommitMsg>,
    regs: Receiver<RegOp>,
    responses: Sender<Response>,
    outcomes: Sender<Result<CommitOutcome>>,
) -> Manager<S, N> {
    log::debug!("{} actor started", S::NAME);
    loop {
        let open = select! {
            recv(requests) -> msg => match msg {
                Ok(RequestMsg { queue_index, request_tag }) => {
                    let rsp = manager.request(queue_index, request_tag);
                    if responses.send(rsp).is_err() {
                        log::debug!("{} response receiver gone", S::NAME);
                    }
                    true
                }
                Err(_) => false,
            },
            recv(commits) -> msg => match msg {
                Ok(CommitMsg { op_tag }) => {
                    let _ = outcomes.send(manager.commit(op_tag));
                    true
                }
                Err(_) => false,
            },
            recv(regs) -> msg => match msg {
                Ok(op) => {
                    service_reg(&mut manager, op);
                    true
                }
                Err(_) => false,
            },
        };
        if !open {
            break;
        }
    }

    // the handle drops all senders at once; finish what was already queued
    for RequestMsg {
        queue_index,
        request_tag,
    } in requests.try_iter()
    {
        let _ = responses.send(manager.request(queue_index, request_tag));
    }
    for CommitMsg { op_tag } in commits.try_iter() {
        let _ = outcomes.send(manager.commit(op_tag));
    }
    for op in regs.try_iter() {
        service_reg(&mut manager, op);
    }
    log::debug!("{} actor stopped", S::NAME);
    manager
}

fn service_reg<S: Side, N: Notifier>(manager: &mut Manager<S, N>, op: RegOp) {
    match op {
        RegOp::Write {
            offset,
            value,
            reply,
        } => {
            let _ = reply.send(manager.write_reg(offset, value));
        }
        RegOp::Read { offset, reply } => {
            let _ = reply.send(manager.read_reg(offset));
        }
    }
}

impl<S: Side, N: Notifier> ManagerHandle<S, N> {
    /// Queue a request. The answer arrives on [`responses`](Self::responses).
    pub fn request(&self, queue_index: u16, request_tag: u32) -> Result<()> {
        self.requests.send(RequestMsg {
            queue_index,
            request_tag,
        })?;
        Ok(())
    }

    /// Queue a commit. Its outcome arrives on [`outcomes`](Self::outcomes).
    pub fn commit(&self, op_tag: OpTag) -> Result<()> {
        self.commits.send(CommitMsg { op_tag })?;
        Ok(())
    }

    /// Write a register and wait until the write has been applied.
    pub fn write_reg(&self, offset: u64, value: u32) -> Result<()> {
        let (reply, rx) = bounded(1);
        self.regs.send(RegOp::Write {
            offset,
            value,
            reply,
        })?;
        rx.recv()?
    }

    /// Read a register.
    pub fn read_reg(&self, offset: u64) -> Result<u32> {
        let (reply, rx) = bounded(1);
        self.regs.send(RegOp::Read { offset, reply })?;
        rx.recv()?
    }

    /// Responses, one per request, in request order.
    pub fn responses(&self) -> &Receiver<Response> {
        &self.responses
    }

    /// Commit outcomes, one per commit, in the order commits were applied.
    pub fn outcomes(&self) -> &Receiver<Result<CommitOutcome>> {
        &self.outcomes
    }

    /// Block for the next response.
    pub fn recv_response(&self) -> Result<Response> {
        Ok(self.responses.recv()?)
    }

    /// Block for the next commit outcome.
    pub fn recv_outcome(&self) -> Result<CommitOutcome> {
        self.outcomes.recv()?
    }

    /// Stop the actor and take the manager back.
    pub fn shutdown(self) -> Result<Manager<S, N>> {
        let ManagerHandle {
            requests,
            commits,
            regs,
            thread,
            ..
        } = self;
        drop((requests, commits, regs));
        thread.join().map_err(|_| QueueError::ActorPanicked)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::ManagerConfig;
    use crate::manager::Status;
    use crate::regs::{CTRL_STATUS_REG, Command, PTR_REG};
    use crate::{CplQueueManager, QueueManager};

    fn config(table: u16) -> ManagerConfig {
        let mut cfg = ManagerConfig::new(2, table, 16);
        cfg.set_strict(false);
        cfg
    }

    fn enable(handle: &ManagerHandle<impl Side, impl Notifier>, size_log2: u8) {
        handle
            .write_reg(CTRL_STATUS_REG, Command::SetSize(size_log2).encode())
            .unwrap();
        handle
            .write_reg(CTRL_STATUS_REG, Command::SetEnable(true).encode())
            .unwrap();
    }

    #[test]
    fn test_request_commit_round_trip() {
        let handle = spawn(QueueManager::new(config(4))).unwrap();
        enable(&handle, 4);
        handle
            .write_reg(CTRL_STATUS_REG, Command::SetProducerPtr(2).encode())
            .unwrap();

        handle.request(0, 10).unwrap();
        handle.request(0, 11).unwrap();
        handle.request(0, 12).unwrap();

        let a = handle.recv_response().unwrap();
        let b = handle.recv_response().unwrap();
        let c = handle.recv_response().unwrap();
        assert_eq!(
            (a.request_tag, b.request_tag, c.request_tag),
            (10, 11, 12)
        );
        assert!(c.is_empty());

        handle.commit(b.grant().unwrap().op_tag).unwrap();
        assert_eq!(handle.recv_outcome().unwrap().retired, 0);
        handle.commit(a.grant().unwrap().op_tag).unwrap();
        assert_eq!(handle.recv_outcome().unwrap().retired, 2);

        assert_eq!(handle.read_reg(PTR_REG).unwrap(), 0x0002_0002);

        let manager = handle.shutdown().unwrap();
        assert_eq!(manager.in_flight(), 0);
    }

    #[test]
    fn test_errors_are_returned_to_caller() {
        let handle = spawn(CplQueueManager::new(config(2))).unwrap();
        assert_eq!(
            handle.write_reg(CTRL_STATUS_REG, 0x1234_0000),
            Err(QueueError::UnknownCommand(0x1234_0000))
        );
        assert_eq!(
            handle.read_reg(0x40),
            Err(QueueError::InvalidQueue(2, 2))
        );

        handle.commit(OpTag(1)).unwrap();
        assert_eq!(
            handle.recv_outcome(),
            Err(QueueError::UnknownOpTag(1))
        );

        handle.request(5, 0).unwrap();
        assert_eq!(
            handle.recv_response().unwrap().status,
            Status::InvalidQueue
        );
        handle.shutdown().unwrap();
    }

    #[test]
    fn test_queued_commits_applied_on_shutdown() {
        let handle = spawn(CplQueueManager::new(config(8))).unwrap();
        enable(&handle, 3);

        for i in 0..3 {
            handle.request(0, i).unwrap();
        }
        let tags: Vec<OpTag> = (0..3)
            .map(|_| handle.recv_response().unwrap().grant().unwrap().op_tag)
            .collect();
        for tag in tags.into_iter().rev() {
            handle.commit(tag).unwrap();
        }

        let manager = handle.shutdown().unwrap();
        assert_eq!(manager.queue(0).unwrap().producer_ptr(), 3);
        assert_eq!(manager.in_flight(), 0);
    }

    #[test]
    fn test_panicking_actor_is_reported() {
        let mut cfg = config(2);
        cfg.set_strict(true);
        let handle = spawn(QueueManager::new(cfg)).unwrap();
        handle.commit(OpTag(0)).unwrap();

        // the actor dies on the violation and drops its ends
        assert!(
            handle
                .outcomes()
                .recv_timeout(Duration::from_secs(10))
                .is_err()
        );
        assert!(matches!(handle.shutdown(), Err(QueueError::ActorPanicked)));
    }
}
