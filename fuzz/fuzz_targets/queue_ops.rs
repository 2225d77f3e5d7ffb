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

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use nicq::{
    Command, CplQueueManager, Manager, ManagerConfig, OpTag, QueueError, QueueManager, Side,
};

const QUEUES: u16 = 4;
const TABLE: u16 = 8;

#[derive(Arbitrary, Debug)]
enum Op {
    Request { queue: u8 },
    /// Commit the n-th outstanding grant
    Commit { pick: u8 },
    /// Commit a tag straight from the input, usually a protocol violation
    CommitRaw(OpTag),
    Register { queue: u8, cmd: Command },
    RawWrite { offset: u8, value: u32 },
}

#[derive(Arbitrary, Debug)]
struct FuzzInput {
    completion_side: bool,
    ops: Vec<Op>,
}

fn run<S: Side>(mut m: Manager<S>, ops: Vec<Op>) {
    let mut outstanding: Vec<(u16, OpTag)> = Vec::new();

    for op in ops {
        match op {
            Op::Request { queue } => {
                let q = u16::from(queue) % (QUEUES + 1);
                let size_log2 = m.queue(q).map(|s| s.size_log2()).unwrap_or(0);
                let rsp = m.request(q, u32::from(queue));
                if let Some(grant) = rsp.grant() {
                    assert_eq!(grant.phase, (grant.pointer >> size_log2) & 1 != 0);
                    assert_eq!(grant.slot, grant.pointer & ((1u32 << size_log2) - 1) as u16);
                    assert!(outstanding.iter().all(|(_, tag)| *tag != grant.op_tag));
                    outstanding.push((q, grant.op_tag));
                } else {
                    assert!(q < QUEUES || rsp.is_error());
                }
            }
            Op::Commit { pick } if !outstanding.is_empty() => {
                let (q, tag) = outstanding.remove(usize::from(pick) % outstanding.len());
                let before = m.queue(q).map(|s| S::committed(s)).unwrap_or(0);
                let outcome = m.commit(tag).unwrap();
                let after = m.queue(q).map(|s| S::committed(s)).unwrap_or(0);
                assert_eq!(after.wrapping_sub(before), outcome.retired);
                if outcome.stale {
                    assert_eq!(outcome.retired, 0);
                }
            }
            Op::Commit { .. } => {}
            Op::CommitRaw(tag) => {
                if outstanding.iter().any(|(_, t)| *t == tag) {
                    continue;
                }
                assert!(matches!(
                    m.commit(tag),
                    Err(QueueError::UnknownOpTag(_) | QueueError::OpTagOutOfRange(_, _))
                ));
            }
            Op::Register { queue, cmd } => {
                let _ = m.apply(u16::from(queue) % QUEUES, cmd);
            }
            Op::RawWrite { offset, value } => {
                let _ = m.write_reg(u64::from(offset) & !3, value);
            }
        }

        assert_eq!(m.in_flight(), outstanding.len());
        assert!(m.in_flight() <= usize::from(TABLE));
        for q in 0..QUEUES {
            let state = m.queue(q).unwrap();
            let regs = m.read_block(q).unwrap();
            assert_eq!(regs.producer_ptr(), state.producer_ptr());
            assert_eq!(regs.consumer_ptr(), state.consumer_ptr());
            assert!(state.reorder_depth() <= state.ring_size() as usize);
        }
    }
}

fuzz_target!(|input: FuzzInput| {
    let mut cfg = ManagerConfig::new(u32::from(QUEUES), TABLE, 16);
    cfg.set_strict(false);
    if input.completion_side {
        run(CplQueueManager::new(cfg), input.ops);
    } else {
        run(QueueManager::new(cfg), input.ops);
    }
});
