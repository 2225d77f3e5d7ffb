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

use std::collections::HashSet;
use std::sync::Arc;

use nicq::regs::{CTRL_STATUS_REG, PTR_REG};
use nicq::{
    Command, CplQueueManager, DoorbellKind, Event, ManagerConfig, OpTag, QueueFlags,
    QueueManager, REG_STRIDE, Status,
};
use nicq_testing::RecordingNotifier;

fn config(queues: u32, table: u16) -> ManagerConfig {
    let mut cfg = ManagerConfig::new(queues, table, ManagerConfig::DEFAULT_SLOT_STRIDE);
    cfg.set_strict(false);
    cfg
}

/// Tiny deterministic generator so shuffles are reproducible.
struct XorShift(u64);

impl XorShift {
    fn next(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }

    fn below(&mut self, n: usize) -> usize {
        (self.next() % n as u64) as usize
    }
}

#[test]
fn descriptor_ring_fill_and_drain() {
    let notifier = Arc::new(RecordingNotifier::new());
    let mut qm = QueueManager::with_notifier(config(8, 32), notifier.clone());
    let q = 5u16;
    let blk = u64::from(q) * REG_STRIDE;

    qm.write_reg(blk + CTRL_STATUS_REG, Command::SetSize(4).encode())
        .unwrap();
    qm.write_reg(blk, 0x0008_0000).unwrap();
    qm.write_reg(blk + CTRL_STATUS_REG, Command::SetLinkedIndex(2).encode())
        .unwrap();
    qm.write_reg(blk + CTRL_STATUS_REG, Command::SetEnable(true).encode())
        .unwrap();

    for i in 0..20 {
        assert!(qm.request(q, i).is_empty());
    }
    assert_eq!(qm.in_flight(), 0);

    qm.write_reg(blk + CTRL_STATUS_REG, Command::SetProducerPtr(16).encode())
        .unwrap();
    assert_eq!(notifier.doorbells(q, DoorbellKind::Published), 1);

    let mut grants = Vec::new();
    for i in 0..16u16 {
        let rsp = qm.request(q, u32::from(i));
        let grant = *rsp.grant().unwrap();
        assert_eq!(grant.slot, i);
        assert!(!grant.phase);
        assert_eq!(grant.address, 0x0008_0000 + u64::from(i) * 16);
        assert_eq!(grant.linked_index, 2);
        grants.push(grant);
    }
    assert!(qm.request(q, 16).is_empty());

    let status = qm.read_reg(blk + CTRL_STATUS_REG).unwrap();
    assert_ne!(status & QueueFlags::ACTIVE.bits(), 0);

    for grant in &grants {
        qm.commit(grant.op_tag).unwrap();
    }
    assert_eq!(qm.queue(q).unwrap().consumer_ptr(), 16);
    assert_eq!(qm.read_reg(blk + PTR_REG).unwrap(), 0x0010_0010);
    assert_eq!(notifier.doorbells(q, DoorbellKind::Consumed), 16);

    let status = qm.read_reg(blk + CTRL_STATUS_REG).unwrap();
    assert_eq!(status & QueueFlags::ACTIVE.bits(), 0);
}

#[test]
fn table_exhaustion_recovers_after_any_commit() {
    let mut qm = QueueManager::new(config(1, 4));
    qm.apply(0, Command::SetSize(4)).unwrap();
    qm.apply(0, Command::SetEnable(true)).unwrap();
    qm.apply(0, Command::SetProducerPtr(16)).unwrap();

    let tags: Vec<OpTag> = (0..4)
        .map(|i| qm.request(0, i).grant().unwrap().op_tag)
        .collect();
    assert_eq!(tags.iter().collect::<HashSet<_>>().len(), 4);

    let fifth = qm.request(0, 4);
    assert_eq!(fifth.status, Status::TableFull);

    qm.commit(tags[3]).unwrap();
    assert!(qm.request(0, 4).grant().is_some());
}

#[test]
fn shuffled_commits_keep_pointer_order() {
    let notifier = Arc::new(RecordingNotifier::new());
    let mut qm = QueueManager::with_notifier(config(3, 16), notifier.clone());
    for q in 0..3 {
        qm.apply(q, Command::SetSize(3)).unwrap();
        qm.apply(q, Command::SetEnable(true)).unwrap();
    }

    let mut rng = XorShift(0x9E37_79B9_7F4A_7C15);
    let mut outstanding: Vec<(u16, OpTag, u16)> = Vec::new();
    let mut produced = [0u16; 3];
    let mut committed: [HashSet<u16>; 3] = Default::default();

    for round in 0..2000u32 {
        let q = rng.below(3) as u16;
        match rng.below(3) {
            0 => {
                produced[q as usize] = produced[q as usize].wrapping_add(rng.below(4) as u16);
                qm.apply(q, Command::SetProducerPtr(produced[q as usize]))
                    .unwrap();
            }
            1 => {
                let rsp = qm.request(q, round);
                if let Some(grant) = rsp.grant() {
                    outstanding.push((q, grant.op_tag, grant.pointer));
                }
            }
            _ if !outstanding.is_empty() => {
                let (q, tag, ptr) = outstanding.swap_remove(rng.below(outstanding.len()));
                let before = qm.queue(q).unwrap().consumer_ptr();
                let outcome = qm.commit(tag).unwrap();
                assert!(!outcome.stale);
                committed[q as usize].insert(ptr);

                // the pointer only crosses slots whose commits have arrived
                let after = qm.queue(q).unwrap().consumer_ptr();
                assert_eq!(after.wrapping_sub(before), outcome.retired);
                let mut p = before;
                while p != after {
                    assert!(committed[q as usize].remove(&p), "ptr {p:#x} retired early");
                    p = p.wrapping_add(1);
                }
            }
            _ => {}
        }

        for q in 0..3u16 {
            let state = qm.queue(q).unwrap();
            let reserved = state.pending_ptr().wrapping_sub(state.consumer_ptr());
            assert!(u32::from(reserved) <= state.ring_size());
        }
        assert!(qm.in_flight() <= 16);
    }

    let retired: u16 = (0..3).map(|q| qm.queue(q).unwrap().consumer_ptr()).sum();
    let rung: usize = (0..3)
        .map(|q| notifier.doorbells(q, DoorbellKind::Consumed))
        .sum();
    assert_eq!(usize::from(retired), rung);
}

#[test]
fn completion_ring_with_coalesced_events() {
    let notifier = Arc::new(RecordingNotifier::new());
    let cfg = ManagerConfig::new(4, 8, ManagerConfig::CPL_SLOT_STRIDE);
    let mut cqm = CplQueueManager::with_notifier(cfg, notifier.clone());
    cqm.apply(2, Command::SetSize(2)).unwrap();
    cqm.apply(2, Command::SetLinkedIndex(11)).unwrap();
    cqm.apply(2, Command::SetEnable(true)).unwrap();
    cqm.apply(2, Command::SetArm(true)).unwrap();

    // fill the ring, completions retire out of order
    let tags: Vec<OpTag> = (0..4)
        .map(|i| cqm.request(2, i).grant().unwrap().op_tag)
        .collect();
    assert!(cqm.request(2, 4).is_full());
    for &i in &[1usize, 3, 0, 2] {
        cqm.commit(tags[i]).unwrap();
    }
    assert_eq!(cqm.queue(2).unwrap().producer_ptr(), 4);
    assert_eq!(
        notifier.events(),
        vec![Event {
            event_index: 11,
            source: 2
        }]
    );
    notifier.drain();

    // host consumes two, re-arms: two are still waiting, so the event is
    // raised straight away
    cqm.apply(2, Command::SetConsumerPtrArm(2)).unwrap();
    assert_eq!(notifier.events().len(), 1);
    notifier.drain();

    // host consumes the rest and re-arms: quiet until the next completion
    cqm.apply(2, Command::SetConsumerPtrArm(4)).unwrap();
    assert!(notifier.is_empty());
    let grant = *cqm.request(2, 9).grant().unwrap();
    assert_eq!((grant.slot, grant.phase), (0, true));
    cqm.commit(grant.op_tag).unwrap();
    assert_eq!(notifier.events().len(), 1);
}

#[test]
fn disable_mid_flight_then_reuse() {
    let notifier = Arc::new(RecordingNotifier::new());
    let mut cqm = CplQueueManager::with_notifier(config(1, 4), notifier.clone());
    cqm.apply(0, Command::SetSize(2)).unwrap();
    cqm.apply(0, Command::SetEnable(true)).unwrap();
    cqm.apply(0, Command::SetArm(true)).unwrap();

    let old: Vec<OpTag> = (0..3)
        .map(|i| cqm.request(0, i).grant().unwrap().op_tag)
        .collect();
    cqm.apply(0, Command::SetEnable(false)).unwrap();
    assert!(cqm.request(0, 3).is_full());

    cqm.apply(0, Command::SetEnable(true)).unwrap();
    let fresh = *cqm.request(0, 4).grant().unwrap();
    assert_eq!(fresh.slot, 0);

    for tag in old {
        let outcome = cqm.commit(tag).unwrap();
        assert!(outcome.stale);
    }
    assert_eq!(cqm.queue(0).unwrap().producer_ptr(), 0);
    assert!(notifier.is_empty());
    assert_eq!(cqm.in_flight(), 1);

    cqm.commit(fresh.op_tag).unwrap();
    assert_eq!(cqm.queue(0).unwrap().producer_ptr(), 1);
}
