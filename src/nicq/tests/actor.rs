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

use std::sync::Arc;
use std::thread;

use nicq::regs::{CTRL_STATUS_REG, PTR_REG};
use nicq::{Command, DoorbellKind, ManagerConfig, QueueManager, spawn};
use nicq_testing::RecordingNotifier;

#[test]
fn engine_and_host_drive_a_running_manager() {
    let notifier = Arc::new(RecordingNotifier::new());
    let mut cfg = ManagerConfig::new(1, 8, 16);
    cfg.set_strict(false);
    let handle = spawn(QueueManager::with_notifier(cfg, notifier.clone())).unwrap();

    handle
        .write_reg(CTRL_STATUS_REG, Command::SetSize(5).encode())
        .unwrap();
    handle
        .write_reg(CTRL_STATUS_REG, Command::SetEnable(true).encode())
        .unwrap();

    const TOTAL: u16 = 100;
    let handle = Arc::new(handle);

    // host publishes descriptors a few at a time
    let host = {
        let handle = handle.clone();
        thread::spawn(move || {
            for ptr in (4..=TOTAL).step_by(4) {
                handle
                    .write_reg(CTRL_STATUS_REG, Command::SetProducerPtr(ptr).encode())
                    .unwrap();
                thread::yield_now();
            }
        })
    };

    // engine keeps up to eight requests in flight and completes them in
    // reverse batch order
    let mut next_tag = 0u32;
    let mut done = 0u16;
    while done < TOTAL {
        let mut batch = Vec::new();
        for _ in 0..8 {
            handle.request(0, next_tag).unwrap();
            next_tag += 1;
        }
        for _ in 0..8 {
            let rsp = handle.recv_response().unwrap();
            if let Some(grant) = rsp.grant() {
                batch.push(grant.op_tag);
            }
        }
        for tag in batch.iter().rev() {
            handle.commit(*tag).unwrap();
        }
        for _ in &batch {
            let outcome = handle.recv_outcome().unwrap();
            assert!(!outcome.stale);
        }
        done += batch.len() as u16;
    }
    host.join().unwrap();

    assert_eq!(handle.read_reg(PTR_REG).unwrap() >> 16, u32::from(TOTAL));
    assert_eq!(notifier.doorbells(0, DoorbellKind::Consumed), usize::from(TOTAL));

    let handle = Arc::into_inner(handle).unwrap();
    let manager = handle.shutdown().unwrap();
    assert_eq!(manager.in_flight(), 0);
    assert_eq!(manager.queue(0).unwrap().pending_ptr(), TOTAL);
}
