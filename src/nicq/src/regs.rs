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

//! Per-queue register block
//!
//! Every queue owns a block of [`REG_STRIDE`] bytes; block `n` starts at
//! `n * REG_STRIDE`. All registers are 32 bits wide.
//!
//! ```text
//! 0x00  BASE_ADDR_LO   ring base [31:12], bits 11:0 read as zero
//! 0x04  BASE_ADDR_HI   ring base [63:32]
//! 0x08  CTRL_STATUS    write: command  read: [0] enable [1] armed [3] active
//!                                            [15:8] size_log2 [31:16] linked index
//! 0x0C  SIZE_LINK      [15:0] linked index [31:24] size_log2
//! 0x10  PTRS           [15:0] producer pointer [31:16] consumer pointer
//! ```
//!
//! Configuration (base, VF id, size, linked index) and the device-owned
//! pointer only take writes while the queue is disabled; other writes are
//! ignored with a warning, the way the hardware drops them.

use bytemuck::{Pod, Zeroable};
use tracing::{Span, instrument};

use crate::error::{QueueError, Result};
use crate::manager::{Manager, Side};
use crate::notify::Notifier;
use crate::queue::{QueueFlags, QueueState};

/// Size of one queue's register block.
pub const REG_STRIDE: u64 = 0x20;

pub const BASE_ADDR_LO_REG: u64 = 0x00;
pub const BASE_ADDR_HI_REG: u64 = 0x04;
pub const CTRL_STATUS_REG: u64 = 0x08;
pub const SIZE_LINK_REG: u64 = 0x0C;
pub const PTR_REG: u64 = 0x10;

pub const CMD_SET_VF_ID: u32 = 0x8001_0000;
pub const CMD_SET_SIZE: u32 = 0x8002_0000;
pub const CMD_SET_LINKED_INDEX: u32 = 0xC000_0000;
pub const CMD_SET_PRODUCER_PTR: u32 = 0x8080_0000;
pub const CMD_SET_CONSUMER_PTR: u32 = 0x8090_0000;
pub const CMD_SET_CONSUMER_PTR_ARM: u32 = 0x8091_0000;
pub const CMD_SET_ENABLE: u32 = 0x4000_0100;
pub const CMD_SET_ARM: u32 = 0x4000_0200;

const CMD_MASK_16: u32 = 0xFFFF_0000;
const CMD_MASK_8: u32 = 0xFFFF_FF00;
const CMD_MASK_LINKED: u32 = 0xC000_0000;

/// A decoded control command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "fuzzing", derive(arbitrary::Arbitrary))]
pub enum Command {
    SetVfId(u16),
    SetSize(u8),
    SetLinkedIndex(u16),
    SetProducerPtr(u16),
    SetConsumerPtr(u16),
    /// Acknowledge completions and re-arm in one write.
    SetConsumerPtrArm(u16),
    SetEnable(bool),
    SetArm(bool),
}

impl Command {
    /// The register word that encodes this command.
    pub fn encode(self) -> u32 {
        match self {
            Command::SetVfId(vf) => CMD_SET_VF_ID | u32::from(vf),
            Command::SetSize(log2) => CMD_SET_SIZE | u32::from(log2),
            Command::SetLinkedIndex(idx) => CMD_SET_LINKED_INDEX | u32::from(idx),
            Command::SetProducerPtr(ptr) => CMD_SET_PRODUCER_PTR | u32::from(ptr),
            Command::SetConsumerPtr(ptr) => CMD_SET_CONSUMER_PTR | u32::from(ptr),
            Command::SetConsumerPtrArm(ptr) => CMD_SET_CONSUMER_PTR_ARM | u32::from(ptr),
            Command::SetEnable(en) => CMD_SET_ENABLE | u32::from(en),
            Command::SetArm(arm) => CMD_SET_ARM | u32::from(arm),
        }
    }
}

impl TryFrom<u32> for Command {
    type Error = QueueError;

    fn try_from(word: u32) -> Result<Self> {
        if word & CMD_MASK_LINKED == CMD_SET_LINKED_INDEX {
            let idx = word & !CMD_MASK_LINKED;
            return u16::try_from(idx)
                .map(Command::SetLinkedIndex)
                .map_err(|_| QueueError::InvalidLinkedIndex(idx));
        }

        let low16 = (word & 0xFFFF) as u16;
        let cmd = match word & CMD_MASK_16 {
            CMD_SET_VF_ID => Command::SetVfId(low16),
            CMD_SET_SIZE => Command::SetSize((word & 0xFF) as u8),
            CMD_SET_PRODUCER_PTR => Command::SetProducerPtr(low16),
            CMD_SET_CONSUMER_PTR => Command::SetConsumerPtr(low16),
            CMD_SET_CONSUMER_PTR_ARM => Command::SetConsumerPtrArm(low16),
            _ => match word & CMD_MASK_8 {
                CMD_SET_ENABLE => Command::SetEnable(word & 1 != 0),
                CMD_SET_ARM => Command::SetArm(word & 1 != 0),
                _ => return Err(QueueError::UnknownCommand(word)),
            },
        };
        Ok(cmd)
    }
}

/// Snapshot of one queue's register block, laid out as on the bus.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, PartialEq, Eq, Hash)]
pub struct QueueRegs {
    pub base_addr_lo: u32,
    pub base_addr_hi: u32,
    pub ctrl_status: u32,
    pub size_link: u32,
    pub ptrs: u32,
}

const _: () = assert!(core::mem::size_of::<QueueRegs>() == 20);
const _: () = assert!(core::mem::offset_of!(QueueRegs, base_addr_lo) as u64 == BASE_ADDR_LO_REG);
const _: () = assert!(core::mem::offset_of!(QueueRegs, base_addr_hi) as u64 == BASE_ADDR_HI_REG);
const _: () = assert!(core::mem::offset_of!(QueueRegs, ctrl_status) as u64 == CTRL_STATUS_REG);
const _: () = assert!(core::mem::offset_of!(QueueRegs, size_link) as u64 == SIZE_LINK_REG);
const _: () = assert!(core::mem::offset_of!(QueueRegs, ptrs) as u64 == PTR_REG);

impl QueueRegs {
    /// Producer pointer from the packed pointer word.
    pub fn producer_ptr(&self) -> u16 {
        (self.ptrs & 0xFFFF) as u16
    }

    /// Consumer pointer from the packed pointer word.
    pub fn consumer_ptr(&self) -> u16 {
        (self.ptrs >> 16) as u16
    }

    pub fn flags(&self) -> QueueFlags {
        QueueFlags::from_bits_truncate(self.ctrl_status)
    }

    pub fn size_log2(&self) -> u8 {
        (self.size_link >> 24) as u8
    }

    pub fn linked_index(&self) -> u16 {
        (self.size_link & 0xFFFF) as u16
    }
}

/// Split a bus offset into queue index and register offset.
fn decode_offset(offset: u64, queue_count: u32) -> Result<(u16, u64)> {
    let index = offset / REG_STRIDE;
    if index >= u64::from(queue_count) {
        return Err(QueueError::InvalidQueue(
            u32::try_from(index).unwrap_or(u32::MAX),
            queue_count,
        ));
    }
    let reg = offset % REG_STRIDE;
    if reg > PTR_REG || reg % 4 != 0 {
        return Err(QueueError::BadRegister(offset));
    }
    Ok((index as u16, reg))
}

impl<S: Side, N: Notifier> Manager<S, N> {
    /// Apply a decoded command to one queue.
    pub fn apply(&mut self, queue_index: u16, cmd: Command) -> Result<()> {
        log::trace!("{} queue {queue_index}: {cmd:?}", S::NAME);
        match cmd {
            Command::SetVfId(vf) => self.configure(queue_index, "VF id", |q| {
                q.vf_id = vf;
                Ok(())
            }),
            Command::SetSize(log2) => {
                self.configure(queue_index, "size", |q| q.set_size_log2(log2))
            }
            Command::SetLinkedIndex(idx) => self.configure(queue_index, "linked index", |q| {
                q.linked_index = idx;
                Ok(())
            }),
            Command::SetProducerPtr(ptr) => self.set_producer_ptr(queue_index, ptr),
            Command::SetConsumerPtr(ptr) => self.set_consumer_ptr(queue_index, ptr),
            Command::SetConsumerPtrArm(ptr) => {
                self.set_consumer_ptr(queue_index, ptr)?;
                self.set_arm(queue_index, true)
            }
            Command::SetEnable(en) => self.set_enable(queue_index, en),
            Command::SetArm(arm) => self.set_arm(queue_index, arm),
        }
    }

    /// Run a configuration change if the queue is disabled, otherwise drop it.
    fn configure(
        &mut self,
        queue_index: u16,
        what: &str,
        f: impl FnOnce(&mut QueueState) -> Result<()>,
    ) -> Result<()> {
        let q = self.queues.get_mut(queue_index)?;
        if q.enabled {
            log::warn!(
                "{} queue {queue_index}: ignoring {what} change while enabled",
                S::NAME
            );
            return Ok(());
        }
        f(q)
    }

    /// Handle a 32-bit write at `offset` in the register space.
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn write_reg(&mut self, offset: u64, value: u32) -> Result<()> {
        let (queue_index, reg) = decode_offset(offset, self.config.queue_count())?;
        match reg {
            BASE_ADDR_LO_REG => self.configure(queue_index, "base address", |q| {
                q.set_base_address((q.base_address & !0xFFFF_FFFF) | u64::from(value));
                Ok(())
            }),
            BASE_ADDR_HI_REG => self.configure(queue_index, "base address", |q| {
                q.set_base_address((q.base_address & 0xFFFF_FFFF) | (u64::from(value) << 32));
                Ok(())
            }),
            CTRL_STATUS_REG => {
                let cmd = Command::try_from(value).inspect_err(|e| {
                    log::warn!("{} queue {queue_index}: {e}", S::NAME);
                })?;
                self.apply(queue_index, cmd)
            }
            SIZE_LINK_REG | PTR_REG => {
                log::warn!(
                    "{} queue {queue_index}: write of {value:#010x} to read-only register {reg:#x}",
                    S::NAME
                );
                Ok(())
            }
            _ => Err(QueueError::BadRegister(offset)),
        }
    }

    /// Handle a 32-bit read at `offset` in the register space.
    pub fn read_reg(&self, offset: u64) -> Result<u32> {
        let (queue_index, reg) = decode_offset(offset, self.config.queue_count())?;
        let block = self.read_block(queue_index)?;
        let words: &[u32; 5] = bytemuck::cast_ref(&block);
        Ok(words[(reg / 4) as usize])
    }

    /// Snapshot the whole register block of one queue.
    pub fn read_block(&self, queue_index: u16) -> Result<QueueRegs> {
        let q = self.queues.get(queue_index)?;

        let mut flags = QueueFlags::empty();
        flags.set(QueueFlags::ENABLE, q.enabled);
        flags.set(QueueFlags::ARMED, q.armed);
        flags.set(QueueFlags::ACTIVE, q.pending_ptr != S::committed(q));

        Ok(QueueRegs {
            base_addr_lo: q.base_address as u32,
            base_addr_hi: (q.base_address >> 32) as u32,
            ctrl_status: flags.bits()
                | u32::from(q.size_log2) << 8
                | u32::from(q.linked_index) << 16,
            size_link: u32::from(q.linked_index) | u32::from(q.size_log2) << 24,
            ptrs: u32::from(q.producer_ptr) | u32::from(q.consumer_ptr) << 16,
        })
    }
}
