// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::{IoContext, UnitId};
use msp430emu_config::{CpuDescriptor, InterruptPriority};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Trait representing the vector-level interrupt state consumed by the CPU.
pub trait InterruptController: Debug + Send {
    /// Signal the controller that a request line has changed.
    fn set_interrupt_pending(&mut self, vector: u8, pending: bool, source: Option<UnitId>);

    fn is_pending(&self, vector: u8) -> bool;

    /// Highest-priority pending vector that may be accepted right now.
    fn acceptable_interrupt(&self, gie: bool) -> Option<u8>;

    /// Marks `vector` as in service, usually called by the CPU on interrupt entry.
    fn acknowledge_interrupt(&mut self, vector: u8);

    /// Leaves the innermost in-service vector, called on RETI.
    fn complete_interrupt(&mut self) -> Option<u8>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterruptSnapshot {
    pub pending: u64,
    pub in_service: Vec<u8>,
}

/// Pending bits per vector plus the stack of vectors in service.
#[derive(Debug, Clone)]
pub struct InterruptState {
    max_vector: u8,
    priority: InterruptPriority,
    non_maskable: u64,
    pending: u64,
    sources: Vec<Option<UnitId>>,
    in_service: Vec<u8>,
    raise_counts: Vec<u64>,
}

impl Default for InterruptState {
    fn default() -> Self {
        Self::new(15, InterruptPriority::HighVectorFirst)
    }
}

impl InterruptState {
    pub fn new(max_vector: u8, priority: InterruptPriority) -> Self {
        let max_vector = max_vector.min(63);
        let n = max_vector as usize + 1;
        Self {
            max_vector,
            priority,
            non_maskable: 0,
            pending: 0,
            sources: vec![None; n],
            in_service: Vec::new(),
            raise_counts: vec![0; n],
        }
    }

    pub fn from_descriptor(cpu: &CpuDescriptor) -> Self {
        let mut state = Self::new(cpu.max_interrupt_vector, cpu.interrupt_priority);
        for &v in &cpu.non_maskable {
            state.set_non_maskable(v);
        }
        state
    }

    pub fn max_vector(&self) -> u8 {
        self.max_vector
    }

    pub fn set_non_maskable(&mut self, vector: u8) {
        if vector <= self.max_vector {
            self.non_maskable |= 1 << vector;
        }
    }

    /// Address of the vector table entry for `vector`. The top vector sits at 0xFFFE.
    pub fn vector_address(&self, vector: u8) -> u32 {
        0x1_0000 - 2 * (self.max_vector as u32 + 1) + 2 * vector as u32
    }

    pub fn reset_vector(&self) -> u8 {
        self.max_vector
    }

    fn rank(&self, vector: u8) -> u8 {
        match self.priority {
            InterruptPriority::HighVectorFirst => vector,
            InterruptPriority::LowVectorFirst => self.max_vector - vector,
        }
    }

    pub fn source(&self, vector: u8) -> Option<UnitId> {
        self.sources.get(vector as usize).copied().flatten()
    }

    /// Number of inactive-to-active transitions seen on `vector`.
    pub fn raise_count(&self, vector: u8) -> u64 {
        self.raise_counts.get(vector as usize).copied().unwrap_or(0)
    }

    pub fn in_service(&self) -> &[u8] {
        &self.in_service
    }

    pub fn pending_mask(&self) -> u64 {
        self.pending
    }

    pub fn reset(&mut self) {
        self.pending = 0;
        self.in_service.clear();
        self.sources.iter_mut().for_each(|s| *s = None);
        self.raise_counts.iter_mut().for_each(|c| *c = 0);
    }

    pub fn snapshot(&self) -> InterruptSnapshot {
        InterruptSnapshot {
            pending: self.pending,
            in_service: self.in_service.clone(),
        }
    }
}

impl InterruptController for InterruptState {
    fn set_interrupt_pending(&mut self, vector: u8, pending: bool, source: Option<UnitId>) {
        if vector > self.max_vector {
            tracing::warn!("Interrupt vector {} out of range (max {})", vector, self.max_vector);
            return;
        }
        let bit = 1u64 << vector;
        if pending {
            if self.pending & bit == 0 {
                self.raise_counts[vector as usize] += 1;
            }
            self.pending |= bit;
            if source.is_some() {
                self.sources[vector as usize] = source;
            }
        } else {
            self.pending &= !bit;
        }
    }

    fn is_pending(&self, vector: u8) -> bool {
        vector <= self.max_vector && self.pending & (1 << vector) != 0
    }

    fn acceptable_interrupt(&self, gie: bool) -> Option<u8> {
        let mut best: Option<u8> = None;
        let mut bits = self.pending;
        while bits != 0 {
            let v = bits.trailing_zeros() as u8;
            bits &= bits - 1;
            if !gie && self.non_maskable & (1 << v) == 0 {
                continue;
            }
            if best.map_or(true, |b| self.rank(v) > self.rank(b)) {
                best = Some(v);
            }
        }
        let candidate = best?;
        match self.in_service.last() {
            Some(&top) if self.rank(candidate) <= self.rank(top) => None,
            _ => Some(candidate),
        }
    }

    fn acknowledge_interrupt(&mut self, vector: u8) {
        self.in_service.push(vector);
    }

    fn complete_interrupt(&mut self) -> Option<u8> {
        self.in_service.pop()
    }
}

/// Combines several request channels of one peripheral onto a single vector.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InterruptMultiplexer {
    vector: u8,
    state: u32,
}

impl InterruptMultiplexer {
    pub fn new(vector: u8) -> Self {
        Self { vector, state: 0 }
    }

    pub fn vector(&self) -> u8 {
        self.vector
    }

    pub fn is_active(&self) -> bool {
        self.state != 0
    }

    /// Lowest-numbered active channel.
    pub fn active_channel(&self) -> Option<u8> {
        (self.state != 0).then(|| self.state.trailing_zeros() as u8)
    }

    /// Records the request state of `channel` and returns the outward line.
    /// Edges of the outward line are forwarded to the vector table.
    pub fn update_interrupt(&mut self, active: bool, channel: u8, ctx: &mut IoContext) -> bool {
        let was_active = self.is_active();
        let Some(bit) = 1u32.checked_shl(channel as u32) else {
            tracing::warn!(
                "Multiplexer channel {} out of range for vector {}",
                channel,
                self.vector
            );
            return was_active;
        };
        if active {
            self.state |= bit;
        } else {
            self.state &= !bit;
        }
        let now_active = self.is_active();
        if was_active != now_active {
            ctx.flag_interrupt(self.vector, now_active);
        }
        now_active
    }

    pub fn reset(&mut self) {
        self.state = 0;
    }
}
