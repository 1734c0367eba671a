// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::interrupt::InterruptSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MachineSnapshot {
    pub cpu: CpuSnapshot,
    pub interrupts: InterruptSnapshot,
    pub peripherals: HashMap<String, serde_json::Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CpuSnapshot {
    /// R0..R15
    pub registers: Vec<u32>,
    pub cycles: u64,
    /// Operating mode name (`active`, `lpm0` .. `lpm4`).
    pub mode: String,
}

impl CpuSnapshot {
    pub fn pc(&self) -> u32 {
        self.registers.first().copied().unwrap_or(0)
    }

    pub fn sr(&self) -> u32 {
        self.registers.get(2).copied().unwrap_or(0)
    }
}
