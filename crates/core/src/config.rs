// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use msp430emu_config::ChipDescriptor;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuConfig {
    /// Accept MSP430X extension words and address instructions.
    pub extended: bool,
}

impl CpuConfig {
    /// Mask applied to the program counter and to computed addresses.
    pub fn address_mask(&self) -> u32 {
        if self.extended {
            0xF_FFFF
        } else {
            0xFFFF
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub cpu: CpuConfig,
    /// Interval in instructions for ticking peripherals (1 = every instruction).
    pub peripheral_tick_interval: u32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            cpu: CpuConfig::default(),
            peripheral_tick_interval: 1,
        }
    }
}

impl SimulationConfig {
    pub fn from_descriptor(chip: &ChipDescriptor) -> Self {
        Self {
            cpu: CpuConfig {
                extended: chip.cpu.extended,
            },
            ..Self::default()
        }
    }
}
