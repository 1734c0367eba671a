// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

pub mod alu;
mod execute;
pub mod msp430;
pub mod status;

pub use msp430::Msp430;
pub use status::Status;

/// Control-flow events reported to the profiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuEvent {
    /// CALL or CALLA. `sp` is the stack pointer after the return address was pushed.
    Call { from: u32, target: u32, sp: u32 },
    /// RET or RETA
    Return,
    InterruptEntry { vector: u8, sp: u32 },
    InterruptReturn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Executed { pc: u32, opcode: u16 },
    Interrupt { vector: u8 },
    /// CPUOFF set and no interrupt accepted.
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepReport {
    pub kind: StepKind,
    pub cycles: u32,
    pub event: Option<CpuEvent>,
}
