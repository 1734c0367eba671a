// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use super::alu::Width;
use super::status::{Status, MODE_NAMES};
use super::{CpuEvent, StepKind, StepReport};
use crate::bus::SystemBus;
use crate::chip::ChipCore;
use crate::config::CpuConfig;
use crate::decoder::msp430::{decode, Operand, CG, PC, SP, SR};
use crate::interrupt::InterruptController;
use crate::logging::WarningKind;
use crate::snapshot::CpuSnapshot;
use crate::{AccessMode, SimResult};

pub const INTERRUPT_CYCLES: u32 = 6;

/// Where an operand lives once its addressing mode has been resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Location {
    Register(u8),
    Memory(u32),
    Value(u32),
}

/// Scratch state of the instruction being executed.
#[derive(Debug)]
pub(super) struct Exec {
    pub pc: u32,
    pub opcode: u16,
    pub event: Option<CpuEvent>,
}

pub(super) fn sign_extend(value: u32, bits: u32) -> u32 {
    let shift = 32 - bits;
    (((value << shift) as i32) >> shift) as u32
}

/// MSP430 / MSP430X CPU core.
#[derive(Debug)]
pub struct Msp430 {
    pub(super) regs: [u32; 16],
    pub(super) config: CpuConfig,
    pub(super) chip: ChipCore,
    instructions: u64,
}

impl Msp430 {
    pub fn new(config: CpuConfig, chip: ChipCore) -> Self {
        Self {
            regs: [0; 16],
            config,
            chip: chip.with_modes(&MODE_NAMES),
            instructions: 0,
        }
    }

    pub fn chip(&self) -> &ChipCore {
        &self.chip
    }

    pub fn config(&self) -> &CpuConfig {
        &self.config
    }

    pub fn is_extended(&self) -> bool {
        self.config.extended
    }

    pub fn pc(&self) -> u32 {
        self.regs[PC as usize]
    }

    pub fn set_pc(&mut self, pc: u32) {
        self.regs[PC as usize] = pc & self.config.address_mask() & !1;
    }

    pub fn sp(&self) -> u32 {
        self.regs[SP as usize]
    }

    pub fn sr(&self) -> Status {
        Status::from_bits_retain(self.regs[SR as usize] as u16)
    }

    pub fn set_sr(&mut self, sr: Status) {
        self.regs[SR as usize] = sr.bits() as u32;
    }

    /// Instructions executed since construction.
    pub fn instructions(&self) -> u64 {
        self.instructions
    }

    pub fn register(&self, id: u8) -> u32 {
        self.regs.get(id as usize).copied().unwrap_or(0)
    }

    /// Debugger register write. R3 always reads as zero.
    pub fn set_register(&mut self, id: u8, value: u32) {
        let mask = self.config.address_mask();
        match id {
            PC => self.set_pc(value),
            SP => self.regs[SP as usize] = value & mask & !1,
            SR => self.regs[SR as usize] = value & 0xFFFF,
            CG => {}
            r if (r as usize) < self.regs.len() => self.regs[r as usize] = value & mask,
            _ => {}
        }
    }

    pub fn register_names(&self) -> Vec<String> {
        let mut names = vec!["PC".to_string(), "SP".to_string(), "SR".to_string()];
        names.extend((3..16).map(|i| format!("R{}", i)));
        names
    }

    pub fn snapshot(&self, cycles: u64) -> CpuSnapshot {
        CpuSnapshot {
            registers: self.regs.to_vec(),
            cycles,
            mode: self.chip.mode_name().unwrap_or("active").to_string(),
        }
    }

    /// Clears the register file and loads PC from the reset vector.
    pub fn reset(&mut self, bus: &mut SystemBus) -> SimResult<()> {
        self.regs = [0; 16];
        let vector = bus.interrupts.reset_vector();
        let address = bus.interrupts.vector_address(vector);
        let entry = bus.read(address, AccessMode::Word)?;
        self.set_pc(entry);
        self.chip.set_mode(0);
        tracing::debug!("CPU reset, PC={:#07x}", self.pc());
        Ok(())
    }

    /// Executes one instruction, accepts one interrupt, or idles one cycle.
    ///
    /// On error the register file is restored to its state before the call,
    /// so a raised warning leaves the CPU exactly where it was.
    pub fn step(&mut self, bus: &mut SystemBus) -> SimResult<StepReport> {
        let saved = self.regs;
        match self.step_inner(bus) {
            Ok(report) => {
                bus.cycles += report.cycles as u64;
                if matches!(report.kind, StepKind::Executed { .. }) {
                    self.instructions += 1;
                }
                let mode = self.sr().operating_mode();
                self.chip.set_mode(mode);
                Ok(report)
            }
            Err(e) => {
                self.regs = saved;
                Err(e)
            }
        }
    }

    fn step_inner(&mut self, bus: &mut SystemBus) -> SimResult<StepReport> {
        let sr = self.sr();
        if let Some(vector) = bus.interrupts.acceptable_interrupt(sr.contains(Status::GIE)) {
            return self.enter_interrupt(bus, vector);
        }
        if sr.contains(Status::CPUOFF) {
            return Ok(StepReport {
                kind: StepKind::Idle,
                cycles: 1,
                event: None,
            });
        }

        let pc = self.pc();
        let opcode = self.fetch(bus)? as u16;
        let mut exec = Exec {
            pc,
            opcode,
            event: None,
        };
        let instruction = decode(opcode);
        tracing::trace!("PC={:#07x}, Op={:#06x}, Instr={:?}", pc, opcode, instruction);
        let cycles = self.execute(bus, instruction, &mut exec)?;

        Ok(StepReport {
            kind: StepKind::Executed { pc, opcode },
            cycles,
            event: exec.event,
        })
    }

    fn enter_interrupt(&mut self, bus: &mut SystemBus, vector: u8) -> SimResult<StepReport> {
        let mask = self.config.address_mask();
        let pc = self.pc();
        let sr = self.sr();
        let sp = self.sp();
        let sp_pc = sp.wrapping_sub(2) & mask;
        let sp_sr = sp.wrapping_sub(4) & mask;

        let status_word = if self.config.extended {
            // PC bits 19:16 travel in the top nibble of the stacked SR
            ((pc >> 16) & 0xF) << 12 | (sr.bits() as u32 & 0x0FFF)
        } else {
            sr.bits() as u32
        };
        let handler = bus.read(bus.interrupts.vector_address(vector), AccessMode::Word)?;
        bus.write_all(&[
            (sp_pc, pc & 0xFFFF, AccessMode::Word),
            (sp_sr, status_word, AccessMode::Word),
        ])?;

        self.regs[SP as usize] = sp_sr;
        self.set_sr(sr & Status::SCG0);
        self.set_pc(handler);
        bus.interrupts.acknowledge_interrupt(vector);
        bus.interrupt_serviced(vector)?;

        tracing::info!(
            "Interrupt {} accepted at PC={:#07x}, handler {:#06x}, cycle {}",
            vector,
            pc,
            handler,
            bus.cycles
        );

        Ok(StepReport {
            kind: StepKind::Interrupt { vector },
            cycles: INTERRUPT_CYCLES,
            event: Some(CpuEvent::InterruptEntry { vector, sp: sp_sr }),
        })
    }

    /// Reads the word at PC and advances PC past it.
    pub(super) fn fetch(&mut self, bus: &mut SystemBus) -> SimResult<u32> {
        let pc = self.pc();
        let word = bus.read(pc, AccessMode::Word)?;
        self.set_pc(pc.wrapping_add(2));
        Ok(word)
    }

    pub(super) fn warn_illegal(&self, exec: &Exec, what: &str) -> SimResult<()> {
        self.chip.logw(
            WarningKind::IllegalExecution,
            &format!("{} {:#06x} at {:#07x}", what, exec.opcode, exec.pc),
        )
    }

    /// Effective address of X(base). Extended forms carry a 20-bit index.
    pub(super) fn indexed_address(&self, base: u32, word: u32, high: Option<u32>) -> u32 {
        match high {
            Some(high) => {
                let index = sign_extend((high << 16) | (word & 0xFFFF), 20);
                base.wrapping_add(index) & 0xF_FFFF
            }
            None => {
                let sum = base.wrapping_add(sign_extend(word & 0xFFFF, 16));
                if base <= 0xFFFF {
                    sum & 0xFFFF
                } else {
                    sum & self.config.address_mask()
                }
            }
        }
    }

    /// Resolves an operand, fetching index/immediate words and applying
    /// auto-increment. `high` holds extension bits 19:16 for this operand.
    pub(super) fn resolve(
        &mut self,
        bus: &mut SystemBus,
        operand: Operand,
        width: Width,
        high: Option<u32>,
    ) -> SimResult<Location> {
        let mask = self.config.address_mask();
        Ok(match operand {
            Operand::Register(r) => Location::Register(r),
            Operand::Constant(c) => Location::Value(c as i32 as u32 & width.mask()),
            Operand::Indexed(r) => {
                let word = self.fetch(bus)?;
                Location::Memory(self.indexed_address(self.regs[r as usize], word, high))
            }
            Operand::Symbolic => {
                let base = self.pc();
                let word = self.fetch(bus)?;
                Location::Memory(self.indexed_address(base, word, high))
            }
            Operand::Absolute => {
                let word = self.fetch(bus)?;
                Location::Memory(high.map_or(word, |h| (h << 16) | word) & mask)
            }
            Operand::Indirect(r) => Location::Memory(self.regs[r as usize] & mask),
            Operand::IndirectIncrement(r) => {
                let address = self.regs[r as usize] & mask;
                let step = if r == SP || r == PC {
                    width.step().max(2)
                } else {
                    width.step()
                };
                self.regs[r as usize] = address.wrapping_add(step) & mask;
                Location::Memory(address)
            }
            Operand::Immediate => {
                let word = self.fetch(bus)?;
                Location::Value(high.map_or(word, |h| (h << 16) | word))
            }
        })
    }

    pub(super) fn read_location(
        &mut self,
        bus: &mut SystemBus,
        location: Location,
        width: Width,
    ) -> SimResult<u32> {
        match location {
            Location::Register(r) => Ok(self.regs[r as usize] & width.mask()),
            Location::Memory(address) => bus.read(address, width.access()),
            Location::Value(v) => Ok(v & width.mask()),
        }
    }

    pub(super) fn write_location(
        &mut self,
        bus: &mut SystemBus,
        location: Location,
        value: u32,
        width: Width,
    ) -> SimResult<()> {
        match location {
            Location::Register(r) => {
                self.write_register(r, value, width);
                Ok(())
            }
            Location::Memory(address) => match width {
                // Both halves are checked before either is written
                Width::Address => bus.write_all(&[(address, value, AccessMode::Word20)]),
                _ => bus.write(address, value & width.mask(), width.access()),
            },
            Location::Value(_) => Ok(()),
        }
    }

    /// Register write with width semantics: byte results clear bits 19:8,
    /// word results clear bits 19:16. Writes to R3 are discarded.
    pub(super) fn write_register(&mut self, r: u8, value: u32, width: Width) {
        let value = value & width.mask();
        match r {
            PC => self.set_pc(value),
            SP => self.regs[SP as usize] = value & self.config.address_mask() & !1,
            SR => self.regs[SR as usize] = value & 0xFFFF,
            CG => {}
            _ => self.regs[r as usize] = value & self.config.address_mask(),
        }
    }

    /// Pushes `value` and returns the new stack pointer. The caller commits SP.
    pub(super) fn push(
        &mut self,
        bus: &mut SystemBus,
        value: u32,
        width: Width,
    ) -> SimResult<u32> {
        let step = if width == Width::Address { 4 } else { 2 };
        let sp = self.sp().wrapping_sub(step) & self.config.address_mask();
        bus.write_all(&[(sp, value & width.mask(), width.access())])?;
        Ok(sp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_extend() {
        assert_eq!(sign_extend(0xFFFE, 16), 0xFFFF_FFFE);
        assert_eq!(sign_extend(0x7FFF, 16), 0x7FFF);
        assert_eq!(sign_extend(0x8_0000, 20), 0xFFF8_0000);
    }
}
