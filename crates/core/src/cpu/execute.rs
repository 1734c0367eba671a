// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use super::alu::{self, Outcome, Width};
use super::msp430::{sign_extend, Exec, Msp430};
use super::status::Status;
use super::CpuEvent;
use crate::bus::SystemBus;
use crate::decoder::msp430::{
    decode, AddressAluOp, AddressInstruction, CallTarget, Condition, DoubleOp, ExtensionWord,
    Instruction, Operand, RotateOp, SingleOp, CG, PC, SP, SR,
};
use crate::interrupt::InterruptController;
use crate::{AccessMode, SimResult};

const JUMP_CYCLES: u32 = 2;
const RETI_CYCLES: u32 = 5;

fn double_cycles(src: Operand, dst: Operand) -> u32 {
    use Operand::*;
    let to_pc = dst == Register(PC);
    match (src, dst.is_register()) {
        (Register(_) | Constant(_), true) => {
            if to_pc {
                2
            } else {
                1
            }
        }
        (Register(_) | Constant(_), false) => 4,
        (Indirect(_), true) => 2,
        (IndirectIncrement(_) | Immediate, true) => {
            if to_pc {
                3
            } else {
                2
            }
        }
        (Indirect(_) | IndirectIncrement(_) | Immediate, false) => 5,
        (Indexed(_) | Symbolic | Absolute, true) => 3,
        (Indexed(_) | Symbolic | Absolute, false) => 6,
    }
}

fn single_cycles(op: SingleOp, operand: Operand) -> u32 {
    use Operand::*;
    match op {
        SingleOp::Push => match operand {
            Register(_) | Constant(_) => 3,
            Indirect(_) | IndirectIncrement(_) | Immediate => 4,
            Indexed(_) | Symbolic | Absolute => 5,
        },
        SingleOp::Call => match operand {
            Register(_) | Constant(_) | Indirect(_) => 4,
            IndirectIncrement(_) | Immediate => 5,
            Indexed(_) | Symbolic | Absolute => 5,
        },
        _ => match operand {
            Register(_) | Constant(_) => 1,
            Indirect(_) | IndirectIncrement(_) => 3,
            Indexed(_) | Symbolic | Absolute | Immediate => 4,
        },
    }
}

/// Operand width selected by the extension word's A/L bit and the
/// instruction's B/W bit. `None` for the reserved combination.
fn extended_width(al: bool, byte: bool) -> Option<Width> {
    match (al, byte) {
        (true, false) => Some(Width::Word),
        (false, true) => Some(Width::Address),
        (true, true) => Some(Width::Byte),
        (false, false) => None,
    }
}

fn width_of(byte: bool) -> Width {
    if byte {
        Width::Byte
    } else {
        Width::Word
    }
}

impl Msp430 {
    pub(super) fn execute(
        &mut self,
        bus: &mut SystemBus,
        instruction: Instruction,
        exec: &mut Exec,
    ) -> SimResult<u32> {
        if instruction.is_extended_only() && !self.config.extended {
            return self.illegal(exec, "MSP430X opcode on a non-extended core");
        }
        match instruction {
            Instruction::Double { op, src, dst, byte } => {
                self.exec_double(bus, op, src, dst, width_of(byte), None, exec)?;
                Ok(double_cycles(src, dst))
            }
            Instruction::Single { op, operand, byte } => {
                self.exec_single(bus, op, operand, width_of(byte), None, exec)?;
                Ok(single_cycles(op, operand))
            }
            Instruction::Reti => self.exec_reti(bus, exec),
            Instruction::Jump { condition, offset } => {
                if self.condition_holds(condition) {
                    let target = self.pc().wrapping_add((offset as i32 * 2) as u32);
                    self.set_pc(target);
                }
                Ok(JUMP_CYCLES)
            }
            Instruction::Extension(ext) => self.exec_extended(bus, ExtensionWord(ext), exec),
            Instruction::CallA(target) => self.exec_calla(bus, target, exec),
            Instruction::PushPopM {
                pop,
                address,
                count,
                reg,
            } => self.exec_pushpopm(bus, pop, address, count, reg),
            Instruction::Address(instr) => self.exec_address(bus, instr, exec),
            Instruction::Rotate {
                op,
                count,
                word,
                reg,
            } => {
                let width = if word { Width::Word } else { Width::Address };
                let mut value = self.regs[reg as usize];
                let mut sr = self.sr();
                for _ in 0..count {
                    let outcome = Self::rotate(op, value, sr.contains(Status::C), width);
                    value = outcome.value;
                    sr = outcome.apply(sr);
                }
                self.set_sr(sr);
                self.write_register(reg, value, width);
                Ok(count as u32)
            }
            Instruction::Illegal(_) => self.illegal(exec, "illegal opcode"),
        }
    }

    /// Warns and turns the instruction into a one-cycle no-op.
    fn illegal(&mut self, exec: &Exec, what: &str) -> SimResult<u32> {
        self.warn_illegal(exec, what)?;
        Ok(1)
    }

    fn rotate(op: RotateOp, value: u32, carry: bool, width: Width) -> Outcome {
        match op {
            RotateOp::Rrc => alu::rrc(value, carry, width),
            RotateOp::Rra => alu::rra(value, width),
            RotateOp::Rla => alu::rla(value, width),
            RotateOp::Rru => alu::rru(value, width),
        }
    }

    fn condition_holds(&self, condition: Condition) -> bool {
        let sr = self.sr();
        let (c, z, n, v) = (
            sr.contains(Status::C),
            sr.contains(Status::Z),
            sr.contains(Status::N),
            sr.contains(Status::V),
        );
        match condition {
            Condition::NotZero => !z,
            Condition::Zero => z,
            Condition::NoCarry => !c,
            Condition::Carry => c,
            Condition::Negative => n,
            Condition::GreaterEqual => n == v,
            Condition::Less => n != v,
            Condition::Always => true,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn exec_double(
        &mut self,
        bus: &mut SystemBus,
        op: DoubleOp,
        src: Operand,
        dst: Operand,
        width: Width,
        ext: Option<ExtensionWord>,
        exec: &mut Exec,
    ) -> SimResult<()> {
        let src_loc = self.resolve(bus, src, width, ext.map(|e| e.source_high()))?;
        let src_val = self.read_location(bus, src_loc, width)?;

        if dst == Operand::Indexed(CG) {
            // Index word is still part of the instruction
            self.fetch(bus)?;
            return self.warn_illegal(exec, "constant generator used as destination in");
        }
        let dst_loc = self.resolve(bus, dst, width, ext.map(|e| e.destination_high()))?;
        let dst_val = if op.ignores_destination() {
            0
        } else {
            self.read_location(bus, dst_loc, width)?
        };

        let sr = self.sr();
        let carry = sr.contains(Status::C);
        let outcome = match op {
            DoubleOp::Mov => alu::mov(src_val, width),
            DoubleOp::Add => alu::add(src_val, dst_val, false, width),
            DoubleOp::Addc => alu::add(src_val, dst_val, carry, width),
            DoubleOp::Subc => alu::sub(src_val, dst_val, carry, width),
            DoubleOp::Sub | DoubleOp::Cmp => alu::sub(src_val, dst_val, true, width),
            DoubleOp::Dadd => alu::dadd(src_val, dst_val, carry, width),
            DoubleOp::Bit | DoubleOp::And => alu::and(src_val, dst_val, width),
            DoubleOp::Bic => alu::bic(src_val, dst_val, width),
            DoubleOp::Bis => alu::bis(src_val, dst_val, width),
            DoubleOp::Xor => alu::xor(src_val, dst_val, width),
        };
        self.set_sr(outcome.apply(sr));

        if !op.is_compare() {
            self.write_location(bus, dst_loc, outcome.value, width)?;
        }
        if op == DoubleOp::Mov
            && src == Operand::IndirectIncrement(SP)
            && dst == Operand::Register(PC)
        {
            exec.event = Some(CpuEvent::Return);
        }
        Ok(())
    }

    fn exec_single(
        &mut self,
        bus: &mut SystemBus,
        op: SingleOp,
        operand: Operand,
        width: Width,
        ext: Option<ExtensionWord>,
        exec: &mut Exec,
    ) -> SimResult<()> {
        let location = self.resolve(bus, operand, width, ext.map(|e| e.source_high()))?;
        let value = self.read_location(bus, location, width)?;
        let sr = self.sr();

        let outcome = match op {
            SingleOp::Push => {
                let sp = self.push(bus, value, width)?;
                self.regs[SP as usize] = sp;
                return Ok(());
            }
            SingleOp::Call => {
                let target = value & 0xFFFF;
                let sp = self.push(bus, self.pc(), Width::Word)?;
                self.regs[SP as usize] = sp;
                self.set_pc(target);
                exec.event = Some(CpuEvent::Call {
                    from: exec.pc,
                    target,
                    sp,
                });
                return Ok(());
            }
            SingleOp::Rrc => alu::rrc(value, sr.contains(Status::C), width),
            SingleOp::Rra => alu::rra(value, width),
            SingleOp::Swpb => alu::swpb(value),
            SingleOp::Sxt => alu::sxt(value, width),
        };
        self.set_sr(outcome.apply(sr));
        self.write_location(bus, location, outcome.value, width)
    }

    fn exec_reti(&mut self, bus: &mut SystemBus, exec: &mut Exec) -> SimResult<u32> {
        let mask = self.config.address_mask();
        let sp = self.sp();
        let status_word = bus.read(sp, AccessMode::Word)?;
        let pc_low = bus.read(sp.wrapping_add(2) & mask, AccessMode::Word)?;

        let (sr, pc) = if self.config.extended {
            (status_word & 0x0FFF, ((status_word >> 12) << 16) | pc_low)
        } else {
            (status_word, pc_low)
        };
        self.regs[SP as usize] = sp.wrapping_add(4) & mask;
        self.regs[SR as usize] = sr;
        self.set_pc(pc);

        let finished = bus.interrupts.complete_interrupt();
        tracing::debug!("RETI from vector {:?} to {:#07x}", finished, self.pc());
        exec.event = Some(CpuEvent::InterruptReturn);
        Ok(RETI_CYCLES)
    }

    /// Runs the instruction that follows an extension word.
    fn exec_extended(
        &mut self,
        bus: &mut SystemBus,
        ext: ExtensionWord,
        exec: &mut Exec,
    ) -> SimResult<u32> {
        let opcode = self.fetch(bus)? as u16;
        exec.opcode = opcode;
        let (byte, register_mode) = match decode(opcode) {
            Instruction::Double { src, dst, byte, .. } => {
                (byte, src.is_register_or_constant() && dst.is_register())
            }
            Instruction::Single {
                op, operand, byte, ..
            } if op != SingleOp::Call => (
                byte,
                op != SingleOp::Push && operand.is_register_or_constant(),
            ),
            _ => return self.illegal(exec, "extension word before"),
        };
        let Some(width) = extended_width(ext.al(), byte) else {
            return self.illegal(exec, "reserved extension width for");
        };

        if !register_mode {
            return match decode(opcode) {
                Instruction::Double { op, src, dst, .. } => {
                    self.exec_double(bus, op, src, dst, width, Some(ext), exec)?;
                    Ok(double_cycles(src, dst) + 1)
                }
                Instruction::Single { op, operand, .. } => {
                    self.exec_single(bus, op, operand, width, Some(ext), exec)?;
                    Ok(single_cycles(op, operand) + 1)
                }
                _ => self.illegal(exec, "extension word before"),
            };
        }

        // Register mode: the low nibble is a repeat count
        let repeat = if ext.repeat_in_register() {
            (self.regs[ext.repeat_field() as usize] & 0xF) + 1
        } else {
            ext.repeat_field() as u32 + 1
        };
        let mut cycles = 1;
        for _ in 0..repeat {
            if ext.zero_carry() {
                let sr = self.sr() - Status::C;
                self.set_sr(sr);
            }
            match decode(opcode) {
                Instruction::Double { op, src, dst, .. } => {
                    self.exec_double(bus, op, src, dst, width, None, exec)?;
                    cycles += double_cycles(src, dst);
                }
                Instruction::Single { op, operand, .. } => {
                    self.exec_single(bus, op, operand, width, None, exec)?;
                    cycles += single_cycles(op, operand);
                }
                _ => return self.illegal(exec, "extension word before"),
            }
        }
        Ok(cycles)
    }

    fn read_address_word(&mut self, bus: &mut SystemBus, address: u32) -> SimResult<u32> {
        bus.read(address & 0xF_FFFF, AccessMode::Word20)
    }

    fn exec_calla(
        &mut self,
        bus: &mut SystemBus,
        target: CallTarget,
        exec: &mut Exec,
    ) -> SimResult<u32> {
        let (destination, cycles) = match target {
            CallTarget::Register(r) => (self.regs[r as usize], 5),
            CallTarget::Indexed(r) => {
                let word = self.fetch(bus)?;
                let address = self.regs[r as usize].wrapping_add(sign_extend(word, 16));
                (self.read_address_word(bus, address)?, 5)
            }
            CallTarget::Indirect(r) => {
                let address = self.regs[r as usize];
                (self.read_address_word(bus, address)?, 5)
            }
            CallTarget::IndirectIncrement(r) => {
                let address = self.regs[r as usize];
                let value = self.read_address_word(bus, address)?;
                self.regs[r as usize] = address.wrapping_add(4) & 0xF_FFFF;
                (value, 5)
            }
            CallTarget::Absolute { high } => {
                let word = self.fetch(bus)?;
                let address = (high as u32) << 16 | word;
                (self.read_address_word(bus, address)?, 6)
            }
            CallTarget::Symbolic { high } => {
                let base = self.pc();
                let word = self.fetch(bus)?;
                let address = self.indexed_address(base, word, Some(high as u32));
                (self.read_address_word(bus, address)?, 6)
            }
            CallTarget::Immediate { high } => {
                let word = self.fetch(bus)?;
                ((high as u32) << 16 | word, 5)
            }
        };

        let sp = self.push(bus, self.pc(), Width::Address)?;
        self.regs[SP as usize] = sp;
        let destination = destination & 0xF_FFFF;
        self.set_pc(destination);
        exec.event = Some(CpuEvent::Call {
            from: exec.pc,
            target: destination,
            sp,
        });
        Ok(cycles)
    }

    fn exec_pushpopm(
        &mut self,
        bus: &mut SystemBus,
        pop: bool,
        address: bool,
        count: u8,
        reg: u8,
    ) -> SimResult<u32> {
        let mask = self.config.address_mask();
        let (step, width) = if address {
            (4u32, Width::Address)
        } else {
            (2u32, Width::Word)
        };
        let sp = self.sp();

        if pop {
            let mut values = Vec::with_capacity(count as usize);
            for i in 0..count as u32 {
                let slot = sp.wrapping_add(step * i) & mask;
                values.push(bus.read(slot, width.access())?);
            }
            for (i, value) in values.into_iter().enumerate() {
                let r = (reg as usize + i) % 16;
                self.write_register(r as u8, value, width);
            }
            self.regs[SP as usize] = sp.wrapping_add(step * count as u32) & mask;
        } else {
            let writes: Vec<(u32, u32, AccessMode)> = (0..count as u32)
                .map(|i| {
                    let r = (reg as usize + 16 - i as usize) % 16;
                    let slot = sp.wrapping_sub(step * (i + 1)) & mask;
                    (slot, self.regs[r] & width.mask(), width.access())
                })
                .collect();
            bus.write_all(&writes)?;
            self.regs[SP as usize] = sp.wrapping_sub(step * count as u32) & mask;
        }
        Ok(2 + count as u32)
    }

    fn exec_address(
        &mut self,
        bus: &mut SystemBus,
        instr: AddressInstruction,
        exec: &mut Exec,
    ) -> SimResult<u32> {
        match instr {
            AddressInstruction::LoadIndirect { src, dst } => {
                let value = self.read_address_word(bus, self.regs[src as usize])?;
                self.write_register(dst, value, Width::Address);
                Ok(3)
            }
            AddressInstruction::LoadIncrement { src, dst } => {
                let address = self.regs[src as usize];
                let value = self.read_address_word(bus, address)?;
                self.regs[src as usize] = address.wrapping_add(4) & 0xF_FFFF;
                self.write_register(dst, value, Width::Address);
                if src == SP && dst == PC {
                    exec.event = Some(CpuEvent::Return);
                    Ok(4)
                } else {
                    Ok(3)
                }
            }
            AddressInstruction::LoadAbsolute { high, dst } => {
                let word = self.fetch(bus)?;
                let value = self.read_address_word(bus, (high as u32) << 16 | word)?;
                self.write_register(dst, value, Width::Address);
                Ok(4)
            }
            AddressInstruction::LoadIndexed { src, dst } => {
                let word = self.fetch(bus)?;
                let address =
                    self.regs[src as usize].wrapping_add(sign_extend(word, 16)) & 0xF_FFFF;
                let value = self.read_address_word(bus, address)?;
                self.write_register(dst, value, Width::Address);
                Ok(4)
            }
            AddressInstruction::StoreAbsolute { src, high } => {
                let word = self.fetch(bus)?;
                let address = (high as u32) << 16 | word;
                bus.write_all(&[(address, self.regs[src as usize], AccessMode::Word20)])?;
                Ok(4)
            }
            AddressInstruction::StoreIndexed { src, dst } => {
                let word = self.fetch(bus)?;
                let address =
                    self.regs[dst as usize].wrapping_add(sign_extend(word, 16)) & 0xF_FFFF;
                bus.write_all(&[(address, self.regs[src as usize], AccessMode::Word20)])?;
                Ok(4)
            }
            AddressInstruction::Immediate { op, high, dst } => {
                let word = self.fetch(bus)?;
                let value = (high as u32) << 16 | word;
                self.address_alu(op, value, dst);
                Ok(if op == AddressAluOp::Mov { 2 } else { 3 })
            }
            AddressInstruction::Register { op, src, dst } => {
                let value = self.regs[src as usize];
                self.address_alu(op, value, dst);
                Ok(1)
            }
        }
    }

    fn address_alu(&mut self, op: AddressAluOp, value: u32, dst: u8) {
        let current = self.regs[dst as usize];
        let sr = self.sr();
        let outcome = match op {
            AddressAluOp::Mov => {
                self.write_register(dst, value, Width::Address);
                return;
            }
            AddressAluOp::Cmp | AddressAluOp::Sub => alu::sub(value, current, true, Width::Address),
            AddressAluOp::Add => alu::add(value, current, false, Width::Address),
        };
        self.set_sr(outcome.apply(sr));
        if op != AddressAluOp::Cmp {
            self.write_register(dst, outcome.value, Width::Address);
        }
    }
}
