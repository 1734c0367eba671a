// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! MSP430 / MSP430X opcode decoder.
//!
//! Decoding looks at a single 16-bit word. Index words, immediates and the
//! instruction following an extension word are fetched by the CPU while it
//! resolves operands.

pub const PC: u8 = 0;
pub const SP: u8 = 1;
pub const SR: u8 = 2;
pub const CG: u8 = 3;

/// Addressing mode of one operand after constant-generator substitution.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Operand {
    Register(u8),
    /// X(Rn), index word follows
    Indexed(u8),
    /// ADDR, i.e. X(PC)
    Symbolic,
    /// &ADDR, i.e. X(SR)
    Absolute,
    Indirect(u8),
    IndirectIncrement(u8),
    /// #N, i.e. @PC+
    Immediate,
    /// Value produced by R2/R3 without a memory access.
    Constant(i8),
}

impl Operand {
    pub fn source(as_bits: u8, reg: u8) -> Operand {
        match (reg, as_bits & 3) {
            (CG, 0) => Operand::Constant(0),
            (CG, 1) => Operand::Constant(1),
            (CG, 2) => Operand::Constant(2),
            (CG, _) => Operand::Constant(-1),
            (SR, 2) => Operand::Constant(4),
            (SR, 3) => Operand::Constant(8),
            (SR, 1) => Operand::Absolute,
            (PC, 1) => Operand::Symbolic,
            (PC, 3) => Operand::Immediate,
            (r, 0) => Operand::Register(r),
            (r, 1) => Operand::Indexed(r),
            (r, 2) => Operand::Indirect(r),
            (r, _) => Operand::IndirectIncrement(r),
        }
    }

    pub fn destination(ad: u8, reg: u8) -> Operand {
        match (reg, ad & 1) {
            (r, 0) => Operand::Register(r),
            (PC, _) => Operand::Symbolic,
            (SR, _) => Operand::Absolute,
            (r, _) => Operand::Indexed(r),
        }
    }

    /// Operand needs an additional word from the instruction stream.
    pub fn has_word(self) -> bool {
        matches!(
            self,
            Operand::Indexed(_) | Operand::Symbolic | Operand::Absolute | Operand::Immediate
        )
    }

    pub fn is_register(self) -> bool {
        matches!(self, Operand::Register(_))
    }

    /// Register-like for extension word purposes: no memory access.
    pub fn is_register_or_constant(self) -> bool {
        matches!(self, Operand::Register(_) | Operand::Constant(_))
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum DoubleOp {
    Mov,
    Add,
    Addc,
    Subc,
    Sub,
    Cmp,
    Dadd,
    Bit,
    Bic,
    Bis,
    Xor,
    And,
}

impl DoubleOp {
    fn from_bits(bits: u16) -> Option<DoubleOp> {
        Some(match bits {
            0x4 => DoubleOp::Mov,
            0x5 => DoubleOp::Add,
            0x6 => DoubleOp::Addc,
            0x7 => DoubleOp::Subc,
            0x8 => DoubleOp::Sub,
            0x9 => DoubleOp::Cmp,
            0xA => DoubleOp::Dadd,
            0xB => DoubleOp::Bit,
            0xC => DoubleOp::Bic,
            0xD => DoubleOp::Bis,
            0xE => DoubleOp::Xor,
            0xF => DoubleOp::And,
            _ => return None,
        })
    }

    /// Destination is only read, never written.
    pub fn is_compare(self) -> bool {
        matches!(self, DoubleOp::Cmp | DoubleOp::Bit)
    }

    /// Destination value is not needed to compute the result.
    pub fn ignores_destination(self) -> bool {
        self == DoubleOp::Mov
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum SingleOp {
    Rrc,
    Swpb,
    Rra,
    Sxt,
    Push,
    Call,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Condition {
    NotZero,
    Zero,
    NoCarry,
    Carry,
    Negative,
    GreaterEqual,
    Less,
    Always,
}

impl Condition {
    fn from_bits(bits: u16) -> Condition {
        match bits & 7 {
            0 => Condition::NotZero,
            1 => Condition::Zero,
            2 => Condition::NoCarry,
            3 => Condition::Carry,
            4 => Condition::Negative,
            5 => Condition::GreaterEqual,
            6 => Condition::Less,
            _ => Condition::Always,
        }
    }
}

/// Shift performed by RRCM/RRAM/RLAM/RRUM.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum RotateOp {
    Rrc,
    Rra,
    Rla,
    Rru,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum AddressAluOp {
    Mov,
    Cmp,
    Add,
    Sub,
}

/// MSP430X address-word instructions in the 0x0000-0x0FFF block.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum AddressInstruction {
    /// MOVA @Rs,Rd
    LoadIndirect { src: u8, dst: u8 },
    /// MOVA @Rs+,Rd (RETA is MOVA @SP+,PC)
    LoadIncrement { src: u8, dst: u8 },
    /// MOVA &abs20,Rd
    LoadAbsolute { high: u8, dst: u8 },
    /// MOVA x(Rs),Rd
    LoadIndexed { src: u8, dst: u8 },
    /// MOVA Rs,&abs20
    StoreAbsolute { src: u8, high: u8 },
    /// MOVA Rs,x(Rd)
    StoreIndexed { src: u8, dst: u8 },
    /// MOVA/CMPA/ADDA/SUBA #imm20,Rd
    Immediate { op: AddressAluOp, high: u8, dst: u8 },
    /// MOVA/CMPA/ADDA/SUBA Rs,Rd
    Register { op: AddressAluOp, src: u8, dst: u8 },
}

/// Target of CALLA.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum CallTarget {
    Register(u8),
    Indexed(u8),
    Indirect(u8),
    IndirectIncrement(u8),
    Absolute { high: u8 },
    Symbolic { high: u8 },
    Immediate { high: u8 },
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Instruction {
    Double {
        op: DoubleOp,
        src: Operand,
        dst: Operand,
        byte: bool,
    },
    Single {
        op: SingleOp,
        operand: Operand,
        byte: bool,
    },
    Reti,
    Jump {
        condition: Condition,
        /// Signed word offset
        offset: i16,
    },
    /// MSP430X prefix applying to the following Format I/II instruction.
    Extension(u16),
    CallA(CallTarget),
    PushPopM {
        pop: bool,
        /// .A (20-bit) when set, .W otherwise
        address: bool,
        count: u8,
        reg: u8,
    },
    Address(AddressInstruction),
    Rotate {
        op: RotateOp,
        count: u8,
        /// .W when set, .A otherwise
        word: bool,
        reg: u8,
    },
    Illegal(u16),
}

impl Instruction {
    /// Belongs to the MSP430X extension of the instruction set.
    pub fn is_extended_only(&self) -> bool {
        matches!(
            self,
            Instruction::Extension(_)
                | Instruction::CallA(_)
                | Instruction::PushPopM { .. }
                | Instruction::Address(_)
                | Instruction::Rotate { .. }
        )
    }
}

pub fn decode(op: u16) -> Instruction {
    match op >> 12 {
        0x0 => decode_address(op),
        0x1 => decode_group1(op),
        0x2 | 0x3 => {
            let condition = Condition::from_bits(op >> 10);
            // Sign-extend the 10-bit offset
            let offset = ((op << 6) as i16) >> 6;
            Instruction::Jump { condition, offset }
        }
        bits => match DoubleOp::from_bits(bits) {
            Some(dop) => {
                let src_reg = ((op >> 8) & 0xF) as u8;
                let ad = ((op >> 7) & 1) as u8;
                let byte = op & 0x0040 != 0;
                let as_bits = ((op >> 4) & 3) as u8;
                let dst_reg = (op & 0xF) as u8;
                Instruction::Double {
                    op: dop,
                    src: Operand::source(as_bits, src_reg),
                    dst: Operand::destination(ad, dst_reg),
                    byte,
                }
            }
            None => Instruction::Illegal(op),
        },
    }
}

fn decode_group1(op: u16) -> Instruction {
    match op & 0xFC00 {
        0x1000 => decode_single(op),
        0x1400 => Instruction::PushPopM {
            pop: op & 0x0200 != 0,
            address: op & 0x0100 == 0,
            count: ((op >> 4) & 0xF) as u8 + 1,
            reg: (op & 0xF) as u8,
        },
        // 0x1800-0x1FFF
        _ => Instruction::Extension(op),
    }
}

fn decode_single(op: u16) -> Instruction {
    if op == 0x1300 {
        return Instruction::Reti;
    }
    if op >= 0x1340 {
        return decode_calla(op);
    }
    let byte = op & 0x0040 != 0;
    let as_bits = ((op >> 4) & 3) as u8;
    let reg = (op & 0xF) as u8;
    let sop = match (op >> 7) & 0x7 {
        0 => SingleOp::Rrc,
        1 if !byte => SingleOp::Swpb,
        2 => SingleOp::Rra,
        3 if !byte => SingleOp::Sxt,
        4 => SingleOp::Push,
        5 if !byte => SingleOp::Call,
        _ => return Instruction::Illegal(op),
    };
    Instruction::Single {
        op: sop,
        operand: Operand::source(as_bits, reg),
        byte,
    }
}

fn decode_calla(op: u16) -> Instruction {
    let low = (op & 0xF) as u8;
    let target = match (op >> 4) & 0xF {
        0x4 => CallTarget::Register(low),
        0x5 => CallTarget::Indexed(low),
        0x6 => CallTarget::Indirect(low),
        0x7 => CallTarget::IndirectIncrement(low),
        0x8 => CallTarget::Absolute { high: low },
        0x9 => CallTarget::Symbolic { high: low },
        0xB => CallTarget::Immediate { high: low },
        _ => return Instruction::Illegal(op),
    };
    Instruction::CallA(target)
}

fn decode_address(op: u16) -> Instruction {
    let src = ((op >> 8) & 0xF) as u8;
    let dst = (op & 0xF) as u8;
    let alu = |bits: u16| match bits & 3 {
        0 => AddressAluOp::Mov,
        1 => AddressAluOp::Cmp,
        2 => AddressAluOp::Add,
        _ => AddressAluOp::Sub,
    };
    let instr = match (op >> 4) & 0xF {
        0x0 => AddressInstruction::LoadIndirect { src, dst },
        0x1 => AddressInstruction::LoadIncrement { src, dst },
        0x2 => AddressInstruction::LoadAbsolute { high: src, dst },
        0x3 => AddressInstruction::LoadIndexed { src, dst },
        opc @ (0x4 | 0x5) => {
            let op_kind = match (op >> 8) & 3 {
                0 => RotateOp::Rrc,
                1 => RotateOp::Rra,
                2 => RotateOp::Rla,
                _ => RotateOp::Rru,
            };
            return Instruction::Rotate {
                op: op_kind,
                count: ((op >> 10) & 3) as u8 + 1,
                word: opc == 0x5,
                reg: dst,
            };
        }
        0x6 => AddressInstruction::StoreAbsolute { src, high: dst },
        0x7 => AddressInstruction::StoreIndexed { src, dst },
        opc @ 0x8..=0xB => AddressInstruction::Immediate {
            op: alu(opc),
            high: src,
            dst,
        },
        opc => AddressInstruction::Register {
            op: alu(opc),
            src,
            dst,
        },
    };
    Instruction::Address(instr)
}

/// Decoded fields of an MSP430X extension word.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct ExtensionWord(pub u16);

impl ExtensionWord {
    /// A/L bit
    pub fn al(self) -> bool {
        self.0 & 0x0040 != 0
    }

    /// Source bits 19:16 for memory-mode operands.
    pub fn source_high(self) -> u32 {
        ((self.0 >> 7) & 0xF) as u32
    }

    /// Destination bits 19:16 for memory-mode operands.
    pub fn destination_high(self) -> u32 {
        (self.0 & 0xF) as u32
    }

    /// ZC: the executed instruction sees a cleared carry.
    pub fn zero_carry(self) -> bool {
        self.0 & 0x0100 != 0
    }

    /// Repeat count comes from a register (`Rn & 0xF` + 1).
    pub fn repeat_in_register(self) -> bool {
        self.0 & 0x0080 != 0
    }

    /// Low nibble: repeat count minus one, or the repeat register.
    pub fn repeat_field(self) -> u8 {
        (self.0 & 0xF) as u8
    }
}
