// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use super::status::Status;
use crate::AccessMode;

/// Operand width of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    Byte,
    Word,
    /// 20-bit `.A` operation
    Address,
}

impl Width {
    pub fn mask(self) -> u32 {
        match self {
            Width::Byte => 0xFF,
            Width::Word => 0xFFFF,
            Width::Address => 0xF_FFFF,
        }
    }

    pub fn msb(self) -> u32 {
        match self {
            Width::Byte => 0x80,
            Width::Word => 0x8000,
            Width::Address => 0x8_0000,
        }
    }

    pub fn access(self) -> AccessMode {
        match self {
            Width::Byte => AccessMode::Byte,
            Width::Word => AccessMode::Word,
            Width::Address => AccessMode::Word20,
        }
    }

    /// Register auto-increment step.
    pub fn step(self) -> u32 {
        self.access().bytes()
    }
}

/// Result of an ALU operation and the flags it defines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub value: u32,
    pub flags: Status,
    /// Flags the operation writes; the rest of SR is left alone.
    pub affected: Status,
}

impl Outcome {
    fn plain(value: u32) -> Self {
        Self {
            value,
            flags: Status::empty(),
            affected: Status::empty(),
        }
    }

    /// Applies the affected flags to `sr`.
    pub fn apply(&self, sr: Status) -> Status {
        (sr - self.affected) | (self.flags & self.affected)
    }
}

fn nz(value: u32, w: Width) -> Status {
    let mut flags = Status::empty();
    if value & w.mask() == 0 {
        flags |= Status::Z;
    }
    if value & w.msb() != 0 {
        flags |= Status::N;
    }
    flags
}

pub fn add(src: u32, dst: u32, carry: bool, w: Width) -> Outcome {
    let (src, dst) = (src & w.mask(), dst & w.mask());
    let sum = src as u64 + dst as u64 + carry as u64;
    let value = sum as u32 & w.mask();
    let mut flags = nz(value, w);
    if sum > w.mask() as u64 {
        flags |= Status::C;
    }
    if (src ^ value) & (dst ^ value) & w.msb() != 0 {
        flags |= Status::V;
    }
    Outcome {
        value,
        flags,
        affected: Status::ARITHMETIC,
    }
}

/// `dst - src - 1 + carry`; C set means no borrow.
pub fn sub(src: u32, dst: u32, carry: bool, w: Width) -> Outcome {
    add(!src & w.mask(), dst, carry, w)
}

/// Decimal add of packed BCD digits. V is not affected.
pub fn dadd(src: u32, dst: u32, carry: bool, w: Width) -> Outcome {
    let digits = match w {
        Width::Byte => 2,
        Width::Word => 4,
        Width::Address => 5,
    };
    let mut value = 0u32;
    let mut c = carry as u32;
    for i in 0..digits {
        let shift = 4 * i;
        let mut d = ((src >> shift) & 0xF) + ((dst >> shift) & 0xF) + c;
        c = 0;
        if d > 9 {
            d = (d - 10) & 0xF;
            c = 1;
        }
        value |= d << shift;
    }
    let mut flags = nz(value, w);
    if c != 0 {
        flags |= Status::C;
    }
    Outcome {
        value,
        flags,
        affected: Status::C | Status::Z | Status::N,
    }
}

/// AND and BIT.
pub fn and(src: u32, dst: u32, w: Width) -> Outcome {
    let value = src & dst & w.mask();
    let mut flags = nz(value, w);
    if value != 0 {
        flags |= Status::C;
    }
    Outcome {
        value,
        flags,
        affected: Status::ARITHMETIC,
    }
}

pub fn xor(src: u32, dst: u32, w: Width) -> Outcome {
    let value = (src ^ dst) & w.mask();
    let mut flags = nz(value, w);
    if value != 0 {
        flags |= Status::C;
    }
    if src & dst & w.msb() != 0 {
        flags |= Status::V;
    }
    Outcome {
        value,
        flags,
        affected: Status::ARITHMETIC,
    }
}

pub fn bic(src: u32, dst: u32, w: Width) -> Outcome {
    Outcome::plain(dst & !src & w.mask())
}

pub fn bis(src: u32, dst: u32, w: Width) -> Outcome {
    Outcome::plain((dst | src) & w.mask())
}

pub fn mov(src: u32, w: Width) -> Outcome {
    Outcome::plain(src & w.mask())
}

fn shifted(value: u32, carry_out: bool, w: Width) -> Outcome {
    let mut flags = nz(value, w);
    if carry_out {
        flags |= Status::C;
    }
    Outcome {
        value,
        flags,
        affected: Status::ARITHMETIC,
    }
}

pub fn rrc(value: u32, carry: bool, w: Width) -> Outcome {
    let value = value & w.mask();
    let result = (value >> 1) | if carry { w.msb() } else { 0 };
    shifted(result, value & 1 != 0, w)
}

pub fn rra(value: u32, w: Width) -> Outcome {
    let value = value & w.mask();
    let result = (value >> 1) | (value & w.msb());
    shifted(result, value & 1 != 0, w)
}

/// Logical shift right, MSB cleared.
pub fn rru(value: u32, w: Width) -> Outcome {
    rrc(value, false, w)
}

pub fn rla(value: u32, w: Width) -> Outcome {
    let value = value & w.mask();
    let result = (value << 1) & w.mask();
    shifted(result, value & w.msb() != 0, w)
}

/// Swaps the low two bytes; bits 19:16 of a 20-bit value are kept.
pub fn swpb(value: u32) -> Outcome {
    let low = value & 0xFFFF;
    Outcome::plain((value & 0xF_0000) | ((low & 0xFF) << 8) | (low >> 8))
}

pub fn sxt(value: u32, w: Width) -> Outcome {
    let extended = if value & 0x80 != 0 {
        (value | !0xFF) & w.mask()
    } else {
        value & 0xFF
    };
    let mut flags = nz(extended, w);
    if extended != 0 {
        flags |= Status::C;
    }
    Outcome {
        value: extended,
        flags,
        affected: Status::ARITHMETIC,
    }
}
