// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::chip::ChipCore;
use crate::logging::WarningKind;
use crate::{AccessMode, IoContext, IoUnit, SimResult};
use std::any::Any;

pub const MPY: u32 = 0x00;
pub const MPYS: u32 = 0x02;
pub const MAC: u32 = 0x04;
pub const MACS: u32 = 0x06;
pub const OP2: u32 = 0x08;
pub const RESLO: u32 = 0x0A;
pub const RESHI: u32 = 0x0C;
pub const SUMEXT: u32 = 0x0E;

/// 16x16 hardware multiplier with accumulate.
#[derive(Debug, serde::Serialize)]
pub struct Multiplier {
    #[serde(skip)]
    chip: ChipCore,
    base: u32,
    op1: u16,
    op2: u16,
    /// Operation select register last written.
    select: u32,
    op1_byte: bool,
    reslo: u16,
    reshi: u16,
    sumext: u16,
}

impl Multiplier {
    pub fn new(chip: ChipCore, base: u32) -> Self {
        Self {
            chip,
            base,
            op1: 0,
            op2: 0,
            select: MPY,
            op1_byte: false,
            reslo: 0,
            reshi: 0,
            sumext: 0,
        }
    }

    pub fn result(&self) -> u32 {
        ((self.reshi as u32) << 16) | self.reslo as u32
    }

    pub fn sumext(&self) -> u16 {
        self.sumext
    }

    fn signed(&self) -> bool {
        matches!(self.select, MPYS | MACS)
    }

    fn accumulating(&self) -> bool {
        matches!(self.select, MAC | MACS)
    }

    fn operand(value: u16, byte: bool, signed: bool) -> i64 {
        match (signed, byte) {
            (true, true) => value as u8 as i8 as i64,
            (true, false) => value as i16 as i64,
            (false, true) => (value & 0xFF) as i64,
            (false, false) => value as i64,
        }
    }

    fn compute(&mut self, op2_byte: bool) {
        let signed = self.signed();
        let a = Self::operand(self.op1, self.op1_byte, signed);
        let b = Self::operand(self.op2, op2_byte, signed);
        let product = a * b;

        let sum = if self.accumulating() {
            let previous = if signed {
                self.result() as i32 as i64
            } else {
                self.result() as i64
            };
            product + previous
        } else {
            product
        };

        let truncated = sum as u32;
        self.reslo = truncated as u16;
        self.reshi = (truncated >> 16) as u16;
        self.sumext = if signed {
            if (truncated as i32) < 0 {
                0xFFFF
            } else {
                0
            }
        } else if self.accumulating() {
            (sum > 0xFFFF_FFFF) as u16
        } else {
            0
        };

        tracing::trace!(
            "{}: {} x {} = {:#010x} (sumext {:#x})",
            self.chip.id(),
            a,
            b,
            truncated,
            self.sumext
        );
    }

    fn register(&self, offset: u32) -> Option<u16> {
        Some(match offset {
            MPY | MPYS | MAC | MACS => self.op1,
            OP2 => self.op2,
            RESLO => self.reslo,
            RESHI => self.reshi,
            SUMEXT => self.sumext,
            _ => return None,
        })
    }
}

impl IoUnit for Multiplier {
    fn chip(&self) -> &ChipCore {
        &self.chip
    }

    fn chip_mut(&mut self) -> &mut ChipCore {
        &mut self.chip
    }

    fn read(&mut self, address: u32, mode: AccessMode, _ctx: &mut IoContext) -> SimResult<u16> {
        let offset = address.wrapping_sub(self.base);
        match self.register(offset) {
            Some(v) if mode == AccessMode::Byte => Ok(v & 0xFF),
            Some(v) => Ok(v),
            None => {
                self.chip.logw(
                    WarningKind::VoidIoRead,
                    &format!("read from undefined register {:#06x}", address),
                )?;
                Ok(0)
            }
        }
    }

    fn write(
        &mut self,
        address: u32,
        value: u16,
        mode: AccessMode,
        _ctx: &mut IoContext,
    ) -> SimResult<()> {
        let byte = mode == AccessMode::Byte;
        let value = if byte { value & 0xFF } else { value };
        match address.wrapping_sub(self.base) {
            sel @ (MPY | MPYS | MAC | MACS) => {
                self.op1 = value;
                self.op1_byte = byte;
                self.select = sel;
            }
            OP2 => {
                self.op2 = value;
                self.compute(byte);
            }
            RESLO => self.reslo = value,
            RESHI => self.reshi = value,
            SUMEXT => {
                self.chip.logw(
                    WarningKind::IllegalIoWrite,
                    &format!("write of {:#x} to read-only SUMEXT", value),
                )?;
            }
            _ => {
                self.chip.logw(
                    WarningKind::VoidIoWrite,
                    &format!("write of {:#x} to undefined register {:#06x}", value, address),
                )?;
            }
        }
        Ok(())
    }

    fn peek(&self, address: u32) -> Option<u16> {
        self.register(address.wrapping_sub(self.base))
    }

    fn reset(&mut self) {
        self.op1 = 0;
        self.op2 = 0;
        self.select = MPY;
        self.op1_byte = false;
        self.reslo = 0;
        self.reshi = 0;
        self.sumext = 0;
    }

    fn as_any(&self) -> Option<&dyn Any> {
        Some(self)
    }

    fn as_any_mut(&mut self) -> Option<&mut dyn Any> {
        Some(self)
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{EmulationLogger, WarningMode};
    use crate::UnitId;

    fn mpy(mode: WarningMode) -> (Multiplier, IoContext) {
        (
            Multiplier::new(ChipCore::new("mpy", EmulationLogger::shared(mode)), 0x130),
            IoContext::new(UnitId(0), 0),
        )
    }

    fn w(m: &mut Multiplier, ctx: &mut IoContext, reg: u32, value: u16) {
        m.write(0x130 + reg, value, AccessMode::Word, ctx).unwrap();
    }

    fn r(m: &mut Multiplier, ctx: &mut IoContext, reg: u32) -> u16 {
        m.read(0x130 + reg, AccessMode::Word, ctx).unwrap()
    }

    #[test]
    fn test_signed_multiply_negative() {
        let (mut m, mut ctx) = mpy(WarningMode::Raise);
        w(&mut m, &mut ctx, MPYS, (-3i16) as u16);
        w(&mut m, &mut ctx, OP2, 7);
        assert_eq!(r(&mut m, &mut ctx, RESLO), 0xFFEB);
        assert_eq!(r(&mut m, &mut ctx, RESHI), 0xFFFF);
        assert_eq!(r(&mut m, &mut ctx, SUMEXT), 0xFFFF);
    }

    #[test]
    fn test_unsigned_multiply() {
        let (mut m, mut ctx) = mpy(WarningMode::Raise);
        w(&mut m, &mut ctx, MPY, 0xFFFF);
        w(&mut m, &mut ctx, OP2, 2);
        assert_eq!(m.result(), 0x1_FFFE);
        assert_eq!(r(&mut m, &mut ctx, SUMEXT), 0);
    }

    #[test]
    fn test_unsigned_accumulate_carry() {
        let (mut m, mut ctx) = mpy(WarningMode::Raise);
        // Seed the accumulator through the result registers.
        w(&mut m, &mut ctx, RESLO, 0xFFFF);
        w(&mut m, &mut ctx, RESHI, 0xFFFF);
        assert_eq!(m.result(), 0xFFFF_FFFF);

        w(&mut m, &mut ctx, MAC, 0xFFFF);
        w(&mut m, &mut ctx, OP2, 2);
        // 0x1FFFE + 0xFFFFFFFF = 0x1_0001_FFFD
        assert_eq!(m.result(), 0x0001_FFFD);
        assert_eq!(m.sumext(), 1);

        w(&mut m, &mut ctx, MAC, 1);
        w(&mut m, &mut ctx, OP2, 1);
        assert_eq!(m.result(), 0x0001_FFFE);
        assert_eq!(m.sumext(), 0);
    }

    #[test]
    fn test_signed_accumulate() {
        let (mut m, mut ctx) = mpy(WarningMode::Raise);
        w(&mut m, &mut ctx, MPYS, 10);
        w(&mut m, &mut ctx, OP2, 10);
        w(&mut m, &mut ctx, MACS, (-5i16) as u16);
        w(&mut m, &mut ctx, OP2, 30);
        // 100 - 150 = -50
        assert_eq!(m.result() as i32, -50);
        assert_eq!(m.sumext(), 0xFFFF);
    }

    #[test]
    fn test_select_holds_across_operand_writes_until_reset() {
        let (mut m, mut ctx) = mpy(WarningMode::Raise);
        w(&mut m, &mut ctx, MACS, (-1i16) as u16);
        w(&mut m, &mut ctx, OP2, 5);
        w(&mut m, &mut ctx, OP2, 5);
        assert_eq!(m.result() as i32, -10);
        assert_eq!(m.snapshot()["select"], MACS);

        m.reset();
        assert_eq!(m.snapshot()["select"], MPY);
        w(&mut m, &mut ctx, RESLO, 0xFFFF);
        w(&mut m, &mut ctx, RESHI, 0xFFFF);
        w(&mut m, &mut ctx, OP2, 5);
        // Plain unsigned multiply of the cleared operand
        assert_eq!(m.result(), 0);
        assert_eq!(m.sumext(), 0);
    }

    #[test]
    fn test_byte_operands_sign_extend_from_8_bits() {
        let (mut m, mut ctx) = mpy(WarningMode::Raise);
        m.write(0x130 + MPYS, 0xFE, AccessMode::Byte, &mut ctx).unwrap(); // -2
        m.write(0x130 + OP2, 0x03, AccessMode::Byte, &mut ctx).unwrap();
        assert_eq!(m.result() as i32, -6);

        m.write(0x130 + MPY, 0xFE, AccessMode::Byte, &mut ctx).unwrap(); // 254
        m.write(0x130 + OP2, 0x03, AccessMode::Byte, &mut ctx).unwrap();
        assert_eq!(m.result(), 762);
    }

    #[test]
    fn test_result_write_does_not_recompute() {
        let (mut m, mut ctx) = mpy(WarningMode::Raise);
        w(&mut m, &mut ctx, MPY, 3);
        w(&mut m, &mut ctx, OP2, 4);
        w(&mut m, &mut ctx, RESLO, 99);
        assert_eq!(m.result(), 99);
        // Reads never perturb state
        for _ in 0..3 {
            assert_eq!(r(&mut m, &mut ctx, RESLO), 99);
            assert_eq!(r(&mut m, &mut ctx, MPY), 3);
        }
    }

    #[test]
    fn test_sumext_is_read_only() {
        let (mut m, mut ctx) = mpy(WarningMode::Raise);
        let err = m
            .write(0x130 + SUMEXT, 1, AccessMode::Word, &mut ctx)
            .unwrap_err();
        assert_eq!(err.warning_kind(), Some(WarningKind::IllegalIoWrite));

        let (mut quiet, mut ctx) = mpy(WarningMode::Silent);
        quiet
            .write(0x130 + SUMEXT, 1, AccessMode::Word, &mut ctx)
            .unwrap();
        assert_eq!(quiet.sumext(), 0);
    }
}
