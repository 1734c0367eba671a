// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use msp430emu_core::cpu::alu::{add, sub, Width};
use msp430emu_core::cpu::Status;
use msp430emu_core::logging::WarningMode;
use msp430emu_core::system::build_machine_from_preset;
use msp430emu_core::system::msp430::descriptor;
use msp430emu_core::{AccessMode, Machine};
use proptest::prelude::*;

fn width_strategy() -> impl Strategy<Value = Width> {
    prop::sample::select(vec![Width::Byte, Width::Word, Width::Address])
}

fn as_signed(value: u32, w: Width) -> i64 {
    let v = (value & w.mask()) as i64;
    if value & w.msb() != 0 {
        v - (w.mask() as i64 + 1)
    } else {
        v
    }
}

const MPY_BASE: u32 = 0x130;

fn multiply(machine: &mut Machine, select: u32, a: u16, b: u16) -> (u32, u32) {
    let bus = &mut machine.bus;
    bus.write(MPY_BASE + select, a as u32, AccessMode::Word).unwrap();
    bus.write(MPY_BASE + 0x08, b as u32, AccessMode::Word).unwrap();
    let lo = bus.read(MPY_BASE + 0x0A, AccessMode::Word).unwrap();
    let hi = bus.read(MPY_BASE + 0x0C, AccessMode::Word).unwrap();
    let sumext = bus.read(MPY_BASE + 0x0E, AccessMode::Word).unwrap();
    (lo | (hi << 16), sumext)
}

proptest! {
    #[test]
    fn test_add_matches_wide_arithmetic(
        src in any::<u32>(),
        dst in any::<u32>(),
        carry in any::<bool>(),
        w in width_strategy(),
    ) {
        let out = add(src, dst, carry, w);
        let wide = (src & w.mask()) as u64 + (dst & w.mask()) as u64 + carry as u64;
        prop_assert_eq!(out.value, wide as u32 & w.mask());
        prop_assert_eq!(out.flags.contains(Status::C), wide > w.mask() as u64);
        prop_assert_eq!(out.flags.contains(Status::Z), out.value == 0);
        prop_assert_eq!(out.flags.contains(Status::N), out.value & w.msb() != 0);

        let signed = as_signed(src, w) + as_signed(dst, w) + carry as i64;
        let min = -(w.msb() as i64);
        let max = w.msb() as i64 - 1;
        prop_assert_eq!(out.flags.contains(Status::V), signed < min || signed > max);
    }

    #[test]
    fn test_sub_carry_means_no_borrow(
        src in any::<u32>(),
        dst in any::<u32>(),
        w in width_strategy(),
    ) {
        // SUB is dst - src with the carry in set
        let out = sub(src, dst, true, w);
        let (s, d) = (src & w.mask(), dst & w.mask());
        prop_assert_eq!(out.value, d.wrapping_sub(s) & w.mask());
        prop_assert_eq!(out.flags.contains(Status::C), d >= s);
        prop_assert_eq!(out.flags.contains(Status::Z), s == d);
        prop_assert_eq!(out.affected, Status::ARITHMETIC);
    }

    #[test]
    fn test_multiplier_modes(a in any::<u16>(), b in any::<u16>(), c in any::<u16>(), d in any::<u16>()) {
        let mut m = build_machine_from_preset("msp430f1611").unwrap();

        let (result, sumext) = multiply(&mut m, 0x00, a, b);
        prop_assert_eq!(result, a as u32 * b as u32);
        prop_assert_eq!(sumext, 0);

        let (result, sumext) = multiply(&mut m, 0x02, a, b);
        let product = a as i16 as i32 * b as i16 as i32;
        prop_assert_eq!(result, product as u32);
        prop_assert_eq!(sumext, if product < 0 { 0xFFFF } else { 0 });

        multiply(&mut m, 0x00, a, b);
        let (result, sumext) = multiply(&mut m, 0x04, c, d);
        let total = a as u64 * b as u64 + c as u64 * d as u64;
        prop_assert_eq!(result, total as u32);
        prop_assert_eq!(sumext, (total > 0xFFFF_FFFF) as u32);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_random_code_never_faults_in_silent_mode(
        words in prop::collection::vec(any::<u16>(), 16..64),
    ) {
        let mut chip = descriptor("msp430x").unwrap();
        chip.warnings.mode = Some(WarningMode::Silent);
        let mut m = Machine::from_config(&chip).unwrap();
        for (i, word) in words.iter().enumerate() {
            m.bus.memory.write_u16(0x2000 + 2 * i as u32, *word);
        }
        m.cpu.set_pc(0x2000);
        m.cpu.set_register(1, 0x4000);

        for _ in 0..200 {
            prop_assert!(m.step().is_ok());
        }
    }
}
