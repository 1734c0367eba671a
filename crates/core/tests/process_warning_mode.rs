// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

// The process-wide mode is set once, so this file holds a single test.

use msp430emu_core::logging::{default_warning_mode, init_warning_mode, WarningKind, WarningMode};
use msp430emu_core::system::build_machine_from_preset;
use msp430emu_core::system::msp430::descriptor;
use msp430emu_core::{AccessMode, Machine};

#[test]
fn test_startup_mode_applies_to_descriptors_without_one() {
    assert!(init_warning_mode(WarningMode::Raise));
    assert!(!init_warning_mode(WarningMode::Silent));
    assert_eq!(default_warning_mode(), WarningMode::Raise);

    let mut machine = build_machine_from_preset("msp430f1611").unwrap();
    assert_eq!(machine.bus.warning_mode(), WarningMode::Raise);
    let err = machine.bus.read(0x1_0000, AccessMode::Word).unwrap_err();
    assert_eq!(err.warning_kind(), Some(WarningKind::AddressOutOfBoundsRead));

    // A mode in the descriptor still wins
    let mut chip = descriptor("msp430f1611").unwrap();
    chip.warnings.mode = Some(WarningMode::Silent);
    let mut machine = Machine::from_config(&chip).unwrap();
    assert_eq!(machine.bus.read(0x1_0000, AccessMode::Word).unwrap(), 0);
}
