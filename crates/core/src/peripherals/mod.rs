// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

pub mod dma;
pub mod gpio;
pub mod multiplier;
pub mod uart;

/// Byte lane of a word register addressed by `address`.
pub(crate) fn select_byte(word: u16, address: u32) -> u16 {
    if address & 1 != 0 {
        word >> 8
    } else {
        word & 0xFF
    }
}

/// Replaces the byte lane addressed by `address` inside `word`.
pub(crate) fn merge_byte(word: u16, address: u32, value: u16) -> u16 {
    let value = value & 0xFF;
    if address & 1 != 0 {
        (word & 0x00FF) | (value << 8)
    } else {
        (word & 0xFF00) | value
    }
}
