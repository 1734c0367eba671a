// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

bitflags::bitflags! {
    /// Status register (R2) bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Status: u16 {
        const C = 0x0001;
        const Z = 0x0002;
        const N = 0x0004;
        const GIE = 0x0008;
        const CPUOFF = 0x0010;
        const OSCOFF = 0x0020;
        const SCG0 = 0x0040;
        const SCG1 = 0x0080;
        const V = 0x0100;

        const ARITHMETIC = Self::C.bits() | Self::Z.bits() | Self::N.bits() | Self::V.bits();
        const LOW_POWER = Self::CPUOFF.bits() | Self::OSCOFF.bits() | Self::SCG0.bits() | Self::SCG1.bits();
    }
}

pub const MODE_NAMES: [&str; 6] = ["active", "lpm0", "lpm1", "lpm2", "lpm3", "lpm4"];

impl Status {
    /// Operating mode index into [`MODE_NAMES`] implied by the low-power bits.
    pub fn operating_mode(self) -> usize {
        if !self.contains(Status::CPUOFF) {
            return 0;
        }
        let scg0 = self.contains(Status::SCG0);
        let scg1 = self.contains(Status::SCG1);
        let oscoff = self.contains(Status::OSCOFF);
        match (scg1, scg0, oscoff) {
            (true, true, true) => 5,
            (true, true, false) => 4,
            (true, false, _) => 3,
            (false, true, _) => 2,
            (false, false, _) => 1,
        }
    }
}
