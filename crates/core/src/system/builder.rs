// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::system::msp430;
use crate::Machine;
use anyhow::Context;
use msp430emu_config::ChipDescriptor;
use std::path::Path;
use tracing::info;

/// Builds a machine from a chip descriptor file.
/// Without a path the default MSP430F1611 preset is used.
pub fn build_machine(chip_path: Option<&Path>) -> anyhow::Result<Machine> {
    let chip = if let Some(path) = chip_path {
        info!("Loading chip descriptor: {:?}", path);
        ChipDescriptor::from_file(path)?
    } else {
        info!("Using default hardware configuration");
        msp430::descriptor(msp430::DEFAULT_PRESET)?
    };
    Machine::from_config(&chip).with_context(|| format!("Failed to build chip '{}'", chip.name))
}

pub fn build_machine_from_preset(name: &str) -> anyhow::Result<Machine> {
    let chip = msp430::descriptor(name)?;
    Machine::from_config(&chip).with_context(|| format!("Failed to build preset '{}'", name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_machine() {
        let machine = build_machine(None).unwrap();
        assert!(!machine.cpu.is_extended());
        assert!(machine.bus.unit_id("dma").is_some());
    }

    #[test]
    fn test_machine_from_file() {
        let dir = std::env::temp_dir().join(format!("msp430emu-builder-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("chip.yaml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(
            f,
            "name: tiny\ncpu:\n  extended: true\nperipherals:\n  - id: mpy\n    type: multiplier\n    base_address: 0x130"
        )
        .unwrap();
        drop(f);

        let machine = build_machine(Some(&path)).unwrap();
        assert!(machine.cpu.is_extended());
        assert!(machine.bus.unit_id("mpy").is_some());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(build_machine(Some(Path::new("/nonexistent/chip.yaml"))).is_err());
        assert!(build_machine_from_preset("z80").is_err());
    }
}
