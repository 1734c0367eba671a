// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Built-in chip descriptors.

use msp430emu_config::ChipDescriptor;

pub const DEFAULT_PRESET: &str = "msp430f1611";

/// Classic 16-bit core with the 1xx peripheral map.
const MSP430F1611: &str = r#"
name: "msp430f1611"
cpu:
  extended: false
  max_interrupt_vector: 15
  non_maskable: [14]
memory:
  size: "64KiB"
  io:
    base: 0x0
    size: "512B"
  flash:
    - base: 0x4000
      size: "48KiB"
peripherals:
  - id: "port3"
    type: "gpio"
    base_address: 0x18
  - id: "port4"
    type: "gpio"
    base_address: 0x1C
  - id: "port1"
    type: "gpio"
    base_address: 0x20
    vector: 4
    config:
      interrupt_capable: true
  - id: "port2"
    type: "gpio"
    base_address: 0x28
    vector: 1
    config:
      interrupt_capable: true
  - id: "port5"
    type: "gpio"
    base_address: 0x30
  - id: "port6"
    type: "gpio"
    base_address: 0x34
  - id: "dma"
    type: "dma"
    base_address: 0x122
    vector: 0
    config:
      channel_base: 0x1E0
  - id: "mpy"
    type: "multiplier"
    base_address: 0x130
"#;

/// 20-bit core with a USCI_A transceiver wired to the DMA controller.
const MSP430X: &str = r#"
name: "msp430x"
cpu:
  extended: true
  max_interrupt_vector: 63
  non_maskable: [62, 61]
memory:
  size: "1MiB"
  io:
    base: 0x0
    size: "4KiB"
  flash:
    - base: 0x5C00
      size: "41KiB"
    - base: 0x10000
      size: "192KiB"
peripherals:
  - id: "port1"
    type: "gpio"
    base_address: 0x200
    vector: 47
    config:
      interrupt_capable: true
  - id: "port2"
    type: "gpio"
    base_address: 0x210
    vector: 42
    config:
      interrupt_capable: true
  - id: "mpy"
    type: "multiplier"
    base_address: 0x4C0
  - id: "dma"
    type: "dma"
    base_address: 0x500
    vector: 50
    config:
      channel_base: 0x510
  - id: "uart0"
    type: "usart"
    base_address: 0x5C0
    vector: 57
    config:
      tx_cycles: 10
dma_triggers:
  - select: 3
    source: "uart0"
    index: 0
  - select: 4
    source: "uart0"
    index: 1
"#;

pub fn preset_names() -> &'static [&'static str] {
    &["msp430f1611", "msp430x"]
}

/// Parses the built-in descriptor called `name`.
pub fn descriptor(name: &str) -> anyhow::Result<ChipDescriptor> {
    let yaml = match name.to_ascii_lowercase().as_str() {
        "msp430f1611" | "msp430" => MSP430F1611,
        "msp430x" => MSP430X,
        _ => anyhow::bail!(
            "Unknown chip preset '{}' (available: {})",
            name,
            preset_names().join(", ")
        ),
    };
    ChipDescriptor::from_yaml(yaml)
}
