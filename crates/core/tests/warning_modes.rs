// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use msp430emu_core::logging::{LogListener, WarningKind, WarningMode};
use msp430emu_core::memory::ProgramImage;
use msp430emu_core::peripherals::dma::Dma;
use msp430emu_core::peripherals::uart::{Usart, UCRXIFG};
use msp430emu_core::system::msp430::descriptor;
use msp430emu_core::{AccessMode, DebugControl, Machine};
use std::sync::{Arc, Mutex};

const RESET: u32 = 0x4000;

fn raising_machine(overrides: &[(&str, WarningMode)], code: &[u16]) -> Machine {
    let mut chip = descriptor("msp430f1611").unwrap();
    chip.warnings.mode = Some(WarningMode::Raise);
    for (kind, mode) in overrides {
        chip.warnings.overrides.insert(kind.to_string(), *mode);
    }
    let mut machine = Machine::from_config(&chip).unwrap();
    let mut image = ProgramImage::new();
    image.add_words(RESET, code);
    image.add_words(0xFFE8, &[0x4100]);
    image.add_words(0x4100, &[0x1300]);
    image.add_words(0xFFFE, &[RESET as u16]);
    machine.load_firmware(&image).unwrap();
    machine.cpu.set_register(1, 0x3000);
    machine
}

#[derive(Default)]
struct Recorder {
    warnings: Mutex<Vec<(String, WarningKind)>>,
}

impl LogListener for Recorder {
    fn log(&self, _source: &str, _message: &str) {}

    fn warning(&self, source: &str, kind: WarningKind, _message: &str) {
        self.warnings.lock().unwrap().push((source.to_string(), kind));
    }
}

#[test]
fn test_flash_write_raises_and_leaves_cpu_untouched() {
    // MOV #0x1234, &0x4400
    let mut m = raising_machine(&[], &[0x40B2, 0x1234, 0x4400]);
    let before = m.snapshot().cpu;

    let err = m.step().unwrap_err();
    assert_eq!(err.warning_kind(), Some(WarningKind::IllegalIoWrite));
    assert_eq!(m.snapshot().cpu, before);
    assert_eq!(m.get_cycle_count(), 0);
}

#[test]
fn test_unmapped_io_read_follows_override() {
    // MOV &0x0100, R5
    let program = [0x4215, 0x0100, 0x3FFF];

    let mut m = raising_machine(&[], &program);
    let err = m.step().unwrap_err();
    assert_eq!(err.warning_kind(), Some(WarningKind::VoidIoRead));
    assert_eq!(m.get_pc(), RESET);

    let mut m = raising_machine(&[("void_io_read", WarningMode::Silent)], &program);
    m.cpu.set_register(5, 0xFFFF);
    m.step().unwrap();
    assert_eq!(m.cpu.register(5), 0);
    assert_eq!(m.get_pc(), RESET + 4);
}

#[test]
fn test_misaligned_word_read_raises() {
    // MOV &0x1101, R5
    let mut m = raising_machine(&[], &[0x4215, 0x1101]);
    let err = m.step().unwrap_err();
    assert_eq!(err.warning_kind(), Some(WarningKind::MisalignedRead));
}

#[test]
fn test_listeners_record_silenced_warnings() {
    let program = [0x4215, 0x0100, 0x40B2, 0x1234, 0x4400, 0x3FFF];
    let mut m = raising_machine(
        &[
            ("void_io_read", WarningMode::Silent),
            ("illegal_io_write", WarningMode::Print),
        ],
        &program,
    );
    let recorder = Arc::new(Recorder::default());
    m.bus.logger().add_listener(recorder.clone());

    m.run(Some(3)).unwrap();
    let warnings = recorder.warnings.lock().unwrap();
    assert_eq!(
        warnings.as_slice(),
        &[
            ("bus".to_string(), WarningKind::VoidIoRead),
            ("bus".to_string(), WarningKind::IllegalIoWrite),
        ]
    );
}

#[test]
fn test_interrupt_entry_is_atomic() {
    // EINT ; JMP $
    let mut m = raising_machine(&[], &[0xD232, 0x3FFF]);
    m.step().unwrap();
    // Stack pointing into flash
    m.cpu.set_register(1, 0x5000);
    m.bus.set_interrupt(4, true);
    let before = m.snapshot().cpu;

    let err = m.step().unwrap_err();
    assert_eq!(err.warning_kind(), Some(WarningKind::IllegalIoWrite));
    assert_eq!(m.snapshot().cpu, before);
    assert_ne!(m.bus.interrupts.pending_mask() & (1 << 4), 0);
    assert!(m.bus.interrupts.in_service().is_empty());

    // With a valid stack the same interrupt is taken
    m.cpu.set_register(1, 0x3000);
    m.step().unwrap();
    assert_eq!(m.get_pc(), 0x4100);
    assert_eq!(m.bus.interrupts.in_service(), &[4]);
}

fn raising_msp430x(code: &[u16]) -> Machine {
    let mut chip = descriptor("msp430x").unwrap();
    chip.warnings.mode = Some(WarningMode::Raise);
    let mut machine = Machine::from_config(&chip).unwrap();
    for (i, word) in code.iter().enumerate() {
        assert!(machine.bus.memory.write_u16(0x2000 + 2 * i as u32, *word));
    }
    machine.cpu.set_pc(0x2000);
    machine.cpu.set_register(1, 0x3000);
    machine
}

#[test]
fn test_address_word_store_straddling_flash_writes_nothing() {
    // MOVA R5, &0x05BFE: low word in RAM, high word in flash at 0x5C00
    let mut m = raising_msp430x(&[0x0560, 0x5BFE]);
    m.cpu.set_register(5, 0xABCDE);

    let err = m.step().unwrap_err();
    assert_eq!(err.warning_kind(), Some(WarningKind::IllegalIoWrite));
    assert_eq!(m.bus.peek(0x5BFE, AccessMode::Word), 0);
    assert_eq!(m.get_pc(), 0x2000);

    // Same store fully inside RAM
    let mut m = raising_msp430x(&[0x0560, 0x3BFE]);
    m.cpu.set_register(5, 0xABCDE);
    m.step().unwrap();
    assert_eq!(m.bus.peek(0x3BFE, AccessMode::Word20), 0xABCDE);
}

#[test]
fn test_dma_into_flash_leaves_received_byte_unread() {
    let mut m = raising_msp430x(&[0x3FFF]);
    // Leave USART reset, DMA channel 1 on the RX trigger
    m.bus.write(0x5C0, 0, AccessMode::Word).unwrap();
    m.bus.write(0x500, 3 << 4, AccessMode::Word).unwrap();
    m.bus.write(0x51A, 0x5CC, AccessMode::Word).unwrap();
    m.bus.write(0x51C, 0x5C00, AccessMode::Word).unwrap();
    m.bus.write(0x51E, 1, AccessMode::Word).unwrap();
    m.bus.write(0x518, 0x0CD0, AccessMode::Word).unwrap();

    let err = m
        .bus
        .with_peripheral::<Usart, _>("uart0", |usart, ctx| usart.byte_received(b'x', ctx))
        .unwrap_err();
    assert_eq!(err.warning_kind(), Some(WarningKind::IllegalIoWrite));

    let usart = m.bus.peripheral::<Usart>("uart0").unwrap();
    assert_ne!(usart.ifg() & UCRXIFG, 0);
    assert_eq!(m.bus.peek(0x5CC, AccessMode::Byte), b'x' as u32);
    let dma = m.bus.peripheral::<Dma>("dma").unwrap();
    assert_eq!(dma.channel_transfers(1), 0);
    assert!(dma.channel_enabled(1));
}
