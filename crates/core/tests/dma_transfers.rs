// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use msp430emu_core::memory::ProgramImage;
use msp430emu_core::peripherals::dma::Dma;
use msp430emu_core::system::build_machine_from_preset;
use msp430emu_core::{AccessMode, DebugControl, Machine};

// MSP430F1611 DMA channel 0
const DMA0CTL: u32 = 0x1E0;
const DMA0SA: u32 = 0x1E2;
const DMA0DA: u32 = 0x1E4;
const DMA0SZ: u32 = 0x1E6;

fn f1611_with(code: &[u16], extra: &[(u32, &[u16])]) -> Machine {
    let mut machine = build_machine_from_preset("msp430f1611").unwrap();
    let mut image = ProgramImage::new();
    image.add_words(0x4000, code);
    image.add_words(0xFFFE, &[0x4000]);
    for (address, words) in extra {
        image.add_words(*address, words);
    }
    machine.load_firmware(&image).unwrap();
    machine
}

fn word(machine: &Machine, address: u32) -> u32 {
    machine.bus.peek(address, AccessMode::Word)
}

#[test]
fn test_firmware_block_copy_with_software_request() {
    let code = [
        0x4031, 0x3000, // MOV #0x3000, SP
        0x40B2, 0x1100, 0x01E2, // MOV #0x1100, &DMA0SA
        0x40B2, 0x1200, 0x01E4, // MOV #0x1200, &DMA0DA
        0x42A2, 0x01E6, // MOV #4, &DMA0SZ
        0x40B2, 0x1F10, 0x01E0, // MOV #(block | dst++ | src++ | DMAEN), &DMA0CTL
        0xD392, 0x01E0, // BIS #DMAREQ, &DMA0CTL
        0x3FFF, // JMP $
    ];
    let source: &[u16] = &[1, 2, 3, 4];
    let mut machine = f1611_with(&code, &[(0x1100, source)]);

    machine.run(Some(5)).unwrap();
    // Enabling alone does not start a transfer
    assert_eq!(word(&machine, 0x1200), 0);
    let dma = machine.bus.peripheral::<Dma>("dma").unwrap();
    assert!(dma.channel_enabled(0));

    machine.run(Some(1)).unwrap();
    let copied: Vec<u32> = (0..4).map(|i| word(&machine, 0x1200 + 2 * i)).collect();
    assert_eq!(copied, vec![1, 2, 3, 4]);

    let dma = machine.bus.peripheral::<Dma>("dma").unwrap();
    assert!(!dma.channel_enabled(0));
    assert!(dma.channel_ifg(0));
    assert_eq!(dma.channel_transfers(0), 4);
    // IFG is visible in the control word, DMAEN and DMAREQ are clear
    assert_eq!(word(&machine, DMA0CTL), 0x1F08);
    // Configured registers keep their values
    assert_eq!(word(&machine, DMA0SA), 0x1100);
    assert_eq!(word(&machine, DMA0SZ), 4);
}

#[test]
fn test_completion_interrupt_is_serviced() {
    let code = [
        0x4031, 0x3000, // MOV #0x3000, SP
        0x40B2, 0x1100, 0x01E2, // MOV #0x1100, &DMA0SA
        0x40B2, 0x1200, 0x01E4, // MOV #0x1200, &DMA0DA
        0x4392, 0x01E6, // MOV #1, &DMA0SZ
        0x40B2, 0x0F14, 0x01E0, // MOV #(dst++ | src++ | DMAIE | DMAEN), &DMA0CTL
        0xD232, // EINT
        0xD392, 0x01E0, // BIS #DMAREQ, &DMA0CTL
        0x3FFF, // JMP $
    ];
    let handler: &[u16] = &[
        0xC2B2, 0x01E0, // BIC #DMAIFG, &DMA0CTL
        0x531F, // INC R15
        0x1300, // RETI
    ];
    let data: &[u16] = &[0xABCD];
    let vectors: &[u16] = &[0x4100];
    let mut machine = f1611_with(&code, &[(0x4100, handler), (0x1100, data), (0xFFE0, vectors)]);

    machine.run(Some(7)).unwrap();
    assert_eq!(word(&machine, 0x1200), 0xABCD);
    assert_eq!(machine.bus.interrupts.pending_mask() & 1, 1);

    let report = machine.step().unwrap();
    assert_eq!(
        report.kind,
        msp430emu_core::cpu::StepKind::Interrupt { vector: 0 }
    );
    machine.run(Some(3)).unwrap();
    assert_eq!(machine.cpu.register(15), 1);
    assert_eq!(machine.bus.interrupts.pending_mask(), 0);
    assert!(machine.bus.interrupts.in_service().is_empty());
    assert_eq!(machine.get_pc(), 0x4020);

    // Nothing further is requested
    machine.run(Some(10)).unwrap();
    assert_eq!(machine.cpu.register(15), 1);
    assert_eq!(machine.bus.interrupts.raise_count(0), 1);
}

#[test]
fn test_repeated_single_transfers_reload_after_each_pass() {
    let mut machine = f1611_with(&[0x3FFF], &[]);
    machine.write_memory(0x1100, &[0x11, 0x22]).unwrap();
    let bus = &mut machine.bus;
    bus.write(DMA0SA, 0x1100, AccessMode::Word).unwrap();
    bus.write(DMA0DA, 0x1200, AccessMode::Word).unwrap();
    bus.write(DMA0SZ, 2, AccessMode::Word).unwrap();
    // repeated single | dst++ | src++ | byte | byte | DMAEN
    let ctl = 0x4FD0;
    bus.write(DMA0CTL, ctl, AccessMode::Word).unwrap();

    bus.write(DMA0CTL, ctl | 1, AccessMode::Word).unwrap();
    assert_eq!(machine.read_memory(0x1200, 2).unwrap(), vec![0x11, 0x00]);
    machine.bus.write(DMA0CTL, ctl | 1, AccessMode::Word).unwrap();
    assert_eq!(machine.read_memory(0x1200, 2).unwrap(), vec![0x11, 0x22]);

    let dma = machine.bus.peripheral::<Dma>("dma").unwrap();
    assert!(dma.channel_enabled(0));
    assert!(dma.channel_ifg(0));

    // Third request starts over from the configured addresses
    machine.write_memory(0x1200, &[0, 0]).unwrap();
    machine.write_memory(0x1100, &[0x33]).unwrap();
    machine
        .bus
        .write(DMA0CTL, ctl | 0x0008 | 1, AccessMode::Word)
        .unwrap();
    assert_eq!(machine.read_memory(0x1200, 2).unwrap(), vec![0x33, 0x00]);
    let dma = machine.bus.peripheral::<Dma>("dma").unwrap();
    assert_eq!(dma.channel_transfers(0), 3);
}

#[test]
fn test_word_source_into_byte_destination_truncates() {
    let mut machine = f1611_with(&[0x3FFF], &[]);
    machine.write_memory(0x1100, &[0x34, 0x12, 0x78, 0x56]).unwrap();
    let bus = &mut machine.bus;
    bus.write(DMA0SA, 0x1100, AccessMode::Word).unwrap();
    bus.write(DMA0DA, 0x1200, AccessMode::Word).unwrap();
    bus.write(DMA0SZ, 2, AccessMode::Word).unwrap();
    // block | dst++ | src++ | byte destination | DMAEN
    let ctl = 0x1F90;
    bus.write(DMA0CTL, ctl, AccessMode::Word).unwrap();
    bus.write(DMA0CTL, ctl | 1, AccessMode::Word).unwrap();
    assert_eq!(machine.read_memory(0x1200, 3).unwrap(), vec![0x34, 0x78, 0x00]);
}

#[test]
fn test_four_single_requests_move_four_bytes_with_one_interrupt() {
    let mut machine = f1611_with(&[0x3FFF], &[]);
    machine.write_memory(0x1100, &[1, 2, 3, 4]).unwrap();
    let bus = &mut machine.bus;
    bus.write(DMA0SA, 0x1100, AccessMode::Word).unwrap();
    bus.write(DMA0DA, 0x1200, AccessMode::Word).unwrap();
    bus.write(DMA0SZ, 4, AccessMode::Word).unwrap();
    // single | dst++ | src++ | byte | byte | DMAIE | DMAEN
    let ctl = 0x0FD4;
    bus.write(DMA0CTL, ctl, AccessMode::Word).unwrap();

    for _ in 0..3 {
        machine.bus.write(DMA0CTL, ctl | 1, AccessMode::Word).unwrap();
    }
    assert_eq!(machine.read_memory(0x1200, 4).unwrap(), vec![1, 2, 3, 0]);
    assert_eq!(machine.bus.interrupts.raise_count(0), 0);

    machine.bus.write(DMA0CTL, ctl | 1, AccessMode::Word).unwrap();
    assert_eq!(machine.read_memory(0x1200, 4).unwrap(), vec![1, 2, 3, 4]);

    let dma = machine.bus.peripheral::<Dma>("dma").unwrap();
    assert!(!dma.channel_enabled(0));
    assert!(dma.channel_ifg(0));
    assert_eq!(dma.channel_transfers(0), 4);
    assert_eq!(machine.bus.interrupts.raise_count(0), 1);
    assert_eq!(machine.bus.interrupts.pending_mask() & 1, 1);
}
