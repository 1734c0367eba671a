// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::chip::ChipCore;
use crate::events::ListenerList;
use crate::interrupt::InterruptMultiplexer;
use crate::logging::WarningKind;
use crate::peripherals::{merge_byte, select_byte};
use crate::{AccessMode, IoContext, IoUnit, SimResult};
use std::any::Any;
use std::sync::{Arc, Mutex};

pub const CTLW0: u32 = 0x00;
pub const BRW: u32 = 0x06;
pub const MCTL: u32 = 0x08;
pub const STAT: u32 = 0x0A;
pub const RXBUF: u32 = 0x0C;
pub const TXBUF: u32 = 0x0E;
/// IE in the low byte, IFG in the high byte.
pub const IE: u32 = 0x1C;
pub const IFG: u32 = 0x1D;
pub const IV: u32 = 0x1E;

pub const UCSWRST: u16 = 0x0001;
pub const UCBUSY: u16 = 0x0001;
pub const UCOE: u16 = 0x0020;
pub const UCRXIFG: u8 = 0x01;
pub const UCTXIFG: u8 = 0x02;

/// DMA trigger outputs.
pub const TRIGGER_RX: u8 = 0;
pub const TRIGGER_TX: u8 = 1;

const DEFAULT_TX_CYCLES: u64 = 10;

const MODE_OFF: usize = 0;
const MODE_IDLE: usize = 1;
const MODE_BUSY: usize = 2;

pub trait UsartListener: Send + Sync {
    fn data_transmitted(&self, source: &str, byte: u8);
}

impl<F: Fn(&str, u8) + Send + Sync> UsartListener for F {
    fn data_transmitted(&self, source: &str, byte: u8) {
        self(source, byte)
    }
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
struct PendingTx {
    byte: u8,
    done_at: u64,
}

/// Asynchronous serial transceiver with USCI_A-style registers.
///
/// A byte written to TXBUF leaves the shift register `tx_cycles` after the
/// write and is then handed to the capture sink and listeners.
#[derive(Debug, serde::Serialize)]
pub struct Usart {
    #[serde(skip)]
    chip: ChipCore,
    base: u32,
    ctlw0: u16,
    brw: u16,
    mctl: u16,
    stat: u16,
    rxbuf: u8,
    txbuf: u8,
    ie: u8,
    ifg: u8,
    tx_cycles: u64,
    tx: Option<PendingTx>,
    mux: Option<InterruptMultiplexer>,
    #[serde(skip)]
    sink: Option<Arc<Mutex<Vec<u8>>>>,
    #[serde(skip)]
    listeners: Arc<ListenerList<dyn UsartListener>>,
}

impl Usart {
    pub fn new(chip: ChipCore, base: u32, vector: Option<u8>) -> Self {
        let mut usart = Self {
            chip: chip.with_modes(&["off", "idle", "busy"]),
            base,
            ctlw0: 0,
            brw: 0,
            mctl: 0,
            stat: 0,
            rxbuf: 0,
            txbuf: 0,
            ie: 0,
            ifg: 0,
            tx_cycles: DEFAULT_TX_CYCLES,
            tx: None,
            mux: vector.map(InterruptMultiplexer::new),
            sink: None,
            listeners: Arc::new(ListenerList::new()),
        };
        usart.reset();
        usart
    }

    pub fn set_tx_cycles(&mut self, cycles: u64) {
        self.tx_cycles = cycles;
    }

    pub fn set_sink(&mut self, sink: Option<Arc<Mutex<Vec<u8>>>>) {
        self.sink = sink;
    }

    pub fn listeners(&self) -> &Arc<ListenerList<dyn UsartListener>> {
        &self.listeners
    }

    pub fn add_listener(&self, listener: Arc<dyn UsartListener>) -> bool {
        self.listeners.add(listener)
    }

    pub fn is_transmitting(&self) -> bool {
        self.tx.is_some()
    }

    pub fn ifg(&self) -> u8 {
        self.ifg
    }

    fn held_in_reset(&self) -> bool {
        self.ctlw0 & UCSWRST != 0
    }

    fn update_interrupts(&mut self, ctx: &mut IoContext) {
        let requests = self.ie & self.ifg;
        if let Some(mux) = &mut self.mux {
            mux.update_interrupt(requests & UCRXIFG != 0, 0, ctx);
            mux.update_interrupt(requests & UCTXIFG != 0, 1, ctx);
        }
    }

    fn update_mode(&mut self) {
        let mode = if self.held_in_reset() {
            MODE_OFF
        } else if self.tx.is_some() {
            MODE_BUSY
        } else {
            MODE_IDLE
        };
        self.chip.set_mode(mode);
    }

    /// Feeds one byte into the receiver as if it arrived on the RX line.
    pub fn byte_received(&mut self, byte: u8, ctx: &mut IoContext) -> SimResult<()> {
        if self.held_in_reset() {
            return self.chip.logw(
                WarningKind::EmulationError,
                &format!("byte {:#04x} received while held in reset", byte),
            );
        }
        if self.ifg & UCRXIFG != 0 {
            self.stat |= UCOE;
            self.chip.log(&format!("receive overrun, {:#04x} lost", self.rxbuf));
        }
        self.rxbuf = byte;
        self.ifg |= UCRXIFG;
        self.update_interrupts(ctx);
        ctx.trigger_dma(TRIGGER_RX);
        Ok(())
    }

    fn transmit(&mut self, byte: u8, ctx: &mut IoContext) {
        self.txbuf = byte;
        self.ifg &= !UCTXIFG;
        self.stat |= UCBUSY;
        self.tx = Some(PendingTx {
            byte,
            done_at: ctx.cycles() + self.tx_cycles,
        });
        self.update_interrupts(ctx);
        self.update_mode();
    }

    fn finish_transmit(&mut self, byte: u8, ctx: &mut IoContext) {
        self.tx = None;
        self.stat &= !UCBUSY;
        self.ifg |= UCTXIFG;

        if let Some(sink) = &self.sink {
            if let Ok(mut guard) = sink.lock() {
                guard.push(byte);
            }
        }
        let id = self.chip.id().to_string();
        self.listeners.notify(|l| l.data_transmitted(&id, byte));
        self.chip
            .emit_event("TX", serde_json::json!({ "byte": byte }), ctx.cycles());

        self.update_interrupts(ctx);
        self.update_mode();
        ctx.trigger_dma(TRIGGER_TX);
    }

    /// Highest pending source: 2 for RX, 4 for TX, 0 when idle.
    fn interrupt_vector_word(&self) -> u16 {
        let pending = self.ie & self.ifg;
        if pending & UCRXIFG != 0 {
            2
        } else if pending & UCTXIFG != 0 {
            4
        } else {
            0
        }
    }

    fn register(&self, offset: u32) -> Option<u16> {
        Some(match offset & !1 {
            CTLW0 => self.ctlw0,
            BRW => self.brw,
            MCTL => self.mctl,
            STAT => self.stat,
            RXBUF => self.rxbuf as u16,
            TXBUF => self.txbuf as u16,
            IE => self.ie as u16 | (self.ifg as u16) << 8,
            IV => self.interrupt_vector_word(),
            _ => return None,
        })
    }

    fn write_register(&mut self, offset: u32, value: u16, ctx: &mut IoContext) -> SimResult<()> {
        match offset {
            CTLW0 => {
                let old = self.ctlw0;
                self.ctlw0 = value;
                if old & UCSWRST != 0 && value & UCSWRST == 0 {
                    // Leaving reset makes the transmitter ready
                    self.ifg |= UCTXIFG;
                    self.ifg &= !UCRXIFG;
                    self.stat = 0;
                } else if value & UCSWRST != 0 {
                    self.tx = None;
                    self.ifg &= !UCRXIFG;
                    self.ifg |= UCTXIFG;
                }
                if old != value {
                    self.chip
                        .configuration_changed(CTLW0, old as i32, value as i32);
                }
                self.update_interrupts(ctx);
                self.update_mode();
            }
            BRW => {
                let old = self.brw;
                self.brw = value;
                self.chip.configuration_changed(BRW, old as i32, value as i32);
            }
            MCTL => self.mctl = value,
            STAT => self.stat = (self.stat & UCBUSY) | (value & !UCBUSY),
            RXBUF => {
                self.chip.logw(
                    WarningKind::IllegalIoWrite,
                    &format!("write of {:#x} to read-only RXBUF", value),
                )?;
            }
            TXBUF => {
                if self.held_in_reset() {
                    return self.chip.logw(
                        WarningKind::EmulationError,
                        &format!("TXBUF write of {:#04x} while held in reset", value),
                    );
                }
                if self.tx.is_some() {
                    self.chip.log("TXBUF overwritten while busy");
                }
                self.transmit(value as u8, ctx);
            }
            IE => {
                self.ie = value as u8 & (UCRXIFG | UCTXIFG);
                self.ifg = (value >> 8) as u8 & (UCRXIFG | UCTXIFG);
                self.update_interrupts(ctx);
            }
            IV => {
                self.chip.logw(
                    WarningKind::IllegalIoWrite,
                    &format!("write of {:#x} to read-only IV", value),
                )?;
            }
            _ => {}
        }
        Ok(())
    }
}

impl IoUnit for Usart {
    fn chip(&self) -> &ChipCore {
        &self.chip
    }

    fn chip_mut(&mut self) -> &mut ChipCore {
        &mut self.chip
    }

    fn read(&mut self, address: u32, mode: AccessMode, ctx: &mut IoContext) -> SimResult<u16> {
        let offset = address.wrapping_sub(self.base);
        let Some(word) = self.register(offset) else {
            self.chip.logw(
                WarningKind::VoidIoRead,
                &format!("read from undefined register {:#06x}", address),
            )?;
            return Ok(0);
        };

        match offset & !1 {
            RXBUF => {
                self.ifg &= !UCRXIFG;
                self.stat &= !UCOE;
                self.update_interrupts(ctx);
            }
            IV => {
                // Reading IV acknowledges the source it reports
                match word {
                    2 => self.ifg &= !UCRXIFG,
                    4 => self.ifg &= !UCTXIFG,
                    _ => {}
                }
                self.update_interrupts(ctx);
            }
            _ => {}
        }

        Ok(if mode == AccessMode::Byte {
            select_byte(word, offset)
        } else {
            word
        })
    }

    fn write(
        &mut self,
        address: u32,
        value: u16,
        mode: AccessMode,
        ctx: &mut IoContext,
    ) -> SimResult<()> {
        let offset = address.wrapping_sub(self.base);
        let Some(old) = self.register(offset) else {
            return self.chip.logw(
                WarningKind::VoidIoWrite,
                &format!("write of {:#x} to undefined register {:#06x}", value, address),
            );
        };
        let value = if mode == AccessMode::Byte {
            merge_byte(old, offset, value)
        } else {
            value
        };
        self.write_register(offset & !1, value, ctx)
    }

    fn peek(&self, address: u32) -> Option<u16> {
        self.register(address.wrapping_sub(self.base))
    }

    fn tick(&mut self, ctx: &mut IoContext) -> SimResult<()> {
        if let Some(tx) = self.tx {
            if ctx.cycles() >= tx.done_at {
                self.finish_transmit(tx.byte, ctx);
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.ctlw0 = UCSWRST;
        self.brw = 0;
        self.mctl = 0;
        self.stat = 0;
        self.rxbuf = 0;
        self.txbuf = 0;
        self.ie = 0;
        self.ifg = UCTXIFG;
        self.tx = None;
        if let Some(mux) = &mut self.mux {
            mux.reset();
        }
        self.update_mode();
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
    use crate::{IoEffect, UnitId};

    const BASE: u32 = 0x5C0;

    fn usart(vector: Option<u8>) -> Usart {
        let mut u = Usart::new(
            ChipCore::new("uart0", EmulationLogger::shared(WarningMode::Raise)),
            BASE,
            vector,
        );
        u.set_tx_cycles(4);
        u
    }

    fn w(u: &mut Usart, reg: u32, value: u16, ctx: &mut IoContext) {
        u.write(BASE + reg, value, AccessMode::Word, ctx).unwrap();
    }

    #[test]
    fn test_transmit_completes_after_tx_cycles() {
        let mut u = usart(None);
        let sink = Arc::new(Mutex::new(Vec::new()));
        u.set_sink(Some(sink.clone()));
        let mut ctx = IoContext::new(UnitId(0), 100);
        w(&mut u, CTLW0, 0, &mut ctx);
        assert_eq!(u.chip().mode(), MODE_IDLE);
        w(&mut u, TXBUF, b'H' as u16, &mut ctx);
        assert!(u.is_transmitting());
        assert_eq!(u.ifg() & UCTXIFG, 0);
        assert_eq!(u.chip().mode(), MODE_BUSY);

        let mut early = IoContext::new(UnitId(0), 103);
        u.tick(&mut early).unwrap();
        assert!(sink.lock().unwrap().is_empty());

        let mut done = IoContext::new(UnitId(0), 104);
        u.tick(&mut done).unwrap();
        assert_eq!(*sink.lock().unwrap(), vec![b'H']);
        assert_eq!(u.ifg() & UCTXIFG, UCTXIFG);
        assert_eq!(done.effects(), &[IoEffect::DmaTrigger { index: TRIGGER_TX }]);
    }

    #[test]
    fn test_listener_sees_transmitted_bytes() {
        let mut u = usart(None);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        u.add_listener(Arc::new(move |_: &str, b: u8| seen2.lock().unwrap().push(b)));
        let mut ctx = IoContext::new(UnitId(0), 0);
        w(&mut u, CTLW0, 0, &mut ctx);
        w(&mut u, TXBUF, 0x41, &mut ctx);
        let mut later = IoContext::new(UnitId(0), 50);
        u.tick(&mut later).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![0x41]);
    }

    #[test]
    fn test_receive_sets_flag_and_reading_clears_it() {
        let mut u = usart(Some(7));
        let mut ctx = IoContext::new(UnitId(2), 0);
        w(&mut u, CTLW0, 0, &mut ctx);
        w(&mut u, IE, UCRXIFG as u16 | (UCTXIFG as u16) << 8, &mut ctx);
        let _ = ctx.into_effects();

        let mut ctx = IoContext::new(UnitId(2), 0);
        u.byte_received(0x5A, &mut ctx).unwrap();
        assert_eq!(
            ctx.effects(),
            &[
                IoEffect::Interrupt {
                    vector: 7,
                    active: true
                },
                IoEffect::DmaTrigger { index: TRIGGER_RX },
            ]
        );
        assert_eq!(u.peek(BASE + IV), Some(2));

        let mut ctx = IoContext::new(UnitId(2), 0);
        assert_eq!(u.read(BASE + RXBUF, AccessMode::Byte, &mut ctx).unwrap(), 0x5A);
        assert_eq!(u.ifg() & UCRXIFG, 0);
        assert_eq!(
            ctx.effects(),
            &[IoEffect::Interrupt {
                vector: 7,
                active: false
            }]
        );
    }

    #[test]
    fn test_overrun_sets_status() {
        let mut u = usart(None);
        let mut ctx = IoContext::new(UnitId(0), 0);
        w(&mut u, CTLW0, 0, &mut ctx);
        u.byte_received(1, &mut ctx).unwrap();
        u.byte_received(2, &mut ctx).unwrap();
        assert_eq!(u.peek(BASE + STAT).unwrap() & UCOE, UCOE);
        assert_eq!(u.peek(BASE + RXBUF), Some(2));
    }

    #[test]
    fn test_byte_access_to_flag_register() {
        let mut u = usart(None);
        let mut ctx = IoContext::new(UnitId(0), 0);
        w(&mut u, CTLW0, 0, &mut ctx);
        u.write(BASE + IE, UCRXIFG as u16, AccessMode::Byte, &mut ctx)
            .unwrap();
        assert_eq!(
            u.read(BASE + IFG, AccessMode::Byte, &mut ctx).unwrap(),
            UCTXIFG as u16
        );
        u.write(BASE + IFG, 0, AccessMode::Byte, &mut ctx).unwrap();
        assert_eq!(u.ifg(), 0);
        assert_eq!(u.peek(BASE + IE).unwrap() & 0xFF, UCRXIFG as u16);
    }

    #[test]
    fn test_read_only_registers_warn() {
        let mut u = usart(None);
        let mut ctx = IoContext::new(UnitId(0), 0);
        let err = u
            .write(BASE + RXBUF, 1, AccessMode::Word, &mut ctx)
            .unwrap_err();
        assert_eq!(err.warning_kind(), Some(WarningKind::IllegalIoWrite));
        let err = u.read(BASE + 0x10, AccessMode::Word, &mut ctx).unwrap_err();
        assert_eq!(err.warning_kind(), Some(WarningKind::VoidIoRead));
    }

    #[test]
    fn test_transmit_while_in_reset_is_rejected() {
        let mut u = usart(None);
        let mut ctx = IoContext::new(UnitId(0), 0);
        assert_eq!(u.chip().mode(), MODE_OFF);
        assert!(u.write(BASE + TXBUF, 1, AccessMode::Word, &mut ctx).is_err());
        assert!(!u.is_transmitting());
    }
}
