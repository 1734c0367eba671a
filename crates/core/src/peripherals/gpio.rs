// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::chip::ChipCore;
use crate::events::ListenerList;
use crate::interrupt::InterruptMultiplexer;
use crate::logging::WarningKind;
use crate::signals::{DigitalLevel, Edge};
use crate::{AccessMode, IoContext, IoUnit, SimResult};
use std::any::Any;
use std::sync::Arc;

/// Register arrangement of an 8-bit digital I/O port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PortLayout {
    /// IN, OUT, DIR, IFG, IES, IE, SEL
    Interrupt,
    /// IN, OUT, DIR, SEL
    Plain,
}

impl PortLayout {
    pub fn size(self) -> usize {
        match self {
            PortLayout::Interrupt => 7,
            PortLayout::Plain => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PortRegister {
    In,
    Out,
    Dir,
    Ifg,
    Ies,
    Ie,
    Sel,
}

pub trait PortListener: Send + Sync {
    /// `value` is the output latch, `mask` the pins currently driven.
    fn output_changed(&self, port: &str, value: u8, mask: u8);
}

impl<F: Fn(&str, u8, u8) + Send + Sync> PortListener for F {
    fn output_changed(&self, port: &str, value: u8, mask: u8) {
        self(port, value, mask)
    }
}

/// 8-bit digital I/O port.
#[derive(Debug, serde::Serialize)]
pub struct IoPort {
    #[serde(skip)]
    chip: ChipCore,
    base: u32,
    layout: PortLayout,
    pins: u8,
    out: u8,
    dir: u8,
    ifg: u8,
    ies: u8,
    ie: u8,
    sel: u8,
    mux: Option<InterruptMultiplexer>,
    #[serde(skip)]
    listeners: Arc<ListenerList<dyn PortListener>>,
}

impl IoPort {
    pub fn new(chip: ChipCore, base: u32, layout: PortLayout, vector: Option<u8>) -> Self {
        let mux = match layout {
            PortLayout::Interrupt => vector.map(InterruptMultiplexer::new),
            PortLayout::Plain => None,
        };
        Self {
            chip,
            base,
            layout,
            pins: 0,
            out: 0,
            dir: 0,
            ifg: 0,
            ies: 0,
            ie: 0,
            sel: 0,
            mux,
            listeners: Arc::new(ListenerList::new()),
        }
    }

    pub fn layout(&self) -> PortLayout {
        self.layout
    }

    pub fn add_listener(&self, listener: Arc<dyn PortListener>) -> bool {
        self.listeners.add(listener)
    }

    pub fn remove_listener(&self, listener: &Arc<dyn PortListener>) -> bool {
        self.listeners.remove(listener)
    }

    /// Level seen on the pin: the output latch for output pins, the
    /// external level otherwise.
    pub fn pin_level(&self, pin: u8) -> DigitalLevel {
        (self.input_value() & (1 << (pin & 7)) != 0).into()
    }

    fn input_value(&self) -> u8 {
        (self.pins & !self.dir) | (self.out & self.dir)
    }

    /// Drives an external level onto `pin`.
    pub fn set_input(&mut self, pin: u8, level: DigitalLevel, ctx: &mut IoContext) {
        let bit = 1u8 << (pin & 7);
        let old: DigitalLevel = (self.pins & bit != 0).into();
        if level.is_high() {
            self.pins |= bit;
        } else {
            self.pins &= !bit;
        }

        if self.layout != PortLayout::Interrupt || self.dir & bit != 0 {
            return;
        }
        let selected = if self.ies & bit != 0 {
            Edge::Falling
        } else {
            Edge::Rising
        };
        if Edge::between(old, level) == Some(selected) {
            self.ifg |= bit;
            self.update_interrupts(ctx);
        }
    }

    fn update_interrupts(&mut self, ctx: &mut IoContext) {
        let requests = self.ifg & self.ie;
        if let Some(mux) = &mut self.mux {
            for pin in 0..8u8 {
                mux.update_interrupt(requests & (1 << pin) != 0, pin, ctx);
            }
        }
    }

    fn register_at(&self, offset: u32) -> Option<PortRegister> {
        use PortRegister::*;
        let table: &[PortRegister] = match self.layout {
            PortLayout::Interrupt => &[In, Out, Dir, Ifg, Ies, Ie, Sel],
            PortLayout::Plain => &[In, Out, Dir, Sel],
        };
        table.get(offset as usize).copied()
    }

    fn read_register(&self, reg: PortRegister) -> u8 {
        match reg {
            PortRegister::In => self.input_value(),
            PortRegister::Out => self.out,
            PortRegister::Dir => self.dir,
            PortRegister::Ifg => self.ifg,
            PortRegister::Ies => self.ies,
            PortRegister::Ie => self.ie,
            PortRegister::Sel => self.sel,
        }
    }

    fn read_byte(&self, address: u32) -> Option<u8> {
        let reg = self.register_at(address.wrapping_sub(self.base))?;
        Some(self.read_register(reg))
    }

    fn write_byte(&mut self, address: u32, value: u8, ctx: &mut IoContext) -> SimResult<()> {
        let offset = address.wrapping_sub(self.base);
        let Some(reg) = self.register_at(offset) else {
            return self.chip.logw(
                WarningKind::VoidIoWrite,
                &format!("write of {:#x} to undefined register {:#06x}", value, address),
            );
        };
        match reg {
            PortRegister::In => {
                self.chip.logw(
                    WarningKind::IllegalIoWrite,
                    &format!("write of {:#x} to read-only IN register", value),
                )?;
            }
            PortRegister::Out => {
                let old = self.out;
                self.out = value;
                if old != value {
                    self.notify_output();
                }
            }
            PortRegister::Dir => {
                let old = self.dir;
                self.dir = value;
                self.chip
                    .configuration_changed(offset, old as i32, value as i32);
                if old != value {
                    self.notify_output();
                }
            }
            PortRegister::Sel => {
                let old = self.sel;
                self.sel = value;
                self.chip
                    .configuration_changed(offset, old as i32, value as i32);
            }
            PortRegister::Ifg => {
                self.ifg = value;
                self.update_interrupts(ctx);
            }
            PortRegister::Ies => self.ies = value,
            PortRegister::Ie => {
                self.ie = value;
                self.update_interrupts(ctx);
            }
        }
        Ok(())
    }

    fn notify_output(&self) {
        let (value, mask) = (self.out, self.dir);
        self.chip.log(&format!("output {:#04x} mask {:#04x}", value, mask));
        self.listeners
            .notify(|l| l.output_changed(self.chip.id(), value, mask));
    }
}

impl IoUnit for IoPort {
    fn chip(&self) -> &ChipCore {
        &self.chip
    }

    fn chip_mut(&mut self) -> &mut ChipCore {
        &mut self.chip
    }

    fn read(&mut self, address: u32, mode: AccessMode, _ctx: &mut IoContext) -> SimResult<u16> {
        let low = self.read_byte(address);
        if low.is_none() {
            self.chip.logw(
                WarningKind::VoidIoRead,
                &format!("read from undefined register {:#06x}", address),
            )?;
        }
        let low = low.unwrap_or(0) as u16;
        if mode == AccessMode::Byte {
            return Ok(low);
        }
        let high = self.read_byte(address + 1).unwrap_or(0) as u16;
        Ok(low | high << 8)
    }

    fn write(
        &mut self,
        address: u32,
        value: u16,
        mode: AccessMode,
        ctx: &mut IoContext,
    ) -> SimResult<()> {
        self.write_byte(address, value as u8, ctx)?;
        if mode != AccessMode::Byte && self.register_at(address + 1 - self.base).is_some() {
            self.write_byte(address + 1, (value >> 8) as u8, ctx)?;
        }
        Ok(())
    }

    fn peek(&self, address: u32) -> Option<u16> {
        let low = self.read_byte(address)? as u16;
        let high = self.read_byte(address + 1).unwrap_or(0) as u16;
        Some(low | high << 8)
    }

    fn reset(&mut self) {
        self.out = 0;
        self.dir = 0;
        self.ifg = 0;
        self.ies = 0;
        self.ie = 0;
        self.sel = 0;
        if let Some(mux) = &mut self.mux {
            mux.reset();
        }
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
