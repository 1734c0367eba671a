// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::chip::ChipCore;
use crate::interrupt::{InterruptController, InterruptState};
use crate::logging::{EmulationLogger, WarningKind, WarningMode};
use crate::memory::{LinearMemory, ProgramImage};
use crate::peripherals::dma::{Dma, TriggerSource};
use crate::peripherals::gpio::{IoPort, PortLayout};
use crate::peripherals::multiplier::Multiplier;
use crate::peripherals::uart::Usart;
use crate::{AccessMode, IoContext, IoEffect, IoUnit, SimResult, SimulationError, UnitId};
use anyhow::Context;
use msp430emu_config::{parse_size, ChipDescriptor, PeripheralConfig};
use std::any::Any;
use std::sync::{Arc, Mutex};

/// A contiguous address range `[base, base + size)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct AddressWindow {
    pub base: u32,
    pub size: u32,
}

impl AddressWindow {
    pub fn new(base: u32, size: u32) -> Self {
        Self { base, size }
    }

    pub fn end(&self) -> u32 {
        self.base.saturating_add(self.size)
    }

    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.base && addr < self.end()
    }

    pub fn overlaps(&self, other: &AddressWindow) -> bool {
        self.base < other.end() && other.base < self.end()
    }
}

pub struct PeripheralEntry {
    pub name: String,
    pub windows: Vec<AddressWindow>,
    pub dev: Box<dyn IoUnit>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Ram,
    Flash,
    Unit(usize),
    VoidIo,
}

/// Address space, peripheral arena and interrupt state shared by the CPU and
/// every bus master.
pub struct SystemBus {
    pub memory: LinearMemory,
    pub peripherals: Vec<PeripheralEntry>,
    pub interrupts: InterruptState,
    /// Cycle counter advanced by the CPU; peripherals see it through [`IoContext`].
    pub cycles: u64,
    flash: Vec<AddressWindow>,
    io: AddressWindow,
    io_map: Vec<Option<u16>>,
    dma: Option<usize>,
    logger: Arc<EmulationLogger>,
}

impl Default for SystemBus {
    fn default() -> Self {
        Self::new(0x1_0000, Arc::new(EmulationLogger::default()))
    }
}

impl SystemBus {
    /// An address space of `size` bytes that is all RAM apart from a 512-byte I/O window at 0.
    pub fn new(size: usize, logger: Arc<EmulationLogger>) -> Self {
        Self {
            memory: LinearMemory::new(size),
            peripherals: Vec::new(),
            interrupts: InterruptState::default(),
            cycles: 0,
            flash: Vec::new(),
            io: AddressWindow::new(0, 0x200),
            io_map: Vec::new(),
            dma: None,
            logger,
        }
    }

    pub fn from_config(chip: &ChipDescriptor, logger: Arc<EmulationLogger>) -> anyhow::Result<Self> {
        let size = parse_size(&chip.memory.size)?;
        let io_size = parse_size(&chip.memory.io.size)?;

        let mut bus = Self::new(size as usize, logger);
        bus.io = AddressWindow::new(chip.memory.io.base, io_size as u32);
        bus.interrupts = InterruptState::from_descriptor(&chip.cpu);

        for range in &chip.memory.flash {
            let size = parse_size(&range.size)?;
            bus.add_flash(AddressWindow::new(range.base, size as u32))?;
        }

        for p_cfg in &chip.peripherals {
            let Some((dev, windows)) = bus.build_peripheral(p_cfg)? else {
                tracing::warn!(
                    "Unsupported peripheral type '{}' for id '{}'; skipping",
                    p_cfg.r#type,
                    p_cfg.id
                );
                continue;
            };
            bus.add_peripheral(&p_cfg.id, windows, dev)?;
        }

        for trig in &chip.dma_triggers {
            bus.bind_dma_trigger(trig.select, &trig.source, trig.index)
                .with_context(|| format!("Invalid DMA trigger select {}", trig.select))?;
        }

        Ok(bus)
    }

    fn build_peripheral(
        &self,
        p_cfg: &PeripheralConfig,
    ) -> anyhow::Result<Option<(Box<dyn IoUnit>, Vec<AddressWindow>)>> {
        let chip = ChipCore::new(p_cfg.id.clone(), self.logger.clone());
        let base = p_cfg.base_address;
        let explicit_size = p_cfg.size.as_deref().map(parse_size).transpose()?;

        let built: (Box<dyn IoUnit>, Vec<AddressWindow>) = match p_cfg.r#type.as_str() {
            "dma" => {
                let channel_base = p_cfg.config_u32("channel_base").unwrap_or(0x1E0);
                let dma = Dma::new(chip, base, channel_base, p_cfg.vector.unwrap_or(0));
                let windows = dma.windows();
                (Box::new(dma), windows)
            }
            "multiplier" | "mpy" => {
                let size = explicit_size.unwrap_or(0x10) as u32;
                (
                    Box::new(Multiplier::new(chip, base)),
                    vec![AddressWindow::new(base, size)],
                )
            }
            "usart" | "uart" => {
                let size = explicit_size.unwrap_or(0x20) as u32;
                let mut usart = Usart::new(chip, base, p_cfg.vector);
                if let Some(cycles) = p_cfg.config_u32("tx_cycles") {
                    usart.set_tx_cycles(cycles as u64);
                }
                (Box::new(usart), vec![AddressWindow::new(base, size)])
            }
            "gpio" | "port" => {
                let interrupt_capable = p_cfg.config_bool("interrupt_capable").unwrap_or(false);
                let layout = if interrupt_capable {
                    PortLayout::Interrupt
                } else {
                    PortLayout::Plain
                };
                let size = explicit_size.unwrap_or(layout.size() as u64) as u32;
                (
                    Box::new(IoPort::new(chip, base, layout, p_cfg.vector)),
                    vec![AddressWindow::new(base, size)],
                )
            }
            _ => return Ok(None),
        };
        Ok(Some(built))
    }

    pub fn logger(&self) -> &Arc<EmulationLogger> {
        &self.logger
    }

    pub fn io_window(&self) -> AddressWindow {
        self.io
    }

    pub fn set_io_window(&mut self, window: AddressWindow) {
        self.io = window;
    }

    pub fn add_flash(&mut self, window: AddressWindow) -> anyhow::Result<()> {
        self.check_partition(&window, "flash")?;
        self.flash.push(window);
        Ok(())
    }

    pub fn add_peripheral(
        &mut self,
        name: &str,
        windows: Vec<AddressWindow>,
        dev: Box<dyn IoUnit>,
    ) -> anyhow::Result<UnitId> {
        if self.peripherals.iter().any(|p| p.name == name) {
            anyhow::bail!("Duplicate peripheral id '{}'", name);
        }
        for w in &windows {
            self.check_partition(w, name)?;
        }
        let idx = self.peripherals.len();
        let is_dma = dev.as_any().is_some_and(|a| a.is::<Dma>());
        if is_dma {
            if self.dma.is_some() {
                anyhow::bail!("Only one DMA controller is supported ('{}')", name);
            }
            self.dma = Some(idx);
        }
        self.peripherals.push(PeripheralEntry {
            name: name.to_string(),
            windows,
            dev,
        });
        self.refresh_peripheral_index();
        Ok(UnitId(idx))
    }

    /// Rejects windows that leave the address space or overlap an existing partition.
    fn check_partition(&self, window: &AddressWindow, owner: &str) -> anyhow::Result<()> {
        if window.size == 0 || !self.memory.contains(window.base, window.size) {
            anyhow::bail!(
                "'{}' window {:#x}+{:#x} outside memory of {:#x} bytes",
                owner,
                window.base,
                window.size,
                self.memory.len()
            );
        }
        if let Some(f) = self.flash.iter().find(|f| f.overlaps(window)) {
            anyhow::bail!("'{}' window {:#x} overlaps flash at {:#x}", owner, window.base, f.base);
        }
        for p in &self.peripherals {
            if p.windows.iter().any(|w| w.overlaps(window)) {
                anyhow::bail!(
                    "'{}' window {:#x} overlaps peripheral '{}'",
                    owner,
                    window.base,
                    p.name
                );
            }
        }
        Ok(())
    }

    /// Rebuilds the address to peripheral lookup table.
    pub fn refresh_peripheral_index(&mut self) {
        let end = self
            .peripherals
            .iter()
            .flat_map(|p| p.windows.iter())
            .map(|w| w.end())
            .max()
            .unwrap_or(0);
        let mut map = vec![None; end as usize];
        for (idx, p) in self.peripherals.iter().enumerate() {
            for w in &p.windows {
                for addr in w.base..w.end() {
                    map[addr as usize] = Some(idx as u16);
                }
            }
        }
        self.io_map = map;
    }

    pub fn unit_id(&self, name: &str) -> Option<UnitId> {
        self.peripherals
            .iter()
            .position(|p| p.name == name)
            .map(UnitId)
    }

    pub fn bind_dma_trigger(&mut self, select: u8, source: &str, index: u8) -> anyhow::Result<()> {
        let unit = self
            .unit_id(source)
            .ok_or_else(|| anyhow::anyhow!("Unknown DMA trigger source '{}'", source))?;
        let dma = self
            .dma_mut()
            .ok_or_else(|| anyhow::anyhow!("No DMA controller configured"))?;
        dma.bind_trigger(select, TriggerSource { unit, index })
    }

    fn target(&self, address: u32) -> Target {
        if let Some(Some(idx)) = self.io_map.get(address as usize) {
            return Target::Unit(*idx as usize);
        }
        if self.io.contains(address) {
            return Target::VoidIo;
        }
        if self.flash.iter().any(|f| f.contains(address)) {
            return Target::Flash;
        }
        Target::Ram
    }

    fn warn(&self, kind: WarningKind, message: String) -> SimResult<()> {
        self.logger.logw("bus", kind, &message)
    }

    /// Bounds and alignment problems shared by reads and writes.
    fn access_fault(&self, address: u32, mode: AccessMode, write: bool) -> Option<(WarningKind, String)> {
        if !self.memory.contains(address, mode.bytes()) {
            let kind = if write {
                WarningKind::AddressOutOfBoundsWrite
            } else {
                WarningKind::AddressOutOfBoundsRead
            };
            return Some((
                kind,
                format!(
                    "{:?} access at {:#07x} beyond memory size {:#x}",
                    mode,
                    address,
                    self.memory.len()
                ),
            ));
        }
        if mode != AccessMode::Byte && address & 1 != 0 {
            let kind = if write {
                WarningKind::MisalignedWrite
            } else {
                WarningKind::MisalignedRead
            };
            return Some((kind, format!("{:?} access at odd address {:#07x}", mode, address)));
        }
        None
    }

    pub fn read(&mut self, address: u32, mode: AccessMode) -> SimResult<u32> {
        if let Some((kind, msg)) = self.access_fault(address, mode, false) {
            self.warn(kind, msg)?;
            return Ok(0);
        }
        if mode == AccessMode::Word20 {
            let lo = self.read(address, AccessMode::Word)?;
            let hi = self.read(address + 2, AccessMode::Word)?;
            return Ok((lo | (hi << 16)) & AccessMode::Word20.mask());
        }
        match self.target(address) {
            Target::Ram | Target::Flash => Ok(self.read_memory(address, mode)),
            Target::Unit(idx) => self
                .with_unit(idx, |dev, ctx| dev.read(address, mode, ctx))
                .map(|v| v as u32 & mode.mask()),
            Target::VoidIo => {
                self.warn(
                    WarningKind::VoidIoRead,
                    format!("read from unmapped I/O address {:#06x}", address),
                )?;
                Ok(0)
            }
        }
    }

    pub fn write(&mut self, address: u32, value: u32, mode: AccessMode) -> SimResult<()> {
        if let Some((kind, msg)) = self.access_fault(address, mode, true) {
            return self.warn(kind, msg);
        }
        if mode == AccessMode::Word20 {
            self.write(address, value & 0xFFFF, AccessMode::Word)?;
            return self.write(address + 2, (value >> 16) & 0xF, AccessMode::Word);
        }
        let value = value & mode.mask();
        match self.target(address) {
            Target::Ram => {
                self.write_memory(address, value, mode);
                Ok(())
            }
            Target::Flash => self.warn(
                WarningKind::IllegalIoWrite,
                format!("write of {:#x} to flash at {:#07x}", value, address),
            ),
            Target::Unit(idx) => {
                self.with_unit(idx, |dev, ctx| dev.write(address, value as u16, mode, ctx))
            }
            Target::VoidIo => self.warn(
                WarningKind::VoidIoWrite,
                format!("write of {:#x} to unmapped I/O address {:#06x}", value, address),
            ),
        }
    }

    /// Problems a write to `address` would report, without performing it.
    /// 20-bit writes are checked as the two word writes they are made of.
    fn write_fault(&self, address: u32, mode: AccessMode) -> Option<(WarningKind, String)> {
        if mode == AccessMode::Word20 {
            return self
                .write_fault(address, AccessMode::Word)
                .or_else(|| self.write_fault(address.wrapping_add(2), AccessMode::Word));
        }
        self.access_fault(address, mode, true)
            .or_else(|| match self.target(address) {
                Target::Flash => Some((
                    WarningKind::IllegalIoWrite,
                    format!("{:?} write to flash at {:#07x}", mode, address),
                )),
                Target::VoidIo => Some((
                    WarningKind::VoidIoWrite,
                    format!("write to unmapped I/O address {:#06x}", address),
                )),
                _ => None,
            })
    }

    /// Performs a group of writes that must not be partially applied. Every
    /// target is checked first; a raised warning aborts before anything is written.
    pub fn write_all(&mut self, writes: &[(u32, u32, AccessMode)]) -> SimResult<()> {
        let mut valid = Vec::with_capacity(writes.len());
        for &(address, _, mode) in writes {
            match self.write_fault(address, mode) {
                Some((kind, msg)) => {
                    self.warn(kind, msg)?;
                    valid.push(false);
                }
                None => valid.push(true),
            }
        }
        for (&(address, value, mode), ok) in writes.iter().zip(valid) {
            if ok {
                self.write(address, value, mode)?;
            }
        }
        Ok(())
    }

    fn read_memory(&self, address: u32, mode: AccessMode) -> u32 {
        match mode {
            AccessMode::Byte => self.memory.read_u8(address).unwrap_or(0) as u32,
            _ => self.memory.read_u16(address).unwrap_or(0) as u32,
        }
    }

    fn write_memory(&mut self, address: u32, value: u32, mode: AccessMode) {
        match mode {
            AccessMode::Byte => {
                self.memory.write_u8(address, value as u8);
            }
            _ => {
                self.memory.write_u16(address, value as u16);
            }
        }
    }

    /// Reads without side effects and without warnings. Unreadable addresses yield 0.
    pub fn peek(&self, address: u32, mode: AccessMode) -> u32 {
        if !self.memory.contains(address, mode.bytes()) {
            return 0;
        }
        if mode == AccessMode::Word20 {
            let lo = self.peek(address, AccessMode::Word);
            let hi = self.peek(address + 2, AccessMode::Word);
            return (lo | (hi << 16)) & AccessMode::Word20.mask();
        }
        match self.target(address) {
            Target::Ram | Target::Flash => self.read_memory(address, mode),
            Target::Unit(idx) => {
                let dev = &self.peripherals[idx].dev;
                match mode {
                    AccessMode::Byte => {
                        let word = dev.peek(address & !1).unwrap_or(0);
                        if address & 1 != 0 {
                            (word >> 8) as u32
                        } else {
                            (word & 0xFF) as u32
                        }
                    }
                    _ => dev.peek(address).unwrap_or(0) as u32,
                }
            }
            Target::VoidIo => 0,
        }
    }

    /// Calls into a peripheral and applies the effects it requested.
    fn with_unit<R>(
        &mut self,
        idx: usize,
        f: impl FnOnce(&mut dyn IoUnit, &mut IoContext) -> SimResult<R>,
    ) -> SimResult<R> {
        let mut ctx = IoContext::new(UnitId(idx), self.cycles);
        let result = f(self.peripherals[idx].dev.as_mut(), &mut ctx);
        let effects = ctx.into_effects();
        if !effects.is_empty() {
            self.apply_effects(UnitId(idx), effects)?;
        }
        result
    }

    fn apply_effects(&mut self, source: UnitId, effects: Vec<IoEffect>) -> SimResult<()> {
        for effect in effects {
            match effect {
                IoEffect::Interrupt { vector, active } => {
                    tracing::trace!(
                        "{}: interrupt line {} -> {}",
                        self.peripherals[source.0].name,
                        vector,
                        active
                    );
                    self.interrupts
                        .set_interrupt_pending(vector, active, Some(source));
                }
                IoEffect::DmaTrigger { index } => self.run_dma_trigger(source, index)?,
            }
        }
        Ok(())
    }

    fn dma_ref(&self) -> Option<&Dma> {
        let idx = self.dma?;
        self.peripherals[idx].dev.as_any()?.downcast_ref::<Dma>()
    }

    fn dma_mut(&mut self) -> Option<&mut Dma> {
        let idx = self.dma?;
        self.peripherals[idx].dev.as_any_mut()?.downcast_mut::<Dma>()
    }

    /// Runs every channel bound to `(source, index)`. Transfers go through the
    /// normal bus path; the channel only advances after both sides succeeded.
    fn run_dma_trigger(&mut self, source: UnitId, index: u8) -> SimResult<()> {
        let Some(dma_idx) = self.dma else {
            return Ok(());
        };
        let channels = match self.dma_ref() {
            Some(dma) => dma.channels_for(TriggerSource {
                unit: source,
                index,
            }),
            None => return Ok(()),
        };
        for channel in channels {
            loop {
                let Some(transfer) = self.dma_ref().and_then(|d| d.pending_transfer(channel)) else {
                    break;
                };
                // The destination is checked before the source read consumes anything
                let writable =
                    match self.write_fault(transfer.destination, transfer.destination_mode) {
                        Some((kind, msg)) => {
                            self.warn(kind, msg)?;
                            false
                        }
                        None => true,
                    };
                let value = self.read(transfer.source, transfer.source_mode)?;
                if writable {
                    self.write(transfer.destination, value, transfer.destination_mode)?;
                }
                tracing::trace!(
                    "DMA{}: {:#06x} -> {:#06x} = {:#x}",
                    channel,
                    transfer.source,
                    transfer.destination,
                    value
                );
                let more = self.with_unit(dma_idx, |dev, ctx| {
                    Ok(dev
                        .as_any_mut()
                        .and_then(|a| a.downcast_mut::<Dma>())
                        .is_some_and(|dma| dma.complete_transfer(channel, ctx)))
                })?;
                if !more {
                    break;
                }
            }
        }
        Ok(())
    }

    pub fn tick_peripherals(&mut self) -> SimResult<()> {
        for idx in 0..self.peripherals.len() {
            self.with_unit(idx, |dev, ctx| dev.tick(ctx))?;
        }
        Ok(())
    }

    /// Notifies the unit that requested `vector` that the CPU accepted it.
    /// Vectors without a requesting unit are cleared on acceptance.
    pub fn interrupt_serviced(&mut self, vector: u8) -> SimResult<()> {
        match self.interrupts.source(vector) {
            Some(UnitId(idx)) if idx < self.peripherals.len() => self.with_unit(idx, |dev, ctx| {
                dev.interrupt_serviced(vector, ctx);
                Ok(())
            }),
            _ => {
                self.interrupts.set_interrupt_pending(vector, false, None);
                Ok(())
            }
        }
    }

    /// Raises or clears a vector from outside any peripheral, e.g. a test harness or NMI pin.
    pub fn set_interrupt(&mut self, vector: u8, active: bool) {
        self.interrupts.set_interrupt_pending(vector, active, None);
    }

    pub fn reset(&mut self) {
        self.interrupts.reset();
        for p in &mut self.peripherals {
            p.dev.reset();
        }
    }

    pub fn load_image(&mut self, image: &ProgramImage) -> SimResult<()> {
        for segment in &image.segments {
            if !self.memory.load_from_segment(segment) {
                tracing::warn!(
                    "Failed to load segment at {:#x} - outside of memory map",
                    segment.start_addr
                );
                return Err(SimulationError::MemoryViolation(segment.start_addr));
            }
        }
        Ok(())
    }

    pub fn peripheral<T: Any>(&self, name: &str) -> Option<&T> {
        self.peripherals
            .iter()
            .find(|p| p.name == name)?
            .dev
            .as_any()?
            .downcast_ref::<T>()
    }

    pub fn peripheral_mut<T: Any>(&mut self, name: &str) -> Option<&mut T> {
        self.peripherals
            .iter_mut()
            .find(|p| p.name == name)?
            .dev
            .as_any_mut()?
            .downcast_mut::<T>()
    }

    /// Drives a peripheral from outside the CPU (pin changes, received bytes)
    /// with the same effect handling as a bus access.
    pub fn with_peripheral<T: Any, R>(
        &mut self,
        name: &str,
        f: impl FnOnce(&mut T, &mut IoContext) -> SimResult<R>,
    ) -> SimResult<Option<R>> {
        let Some(UnitId(idx)) = self.unit_id(name) else {
            return Ok(None);
        };
        self.with_unit(idx, |dev, ctx| {
            match dev.as_any_mut().and_then(|a| a.downcast_mut::<T>()) {
                Some(t) => f(t, ctx).map(Some),
                None => Ok(None),
            }
        })
    }

    /// Attach a USART TX capture sink to every USART on this bus.
    pub fn attach_usart_tx_sink(&mut self, sink: Arc<Mutex<Vec<u8>>>) {
        for p in &mut self.peripherals {
            let Some(any) = p.dev.as_any_mut() else {
                continue;
            };
            let Some(usart) = any.downcast_mut::<Usart>() else {
                continue;
            };
            usart.set_sink(Some(sink.clone()));
        }
    }

    pub fn warning_mode(&self) -> WarningMode {
        self.logger.mode()
    }
}
