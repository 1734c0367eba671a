// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

pub mod bus;
pub mod chip;
pub mod config;
pub mod cpu;
pub mod decoder;
pub mod events;
pub mod interrupt;
pub mod logging;
pub mod memory;
pub mod metrics;
pub mod peripherals;
pub mod profiler;
pub mod registry;
pub mod signals;
pub mod snapshot;
pub mod system;

use std::any::Any;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::chip::ChipCore;
use crate::cpu::{Msp430, StepKind, StepReport};
use crate::logging::{EmulationLogger, WarningKind};
use crate::memory::{ProgramImage, SymbolTable};
use crate::profiler::Profiler;


#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    /// A warning whose kind is configured to raise.
    #[error("{kind}: {message}")]
    Warning { kind: WarningKind, message: String },
    #[error("Memory access violation at {0:#x}")]
    MemoryViolation(u32),
}

impl SimulationError {
    pub fn warning_kind(&self) -> Option<WarningKind> {
        match self {
            SimulationError::Warning { kind, .. } => Some(*kind),
            SimulationError::MemoryViolation(_) => None,
        }
    }
}

pub type SimResult<T> = Result<T, SimulationError>;

/// Width of a bus access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum AccessMode {
    Byte,
    Word,
    /// MSP430X address-word: 20 bits stored in two consecutive words.
    Word20,
}

impl AccessMode {
    pub fn bytes(self) -> u32 {
        match self {
            AccessMode::Byte => 1,
            AccessMode::Word => 2,
            AccessMode::Word20 => 4,
        }
    }

    pub fn mask(self) -> u32 {
        match self {
            AccessMode::Byte => 0xFF,
            AccessMode::Word => 0xFFFF,
            AccessMode::Word20 => 0xF_FFFF,
        }
    }
}

/// Index of a peripheral in the bus arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct UnitId(pub usize);

/// Side effect requested by a peripheral during an access or tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoEffect {
    Interrupt { vector: u8, active: bool },
    DmaTrigger { index: u8 },
}

/// Per-call context handed to a peripheral. Effects are applied by the bus
/// before the originating access returns.
#[derive(Debug)]
pub struct IoContext {
    unit: UnitId,
    cycles: u64,
    effects: Vec<IoEffect>,
}

impl IoContext {
    pub fn new(unit: UnitId, cycles: u64) -> Self {
        Self {
            unit,
            cycles,
            effects: Vec::new(),
        }
    }

    /// The peripheral being called.
    pub fn unit(&self) -> UnitId {
        self.unit
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn flag_interrupt(&mut self, vector: u8, active: bool) {
        self.effects.push(IoEffect::Interrupt { vector, active });
    }

    pub fn trigger_dma(&mut self, index: u8) {
        self.effects.push(IoEffect::DmaTrigger { index });
    }

    pub fn effects(&self) -> &[IoEffect] {
        &self.effects
    }

    pub fn into_effects(self) -> Vec<IoEffect> {
        self.effects
    }
}

/// A memory-mapped peripheral.
///
/// Addresses are absolute bus addresses inside one of the windows the unit
/// was registered with. Values are 8 or 16 bits wide depending on `mode`;
/// 20-bit accesses are split into two word accesses by the bus.
pub trait IoUnit: std::fmt::Debug + Send {
    fn chip(&self) -> &ChipCore;
    fn chip_mut(&mut self) -> &mut ChipCore;

    fn read(&mut self, address: u32, mode: AccessMode, ctx: &mut IoContext) -> SimResult<u16>;
    fn write(
        &mut self,
        address: u32,
        value: u16,
        mode: AccessMode,
        ctx: &mut IoContext,
    ) -> SimResult<()>;

    /// Side-effect free read used by debuggers and snapshots.
    fn peek(&self, _address: u32) -> Option<u16> {
        None
    }

    fn tick(&mut self, _ctx: &mut IoContext) -> SimResult<()> {
        Ok(())
    }

    /// Called when the CPU accepts an interrupt this unit requested.
    fn interrupt_serviced(&mut self, _vector: u8, _ctx: &mut IoContext) {}

    fn reset(&mut self) {}

    fn as_any(&self) -> Option<&dyn Any> {
        None
    }
    fn as_any_mut(&mut self) -> Option<&mut dyn Any> {
        None
    }
    fn snapshot(&self) -> serde_json::Value {
        serde_json::Value::Null
    }
}

/// Trait for observing simulation events in a modular way.
pub trait SimulationObserver: std::fmt::Debug + Send + Sync {
    fn on_simulation_start(&self) {}
    fn on_simulation_stop(&self) {}
    fn on_step_start(&self, _pc: u32, _opcode: u16) {}
    fn on_step_end(&self, _cycles: u32) {}
    fn on_interrupt(&self, _vector: u8, _cycles: u64) {}
    fn on_idle(&self, _cycles: u32) {}
}

/// Cooperative stop flag that other threads may raise between instructions.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

/// Trait for controlling the machine in debug mode
pub trait DebugControl {
    fn add_breakpoint(&mut self, addr: u32);
    fn remove_breakpoint(&mut self, addr: u32);
    fn clear_breakpoints(&mut self);

    /// Run until breakpoint, stop request or steps limit
    fn run(&mut self, max_steps: Option<u32>) -> SimResult<StopReason>;

    /// Step a single instruction
    fn step_single(&mut self) -> SimResult<StopReason>;

    fn read_core_reg(&self, id: u8) -> u32;
    fn write_core_reg(&mut self, id: u8, val: u32);

    fn read_memory(&self, addr: u32, len: usize) -> SimResult<Vec<u8>>;
    fn write_memory(&mut self, addr: u32, data: &[u8]) -> SimResult<()>;

    fn get_pc(&self) -> u32;
    fn set_pc(&mut self, addr: u32);
    fn get_register_names(&self) -> Vec<String>;
    fn get_cycle_count(&self) -> u64;
    fn reset(&mut self) -> SimResult<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    Breakpoint(u32),
    StepDone,
    MaxStepsReached,
    ManualStop,
}

pub struct Machine {
    pub cpu: Msp430,
    pub bus: bus::SystemBus,
    pub observers: Vec<Arc<dyn SimulationObserver>>,
    pub profiler: Option<Box<dyn Profiler>>,
    pub symbols: SymbolTable,
    pub config: config::SimulationConfig,

    // Debug state
    pub breakpoints: HashSet<u32>,
    stop: StopHandle,
    steps_since_tick: u32,
}

impl Machine {
    pub fn new(cpu: Msp430, bus: bus::SystemBus) -> Self {
        Self {
            cpu,
            bus,
            observers: Vec::new(),
            profiler: None,
            symbols: SymbolTable::new(),
            config: config::SimulationConfig::default(),
            breakpoints: HashSet::new(),
            stop: StopHandle::default(),
            steps_since_tick: 0,
        }
    }

    pub fn from_config(chip: &msp430emu_config::ChipDescriptor) -> anyhow::Result<Self> {
        let logger = Arc::new(EmulationLogger::from_config(&chip.warnings)?);
        let bus = bus::SystemBus::from_config(chip, logger.clone())?;
        let config = config::SimulationConfig::from_descriptor(chip);
        let cpu = Msp430::new(config.cpu.clone(), ChipCore::new("cpu", logger));
        let mut machine = Self::new(cpu, bus);
        machine.config = config;
        Ok(machine)
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn set_profiler(&mut self, profiler: Box<dyn Profiler>) {
        self.profiler = Some(profiler);
    }

    /// The attached profiler, if it is a `T`.
    pub fn profiler_as<T: Any>(&self) -> Option<&T> {
        self.profiler.as_deref()?.as_any()?.downcast_ref::<T>()
    }

    pub fn load_firmware(&mut self, image: &ProgramImage) -> SimResult<()> {
        self.bus.load_image(image)?;
        self.symbols = image.symbols.clone();

        for observer in &self.observers {
            observer.on_simulation_start();
        }
        self.reset()?;

        // Fallback if the reset vector is blank
        if self.cpu.pc() == 0 || self.cpu.pc() == 0xFFFF {
            if let Some(entry) = image.entry_point {
                self.cpu.set_pc(entry);
            }
        }

        Ok(())
    }

    pub fn reset(&mut self) -> SimResult<()> {
        self.steps_since_tick = 0;
        self.bus.reset();
        if let Some(profiler) = self.profiler.as_deref_mut() {
            profiler.reset_profile();
        }
        self.cpu.reset(&mut self.bus)
    }

    pub fn step(&mut self) -> SimResult<StepReport> {
        if !self.observers.is_empty() {
            let pc = self.cpu.pc();
            let opcode = self.bus.peek(pc, AccessMode::Word) as u16;
            for observer in &self.observers {
                observer.on_step_start(pc, opcode);
            }
        }

        let report = self.cpu.step(&mut self.bus)?;

        if let Some(profiler) = self.profiler.as_deref_mut() {
            if let Some(event) = &report.event {
                profiler.on_cpu_event(event, self.bus.cycles);
            }
            profiler.observe_stack(self.cpu.sp());
        }

        for observer in &self.observers {
            match report.kind {
                StepKind::Idle => observer.on_idle(report.cycles),
                StepKind::Interrupt { vector } => observer.on_interrupt(vector, self.bus.cycles),
                StepKind::Executed { .. } => {}
            }
            observer.on_step_end(report.cycles);
        }

        self.steps_since_tick += 1;
        if self.steps_since_tick >= self.config.peripheral_tick_interval.max(1) {
            self.steps_since_tick = 0;
            self.bus.tick_peripherals()?;
        }

        Ok(report)
    }

    /// Runs until the cycle counter reaches `cycles` or a stop is requested.
    pub fn run_for_cycles(&mut self, cycles: u64) -> SimResult<StopReason> {
        let target = self.bus.cycles.saturating_add(cycles);
        while self.bus.cycles < target {
            if self.stop.take() {
                return Ok(StopReason::ManualStop);
            }
            self.step()?;
        }
        Ok(StopReason::MaxStepsReached)
    }

    pub fn snapshot(&self) -> snapshot::MachineSnapshot {
        snapshot::MachineSnapshot {
            cpu: self.cpu.snapshot(self.bus.cycles),
            interrupts: self.bus.interrupts.snapshot(),
            peripherals: self
                .bus
                .peripherals
                .iter()
                .map(|p| (p.name.clone(), p.dev.snapshot()))
                .collect(),
        }
    }

    pub fn peek_peripheral(&self, name: &str) -> Option<serde_json::Value> {
        self.bus
            .peripherals
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.dev.snapshot())
    }

    /// Last function call event observed by the profiler, resolved against the loaded symbols.
    pub fn current_function(&self) -> Option<&str> {
        let profiler = self.profiler.as_deref()?;
        let frame = profiler.current_function()?;
        self.symbols.function_at(frame).map(|s| s.name.as_str())
    }
}

impl DebugControl for Machine {
    fn add_breakpoint(&mut self, addr: u32) {
        self.breakpoints.insert(addr & !1);
    }

    fn remove_breakpoint(&mut self, addr: u32) {
        self.breakpoints.remove(&(addr & !1));
    }

    fn clear_breakpoints(&mut self) {
        self.breakpoints.clear();
    }

    fn run(&mut self, max_steps: Option<u32>) -> SimResult<StopReason> {
        for observer in &self.observers {
            observer.on_simulation_start();
        }
        let mut steps = 0u32;
        let reason = loop {
            if self.stop.take() {
                break StopReason::ManualStop;
            }

            // The instruction at the resume address always executes once.
            let pc = self.cpu.pc();
            if steps > 0 && self.breakpoints.contains(&pc) {
                break StopReason::Breakpoint(pc);
            }

            if let Err(e) = self.step() {
                for observer in &self.observers {
                    observer.on_simulation_stop();
                }
                return Err(e);
            }
            steps += 1;

            if let Some(max) = max_steps {
                if steps >= max {
                    break StopReason::MaxStepsReached;
                }
            }
        };
        for observer in &self.observers {
            observer.on_simulation_stop();
        }
        Ok(reason)
    }

    fn step_single(&mut self) -> SimResult<StopReason> {
        self.step()?;
        Ok(StopReason::StepDone)
    }

    fn read_core_reg(&self, id: u8) -> u32 {
        self.cpu.register(id)
    }

    fn write_core_reg(&mut self, id: u8, val: u32) {
        self.cpu.set_register(id, val);
    }

    fn read_memory(&self, addr: u32, len: usize) -> SimResult<Vec<u8>> {
        let mut data = Vec::with_capacity(len);
        for i in 0..len as u32 {
            let a = addr.checked_add(i).ok_or(SimulationError::MemoryViolation(addr))?;
            if !self.bus.memory.contains(a, 1) {
                return Err(SimulationError::MemoryViolation(a));
            }
            data.push(self.bus.peek(a, AccessMode::Byte) as u8);
        }
        Ok(data)
    }

    fn write_memory(&mut self, addr: u32, data: &[u8]) -> SimResult<()> {
        for (i, byte) in data.iter().enumerate() {
            let a = addr + i as u32;
            if !self.bus.memory.write_u8(a, *byte) {
                return Err(SimulationError::MemoryViolation(a));
            }
        }
        Ok(())
    }

    fn get_pc(&self) -> u32 {
        self.cpu.pc()
    }

    fn set_pc(&mut self, addr: u32) {
        self.cpu.set_pc(addr);
    }

    fn get_register_names(&self) -> Vec<String> {
        self.cpu.register_names()
    }

    fn get_cycle_count(&self) -> u64 {
        self.bus.cycles
    }

    fn reset(&mut self) -> SimResult<()> {
        Machine::reset(self)
    }
}
