// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Warning channel shared by the bus, the CPU and every peripheral.

use crate::events::ListenerList;
use crate::{SimResult, SimulationError};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

pub use msp430emu_config::WarningMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    EmulationError,
    IllegalExecution,
    MisalignedRead,
    MisalignedWrite,
    AddressOutOfBoundsRead,
    AddressOutOfBoundsWrite,
    IllegalIoWrite,
    VoidIoRead,
    VoidIoWrite,
}

impl WarningKind {
    pub const ALL: [WarningKind; 9] = [
        WarningKind::EmulationError,
        WarningKind::IllegalExecution,
        WarningKind::MisalignedRead,
        WarningKind::MisalignedWrite,
        WarningKind::AddressOutOfBoundsRead,
        WarningKind::AddressOutOfBoundsWrite,
        WarningKind::IllegalIoWrite,
        WarningKind::VoidIoRead,
        WarningKind::VoidIoWrite,
    ];

    pub fn name(self) -> &'static str {
        match self {
            WarningKind::EmulationError => "emulation_error",
            WarningKind::IllegalExecution => "illegal_execution",
            WarningKind::MisalignedRead => "misaligned_read",
            WarningKind::MisalignedWrite => "misaligned_write",
            WarningKind::AddressOutOfBoundsRead => "address_out_of_bounds_read",
            WarningKind::AddressOutOfBoundsWrite => "address_out_of_bounds_write",
            WarningKind::IllegalIoWrite => "illegal_io_write",
            WarningKind::VoidIoRead => "void_io_read",
            WarningKind::VoidIoWrite => "void_io_write",
        }
    }
}

impl fmt::Display for WarningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for WarningKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let v = value.trim().to_ascii_lowercase().replace('-', "_");
        WarningKind::ALL
            .iter()
            .copied()
            .find(|k| k.name() == v)
            .ok_or_else(|| format!("unknown warning kind '{}'", value))
    }
}

/// Receives every informational log line and every warning, whatever the mode.
pub trait LogListener: Send + Sync {
    fn log(&self, source: &str, message: &str);
    fn warning(&self, source: &str, kind: WarningKind, message: &str);
}

static DEFAULT_MODE: OnceLock<WarningMode> = OnceLock::new();

/// Sets the process-wide default warning mode. Only the first call has an effect.
pub fn init_warning_mode(mode: WarningMode) -> bool {
    DEFAULT_MODE.set(mode).is_ok()
}

pub fn default_warning_mode() -> WarningMode {
    DEFAULT_MODE.get().copied().unwrap_or_default()
}

#[derive(Debug)]
pub struct EmulationLogger {
    mode: WarningMode,
    overrides: HashMap<WarningKind, WarningMode>,
    listeners: ListenerList<dyn LogListener>,
}

impl Default for EmulationLogger {
    fn default() -> Self {
        Self::new(default_warning_mode())
    }
}

impl EmulationLogger {
    pub fn new(mode: WarningMode) -> Self {
        Self {
            mode,
            overrides: HashMap::new(),
            listeners: ListenerList::new(),
        }
    }

    pub fn shared(mode: WarningMode) -> Arc<Self> {
        Arc::new(Self::new(mode))
    }

    pub fn with_override(mut self, kind: WarningKind, mode: WarningMode) -> Self {
        self.overrides.insert(kind, mode);
        self
    }

    pub fn from_config(config: &msp430emu_config::WarningConfig) -> anyhow::Result<Self> {
        let mut logger = Self::new(config.mode.unwrap_or_else(default_warning_mode));
        for (name, mode) in &config.overrides {
            let kind = WarningKind::from_str(name).map_err(|e| anyhow::anyhow!(e))?;
            logger.overrides.insert(kind, *mode);
        }
        Ok(logger)
    }

    pub fn mode(&self) -> WarningMode {
        self.mode
    }

    pub fn mode_for(&self, kind: WarningKind) -> WarningMode {
        self.overrides.get(&kind).copied().unwrap_or(self.mode)
    }

    pub fn listeners(&self) -> &ListenerList<dyn LogListener> {
        &self.listeners
    }

    pub fn add_listener(&self, listener: Arc<dyn LogListener>) -> bool {
        self.listeners.add(listener)
    }

    pub fn remove_listener(&self, listener: &Arc<dyn LogListener>) -> bool {
        self.listeners.remove(listener)
    }

    pub fn log(&self, source: &str, message: &str) {
        tracing::debug!("{}: {}", source, message);
        self.listeners.notify(|l| l.log(source, message));
    }

    /// Reports `kind`. Returns `Err` only when the kind is configured to raise.
    pub fn logw(&self, source: &str, kind: WarningKind, message: &str) -> SimResult<()> {
        let mode = self.mode_for(kind);
        self.listeners.notify(|l| l.warning(source, kind, message));
        match mode {
            WarningMode::Silent => Ok(()),
            WarningMode::Print => {
                tracing::warn!("{}: {} {}", source, kind, message);
                Ok(())
            }
            WarningMode::Raise => {
                tracing::error!("{}: {} {}", source, kind, message);
                Err(SimulationError::Warning {
                    kind,
                    message: format!("{}: {}", source, message),
                })
            }
        }
    }
}
