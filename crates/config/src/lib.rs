// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Default schema version for YAML configs
fn default_schema_version() -> String {
    "1.0".to_string()
}

fn default_max_interrupt_vector() -> u8 {
    15
}

fn default_memory_size() -> String {
    "64KiB".to_string()
}

fn default_io_range() -> MemoryRange {
    MemoryRange {
        base: 0,
        size: "512B".to_string(),
    }
}

/// How the warning channel reacts to a reported condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarningMode {
    /// Swallow the condition.
    Silent,
    /// Log the condition and continue.
    #[default]
    Print,
    /// Abort the current operation.
    #[serde(alias = "exception", alias = "fatal")]
    Raise,
}

/// Order in which simultaneously pending vectors are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptPriority {
    /// MSP430 convention: the vector closest to reset wins.
    #[default]
    HighVectorFirst,
    LowVectorFirst,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CpuDescriptor {
    /// Enables the MSP430X 20-bit extension (extension words, address instructions).
    #[serde(default)]
    pub extended: bool,
    /// Highest vector number; this vector is the reset vector at 0xFFFE.
    #[serde(default = "default_max_interrupt_vector")]
    pub max_interrupt_vector: u8,
    #[serde(default)]
    pub interrupt_priority: InterruptPriority,
    /// Vectors accepted even when GIE is clear.
    #[serde(default)]
    pub non_maskable: Vec<u8>,
}

impl Default for CpuDescriptor {
    fn default() -> Self {
        Self {
            extended: false,
            max_interrupt_vector: default_max_interrupt_vector(),
            interrupt_priority: InterruptPriority::default(),
            non_maskable: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct MemoryRange {
    pub base: u32,
    pub size: String, // e.g. "48KiB"
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MemoryDescriptor {
    /// Total size of the linear address space.
    #[serde(default = "default_memory_size")]
    pub size: String,
    /// Window reserved for peripheral registers; unmapped addresses inside it are void I/O.
    #[serde(default = "default_io_range")]
    pub io: MemoryRange,
    /// Read-only regions. Everything that is neither flash nor a peripheral is RAM.
    #[serde(default)]
    pub flash: Vec<MemoryRange>,
}

impl Default for MemoryDescriptor {
    fn default() -> Self {
        Self {
            size: default_memory_size(),
            io: default_io_range(),
            flash: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct WarningConfig {
    /// Unset means the process-wide default chosen at startup.
    #[serde(default)]
    pub mode: Option<WarningMode>,
    /// Per-kind overrides keyed by kind name, e.g. `void_io_read: silent`.
    #[serde(default)]
    pub overrides: HashMap<String, WarningMode>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PeripheralConfig {
    pub id: String,
    pub r#type: String, // "dma", "multiplier", "usart", "gpio"
    pub base_address: u32,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub vector: Option<u8>,
    #[serde(default)]
    pub config: HashMap<String, serde_yaml::Value>,
}

impl PeripheralConfig {
    pub fn config_u32(&self, key: &str) -> Option<u32> {
        self.config
            .get(key)
            .and_then(|v| v.as_u64())
            .and_then(|v| u32::try_from(v).ok())
    }

    pub fn config_bool(&self, key: &str) -> Option<bool> {
        self.config.get(key).and_then(|v| v.as_bool())
    }
}

/// Binds a DMA trigger select value to a `(peripheral, trigger index)` pair.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct DmaTriggerConfig {
    pub select: u8,
    pub source: String,
    #[serde(default)]
    pub index: u8,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChipDescriptor {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    pub name: String,
    #[serde(default)]
    pub cpu: CpuDescriptor,
    #[serde(default)]
    pub memory: MemoryDescriptor,
    #[serde(default)]
    pub warnings: WarningConfig,
    #[serde(default)]
    pub peripherals: Vec<PeripheralConfig>,
    #[serde(default)]
    pub dma_triggers: Vec<DmaTriggerConfig>,
}

impl ChipDescriptor {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read chip descriptor {:?}", path))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let desc: Self =
            serde_yaml::from_str(content).context("Failed to parse Chip Descriptor YAML")?;
        tracing::debug!(
            "Loaded chip descriptor '{}' with {} peripherals",
            desc.name,
            desc.peripherals.len()
        );
        Ok(desc)
    }

    pub fn peripheral(&self, id: &str) -> Option<&PeripheralConfig> {
        self.peripherals.iter().find(|p| p.id == id)
    }
}

pub fn parse_size(size_str: &str) -> Result<u64> {
    use human_size::{Byte, Size, SpecificSize};

    let s: Size = size_str
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid size format '{}': {}", size_str, e))?;
    let bytes: SpecificSize<Byte> = s.into();
    Ok(bytes.value() as u64)
}
