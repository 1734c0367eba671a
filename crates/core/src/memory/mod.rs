// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub start_addr: u32,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Function,
    Variable,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub address: u32,
    pub size: u32,
    pub kind: SymbolKind,
}

/// Name lookup used when reporting profiles and stack traces.
pub trait SymbolLookup {
    fn function_name(&self, address: u32) -> Option<&str>;
}

/// Symbols indexed by address.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SymbolTable {
    by_address: BTreeMap<u32, Vec<Symbol>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, symbol: Symbol) {
        self.by_address
            .entry(symbol.address)
            .or_default()
            .push(symbol);
    }

    pub fn len(&self) -> usize {
        self.by_address.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty()
    }

    pub fn by_name(&self, name: &str) -> Option<&Symbol> {
        self.by_address.values().flatten().find(|s| s.name == name)
    }

    /// The function symbol starting at `address`, if any.
    pub fn function_at(&self, address: u32) -> Option<&Symbol> {
        self.by_address
            .get(&address)?
            .iter()
            .find(|s| s.kind == SymbolKind::Function)
    }

    /// The function whose `[address, address + size)` range contains `address`.
    pub fn function_containing(&self, address: u32) -> Option<&Symbol> {
        self.by_address
            .range(..=address)
            .rev()
            .flat_map(|(_, syms)| syms.iter())
            .find(|s| {
                s.kind == SymbolKind::Function
                    && (s.address == address || address < s.address.saturating_add(s.size))
            })
    }
}

impl SymbolLookup for SymbolTable {
    fn function_name(&self, address: u32) -> Option<&str> {
        self.function_at(address).map(|s| s.name.as_str())
    }
}

/// Initial memory contents and optional symbols produced by a firmware loader.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgramImage {
    /// Used when the reset vector is blank.
    pub entry_point: Option<u32>,
    pub segments: Vec<Segment>,
    pub symbols: SymbolTable,
}

impl ProgramImage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry_point(mut self, entry_point: u32) -> Self {
        self.entry_point = Some(entry_point);
        self
    }

    pub fn add_segment(&mut self, start_addr: u32, data: Vec<u8>) {
        self.segments.push(Segment { start_addr, data });
    }

    /// Adds a segment from little-endian 16-bit words.
    pub fn add_words(&mut self, start_addr: u32, words: &[u16]) {
        let data = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        self.add_segment(start_addr, data);
    }

    pub fn add_symbol(&mut self, name: &str, address: u32, size: u32, kind: SymbolKind) {
        self.symbols.insert(Symbol {
            name: name.to_string(),
            address,
            size,
            kind,
        });
    }
}

/// A simple flat memory storage
#[derive(Debug, Clone)]
pub struct LinearMemory {
    pub data: Vec<u8>,
}

impl LinearMemory {
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0; size],
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn contains(&self, addr: u32, len: u32) -> bool {
        (addr as u64) + (len as u64) <= self.data.len() as u64
    }

    pub fn read_u8(&self, addr: u32) -> Option<u8> {
        self.data.get(addr as usize).copied()
    }

    pub fn write_u8(&mut self, addr: u32, value: u8) -> bool {
        match self.data.get_mut(addr as usize) {
            Some(cell) => {
                *cell = value;
                true
            }
            None => false,
        }
    }

    pub fn read_u16(&self, addr: u32) -> Option<u16> {
        let lo = self.read_u8(addr)?;
        let hi = self.read_u8(addr.checked_add(1)?)?;
        Some(u16::from_le_bytes([lo, hi]))
    }

    pub fn write_u16(&mut self, addr: u32, value: u16) -> bool {
        if !self.contains(addr, 2) {
            return false;
        }
        let [lo, hi] = value.to_le_bytes();
        self.data[addr as usize] = lo;
        self.data[addr as usize + 1] = hi;
        true
    }

    pub fn load_from_segment(&mut self, segment: &Segment) -> bool {
        if !self.contains(segment.start_addr, segment.data.len() as u32) {
            return false;
        }
        let offset = segment.start_addr as usize;
        self.data[offset..offset + segment.data.len()].copy_from_slice(&segment.data);
        true
    }
}
