// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Common state carried by every peripheral and by the CPU: operating mode,
//! state and configuration tracking with change notifications, named events
//! and a logging sink.

use crate::events::ListenerList;
use crate::logging::{EmulationLogger, WarningKind};
use crate::SimResult;
use std::sync::Arc;

pub trait OperatingModeListener: Send + Sync {
    fn mode_changed(&self, source: &str, mode: usize);
}

pub trait StateChangeListener: Send + Sync {
    fn state_changed(&self, source: &str, old_state: i32, new_state: i32);
}

pub trait ConfigurationChangeListener: Send + Sync {
    fn configuration_changed(&self, source: &str, parameter: u32, old_value: i32, new_value: i32);
}

pub trait EventListener: Send + Sync {
    fn event(&self, source: &str, event: &ChipEvent);
}

impl<F: Fn(&str, usize) + Send + Sync> OperatingModeListener for F {
    fn mode_changed(&self, source: &str, mode: usize) {
        self(source, mode)
    }
}

impl<F: Fn(&str, i32, i32) + Send + Sync> StateChangeListener for F {
    fn state_changed(&self, source: &str, old_state: i32, new_state: i32) {
        self(source, old_state, new_state)
    }
}

impl<F: Fn(&str, u32, i32, i32) + Send + Sync> ConfigurationChangeListener for F {
    fn configuration_changed(&self, source: &str, parameter: u32, old_value: i32, new_value: i32) {
        self(source, parameter, old_value, new_value)
    }
}

impl<F: Fn(&str, &ChipEvent) + Send + Sync> EventListener for F {
    fn event(&self, source: &str, event: &ChipEvent) {
        self(source, event)
    }
}

/// A named event published by a chip, e.g. `"TX"` with the transmitted byte.
#[derive(Debug, Clone, PartialEq)]
pub struct ChipEvent {
    pub name: String,
    pub data: serde_json::Value,
    pub cycles: u64,
}

#[derive(Debug)]
pub struct ChipCore {
    id: String,
    name: String,
    mode: usize,
    mode_names: Vec<String>,
    state: i32,
    logger: Arc<EmulationLogger>,
    mode_listeners: Arc<ListenerList<dyn OperatingModeListener>>,
    state_listeners: Arc<ListenerList<dyn StateChangeListener>>,
    config_listeners: Arc<ListenerList<dyn ConfigurationChangeListener>>,
    event_listeners: Arc<ListenerList<dyn EventListener>>,
}

impl ChipCore {
    pub fn new(id: impl Into<String>, logger: Arc<EmulationLogger>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            mode: 0,
            mode_names: Vec::new(),
            state: 0,
            logger,
            mode_listeners: Arc::new(ListenerList::new()),
            state_listeners: Arc::new(ListenerList::new()),
            config_listeners: Arc::new(ListenerList::new()),
            event_listeners: Arc::new(ListenerList::new()),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_modes(mut self, names: &[&str]) -> Self {
        self.mode_names = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn logger(&self) -> &Arc<EmulationLogger> {
        &self.logger
    }

    pub fn mode(&self) -> usize {
        self.mode
    }

    pub fn mode_name(&self) -> Option<&str> {
        self.mode_names.get(self.mode).map(String::as_str)
    }

    pub fn mode_names(&self) -> &[String] {
        &self.mode_names
    }

    pub fn mode_max(&self) -> usize {
        self.mode_names.len().saturating_sub(1)
    }

    /// Resolves a mode by name, or by number when it is within range.
    pub fn mode_by_name(&self, name: &str) -> Option<usize> {
        if let Some(idx) = self
            .mode_names
            .iter()
            .position(|n| n.eq_ignore_ascii_case(name))
        {
            return Some(idx);
        }
        match name.trim().parse::<usize>() {
            Ok(mode) if mode <= self.mode_max() => Some(mode),
            _ => None,
        }
    }

    /// Updates the mode. Listeners fire only when the value actually changes.
    pub fn set_mode(&mut self, mode: usize) -> bool {
        if self.mode == mode {
            return false;
        }
        self.mode = mode;
        let id = self.id.as_str();
        self.mode_listeners.notify(|l| l.mode_changed(id, mode));
        true
    }

    pub fn state(&self) -> i32 {
        self.state
    }

    pub fn state_changed(&mut self, new_state: i32) -> bool {
        if self.state == new_state {
            return false;
        }
        let old = self.state;
        self.state = new_state;
        let id = self.id.as_str();
        self.state_listeners
            .notify(|l| l.state_changed(id, old, new_state));
        true
    }

    /// Configuration values are owned by the peripheral; only actual changes are published.
    pub fn configuration_changed(&self, parameter: u32, old_value: i32, new_value: i32) -> bool {
        if old_value == new_value {
            return false;
        }
        let id = self.id.as_str();
        self.config_listeners
            .notify(|l| l.configuration_changed(id, parameter, old_value, new_value));
        true
    }

    pub fn emit_event(&self, name: &str, data: serde_json::Value, cycles: u64) {
        if self.event_listeners.is_empty() {
            return;
        }
        let event = ChipEvent {
            name: name.to_string(),
            data,
            cycles,
        };
        let id = self.id.as_str();
        self.event_listeners.notify(|l| l.event(id, &event));
    }

    pub fn mode_listeners(&self) -> &Arc<ListenerList<dyn OperatingModeListener>> {
        &self.mode_listeners
    }

    pub fn state_listeners(&self) -> &Arc<ListenerList<dyn StateChangeListener>> {
        &self.state_listeners
    }

    pub fn config_listeners(&self) -> &Arc<ListenerList<dyn ConfigurationChangeListener>> {
        &self.config_listeners
    }

    pub fn event_listeners(&self) -> &Arc<ListenerList<dyn EventListener>> {
        &self.event_listeners
    }

    pub fn add_operating_mode_listener(&self, l: Arc<dyn OperatingModeListener>) -> bool {
        self.mode_listeners.add(l)
    }

    pub fn remove_operating_mode_listener(&self, l: &Arc<dyn OperatingModeListener>) -> bool {
        self.mode_listeners.remove(l)
    }

    pub fn add_state_change_listener(&self, l: Arc<dyn StateChangeListener>) -> bool {
        self.state_listeners.add(l)
    }

    pub fn remove_state_change_listener(&self, l: &Arc<dyn StateChangeListener>) -> bool {
        self.state_listeners.remove(l)
    }

    pub fn add_configuration_change_listener(
        &self,
        l: Arc<dyn ConfigurationChangeListener>,
    ) -> bool {
        self.config_listeners.add(l)
    }

    pub fn remove_configuration_change_listener(
        &self,
        l: &Arc<dyn ConfigurationChangeListener>,
    ) -> bool {
        self.config_listeners.remove(l)
    }

    pub fn add_event_listener(&self, l: Arc<dyn EventListener>) -> bool {
        self.event_listeners.add(l)
    }

    pub fn remove_event_listener(&self, l: &Arc<dyn EventListener>) -> bool {
        self.event_listeners.remove(l)
    }

    pub fn log(&self, message: &str) {
        self.logger.log(&self.id, message);
    }

    pub fn logw(&self, kind: WarningKind, message: &str) -> SimResult<()> {
        self.logger.logw(&self.id, kind, message)
    }
}
