// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::registry::{ComponentRegistry, ServiceComponent, ServiceStatus};
use crate::SimulationObserver;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Execution counters. Counting only happens while the service is started.
#[derive(Debug)]
pub struct PerformanceMetrics {
    name: Mutex<String>,
    running: AtomicBool,
    steps: AtomicU64,
    cycle_count: AtomicU64,
    interrupt_count: AtomicU64,
    idle_steps: AtomicU64,
    low_power_cycles: AtomicU64,
    started_at: Mutex<Option<Instant>>,
    elapsed: Mutex<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricsReport {
    pub instructions: u64,
    pub cycles: u64,
    pub interrupts: u64,
    pub low_power_cycles: u64,
    pub instructions_per_second: f64,
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PerformanceMetrics {
    pub fn new() -> Self {
        Self {
            name: Mutex::new("metrics".to_string()),
            running: AtomicBool::new(false),
            steps: AtomicU64::new(0),
            cycle_count: AtomicU64::new(0),
            interrupt_count: AtomicU64::new(0),
            idle_steps: AtomicU64::new(0),
            low_power_cycles: AtomicU64::new(0),
            started_at: Mutex::new(None),
            elapsed: Mutex::new(Duration::ZERO),
        }
    }

    pub fn reset(&self) {
        self.steps.store(0, Ordering::SeqCst);
        self.cycle_count.store(0, Ordering::SeqCst);
        self.interrupt_count.store(0, Ordering::SeqCst);
        self.idle_steps.store(0, Ordering::SeqCst);
        self.low_power_cycles.store(0, Ordering::SeqCst);
        if let Ok(mut e) = self.elapsed.lock() {
            *e = Duration::ZERO;
        }
        if let Ok(mut s) = self.started_at.lock() {
            if s.is_some() {
                *s = Some(Instant::now());
            }
        }
    }

    fn counting(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Executed instructions; interrupt entries and idle cycles are not counted.
    pub fn get_instructions(&self) -> u64 {
        let steps = self.steps.load(Ordering::SeqCst);
        steps
            .saturating_sub(self.interrupt_count.load(Ordering::SeqCst))
            .saturating_sub(self.idle_steps.load(Ordering::SeqCst))
    }

    pub fn get_cycles(&self) -> u64 {
        self.cycle_count.load(Ordering::SeqCst)
    }

    pub fn get_interrupts(&self) -> u64 {
        self.interrupt_count.load(Ordering::SeqCst)
    }

    pub fn get_low_power_cycles(&self) -> u64 {
        self.low_power_cycles.load(Ordering::SeqCst)
    }

    fn wall_time(&self) -> Duration {
        let accumulated = self.elapsed.lock().map(|e| *e).unwrap_or_default();
        let current = self
            .started_at
            .lock()
            .ok()
            .and_then(|s| s.map(|t| t.elapsed()))
            .unwrap_or_default();
        accumulated + current
    }

    pub fn get_ips(&self) -> f64 {
        let elapsed = self.wall_time().as_secs_f64();
        if elapsed > 0.0 {
            self.get_instructions() as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn report(&self) -> MetricsReport {
        MetricsReport {
            instructions: self.get_instructions(),
            cycles: self.get_cycles(),
            interrupts: self.get_interrupts(),
            low_power_cycles: self.get_low_power_cycles(),
            instructions_per_second: self.get_ips(),
        }
    }
}

impl SimulationObserver for PerformanceMetrics {
    fn on_step_end(&self, cycles: u32) {
        if !self.counting() {
            return;
        }
        self.steps.fetch_add(1, Ordering::SeqCst);
        self.cycle_count.fetch_add(cycles as u64, Ordering::SeqCst);
    }

    fn on_interrupt(&self, _vector: u8, _cycles: u64) {
        if self.counting() {
            self.interrupt_count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn on_idle(&self, cycles: u32) {
        if self.counting() {
            self.idle_steps.fetch_add(1, Ordering::SeqCst);
            self.low_power_cycles
                .fetch_add(cycles as u64, Ordering::SeqCst);
        }
    }
}

impl ServiceComponent for PerformanceMetrics {
    fn name(&self) -> String {
        self.name
            .lock()
            .map(|n| n.clone())
            .unwrap_or_default()
    }

    fn status(&self) -> ServiceStatus {
        if self.counting() {
            ServiceStatus::Started
        } else {
            ServiceStatus::Stopped
        }
    }

    fn init(&self, name: &str, _registry: &ComponentRegistry) {
        if let Ok(mut n) = self.name.lock() {
            *n = name.to_string();
        }
    }

    fn start(&self) {
        if let Ok(mut s) = self.started_at.lock() {
            *s = Some(Instant::now());
        }
        self.running.store(true, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let run = self
            .started_at
            .lock()
            .ok()
            .and_then(|mut s| s.take())
            .map(|t| t.elapsed())
            .unwrap_or_default();
        if let Ok(mut e) = self.elapsed.lock() {
            *e += run;
        }
        tracing::debug!(
            "{} stopped: {} instructions, {} cycles",
            self.name(),
            self.get_instructions(),
            self.get_cycles()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_only_while_started() {
        let m = PerformanceMetrics::new();
        m.on_step_end(3);
        assert_eq!(m.get_cycles(), 0);

        m.start();
        m.on_step_end(3);
        m.on_step_end(2);
        m.on_interrupt(9, 100);
        m.on_step_end(6);
        m.on_idle(1);
        m.on_step_end(1);
        m.stop();
        m.on_step_end(4);

        let r = m.report();
        assert_eq!(r.instructions, 2);
        assert_eq!(r.cycles, 12);
        assert_eq!(r.interrupts, 1);
        assert_eq!(r.low_power_cycles, 1);
        assert_eq!(m.status(), ServiceStatus::Stopped);
    }

    #[test]
    fn test_registered_as_service() {
        let registry = ComponentRegistry::new();
        let m = std::sync::Arc::new(PerformanceMetrics::new());
        registry.register_service("perf", m.clone());
        assert_eq!(m.name(), "perf");
        registry.start();
        assert_eq!(m.status(), ServiceStatus::Started);
        m.reset();
        assert_eq!(m.get_instructions(), 0);
    }
}
