// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Call and interrupt profiling driven by CPU control-flow events.
//!
//! Functions are keyed by entry address; names are resolved through a
//! [`SymbolLookup`] only when a report is produced.

use crate::chip::{ChipCore, ChipEvent, EventListener};
use crate::cpu::CpuEvent;
use crate::events::ListenerList;
use crate::memory::SymbolLookup;
use serde::Serialize;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

pub trait Profiler: fmt::Debug + Send {
    /// Function `entry` called from `from`; `sp` is the stack pointer after
    /// the return address was pushed.
    fn profile_call(&mut self, entry: u32, cycles: u64, from: u32, sp: u32);
    fn profile_return(&mut self, cycles: u64);
    fn profile_interrupt(&mut self, vector: u8, cycles: u64);
    fn profile_reti(&mut self, cycles: u64);

    /// Stack pointer after each step, for stack usage tracking.
    fn observe_stack(&mut self, _sp: u32) {}

    /// Drops statistics and the call stack.
    fn reset_profile(&mut self);

    /// Drops statistics; calls in progress are not counted when they return.
    fn clear_profile(&mut self);

    /// Entry address of the innermost active function.
    fn current_function(&self) -> Option<u32>;

    fn as_any(&self) -> Option<&dyn Any> {
        None
    }

    fn on_cpu_event(&mut self, event: &CpuEvent, cycles: u64) {
        match *event {
            CpuEvent::Call { from, target, sp } => self.profile_call(target, cycles, from, sp),
            CpuEvent::Return => self.profile_return(cycles),
            CpuEvent::InterruptEntry { vector, .. } => self.profile_interrupt(vector, cycles),
            CpuEvent::InterruptReturn => self.profile_reti(cycles),
        }
    }
}

/// One active function on the profiler call stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallFrame {
    pub function: u32,
    pub from: u32,
    pub entry_cycles: u64,
    /// Entry cycles plus time spent in callees.
    exclusive_base: u64,
    /// Nesting below an ignored function; 0 means visible.
    pub hide: u32,
    counted: bool,
    stack_start: u32,
    saved_stack_low: u32,
}

pub trait CallListener: Send + Sync {
    fn function_call(&self, frame: &CallFrame);
    fn function_return(&self, frame: &CallFrame, elapsed: u64);
}

impl<F: Fn(&CallFrame, Option<u64>) + Send + Sync> CallListener for F {
    fn function_call(&self, frame: &CallFrame) {
        self(frame, None)
    }

    fn function_return(&self, frame: &CallFrame, elapsed: u64) {
        self(frame, Some(elapsed))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FunctionStats {
    pub calls: u64,
    pub cycles: u64,
    pub exclusive_cycles: u64,
    /// Deepest stack usage in bytes observed during one call.
    pub max_stack: u32,
    pub callers: HashMap<u32, u64>,
}

impl FunctionStats {
    pub fn average(&self) -> u64 {
        if self.calls > 0 {
            self.cycles / self.calls
        } else {
            0
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InterruptStats {
    pub count: u64,
    pub cycles: u64,
}

impl InterruptStats {
    pub fn average(&self) -> u64 {
        if self.count > 0 {
            self.cycles / self.count
        } else {
            0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    Total,
    Exclusive,
    Calls,
    Average,
    Name,
}

impl FromStr for SortKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "total" | "cycles" => Ok(SortKey::Total),
            "exclusive" => Ok(SortKey::Exclusive),
            "calls" => Ok(SortKey::Calls),
            "average" => Ok(SortKey::Average),
            "name" | "function" => Ok(SortKey::Name),
            other => anyhow::bail!("Unknown profile sort key '{}'", other),
        }
    }
}

/// A row of the function profile, with the name resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfileEntry {
    pub function: u32,
    pub name: String,
    pub calls: u64,
    pub average: u64,
    pub cycles: u64,
    pub exclusive_cycles: u64,
    pub max_stack: u32,
    /// (caller name, calls) sorted by count.
    pub callers: Vec<(String, u64)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackTraceEntry {
    pub function: u32,
    pub name: String,
    pub from: u32,
    pub elapsed: u64,
    /// Set on the frame that was interrupted by this vector.
    pub interrupted_by: Option<u8>,
}

#[derive(Debug, Clone, Copy)]
struct ActiveInterrupt {
    vector: u8,
    entry_cycles: u64,
    /// Call depth when the interrupt was accepted.
    depth: usize,
}

fn resolve_name(function: u32, lookup: Option<&dyn SymbolLookup>) -> String {
    lookup
        .and_then(|l| l.function_name(function))
        .map(str::to_string)
        .unwrap_or_else(|| format!("${:05x}", function))
}

#[derive(Debug, Default)]
pub struct SimpleProfiler {
    frames: Vec<CallFrame>,
    stats: HashMap<u32, FunctionStats>,
    interrupts: Vec<InterruptStats>,
    active_irqs: Vec<ActiveInterrupt>,
    new_irq: bool,

    stack_low: u32,
    lowest_sp: Option<u32>,

    log_calls: bool,
    hide_irq: bool,
    ignore: HashSet<u32>,

    call_listeners: Arc<ListenerList<dyn CallListener>>,
    tags: Arc<TagProfiler>,
}

impl SimpleProfiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Logs every call and return through `tracing`.
    pub fn set_call_logging(&mut self, enabled: bool) {
        self.log_calls = enabled;
    }

    /// Suppresses call logging while an interrupt is being serviced.
    pub fn set_hide_irq(&mut self, hide: bool) {
        self.hide_irq = hide;
    }

    /// Calls made from inside `function` are not logged.
    pub fn add_ignore_function(&mut self, function: u32) {
        self.ignore.insert(function);
    }

    pub fn add_call_listener(&self, listener: Arc<dyn CallListener>) -> bool {
        self.call_listeners.add(listener)
    }

    pub fn remove_call_listener(&self, listener: &Arc<dyn CallListener>) -> bool {
        self.call_listeners.remove(listener)
    }

    pub fn tags(&self) -> &Arc<TagProfiler> {
        &self.tags
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn frames(&self) -> &[CallFrame] {
        &self.frames
    }

    pub fn function_stats(&self, function: u32) -> Option<&FunctionStats> {
        self.stats.get(&function)
    }

    pub fn interrupt_stats(&self, vector: u8) -> InterruptStats {
        self.interrupts
            .get(vector as usize)
            .copied()
            .unwrap_or_default()
    }

    /// Innermost vector being serviced.
    pub fn serviced_interrupt(&self) -> Option<u8> {
        self.active_irqs.last().map(|irq| irq.vector)
    }

    /// Lowest stack pointer observed since the last reset.
    pub fn lowest_stack_pointer(&self) -> Option<u32> {
        self.lowest_sp
    }

    fn logging_visible(&self) -> bool {
        self.log_calls && (!self.hide_irq || self.active_irqs.is_empty())
    }

    fn indent(&self) -> usize {
        let base = self.active_irqs.last().map_or(0, |irq| irq.depth);
        self.frames.len().saturating_sub(base) * 2
    }

    fn irq_prefix(&self) -> String {
        self.serviced_interrupt()
            .map(|v| format!("[{:2}] ", v))
            .unwrap_or_default()
    }

    /// Function profile sorted by `sort`. `filter` keeps names containing it
    /// and drops the interrupt table from consideration.
    pub fn profile(
        &self,
        sort: SortKey,
        lookup: Option<&dyn SymbolLookup>,
        filter: Option<&str>,
    ) -> Vec<ProfileEntry> {
        let mut entries: Vec<ProfileEntry> = self
            .stats
            .iter()
            .filter(|(_, s)| s.calls > 0)
            .map(|(&function, s)| {
                let mut callers: Vec<(String, u64)> = s
                    .callers
                    .iter()
                    .map(|(&caller, &count)| (resolve_name(caller, lookup), count))
                    .collect();
                callers.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
                ProfileEntry {
                    function,
                    name: resolve_name(function, lookup),
                    calls: s.calls,
                    average: s.average(),
                    cycles: s.cycles,
                    exclusive_cycles: s.exclusive_cycles,
                    max_stack: s.max_stack,
                    callers,
                }
            })
            .filter(|e| filter.map_or(true, |f| f.is_empty() || e.name.contains(f)))
            .collect();

        entries.sort_by(|a, b| {
            let primary = match sort {
                SortKey::Total => b.cycles.cmp(&a.cycles),
                SortKey::Exclusive => b.exclusive_cycles.cmp(&a.exclusive_cycles),
                SortKey::Calls => b.calls.cmp(&a.calls),
                SortKey::Average => b.average.cmp(&a.average),
                SortKey::Name => a.name.cmp(&b.name),
            };
            primary.then_with(|| a.function.cmp(&b.function))
        });
        entries
    }

    /// Per-vector interrupt statistics for every vector seen so far.
    pub fn interrupt_profile(&self) -> Vec<(u8, InterruptStats)> {
        self.interrupts
            .iter()
            .enumerate()
            .map(|(v, s)| (v as u8, *s))
            .collect()
    }

    /// Active calls, innermost first.
    pub fn stack_trace(&self, lookup: Option<&dyn SymbolLookup>, cycles: u64) -> Vec<StackTraceEntry> {
        self.frames
            .iter()
            .enumerate()
            .rev()
            .map(|(i, frame)| StackTraceEntry {
                function: frame.function,
                name: resolve_name(frame.function, lookup),
                from: frame.from,
                elapsed: cycles.saturating_sub(frame.entry_cycles),
                interrupted_by: self
                    .active_irqs
                    .iter()
                    .find(|irq| irq.depth == i + 1)
                    .map(|irq| irq.vector),
            })
            .collect()
    }
}

impl Profiler for SimpleProfiler {
    fn profile_call(&mut self, entry: u32, cycles: u64, from: u32, sp: u32) {
        let mut hide = match self.frames.last() {
            Some(parent) if !self.new_irq => parent.hide,
            _ => 0,
        };
        if hide > 0 {
            hide += 1;
        } else {
            if self.logging_visible() {
                tracing::info!(
                    target: "msp430emu::profiler",
                    "{}{}Call to ${:05x}",
                    self.irq_prefix(),
                    " ".repeat(self.indent()),
                    entry
                );
            }
            if self.ignore.contains(&entry) {
                hide = 1;
            }
        }

        let frame = CallFrame {
            function: entry,
            from,
            entry_cycles: cycles,
            exclusive_base: cycles,
            hide,
            counted: true,
            stack_start: sp,
            saved_stack_low: self.stack_low,
        };
        self.stack_low = sp;
        self.new_irq = false;
        self.call_listeners.notify(|l| l.function_call(&frame));
        self.frames.push(frame);
    }

    fn profile_return(&mut self, cycles: u64) {
        self.new_irq = false;
        let Some(frame) = self.frames.pop() else {
            return;
        };
        let elapsed = cycles.saturating_sub(frame.entry_cycles);
        let exclusive = cycles.saturating_sub(frame.exclusive_base);
        let usage = frame.stack_start.saturating_sub(self.stack_low);
        self.stack_low = frame.saved_stack_low.min(self.stack_low);

        let caller = self.frames.last_mut().map(|parent| {
            parent.exclusive_base += elapsed;
            parent.function
        });
        if !frame.counted {
            return;
        }

        let stats = self.stats.entry(frame.function).or_default();
        stats.calls += 1;
        stats.cycles += elapsed;
        stats.exclusive_cycles += exclusive;
        stats.max_stack = stats.max_stack.max(usage);
        if let Some(caller) = caller {
            *stats.callers.entry(caller).or_insert(0) += 1;
        }

        if frame.hide <= 1 && self.logging_visible() {
            tracing::info!(
                target: "msp430emu::profiler",
                "{}{}return from ${:05x} elapsed: {} maxStackUsage: {}",
                self.irq_prefix(),
                " ".repeat(self.indent()),
                frame.function,
                elapsed,
                usage
            );
        }
        self.call_listeners
            .notify(|l| l.function_return(&frame, elapsed));
    }

    fn profile_interrupt(&mut self, vector: u8, cycles: u64) {
        self.active_irqs.push(ActiveInterrupt {
            vector,
            entry_cycles: cycles,
            depth: self.frames.len(),
        });
        self.new_irq = true;
        if self.log_calls && !self.hide_irq {
            tracing::info!(
                target: "msp430emu::profiler",
                "----- Interrupt vector {} start execution -----",
                vector
            );
        }
    }

    fn profile_reti(&mut self, cycles: u64) {
        self.new_irq = false;
        let Some(irq) = self.active_irqs.pop() else {
            return;
        };
        let elapsed = cycles.saturating_sub(irq.entry_cycles);
        let index = irq.vector as usize;
        if self.interrupts.len() <= index {
            self.interrupts.resize(index + 1, InterruptStats::default());
        }
        self.interrupts[index].count += 1;
        self.interrupts[index].cycles += elapsed;

        // Calls left open by the handler belong to it
        self.frames.truncate(irq.depth);

        if self.log_calls && !self.hide_irq {
            tracing::info!(
                target: "msp430emu::profiler",
                "----- Interrupt vector {} returned - elapsed: {}",
                irq.vector,
                elapsed
            );
        }
    }

    fn observe_stack(&mut self, sp: u32) {
        if sp < self.stack_low || self.frames.is_empty() {
            self.stack_low = sp;
        }
        if self.lowest_sp.map_or(true, |low| sp < low) {
            self.lowest_sp = Some(sp);
        }
    }

    fn reset_profile(&mut self) {
        self.clear_profile();
        self.frames.clear();
        self.active_irqs.clear();
        self.interrupts.clear();
        self.new_irq = false;
        self.lowest_sp = None;
        self.tags.clear();
    }

    fn clear_profile(&mut self) {
        self.stats.clear();
        for frame in &mut self.frames {
            frame.counted = false;
        }
    }

    fn current_function(&self) -> Option<u32> {
        self.frames.last().map(|f| f.function)
    }

    fn as_any(&self) -> Option<&dyn Any> {
        Some(self)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TagStats {
    pub calls: u64,
    pub cycles: u64,
    #[serde(skip)]
    started_at: Option<u64>,
}

#[derive(Debug, Default)]
struct TagState {
    tags: HashMap<String, TagStats>,
    start_events: HashMap<String, String>,
    end_events: HashMap<String, String>,
}

/// Measures time between named points, either called directly or bound to
/// chip events.
#[derive(Debug, Default)]
pub struct TagProfiler {
    state: Mutex<TagState>,
}

impl TagProfiler {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TagState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Only the first start before a matching end is kept.
    pub fn measure_start(&self, tag: &str, cycles: u64) {
        let mut state = self.lock();
        let entry = state.tags.entry(tag.to_string()).or_default();
        if entry.started_at.is_none() {
            entry.started_at = Some(cycles);
        }
    }

    pub fn measure_end(&self, tag: &str, cycles: u64) {
        let mut state = self.lock();
        if let Some(entry) = state.tags.get_mut(tag) {
            if let Some(start) = entry.started_at.take() {
                entry.calls += 1;
                entry.cycles += cycles.saturating_sub(start);
            }
        }
    }

    /// Measures `tag` from each `start` event of `start_chip` to the next
    /// `end` event of `end_chip`.
    pub fn add_profile_tag(
        self: &Arc<Self>,
        tag: &str,
        start_chip: &ChipCore,
        start: &str,
        end_chip: &ChipCore,
        end: &str,
    ) {
        {
            let mut state = self.lock();
            state.tags.entry(tag.to_string()).or_default();
            state.start_events.insert(start.to_string(), tag.to_string());
            state.end_events.insert(end.to_string(), tag.to_string());
        }
        tracing::debug!("Profile tag {}: start {} end {}", tag, start, end);
        let listener: Arc<dyn EventListener> = self.clone();
        start_chip.add_event_listener(listener.clone());
        end_chip.add_event_listener(listener);
    }

    pub fn stats(&self, tag: &str) -> Option<TagStats> {
        self.lock().tags.get(tag).cloned()
    }

    /// All tags sorted by total cycles, largest first.
    pub fn report(&self) -> Vec<(String, TagStats)> {
        let mut rows: Vec<(String, TagStats)> = self
            .lock()
            .tags
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        rows.sort_by(|a, b| b.1.cycles.cmp(&a.1.cycles).then_with(|| a.0.cmp(&b.0)));
        rows
    }

    pub fn clear(&self) {
        for stats in self.lock().tags.values_mut() {
            *stats = TagStats::default();
        }
    }
}

impl EventListener for TagProfiler {
    fn event(&self, _source: &str, event: &ChipEvent) {
        let (start, end) = {
            let state = self.lock();
            (
                state.start_events.get(&event.name).cloned(),
                state.end_events.get(&event.name).cloned(),
            )
        };
        if let Some(tag) = start {
            self.measure_start(&tag, event.cycles);
        } else if let Some(tag) = end {
            self.measure_end(&tag, event.cycles);
        }
    }
}
