/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Downward-facing collaborators of the engines.
//!
//! | Trait             | Used by             | Host implementation            |
//! |-------------------|---------------------|--------------------------------|
//! | [`Clock`]         | every engine        | [`MonotonicClock`], [`ManualClock`] |
//! | [`TaskRegistry`]  | every engine        | [`TaskTable`]                  |
//! | [`HardwareTimer`] | preemptive engine   | supplied by the board support  |
//!
//! Engines hold these behind `Arc<dyn _>` so a board, the simulator and the
//! tests can each plug in their own.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use crate::error::TimerError;
use crate::sched::Scheduler;
use crate::unit::{TaskBinding, TaskId};

// ── Clock ─────────────────────────────────────────────────────────────────────

/// Monotonic, wrapping time source.
///
/// Both counters wrap at `u32::MAX`; every consumer compares them with
/// wrapping arithmetic.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u32;
    fn now_us(&self) -> u32;
}

/// Host clock counting from its own creation.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u32 {
        // Truncation is the wrap.
        self.origin.elapsed().as_millis() as u32
    }

    fn now_us(&self) -> u32 {
        self.origin.elapsed().as_micros() as u32
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    micros: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at_ms(ms: u32) -> Self {
        Self {
            micros: AtomicU64::new(u64::from(ms) * 1000),
        }
    }

    pub fn set_ms(&self, ms: u32) {
        self.micros.store(u64::from(ms) * 1000, Ordering::SeqCst);
    }

    pub fn advance_ms(&self, ms: u32) {
        self.advance_us(u64::from(ms) * 1000);
    }

    pub fn advance_us(&self, us: u64) {
        self.micros.fetch_add(us, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u32 {
        (self.micros.load(Ordering::SeqCst) / 1000) as u32
    }

    fn now_us(&self) -> u32 {
        self.micros.load(Ordering::SeqCst) as u32
    }
}

// ── Task registry ─────────────────────────────────────────────────────────────

/// A task's work.  It receives the engine that runs it, so it can yield,
/// sleep or block through that handle instead of a global.
pub type TaskBody = Arc<dyn Fn(&dyn Scheduler) + Send + Sync>;

/// The dispatcher that owns task descriptors.
///
/// An engine reads the binding and body when it creates a unit, and calls
/// [`unbind`](TaskRegistry::unbind) exactly once when that unit is destroyed.
pub trait TaskRegistry: Send + Sync {
    fn binding(&self, task: TaskId) -> Option<TaskBinding>;
    fn body(&self, task: TaskId) -> Option<TaskBody>;
    fn unbind(&self, task: TaskId);
}

struct TaskEntry {
    priority: u8,
    body: TaskBody,
    unbinds: usize,
}

/// In-memory [`TaskRegistry`] for hosts and tests.
///
/// Keyed by a `BTreeMap` so iteration (and therefore any report built from
/// it) is deterministic.
#[derive(Default)]
pub struct TaskTable {
    entries: Mutex<BTreeMap<TaskId, TaskEntry>>,
}

impl TaskTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a body under the next free id.
    pub fn register<F>(&self, priority: u8, body: F) -> TaskId
    where
        F: Fn(&dyn Scheduler) + Send + Sync + 'static,
    {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let id = entries
            .keys()
            .next_back()
            .map_or(TaskId(1), |last| TaskId(last.0 + 1));
        entries.insert(
            id,
            TaskEntry {
                priority,
                body: Arc::new(body),
                unbinds: 0,
            },
        );
        id
    }

    pub fn remove(&self, task: TaskId) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&task)
            .is_some()
    }

    /// How many times an engine released its unit for `task`.
    pub fn unbind_count(&self, task: TaskId) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&task)
            .map_or(0, |e| e.unbinds)
    }

    pub fn tasks(&self) -> Vec<TaskId> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }
}

impl TaskRegistry for TaskTable {
    fn binding(&self, task: TaskId) -> Option<TaskBinding> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&task)
            .map(|e| TaskBinding {
                task,
                priority: e.priority,
            })
    }

    fn body(&self, task: TaskId) -> Option<TaskBody> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&task)
            .map(|e| Arc::clone(&e.body))
    }

    fn unbind(&self, task: TaskId) {
        if let Some(entry) = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&task)
        {
            entry.unbinds += 1;
        }
    }
}

// ── Hardware timer ────────────────────────────────────────────────────────────

/// Periodic interrupt source driving the preemptive engine.
///
/// `update_us` and `clear` are called from the interrupt handler and from
/// unit code alike, so implementations must not block.
pub trait HardwareTimer: Send + Sync {
    /// Arm a periodic interrupt every `period_us` microseconds.
    fn start_us(&self, period_us: u32) -> Result<(), TimerError>;
    /// Re-arm so the next interrupt fires `period_us` from now.
    fn update_us(&self, period_us: u32);
    fn clear(&self);
}
