/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Cooperative and fiber engines.
//!
//! Units run on [`Strand`]s and only give up control at explicit suspension
//! points (`yield_now`, `sleep`, `mute`, `park`, `exit`).  The idle loop
//! drives the engine by calling [`CooperativeEngine::run`] repeatedly; each
//! call promotes due sleepers, picks one ready unit, runs it until it
//! suspends, and destroys it if it finished.
//!
//! [`FiberEngine`] is the same machine with [`Selection::Lifo`]: the most
//! recently queued unit runs next, priorities and aging are ignored.
//!
//! # Example
//! ```rust,ignore
//! let tasks = Arc::new(TaskTable::new());
//! let id = tasks.register(5, |s| for _ in 0..3 { s.yield_now() });
//! let engine = CooperativeEngine::new(tasks.clone(), Arc::new(MonotonicClock::new()));
//! engine.schedule_task(id, 16 * 1024)?;
//! while engine.run().is_some() {}
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use critical_section::CriticalSection;
use tracing::{debug, info, trace, warn};

use crate::engine::next_engine_id;
use crate::engine::strand::{self, Outcome, Strand};
use crate::error::{EngineError, StackError};
use crate::platform::{Clock, TaskRegistry};
use crate::sched::{self, deadline_reached, CoreCell, Park, Scheduler, SchedulerCore, Selection, Switch};
use crate::stack::padded_size;
use crate::unit::{ExecutionUnit, TaskId, UnitId, UnitInfo, UnitState};

// ── Shared engine state ───────────────────────────────────────────────────────

/// Everything a running unit needs to reach its engine.  Unit bodies receive
/// `&Shared` as their `&dyn Scheduler`.
struct Shared {
    id: u64,
    kind: &'static str,
    core: CoreCell<Strand>,
    registry: Arc<dyn TaskRegistry>,
    clock: Arc<dyn Clock>,
    /// Set for the duration of one `run()` pass.
    active: AtomicBool,
}

impl Shared {
    fn new(
        kind: &'static str,
        selection: Selection,
        registry: Arc<dyn TaskRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: next_engine_id(),
            kind,
            core: SchedulerCore::cell(selection),
            registry,
            clock,
            active: AtomicBool::new(false),
        })
    }

    fn schedule_task(self: &Arc<Self>, task: TaskId, stack_size: usize) -> Result<UnitId, EngineError> {
        if stack_size == 0 {
            return Err(EngineError::InvalidStackSize {
                task,
                size: stack_size,
            });
        }
        let (Some(binding), Some(body)) = (self.registry.binding(task), self.registry.body(task))
        else {
            return Err(EngineError::UnknownTask { task });
        };
        let reserved = padded_size(stack_size).ok_or(EngineError::StackAllocation {
            task,
            size: stack_size,
            source: StackError::TooLarge(stack_size),
        })?;

        let unit = critical_section::with(|cs| self.core.borrow_ref_mut(cs).allocate_id());
        let weak = Arc::downgrade(self);
        let strand = Strand::spawn(self.id, unit, reserved, move || {
            if let Some(shared) = weak.upgrade() {
                body(&*shared);
            }
        })
        .map_err(|source| {
            warn!(engine = self.kind, task = %task, stack = stack_size, error = %source, "strand spawn failed");
            EngineError::Spawn { task, source }
        })?;

        critical_section::with(|cs| {
            let mut core = self.core.borrow_ref_mut(cs);
            core.insert(ExecutionUnit::new(unit, Some(binding), stack_size, strand));
            core.make_ready(unit);
        });
        info!(
            engine = self.kind,
            unit = %unit,
            task = %task,
            priority = binding.priority,
            stack = stack_size,
            "unit scheduled"
        );
        Ok(unit)
    }

    fn run(&self) -> Option<UnitId> {
        if self.active.swap(true, Ordering::AcqRel) {
            debug!(engine = self.kind, "nested run rejected");
            return None;
        }
        let ran = self.pass();
        self.active.store(false, Ordering::Release);
        ran
    }

    fn pass(&self) -> Option<UnitId> {
        let now = self.clock.now_ms();
        let (unit, resumer) = critical_section::with(|cs| {
            let mut core = self.core.borrow_ref_mut(cs);
            core.promote_due(now);
            if core.current().is_some() {
                return None;
            }
            let unit = core.pick_next_ready()?;
            let resumer = core.unit(unit)?.context.resumer();
            core.activate(unit);
            Some((unit, resumer))
        })?;

        trace!(engine = self.kind, unit = %unit, "resuming unit");
        let outcome = resumer.resume();
        self.land(unit, outcome);
        Some(unit)
    }

    /// Landing point after a unit handed control back.
    fn land(&self, unit: UnitId, outcome: Outcome) {
        let finished = critical_section::with(|cs| {
            let mut core = self.core.borrow_ref_mut(cs);
            if core.current() == Some(unit) {
                core.clear_current();
            }
            match (outcome, core.state(unit)) {
                (Outcome::Finished, _) | (_, Some(UnitState::Finished)) => core.destroy(unit),
                (Outcome::Suspended, Some(UnitState::Running)) => {
                    core.make_ready(unit);
                    None
                }
                _ => None,
            }
        });
        if let Some(dead) = finished {
            self.release(dead);
        }
    }

    /// Unbind the task and drop the strand.  Must run outside any critical
    /// section: dropping a live strand waits for it to unwind.
    fn release(&self, unit: ExecutionUnit<Strand>) {
        if let Some(task) = unit.task() {
            self.registry.unbind(task);
        }
        debug!(engine = self.kind, unit = %unit.id(), "unit destroyed");
        drop(unit);
    }

    fn unschedule(&self, unit: UnitId) -> bool {
        if self.caller() == Some(unit) {
            self.exit();
            return true;
        }
        let dead = critical_section::with(|cs| {
            let mut core = self.core.borrow_ref_mut(cs);
            if core.current() == Some(unit) {
                return None;
            }
            core.destroy(unit)
        });
        match dead {
            Some(dead) => {
                self.release(dead);
                true
            }
            None => false,
        }
    }

    fn snapshot(&self) -> Vec<UnitInfo> {
        critical_section::with(|cs| self.core.borrow_ref(cs).snapshot())
    }

    fn unit_count(&self) -> usize {
        critical_section::with(|cs| self.core.borrow_ref(cs).len())
    }

    fn next_wake_in_ms(&self) -> Option<u32> {
        let now = self.clock.now_ms();
        let deadline = critical_section::with(|cs| self.core.borrow_ref(cs).next_deadline(now))?;
        Some((deadline.wrapping_sub(now) as i32).max(0) as u32)
    }

    /// Lending needs an idle engine: not inside a pass and no unit current.
    fn can_lend(&self) -> bool {
        !self.active.load(Ordering::Acquire)
            && critical_section::with(|cs| self.core.borrow_ref(cs).current().is_none())
    }

    fn yield_from_other(&self) -> bool {
        if !self.can_lend() {
            debug!(engine = self.kind, "yield_from_other rejected");
            return false;
        }
        self.run().is_some()
    }

    fn sleep_from_other(&self, ms: u32, idle: &mut dyn FnMut()) {
        if !self.can_lend() {
            debug!(engine = self.kind, "sleep_from_other rejected");
            return;
        }
        let deadline = self.clock.now_ms().wrapping_add(ms);
        while !deadline_reached(self.clock.now_ms(), deadline) {
            if self.run().is_none() {
                idle();
            }
        }
    }

    fn shutdown(&self) {
        if strand::current_unit(self.id).is_some() {
            warn!(engine = self.kind, "shutdown from inside a unit ignored");
            return;
        }
        let units = critical_section::with(|cs| {
            let mut core = self.core.borrow_ref_mut(cs);
            let running = core.current();
            core.drain(|id| Some(id) == running)
        });
        if units.is_empty() {
            return;
        }
        let count = units.len();
        for unit in units {
            self.release(unit);
        }
        info!(engine = self.kind, units = count, "engine shut down");
    }
}

impl Switch for Shared {
    type Context = Strand;

    fn core(&self) -> &CoreCell<Strand> {
        &self.core
    }

    fn clock(&self) -> &dyn Clock {
        &*self.clock
    }

    fn caller(&self) -> Option<UnitId> {
        let unit = strand::current_unit(self.id)?;
        let current = critical_section::with(|cs| self.core.borrow_ref(cs).current());
        (current == Some(unit)).then_some(unit)
    }

    fn switch_out(&self, _unit: UnitId) {
        strand::suspend_current();
    }
}

impl Scheduler for Shared {
    fn current(&self) -> Option<UnitId> {
        self.caller()
    }

    fn yield_now(&self) {
        sched::yield_now(self);
    }

    fn sleep(&self, ms: u32) {
        sched::sleep(self, ms);
    }

    fn mute(&self) {
        sched::mute(self);
    }

    /// Marks the caller finished and hands control back; `run()` destroys
    /// it and the strand unwinds without returning here.
    fn exit(&self) {
        let Some(unit) = self.caller() else {
            return;
        };
        critical_section::with(|cs| self.core.borrow_ref_mut(cs).make_finished(unit));
        strand::suspend_current();
    }

    fn wake(&self, unit: UnitId) -> bool {
        sched::wake(self, unit)
    }

    fn park(&self, enlist: &mut dyn FnMut(CriticalSection<'_>, UnitId) -> bool) -> Park {
        sched::park(self, enlist)
    }
}

// ── CooperativeEngine ─────────────────────────────────────────────────────────

/// Priority-with-aging engine where units yield voluntarily.
///
/// Owning handle: dropping it shuts the engine down, destroying every unit
/// and unbinding each task once.
pub struct CooperativeEngine {
    shared: Arc<Shared>,
}

impl CooperativeEngine {
    pub fn new(registry: Arc<dyn TaskRegistry>, clock: Arc<dyn Clock>) -> Self {
        Self {
            shared: Shared::new("cooperative", Selection::Aging, registry, clock),
        }
    }

    /// Create a `Ready` unit running `task`'s body on a stack of at least
    /// `stack_size` bytes.
    ///
    /// On error no unit exists and the task stays unbound.
    pub fn schedule_task(&self, task: TaskId, stack_size: usize) -> Result<UnitId, EngineError> {
        self.shared.schedule_task(task, stack_size)
    }

    /// One scheduling pass.  Returns the unit that ran, or `None` when nothing
    /// was ready or the engine is already inside a pass.
    pub fn run(&self) -> Option<UnitId> {
        self.shared.run()
    }

    /// Destroy a unit that is not running.  Called by the unit itself it
    /// behaves like [`exit`](Scheduler::exit).  Returns whether a unit was
    /// destroyed; repeating the call is harmless.
    pub fn unschedule(&self, unit: UnitId) -> bool {
        self.shared.unschedule(unit)
    }

    pub fn snapshot(&self) -> Vec<UnitInfo> {
        self.shared.snapshot()
    }

    pub fn unit_count(&self) -> usize {
        self.shared.unit_count()
    }

    /// Milliseconds until the earliest sleeper is due.
    pub fn next_wake_in_ms(&self) -> Option<u32> {
        self.shared.next_wake_in_ms()
    }

    /// Run one pass on behalf of code that is not a unit of this engine.
    ///
    /// Returns `false` without running anything while this engine is inside
    /// a pass or has a current unit.
    pub fn yield_from_other(&self) -> bool {
        self.shared.yield_from_other()
    }

    /// Keep running passes until `ms` milliseconds have elapsed, calling
    /// `idle` whenever a pass found nothing to run.  Returns at once while
    /// this engine is inside a pass or has a current unit.
    pub fn sleep_from_other(&self, ms: u32, mut idle: impl FnMut()) {
        self.shared.sleep_from_other(ms, &mut idle);
    }

    pub fn shutdown(&self) {
        self.shared.shutdown();
    }
}

impl Drop for CooperativeEngine {
    fn drop(&mut self) {
        self.shared.shutdown();
    }
}

impl Scheduler for CooperativeEngine {
    fn current(&self) -> Option<UnitId> {
        self.shared.current()
    }

    fn yield_now(&self) {
        self.shared.yield_now();
    }

    fn sleep(&self, ms: u32) {
        self.shared.sleep(ms);
    }

    fn mute(&self) {
        self.shared.mute();
    }

    fn exit(&self) {
        self.shared.exit();
    }

    fn wake(&self, unit: UnitId) -> bool {
        self.shared.wake(unit)
    }

    fn park(&self, enlist: &mut dyn FnMut(CriticalSection<'_>, UnitId) -> bool) -> Park {
        self.shared.park(enlist)
    }
}

// ── FiberEngine ───────────────────────────────────────────────────────────────

/// Lightweight sibling of [`CooperativeEngine`]: last queued, first run.
///
/// Sleepers are promoted with the same wrapping deadline check; there is no
/// priority and no aging.
pub struct FiberEngine {
    shared: Arc<Shared>,
}

impl FiberEngine {
    pub fn new(registry: Arc<dyn TaskRegistry>, clock: Arc<dyn Clock>) -> Self {
        Self {
            shared: Shared::new("fiber", Selection::Lifo, registry, clock),
        }
    }

    pub fn schedule_task(&self, task: TaskId, stack_size: usize) -> Result<UnitId, EngineError> {
        self.shared.schedule_task(task, stack_size)
    }

    pub fn run(&self) -> Option<UnitId> {
        self.shared.run()
    }

    pub fn unschedule(&self, unit: UnitId) -> bool {
        self.shared.unschedule(unit)
    }

    pub fn snapshot(&self) -> Vec<UnitInfo> {
        self.shared.snapshot()
    }

    pub fn unit_count(&self) -> usize {
        self.shared.unit_count()
    }

    pub fn next_wake_in_ms(&self) -> Option<u32> {
        self.shared.next_wake_in_ms()
    }

    pub fn shutdown(&self) {
        self.shared.shutdown();
    }
}

impl Drop for FiberEngine {
    fn drop(&mut self) {
        self.shared.shutdown();
    }
}

impl Scheduler for FiberEngine {
    fn current(&self) -> Option<UnitId> {
        self.shared.current()
    }

    fn yield_now(&self) {
        self.shared.yield_now();
    }

    fn sleep(&self, ms: u32) {
        self.shared.sleep(ms);
    }

    fn mute(&self) {
        self.shared.mute();
    }

    fn exit(&self) {
        self.shared.exit();
    }

    fn wake(&self, unit: UnitId) -> bool {
        self.shared.wake(unit)
    }

    fn park(&self, enlist: &mut dyn FnMut(CriticalSection<'_>, UnitId) -> bool) -> Park {
        self.shared.park(enlist)
    }
}
