/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Timer-interrupt driven engine.
//!
//! Every unit owns a [`StackArena`] and a saved register frame.  The board's
//! timer interrupt handler calls [`PreemptiveEngine::on_timer_interrupt`] with
//! a pointer to the interrupted frame; the engine saves it into the current
//! unit, picks the next one with aging selection, and overwrites the frame so
//! that returning from the interrupt resumes the chosen unit.
//!
//! ```text
//!  tick ─► promote due sleepers
//!       ─► current Running and nothing else ready?  keep it
//!       ─► otherwise save frame into current, requeue it if still Running
//!       ─► pick next, write its frame back
//!       ─► re-arm timer with (period − handler time), floored
//! ```
//!
//! # Interrupt context contract
//! The handler path never allocates, logs or blocks.  Queue capacity for every
//! unit is reserved by `schedule_task`, and memory of units that finish on
//! their own stack is released later by [`PreemptiveEngine::reap`] or the next
//! `schedule_task`.
//!
//! # Base unit
//! Whatever runs before the first tick (typically the idle loop) is unit
//! [`UnitId::BASE`] with priority 0.  It is `Running` from construction, its
//! frame is captured by the first tick, and it is never destroyed.
//!
//! `yield_now`, `sleep` and `mute` cannot switch by themselves: they record the
//! requested state, ask the timer for an immediate tick and spin until the
//! handler has made the caller `Running` again.

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use critical_section::CriticalSection;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::platform::{Clock, HardwareTimer, TaskRegistry};
use crate::sched::{self, CoreCell, Park, Scheduler, SchedulerCore, Selection, Switch};
use crate::stack::StackArena;
use crate::unit::{ExecutionUnit, TaskId, UnitId, UnitInfo, UnitState};

// ── Platform boundary ─────────────────────────────────────────────────────────

/// Board-specific half of the preemptive engine.
pub trait PreemptPlatform: Send + Sync + 'static {
    /// Register state saved on interrupt entry and restored on exit.
    type Frame: Copy + Send + 'static;

    /// Frame that starts executing `entry(arg)` on `stack` when restored.
    fn initial_frame(&self, stack: &StackArena, entry: extern "C" fn(usize), arg: usize)
        -> Self::Frame;

    /// Park a unit that has finished until the next tick switches away.
    fn wait_for_switch() -> ! {
        loop {
            core::hint::spin_loop();
        }
    }

    /// One iteration of the busy-wait in `yield_now`, `sleep` and `mute`.
    fn relax() {
        core::hint::spin_loop();
    }
}

/// Next timer period after a handler that took `spent_us`.
///
/// A measurement longer than the period itself is treated as zero (the
/// microsecond counter wrapped or the tick was requested early).
pub fn next_period(period_us: u32, spent_us: u32, floor_us: u32) -> u32 {
    let spent = if spent_us > period_us { 0 } else { spent_us };
    (period_us - spent).max(floor_us)
}

// ── Unit context ──────────────────────────────────────────────────────────────

/// Where a fresh unit's trampoline finds its engine.
struct Launch<P: PreemptPlatform> {
    shared: Weak<Shared<P>>,
    unit: UnitId,
}

struct Context<P: PreemptPlatform> {
    frame: Option<P::Frame>,
    /// `None` for the base unit, which runs on whatever stack it came with.
    stack: Option<StackArena>,
    /// Boxed so the address handed to the trampoline stays put.
    launch: Option<Box<Launch<P>>>,
    /// Engine reference held for a started unit.  It lives here rather than
    /// on the unit's stack, which is abandoned when the unit exits.
    pin: Option<Arc<Shared<P>>>,
}

impl<P: PreemptPlatform> Context<P> {
    fn base() -> Self {
        Self {
            frame: None,
            stack: None,
            launch: None,
            pin: None,
        }
    }
}

extern "C" fn trampoline<P: PreemptPlatform>(arg: usize) {
    start::<P>(arg);
    P::wait_for_switch()
}

/// Run a fresh unit's body.  Returns once the unit has retired.
fn start<P: PreemptPlatform>(arg: usize) {
    let (weak, unit) = {
        // SAFETY: `arg` is the address of this unit's boxed launch record.
        // The record lives in the unit's context until `retire` destroys the
        // unit, which only happens after this block.
        let launch = unsafe { &*(arg as *const Launch<P>) };
        (launch.shared.clone(), launch.unit)
    };
    let Some(shared) = weak.upgrade() else {
        return;
    };
    let engine = Arc::as_ptr(&shared);
    let pinned = critical_section::with(|cs| {
        match shared.core.borrow_ref_mut(cs).context_mut(unit) {
            Some(ctx) => {
                ctx.pin = Some(Arc::clone(&shared));
                true
            }
            None => false,
        }
    });
    drop(shared);
    if pinned {
        // SAFETY: the pin stored in the unit's context keeps the engine alive
        // until `retire` releases it, and `enter` touches nothing after that.
        unsafe { &*engine }.enter(unit);
    }
}

// ── Shared engine state ───────────────────────────────────────────────────────

struct Shared<P: PreemptPlatform> {
    platform: P,
    core: CoreCell<Context<P>>,
    registry: Arc<dyn TaskRegistry>,
    clock: Arc<dyn Clock>,
    timer: Arc<dyn HardwareTimer>,
    period_us: u32,
    min_period_us: u32,
    armed: AtomicBool,
    in_tick: AtomicBool,
    /// Stacks of units that finished on themselves, freed off the interrupt
    /// path.
    retired: critical_section::Mutex<RefCell<Vec<StackArena>>>,
}

impl<P: PreemptPlatform> Shared<P> {
    fn schedule_task(self: &Arc<Self>, task: TaskId, stack_size: usize) -> Result<UnitId, EngineError> {
        self.reap();
        if stack_size == 0 {
            return Err(EngineError::InvalidStackSize {
                task,
                size: stack_size,
            });
        }
        let binding = self
            .registry
            .binding(task)
            .filter(|_| self.registry.body(task).is_some())
            .ok_or(EngineError::UnknownTask { task })?;
        self.arm()?;
        let stack = StackArena::allocate(stack_size).map_err(|source| {
            warn!(task = %task, stack = stack_size, error = %source, "stack allocation failed");
            EngineError::StackAllocation {
                task,
                size: stack_size,
                source,
            }
        })?;

        let unit = critical_section::with(|cs| self.core.borrow_ref_mut(cs).allocate_id());
        let launch = Box::new(Launch {
            shared: Arc::downgrade(self),
            unit,
        });
        let arg = &*launch as *const Launch<P> as usize;
        let frame = self.platform.initial_frame(&stack, trampoline::<P>, arg);
        let context = Context {
            frame: Some(frame),
            stack: Some(stack),
            launch: Some(launch),
            pin: None,
        };

        critical_section::with(|cs| {
            let mut core = self.core.borrow_ref_mut(cs);
            core.insert(ExecutionUnit::new(unit, Some(binding), stack_size, context));
            core.make_ready(unit);
        });
        info!(
            engine = "preemptive",
            unit = %unit,
            task = %task,
            priority = binding.priority,
            stack = stack_size,
            "unit scheduled"
        );
        Ok(unit)
    }

    fn arm(&self) -> Result<(), EngineError> {
        if self.armed.load(Ordering::Acquire) {
            return Ok(());
        }
        let period_us = self.period_us;
        self.timer.start_us(period_us).map_err(|source| {
            warn!(period_us, error = %source, "preemption timer failed to arm");
            EngineError::TimerStart { period_us, source }
        })?;
        self.armed.store(true, Ordering::Release);
        info!(period_us, "preemption timer armed");
        Ok(())
    }

    fn request_switch(&self) {
        self.timer.update_us(1);
    }

    fn is_running(&self, unit: UnitId) -> bool {
        critical_section::with(|cs| {
            let core = self.core.borrow_ref(cs);
            core.current() == Some(unit) && core.state(unit) == Some(UnitState::Running)
        })
    }

    // ── Interrupt path ────────────────────────────────────────────────────────

    fn tick(&self, frame: &mut P::Frame) {
        let now = self.clock.now_ms();
        critical_section::with(|cs| {
            let mut core = self.core.borrow_ref_mut(cs);
            core.promote_due(now);

            if let Some(current) = core.current() {
                if core.state(current) == Some(UnitState::Running) {
                    if !core.has_ready() {
                        return;
                    }
                    core.make_ready(current);
                } else if !core.has_ready() {
                    // Blocked with nobody to switch to: it keeps spinning.
                    return;
                }
                if let Some(ctx) = core.context_mut(current) {
                    ctx.frame = Some(*frame);
                }
                core.clear_current();
            }

            let Some(next) = core.pick_next_ready() else {
                return;
            };
            core.activate(next);
            if let Some(saved) = core.context_mut(next).and_then(|ctx| ctx.frame) {
                *frame = saved;
            }
        });
    }

    // ── Unit side ─────────────────────────────────────────────────────────────

    /// Body of a freshly started unit, reached from the trampoline.
    fn enter(&self, unit: UnitId) {
        let task = critical_section::with(|cs| self.core.borrow_ref(cs).unit(unit)?.task());
        if let Some(body) = task.and_then(|task| self.registry.body(task)) {
            if panic::catch_unwind(AssertUnwindSafe(|| body(self))).is_err() {
                warn!(unit = %unit, "unit body panicked");
            }
        }
        self.retire(unit);
    }

    /// Destroy the calling unit while it is still running on its own stack.
    ///
    /// The unit leaves every queue and the current slot at once; its stack is
    /// parked on the retired list because the caller is still standing on it.
    /// Any later non-interrupt caller is necessarily running elsewhere, so it
    /// may free the stack.
    ///
    /// Dropping the unit's pin is the last thing done here; it may release
    /// the engine, so callers must not touch `self` afterwards.
    fn retire(&self, unit: UnitId) {
        let dead = critical_section::with(|cs| {
            let mut core = self.core.borrow_ref_mut(cs);
            core.make_finished(unit);
            core.destroy(unit)
        });
        let mut pin = None;
        if let Some(mut dead) = dead {
            pin = dead.context.pin.take();
            let stack = dead.context.stack.take();
            if let Some(task) = dead.task() {
                self.registry.unbind(task);
            }
            debug!(engine = "preemptive", unit = %unit, "unit retired");
            drop(dead);
            if let Some(stack) = stack {
                critical_section::with(|cs| self.retired.borrow_ref_mut(cs).push(stack));
            }
        }
        self.request_switch();
        drop(pin);
    }

    fn reap(&self) -> usize {
        let stacks = critical_section::with(|cs| std::mem::take(&mut *self.retired.borrow_ref_mut(cs)));
        let count = stacks.len();
        drop(stacks);
        count
    }

    fn unschedule(&self, unit: UnitId) -> bool {
        if unit == UnitId::BASE {
            return false;
        }
        if self.caller() == Some(unit) {
            self.exit();
        }
        let dead = critical_section::with(|cs| {
            let mut core = self.core.borrow_ref_mut(cs);
            if core.current() == Some(unit) {
                return None;
            }
            core.destroy(unit)
        });
        let Some(dead) = dead else {
            return false;
        };
        if let Some(task) = dead.task() {
            self.registry.unbind(task);
        }
        debug!(engine = "preemptive", unit = %unit, "unit destroyed");
        true
    }

    fn shutdown(&self) {
        if self.armed.swap(false, Ordering::AcqRel) {
            self.timer.clear();
        }
        let (units, kept) = critical_section::with(|cs| {
            let mut core = self.core.borrow_ref_mut(cs);
            let running = core.current().filter(|&id| id != UnitId::BASE);
            let units = core.drain(|id| id == UnitId::BASE || Some(id) == running);
            (units, running)
        });
        if let Some(unit) = kept {
            debug!(engine = "preemptive", unit = %unit, "running unit survives shutdown");
        }
        if units.is_empty() {
            return;
        }
        let count = units.len();
        for unit in units {
            if let Some(task) = unit.task() {
                self.registry.unbind(task);
            }
        }
        info!(engine = "preemptive", units = count, "engine shut down");
    }
}

impl<P: PreemptPlatform> Switch for Shared<P> {
    type Context = Context<P>;

    fn core(&self) -> &CoreCell<Context<P>> {
        &self.core
    }

    fn clock(&self) -> &dyn Clock {
        &*self.clock
    }

    /// Without an armed timer no tick would ever come back, so nothing counts
    /// as a unit.
    fn caller(&self) -> Option<UnitId> {
        if !self.armed.load(Ordering::Acquire) {
            return None;
        }
        critical_section::with(|cs| self.core.borrow_ref(cs).current())
    }

    fn switch_out(&self, unit: UnitId) {
        self.request_switch();
        while !self.is_running(unit) {
            P::relax();
        }
    }
}

impl<P: PreemptPlatform> Scheduler for Shared<P> {
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

    /// The base unit cannot finish; from it this does nothing.
    fn exit(&self) {
        match self.caller() {
            Some(unit) if unit != UnitId::BASE => {
                self.retire(unit);
                P::wait_for_switch()
            }
            _ => {}
        }
    }

    fn wake(&self, unit: UnitId) -> bool {
        sched::wake(self, unit)
    }

    fn park(&self, enlist: &mut dyn FnMut(CriticalSection<'_>, UnitId) -> bool) -> Park {
        sched::park(self, enlist)
    }
}

// ── PreemptiveEngine ──────────────────────────────────────────────────────────

/// Priority-with-aging engine switched by a periodic timer interrupt.
pub struct PreemptiveEngine<P: PreemptPlatform> {
    shared: Arc<Shared<P>>,
}

impl<P: PreemptPlatform> PreemptiveEngine<P> {
    pub fn new(
        platform: P,
        timer: Arc<dyn HardwareTimer>,
        clock: Arc<dyn Clock>,
        registry: Arc<dyn TaskRegistry>,
        config: &EngineConfig,
    ) -> Self {
        let mut core = SchedulerCore::new(Selection::Aging);
        core.insert(ExecutionUnit::new(UnitId::BASE, None, 0, Context::base()));
        core.activate(UnitId::BASE);
        Self {
            shared: Arc::new(Shared {
                platform,
                core: critical_section::Mutex::new(RefCell::new(core)),
                registry,
                clock,
                timer,
                period_us: config.timer_period_us,
                min_period_us: config.min_timer_period_us,
                armed: AtomicBool::new(false),
                in_tick: AtomicBool::new(false),
                retired: critical_section::Mutex::new(RefCell::new(Vec::new())),
            }),
        }
    }

    /// Create a `Ready` unit for `task` with its own stack arena.
    ///
    /// The first successful call arms the timer; if arming fails no unit is
    /// created and the engine keeps running only the base unit.
    pub fn schedule_task(&self, task: TaskId, stack_size: usize) -> Result<UnitId, EngineError> {
        self.shared.schedule_task(task, stack_size)
    }

    /// Timer interrupt entry point.
    ///
    /// # Safety
    /// Must only be called from the timer interrupt handler, with interrupts
    /// masked and without nesting into itself from another core.  `frame`
    /// must point to the interrupted register frame that the handler restores
    /// on return; it may be overwritten with another unit's frame.
    pub unsafe fn on_timer_interrupt(&self, frame: *mut P::Frame) {
        let shared = &*self.shared;
        if shared.in_tick.swap(true, Ordering::Acquire) {
            return;
        }
        let started = shared.clock.now_us();
        // SAFETY: guaranteed by the caller.
        if let Some(frame) = unsafe { frame.as_mut() } {
            shared.tick(frame);
        }
        let spent = shared.clock.now_us().wrapping_sub(started);
        shared
            .timer
            .update_us(next_period(shared.period_us, spent, shared.min_period_us));
        shared.in_tick.store(false, Ordering::Release);
    }

    /// Free the stacks of units that finished on themselves.  Returns how many
    /// were released.
    pub fn reap(&self) -> usize {
        self.shared.reap()
    }

    /// Destroy a unit that is not running.  Returns whether a unit was
    /// destroyed; the base unit never is.
    pub fn unschedule(&self, unit: UnitId) -> bool {
        self.shared.unschedule(unit)
    }

    pub fn snapshot(&self) -> Vec<UnitInfo> {
        critical_section::with(|cs| self.shared.core.borrow_ref(cs).snapshot())
    }

    /// Units including the base unit.
    pub fn unit_count(&self) -> usize {
        critical_section::with(|cs| self.shared.core.borrow_ref(cs).len())
    }

    pub fn is_armed(&self) -> bool {
        self.shared.armed.load(Ordering::Acquire)
    }

    /// Stop the timer and destroy every unit except the base unit and the
    /// current one.
    ///
    /// Whatever executes this call is the current unit, standing on its own
    /// stack, so that unit is never destroyed here: it stays `Running` and
    /// its task stays bound.  With the timer stopped it carries on as plain
    /// code, and the suspension calls no longer do anything.  Dropping the
    /// engine from a non-base unit therefore leaves that unit, its task
    /// binding and the engine state it pins alive.  Called from the base
    /// unit, every other unit is destroyed and unbound.
    pub fn shutdown(&self) {
        self.shared.shutdown();
        self.shared.reap();
    }
}

impl<P: PreemptPlatform> Drop for PreemptiveEngine<P> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<P: PreemptPlatform> Scheduler for PreemptiveEngine<P> {
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
