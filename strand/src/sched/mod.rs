/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Scheduling core shared by every engine.
//!
//! [`SchedulerCore`] owns the units of one engine, the ready and sleep queues
//! and the "current unit" slot.  It knows nothing about how control actually
//! moves between units; each engine supplies that through the crate-private
//! `Switch` strategy:
//!
//! | Engine      | Context `C`              | `switch_out`                          |
//! |-------------|--------------------------|---------------------------------------|
//! | Cooperative | thread-backed strand     | hand the baton back to `run()`        |
//! | Fiber       | thread-backed strand     | same, with LIFO selection             |
//! | Preemptive  | stack arena + raw frame  | request a tick, spin until re-elected |
//!
//! All core state lives in a `critical_section::Mutex<RefCell<_>>`, so every
//! queue mutation happens with interrupts masked on a board and under the
//! global lock on a host.
//!
//! # Selection
//! [`Selection::Aging`] picks the ready unit with the highest
//! `base_priority + wait_ticks`, ages everything it looked at and resets the
//! winner.  Equal scores go to the unit that was queued first.
//! [`Selection::Lifo`] pops the most recently queued unit and never ages.

pub mod queue;

pub use queue::deadline_reached;

use std::cell::RefCell;
use std::collections::BTreeMap;

use critical_section::CriticalSection;

use crate::platform::Clock;
use crate::unit::{ExecutionUnit, UnitId, UnitInfo, UnitState};

use queue::{ReadyQueue, SleepQueue};

// ── Public surface ────────────────────────────────────────────────────────────

/// How the next ready unit is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Highest `priority + wait_ticks` first; the oldest entry wins ties.
    Aging,
    /// Most recently queued first, priorities ignored.
    Lifo,
}

/// Outcome of [`Scheduler::park`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Park {
    /// The caller was muted and has since been woken.
    Parked,
    /// The enlist callback declined; the caller kept running.
    Declined,
    /// The caller is not a unit of this scheduler.
    NoUnit,
}

/// The handle unit bodies and sync primitives use to talk to their engine.
///
/// Called from outside any unit of the engine, `yield_now`, `sleep`, `mute`
/// and `exit` do nothing.
pub trait Scheduler: Send + Sync {
    /// The unit the caller is running as.
    fn current(&self) -> Option<UnitId>;

    /// Re-queue the caller and let the scheduler pick again.
    fn yield_now(&self);

    /// Suspend the caller for at least `ms` milliseconds.
    fn sleep(&self, ms: u32);

    /// Suspend the caller until something calls [`wake`](Scheduler::wake).
    fn mute(&self);

    /// Finish the calling unit now.  Does not return when called from a unit.
    fn exit(&self);

    /// Make a muted or sleeping unit ready.
    ///
    /// Returns `false` only when no such unit exists (anymore).
    fn wake(&self, unit: UnitId) -> bool;

    /// Mute the caller if `enlist` agrees.
    ///
    /// `enlist` runs inside the same critical section that marks the caller
    /// `Mute`, so registering the caller on a waiter list and suspending it
    /// are atomic with respect to any waker.  It may call back into this
    /// scheduler (for instance to wake another unit).
    fn park(&self, enlist: &mut dyn FnMut(CriticalSection<'_>, UnitId) -> bool) -> Park;
}

// ── Core ──────────────────────────────────────────────────────────────────────

pub(crate) type CoreCell<C> = critical_section::Mutex<RefCell<SchedulerCore<C>>>;

#[derive(Debug)]
pub(crate) struct SchedulerCore<C> {
    units: BTreeMap<UnitId, ExecutionUnit<C>>,
    ready: ReadyQueue,
    sleepers: SleepQueue,
    current: Option<UnitId>,
    selection: Selection,
    next_id: u32,
}

impl<C> SchedulerCore<C> {
    pub(crate) fn new(selection: Selection) -> Self {
        Self {
            units: BTreeMap::new(),
            ready: ReadyQueue::default(),
            sleepers: SleepQueue::default(),
            current: None,
            selection,
            next_id: 1,
        }
    }

    pub(crate) fn cell(selection: Selection) -> CoreCell<C> {
        critical_section::Mutex::new(RefCell::new(Self::new(selection)))
    }

    /// Ids start at 1; [`UnitId::BASE`] is never handed out.
    pub(crate) fn allocate_id(&mut self) -> UnitId {
        let id = UnitId::new(self.next_id);
        self.next_id = self.next_id.wrapping_add(1).max(1);
        id
    }

    /// Adopt `unit` without queueing it.
    ///
    /// Queue capacity is grown to cover every unit, so later queue pushes
    /// never allocate.
    pub(crate) fn insert(&mut self, unit: ExecutionUnit<C>) {
        self.units.insert(unit.id, unit);
        let total = self.units.len();
        self.ready.reserve_total(total);
        self.sleepers.reserve_total(total);
    }

    pub(crate) fn contains(&self, id: UnitId) -> bool {
        self.units.contains_key(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.units.len()
    }

    pub(crate) fn state(&self, id: UnitId) -> Option<UnitState> {
        self.units.get(&id).map(|u| u.state)
    }

    pub(crate) fn unit(&self, id: UnitId) -> Option<&ExecutionUnit<C>> {
        self.units.get(&id)
    }

    pub(crate) fn context_mut(&mut self, id: UnitId) -> Option<&mut C> {
        self.units.get_mut(&id).map(|u| &mut u.context)
    }

    pub(crate) fn current(&self) -> Option<UnitId> {
        self.current
    }

    pub(crate) fn clear_current(&mut self) {
        self.current = None;
    }

    pub(crate) fn has_ready(&self) -> bool {
        !self.ready.is_empty()
    }

    pub(crate) fn ready_len(&self) -> usize {
        self.ready.len()
    }

    pub(crate) fn sleeping_len(&self) -> usize {
        self.sleepers.len()
    }

    pub(crate) fn next_deadline(&self, now: u32) -> Option<u32> {
        self.sleepers.next_deadline(now)
    }

    // ── State transitions ─────────────────────────────────────────────────────

    /// Mark `id` as the running unit.
    pub(crate) fn activate(&mut self, id: UnitId) {
        if let Some(unit) = self.units.get_mut(&id) {
            unit.state = UnitState::Running;
            self.current = Some(id);
        }
    }

    pub(crate) fn make_ready(&mut self, id: UnitId) {
        if let Some(unit) = self.units.get_mut(&id) {
            unit.state = UnitState::Ready;
            self.sleepers.remove(id);
            self.ready.push(id);
        }
    }

    pub(crate) fn make_sleeping(&mut self, id: UnitId, deadline: u32) {
        if let Some(unit) = self.units.get_mut(&id) {
            unit.state = UnitState::Sleeping;
            self.ready.remove(id);
            self.sleepers.push(id, deadline);
        }
    }

    pub(crate) fn make_mute(&mut self, id: UnitId) {
        if let Some(unit) = self.units.get_mut(&id) {
            unit.state = UnitState::Mute;
            self.ready.remove(id);
            self.sleepers.remove(id);
        }
    }

    pub(crate) fn make_finished(&mut self, id: UnitId) {
        if let Some(unit) = self.units.get_mut(&id) {
            unit.state = UnitState::Finished;
            self.ready.remove(id);
            self.sleepers.remove(id);
        }
    }

    /// Bring a muted or sleeping unit back.  `false` if the unit is gone or
    /// already finished.
    pub(crate) fn wake(&mut self, id: UnitId) -> bool {
        match self.state(id) {
            Some(UnitState::Mute | UnitState::Sleeping) => {
                self.make_ready(id);
                true
            }
            Some(UnitState::Ready | UnitState::Running) => true,
            Some(UnitState::Finished) | None => false,
        }
    }

    /// Move every sleeper whose deadline has been reached to the ready queue.
    pub(crate) fn promote_due(&mut self, now: u32) {
        let Self {
            units,
            ready,
            sleepers,
            ..
        } = self;
        sleepers.drain_due(now, |id| {
            if let Some(unit) = units.get_mut(&id) {
                unit.state = UnitState::Ready;
                ready.push(id);
            }
        });
    }

    /// Remove and return the next unit to run.  It stays `Ready` until the
    /// caller [`activate`](Self::activate)s it.
    pub(crate) fn pick_next_ready(&mut self) -> Option<UnitId> {
        match self.selection {
            Selection::Aging => self.ready.pick_aging(&mut self.units),
            Selection::Lifo => self.ready.pick_lifo(),
        }
    }

    // ── Destruction ───────────────────────────────────────────────────────────

    /// Purge `id` from both queues and drop it from the unit table.
    ///
    /// The returned unit still owns its context; callers drop it outside the
    /// critical section.
    pub(crate) fn destroy(&mut self, id: UnitId) -> Option<ExecutionUnit<C>> {
        self.ready.remove(id);
        self.sleepers.remove(id);
        if self.current == Some(id) {
            self.current = None;
        }
        self.units.remove(&id)
    }

    /// Destroy every unit `keep` does not claim.
    pub(crate) fn drain(&mut self, keep: impl Fn(UnitId) -> bool) -> Vec<ExecutionUnit<C>> {
        let ids: Vec<UnitId> = self
            .units
            .keys()
            .copied()
            .filter(|&id| !keep(id))
            .collect();
        ids.into_iter().filter_map(|id| self.destroy(id)).collect()
    }

    pub(crate) fn snapshot(&self) -> Vec<UnitInfo> {
        self.units.values().map(ExecutionUnit::info).collect()
    }
}

// ── Suspend strategy ──────────────────────────────────────────────────────────

/// How an engine moves control away from a unit once the core has recorded
/// the unit's new state.  The state-changing half of `yield_now`, `sleep`,
/// `mute` and `park` is the same for every engine and lives below.
pub(crate) trait Switch {
    type Context;

    fn core(&self) -> &CoreCell<Self::Context>;

    fn clock(&self) -> &dyn Clock;

    /// The unit the calling code runs as, if it is one of ours.
    fn caller(&self) -> Option<UnitId>;

    /// Suspend `unit` (the caller) until the engine runs it again.
    fn switch_out(&self, unit: UnitId);
}

pub(crate) fn yield_now<S: Switch>(s: &S) {
    let Some(unit) = s.caller() else {
        return;
    };
    critical_section::with(|cs| s.core().borrow_ref_mut(cs).make_ready(unit));
    s.switch_out(unit);
}

pub(crate) fn sleep<S: Switch>(s: &S, ms: u32) {
    let Some(unit) = s.caller() else {
        return;
    };
    let deadline = s.clock().now_ms().wrapping_add(ms);
    critical_section::with(|cs| s.core().borrow_ref_mut(cs).make_sleeping(unit, deadline));
    s.switch_out(unit);
}

pub(crate) fn mute<S: Switch>(s: &S) {
    let Some(unit) = s.caller() else {
        return;
    };
    critical_section::with(|cs| s.core().borrow_ref_mut(cs).make_mute(unit));
    s.switch_out(unit);
}

pub(crate) fn park<S: Switch>(
    s: &S,
    enlist: &mut dyn FnMut(CriticalSection<'_>, UnitId) -> bool,
) -> Park {
    let Some(unit) = s.caller() else {
        return Park::NoUnit;
    };
    let parked = critical_section::with(|cs| {
        // The core borrow is not held while `enlist` runs; it may wake units.
        if !enlist(cs, unit) {
            return false;
        }
        s.core().borrow_ref_mut(cs).make_mute(unit);
        true
    });
    if !parked {
        return Park::Declined;
    }
    s.switch_out(unit);
    Park::Parked
}

pub(crate) fn wake<S: Switch>(s: &S, unit: UnitId) -> bool {
    critical_section::with(|cs| s.core().borrow_ref_mut(cs).wake(unit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::{TaskBinding, TaskId};

    fn core_with(priorities: &[u8]) -> (SchedulerCore<()>, Vec<UnitId>) {
        let mut core = SchedulerCore::new(Selection::Aging);
        let mut ids = Vec::new();
        for (i, &priority) in priorities.iter().enumerate() {
            let id = core.allocate_id();
            let binding = TaskBinding {
                task: TaskId(i as u32),
                priority,
            };
            core.insert(ExecutionUnit::new(id, Some(binding), 512, ()));
            core.make_ready(id);
            ids.push(id);
        }
        (core, ids)
    }

    // ── Ids ───────────────────────────────────────────────────────────────────

    #[test]
    fn ids_start_at_one_and_increase() {
        let (_, ids) = core_with(&[1, 1, 1]);
        let raw: Vec<u32> = ids.iter().map(|id| id.raw()).collect();
        assert_eq!(raw, vec![1, 2, 3]);
    }

    #[test]
    fn id_counter_wraps_past_the_base_unit() {
        let mut core: SchedulerCore<()> = SchedulerCore::new(Selection::Aging);
        core.next_id = u32::MAX;
        assert_eq!(core.allocate_id().raw(), u32::MAX);
        assert_eq!(core.allocate_id().raw(), 1);
    }

    // ── Queue membership ──────────────────────────────────────────────────────

    #[test]
    fn unit_is_never_in_both_queues() {
        let (mut core, ids) = core_with(&[1]);
        let a = ids[0];
        core.make_sleeping(a, 10);
        assert_eq!(core.ready_len(), 0);
        assert_eq!(core.sleeping_len(), 1);
        core.make_ready(a);
        assert_eq!(core.ready_len(), 1);
        assert_eq!(core.sleeping_len(), 0);
        core.make_mute(a);
        assert_eq!(core.ready_len(), 0);
        assert_eq!(core.sleeping_len(), 0);
        assert_eq!(core.state(a), Some(UnitState::Mute));
    }

    #[test]
    fn wake_handles_every_state() {
        let (mut core, ids) = core_with(&[1, 1]);
        let (a, b) = (ids[0], ids[1]);
        core.make_mute(a);
        assert!(core.wake(a));
        assert_eq!(core.state(a), Some(UnitState::Ready));
        // Already ready: nothing to do, still alive.
        assert!(core.wake(a));
        assert_eq!(core.ready_len(), 2);

        core.make_sleeping(b, 1_000);
        assert!(core.wake(b));
        assert_eq!(core.sleeping_len(), 0);

        core.make_finished(b);
        assert!(!core.wake(b));
        assert!(!core.wake(UnitId::new(99)));
    }

    // ── Sleep promotion ───────────────────────────────────────────────────────

    #[test]
    fn sleeper_is_not_promoted_early() {
        let (mut core, ids) = core_with(&[1]);
        let a = ids[0];
        core.pick_next_ready();
        core.make_sleeping(a, 100 + 25);
        core.promote_due(124);
        assert_eq!(core.state(a), Some(UnitState::Sleeping));
        core.promote_due(125);
        assert_eq!(core.state(a), Some(UnitState::Ready));
        assert_eq!(core.pick_next_ready(), Some(a));
    }

    #[test]
    fn sleeper_is_promoted_across_wraparound() {
        let (mut core, ids) = core_with(&[1]);
        let a = ids[0];
        core.pick_next_ready();
        let start = u32::MAX - 3;
        core.make_sleeping(a, start.wrapping_add(10));
        core.promote_due(u32::MAX);
        assert_eq!(core.state(a), Some(UnitState::Sleeping));
        core.promote_due(5);
        assert_eq!(core.state(a), Some(UnitState::Sleeping));
        core.promote_due(6);
        assert_eq!(core.state(a), Some(UnitState::Ready));
    }

    // ── Selection ─────────────────────────────────────────────────────────────

    #[test]
    fn lifo_selection_ignores_priority() {
        let mut core: SchedulerCore<()> = SchedulerCore::new(Selection::Lifo);
        let mut ids = Vec::new();
        for priority in [9, 1] {
            let id = core.allocate_id();
            let binding = TaskBinding {
                task: TaskId(id.raw()),
                priority,
            };
            core.insert(ExecutionUnit::new(id, Some(binding), 512, ()));
            core.make_ready(id);
            ids.push(id);
        }
        assert_eq!(core.pick_next_ready(), Some(ids[1]));
        assert_eq!(core.unit(ids[0]).map(|u| u.wait_ticks), Some(0));
    }

    // ── Destruction ───────────────────────────────────────────────────────────

    #[test]
    fn destroy_purges_queues_and_current() {
        let (mut core, ids) = core_with(&[1, 2]);
        let (a, b) = (ids[0], ids[1]);
        core.activate(a);
        core.make_sleeping(b, 50);
        assert!(core.destroy(a).is_some());
        assert_eq!(core.current(), None);
        assert!(core.destroy(b).is_some());
        assert_eq!(core.sleeping_len(), 0);
        assert!(!core.has_ready());
        // Idempotent.
        assert!(core.destroy(a).is_none());
    }

    #[test]
    fn drain_keeps_the_named_unit() {
        let (mut core, ids) = core_with(&[1, 2, 3]);
        let drained = core.drain(|id| id == ids[1]);
        assert_eq!(drained.len(), 2);
        assert_eq!(core.len(), 1);
        assert!(core.contains(ids[1]));
    }

    #[test]
    fn snapshot_is_ordered_by_id() {
        let (mut core, ids) = core_with(&[4, 2]);
        core.activate(ids[1]);
        let snap = core.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].id, ids[0]);
        assert_eq!(snap[1].state, UnitState::Running);
    }
}
