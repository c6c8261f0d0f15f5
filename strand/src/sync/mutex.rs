/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Blocking mutex built on unit parking.
//!
//! A contended `lock()` parks the caller on a LIFO waiter list.  `unlock()`
//! hands ownership straight to the most recently parked waiter: the lock
//! stays locked throughout, so no third unit can slip in between.
//!
//! Every call takes the scheduler the caller runs under.  Waiters must all be
//! units of that one scheduler.

use std::cell::RefCell;

use critical_section::CriticalSection;

use crate::error::SyncError;
use crate::sched::{Park, Scheduler};
use crate::unit::UnitId;

#[derive(Debug)]
struct LockState {
    locked: bool,
    /// `None` while locked means the base context holds it.
    owner: Option<UnitId>,
    waiters: Vec<UnitId>,
}

pub struct Mutex {
    state: critical_section::Mutex<RefCell<LockState>>,
}

impl Mutex {
    pub const fn new() -> Self {
        Self {
            state: critical_section::Mutex::new(RefCell::new(LockState {
                locked: false,
                owner: None,
                waiters: Vec::new(),
            })),
        }
    }

    /// Acquire the lock, parking the caller while another holder has it.
    ///
    /// Called outside any unit the lock can only be taken when free;
    /// otherwise [`SyncError::NoCurrentUnit`] is returned because there is no
    /// unit to park.
    pub fn lock(&self, sched: &dyn Scheduler) -> Result<(), SyncError> {
        let mut verdict = Ok(());
        let mut first = true;
        loop {
            let outcome = sched.park(&mut |cs, unit| {
                let mut st = self.state.borrow_ref_mut(cs);
                if !st.locked {
                    st.locked = true;
                    st.owner = Some(unit);
                    return false;
                }
                if st.owner == Some(unit) {
                    // Later rounds land here after a hand-off.
                    if first {
                        verdict = Err(SyncError::AlreadyOwned { unit });
                    }
                    return false;
                }
                if !st.waiters.contains(&unit) {
                    st.waiters.push(unit);
                }
                true
            });
            first = false;
            match outcome {
                Park::Declined => return verdict,
                Park::Parked => continue,
                Park::NoUnit => return self.lock_unparked(),
            }
        }
    }

    fn lock_unparked(&self) -> Result<(), SyncError> {
        critical_section::with(|cs| {
            let mut st = self.state.borrow_ref_mut(cs);
            if st.locked {
                return Err(SyncError::NoCurrentUnit);
            }
            st.locked = true;
            st.owner = None;
            Ok(())
        })
    }

    /// Take the lock only if it is free.
    pub fn try_lock(&self, sched: &dyn Scheduler) -> bool {
        let caller = sched.current();
        critical_section::with(|cs| {
            let mut st = self.state.borrow_ref_mut(cs);
            if st.locked {
                return false;
            }
            st.locked = true;
            st.owner = caller;
            true
        })
    }

    /// Release the lock, handing it to the most recently parked waiter.
    pub fn unlock(&self, sched: &dyn Scheduler) -> Result<(), SyncError> {
        let caller = sched.current();
        critical_section::with(|cs| self.release(cs, caller, sched))
    }

    /// Release on behalf of `caller` inside an existing critical section.
    /// Waiters whose unit no longer exists are skipped.
    pub(crate) fn release(
        &self,
        cs: CriticalSection<'_>,
        caller: Option<UnitId>,
        sched: &dyn Scheduler,
    ) -> Result<(), SyncError> {
        let mut st = self.state.borrow_ref_mut(cs);
        if !st.locked || st.owner != caller {
            return Err(SyncError::NotOwner { caller });
        }
        while let Some(next) = st.waiters.pop() {
            st.owner = Some(next);
            if sched.wake(next) {
                return Ok(());
            }
        }
        st.locked = false;
        st.owner = None;
        Ok(())
    }

    /// Run `f` holding both the lock and a critical section.
    pub fn lock_critical<R>(
        &self,
        sched: &dyn Scheduler,
        f: impl FnOnce(CriticalSection<'_>) -> R,
    ) -> Result<R, SyncError> {
        self.lock(sched)?;
        let out = critical_section::with(f);
        self.unlock(sched)?;
        Ok(out)
    }

    pub fn is_locked(&self) -> bool {
        critical_section::with(|cs| self.state.borrow_ref(cs).locked)
    }

    /// Holder of the lock; `None` when free or held by the base context.
    pub fn owner(&self) -> Option<UnitId> {
        critical_section::with(|cs| self.state.borrow_ref(cs).owner)
    }

    /// Number of parked waiters.
    pub fn waiting(&self) -> usize {
        critical_section::with(|cs| self.state.borrow_ref(cs).waiters.len())
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::CooperativeEngine;
    use crate::platform::{ManualClock, TaskTable};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex as StdMutex};

    const STACK: usize = 16 * 1024;

    fn engine() -> (Arc<TaskTable>, CooperativeEngine) {
        let tasks = Arc::new(TaskTable::new());
        let engine = CooperativeEngine::new(tasks.clone(), Arc::new(ManualClock::new()));
        (tasks, engine)
    }

    fn drain(engine: &CooperativeEngine) {
        while engine.run().is_some() {}
    }

    // ── Base context ──────────────────────────────────────────────────────────

    #[test]
    fn base_context_locks_a_free_mutex() {
        let (_, engine) = engine();
        let m = Mutex::new();
        m.lock(&engine).unwrap();
        assert!(m.is_locked());
        assert_eq!(m.owner(), None);
        assert_eq!(m.lock(&engine), Err(SyncError::NoCurrentUnit));
        m.unlock(&engine).unwrap();
        assert!(!m.is_locked());
    }

    #[test]
    fn unlocking_a_free_mutex_is_rejected() {
        let (_, engine) = engine();
        let m = Mutex::new();
        assert_eq!(
            m.unlock(&engine),
            Err(SyncError::NotOwner { caller: None })
        );
    }

    #[test]
    fn try_lock_never_parks() {
        let (_, engine) = engine();
        let m = Mutex::new();
        assert!(m.try_lock(&engine));
        assert!(!m.try_lock(&engine));
        m.unlock(&engine).unwrap();
    }

    #[test]
    fn lock_critical_releases_afterwards() {
        let (_, engine) = engine();
        let m = Mutex::new();
        let out = m.lock_critical(&engine, |_| 42).unwrap();
        assert_eq!(out, 42);
        assert!(!m.is_locked());
    }

    // ── Ownership ─────────────────────────────────────────────────────────────

    #[test]
    fn owner_relock_and_foreign_unlock_are_errors() {
        let (tasks, engine) = engine();
        let m = Arc::new(Mutex::new());
        let results = Arc::new(StdMutex::new(Vec::new()));

        let (m1, r1) = (Arc::clone(&m), Arc::clone(&results));
        let holder = tasks.register(5, move |s| {
            m1.lock(s).unwrap();
            r1.lock().unwrap().push(("relock", m1.lock(s)));
            s.yield_now();
            m1.unlock(s).unwrap();
        });
        let (m2, r2) = (Arc::clone(&m), Arc::clone(&results));
        let intruder = tasks.register(1, move |s| {
            r2.lock().unwrap().push(("foreign", m2.unlock(s)));
        });
        let uh = engine.schedule_task(holder, STACK).unwrap();
        let ui = engine.schedule_task(intruder, STACK).unwrap();
        drain(&engine);

        let results = results.lock().unwrap();
        assert_eq!(results[0], ("relock", Err(SyncError::AlreadyOwned { unit: uh })));
        assert_eq!(
            results[1],
            ("foreign", Err(SyncError::NotOwner { caller: Some(ui) }))
        );
        assert!(!m.is_locked());
    }

    // ── Hand-off ──────────────────────────────────────────────────────────────

    #[test]
    fn unlock_hands_over_to_most_recently_parked_waiter() {
        let (tasks, engine) = engine();
        let m = Arc::new(Mutex::new());
        let parked = Arc::new(StdMutex::new(Vec::new()));
        let acquired = Arc::new(StdMutex::new(Vec::new()));
        let after_unlock = Arc::new(StdMutex::new(None));

        let (mh, ah) = (Arc::clone(&m), Arc::clone(&after_unlock));
        let holder = tasks.register(9, move |s| {
            mh.lock(s).unwrap();
            while mh.waiting() < 2 {
                s.yield_now();
            }
            mh.unlock(s).unwrap();
            *ah.lock().unwrap() = Some((mh.is_locked(), mh.owner()));
        });
        engine.schedule_task(holder, STACK).unwrap();

        for name in ["w1", "w2"] {
            let (mw, p, a) = (Arc::clone(&m), Arc::clone(&parked), Arc::clone(&acquired));
            let waiter = tasks.register(1, move |s| {
                p.lock().unwrap().push(name);
                mw.lock(s).unwrap();
                a.lock().unwrap().push((name, s.current()));
                mw.unlock(s).unwrap();
            });
            engine.schedule_task(waiter, STACK).unwrap();
        }
        drain(&engine);

        let parked = parked.lock().unwrap().clone();
        let acquired = acquired.lock().unwrap().clone();
        let names: Vec<&str> = acquired.iter().map(|(n, _)| *n).collect();
        let mut expected = parked.clone();
        expected.reverse();
        assert_eq!(names, expected);

        // The lock went straight from the holder to the last waiter.
        let (locked, owner) = after_unlock.lock().unwrap().unwrap();
        assert!(locked);
        assert_eq!(owner, acquired[0].1);
        assert!(!m.is_locked());
        assert_eq!(engine.unit_count(), 0);
    }

    #[test]
    fn at_most_one_holder_under_contention() {
        let (tasks, engine) = engine();
        let m = Arc::new(Mutex::new());
        let inside = Arc::new(AtomicBool::new(false));
        let violations = Arc::new(AtomicUsize::new(0));
        let entries = Arc::new(AtomicUsize::new(0));

        for priority in [4, 3, 2, 1] {
            let (m, inside, violations, entries) = (
                Arc::clone(&m),
                Arc::clone(&inside),
                Arc::clone(&violations),
                Arc::clone(&entries),
            );
            let task = tasks.register(priority, move |s| {
                for _ in 0..5 {
                    m.lock(s).unwrap();
                    if inside.swap(true, Ordering::SeqCst) {
                        violations.fetch_add(1, Ordering::SeqCst);
                    }
                    entries.fetch_add(1, Ordering::SeqCst);
                    s.yield_now();
                    inside.store(false, Ordering::SeqCst);
                    m.unlock(s).unwrap();
                    s.yield_now();
                }
            });
            engine.schedule_task(task, STACK).unwrap();
        }
        drain(&engine);

        assert_eq!(violations.load(Ordering::SeqCst), 0);
        assert_eq!(entries.load(Ordering::SeqCst), 20);
        assert_eq!(engine.unit_count(), 0);
        assert!(!m.is_locked());
    }

    #[test]
    fn unlock_from_base_wakes_a_parked_unit() {
        let (tasks, engine) = engine();
        let m = Arc::new(Mutex::new());
        let got = Arc::new(AtomicBool::new(false));
        let (mw, g) = (Arc::clone(&m), Arc::clone(&got));
        let task = tasks.register(1, move |s| {
            mw.lock(s).unwrap();
            g.store(true, Ordering::SeqCst);
            mw.unlock(s).unwrap();
        });

        m.lock(&engine).unwrap();
        let unit = engine.schedule_task(task, STACK).unwrap();
        assert_eq!(engine.run(), Some(unit));
        assert_eq!(m.waiting(), 1);
        assert!(!got.load(Ordering::SeqCst));

        m.unlock(&engine).unwrap();
        assert_eq!(m.owner(), Some(unit));
        drain(&engine);
        assert!(got.load(Ordering::SeqCst));
        assert!(!m.is_locked());
    }

    #[test]
    fn destroyed_waiter_is_skipped() {
        let (tasks, engine) = engine();
        let m = Arc::new(Mutex::new());
        let mw = Arc::clone(&m);
        let task = tasks.register(1, move |s| {
            let _ = mw.lock(s);
        });

        m.lock(&engine).unwrap();
        let unit = engine.schedule_task(task, STACK).unwrap();
        engine.run();
        assert!(engine.unschedule(unit));

        m.unlock(&engine).unwrap();
        assert!(!m.is_locked());
        assert_eq!(m.waiting(), 0);
    }
}
