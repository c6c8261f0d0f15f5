/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Condition variable paired with [`Mutex`].
//!
//! `wait()` enlists the caller, releases the mutex and parks in one critical
//! section, so a `notify_*` issued right after the release cannot be lost.
//! Waiters are woken most recently parked first.  As with any condition
//! variable, callers re-check their predicate after `wait()` returns.

use std::cell::RefCell;

use crate::error::SyncError;
use crate::sched::{Park, Scheduler};
use crate::sync::Mutex;
use crate::unit::UnitId;

pub struct ConditionVar {
    waiters: critical_section::Mutex<RefCell<Vec<UnitId>>>,
}

impl ConditionVar {
    pub const fn new() -> Self {
        Self {
            waiters: critical_section::Mutex::new(RefCell::new(Vec::new())),
        }
    }

    /// Release `mutex`, park until notified, then re-acquire `mutex`.
    ///
    /// The caller must hold `mutex`.
    pub fn wait(&self, mutex: &Mutex, sched: &dyn Scheduler) -> Result<(), SyncError> {
        let mut verdict = Ok(());
        let outcome = sched.park(&mut |cs, unit| {
            if let Err(err) = mutex.release(cs, Some(unit), sched) {
                verdict = Err(err);
                return false;
            }
            self.waiters.borrow_ref_mut(cs).push(unit);
            true
        });
        match outcome {
            Park::Parked => mutex.lock(sched),
            Park::Declined => verdict,
            Park::NoUnit => Err(SyncError::NoCurrentUnit),
        }
    }

    /// Wake the most recently parked waiter.  Returns whether one was woken.
    pub fn notify_one(&self, sched: &dyn Scheduler) -> bool {
        critical_section::with(|cs| {
            let mut waiters = self.waiters.borrow_ref_mut(cs);
            while let Some(unit) = waiters.pop() {
                if sched.wake(unit) {
                    return true;
                }
            }
            false
        })
    }

    /// Wake every waiter, most recently parked first.  Returns how many were
    /// woken.
    pub fn notify_all(&self, sched: &dyn Scheduler) -> usize {
        critical_section::with(|cs| {
            let mut waiters = self.waiters.borrow_ref_mut(cs);
            let mut woken = 0;
            while let Some(unit) = waiters.pop() {
                if sched.wake(unit) {
                    woken += 1;
                }
            }
            woken
        })
    }

    pub fn waiting(&self) -> usize {
        critical_section::with(|cs| self.waiters.borrow_ref(cs).len())
    }
}

impl Default for ConditionVar {
    fn default() -> Self {
        Self::new()
    }
}
