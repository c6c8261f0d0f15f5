/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Thread-backed stackful execution context.
//!
//! A [`Strand`] runs one unit body on a dedicated OS thread whose stack is
//! sized from the unit's request.  A baton guarantees that exactly one side
//! (the *home* side that called [`Resumer::resume`] or the strand) executes at
//! any time, so a strand behaves like a coroutine: it suspends mid-function
//! with its locals intact and continues from the same point when resumed.
//!
//! ```text
//!   home                          strand
//!   ────                          ──────
//!   resume() ──── Turn::Strand ──►  body runs …
//!     (blocked)                     suspend_current()
//!   ◄──────────── Turn::Home ─────  (blocked)
//!   resume() ──── Turn::Strand ──►  … body continues
//!   ◄──────────── Turn::Home ─────  body returns, finished
//! ```
//!
//! Dropping a [`Strand`] that has not finished passes `Turn::Cancelled`; the
//! strand unwinds from its suspension point without running any further body
//! code and the thread (and with it the stack) goes away.

use std::cell::RefCell;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::warn;

use crate::unit::UnitId;

/// Host threads need room for the runtime's own frames (unwinding,
/// formatting) on top of whatever the unit asked for.
pub(crate) const HOST_MIN_STACK: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Turn {
    Home,
    Strand,
    Cancelled,
}

#[derive(Debug)]
struct Baton {
    turn: Mutex<Turn>,
    handoff: Condvar,
    finished: AtomicBool,
}

impl Baton {
    fn new() -> Self {
        Self {
            turn: Mutex::new(Turn::Home),
            handoff: Condvar::new(),
            finished: AtomicBool::new(false),
        }
    }

    fn pass(&self, to: Turn) {
        *self.turn.lock().unwrap_or_else(PoisonError::into_inner) = to;
        self.handoff.notify_all();
    }

    /// Block while the turn is `turn`; return the turn that ended the wait.
    fn wait_while(&self, turn: Turn) -> Turn {
        let guard = self.turn.lock().unwrap_or_else(PoisonError::into_inner);
        let guard = self
            .handoff
            .wait_while(guard, |t| *t == turn)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }

    fn finish(&self) {
        self.finished.store(true, Ordering::Release);
        self.pass(Turn::Home);
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

/// Unwind payload for a cancelled strand.
struct Cancelled;

#[derive(Clone)]
struct Link {
    engine: u64,
    unit: UnitId,
    baton: Arc<Baton>,
}

thread_local! {
    static CURRENT: RefCell<Option<Link>> = const { RefCell::new(None) };
}

/// The unit the calling thread runs as, if it is a strand of `engine`.
pub(crate) fn current_unit(engine: u64) -> Option<UnitId> {
    CURRENT.with(|c| {
        c.borrow()
            .as_ref()
            .filter(|link| link.engine == engine)
            .map(|link| link.unit)
    })
}

/// Hand control back to the home side and block until resumed.
///
/// Unwinds the calling strand if it is cancelled while suspended.  Outside a
/// strand this does nothing.
pub(crate) fn suspend_current() {
    let Some(baton) = CURRENT.with(|c| c.borrow().as_ref().map(|l| Arc::clone(&l.baton))) else {
        return;
    };
    baton.pass(Turn::Home);
    if baton.wait_while(Turn::Home) == Turn::Cancelled {
        panic::resume_unwind(Box::new(Cancelled));
    }
}

/// What a [`Resumer::resume`] call came back with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Suspended,
    Finished,
}

/// Cheap handle used to resume a strand without holding the strand itself.
#[derive(Clone)]
pub(crate) struct Resumer {
    baton: Arc<Baton>,
}

impl Resumer {
    /// Run the strand until it suspends or finishes.
    pub(crate) fn resume(&self) -> Outcome {
        if self.baton.is_finished() {
            return Outcome::Finished;
        }
        self.baton.pass(Turn::Strand);
        self.baton.wait_while(Turn::Strand);
        if self.baton.is_finished() {
            Outcome::Finished
        } else {
            Outcome::Suspended
        }
    }
}

pub(crate) struct Strand {
    baton: Arc<Baton>,
    thread: Option<JoinHandle<()>>,
}

impl Strand {
    /// Start a strand for `unit`.  The body does not run until the first
    /// [`Resumer::resume`].
    pub(crate) fn spawn<F>(engine: u64, unit: UnitId, stack_size: usize, entry: F) -> io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let baton = Arc::new(Baton::new());
        let link = Link {
            engine,
            unit,
            baton: Arc::clone(&baton),
        };
        let thread = thread::Builder::new()
            .name(format!("strand-{}", unit.raw()))
            .stack_size(stack_size.max(HOST_MIN_STACK))
            .spawn(move || trampoline(link, entry))?;
        Ok(Self {
            baton,
            thread: Some(thread),
        })
    }

    pub(crate) fn resumer(&self) -> Resumer {
        Resumer {
            baton: Arc::clone(&self.baton),
        }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.baton.is_finished()
    }
}

impl Drop for Strand {
    fn drop(&mut self) {
        if !self.baton.is_finished() {
            self.baton.pass(Turn::Cancelled);
        }
        if let Some(thread) = self.thread.take() {
            // A strand cannot wait for its own thread.
            if thread.thread().id() != thread::current().id() {
                let _ = thread.join();
            }
        }
    }
}

fn trampoline<F: FnOnce()>(link: Link, entry: F) {
    let baton = Arc::clone(&link.baton);
    let unit = link.unit;
    if baton.wait_while(Turn::Home) == Turn::Cancelled {
        baton.finish();
        return;
    }
    CURRENT.with(|c| *c.borrow_mut() = Some(link));
    let result = panic::catch_unwind(AssertUnwindSafe(entry));
    CURRENT.with(|c| c.borrow_mut().take());
    if let Err(payload) = result {
        if !payload.is::<Cancelled>() {
            warn!(unit = %unit, reason = panic_message(&*payload), "unit body panicked");
        }
    }
    baton.finish();
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
