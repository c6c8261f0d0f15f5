/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Execution engines.
//!
//! | Engine                | Suspends at              | Selection        |
//! |-----------------------|--------------------------|------------------|
//! | [`CooperativeEngine`] | explicit calls           | priority + aging |
//! | [`FiberEngine`]       | explicit calls           | LIFO             |
//! | [`PreemptiveEngine`]  | any timer interrupt      | priority + aging |
//!
//! All three implement [`Scheduler`](crate::sched::Scheduler), which is what
//! unit bodies and the sync primitives are written against.

pub mod cooperative;
pub mod preemptive;
pub(crate) mod strand;

pub use cooperative::{CooperativeEngine, FiberEngine};
pub use preemptive::{next_period, PreemptPlatform, PreemptiveEngine};

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ENGINE: AtomicU64 = AtomicU64::new(1);

/// Process-unique engine id; strands use it to tell which engine they
/// belong to.
pub(crate) fn next_engine_id() -> u64 {
    NEXT_ENGINE.fetch_add(1, Ordering::Relaxed)
}
