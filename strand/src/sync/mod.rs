/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Blocking primitives for units.
//!
//! Both primitives block by parking the calling unit through
//! [`Scheduler::park`](crate::sched::Scheduler::park) and unblock by waking
//! it.  Neither has a timed wait: a parked unit resumes only through
//! `unlock` or `notify_*`.

pub mod condvar;
pub mod mutex;

pub use condvar::ConditionVar;
pub use mutex::Mutex;
