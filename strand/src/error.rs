/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Structured error types for the execution engines and sync primitives.
//!
//! Three enums model the failure layers:
//!
//! * [`StackError`]: why a stack arena could not be carved out (low-level,
//!   carries the exact byte counts).
//! * [`EngineError`]: why `schedule_task` created no unit. On every variant
//!   the task stays unbound and simply never runs.
//! * [`SyncError`]: misuse of a [`Mutex`](crate::sync::Mutex) or
//!   [`ConditionVar`](crate::sync::ConditionVar).
//!
//! Benign conditions (yield with no current unit, unscheduling a unit twice,
//! a nested `run()`) are not errors; see the engine docs for their return
//! values.

use thiserror::Error;

use crate::unit::{TaskId, UnitId};

// ── Stack allocation ──────────────────────────────────────────────────────────

/// Why a [`StackArena`](crate::stack::StackArena) could not be allocated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StackError {
    #[error("requested stack size is zero")]
    Empty,

    /// The padded size does not fit a valid allocation layout.
    #[error("stack of {0} bytes exceeds the addressable layout")]
    TooLarge(usize),

    #[error("allocator returned no memory for {0} bytes")]
    OutOfMemory(usize),
}

// ── Timer peripheral ──────────────────────────────────────────────────────────

/// Failure reported by a [`HardwareTimer`](crate::platform::HardwareTimer)
/// when the periodic interrupt cannot be armed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct TimerError(pub String);

// ── Engine ────────────────────────────────────────────────────────────────────

/// Why an engine refused to create a unit for a task.
///
/// | Variant            | Origin                                          |
/// |--------------------|-------------------------------------------------|
/// | `UnknownTask`      | registry has no binding or body for the task    |
/// | `InvalidStackSize` | zero-byte stack requested                       |
/// | `StackAllocation`  | arena allocation failed                         |
/// | `Spawn`            | host strand thread could not be created         |
/// | `TimerStart`       | preemptive timer failed to arm on first unit    |
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("task {task} is not known to the task registry")]
    UnknownTask { task: TaskId },

    #[error("task {task} requested an invalid stack size of {size} bytes")]
    InvalidStackSize { task: TaskId, size: usize },

    #[error("stack for task {task} ({size} bytes) could not be allocated: {source}")]
    StackAllocation {
        task: TaskId,
        size: usize,
        #[source]
        source: StackError,
    },

    #[error("strand for task {task} could not be spawned: {source}")]
    Spawn {
        task: TaskId,
        #[source]
        source: std::io::Error,
    },

    #[error("preemption timer could not be armed at {period_us} us: {source}")]
    TimerStart {
        period_us: u32,
        #[source]
        source: TimerError,
    },
}

impl EngineError {
    /// The task the failed request was made for, when there is one.
    pub fn task(&self) -> Option<TaskId> {
        match self {
            EngineError::UnknownTask { task }
            | EngineError::InvalidStackSize { task, .. }
            | EngineError::StackAllocation { task, .. }
            | EngineError::Spawn { task, .. } => Some(*task),
            EngineError::TimerStart { .. } => None,
        }
    }
}

// ── Sync primitives ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SyncError {
    /// The operation needs to park the caller, but the caller is not a unit
    /// of the scheduler it passed in.
    #[error("no current unit to park")]
    NoCurrentUnit,

    /// `unlock()` or `wait()` by a caller that does not hold the mutex.
    #[error("mutex is not held by {}", display_owner(.caller))]
    NotOwner { caller: Option<UnitId> },

    /// `lock()` by the unit that already holds the mutex.
    #[error("mutex is already held by {unit}")]
    AlreadyOwned { unit: UnitId },
}

fn display_owner(caller: &Option<UnitId>) -> String {
    match caller {
        Some(unit) => unit.to_string(),
        None => "the base context".to_string(),
    }
}
