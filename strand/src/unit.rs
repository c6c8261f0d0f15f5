/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Execution unit data model shared by every engine.
//!
//! ```text
//!             schedule_task
//!                  │
//!                  ▼          pick          yield
//!   wake ──►   Ready  ───────────────►  Running ──────► Ready
//!               ▲  ▲                     │    │
//!   deadline ───┘  └──── wake ─── Mute ◄─┘    └──► Sleeping ──► (deadline)
//!                                             │
//!                                  return / exit
//!                                             ▼
//!                                         Finished ──► destroyed
//! ```
//!
//! # Ownership model
//! An [`ExecutionUnit`] is owned by the scheduler core of the engine that
//! created it, together with its execution context `C` (a strand for the
//! cooperative engines, a stack arena plus saved frame for the preemptive
//! one).  The task it runs is owned by the external
//! [`TaskRegistry`](crate::platform::TaskRegistry); the unit only carries the
//! [`TaskBinding`] copied out of it at creation.

use std::fmt;

// ── Identifiers ───────────────────────────────────────────────────────────────

/// Engine-local identifier of one execution unit.
///
/// Ids are handed out in increasing order and are not reused within one
/// engine before the 32-bit counter wraps, so until then a stale id cannot
/// address a newer unit.  The wrap skips [`UnitId::BASE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(u32);

impl UnitId {
    /// The synthetic unit standing for whatever ran before a preemptive
    /// engine took over.
    pub const BASE: UnitId = UnitId(0);

    pub(crate) const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit#{}", self.0)
    }
}

/// Opaque task identifier issued by the external task registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u32);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

// ── State ─────────────────────────────────────────────────────────────────────

/// Lifecycle state of an execution unit.
///
/// At most one unit per engine is `Running`.  A `Ready` unit sits in the ready
/// queue, a `Sleeping` unit in the sleep queue, never both.  A `Mute` unit is
/// in neither and only comes back through an explicit wake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnitState {
    #[default]
    Ready,
    Running,
    Sleeping,
    Mute,
    /// Terminal. The unit is destroyed before the next scheduling pass.
    Finished,
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnitState::Ready => "ready",
            UnitState::Running => "running",
            UnitState::Sleeping => "sleeping",
            UnitState::Mute => "mute",
            UnitState::Finished => "finished",
        };
        f.write_str(s)
    }
}

// ── Binding ───────────────────────────────────────────────────────────────────

/// What an engine learns about a task when it binds a unit to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskBinding {
    pub task: TaskId,
    /// Base priority; higher runs first. Aging adds to it while the unit waits.
    pub priority: u8,
}

// ── Execution unit ────────────────────────────────────────────────────────────

/// One schedulable strand of work.
///
/// `C` is the engine-specific execution context.  Everything else is the
/// scheduling bookkeeping the shared core reads and writes.
#[derive(Debug)]
pub struct ExecutionUnit<C> {
    pub(crate) id: UnitId,
    pub(crate) state: UnitState,
    /// `None` only for the synthetic base unit.
    pub(crate) binding: Option<TaskBinding>,
    /// Passes this unit was considered and skipped since it last ran.
    pub(crate) wait_ticks: u8,
    pub(crate) stack_size: usize,
    pub(crate) context: C,
}

impl<C> ExecutionUnit<C> {
    /// Units are born `Ready`; the caller is responsible for queueing them.
    pub(crate) fn new(
        id: UnitId,
        binding: Option<TaskBinding>,
        stack_size: usize,
        context: C,
    ) -> Self {
        Self {
            id,
            state: UnitState::Ready,
            binding,
            wait_ticks: 0,
            stack_size,
            context,
        }
    }

    pub fn id(&self) -> UnitId {
        self.id
    }

    pub fn state(&self) -> UnitState {
        self.state
    }

    pub fn task(&self) -> Option<TaskId> {
        self.binding.map(|b| b.task)
    }

    pub fn base_priority(&self) -> u8 {
        self.binding.map_or(0, |b| b.priority)
    }

    /// Effective priority used by aging selection.
    pub fn score(&self) -> u16 {
        u16::from(self.base_priority()) + u16::from(self.wait_ticks)
    }

    /// Saturates at 255.
    pub(crate) fn age(&mut self) {
        self.wait_ticks = self.wait_ticks.saturating_add(1);
    }

    pub(crate) fn info(&self) -> UnitInfo {
        UnitInfo {
            id: self.id,
            task: self.task(),
            priority: self.base_priority(),
            state: self.state,
            wait_ticks: self.wait_ticks,
            stack_size: self.stack_size,
        }
    }
}

/// Point-in-time view of a unit, as returned by `snapshot()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitInfo {
    pub id: UnitId,
    pub task: Option<TaskId>,
    pub priority: u8,
    pub state: UnitState,
    pub wait_ticks: u8,
    pub stack_size: usize,
}

impl fmt::Display for UnitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.task {
            Some(task) => write!(f, "{} {}", self.id, task)?,
            None => write!(f, "{} base", self.id)?,
        }
        write!(
            f,
            " prio={} wait={} state={} stack={}",
            self.priority, self.wait_ticks, self.state, self.stack_size
        )
    }
}
