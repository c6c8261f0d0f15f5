/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Strand – single-core task execution engine
//!
//! Module layout:
//!
//! ```text
//! lib.rs
//! ├── unit        – execution units, ids and states
//! ├── stack       – aligned, zeroed stack regions
//! ├── platform    – clock, task registry and hardware timer seams
//! ├── config/     – YAML engine configuration
//! ├── error       – engine / sync / stack error types
//! ├── sched/      – scheduler core and the sleep / ready queues
//! ├── engine/     – cooperative, fiber and preemptive engines
//! └── sync/       – mutex and condition variable
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod platform;
pub mod sched;
pub mod stack;
pub mod sync;
pub mod unit;

pub use config::EngineConfig;
pub use engine::{CooperativeEngine, FiberEngine, PreemptPlatform, PreemptiveEngine};
pub use error::{EngineError, StackError, SyncError, TimerError};
pub use platform::{Clock, HardwareTimer, ManualClock, MonotonicClock, TaskRegistry, TaskTable};
pub use sched::{Park, Scheduler};
pub use sync::{ConditionVar, Mutex};
pub use unit::{TaskId, UnitId, UnitInfo, UnitState};
