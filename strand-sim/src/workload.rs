/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Workload description for the simulator.
//!
//! ```yaml
//! engine:
//!   default_stack_size: 16384
//! tasks:
//!   - name: sensor
//!     priority: 4
//!     iterations: 10
//!   - name: logger
//!     priority: 1
//!     iterations: 3
//!     sleep_ms: 20
//!     stack_size: 32768
//! ```

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

use strand::EngineConfig;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TaskSpec {
    pub name: String,
    pub priority: u8,
    /// How many times the body yields (or sleeps) before it returns.
    pub iterations: u32,
    /// Sleep this long between iterations instead of yielding.
    #[serde(default)]
    pub sleep_ms: u32,
    /// Falls back to `engine.default_stack_size`.
    pub stack_size: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Workload {
    #[serde(default)]
    pub engine: EngineConfig,
    pub tasks: Vec<TaskSpec>,
}

impl Workload {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        info!("Loading workload from: {}", path.display());

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open workload file: {}", path.display()))?;

        let workload: Workload = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML file: {}", path.display()))?;

        workload
            .validate()
            .with_context(|| format!("Invalid workload: {}", path.display()))?;

        for task in &workload.tasks {
            debug!(
                name = %task.name,
                priority = task.priority,
                iterations = task.iterations,
                sleep_ms = task.sleep_ms,
                "  Task"
            );
        }
        info!("Loaded {} task(s)", workload.tasks.len());
        Ok(workload)
    }

    fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        if self.tasks.is_empty() {
            bail!("workload defines no tasks");
        }
        for (i, task) in self.tasks.iter().enumerate() {
            if self.tasks[..i].iter().any(|t| t.name == task.name) {
                bail!("duplicate task name '{}'", task.name);
            }
            if task.stack_size == Some(0) {
                bail!("task '{}' has a zero stack size", task.name);
            }
        }
        Ok(())
    }

    pub fn stack_size(&self, task: &TaskSpec) -> usize {
        task.stack_size.unwrap_or(self.engine.default_stack_size)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
