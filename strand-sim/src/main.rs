/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

mod workload;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{error, info, warn};

use strand::{
    CooperativeEngine, EngineError, FiberEngine, MonotonicClock, Scheduler, TaskId, TaskTable,
    UnitId, UnitInfo,
};
use workload::Workload;

// ── CLI argument definition ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum EngineKind {
    Cooperative,
    Fiber,
}

/// Host simulator for the strand execution engines.
///
/// Example:
///   strand-sim --workload workloads/demo.yaml --engine fiber
#[derive(Debug, Parser)]
#[command(
    name = "strand-sim",
    about = "Runs a YAML workload on a strand engine and reports selections",
    long_about = None,
)]
struct Cli {
    /// Path to the YAML workload file.
    #[arg(short = 'w', long = "workload")]
    workload: PathBuf,

    /// Engine driving the workload.
    #[arg(short = 'e', long = "engine", value_enum, default_value_t = EngineKind::Cooperative)]
    engine: EngineKind,

    /// Give up after this many scheduling passes.
    #[arg(short = 'm', long = "max-passes", default_value_t = 100_000)]
    max_passes: u64,
}

// ── Engine wrapper ────────────────────────────────────────────────────────────

enum Sim {
    Cooperative(CooperativeEngine),
    Fiber(FiberEngine),
}

impl Sim {
    fn new(kind: EngineKind, tasks: Arc<TaskTable>) -> Self {
        let clock = Arc::new(MonotonicClock::new());
        match kind {
            EngineKind::Cooperative => Sim::Cooperative(CooperativeEngine::new(tasks, clock)),
            EngineKind::Fiber => Sim::Fiber(FiberEngine::new(tasks, clock)),
        }
    }

    fn schedule_task(&self, task: TaskId, stack_size: usize) -> Result<UnitId, EngineError> {
        match self {
            Sim::Cooperative(e) => e.schedule_task(task, stack_size),
            Sim::Fiber(e) => e.schedule_task(task, stack_size),
        }
    }

    fn run(&self) -> Option<UnitId> {
        match self {
            Sim::Cooperative(e) => e.run(),
            Sim::Fiber(e) => e.run(),
        }
    }

    fn unit_count(&self) -> usize {
        match self {
            Sim::Cooperative(e) => e.unit_count(),
            Sim::Fiber(e) => e.unit_count(),
        }
    }

    fn next_wake_in_ms(&self) -> Option<u32> {
        match self {
            Sim::Cooperative(e) => e.next_wake_in_ms(),
            Sim::Fiber(e) => e.next_wake_in_ms(),
        }
    }

    fn snapshot(&self) -> Vec<UnitInfo> {
        match self {
            Sim::Cooperative(e) => e.snapshot(),
            Sim::Fiber(e) => e.snapshot(),
        }
    }
}

// ── Simulation ────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Report {
    passes: u64,
    idle_passes: u64,
    selections: BTreeMap<String, u64>,
    finished: bool,
}

fn simulate(workload: &Workload, kind: EngineKind, max_passes: u64) -> Result<Report> {
    let tasks = Arc::new(TaskTable::new());
    let sim = Sim::new(kind, tasks.clone());
    let mut names = BTreeMap::new();

    for spec in &workload.tasks {
        let iterations = spec.iterations;
        let sleep_ms = spec.sleep_ms;
        let task = tasks.register(spec.priority, move |s: &dyn Scheduler| {
            for _ in 0..iterations {
                if sleep_ms > 0 {
                    s.sleep(sleep_ms);
                } else {
                    s.yield_now();
                }
            }
        });
        let unit = sim
            .schedule_task(task, workload.stack_size(spec))
            .with_context(|| format!("Cannot schedule task '{}'", spec.name))?;
        info!(name = %spec.name, %task, %unit, "Scheduled");
        names.insert(unit, spec.name.clone());
    }

    let mut report = Report::default();
    while report.passes < max_passes {
        if sim.unit_count() == 0 {
            report.finished = true;
            break;
        }
        report.passes += 1;
        match sim.run() {
            Some(unit) => {
                let name = names.get(&unit).cloned().unwrap_or_else(|| unit.to_string());
                *report.selections.entry(name).or_default() += 1;
            }
            None => {
                report.idle_passes += 1;
                let wait = sim.next_wake_in_ms().unwrap_or(1).max(1);
                std::thread::sleep(Duration::from_millis(u64::from(wait)));
            }
        }
    }

    if !report.finished {
        for info in sim.snapshot() {
            warn!("Still alive: {}", info);
        }
    }
    Ok(report)
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() {
    // Level is controlled by the RUST_LOG env-var (e.g. RUST_LOG=debug).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    info!(
        workload   = %cli.workload.display(),
        engine     = ?cli.engine,
        max_passes = cli.max_passes,
        "Configuration"
    );

    let workload = match Workload::load_from_file(&cli.workload) {
        Ok(w) => w,
        Err(e) => {
            error!("Failed to load workload: {:#}", e);
            process::exit(1);
        }
    };

    let report = match simulate(&workload, cli.engine, cli.max_passes) {
        Ok(r) => r,
        Err(e) => {
            error!("Simulation failed: {:#}", e);
            process::exit(1);
        }
    };

    for (name, count) in &report.selections {
        info!(task = %name, selections = count, "Selections");
    }
    info!(
        passes = report.passes,
        idle = report.idle_passes,
        "Simulation {}",
        if report.finished { "finished" } else { "stopped at the pass limit" }
    );
    if !report.finished {
        process::exit(2);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
