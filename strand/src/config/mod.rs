/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Engine configuration loading.
//!
//! The expected YAML structure is:
//! ```yaml
//! engine:
//!   default_stack_size: 4096
//!   timer_period_us: 1000
//!   min_timer_period_us: 50
//! ```
//!
//! Every key is optional; missing values fall back to [`EngineConfig::default`].

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

// ── Private YAML deserialization types ────────────────────────────────────────

/// Top-level wrapper that maps directly onto the YAML file layout.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    engine: EngineConfig,
}

// ── Public data structures ────────────────────────────────────────────────────

/// Tunables shared by the engines.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Stack size, in bytes, used when a workload does not name one.
    pub default_stack_size: usize,
    /// Nominal preemption period in microseconds.
    pub timer_period_us: u32,
    /// Lower bound for the re-armed period after a long tick.
    pub min_timer_period_us: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_stack_size: 4096,
            timer_period_us: 1000,
            min_timer_period_us: 50,
        }
    }
}

impl EngineConfig {
    /// Load and validate the `engine:` section of a YAML file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        info!("Loading engine configuration from: {}", path.display());

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open configuration file: {}", path.display()))?;

        let config = Self::from_yaml_str(&content)
            .with_context(|| format!("Failed to parse YAML file: {}", path.display()))?;

        info!(
            stack = config.default_stack_size,
            period_us = config.timer_period_us,
            floor_us = config.min_timer_period_us,
            "Engine configuration loaded"
        );
        Ok(config)
    }

    /// Parse and validate a YAML document holding an optional `engine:` section.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        // An empty document deserializes as unit, not as a map.
        if content.trim().is_empty() {
            debug!("Empty configuration document, using defaults");
            return Ok(Self::default());
        }
        let file: ConfigFile = serde_yaml::from_str(content)?;
        file.engine.validate()?;
        Ok(file.engine)
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_stack_size == 0 {
            bail!("default_stack_size must be non-zero");
        }
        if self.timer_period_us == 0 {
            bail!("timer_period_us must be non-zero");
        }
        if self.min_timer_period_us > self.timer_period_us {
            bail!(
                "min_timer_period_us ({}) exceeds timer_period_us ({})",
                self.min_timer_period_us,
                self.timer_period_us
            );
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// Helper: write a YAML string to a temp file and return it.
    fn yaml_tempfile(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn default_values() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.default_stack_size, 4096);
        assert_eq!(cfg.timer_period_us, 1000);
        assert_eq!(cfg.min_timer_period_us, 50);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn full_file_is_loaded() {
        let f = yaml_tempfile(
            "engine:\n  default_stack_size: 8192\n  timer_period_us: 500\n  min_timer_period_us: 20\n",
        );
        let cfg = EngineConfig::load_from_file(f.path()).unwrap();
        assert_eq!(
            cfg,
            EngineConfig {
                default_stack_size: 8192,
                timer_period_us: 500,
                min_timer_period_us: 20,
            }
        );
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let f = yaml_tempfile("engine:\n  timer_period_us: 2000\n");
        let cfg = EngineConfig::load_from_file(f.path()).unwrap();
        assert_eq!(cfg.timer_period_us, 2000);
        assert_eq!(cfg.default_stack_size, 4096);
        assert_eq!(cfg.min_timer_period_us, 50);
    }

    #[test]
    fn missing_section_uses_defaults() {
        let f = yaml_tempfile("other: 1\n");
        let cfg = EngineConfig::load_from_file(f.path()).unwrap();
        assert_eq!(cfg, EngineConfig::default());
    }

    #[test]
    fn empty_file_uses_defaults() {
        let f = yaml_tempfile("");
        assert_eq!(
            EngineConfig::load_from_file(f.path()).unwrap(),
            EngineConfig::default()
        );
    }

    #[test]
    fn missing_file_returns_error() {
        let result = EngineConfig::load_from_file(Path::new("/nonexistent/path/config.yaml"));
        let err = result.unwrap_err();
        assert!(err.to_string().contains("Cannot open configuration file"));
    }

    #[test]
    fn malformed_yaml_returns_error() {
        let f = yaml_tempfile("this is: not: valid: yaml: content:::");
        let err = EngineConfig::load_from_file(f.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse YAML file"));
    }

    #[test]
    fn zero_period_is_rejected() {
        let f = yaml_tempfile("engine:\n  timer_period_us: 0\n  min_timer_period_us: 0\n");
        assert!(EngineConfig::load_from_file(f.path()).is_err());
    }

    #[test]
    fn floor_above_period_is_rejected() {
        let err = EngineConfig::from_yaml_str("engine:\n  timer_period_us: 100\n  min_timer_period_us: 200\n")
            .unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }

    #[test]
    fn zero_stack_is_rejected() {
        assert!(EngineConfig::from_yaml_str("engine:\n  default_stack_size: 0\n").is_err());
    }
}
