//! Controller configuration stored in `automation.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::policy::Policy;

/// Controller configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields default to
/// the values a fresh `automation init` writes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ControllerConfig {
    pub policy: Policy,
    pub scheduler: SchedulerConfig,
    pub workers: WorkerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// A busy worker silent for longer than this loses its test.
    pub heartbeat_timeout_secs: u64,

    /// Consecutive heartbeat timeouts before a worker is disconnected for good.
    pub retry_budget: u32,

    /// Interval between scheduling ticks in milliseconds.
    pub tick_interval_ms: u64,

    /// Abort the whole run after this many seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_run_secs: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_secs: 300,
            retry_budget: 3,
            tick_interval_ms: 1000,
            max_run_secs: None,
        }
    }
}

impl SchedulerConfig {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn max_run(&self) -> Option<Duration> {
        self.max_run_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of local worker sessions.
    pub count: u32,

    /// How often a running local worker reports a heartbeat, in milliseconds.
    pub heartbeat_interval_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: 1,
            heartbeat_interval_ms: 1000,
        }
    }
}

impl WorkerConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<()> {
        let scheduler = &self.scheduler;
        if scheduler.heartbeat_timeout_secs == 0 {
            return Err(anyhow!("scheduler.heartbeat_timeout_secs must be > 0"));
        }
        if scheduler.retry_budget == 0 {
            return Err(anyhow!("scheduler.retry_budget must be > 0"));
        }
        if scheduler.tick_interval_ms == 0 {
            return Err(anyhow!("scheduler.tick_interval_ms must be > 0"));
        }
        if scheduler.max_run_secs == Some(0) {
            return Err(anyhow!("scheduler.max_run_secs must be > 0 when set"));
        }
        if self.workers.count == 0 {
            return Err(anyhow!("workers.count must be > 0"));
        }
        if self.workers.heartbeat_interval_ms == 0 {
            return Err(anyhow!("workers.heartbeat_interval_ms must be > 0"));
        }
        if self.workers.heartbeat_interval() >= scheduler.heartbeat_timeout() {
            return Err(anyhow!(
                "workers.heartbeat_interval_ms must be shorter than scheduler.heartbeat_timeout_secs"
            ));
        }
        if self
            .policy
            .suppressed_categories
            .iter()
            .any(|category| category.trim().is_empty())
        {
            return Err(anyhow!("policy.suppressed_categories must not contain empty names"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ControllerConfig::default()`.
pub fn load_config(path: &Path) -> Result<ControllerConfig> {
    if !path.exists() {
        let cfg = ControllerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ControllerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ControllerConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, ControllerConfig::default());
        assert!(cfg.policy.treat_errors_as_failures);
        assert!(!cfg.policy.treat_warnings_as_failures);
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("automation.toml");
        let mut cfg = ControllerConfig::default();
        cfg.scheduler.max_run_secs = Some(600);
        cfg.policy.suppressed_categories.insert("LogShaders".to_string());
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("automation.toml");
        fs::write(
            &path,
            "[policy]\ntreat_warnings_as_failures = true\n\n[workers]\ncount = 4\n",
        )
        .expect("write");
        let cfg = load_config(&path).expect("load");
        assert!(cfg.policy.treat_errors_as_failures);
        assert!(cfg.policy.treat_warnings_as_failures);
        assert_eq!(cfg.workers.count, 4);
        assert_eq!(cfg.scheduler, SchedulerConfig::default());
    }

    #[test]
    fn rejects_heartbeat_interval_beyond_timeout() {
        let mut cfg = ControllerConfig::default();
        cfg.scheduler.heartbeat_timeout_secs = 1;
        cfg.workers.heartbeat_interval_ms = 1000;
        let err = cfg.validate().expect_err("invalid");
        assert!(err.to_string().contains("heartbeat_interval_ms"));
    }

    #[test]
    fn rejects_zero_retry_budget() {
        let mut cfg = ControllerConfig::default();
        cfg.scheduler.retry_budget = 0;
        let err = cfg.validate().expect_err("invalid");
        assert!(err.to_string().contains("retry_budget"));
    }
}
