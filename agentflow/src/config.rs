//! Agent configuration (TOML).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::export::DEFAULT_TRACE_FILENAME;

/// One step of the agent's scripted sequence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepSpec {
    /// Node name recorded in the trace.
    pub name: String,
    /// How long the step waits, in milliseconds. Zero completes immediately.
    #[serde(default)]
    pub wait_ms: u64,
}

impl StepSpec {
    pub fn new(name: impl Into<String>, wait_ms: u64) -> Self {
        Self {
            name: name.into(),
            wait_ms,
        }
    }
}

/// Agent configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields default to
/// the stock step sequence the agent ships with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Destination for the exported trace document.
    pub trace_path: PathBuf,

    /// Destination for the persistent log sink.
    pub log_path: PathBuf,

    /// Poll interval for background status checks, in milliseconds.
    pub poll_interval_ms: u64,

    /// Steps executed in order by the agent.
    pub steps: Vec<StepSpec>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            trace_path: PathBuf::from(DEFAULT_TRACE_FILENAME),
            log_path: PathBuf::from("agent.log"),
            poll_interval_ms: 1_000,
            steps: vec![
                StepSpec::new("Initialize", 100),
                StepSpec::new("Load Configuration", 100),
                StepSpec::new("Process Tasks", 200),
                StepSpec::new("Execute Actions", 100),
                StepSpec::new("Cleanup", 100),
            ],
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(anyhow!("poll_interval_ms must be > 0"));
        }
        if self.steps.is_empty() {
            return Err(anyhow!("steps must be non-empty"));
        }
        for step in &self.steps {
            if step.name.trim().is_empty() {
                return Err(anyhow!("step names must be non-empty"));
            }
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AgentConfig::default()`.
pub fn load_config(path: &Path) -> Result<AgentConfig> {
    if !path.exists() {
        let cfg = AgentConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AgentConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AgentConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, &buf)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
