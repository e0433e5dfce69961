//! Logging setup for the agent binary.
//!
//! The subscriber is installed explicitly by `main`, never as a side effect
//! of loading this crate. Two sinks: compact console output on stderr, and a
//! persistent append-only log file. Both receive every state-transition
//! event in wall-clock emission order.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the global tracing subscriber.
///
/// Reads `RUST_LOG`. Defaults to `info` if unset.
///
/// # Example
/// ```bash
/// RUST_LOG=agentflow=debug cargo run -- run --name demo
/// ```
pub fn init(log_path: &Path) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("open log file {}", log_path.display()))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .with(fmt::layer().with_writer(Arc::new(file)).with_ansi(false))
        .init();
    Ok(())
}
