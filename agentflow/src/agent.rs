//! Agent wrapper: scripted execution of a flow, foreground or background.
//!
//! The agent drives its [`Flow`] through a configured step sequence, either
//! on the calling thread or on a worker thread it owns via an explicit
//! [`JoinHandle`]. External pollers read progress through [`Agent::status`].

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use crate::config::{AgentConfig, StepSpec};
use crate::flow::{Flow, TraceBody};

/// Status surface for external polling.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentStatus {
    pub name: String,
    pub running: bool,
    pub flow_trace: TraceBody,
}

/// Background task runner that records its execution as a flow trace.
pub struct Agent {
    name: String,
    config: AgentConfig,
    flow: Arc<Flow>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<Result<()>>>,
}

impl Agent {
    /// Create an agent. Nothing runs until [`Agent::run_blocking`] or
    /// [`Agent::spawn`] is called.
    pub fn new(name: impl Into<String>, config: AgentConfig) -> Self {
        let name = name.into();
        Self {
            flow: Arc::new(Flow::new(&name)),
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
            config,
            name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flow(&self) -> &Flow {
        &self.flow
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run the scripted sequence on the calling thread, blocking until done.
    pub fn run_blocking(&mut self) -> Result<()> {
        info!(agent = %self.name, "starting agent");
        self.running.store(true, Ordering::SeqCst);
        let result = run_script(
            &self.flow,
            &self.config.steps,
            &self.config.trace_path,
            &self.running,
        );
        self.running.store(false, Ordering::SeqCst);
        result
    }

    /// Run the scripted sequence on a worker thread and return immediately.
    ///
    /// The handle is kept: callers observe progress via [`Agent::status`] and
    /// collect the outcome with [`Agent::join`]. A second spawn is rejected.
    pub fn spawn(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Err(anyhow!("agent worker already spawned"));
        }
        info!(agent = %self.name, "starting agent");
        self.running.store(true, Ordering::SeqCst);
        let flow = Arc::clone(&self.flow);
        let steps = self.config.steps.clone();
        let trace_path = self.config.trace_path.clone();
        let running = Arc::clone(&self.running);
        let handle = thread::Builder::new()
            .name(format!("agent-{}", self.name))
            .spawn(move || {
                let result = run_script(&flow, &steps, &trace_path, &running);
                running.store(false, Ordering::SeqCst);
                result
            })
            .context("spawn agent worker")?;
        self.worker = Some(handle);
        info!(agent = %self.name, "agent started in background");
        Ok(())
    }

    /// Request an orderly stop. The flag is observed between steps; an
    /// in-flight wait is not interrupted. Stopping a stopped agent is a
    /// no-op.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!(agent = %self.name, "agent stopped");
        }
    }

    /// Join the worker thread, if any, and surface its outcome.
    pub fn join(&mut self) -> Result<()> {
        match self.worker.take() {
            Some(handle) => match handle.join() {
                Ok(result) => result,
                Err(_) => Err(anyhow!("agent worker panicked")),
            },
            None => Ok(()),
        }
    }

    /// Current agent status for external polling.
    pub fn status(&self) -> AgentStatus {
        AgentStatus {
            name: self.name.clone(),
            running: self.is_running(),
            flow_trace: self.flow.get_trace(),
        }
    }
}

/// Drive the flow through `steps`, end it, and export the trace.
///
/// On failure the cursor node is marked `Error` before the error is returned,
/// so a poller that sees `running=false` also sees why.
#[instrument(skip_all, fields(flow = %flow.name(), steps = steps.len()))]
fn run_script(
    flow: &Flow,
    steps: &[StepSpec],
    trace_path: &Path,
    running: &AtomicBool,
) -> Result<()> {
    let result = (|| -> Result<()> {
        flow.start()?;
        for step in steps {
            if !running.load(Ordering::SeqCst) {
                warn!(flow = %flow.name(), "stop requested, abandoning remaining steps");
                break;
            }
            flow.process_node(&step.name, Duration::from_millis(step.wait_ms))?;
        }
        flow.end();
        flow.export_trace(trace_path)?;
        Ok(())
    })();

    if let Err(err) = &result {
        error!(err = %err, "agent run failed");
        flow.fail_current();
    }
    result
}
