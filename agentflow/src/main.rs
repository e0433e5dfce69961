//! Background task runner with flow tracing.
//!
//! Runs a named agent through a configured step sequence, recording each step
//! as a timestamped trace node, and exports the tree as a JSON document.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use agentflow::agent::Agent;
use agentflow::config::load_config;
use agentflow::export::load_validated;
use agentflow::logging;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "agentflow",
    version,
    about = "Background task runner with flow tracing"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run an agent through its configured step sequence.
    Run {
        /// Agent name recorded in the trace.
        #[arg(long, default_value = "AgentConstruct")]
        name: String,
        /// Path to the agent config (TOML). A missing file uses defaults.
        #[arg(long, default_value = "agent.toml")]
        config: PathBuf,
        /// Run on a worker thread and poll status until completion.
        #[arg(long)]
        background: bool,
        /// Re-export the trace after the run completes.
        #[arg(long)]
        trace: bool,
        /// Override the trace destination from the config.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Validate an exported trace document against schema and invariants.
    Validate {
        /// Path to the trace JSON document.
        path: PathBuf,
    },
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{:#}", err);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            name,
            config,
            background,
            trace,
            out,
        } => cmd_run(&name, &config, background, trace, out),
        Command::Validate { path } => cmd_validate(&path),
    }
}

fn cmd_run(
    name: &str,
    config_path: &Path,
    background: bool,
    trace: bool,
    out: Option<PathBuf>,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(out) = out {
        config.trace_path = out;
    }
    logging::init(&config.log_path)?;

    let poll_interval = Duration::from_millis(config.poll_interval_ms);
    let trace_path = config.trace_path.clone();
    let mut agent = Agent::new(name, config);

    if background {
        let interrupted = Arc::new(AtomicBool::new(false));
        {
            let interrupted = Arc::clone(&interrupted);
            ctrlc::set_handler(move || interrupted.store(true, Ordering::SeqCst))
                .context("install interrupt handler")?;
        }
        agent.spawn()?;
        println!("Agent '{name}' started in background");
        while agent.is_running() {
            if interrupted.load(Ordering::SeqCst) {
                agent.stop();
                break;
            }
            thread::sleep(poll_interval);
        }
        agent.join()?;
    } else {
        agent.run_blocking()?;
    }

    if trace {
        agent.flow().export_trace(&trace_path)?;
    }
    Ok(())
}

fn cmd_validate(path: &Path) -> Result<()> {
    let document = load_validated(path)?;
    let nodes = document
        .trace
        .tree()
        .map(agentflow::node::NodeSnapshot::node_count)
        .unwrap_or(0);
    println!("{}: ok ({} nodes)", path.display(), nodes);
    Ok(())
}
