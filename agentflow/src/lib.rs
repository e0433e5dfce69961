//! Background task runner that records its execution as a tree of
//! timestamped trace nodes.
//!
//! Architecture, leaf first:
//!
//! - [`node`]: the trace node arena: lifecycle states, transition
//!   timestamps, owned children, parent back-references.
//! - [`flow`]: the flow controller serializing every tree mutation behind a
//!   single coarse lock.
//! - [`export`] / [`invariants`]: trace document serialization, JSON Schema
//!   validation, and structural checks.
//! - [`agent`]: scripted execution, foreground or background, with a status
//!   surface for external polling.
//! - [`config`] / [`logging`]: TOML configuration and `tracing` setup, owned
//!   by the binary rather than installed at load time.

pub mod agent;
pub mod config;
pub mod export;
pub mod flow;
pub mod invariants;
pub mod logging;
pub mod node;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
