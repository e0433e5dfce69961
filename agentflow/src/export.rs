//! Trace document load/save with schema + invariant validation.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use jsonschema::Draft;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::flow::TraceBody;
use crate::invariants::validate_invariants;

/// Default destination for an exported trace.
pub const DEFAULT_TRACE_FILENAME: &str = "agent_trace.json";

const TRACE_SCHEMA: &str = include_str!("../schemas/trace/v1.schema.json");

/// Top-level exported trace document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceDocument {
    pub agent_name: String,
    /// RFC 3339, or null if the flow never started.
    pub start_time: Option<String>,
    /// RFC 3339, or null if the flow never ended.
    pub end_time: Option<String>,
    pub trace: TraceBody,
}

/// Atomically write a trace document as pretty-printed JSON with trailing
/// newline (temp file + rename), overwriting any existing file.
pub fn write_trace(path: &Path, document: &TraceDocument) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(document).context("serialize trace")?;
    buf.push('\n');
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, &buf)
        .with_context(|| format!("write temp trace {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace trace {}", path.display()))?;
    Ok(())
}

/// Load a trace document from disk without validation.
pub fn load_trace(path: &Path) -> Result<TraceDocument> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read trace {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse trace {}", path.display()))
}

/// Validate a raw trace document against the bundled schema (Draft 2020-12).
pub fn validate_schema(document: &Value) -> Result<()> {
    let schema: Value =
        serde_json::from_str(TRACE_SCHEMA).context("parse bundled trace schema")?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .context("compile trace schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(document)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("trace schema validation failed:\n- {}", messages.join("\n- "));
    }
    Ok(())
}

/// Load a trace document and check it: schema conformance, then structural
/// invariants over the rendered tree.
pub fn load_validated(path: &Path) -> Result<TraceDocument> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read trace {}", path.display()))?;
    let raw: Value =
        serde_json::from_str(&contents).with_context(|| format!("parse trace {}", path.display()))?;
    validate_schema(&raw)?;
    let document: TraceDocument = serde_json::from_value(raw)
        .with_context(|| format!("deserialize trace {}", path.display()))?;
    if let TraceBody::Tree(root) = &document.trace {
        let errors = validate_invariants(root);
        if !errors.is_empty() {
            bail!("trace invariant violations:\n- {}", errors.join("\n- "));
        }
    }
    Ok(document)
}
