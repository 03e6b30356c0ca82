// src/workflow/loader.rs

use std::fs;
use std::path::Path;

use tracing::info;

use crate::errors::Result;
use crate::workflow::model::{RawWorkflow, Workflow};

/// Parse a workflow document without semantic validation.
pub fn parse_raw(contents: &str) -> Result<RawWorkflow> {
    let raw: RawWorkflow = toml::from_str(contents)?;
    Ok(raw)
}

/// Parse and validate a workflow document held in memory.
pub fn parse_workflow(contents: &str) -> Result<Workflow> {
    let raw = parse_raw(contents)?;
    Workflow::try_from(raw)
}

/// Load a workflow document from disk and validate it.
///
/// Any failure here is a configuration error: the engine must not start
/// with a workflow it cannot fully resolve.
pub fn load_workflow(path: impl AsRef<Path>) -> Result<Workflow> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;
    let workflow = parse_workflow(&contents)?;

    info!(
        path = %path.display(),
        links = workflow.links().count(),
        chains = workflow.chains().count(),
        "workflow loaded"
    );

    Ok(workflow)
}
