// src/workflow/mod.rs

//! Workflow graph: links, chains and their query surface.
//!
//! - [`model`] holds the TOML-backed document types and the validated
//!   [`Workflow`] graph.
//! - [`loader`] reads a document from disk or memory.
//! - [`validate`] turns a [`RawWorkflow`] into a [`Workflow`], failing on
//!   unresolved references and malformed link config.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_workflow, parse_workflow};
pub use model::{
    Chain, ChainId, ExitCodeRule, JobStatus, Link, LinkConfig, LinkId, ManagerKind, RawLink,
    RawWorkflow, ReplacementSet, StartChains, Workflow,
};
