// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum PackflowError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Workflow error: {0}")]
    WorkflowError(String),

    #[error("Link not found: {0}")]
    LinkNotFound(String),

    #[error("Chain not found: {0}")]
    ChainNotFound(String),

    #[error("Invalid choice '{choice}' for link {link_id}")]
    InvalidChoice { link_id: String, choice: String },

    #[error("Link {0} is not a decision point")]
    NotADecision(String),

    #[error("Package {0} is not awaiting a decision")]
    NotAwaitingDecision(Uuid),

    #[error("Package not found: {0}")]
    PackageNotFound(Uuid),

    #[error("Task backend has been shut down")]
    BackendShutDown,

    #[error("Job queue is full ({0} jobs)")]
    QueueFull(usize),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, PackflowError>;
