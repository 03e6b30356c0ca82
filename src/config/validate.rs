// src/config/validate.rs

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{PackflowError, Result};
use crate::workflow::Workflow;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::PackflowError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_engine(cfg)?;
    validate_backend(cfg)?;
    validate_store(cfg)?;
    validate_choices(cfg)?;
    Ok(())
}

fn at_least_one(section: &str, key: &str, value: u64) -> Result<()> {
    if value == 0 {
        return Err(PackflowError::ConfigError(format!(
            "[{section}].{key} must be >= 1 (got 0)"
        )));
    }
    Ok(())
}

fn validate_engine(cfg: &RawConfigFile) -> Result<()> {
    let engine = &cfg.engine;
    at_least_one("engine", "max_concurrent_packages", engine.max_concurrent_packages as u64)?;
    at_least_one("engine", "worker_count", engine.worker_count as u64)?;
    at_least_one("engine", "job_queue_capacity", engine.job_queue_capacity as u64)?;
    at_least_one("engine", "poll_interval_ms", engine.poll_interval_ms)?;

    if let Some(link) = &engine.stage_transition_link {
        if link.trim().is_empty() {
            return Err(PackflowError::ConfigError(
                "[engine].stage_transition_link must not be empty".to_string(),
            ));
        }
    }
    Ok(())
}

fn validate_backend(cfg: &RawConfigFile) -> Result<()> {
    at_least_one("backend", "task_batch_size", cfg.backend.task_batch_size as u64)?;
    at_least_one("backend", "max_parallel_tasks", cfg.backend.max_parallel_tasks as u64)?;
    Ok(())
}

fn validate_store(cfg: &RawConfigFile) -> Result<()> {
    at_least_one("store", "retry_attempts", cfg.store.retry_attempts as u64)
}

fn validate_choices(cfg: &RawConfigFile) -> Result<()> {
    if cfg.choices.processing_file.trim().is_empty() {
        return Err(PackflowError::ConfigError(
            "[choices].processing_file must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Checks that need both the configuration and the workflow.
pub fn validate_against_workflow(config: &ConfigFile, workflow: &Workflow) -> Result<()> {
    if let Some(link) = &config.engine.stage_transition_link {
        if workflow.link(link).is_err() {
            return Err(PackflowError::ConfigError(format!(
                "[engine].stage_transition_link refers to unknown link '{link}'"
            )));
        }
    }
    Ok(())
}
