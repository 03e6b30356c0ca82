// src/config/model.rs

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::engine::QueueSettings;
use crate::jobs::JobSettings;
use crate::store::RetryPolicy;

/// Engine configuration as read from `packflow.toml`.
///
/// ```toml
/// [engine]
/// max_concurrent_packages = 2
/// worker_count = 4
/// shared_directory = "/var/packflow/shared"
///
/// [backend]
/// task_batch_size = 128
/// scripts_dir = "/usr/lib/packflow/scripts"
///
/// [store]
/// retry_attempts = 3
///
/// [choices]
/// processing_file = "processingMCP.toml"
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub engine: EngineSection,

    #[serde(default)]
    pub backend: BackendSection,

    #[serde(default)]
    pub store: StoreSection,

    #[serde(default)]
    pub choices: ChoicesSection,
}

/// `[engine]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EngineSection {
    /// Packages processed at the same time.
    #[serde(default = "default_max_concurrent_packages")]
    pub max_concurrent_packages: usize,

    /// Jobs running at the same time.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    #[serde(default = "default_job_queue_capacity")]
    pub job_queue_capacity: usize,

    /// How long the scheduler waits for work before re-checking shutdown.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Time running jobs and batches get to finish on shutdown.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,

    /// Keep stdout/stderr of every client script.
    #[serde(default)]
    pub capture_client_script_output: bool,

    /// Value of `%sharedPath%`.
    #[serde(default)]
    pub shared_directory: PathBuf,

    /// Link whose directory job finishes the first processing stage.
    #[serde(default)]
    pub stage_transition_link: Option<String>,
}

fn default_max_concurrent_packages() -> usize {
    2
}

fn default_worker_count() -> usize {
    4
}

fn default_job_queue_capacity() -> usize {
    1024
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_concurrent_packages: default_max_concurrent_packages(),
            worker_count: default_worker_count(),
            job_queue_capacity: default_job_queue_capacity(),
            poll_interval_ms: default_poll_interval_ms(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            capture_client_script_output: false,
            shared_directory: PathBuf::new(),
            stage_transition_link: None,
        }
    }
}

/// `[backend]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BackendSection {
    #[serde(default = "default_task_batch_size")]
    pub task_batch_size: usize,

    /// Client scripts of one batch running at the same time.
    #[serde(default = "default_max_parallel_tasks")]
    pub max_parallel_tasks: usize,

    /// Directory bare script names are resolved against.
    #[serde(default)]
    pub scripts_dir: Option<PathBuf>,
}

fn default_task_batch_size() -> usize {
    crate::exec::DEFAULT_TASK_BATCH_SIZE
}

fn default_max_parallel_tasks() -> usize {
    4
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            task_batch_size: default_task_batch_size(),
            max_parallel_tasks: default_max_parallel_tasks(),
            scripts_dir: None,
        }
    }
}

/// `[store]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StoreSection {
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    100
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

/// `[choices]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChoicesSection {
    /// File inside a package holding preconfigured choices.
    #[serde(default = "default_processing_file")]
    pub processing_file: String,
}

fn default_processing_file() -> String {
    "processingMCP.toml".to_string()
}

impl Default for ChoicesSection {
    fn default() -> Self {
        Self {
            processing_file: default_processing_file(),
        }
    }
}

/// Validated configuration.
///
/// Built via `TryFrom<RawConfigFile>` (see `config::validate`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFile {
    pub engine: EngineSection,
    pub backend: BackendSection,
    pub store: StoreSection,
    pub choices: ChoicesSection,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self::new_unchecked(RawConfigFile::default())
    }
}

impl ConfigFile {
    /// Construct a config **without** validation.
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            engine: raw.engine,
            backend: raw.backend,
            store: raw.store,
            choices: raw.choices,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.store.retry_attempts,
            base_delay: Duration::from_millis(self.store.retry_backoff_ms),
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.engine.shutdown_grace_secs)
    }

    pub fn queue_settings(&self) -> QueueSettings {
        QueueSettings {
            max_concurrent_packages: self.engine.max_concurrent_packages,
            worker_count: self.engine.worker_count,
            job_queue_capacity: self.engine.job_queue_capacity,
            poll_interval: Duration::from_millis(self.engine.poll_interval_ms),
            shutdown_grace: self.shutdown_grace(),
        }
    }

    pub fn job_settings(&self) -> JobSettings {
        JobSettings {
            shared_path: self.engine.shared_directory.clone(),
            capture_output: self.engine.capture_client_script_output,
            stage_transition_link: self.engine.stage_transition_link.clone(),
            retry: self.retry_policy(),
        }
    }
}
