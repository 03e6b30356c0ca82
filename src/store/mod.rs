// src/store/mod.rs

//! Persistence collaborator.
//!
//! The engine reports job starts, status changes and task results, and
//! reads back package locations and unit variables. None of these calls is
//! allowed to stop a workflow: every call goes through [`retrying`], and a
//! call that still fails after the configured attempts is logged and
//! skipped.

pub mod memory;

use std::fmt::Debug;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use uuid::Uuid;

use crate::context::Context;
use crate::errors::Result;
use crate::exec::Task;
use crate::workflow::{JobStatus, LinkId};

pub use memory::MemoryStore;

/// Row written when a job starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: Uuid,
    pub package_id: Uuid,
    pub link_id: LinkId,
    pub description: String,
    pub group: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
}

/// Row written for every finished task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: Uuid,
    pub job_id: Uuid,
    pub execute: String,
    pub arguments: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&Task> for TaskRecord {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.id,
            job_id: task.job_id,
            execute: task.execute.clone(),
            arguments: task.arguments.clone(),
            exit_code: task.exit_code.unwrap_or(1),
            stdout: task.stdout.clone(),
            stderr: task.stderr.clone(),
            finished_at: task.finished_timestamp,
        }
    }
}

/// Value stored by a set-unit-variable link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitVariable {
    pub value: Option<String>,
    pub link_id: Option<LinkId>,
}

/// Persistence operations the engine calls out to.
pub trait Store: Send + Sync + Debug {
    fn job_started(&self, job: &JobRecord) -> Result<()>;

    fn job_status_changed(&self, job_id: Uuid, status: JobStatus) -> Result<()>;

    fn tasks_finished(&self, job_id: Uuid, tasks: &[TaskRecord]) -> Result<()>;

    /// Latest known location of the package, if the store tracks it.
    fn current_location(&self, package_id: Uuid) -> Result<Option<PathBuf>>;

    /// Side effect of finishing the first processing stage of a package.
    fn transition_stage(&self, package_id: Uuid) -> Result<()>;

    fn set_unit_variable(
        &self,
        package_id: Uuid,
        variable: &str,
        value: UnitVariable,
    ) -> Result<()>;

    fn unit_variable(&self, package_id: Uuid, variable: &str) -> Result<Option<UnitVariable>>;

    fn persist_context(&self, package_id: Uuid, context: &Context) -> Result<()>;
}

/// How often, and how patiently, store calls are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff: base * 2^(attempt - 1).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// Run a store operation with retries.
///
/// Returns `None` once every attempt failed; the failure is logged, never
/// propagated.
pub async fn retrying<T>(
    policy: &RetryPolicy,
    what: &str,
    mut op: impl FnMut() -> Result<T>,
) -> Option<T> {
    let attempts = policy.attempts.max(1);

    for attempt in 1..=attempts {
        match op() {
            Ok(value) => return Some(value),
            Err(e) if attempt < attempts => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    operation = what,
                    attempt,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "store call failed; retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                error!(
                    operation = what,
                    attempts,
                    error = %e,
                    "store call failed; giving up"
                );
            }
        }
    }

    None
}
