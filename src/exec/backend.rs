// src/exec/backend.rs

//! Pluggable task backend abstraction.
//!
//! Jobs talk to a `TaskBackend` instead of running commands themselves.
//! This makes it easy to swap in a fake backend or dispatcher in tests
//! while keeping the production implementation in [`super::pool`].

use std::future::Future;
use std::pin::Pin;

use uuid::Uuid;

use crate::errors::Result;
use crate::exec::task::Task;

/// Trait abstracting how tasks are executed.
///
/// Production code uses [`super::PoolTaskBackend`].
pub trait TaskBackend: Send + Sync {
    /// Hand a task over for execution.
    ///
    /// Never blocks; implementations may hold the task back to batch it
    /// with later submissions for the same job.
    fn submit_task(&self, job_id: Uuid, task: Task) -> Result<()>;

    /// Wait until every task submitted for `job_id` is done and return them.
    ///
    /// Call once per job, after its last `submit_task`. Order of the
    /// returned tasks is unspecified. A job that submitted nothing gets an
    /// empty vector.
    fn wait_for_results(
        &self,
        job_id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Task>>> + Send + '_>>;

    /// Stop accepting tasks and release workers.
    ///
    /// With `wait = true`, in-flight batches get the backend's grace period
    /// to finish.
    fn shutdown(&self, wait: bool) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}
