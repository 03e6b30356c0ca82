// src/exec/pool.rs

//! Batched task backend in front of a single dispatch worker.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::{PackflowError, Result};
use crate::exec::backend::TaskBackend;
use crate::exec::batch::{BatchDispatcher, BatchPayload, BatchResults};
use crate::exec::dispatch_loop::{DispatchRequest, spawn_dispatch_worker};
use crate::exec::task::Task;

/// Default number of tasks per dispatched batch.
pub const DEFAULT_TASK_BATCH_SIZE: usize = 128;

/// A batch that has been handed to the worker.
struct SealedBatch {
    batch_id: Uuid,
    tasks: Vec<Task>,
    reply: oneshot::Receiver<anyhow::Result<BatchResults>>,
}

/// Per-job batching state.
#[derive(Default)]
struct JobBatches {
    /// Tasks not yet sealed into a batch.
    current: Vec<Task>,
    sealed: Vec<SealedBatch>,
}

/// Task backend that groups each job's tasks into fixed-size batches.
///
/// - Every `batch_size`-th task submitted for a job seals the job's current
///   batch and sends it to the dispatch worker right away.
/// - The final partial batch is sealed when `wait_for_results` is called.
/// - A batch whose dispatch fails for any reason fails all of its tasks with
///   exit code 1, so a waiting job always resumes.
pub struct PoolTaskBackend {
    batch_size: usize,
    grace: Duration,
    jobs: Mutex<HashMap<Uuid, JobBatches>>,
    sender: Mutex<Option<mpsc::UnboundedSender<DispatchRequest>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for PoolTaskBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolTaskBackend")
            .field("batch_size", &self.batch_size)
            .field("grace", &self.grace)
            .field("pending_jobs", &self.jobs.lock().len())
            .finish_non_exhaustive()
    }
}

impl PoolTaskBackend {
    /// Create the backend and spawn its dispatch worker.
    ///
    /// Must be called from within a Tokio runtime. `batch_size` is clamped to
    /// at least 1.
    pub fn new(dispatcher: Arc<dyn BatchDispatcher>, batch_size: usize, grace: Duration) -> Self {
        let (tx, handle) = spawn_dispatch_worker(dispatcher);
        Self {
            batch_size: batch_size.max(1),
            grace,
            jobs: Mutex::new(HashMap::new()),
            sender: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(handle)),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Serialize `tasks` and queue them on the worker.
    ///
    /// Failures to serialize or enqueue resolve the batch immediately as
    /// failed; the caller still receives a waitable batch.
    fn seal(&self, job_id: Uuid, tasks: Vec<Task>) -> SealedBatch {
        let batch_id = Uuid::new_v4();
        let (reply_tx, reply_rx) = oneshot::channel();

        let payload = BatchPayload {
            batch_id,
            job_id,
            tasks: tasks.iter().map(Task::to_request).collect(),
        };

        match payload.to_bytes() {
            Ok(bytes) => {
                let request = DispatchRequest {
                    batch_id,
                    job_id,
                    size: tasks.len(),
                    payload: bytes,
                    reply: reply_tx,
                };
                match self.sender.lock().as_ref() {
                    Some(tx) => {
                        if let Err(mpsc::error::SendError(request)) = tx.send(request) {
                            let _ = request.reply.send(Err(anyhow!("dispatch worker is gone")));
                        }
                    }
                    None => {
                        let _ = request
                            .reply
                            .send(Err(anyhow!("task backend has been shut down")));
                    }
                }
            }
            Err(e) => {
                let _ = reply_tx.send(Err(anyhow!("serializing batch: {e}")));
            }
        }

        debug!(batch = %batch_id, job = %job_id, size = tasks.len(), "sealed batch");

        SealedBatch {
            batch_id,
            tasks,
            reply: reply_rx,
        }
    }
}

/// Wait for one batch and write its results back onto the tasks.
async fn resolve_batch(batch: SealedBatch) -> Vec<Task> {
    let SealedBatch {
        batch_id,
        mut tasks,
        reply,
    } = batch;

    match reply.await {
        Ok(Ok(mut results)) => {
            for task in tasks.iter_mut() {
                match results.remove(&task.id) {
                    Some(result) => task.apply_result(result),
                    None => {
                        warn!(batch = %batch_id, task = %task.id, "no result returned for task");
                        task.fail("no result returned for task");
                    }
                }
            }
        }
        Ok(Err(e)) => {
            let diagnostic = e.to_string();
            for task in tasks.iter_mut() {
                task.fail(diagnostic.clone());
            }
        }
        Err(_) => {
            warn!(batch = %batch_id, "dispatch worker dropped the batch");
            for task in tasks.iter_mut() {
                task.fail("dispatch worker dropped the batch");
            }
        }
    }

    tasks
}

impl TaskBackend for PoolTaskBackend {
    fn submit_task(&self, job_id: Uuid, task: Task) -> Result<()> {
        if self.sender.lock().is_none() {
            return Err(PackflowError::BackendShutDown);
        }

        let mut jobs = self.jobs.lock();
        let entry = jobs.entry(job_id).or_default();
        entry.current.push(task);

        if entry.current.len() >= self.batch_size {
            let tasks = std::mem::take(&mut entry.current);
            let sealed = self.seal(job_id, tasks);
            entry.sealed.push(sealed);
        }

        Ok(())
    }

    fn wait_for_results(
        &self,
        job_id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Task>>> + Send + '_>> {
        Box::pin(async move {
            let batches = {
                let mut jobs = self.jobs.lock();
                let Some(mut entry) = jobs.remove(&job_id) else {
                    return Ok(Vec::new());
                };
                if !entry.current.is_empty() {
                    let tasks = std::mem::take(&mut entry.current);
                    let sealed = self.seal(job_id, tasks);
                    entry.sealed.push(sealed);
                }
                entry.sealed
            };

            debug!(job = %job_id, batches = batches.len(), "waiting for batch results");

            let mut finished = Vec::new();
            for batch in batches {
                finished.extend(resolve_batch(batch).await);
            }
            Ok(finished)
        })
    }

    fn shutdown(&self, wait: bool) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            // Dropping the sender lets the worker drain what is queued and exit.
            drop(self.sender.lock().take());

            let handle = self.worker.lock().take();
            let Some(mut handle) = handle else {
                return;
            };

            if !wait {
                handle.abort();
                info!("task backend stopped without waiting");
                return;
            }

            match tokio::time::timeout(self.grace, &mut handle).await {
                Ok(_) => info!("task backend drained and stopped"),
                Err(_) => {
                    warn!(
                        grace_ms = self.grace.as_millis() as u64,
                        "task backend did not drain within grace period; aborting worker"
                    );
                    handle.abort();
                }
            }
        })
    }
}
