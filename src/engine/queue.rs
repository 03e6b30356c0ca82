// src/engine/queue.rs

//! Package-level scheduler.
//!
//! Semantics:
//! - At most `max_concurrent_packages` packages are *active* at once. Jobs of
//!   an active package go straight into the ready queue; jobs of other
//!   packages are held back (FIFO) until a slot frees up.
//! - At most `worker_count` jobs run at the same time.
//! - A suspended job (decision point) is parked until decided; its package
//!   keeps its slot.
//! - Once a job finishes, its chain is advanced and the next job is queued.
//!   An exhausted chain (or a failure) deactivates the package, which admits
//!   held-back work.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{Instant, timeout, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::engine::status::{PackageStatus, StatusBoard};
use crate::errors::{PackflowError, Result};
use crate::jobs::{Choice, Job, JobOutcome};

/// Returned by [`PackageQueue::schedule_job`] when the queue has no room.
///
/// Carries the rejected job back to the caller.
#[derive(Debug, Error)]
#[error("job queue is full ({capacity} jobs)")]
pub struct QueueFull {
    pub job: Job,
    pub capacity: usize,
}

impl From<QueueFull> for PackflowError {
    fn from(full: QueueFull) -> Self {
        PackflowError::QueueFull(full.capacity)
    }
}

/// Scheduler limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSettings {
    pub max_concurrent_packages: usize,
    pub worker_count: usize,
    pub job_queue_capacity: usize,
    pub poll_interval: Duration,
    pub shutdown_grace: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_concurrent_packages: 2,
            worker_count: 4,
            job_queue_capacity: 1024,
            poll_interval: Duration::from_millis(250),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Default)]
struct QueueState {
    job_queue: VecDeque<Job>,
    active_packages: HashSet<Uuid>,
    held_back: VecDeque<Job>,
    awaiting: HashMap<Uuid, Job>,
    in_flight: usize,
    /// Most packages ever active at once.
    peak_active: usize,
}

impl QueueState {
    /// Queue the job if its package is (or can become) active, else hold it
    /// back. Returns true when the ready queue grew.
    fn place(&mut self, job: Job, max_active: usize) -> bool {
        let package_id = job.package_id();

        if self.active_packages.contains(&package_id) {
            self.job_queue.push_back(job);
            return true;
        }

        if self.active_packages.len() < max_active {
            self.activate(package_id);
            debug!(package = %package_id, active = self.active_packages.len(), "package activated");
            self.job_queue.push_back(job);
            return true;
        }

        debug!(package = %package_id, held_back = self.held_back.len() + 1, "job held back");
        self.held_back.push_back(job);
        false
    }

    /// Move held-back jobs whose package can now run into the ready queue,
    /// keeping FIFO order for the rest.
    fn admit_held_back(&mut self, max_active: usize) -> bool {
        let mut admitted = false;
        let mut still_held = VecDeque::with_capacity(self.held_back.len());

        while let Some(job) = self.held_back.pop_front() {
            let package_id = job.package_id();
            if self.active_packages.contains(&package_id)
                || self.active_packages.len() < max_active
            {
                self.activate(package_id);
                self.job_queue.push_back(job);
                admitted = true;
            } else {
                still_held.push_back(job);
            }
        }

        self.held_back = still_held;
        admitted
    }

    fn activate(&mut self, package_id: Uuid) {
        self.active_packages.insert(package_id);
        self.peak_active = self.peak_active.max(self.active_packages.len());
    }
}

/// Bounded, package-aware job scheduler.
pub struct PackageQueue {
    settings: QueueSettings,
    state: Mutex<QueueState>,
    ready: Notify,
    workers: Arc<Semaphore>,
    running: Mutex<JoinSet<()>>,
    status: Arc<StatusBoard>,
}

impl fmt::Debug for PackageQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("PackageQueue")
            .field("settings", &self.settings)
            .field("queued", &state.job_queue.len())
            .field("active_packages", &state.active_packages.len())
            .field("held_back", &state.held_back.len())
            .field("awaiting", &state.awaiting.len())
            .field("in_flight", &state.in_flight)
            .field("peak_active", &state.peak_active)
            .finish_non_exhaustive()
    }
}

impl PackageQueue {
    /// Counts in `settings` are clamped to at least 1.
    pub fn new(settings: QueueSettings, status: Arc<StatusBoard>) -> Self {
        let settings = QueueSettings {
            max_concurrent_packages: settings.max_concurrent_packages.max(1),
            worker_count: settings.worker_count.max(1),
            job_queue_capacity: settings.job_queue_capacity.max(1),
            ..settings
        };

        Self {
            workers: Arc::new(Semaphore::new(settings.worker_count)),
            settings,
            state: Mutex::new(QueueState::default()),
            ready: Notify::new(),
            running: Mutex::new(JoinSet::new()),
            status,
        }
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    pub fn status(&self) -> &Arc<StatusBoard> {
        &self.status
    }

    /// Accept a job for scheduling.
    ///
    /// Fails without changing any state when queued plus held-back jobs
    /// already reach `job_queue_capacity`.
    pub fn schedule_job(&self, job: Job) -> std::result::Result<(), QueueFull> {
        let mut state = self.state.lock();
        let capacity = self.settings.job_queue_capacity;

        if state.job_queue.len() + state.held_back.len() >= capacity {
            warn!(package = %job.package_id(), capacity, "job queue full; rejecting job");
            return Err(QueueFull { job, capacity });
        }

        if state.place(job, self.settings.max_concurrent_packages) {
            drop(state);
            self.ready.notify_one();
        }
        Ok(())
    }

    /// Wait up to `wait` for a ready job and a free worker, then start it.
    ///
    /// Returns false when nothing was started.
    pub async fn process_one_job(self: &Arc<Self>, wait: Duration) -> bool {
        self.reap_finished();

        let deadline = Instant::now() + wait;

        loop {
            if !self.state.lock().job_queue.is_empty() {
                break;
            }
            if timeout_at(deadline, self.ready.notified()).await.is_err() {
                return false;
            }
        }

        let permit = match timeout_at(deadline, Arc::clone(&self.workers).acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            _ => return false,
        };

        let job = {
            let mut state = self.state.lock();
            let Some(job) = state.job_queue.pop_front() else {
                return false;
            };
            state.in_flight += 1;
            job
        };

        self.spawn_job(job, permit);
        true
    }

    /// Scheduling loop: start jobs until `shutdown` is cancelled, then give
    /// running jobs the grace period to finish.
    pub async fn work(self: &Arc<Self>, shutdown: CancellationToken) {
        info!(
            max_concurrent_packages = self.settings.max_concurrent_packages,
            worker_count = self.settings.worker_count,
            "package queue started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.process_one_job(self.settings.poll_interval) => {}
            }
        }

        info!("package queue stopping; waiting for running jobs");
        let mut running = std::mem::take(&mut *self.running.lock());
        let drained = timeout(self.settings.shutdown_grace, async {
            while running.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                grace_secs = self.settings.shutdown_grace.as_secs(),
                remaining = running.len(),
                "running jobs did not finish within grace period; aborting"
            );
            running.abort_all();
        }

        info!("package queue stopped");
    }

    pub fn is_package_active(&self, package_id: Uuid) -> bool {
        self.state.lock().active_packages.contains(&package_id)
    }

    /// Nothing queued, held back or running. Packages awaiting a decision do
    /// not keep the queue busy.
    pub fn is_idle(&self) -> bool {
        let state = self.state.lock();
        state.job_queue.is_empty() && state.held_back.is_empty() && state.in_flight == 0
    }

    pub fn active_count(&self) -> usize {
        self.state.lock().active_packages.len()
    }

    /// High-water mark of [`active_count`](Self::active_count).
    pub fn peak_active_count(&self) -> usize {
        self.state.lock().peak_active
    }

    pub fn held_back_count(&self) -> usize {
        self.state.lock().held_back.len()
    }

    pub fn queued_count(&self) -> usize {
        self.state.lock().job_queue.len()
    }

    /// Choices of the decision the package is waiting at.
    pub fn choices(&self, package_id: Uuid) -> Result<Vec<Choice>> {
        let state = self.state.lock();
        let job = state
            .awaiting
            .get(&package_id)
            .ok_or(PackflowError::NotAwaitingDecision(package_id))?;
        job.choices()
    }

    /// Resolve the decision the package is waiting at.
    ///
    /// An invalid choice leaves the package awaiting.
    pub async fn decide(self: &Arc<Self>, package_id: Uuid, choice: &str) -> Result<()> {
        let mut job = self
            .state
            .lock()
            .awaiting
            .remove(&package_id)
            .ok_or(PackflowError::NotAwaitingDecision(package_id))?;

        if let Err(e) = job.decide(choice).await {
            self.state.lock().awaiting.insert(package_id, job);
            return Err(e);
        }

        self.status.job_finished(&job);
        self.continue_chain(job);
        Ok(())
    }

    /// Release the package's slot and admit held-back jobs.
    pub fn deactivate(&self, package_id: Uuid) {
        let admitted = {
            let mut state = self.state.lock();
            state.active_packages.remove(&package_id);
            state.awaiting.remove(&package_id);
            state.admit_held_back(self.settings.max_concurrent_packages)
        };

        debug!(package = %package_id, admitted, "package deactivated");
        if admitted {
            self.ready.notify_one();
        }
    }

    fn spawn_job(self: &Arc<Self>, job: Job, permit: OwnedSemaphorePermit) {
        self.status.job_started(&job);

        let queue = Arc::clone(self);
        self.running.lock().spawn(async move {
            let _permit = permit;
            queue.run_job(job).await;
        });
    }

    fn reap_finished(&self) {
        let mut running = self.running.lock();
        while let Some(joined) = running.try_join_next() {
            if let Err(e) = joined {
                error!(error = %e, "job task ended abnormally");
            }
        }
    }

    async fn run_job(self: Arc<Self>, mut job: Job) {
        let package_id = job.package_id();
        let outcome = job.run().await;

        match outcome {
            JobOutcome::Suspended => {
                // The report must not show the decision before it can be taken.
                let mut state = self.state.lock();
                self.status.awaiting_decision(&job);
                state.awaiting.insert(package_id, job);
            }
            JobOutcome::Completed(_) => {
                self.status.job_finished(&job);
                self.continue_chain(job);
            }
            JobOutcome::Failed(e) => {
                error!(package = %package_id, job = %job.id(), error = %e, "job failed");
                self.status.job_finished(&job);
                self.status.finish(package_id, PackageStatus::Failed);
                self.deactivate(package_id);
            }
        }

        self.state.lock().in_flight -= 1;
    }

    /// Queue the next job of a finished job's chain, or finish the package.
    fn continue_chain(&self, job: Job) {
        let package_id = job.package_id();
        let rejects = job.chain().rejects();
        let last_status = job.status();

        match job.into_next() {
            Ok(Some(next)) => {
                let mut state = self.state.lock();
                if state.job_queue.len() + state.held_back.len()
                    >= self.settings.job_queue_capacity
                {
                    warn!(package = %package_id, "job queue over capacity; keeping follow-up job");
                }
                let queued = state.place(next, self.settings.max_concurrent_packages);
                drop(state);
                if queued {
                    self.ready.notify_one();
                }
            }
            Ok(None) => {
                let status = PackageStatus::on_exhaustion(rejects, last_status);
                info!(package = %package_id, %status, "package finished");
                self.status.finish(package_id, status);
                self.deactivate(package_id);
            }
            Err(e) => {
                error!(package = %package_id, error = %e, "unable to advance job chain");
                self.status.finish(package_id, PackageStatus::Failed);
                self.deactivate(package_id);
            }
        }
    }
}
