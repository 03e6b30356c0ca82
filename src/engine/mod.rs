// src/engine/mod.rs

//! Orchestration engine for packflow.
//!
//! This module ties together:
//! - the package-level scheduler ([`queue::PackageQueue`])
//! - per-package status reporting ([`status::StatusBoard`])
//! - the [`Engine`] facade used by the CLI and by embedding code to submit
//!   packages, read their status and answer decisions.

pub mod queue;
pub mod status;

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::choices::ProcessingConfigChoices;
use crate::config::ConfigFile;
use crate::errors::{PackflowError, Result};
use crate::exec::{BatchDispatcher, PoolTaskBackend};
use crate::fs::FileSystem;
use crate::jobs::{Choice, JobChain, JobServices};
use crate::package::{Package, PackageKind};
use crate::store::Store;
use crate::workflow::Workflow;

pub use queue::{PackageQueue, QueueFull, QueueSettings};
pub use status::{CurrentJob, PackageReport, PackageStatus, StatusBoard};

/// Entry point for running packages through a workflow.
pub struct Engine {
    workflow: Arc<Workflow>,
    services: JobServices,
    queue: Arc<PackageQueue>,
    status: Arc<StatusBoard>,
    packages: RwLock<HashMap<Uuid, Arc<Package>>>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("queue", &self.queue)
            .field("packages", &self.packages.read().len())
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn new(workflow: Arc<Workflow>, services: JobServices, settings: QueueSettings) -> Self {
        let status = Arc::new(StatusBoard::new());
        let queue = Arc::new(PackageQueue::new(settings, Arc::clone(&status)));
        Self {
            workflow,
            services,
            queue,
            status,
            packages: RwLock::new(HashMap::new()),
        }
    }

    /// Wire the production collaborators described by `config`.
    ///
    /// Must be called from within a Tokio runtime (the task backend spawns
    /// its dispatch worker).
    pub fn from_config(
        config: &ConfigFile,
        workflow: Arc<Workflow>,
        store: Arc<dyn Store>,
        fs: Arc<dyn FileSystem>,
        dispatcher: Arc<dyn BatchDispatcher>,
    ) -> Self {
        let backend = Arc::new(PoolTaskBackend::new(
            dispatcher,
            config.backend.task_batch_size,
            config.shutdown_grace(),
        ));
        let choices = Arc::new(ProcessingConfigChoices::new(
            Arc::clone(&fs),
            config.choices.processing_file.clone(),
        ));

        let services = JobServices {
            backend,
            store,
            choices,
            fs,
            settings: config.job_settings(),
        };

        Self::new(workflow, services, config.queue_settings())
    }

    /// Submit a package; it starts at the default chain for its kind.
    pub fn submit(
        &self,
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        kind: PackageKind,
    ) -> Result<Uuid> {
        self.submit_package(Package::new(name, kind, path))
    }

    pub fn submit_package(&self, package: Package) -> Result<Uuid> {
        let package = Arc::new(package);
        let package_id = package.id();

        let job = JobChain::start(
            Arc::clone(&package),
            Arc::clone(&self.workflow),
            self.services.clone(),
        )?
        .ok_or_else(|| {
            PackflowError::WorkflowError(format!(
                "start chain for {} packages has no links",
                package.kind()
            ))
        })?;

        self.status.register(&package);
        if let Err(full) = self.queue.schedule_job(job) {
            self.status.forget(package_id);
            return Err(full.into());
        }

        info!(
            package = %package_id,
            name = package.name(),
            kind = %package.kind(),
            "package submitted"
        );
        self.packages.write().insert(package_id, package);
        Ok(package_id)
    }

    pub fn read(&self, package_id: Uuid) -> Option<PackageReport> {
        self.status.get(package_id)
    }

    pub fn reports(&self) -> Vec<PackageReport> {
        self.status.all()
    }

    pub fn choices(&self, package_id: Uuid) -> Result<Vec<Choice>> {
        self.ensure_known(package_id)?;
        self.queue.choices(package_id)
    }

    pub async fn decide(&self, package_id: Uuid, choice: &str) -> Result<()> {
        self.ensure_known(package_id)?;
        self.queue.decide(package_id, choice).await
    }

    pub fn is_package_active(&self, package_id: Uuid) -> bool {
        self.queue.is_package_active(package_id)
    }

    /// Every package is finished or waiting for a decision.
    pub fn is_settled(&self) -> bool {
        self.queue.is_idle() && self.status.is_settled()
    }

    /// Run the scheduler until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        self.queue.work(shutdown).await;
    }

    /// Stop the task backend, letting in-flight batches finish.
    pub async fn shutdown(&self) {
        self.services.backend.shutdown(true).await;
    }

    pub fn workflow(&self) -> &Arc<Workflow> {
        &self.workflow
    }

    pub fn queue(&self) -> &Arc<PackageQueue> {
        &self.queue
    }

    pub fn services(&self) -> &JobServices {
        &self.services
    }

    fn ensure_known(&self, package_id: Uuid) -> Result<()> {
        if self.packages.read().contains_key(&package_id) {
            Ok(())
        } else {
            Err(PackflowError::PackageNotFound(package_id))
        }
    }
}
