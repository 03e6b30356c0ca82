// src/jobs/mod.rs

//! Jobs: one execution of one workflow link for one package.
//!
//! A [`Job`] owns the [`JobChain`] it came from. Running a job and then
//! calling [`Job::into_next`] hands the chain over to the following job, so
//! a package can never have two jobs in flight at once.
//!
//! The variant behaviour lives in submodules:
//!
//! - [`client_script`]: directory, files and output client-script links.
//! - [`decision`]: next-chain, update-context and output decisions.
//! - [`unit_variable`]: set/get unit variable links.

pub mod chain;
pub mod client_script;
pub mod decision;
pub mod unit_variable;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::choices::PreconfiguredChoices;
use crate::errors::{PackflowError, Result};
use crate::exec::TaskBackend;
use crate::fs::FileSystem;
use crate::package::Package;
use crate::store::{JobRecord, RetryPolicy, Store, TaskRecord, retrying};
use crate::workflow::{ChainId, JobStatus, Link, ManagerKind};

pub use chain::JobChain;
pub use decision::Choice;

/// Result of running a job once.
#[derive(Debug)]
pub enum JobOutcome {
    /// The job finished with this exit code; the chain may advance.
    Completed(i32),
    /// The job waits for a decision; the package stays active.
    Suspended,
    /// The job could not run at all.
    Failed(PackflowError),
}

/// Engine-wide knobs jobs need while running.
#[derive(Debug, Clone, Default)]
pub struct JobSettings {
    /// Value of `%sharedPath%`.
    pub shared_path: PathBuf,
    /// Keep stdout/stderr of every client script, not only failing ones.
    pub capture_output: bool,
    /// Link whose directory job finishes the first processing stage.
    pub stage_transition_link: Option<String>,
    pub retry: RetryPolicy,
}

/// Collaborators handed to every job chain.
#[derive(Clone)]
pub struct JobServices {
    pub backend: Arc<dyn TaskBackend>,
    pub store: Arc<dyn Store>,
    pub choices: Arc<dyn PreconfiguredChoices>,
    pub fs: Arc<dyn FileSystem>,
    pub settings: JobSettings,
}

impl fmt::Debug for JobServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobServices")
            .field("store", &self.store)
            .field("choices", &self.choices)
            .field("fs", &self.fs)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// One execution of a link for a package.
#[derive(Debug)]
pub struct Job {
    id: Uuid,
    link: Arc<Link>,
    chain: JobChain,
    exit_code: Option<i32>,
    status: JobStatus,
    awaiting_decision: bool,
    /// Chain chosen by a next-chain decision.
    redirect: Option<ChainId>,
    tasks: Vec<TaskRecord>,
}

impl Job {
    pub(crate) fn new(link: Arc<Link>, chain: JobChain) -> Self {
        Self {
            id: Uuid::new_v4(),
            link,
            chain,
            exit_code: None,
            status: JobStatus::Unknown,
            awaiting_decision: false,
            redirect: None,
            tasks: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn link(&self) -> &Arc<Link> {
        &self.link
    }

    pub fn chain(&self) -> &JobChain {
        &self.chain
    }

    pub fn package(&self) -> &Arc<Package> {
        self.chain.package()
    }

    pub fn package_id(&self) -> Uuid {
        self.chain.package().id()
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn is_awaiting_decision(&self) -> bool {
        self.awaiting_decision
    }

    /// Number of tasks the job has run.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Finished tasks, in the order the backend returned them.
    pub fn tasks(&self) -> &[TaskRecord] {
        &self.tasks
    }

    /// Run the job's link.
    ///
    /// The package location is reloaded from the store first, and the job's
    /// start and final status are persisted. Store failures never fail the
    /// job.
    pub async fn run(&mut self) -> JobOutcome {
        let services = self.chain.services().clone();

        self.reload_location(&services).await;
        self.record_start(&services).await;

        info!(
            package = %self.package_id(),
            job = %self.id,
            link = %self.link.id,
            manager = %self.link.manager,
            "running job"
        );

        let result = match self.link.manager {
            ManagerKind::Directory => self.run_directory(&services).await,
            ManagerKind::Files => self.run_files(&services).await,
            ManagerKind::OutputClientScript => self.run_output_client_script(&services).await,
            ManagerKind::NextChainDecision
            | ManagerKind::UpdateContextDecision
            | ManagerKind::OutputDecision => self.run_decision(&services).await,
            ManagerKind::SetUnitVariable => self.run_set_unit_variable(&services).await,
            ManagerKind::GetUnitVariable => self.run_get_unit_variable(&services).await,
        };

        let outcome = result.unwrap_or_else(JobOutcome::Failed);

        match &outcome {
            JobOutcome::Completed(code) => self.finish(*code, &services).await,
            JobOutcome::Suspended => {
                self.status = JobStatus::AwaitingDecision;
                self.persist_status(&services).await;
            }
            JobOutcome::Failed(e) => {
                warn!(job = %self.id, link = %self.link.id, error = %e, "job failed to run");
                self.status = JobStatus::Failed;
                self.persist_status(&services).await;
            }
        }

        outcome
    }

    /// Consume the finished job and build the next one for its package.
    ///
    /// `Ok(None)` means the chain is exhausted.
    pub fn into_next(self) -> Result<Option<Job>> {
        let Job {
            chain,
            redirect,
            exit_code,
            ..
        } = self;

        match redirect {
            Some(chain_id) => chain.switch_to(&chain_id)?.advance(None),
            None => chain.advance(exit_code),
        }
    }

    /// Record the exit code and the status the link maps it to.
    async fn finish(&mut self, exit_code: i32, services: &JobServices) {
        self.exit_code = Some(exit_code);
        self.status = self.link.status_for(exit_code);
        debug!(
            job = %self.id,
            link = %self.link.id,
            exit_code,
            status = ?self.status,
            "job finished"
        );
        self.persist_status(services).await;
    }

    async fn reload_location(&self, services: &JobServices) {
        let package = self.chain.package();
        let id = package.id();
        let location = retrying(&services.settings.retry, "current_location", || {
            services.store.current_location(id)
        })
        .await
        .flatten();

        if let Some(path) = location {
            package.set_current_path(path);
        }
    }

    async fn record_start(&self, services: &JobServices) {
        let record = JobRecord {
            job_id: self.id,
            package_id: self.package_id(),
            link_id: self.link.id.clone(),
            description: self.link.description.clone(),
            group: self.link.group.clone(),
            status: JobStatus::Executing,
            created_at: Utc::now(),
        };
        retrying(&services.settings.retry, "job_started", || {
            services.store.job_started(&record)
        })
        .await;
    }

    async fn persist_status(&self, services: &JobServices) {
        let status = self.status;
        retrying(&services.settings.retry, "job_status_changed", || {
            services.store.job_status_changed(self.id, status)
        })
        .await;
    }
}
