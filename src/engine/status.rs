// src/engine/status.rs

//! Per-package progress as seen from outside the engine.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::jobs::Job;
use crate::package::{Package, PackageKind};
use crate::store::TaskRecord;
use crate::workflow::{JobStatus, LinkId};

/// Where a package stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageStatus {
    Processing,
    AwaitingDecision,
    Complete,
    Failed,
    Rejected,
}

impl PackageStatus {
    /// Nothing more will run for the package.
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            PackageStatus::Complete | PackageStatus::Failed | PackageStatus::Rejected
        )
    }

    /// Final status of a package whose chain ran out of links.
    pub fn on_exhaustion(chain_rejects: bool, last_job_status: JobStatus) -> Self {
        if chain_rejects {
            PackageStatus::Rejected
        } else if last_job_status == JobStatus::Failed {
            PackageStatus::Failed
        } else {
            PackageStatus::Complete
        }
    }
}

impl fmt::Display for PackageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PackageStatus::Processing => "processing",
            PackageStatus::AwaitingDecision => "awaiting decision",
            PackageStatus::Complete => "complete",
            PackageStatus::Failed => "failed",
            PackageStatus::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// The job a package is currently at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CurrentJob {
    pub job_id: Uuid,
    pub link_id: LinkId,
    pub description: String,
}

/// Snapshot returned by `Engine::read`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageReport {
    pub package_id: Uuid,
    pub name: String,
    pub kind: PackageKind,
    pub path: PathBuf,
    pub status: PackageStatus,
    pub current_job: Option<CurrentJob>,
    /// Jobs finished so far.
    pub jobs: usize,
    /// Tasks run so far, over all jobs.
    pub tasks: usize,
    /// Tasks of the most recent job that ran any.
    pub task_list: Vec<TaskRecord>,
    pub last_exit_code: Option<i32>,
}

/// Reports for every submitted package.
#[derive(Debug, Default)]
pub struct StatusBoard {
    reports: RwLock<HashMap<Uuid, PackageReport>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, package: &Package) {
        let report = PackageReport {
            package_id: package.id(),
            name: package.name().to_string(),
            kind: package.kind(),
            path: package.current_path(),
            status: PackageStatus::Processing,
            current_job: None,
            jobs: 0,
            tasks: 0,
            task_list: Vec::new(),
            last_exit_code: None,
        };
        self.reports.write().insert(package.id(), report);
    }

    pub fn job_started(&self, job: &Job) {
        self.update(job.package_id(), |report| {
            report.status = PackageStatus::Processing;
            report.current_job = Some(CurrentJob {
                job_id: job.id(),
                link_id: job.link().id.clone(),
                description: job.link().description.clone(),
            });
        });
    }

    pub fn job_finished(&self, job: &Job) {
        self.update(job.package_id(), |report| {
            report.status = PackageStatus::Processing;
            report.path = job.package().current_path();
            report.jobs += 1;
            report.tasks += job.task_count();
            if !job.tasks().is_empty() {
                report.task_list = job.tasks().to_vec();
            }
            report.last_exit_code = job.exit_code();
        });
    }

    pub fn awaiting_decision(&self, job: &Job) {
        self.update(job.package_id(), |report| {
            report.status = PackageStatus::AwaitingDecision;
        });
    }

    pub fn finish(&self, package_id: Uuid, status: PackageStatus) {
        self.update(package_id, |report| {
            report.status = status;
            report.current_job = None;
        });
    }

    pub fn forget(&self, package_id: Uuid) {
        self.reports.write().remove(&package_id);
    }

    pub fn get(&self, package_id: Uuid) -> Option<PackageReport> {
        self.reports.read().get(&package_id).cloned()
    }

    /// Every report, ordered by package name.
    pub fn all(&self) -> Vec<PackageReport> {
        let mut reports: Vec<_> = self.reports.read().values().cloned().collect();
        reports.sort_by(|a, b| a.name.cmp(&b.name).then(a.package_id.cmp(&b.package_id)));
        reports
    }

    /// No package is still processing.
    pub fn is_settled(&self) -> bool {
        self.reports
            .read()
            .values()
            .all(|r| r.status != PackageStatus::Processing)
    }

    fn update(&self, package_id: Uuid, apply: impl FnOnce(&mut PackageReport)) {
        match self.reports.write().get_mut(&package_id) {
            Some(report) => apply(report),
            None => debug!(package = %package_id, "status update for unregistered package"),
        }
    }
}
