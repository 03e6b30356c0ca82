use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::anyhow;
use packflow::context::Context;
use packflow::errors::{PackflowError, Result};
use packflow::store::{JobRecord, MemoryStore, Store, TaskRecord, UnitVariable};
use packflow::workflow::JobStatus;
use uuid::Uuid;

/// Store that fails its first `failures` calls, then behaves like the
/// wrapped [`MemoryStore`].
#[derive(Debug, Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    remaining_failures: AtomicU32,
    calls: AtomicU32,
}

impl FlakyStore {
    pub fn new(failures: u32) -> Self {
        Self {
            inner: MemoryStore::new(),
            remaining_failures: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
        }
    }

    /// Store that never succeeds.
    pub fn broken() -> Self {
        Self::new(u32::MAX)
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn gate(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            Err(PackflowError::Other(anyhow!("store unavailable")))
        } else {
            Ok(())
        }
    }
}

impl Store for FlakyStore {
    fn job_started(&self, job: &JobRecord) -> Result<()> {
        self.gate()?;
        self.inner.job_started(job)
    }

    fn job_status_changed(&self, job_id: Uuid, status: JobStatus) -> Result<()> {
        self.gate()?;
        self.inner.job_status_changed(job_id, status)
    }

    fn tasks_finished(&self, job_id: Uuid, tasks: &[TaskRecord]) -> Result<()> {
        self.gate()?;
        self.inner.tasks_finished(job_id, tasks)
    }

    fn current_location(&self, package_id: Uuid) -> Result<Option<PathBuf>> {
        self.gate()?;
        self.inner.current_location(package_id)
    }

    fn transition_stage(&self, package_id: Uuid) -> Result<()> {
        self.gate()?;
        self.inner.transition_stage(package_id)
    }

    fn set_unit_variable(&self, package_id: Uuid, variable: &str, value: UnitVariable) -> Result<()> {
        self.gate()?;
        self.inner.set_unit_variable(package_id, variable, value)
    }

    fn unit_variable(&self, package_id: Uuid, variable: &str) -> Result<Option<UnitVariable>> {
        self.gate()?;
        self.inner.unit_variable(package_id, variable)
    }

    fn persist_context(&self, package_id: Uuid, context: &Context) -> Result<()> {
        self.gate()?;
        self.inner.persist_context(package_id, context)
    }
}
