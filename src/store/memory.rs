// src/store/memory.rs

use std::collections::HashMap;
use std::path::PathBuf;

use parking_lot::Mutex;
use uuid::Uuid;

use super::{JobRecord, Store, TaskRecord, UnitVariable};
use crate::context::Context;
use crate::errors::Result;
use crate::workflow::JobStatus;

#[derive(Debug, Default)]
struct MemoryState {
    jobs: Vec<JobRecord>,
    tasks: Vec<TaskRecord>,
    locations: HashMap<Uuid, PathBuf>,
    stage_transitions: Vec<Uuid>,
    unit_variables: HashMap<(Uuid, String), UnitVariable>,
    contexts: HashMap<Uuid, Context>,
}

/// Store keeping every row in memory.
///
/// Used by the CLI (history only lives as long as the process) and by tests
/// to observe what the engine persisted.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new location for a package (e.g. after an external move).
    pub fn set_location(&self, package_id: Uuid, path: impl Into<PathBuf>) {
        self.state.lock().locations.insert(package_id, path.into());
    }

    pub fn jobs(&self) -> Vec<JobRecord> {
        self.state.lock().jobs.clone()
    }

    pub fn jobs_for(&self, package_id: Uuid) -> Vec<JobRecord> {
        self.state
            .lock()
            .jobs
            .iter()
            .filter(|j| j.package_id == package_id)
            .cloned()
            .collect()
    }

    pub fn tasks(&self) -> Vec<TaskRecord> {
        self.state.lock().tasks.clone()
    }

    pub fn stage_transitions(&self) -> Vec<Uuid> {
        self.state.lock().stage_transitions.clone()
    }

    pub fn context_of(&self, package_id: Uuid) -> Option<Context> {
        self.state.lock().contexts.get(&package_id).cloned()
    }
}

impl Store for MemoryStore {
    fn job_started(&self, job: &JobRecord) -> Result<()> {
        self.state.lock().jobs.push(job.clone());
        Ok(())
    }

    fn job_status_changed(&self, job_id: Uuid, status: JobStatus) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(job) = state.jobs.iter_mut().find(|j| j.job_id == job_id) {
            job.status = status;
        }
        Ok(())
    }

    fn tasks_finished(&self, _job_id: Uuid, tasks: &[TaskRecord]) -> Result<()> {
        self.state.lock().tasks.extend_from_slice(tasks);
        Ok(())
    }

    fn current_location(&self, package_id: Uuid) -> Result<Option<PathBuf>> {
        Ok(self.state.lock().locations.get(&package_id).cloned())
    }

    fn transition_stage(&self, package_id: Uuid) -> Result<()> {
        self.state.lock().stage_transitions.push(package_id);
        Ok(())
    }

    fn set_unit_variable(
        &self,
        package_id: Uuid,
        variable: &str,
        value: UnitVariable,
    ) -> Result<()> {
        self.state
            .lock()
            .unit_variables
            .insert((package_id, variable.to_string()), value);
        Ok(())
    }

    fn unit_variable(&self, package_id: Uuid, variable: &str) -> Result<Option<UnitVariable>> {
        Ok(self
            .state
            .lock()
            .unit_variables
            .get(&(package_id, variable.to_string()))
            .cloned())
    }

    fn persist_context(&self, package_id: Uuid, context: &Context) -> Result<()> {
        self.state.lock().contexts.insert(package_id, context.clone());
        Ok(())
    }
}
