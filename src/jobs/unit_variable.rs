// src/jobs/unit_variable.rs

//! Unit variables: per-package values that let a later link jump back to
//! a link recorded earlier.

use tracing::debug;

use crate::errors::{PackflowError, Result};
use crate::jobs::{Job, JobOutcome, JobServices};
use crate::store::{UnitVariable, retrying};

impl Job {
    fn variable_name(&self) -> Result<String> {
        self.link.config.variable.clone().ok_or_else(|| {
            PackflowError::WorkflowError(format!("link '{}' has no variable", self.link.id))
        })
    }

    pub(crate) async fn run_set_unit_variable(
        &mut self,
        services: &JobServices,
    ) -> Result<JobOutcome> {
        let variable = self.variable_name()?;
        let value = UnitVariable {
            value: self.link.config.variable_value.clone(),
            link_id: self.link.config.target_link_id.clone(),
        };
        let package_id = self.package_id();

        debug!(package = %package_id, variable = %variable, ?value, "setting unit variable");
        retrying(&services.settings.retry, "set_unit_variable", || {
            services
                .store
                .set_unit_variable(package_id, &variable, value.clone())
        })
        .await;

        Ok(JobOutcome::Completed(0))
    }

    /// Forces the next link to the stored one, falling back to the link's
    /// `default_link_id`.
    pub(crate) async fn run_get_unit_variable(
        &mut self,
        services: &JobServices,
    ) -> Result<JobOutcome> {
        let variable = self.variable_name()?;
        let package_id = self.package_id();

        let stored = retrying(&services.settings.retry, "unit_variable", || {
            services.store.unit_variable(package_id, &variable)
        })
        .await
        .flatten();

        let target = stored
            .and_then(|v| v.link_id)
            .or_else(|| self.link.config.default_link_id.clone());

        debug!(package = %package_id, variable = %variable, ?target, "read unit variable");
        if let Some(link_id) = target {
            self.chain.force_next_link(link_id);
        }

        Ok(JobOutcome::Completed(0))
    }
}
