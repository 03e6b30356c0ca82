// src/jobs/decision.rs

//! Decision points.
//!
//! A decision job first asks the preconfigured choices. Without a usable
//! answer it suspends until someone calls [`Job::decide`].

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::context::Context;
use crate::errors::{PackflowError, Result};
use crate::jobs::{Job, JobOutcome, JobServices};
use crate::workflow::ManagerKind;

/// One option offered by a decision point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    /// What has to be passed to `decide`.
    pub value: String,
    pub description: String,
}

impl Job {
    /// Options of this decision point, in workflow order.
    pub fn choices(&self) -> Result<Vec<Choice>> {
        let config = &self.link.config;
        match self.link.manager {
            ManagerKind::NextChainDecision => config
                .chain_choices
                .iter()
                .map(|chain_id| {
                    let chain = self.chain.workflow().chain(chain_id)?;
                    Ok(Choice {
                        value: chain_id.clone(),
                        description: chain.description.clone(),
                    })
                })
                .collect(),
            ManagerKind::UpdateContextDecision => Ok(config
                .replacements
                .iter()
                .enumerate()
                .map(|(index, set)| Choice {
                    value: index.to_string(),
                    description: set.description.clone(),
                })
                .collect()),
            ManagerKind::OutputDecision => Ok(self.chain.generated_choices().to_vec()),
            _ => Err(PackflowError::NotADecision(self.link.id.clone())),
        }
    }

    /// Resolve the decision with `choice`.
    ///
    /// An unknown choice leaves the job untouched and still awaiting. A
    /// valid one applies the choice and completes the job with exit code 0.
    pub async fn decide(&mut self, choice: &str) -> Result<()> {
        let services = self.chain.services().clone();
        self.apply_choice(choice).await?;
        self.awaiting_decision = false;
        self.finish(0, &services).await;
        Ok(())
    }

    pub(crate) async fn run_decision(&mut self, services: &JobServices) -> Result<JobOutcome> {
        let package_path = self.package().current_path();

        if let Some(value) = services.choices.lookup(&package_path, &self.link.id) {
            match self.apply_choice(&value).await {
                Ok(()) => {
                    info!(
                        job = %self.id,
                        link = %self.link.id,
                        choice = %value,
                        "decision resolved by preconfigured choice"
                    );
                    return Ok(JobOutcome::Completed(0));
                }
                Err(PackflowError::InvalidChoice { .. }) => warn!(
                    job = %self.id,
                    link = %self.link.id,
                    choice = %value,
                    "ignoring invalid preconfigured choice"
                ),
                Err(e) => return Err(e),
            }
        }

        self.awaiting_decision = true;
        info!(
            package = %self.package_id(),
            job = %self.id,
            link = %self.link.id,
            "awaiting decision"
        );
        Ok(JobOutcome::Suspended)
    }

    /// Validate `choice` and apply its effect. Nothing changes on error.
    async fn apply_choice(&mut self, choice: &str) -> Result<()> {
        let known = self.choices()?.iter().any(|c| c.value == choice);
        if !known {
            return Err(PackflowError::InvalidChoice {
                link_id: self.link.id.clone(),
                choice: choice.to_string(),
            });
        }

        match self.link.manager {
            ManagerKind::NextChainDecision => {
                self.redirect = Some(choice.to_string());
            }
            ManagerKind::UpdateContextDecision => {
                let set = choice
                    .parse::<usize>()
                    .ok()
                    .and_then(|index| self.link.config.replacements.get(index))
                    .ok_or_else(|| PackflowError::InvalidChoice {
                        link_id: self.link.id.clone(),
                        choice: choice.to_string(),
                    })?;
                let values = Context::from(set.items.clone());
                self.chain.merge_context(&values).await;
            }
            ManagerKind::OutputDecision => {
                let key = self.link.config.context_key.clone().ok_or_else(|| {
                    PackflowError::WorkflowError(format!(
                        "link '{}' has no context_key",
                        self.link.id
                    ))
                })?;
                let mut values = Context::new();
                values.insert(key, choice);
                self.chain.merge_context(&values).await;
            }
            _ => return Err(PackflowError::NotADecision(self.link.id.clone())),
        }

        info!(job = %self.id, link = %self.link.id, choice, "decision applied");
        Ok(())
    }
}
