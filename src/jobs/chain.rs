// src/jobs/chain.rs

//! Per-package walk through one workflow chain.

use std::sync::Arc;

use tracing::{debug, info};

use crate::context::Context;
use crate::errors::Result;
use crate::jobs::decision::Choice;
use crate::jobs::{Job, JobServices};
use crate::package::Package;
use crate::store::retrying;
use crate::workflow::{Chain, Link, LinkId, Workflow};

/// Tracks where a package is within a chain and builds its jobs.
///
/// The chain is moved into every job it yields and moved back out by
/// [`Job::into_next`].
#[derive(Debug)]
pub struct JobChain {
    package: Arc<Package>,
    workflow: Arc<Workflow>,
    chain: Chain,
    current_link: Option<Arc<Link>>,
    /// Forced next link; consumed by the next `advance`.
    next_link: Option<LinkId>,
    context: Context,
    generated_choices: Vec<Choice>,
    services: JobServices,
}

impl JobChain {
    /// Position a package at the start of `chain_id`.
    ///
    /// The working context starts as a snapshot of the package context.
    pub fn new(
        package: Arc<Package>,
        workflow: Arc<Workflow>,
        chain_id: &str,
        services: JobServices,
    ) -> Result<Self> {
        let chain = workflow.chain(chain_id)?.clone();
        let context = package.context();

        debug!(
            package = %package.id(),
            chain = %chain.id,
            start = %chain.start_link_id,
            "job chain created"
        );

        Ok(Self {
            next_link: Some(chain.start_link_id.clone()),
            package,
            workflow,
            chain,
            current_link: None,
            context,
            generated_choices: Vec::new(),
            services,
        })
    }

    /// First job of the default chain for the package's kind.
    pub fn start(
        package: Arc<Package>,
        workflow: Arc<Workflow>,
        services: JobServices,
    ) -> Result<Option<Job>> {
        let chain_id = workflow.start_chain_for(package.kind())?.id.clone();
        Self::new(package, workflow, &chain_id, services)?.advance(None)
    }

    /// Build the job for the next link, or `Ok(None)` once exhausted.
    ///
    /// A forced next link wins over the exit-code table of the current
    /// link. An exit code without a mapping ends the chain.
    pub fn advance(mut self, previous_exit_code: Option<i32>) -> Result<Option<Job>> {
        let next = match self.next_link.take() {
            Some(id) => Some(id),
            None => match (&self.current_link, previous_exit_code) {
                (Some(link), Some(code)) => link.next_link_id(code).cloned(),
                _ => None,
            },
        };

        let Some(link_id) = next else {
            info!(
                package = %self.package.id(),
                chain = %self.chain.id,
                "job chain exhausted"
            );
            return Ok(None);
        };

        let link = self.workflow.link(&link_id)?;
        self.current_link = Some(Arc::clone(&link));
        Ok(Some(Job::new(link, self)))
    }

    /// Replace this chain by `chain_id` for the same package.
    pub(crate) fn switch_to(self, chain_id: &str) -> Result<JobChain> {
        info!(
            package = %self.package.id(),
            from = %self.chain.id,
            to = chain_id,
            "switching job chain"
        );
        JobChain::new(self.package, self.workflow, chain_id, self.services)
    }

    pub fn package(&self) -> &Arc<Package> {
        &self.package
    }

    pub fn workflow(&self) -> &Arc<Workflow> {
        &self.workflow
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    /// Whether finishing in this chain means the package was rejected.
    pub fn rejects(&self) -> bool {
        self.chain.rejects
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn generated_choices(&self) -> &[Choice] {
        &self.generated_choices
    }

    pub fn services(&self) -> &JobServices {
        &self.services
    }

    pub(crate) fn force_next_link(&mut self, link_id: LinkId) {
        debug!(package = %self.package.id(), link = %link_id, "next link forced");
        self.next_link = Some(link_id);
    }

    pub(crate) fn set_generated_choices(&mut self, choices: Vec<Choice>) {
        self.generated_choices = choices;
    }

    /// Merge `values` into the chain context and persist them for the
    /// package.
    pub(crate) async fn merge_context(&mut self, values: &Context) {
        self.context = self.context.merged(values);
        let persisted = self.package.merge_context(values);

        let package_id = self.package.id();
        let store = Arc::clone(&self.services.store);
        retrying(&self.services.settings.retry, "persist_context", || {
            store.persist_context(package_id, &persisted)
        })
        .await;
    }
}
