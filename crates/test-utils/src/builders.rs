#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use packflow::choices::{NoChoices, PreconfiguredChoices};
use packflow::config::{ConfigFile, RawConfigFile};
use packflow::errors::Result;
use packflow::exec::{DEFAULT_TASK_BATCH_SIZE, PoolTaskBackend};
use packflow::fs::mock::MockFileSystem;
use packflow::jobs::{JobServices, JobSettings};
use packflow::package::{Package, PackageKind};
use packflow::store::{MemoryStore, RetryPolicy, Store};
use packflow::workflow::{
    Chain, ExitCodeRule, JobStatus, LinkConfig, ManagerKind, RawLink, RawWorkflow,
    ReplacementSet, Workflow,
};

use crate::fake_dispatcher::FakeDispatcher;

/// Builder for `Workflow` to simplify test setup.
#[derive(Debug, Default)]
pub struct WorkflowBuilder {
    raw: RawWorkflow,
}

impl WorkflowBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Default chain for transfers.
    pub fn start(mut self, chain_id: &str) -> Self {
        self.raw.start_chains.transfer = Some(chain_id.to_string());
        self
    }

    pub fn start_for(mut self, kind: PackageKind, chain_id: &str) -> Self {
        let slot = match kind {
            PackageKind::Transfer => &mut self.raw.start_chains.transfer,
            PackageKind::Sip => &mut self.raw.start_chains.sip,
            PackageKind::Dip => &mut self.raw.start_chains.dip,
        };
        *slot = Some(chain_id.to_string());
        self
    }

    pub fn chain(self, id: &str, start_link_id: &str) -> Self {
        self.chain_with(id, start_link_id, false)
    }

    /// Chain whose packages end up rejected.
    pub fn rejecting_chain(self, id: &str, start_link_id: &str) -> Self {
        self.chain_with(id, start_link_id, true)
    }

    fn chain_with(mut self, id: &str, start_link_id: &str, rejects: bool) -> Self {
        self.raw.chains.insert(
            id.to_string(),
            Chain {
                id: id.to_string(),
                description: format!("chain {id}"),
                start_link_id: start_link_id.to_string(),
                rejects,
            },
        );
        self
    }

    pub fn link(mut self, id: &str, link: LinkBuilder) -> Self {
        self.raw.links.insert(id.to_string(), link.build());
        self
    }

    pub fn raw(self) -> RawWorkflow {
        self.raw
    }

    pub fn try_build(self) -> Result<Workflow> {
        Workflow::try_from(self.raw)
    }

    pub fn build(self) -> Workflow {
        self.try_build()
            .expect("Failed to build valid workflow from builder")
    }
}

/// Builder for a `[links.<id>]` entry.
#[derive(Debug, Clone)]
pub struct LinkBuilder {
    link: RawLink,
}

impl LinkBuilder {
    fn with_manager(manager: ManagerKind) -> Self {
        Self {
            link: RawLink {
                description: String::new(),
                group: "test".to_string(),
                manager,
                config: LinkConfig::default(),
                exit_codes: BTreeMap::new(),
                fallback_status: JobStatus::Failed,
                fallback_link_id: None,
            },
        }
    }

    pub fn directory(execute: &str) -> Self {
        Self::with_manager(ManagerKind::Directory).execute(execute)
    }

    pub fn files(execute: &str) -> Self {
        Self::with_manager(ManagerKind::Files).execute(execute)
    }

    pub fn output_client_script(execute: &str) -> Self {
        Self::with_manager(ManagerKind::OutputClientScript).execute(execute)
    }

    pub fn next_chain_decision(chains: &[&str]) -> Self {
        let mut b = Self::with_manager(ManagerKind::NextChainDecision);
        b.link.config.chain_choices = chains.iter().map(|c| c.to_string()).collect();
        b
    }

    /// Each set is `(description, [(key, value)])`.
    pub fn update_context_decision(sets: &[(&str, &[(&str, &str)])]) -> Self {
        let mut b = Self::with_manager(ManagerKind::UpdateContextDecision);
        b.link.config.replacements = sets
            .iter()
            .map(|(description, items)| ReplacementSet {
                description: description.to_string(),
                items: items
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            })
            .collect();
        b
    }

    pub fn output_decision(context_key: &str) -> Self {
        let mut b = Self::with_manager(ManagerKind::OutputDecision);
        b.link.config.context_key = Some(context_key.to_string());
        b
    }

    pub fn set_unit_variable(variable: &str, value: Option<&str>, target: Option<&str>) -> Self {
        let mut b = Self::with_manager(ManagerKind::SetUnitVariable);
        b.link.config.variable = Some(variable.to_string());
        b.link.config.variable_value = value.map(str::to_string);
        b.link.config.target_link_id = target.map(str::to_string);
        b
    }

    pub fn get_unit_variable(variable: &str, default_link: Option<&str>) -> Self {
        let mut b = Self::with_manager(ManagerKind::GetUnitVariable);
        b.link.config.variable = Some(variable.to_string());
        b.link.config.default_link_id = default_link.map(str::to_string);
        b
    }

    pub fn execute(mut self, execute: &str) -> Self {
        self.link.config.execute = Some(execute.to_string());
        self
    }

    pub fn arguments(mut self, arguments: &str) -> Self {
        self.link.config.arguments = Some(arguments.to_string());
        self
    }

    pub fn stdout_file(mut self, template: &str) -> Self {
        self.link.config.stdout_file = Some(template.to_string());
        self
    }

    pub fn filter_subdir(mut self, subdir: &str) -> Self {
        self.link.config.filter_subdir = Some(subdir.to_string());
        self
    }

    pub fn filter_pattern(mut self, pattern: &str) -> Self {
        self.link.config.filter_pattern = Some(pattern.to_string());
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.link.description = description.to_string();
        self
    }

    /// Explicit exit-code entry.
    pub fn on(mut self, code: i32, status: JobStatus, next: Option<&str>) -> Self {
        self.link.exit_codes.insert(
            code.to_string(),
            ExitCodeRule {
                status,
                link_id: next.map(str::to_string),
            },
        );
        self
    }

    /// Exit code 0 completes successfully and continues at `next`.
    pub fn then(self, next: &str) -> Self {
        self.on(0, JobStatus::CompletedSuccessfully, Some(next))
    }

    /// Exit code 0 completes successfully and ends the chain.
    pub fn last(self) -> Self {
        self.on(0, JobStatus::CompletedSuccessfully, None)
    }

    pub fn fallback(mut self, status: JobStatus, next: Option<&str>) -> Self {
        self.link.fallback_status = status;
        self.link.fallback_link_id = next.map(str::to_string);
        self
    }

    pub fn build(self) -> RawLink {
        self.link
    }
}

/// Builder for `ConfigFile`.
#[derive(Debug, Default)]
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_concurrent_packages(mut self, n: usize) -> Self {
        self.config.engine.max_concurrent_packages = n;
        self
    }

    pub fn with_worker_count(mut self, n: usize) -> Self {
        self.config.engine.worker_count = n;
        self
    }

    pub fn with_job_queue_capacity(mut self, n: usize) -> Self {
        self.config.engine.job_queue_capacity = n;
        self
    }

    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.engine.poll_interval_ms = ms;
        self
    }

    pub fn with_task_batch_size(mut self, n: usize) -> Self {
        self.config.backend.task_batch_size = n;
        self
    }

    pub fn with_stage_transition_link(mut self, link: &str) -> Self {
        self.config.engine.stage_transition_link = Some(link.to_string());
        self
    }

    pub fn with_retry(mut self, attempts: u32, backoff_ms: u64) -> Self {
        self.config.store.retry_attempts = attempts;
        self.config.store.retry_backoff_ms = backoff_ms;
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

/// Job services backed by a fake dispatcher, an in-memory filesystem and an
/// in-memory store.
///
/// Must be created inside a Tokio runtime.
#[derive(Debug)]
pub struct TestEnv {
    pub dispatcher: Arc<FakeDispatcher>,
    pub backend: Arc<PoolTaskBackend>,
    pub store: Arc<MemoryStore>,
    pub fs: Arc<MockFileSystem>,
    pub services: JobServices,
}

impl TestEnv {
    pub fn new(dispatcher: FakeDispatcher) -> Self {
        Self::with_choices(dispatcher, Arc::new(NoChoices))
    }

    pub fn with_choices(
        dispatcher: FakeDispatcher,
        choices: Arc<dyn PreconfiguredChoices>,
    ) -> Self {
        Self::build(dispatcher, choices, DEFAULT_TASK_BATCH_SIZE, test_settings())
    }

    pub fn build(
        dispatcher: FakeDispatcher,
        choices: Arc<dyn PreconfiguredChoices>,
        batch_size: usize,
        settings: JobSettings,
    ) -> Self {
        let dispatcher = Arc::new(dispatcher);
        let backend = Arc::new(PoolTaskBackend::new(
            dispatcher.clone(),
            batch_size,
            Duration::from_secs(1),
        ));
        let store = Arc::new(MemoryStore::new());
        let fs = Arc::new(MockFileSystem::new());

        let services = JobServices {
            backend: backend.clone(),
            store: store.clone(),
            choices,
            fs: fs.clone(),
            settings,
        };

        Self {
            dispatcher,
            backend,
            store,
            fs,
            services,
        }
    }

    /// Same collaborators, different store.
    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.services.store = store;
        self
    }

    /// A transfer package located at `dir` (the directory is created in the
    /// mock filesystem).
    pub fn package(&self, name: &str, dir: &str) -> Arc<Package> {
        self.fs.add_dir(dir);
        Arc::new(Package::new(name, PackageKind::Transfer, PathBuf::from(dir)))
    }
}

/// Job settings with fast store retries.
pub fn test_settings() -> JobSettings {
    JobSettings {
        shared_path: PathBuf::from("/shared"),
        capture_output: false,
        stage_transition_link: None,
        retry: RetryPolicy {
            attempts: 2,
            base_delay: Duration::from_millis(1),
        },
    }
}
