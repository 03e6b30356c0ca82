// src/workflow/model.rs

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::{PackflowError, Result};
use crate::package::PackageKind;

/// Canonical link identifier type.
pub type LinkId = String;

/// Canonical chain identifier type.
pub type ChainId = String;

/// Selects which job variant executes a link.
///
/// Unknown manager names fail while the workflow document is deserialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagerKind {
    /// One task parameterised over the whole package.
    Directory,
    /// One task per matching file of the package.
    Files,
    /// One task whose stdout is a JSON list of generated choices.
    OutputClientScript,
    /// Decision between chains; the chosen chain replaces the current one.
    NextChainDecision,
    /// Decision between replacement sets merged into the chain context.
    UpdateContextDecision,
    /// Decision between choices produced by an earlier output client script.
    OutputDecision,
    /// Store a unit variable for the package.
    SetUnitVariable,
    /// Jump to the link stored in a unit variable.
    GetUnitVariable,
}

impl ManagerKind {
    pub fn is_decision(self) -> bool {
        matches!(
            self,
            ManagerKind::NextChainDecision
                | ManagerKind::UpdateContextDecision
                | ManagerKind::OutputDecision
        )
    }

    pub fn is_client_script(self) -> bool {
        matches!(
            self,
            ManagerKind::Directory | ManagerKind::Files | ManagerKind::OutputClientScript
        )
    }
}

impl fmt::Display for ManagerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ManagerKind::Directory => "directory",
            ManagerKind::Files => "files",
            ManagerKind::OutputClientScript => "output_client_script",
            ManagerKind::NextChainDecision => "next_chain_decision",
            ManagerKind::UpdateContextDecision => "update_context_decision",
            ManagerKind::OutputDecision => "output_decision",
            ManagerKind::SetUnitVariable => "set_unit_variable",
            ManagerKind::GetUnitVariable => "get_unit_variable",
        };
        f.write_str(s)
    }
}

/// Status recorded for a job, derived from the link's exit-code table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Unknown,
    AwaitingDecision,
    Executing,
    CompletedSuccessfully,
    Failed,
}

/// Outcome of one exit code: the status to record and the link to run next.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ExitCodeRule {
    pub status: JobStatus,
    #[serde(default)]
    pub link_id: Option<LinkId>,
}

/// A named set of context items offered by an update-context decision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ReplacementSet {
    pub description: String,
    #[serde(default)]
    pub items: BTreeMap<String, String>,
}

/// `[links.<id>.config]` section.
///
/// Which fields are required depends on the link's [`ManagerKind`]; see
/// `workflow::validate`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct LinkConfig {
    /// Script name executed by client-script links.
    #[serde(default)]
    pub execute: Option<String>,

    /// Argument template, e.g. `"%SIPDirectory%" "%SIPUUID%"`.
    #[serde(default)]
    pub arguments: Option<String>,

    /// Optional stdout capture-file template.
    #[serde(default)]
    pub stdout_file: Option<String>,

    /// Optional stderr capture-file template.
    #[serde(default)]
    pub stderr_file: Option<String>,

    /// Files links: only walk this package-relative sub-directory.
    #[serde(default)]
    pub filter_subdir: Option<String>,

    /// Files links: glob matched against the package-relative file path.
    #[serde(default)]
    pub filter_pattern: Option<String>,

    /// Next-chain decisions: chains offered as choices, in order.
    #[serde(default)]
    pub chain_choices: Vec<ChainId>,

    /// Update-context decisions: replacement sets offered as choices, in order.
    #[serde(default)]
    pub replacements: Vec<ReplacementSet>,

    /// Output decisions: context key receiving the chosen value.
    #[serde(default)]
    pub context_key: Option<String>,

    /// Unit variable name for set/get unit variable links.
    #[serde(default)]
    pub variable: Option<String>,

    /// Value stored by set unit variable links.
    #[serde(default)]
    pub variable_value: Option<String>,

    /// Link stored by set unit variable links.
    #[serde(default)]
    pub target_link_id: Option<LinkId>,

    /// Link used by get unit variable links when the variable is unset.
    #[serde(default)]
    pub default_link_id: Option<LinkId>,
}

/// `[links.<id>]` section as written in the document.
#[derive(Debug, Clone, Deserialize)]
pub struct RawLink {
    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub group: String,

    pub manager: ManagerKind,

    #[serde(default)]
    pub config: LinkConfig,

    /// Keys are exit codes written as strings (TOML keys are strings).
    #[serde(default)]
    pub exit_codes: BTreeMap<String, ExitCodeRule>,

    #[serde(default = "default_fallback_status")]
    pub fallback_status: JobStatus,

    #[serde(default)]
    pub fallback_link_id: Option<LinkId>,
}

fn default_fallback_status() -> JobStatus {
    JobStatus::Failed
}

/// `[chains.<id>]` section.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Chain {
    #[serde(skip)]
    pub id: ChainId,

    #[serde(default)]
    pub description: String,

    /// First link of the chain.
    pub start_link_id: LinkId,

    /// Packages whose processing ends in this chain are reported as rejected.
    #[serde(default)]
    pub rejects: bool,
}

/// `[start_chains]` section: default chain per package kind.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct StartChains {
    #[serde(default)]
    pub transfer: Option<ChainId>,
    #[serde(default)]
    pub sip: Option<ChainId>,
    #[serde(default)]
    pub dip: Option<ChainId>,
}

impl StartChains {
    pub fn for_kind(&self, kind: PackageKind) -> Option<&ChainId> {
        match kind {
            PackageKind::Transfer => self.transfer.as_ref(),
            PackageKind::Sip => self.sip.as_ref(),
            PackageKind::Dip => self.dip.as_ref(),
        }
    }
}

/// Workflow document as read from TOML, before validation.
///
/// ```toml
/// [start_chains]
/// transfer = "approve-transfer"
///
/// [chains.approve-transfer]
/// description = "Approve transfer"
/// start_link_id = "verify"
///
/// [links.verify]
/// manager = "directory"
/// fallback_status = "failed"
///
/// [links.verify.config]
/// execute = "verify_transfer"
/// arguments = "\"%SIPDirectory%\""
///
/// [links.verify.exit_codes]
/// 0 = { status = "completed_successfully", link_id = "identify" }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawWorkflow {
    #[serde(default)]
    pub start_chains: StartChains,

    #[serde(default)]
    pub chains: BTreeMap<ChainId, Chain>,

    #[serde(default)]
    pub links: BTreeMap<LinkId, RawLink>,
}

/// One validated workflow node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub id: LinkId,
    pub description: String,
    pub group: String,
    pub manager: ManagerKind,
    pub config: LinkConfig,
    pub exit_codes: BTreeMap<i32, ExitCodeRule>,
    pub fallback_status: JobStatus,
    pub fallback_link_id: Option<LinkId>,
}

impl Link {
    /// Link to run after this one exited with `exit_code`.
    ///
    /// Exit codes without an explicit entry use the fallback link.
    pub fn next_link_id(&self, exit_code: i32) -> Option<&LinkId> {
        match self.exit_codes.get(&exit_code) {
            Some(rule) => rule.link_id.as_ref(),
            None => self.fallback_link_id.as_ref(),
        }
    }

    /// Status recorded for a job of this link that exited with `exit_code`.
    pub fn status_for(&self, exit_code: i32) -> JobStatus {
        match self.exit_codes.get(&exit_code) {
            Some(rule) => rule.status,
            None => self.fallback_status,
        }
    }

    /// Every link id this link can lead to.
    pub fn successors(&self) -> impl Iterator<Item = &LinkId> {
        self.exit_codes
            .values()
            .filter_map(|rule| rule.link_id.as_ref())
            .chain(self.fallback_link_id.iter())
            .chain(self.config.target_link_id.iter())
            .chain(self.config.default_link_id.iter())
    }
}

/// Immutable, validated workflow graph.
///
/// Built via `TryFrom<RawWorkflow>` (see `workflow::validate`), so every
/// reference it contains resolves.
#[derive(Debug, Clone)]
pub struct Workflow {
    links: HashMap<LinkId, Arc<Link>>,
    chains: HashMap<ChainId, Chain>,
    start_chains: StartChains,
}

impl Workflow {
    /// Construct a workflow **without** validation.
    ///
    /// This is used internally after validation has succeeded.
    pub(crate) fn new_unchecked(
        links: HashMap<LinkId, Arc<Link>>,
        chains: HashMap<ChainId, Chain>,
        start_chains: StartChains,
    ) -> Self {
        Self {
            links,
            chains,
            start_chains,
        }
    }

    pub fn link(&self, id: &str) -> Result<Arc<Link>> {
        self.links
            .get(id)
            .cloned()
            .ok_or_else(|| PackflowError::LinkNotFound(id.to_string()))
    }

    pub fn chain(&self, id: &str) -> Result<&Chain> {
        self.chains
            .get(id)
            .ok_or_else(|| PackflowError::ChainNotFound(id.to_string()))
    }

    /// Default chain for packages of the given kind.
    pub fn start_chain_for(&self, kind: PackageKind) -> Result<&Chain> {
        let id = self.start_chains.for_kind(kind).ok_or_else(|| {
            PackflowError::WorkflowError(format!("no start chain configured for {kind} packages"))
        })?;
        self.chain(id)
    }

    pub fn start_chains(&self) -> &StartChains {
        &self.start_chains
    }

    pub fn links(&self) -> impl Iterator<Item = &Arc<Link>> {
        self.links.values()
    }

    pub fn chains(&self) -> impl Iterator<Item = &Chain> {
        self.chains.values()
    }
}
