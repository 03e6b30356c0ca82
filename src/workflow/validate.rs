// src/workflow/validate.rs

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use globset::Glob;
use petgraph::graphmap::DiGraphMap;
use petgraph::visit::Dfs;
use tracing::warn;

use crate::errors::{PackflowError, Result};
use crate::workflow::model::{
    Chain, ChainId, Link, LinkId, ManagerKind, RawLink, RawWorkflow, Workflow,
};

impl TryFrom<RawWorkflow> for Workflow {
    type Error = PackflowError;

    fn try_from(raw: RawWorkflow) -> std::result::Result<Self, Self::Error> {
        ensure_has_chains(&raw)?;

        let mut links = HashMap::new();
        for (id, raw_link) in raw.links.iter() {
            let link = build_link(id, raw_link)?;
            links.insert(id.clone(), Arc::new(link));
        }

        let mut chains = HashMap::new();
        for (id, chain) in raw.chains.iter() {
            let mut chain = chain.clone();
            chain.id = id.clone();
            chains.insert(id.clone(), chain);
        }

        validate_link_references(&links, &chains)?;
        validate_chain_references(&links, &chains, &raw)?;
        warn_unreachable_links(&links, &chains);

        Ok(Workflow::new_unchecked(links, chains, raw.start_chains))
    }
}

fn ensure_has_chains(raw: &RawWorkflow) -> Result<()> {
    if raw.chains.is_empty() {
        return Err(PackflowError::WorkflowError(
            "workflow must contain at least one [chains.<id>] section".to_string(),
        ));
    }
    Ok(())
}

fn build_link(id: &LinkId, raw: &RawLink) -> Result<Link> {
    let mut exit_codes = BTreeMap::new();
    for (code, rule) in raw.exit_codes.iter() {
        let code: i32 = code.trim().parse().map_err(|_| {
            PackflowError::WorkflowError(format!(
                "link '{id}' has non-integer exit code key '{code}'"
            ))
        })?;
        exit_codes.insert(code, rule.clone());
    }

    let link = Link {
        id: id.clone(),
        description: raw.description.clone(),
        group: raw.group.clone(),
        manager: raw.manager,
        config: raw.config.clone(),
        exit_codes,
        fallback_status: raw.fallback_status,
        fallback_link_id: raw.fallback_link_id.clone(),
    };

    validate_link_config(&link)?;
    Ok(link)
}

/// Check that the config carries what the link's manager needs.
fn validate_link_config(link: &Link) -> Result<()> {
    let cfg = &link.config;
    let missing = |field: &str| {
        PackflowError::WorkflowError(format!(
            "link '{}' ({}) requires config.{}",
            link.id, link.manager, field
        ))
    };

    match link.manager {
        ManagerKind::Directory | ManagerKind::OutputClientScript => {
            if cfg.execute.as_deref().is_none_or(str::is_empty) {
                return Err(missing("execute"));
            }
        }
        ManagerKind::Files => {
            if cfg.execute.as_deref().is_none_or(str::is_empty) {
                return Err(missing("execute"));
            }
            if let Some(pattern) = &cfg.filter_pattern {
                Glob::new(pattern).map_err(|e| {
                    PackflowError::WorkflowError(format!(
                        "link '{}' has invalid filter_pattern '{}': {}",
                        link.id, pattern, e
                    ))
                })?;
            }
        }
        ManagerKind::NextChainDecision => {
            if cfg.chain_choices.is_empty() {
                return Err(missing("chain_choices"));
            }
        }
        ManagerKind::UpdateContextDecision => {
            if cfg.replacements.is_empty() {
                return Err(missing("replacements"));
            }
        }
        ManagerKind::OutputDecision => {
            if cfg.context_key.is_none() {
                return Err(missing("context_key"));
            }
        }
        ManagerKind::SetUnitVariable | ManagerKind::GetUnitVariable => {
            if cfg.variable.is_none() {
                return Err(missing("variable"));
            }
        }
    }

    Ok(())
}

fn validate_link_references(
    links: &HashMap<LinkId, Arc<Link>>,
    chains: &HashMap<ChainId, Chain>,
) -> Result<()> {
    for link in links.values() {
        for next in link.successors() {
            if !links.contains_key(next) {
                return Err(PackflowError::WorkflowError(format!(
                    "link '{}' refers to unknown link '{}'",
                    link.id, next
                )));
            }
        }
        for chain_id in link.config.chain_choices.iter() {
            if !chains.contains_key(chain_id) {
                return Err(PackflowError::WorkflowError(format!(
                    "link '{}' offers unknown chain '{}'",
                    link.id, chain_id
                )));
            }
        }
    }
    Ok(())
}

fn validate_chain_references(
    links: &HashMap<LinkId, Arc<Link>>,
    chains: &HashMap<ChainId, Chain>,
    raw: &RawWorkflow,
) -> Result<()> {
    for chain in chains.values() {
        if !links.contains_key(&chain.start_link_id) {
            return Err(PackflowError::WorkflowError(format!(
                "chain '{}' starts at unknown link '{}'",
                chain.id, chain.start_link_id
            )));
        }
    }

    let starts = &raw.start_chains;
    for chain_id in [&starts.transfer, &starts.sip, &starts.dip]
        .into_iter()
        .flatten()
    {
        if !chains.contains_key(chain_id) {
            return Err(PackflowError::WorkflowError(format!(
                "[start_chains] refers to unknown chain '{chain_id}'"
            )));
        }
    }

    Ok(())
}

/// Warn about links that no chain can ever reach.
///
/// Unreachable links are legal (documents are often shared between
/// deployments) but usually point at a typo in a `link_id`.
fn warn_unreachable_links(links: &HashMap<LinkId, Arc<Link>>, chains: &HashMap<ChainId, Chain>) {
    // Edge direction: link -> possible next link. Chain starts and chain
    // choices are reached through a virtual root node "".
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    graph.add_node("");

    for link in links.values() {
        graph.add_node(link.id.as_str());
        for next in link.successors() {
            graph.add_edge(link.id.as_str(), next.as_str(), ());
        }
        for chain_id in link.config.chain_choices.iter() {
            if let Some(chain) = chains.get(chain_id) {
                graph.add_edge(link.id.as_str(), chain.start_link_id.as_str(), ());
            }
        }
    }
    for chain in chains.values() {
        graph.add_edge("", chain.start_link_id.as_str(), ());
    }

    let mut reached: HashSet<&str> = HashSet::new();
    let mut dfs = Dfs::new(&graph, "");
    while let Some(node) = dfs.next(&graph) {
        reached.insert(node);
    }

    for link in links.values() {
        if !reached.contains(link.id.as_str()) {
            warn!(link = %link.id, "link is unreachable from every chain");
        }
    }
}
