// src/lib.rs

pub mod choices;
pub mod cli;
pub mod config;
pub mod context;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod jobs;
pub mod logging;
pub mod package;
pub mod store;
pub mod workflow;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context as _, Result, bail};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::{ConfigFile, load_and_validate, validate_against_workflow};
use crate::engine::{Engine, PackageReport, PackageStatus};
use crate::exec::ProcessDispatcher;
use crate::fs::{FileSystem, RealFileSystem};
use crate::store::{MemoryStore, Store};
use crate::workflow::{Workflow, load_workflow};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config and workflow loading
/// - store, filesystem, process dispatcher and task backend
/// - the engine and its scheduling loop
/// - Ctrl-C handling
///
/// Returns once every package is finished or waiting for a decision.
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_and_validate(&args.config)?;
    let workflow = load_workflow(&args.workflow)
        .with_context(|| format!("loading workflow {}", args.workflow.display()))?;
    validate_against_workflow(&cfg, &workflow)?;

    if args.dry_run {
        print_dry_run(&cfg, &workflow);
        return Ok(());
    }

    if args.packages.is_empty() {
        bail!("no package directories given");
    }

    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let dispatcher = Arc::new(ProcessDispatcher::new(
        cfg.backend.scripts_dir.clone(),
        cfg.backend.max_parallel_tasks,
        Arc::clone(&fs),
    ));
    let engine = Arc::new(Engine::from_config(
        &cfg,
        Arc::new(workflow),
        store,
        fs,
        dispatcher,
    ));

    for dir in args.packages.iter() {
        if !dir.is_dir() {
            bail!("package directory {} does not exist", dir.display());
        }
        engine.submit(package_name(dir), dir, args.kind.into())?;
    }

    let shutdown = CancellationToken::new();

    // Ctrl-C → graceful shutdown.
    {
        let token = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            info!("Ctrl-C received; shutting down");
            token.cancel();
        });
    }

    // Stop once nothing is left to run.
    {
        let token = shutdown.clone();
        let engine = Arc::clone(&engine);
        let poll = cfg.queue_settings().poll_interval;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(poll) => {
                        if engine.is_settled() {
                            debug!("all packages settled");
                            token.cancel();
                            break;
                        }
                    }
                }
            }
        });
    }

    engine.run(shutdown).await;
    engine.shutdown().await;

    let reports = engine.reports();
    print_reports(&engine, &reports);

    let failed = reports
        .iter()
        .filter(|r| r.status == PackageStatus::Failed)
        .count();
    if failed > 0 {
        bail!("{failed} package(s) failed");
    }
    Ok(())
}

fn package_name(dir: &Path) -> String {
    dir.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| dir.display().to_string())
}

/// One line per package, plus the open choices of waiting packages.
fn print_reports(engine: &Engine, reports: &[PackageReport]) {
    for report in reports {
        let exit = report
            .last_exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}\t{}\t{}\tjobs={}\ttasks={}\tlast_exit={}",
            report.name, report.package_id, report.status, report.jobs, report.tasks, exit
        );

        if report.status == PackageStatus::AwaitingDecision {
            if let Ok(choices) = engine.choices(report.package_id) {
                for choice in choices {
                    println!("    {}: {}", choice.value, choice.description);
                }
            }
        }
    }
}

/// Simple dry-run output: print settings, chains and links.
fn print_dry_run(cfg: &ConfigFile, workflow: &Workflow) {
    println!("packflow dry-run");
    println!(
        "  engine.max_concurrent_packages = {}",
        cfg.engine.max_concurrent_packages
    );
    println!("  engine.worker_count = {}", cfg.engine.worker_count);
    println!("  backend.task_batch_size = {}", cfg.backend.task_batch_size);
    println!();

    let starts = workflow.start_chains();
    println!("start chains:");
    println!("  transfer: {:?}", starts.transfer);
    println!("  sip: {:?}", starts.sip);
    println!("  dip: {:?}", starts.dip);
    println!();

    let mut chains: Vec<_> = workflow.chains().collect();
    chains.sort_by(|a, b| a.id.cmp(&b.id));
    println!("chains ({}):", chains.len());
    for chain in chains {
        println!("  - {} -> {}", chain.id, chain.start_link_id);
        if !chain.description.is_empty() {
            println!("      description: {}", chain.description);
        }
        if chain.rejects {
            println!("      rejects: true");
        }
    }
    println!();

    let mut links: Vec<_> = workflow.links().collect();
    links.sort_by(|a, b| a.id.cmp(&b.id));
    println!("links ({}):", links.len());
    for link in links {
        println!("  - {} [{}]", link.id, link.manager);
        if let Some(ref execute) = link.config.execute {
            println!("      execute: {execute}");
        }
        for (code, rule) in link.exit_codes.iter() {
            println!("      exit {code}: {:?} -> {:?}", rule.status, rule.link_id);
        }
        println!(
            "      otherwise: {:?} -> {:?}",
            link.fallback_status, link.fallback_link_id
        );
    }

    debug!("dry-run complete (no execution)");
}
