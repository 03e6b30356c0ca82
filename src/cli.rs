// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::package::PackageKind;

/// Command-line arguments for `packflow`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "packflow",
    version,
    about = "Run preservation packages through a workflow of client scripts and decisions.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the engine config file (TOML).
    ///
    /// A missing file means "all defaults".
    #[arg(long, value_name = "PATH", default_value = "packflow.toml")]
    pub config: PathBuf,

    /// Path to the workflow document (TOML).
    #[arg(long, value_name = "PATH")]
    pub workflow: PathBuf,

    /// Kind of the submitted packages; selects the start chain.
    #[arg(long, value_enum, value_name = "KIND", default_value = "transfer")]
    pub kind: KindArg,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `PACKFLOW_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the workflow, but don't run anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Package directories to process.
    #[arg(value_name = "PACKAGE_DIR")]
    pub packages: Vec<PathBuf>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Package kind as exposed on the CLI.
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    Transfer,
    Sip,
    Dip,
}

impl From<KindArg> for PackageKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Transfer => PackageKind::Transfer,
            KindArg::Sip => PackageKind::Sip,
            KindArg::Dip => PackageKind::Dip,
        }
    }
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
