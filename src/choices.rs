// src/choices.rs

//! Preconfigured answers for decision points.
//!
//! A decision job asks its [`PreconfiguredChoices`] source before waiting
//! for a person. A hit lets the chain continue without manual intervention.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::fs::FileSystem;

/// Lookup keyed by package location and link id.
pub trait PreconfiguredChoices: Send + Sync + Debug {
    fn lookup(&self, package_path: &Path, link_id: &str) -> Option<String>;

    /// File inside the package the answers are read from, if any. Files jobs
    /// leave it out of their fan-out.
    fn source_file(&self, _package_path: &Path) -> Option<PathBuf> {
        None
    }
}

/// Never answers; every decision waits for an external actor.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoChoices;

impl PreconfiguredChoices for NoChoices {
    fn lookup(&self, _package_path: &Path, _link_id: &str) -> Option<String> {
        None
    }
}

/// Same answers for every package.
#[derive(Debug, Clone, Default)]
pub struct StaticChoices {
    choices: HashMap<String, String>,
}

impl StaticChoices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_choice(mut self, link_id: impl Into<String>, value: impl Into<String>) -> Self {
        self.choices.insert(link_id.into(), value.into());
        self
    }
}

impl PreconfiguredChoices for StaticChoices {
    fn lookup(&self, _package_path: &Path, link_id: &str) -> Option<String> {
        self.choices.get(link_id).cloned()
    }
}

/// Processing file shipped inside a package.
///
/// ```toml
/// [choices]
/// "approve-transfer" = "approve"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProcessingFile {
    #[serde(default)]
    pub choices: BTreeMap<String, String>,
}

/// Reads `<package>/<file_name>` on every lookup.
///
/// The file is re-read each time because operators may edit it while the
/// package waits at a decision point. Missing or malformed files yield no
/// answer.
#[derive(Debug, Clone)]
pub struct ProcessingConfigChoices {
    fs: Arc<dyn FileSystem>,
    file_name: String,
}

impl ProcessingConfigChoices {
    pub fn new(fs: Arc<dyn FileSystem>, file_name: impl Into<String>) -> Self {
        Self {
            fs,
            file_name: file_name.into(),
        }
    }
}

impl PreconfiguredChoices for ProcessingConfigChoices {
    fn source_file(&self, package_path: &Path) -> Option<PathBuf> {
        Some(package_path.join(&self.file_name))
    }

    fn lookup(&self, package_path: &Path, link_id: &str) -> Option<String> {
        let path = package_path.join(&self.file_name);
        if !self.fs.is_file(&path) {
            return None;
        }

        let contents = match self.fs.read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unable to read processing file");
                return None;
            }
        };

        match toml::from_str::<ProcessingFile>(&contents) {
            Ok(file) => {
                let choice = file.choices.get(link_id).cloned();
                debug!(link = link_id, ?choice, "processing file lookup");
                choice
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "malformed processing file");
                None
            }
        }
    }
}
