// src/package.rs

//! Packages: the units of work moving through the workflow.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::Context;

/// What kind of package this is; selects the default start chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PackageKind {
    #[default]
    Transfer,
    Sip,
    Dip,
}

impl fmt::Display for PackageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PackageKind::Transfer => "transfer",
            PackageKind::Sip => "sip",
            PackageKind::Dip => "dip",
        };
        f.write_str(s)
    }
}

impl FromStr for PackageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "transfer" => Ok(PackageKind::Transfer),
            "sip" => Ok(PackageKind::Sip),
            "dip" => Ok(PackageKind::Dip),
            other => Err(format!(
                "invalid package kind: {other} (expected \"transfer\", \"sip\" or \"dip\")"
            )),
        }
    }
}

/// One transfer / SIP / DIP.
///
/// The location can change mid-pipeline (packages are moved between
/// watched directories), so jobs reload it from the store before running.
/// The context holds values persisted across chains, e.g. decisions.
#[derive(Debug)]
pub struct Package {
    id: Uuid,
    name: String,
    kind: PackageKind,
    current_path: RwLock<PathBuf>,
    context: RwLock<Context>,
}

impl Package {
    pub fn new(name: impl Into<String>, kind: PackageKind, path: impl Into<PathBuf>) -> Self {
        Self::with_id(Uuid::new_v4(), name, kind, path)
    }

    pub fn with_id(
        id: Uuid,
        name: impl Into<String>,
        kind: PackageKind,
        path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            current_path: RwLock::new(path.into()),
            context: RwLock::new(Context::new()),
        }
    }

    /// Seed the persisted context (e.g. from package metadata).
    pub fn with_context(self, context: Context) -> Self {
        *self.context.write() = context;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> PackageKind {
        self.kind
    }

    pub fn current_path(&self) -> PathBuf {
        self.current_path.read().clone()
    }

    pub fn set_current_path(&self, path: impl Into<PathBuf>) {
        *self.current_path.write() = path.into();
    }

    /// Snapshot of the persisted context.
    pub fn context(&self) -> Context {
        self.context.read().clone()
    }

    /// Merge values into the persisted context; returns the new snapshot.
    pub fn merge_context(&self, values: &Context) -> Context {
        let mut guard = self.context.write();
        *guard = guard.merged(values);
        guard.clone()
    }

    /// Package-level replacement values for command templates.
    pub fn replacement_values(&self, shared_path: &Path) -> Context {
        let path = self.current_path();
        let mut dir = path.to_string_lossy().into_owned();
        if !dir.ends_with('/') {
            dir.push('/');
        }
        let basename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut shared = shared_path.to_string_lossy().into_owned();
        if !shared.is_empty() && !shared.ends_with('/') {
            shared.push('/');
        }

        let mut values = Context::new();
        values.insert("%SIPUUID%", self.id.to_string());
        values.insert("%SIPName%", self.name.clone());
        values.insert("%SIPDirectory%", dir.clone());
        values.insert("%SIPDirectoryBasename%", basename);
        values.insert("%SIPObjectsDirectory%", format!("{dir}objects/"));
        values.insert("%SIPLogsDirectory%", format!("{dir}logs/"));
        values.insert("%unitType%", self.kind.to_string());
        values.insert("%sharedPath%", shared);
        values.insert("%date%", Utc::now().to_rfc3339());
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replacement_values_describe_package_layout() {
        let package = Package::new("transfer-1", PackageKind::Sip, "/data/transfer-1");
        let values = package.replacement_values(Path::new("/var/shared"));

        assert_eq!(values.get("%SIPUUID%"), Some(package.id().to_string().as_str()));
        assert_eq!(values.get("%SIPDirectory%"), Some("/data/transfer-1/"));
        assert_eq!(values.get("%SIPDirectoryBasename%"), Some("transfer-1"));
        assert_eq!(values.get("%SIPObjectsDirectory%"), Some("/data/transfer-1/objects/"));
        assert_eq!(values.get("%SIPLogsDirectory%"), Some("/data/transfer-1/logs/"));
        assert_eq!(values.get("%unitType%"), Some("sip"));
        assert_eq!(values.get("%sharedPath%"), Some("/var/shared/"));
    }

    #[test]
    fn kind_parses_case_insensitively() {
        assert_eq!("DIP".parse::<PackageKind>(), Ok(PackageKind::Dip));
        assert!("aip".parse::<PackageKind>().is_err());
    }
}
