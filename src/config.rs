//! Configuration for a postcfg run.
//!
//! The installer hands over a mounted target root, a connectivity flag, a
//! keyring list, and the target disk device. All of it is gathered once at
//! startup into an immutable [`TargetContext`]; nothing re-queries installer
//! state mid-run.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Keyrings populated when the installer's job file names none.
pub const DEFAULT_KEYRINGS: &[&str] = &["archlinux"];

/// Group granted access to snapshots and their mount point.
pub const ADMIN_GROUP: &str = "wheel";

/// Job configuration as written by the installer (JSON).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Keyring identifiers to populate, in order.
    pub keyrings: Vec<String>,
    /// Target disk device (e.g. /dev/nvme0n1), for bootloader work.
    pub disk: Option<String>,
}

impl JobConfig {
    /// Load a job configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read job config {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid job config {}", path.display()))
    }
}

/// Immutable context for one run against a mounted target.
///
/// Owned by the controller and passed by reference to every step.
#[derive(Debug, Clone)]
pub struct TargetContext {
    /// Absolute host-side path where the target volume is mounted.
    pub root: PathBuf,
    /// Whether the installer detected network connectivity.
    pub has_network: bool,
    /// Ordered keyring identifiers to trust.
    pub keyrings: Vec<String>,
    /// Target disk device, when known.
    pub disk: Option<String>,
}

impl TargetContext {
    /// Build the context from CLI inputs plus an optional job file.
    ///
    /// Explicit CLI values win over the job file, which wins over defaults.
    /// A still-missing disk falls back to `POSTCFG_DISK` (settable via the
    /// `.env` file loaded at startup).
    pub fn new(
        root: &Path,
        has_network: bool,
        cli_keyrings: Vec<String>,
        cli_disk: Option<String>,
        job: Option<JobConfig>,
    ) -> Result<Self> {
        if !root.is_absolute() {
            anyhow::bail!("target root must be an absolute path: {}", root.display());
        }
        if !root.is_dir() {
            anyhow::bail!("target root is not a directory: {}", root.display());
        }

        let job = job.unwrap_or_default();

        let keyrings = if !cli_keyrings.is_empty() {
            cli_keyrings
        } else if !job.keyrings.is_empty() {
            job.keyrings
        } else {
            DEFAULT_KEYRINGS.iter().map(|s| s.to_string()).collect()
        };

        let disk = cli_disk
            .or(job.disk)
            .or_else(|| std::env::var("POSTCFG_DISK").ok().filter(|d| !d.is_empty()));

        Ok(Self {
            root: root.to_path_buf(),
            has_network,
            keyrings,
            disk,
        })
    }

    /// Join the target root with a target-relative path.
    ///
    /// Pure path arithmetic; never checks existence.
    pub fn resolve(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.root.join(rel)
    }
}
