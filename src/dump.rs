//! Dump directory allocation and retention
//!
//! Each captured incident gets its own timestamp-named subdirectory under the
//! dump root (or the operator override verbatim). Retention runs before every
//! allocation and only ever touches already-existing siblings, so concurrent
//! captures never interfere with a directory being populated.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use std::{fs, io};

use chrono::Local;

use crate::config::CaptureConfig;

/// Prefix of rotated dump directories; the timestamp suffix makes
/// lexicographic order chronological.
pub const DUMP_DIR_PREFIX: &str = "storeDump-";

/// How many most-recent dumps the retention sweep may keep.
pub const KEEP_RECENT: usize = 30;

/// Dumps older than this are deleted even when inside the recent window.
pub const MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Allocates and garbage-collects the on-disk dump location.
#[derive(Debug, Clone)]
pub struct DumpDirectoryManager {
    root: PathBuf,
    override_dir: Option<PathBuf>,
}

impl DumpDirectoryManager {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            override_dir: None,
        }
    }

    pub fn from_config(config: &CaptureConfig) -> Self {
        Self {
            root: config.dump_root.clone(),
            override_dir: config.dump_dir_override.clone(),
        }
    }

    /// Operator overrides skip rotation entirely and double as the
    /// controlled-test-environment signal (no compression downstream).
    pub fn is_controlled_environment(&self) -> bool {
        self.override_dir.is_some()
    }

    /// Allocate the directory for one capture: the override verbatim when
    /// set, otherwise a fresh `storeDump-<YYYYMMDD-HHmmss>` under the root,
    /// sweeping old siblings first.
    pub fn allocate(&self) -> io::Result<PathBuf> {
        if let Some(dir) = &self.override_dir {
            fs::create_dir_all(dir)?;
            return Ok(dir.clone());
        }

        clean_old_dumps(&self.root);

        let name = format!("{DUMP_DIR_PREFIX}{}", Local::now().format("%Y%m%d-%H%M%S"));
        let dir = self.root.join(name);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

/// Decide which children to delete, given (name, age) pairs.
///
/// A child survives only if it is among the [`KEEP_RECENT`] newest (by
/// lexicographic name order, which the naming scheme makes chronological)
/// AND no older than [`MAX_AGE`]. Both conditions delete independently;
/// the aggressive intersection is deliberate.
pub fn retention_victims(entries: &[(String, Duration)]) -> Vec<String> {
    let mut sorted = entries.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let cutoff = sorted.len().saturating_sub(KEEP_RECENT);
    sorted
        .into_iter()
        .enumerate()
        .filter(|(i, (_, age))| *i < cutoff || *age > MAX_AGE)
        .map(|(_, (name, _))| name)
        .collect()
}

/// Sweep old dump directories under `parent`. Deletion failures are logged
/// and swallowed; this runs on the error path and must not add failures.
pub fn clean_old_dumps(parent: &Path) {
    let entries = match fs::read_dir(parent) {
        Ok(entries) => entries,
        // Nothing to clean before the first dump is ever written.
        Err(_) => return,
    };

    let now = SystemTime::now();
    let mut aged: Vec<(String, Duration)> = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        let age = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|mtime| now.duration_since(mtime).ok())
            .unwrap_or_default();
        aged.push((name, age));
    }

    for name in retention_victims(&aged) {
        let path = parent.join(&name);
        let result = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        if let Err(e) = result {
            tracing::warn!(path = %path.display(), error = %e, "Failed to delete old store dump");
        }
    }
}
