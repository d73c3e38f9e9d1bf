// SPDX-License-Identifier: GPL-3.0-only
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::layout::{CONFIG_FILE_NAME, derive_config_path};

const FALLBACK_NAME: &str = "Imported VM";

/// Existing VM folder that can be added to the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportCandidate {
    pub name: String,
    pub path: PathBuf,
}

impl ImportCandidate {
    fn for_dir(dir: &Path) -> Self {
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| FALLBACK_NAME.to_string());
        Self {
            name,
            path: dir.to_path_buf(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("{} does not contain a {CONFIG_FILE_NAME} file", .0.display())]
    NoConfig(PathBuf),

    #[error("{} is already in the VM list", .0.display())]
    AlreadyRegistered(PathBuf),
}

/// Walk `root` for VM config files. Folders in `registered` are skipped.
/// `cancel` is checked before every entry; a cancelled scan returns what it found so far.
///
/// Blocking; run it on the blocking pool.
pub fn scan_for_vms(root: &Path, registered: &HashSet<PathBuf>, cancel: &AtomicBool) -> Vec<ImportCandidate> {
    let mut found = Vec::new();
    let mut seen = HashSet::new();

    for entry in WalkDir::new(root).follow_links(false) {
        if cancel.load(Ordering::Relaxed) {
            info!(root = %root.display(), found = found.len(), "Import scan cancelled");
            return found;
        }

        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!(error = %e, "Skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() || entry.file_name() != CONFIG_FILE_NAME {
            continue;
        }

        let Some(dir) = entry.path().parent() else {
            continue;
        };
        if registered.contains(dir) || !seen.insert(dir.to_path_buf()) {
            continue;
        }
        debug!(path = %dir.display(), "Found importable VM");
        found.push(ImportCandidate::for_dir(dir));
    }

    info!(root = %root.display(), found = found.len(), "Import scan finished");
    found
}

/// Check a single folder picked by the user.
pub fn candidate_for_dir(dir: &Path, registered: &HashSet<PathBuf>) -> Result<ImportCandidate, ImportError> {
    if !derive_config_path(dir).is_file() {
        return Err(ImportError::NoConfig(dir.to_path_buf()));
    }
    if registered.contains(dir) {
        return Err(ImportError::AlreadyRegistered(dir.to_path_buf()));
    }
    Ok(ImportCandidate::for_dir(dir))
}

/// Runs one background scan at a time. Starting a new scan cancels the previous one.
#[derive(Default)]
pub struct ImportScanner {
    current: Mutex<Option<Arc<AtomicBool>>>,
}

impl ImportScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn scan(&self, root: PathBuf, registered: HashSet<PathBuf>) -> anyhow::Result<Vec<ImportCandidate>> {
        let flag = Arc::new(AtomicBool::new(false));
        if let Some(previous) = self.replace_current(Some(Arc::clone(&flag))) {
            previous.store(true, Ordering::Relaxed);
        }

        let scan_flag = Arc::clone(&flag);
        let found = tokio::task::spawn_blocking(move || scan_for_vms(&root, &registered, &scan_flag)).await?;

        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        if current.as_ref().is_some_and(|c| Arc::ptr_eq(c, &flag)) {
            *current = None;
        }
        Ok(found)
    }

    /// Returns whether a scan was running.
    pub fn cancel(&self) -> bool {
        match self.replace_current(None) {
            Some(flag) => {
                flag.store(true, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    fn replace_current(&self, next: Option<Arc<AtomicBool>>) -> Option<Arc<AtomicBool>> {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *current, next)
    }
}
