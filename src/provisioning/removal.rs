// SPDX-License-Identifier: GPL-3.0-only
use anyhow::Context;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::ini::{self, IniDocument};
use crate::layout::derive_config_path;

const HARD_DISKS_SECTION: &str = "Hard disks";

fn is_disk_file_key(key: &str) -> bool {
    key.strip_prefix("hdd_")
        .and_then(|rest| rest.strip_suffix("_fn"))
        .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
}

/// Hard-disk images referenced by `hdd_NN_fn` keys. Relative entries resolve against `vm_path`.
pub fn disk_images(vm_path: &Path, config: &IniDocument) -> Vec<PathBuf> {
    let Some(section) = config.section(HARD_DISKS_SECTION) else {
        return Vec::new();
    };

    section
        .iter()
        .filter(|(key, value)| is_disk_file_key(key) && !value.is_empty())
        .map(|(_, value)| vm_path.join(value))
        .collect()
}

/// Move to trash, else remove directly
fn trash_or_remove(path: &Path) -> anyhow::Result<()> {
    match trash::delete(path) {
        Ok(()) => Ok(()),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Trash unavailable, removing instead");
            if path.is_dir() {
                std::fs::remove_dir_all(path).with_context(|| format!("Failed to remove {}", path.display()))
            } else {
                std::fs::remove_file(path).with_context(|| format!("Failed to remove {}", path.display()))
            }
        }
    }
}

/// Trash a VM folder and every disk image its config references.
/// Returns the paths that were removed. Blocking.
pub fn trash_vm_files(vm_path: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let config = ini::parse_file(&derive_config_path(vm_path));

    // Images outside the VM folder go first; the folder takes the rest with it
    let mut targets: Vec<PathBuf> = disk_images(vm_path, &config)
        .into_iter()
        .filter(|p| !p.starts_with(vm_path) && p.exists())
        .collect();
    if vm_path.exists() {
        targets.push(vm_path.to_path_buf());
    }

    for target in &targets {
        trash_or_remove(target)?;
    }

    info!(path = %vm_path.display(), removed = targets.len(), "VM files trashed");
    Ok(targets)
}
