// SPDX-License-Identifier: GPL-3.0-only
use anyhow::Context;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::utils::{move_item, remove_item};

fn backup_path(target: &Path) -> PathBuf {
    let mut name = OsString::from(".");
    name.push(target.file_name().unwrap_or_default());
    name.push(format!(".old-{}", Uuid::new_v4().simple()));
    target.with_file_name(name)
}

/// Put `replacement` at `target`. Either the new item ends up at `target`
/// or the previous item is left there untouched.
///
/// Blocking; run it on the blocking pool.
pub fn replace_item(target: &Path, replacement: &Path) -> anyhow::Result<()> {
    if !replacement.exists() {
        anyhow::bail!("Replacement {} does not exist", replacement.display());
    }

    if std::fs::symlink_metadata(target).is_err() {
        debug!(target = %target.display(), "Nothing to replace, moving into place");
        return move_item(replacement, target)
            .with_context(|| format!("Failed to install {}", target.display()));
    }

    let backup = backup_path(target);
    std::fs::rename(target, &backup)
        .with_context(|| format!("Failed to move {} aside", target.display()))?;

    if let Err(e) = move_item(replacement, target) {
        if let Err(cleanup) = remove_item(target) {
            warn!(target = %target.display(), error = %cleanup, "Failed to remove partial replacement");
        }
        if let Err(restore) = std::fs::rename(&backup, target) {
            error!(
                target = %target.display(),
                backup = %backup.display(),
                error = %restore,
                "Failed to restore previous item"
            );
        }
        return Err(e.context(format!("Failed to replace {}", target.display())));
    }

    if let Err(e) = remove_item(&backup) {
        warn!(backup = %backup.display(), error = %e, "Failed to remove previous item");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_replace_existing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("86Box.app");
        std::fs::create_dir_all(&target).unwrap();
        std::fs::write(target.join("old"), "old").unwrap();

        let replacement = temp_dir.path().join("staging").join("86Box.app");
        std::fs::create_dir_all(&replacement).unwrap();
        std::fs::write(replacement.join("new"), "new").unwrap();

        replace_item(&target, &replacement).unwrap();

        assert!(target.join("new").exists());
        assert!(!target.join("old").exists());
        assert!(!replacement.exists());
        let leftovers = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().contains(".old-"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_replace_missing_target_moves() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("install").join("roms");
        let replacement = temp_dir.path().join("unpacked");
        std::fs::create_dir_all(&replacement).unwrap();
        std::fs::write(replacement.join("rom.bin"), "rom").unwrap();

        replace_item(&target, &replacement).unwrap();
        assert_eq!(std::fs::read_to_string(target.join("rom.bin")).unwrap(), "rom");
    }

    #[test]
    fn test_missing_replacement_leaves_target() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("86Box.app");
        std::fs::create_dir_all(&target).unwrap();
        std::fs::write(target.join("old"), "old").unwrap();

        let result = replace_item(&target, &temp_dir.path().join("nothing"));
        assert!(result.is_err());
        assert_eq!(std::fs::read_to_string(target.join("old")).unwrap(), "old");
    }
}
