// SPDX-License-Identifier: GPL-3.0-only
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::utils::sanitize_vm_name;

/// Emulator configuration file inside every VM folder.
pub const CONFIG_FILE_NAME: &str = "86box.cfg";

const PRINTER_DIR: &str = "printer";
const SCREENSHOTS_DIR: &str = "screenshots";
const DISKS_DIR: &str = "disks";
const SHADERS_DIR: &str = "shaders";

/// On-disk layout of a single VM folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmLayout {
    pub root: PathBuf,
    pub config: PathBuf,
    pub printer: PathBuf,
    pub screenshots: PathBuf,
    pub disks: PathBuf,
    pub shaders: PathBuf,
}

impl VmLayout {
    pub fn for_path(vm_path: &Path) -> Self {
        Self {
            root: vm_path.to_path_buf(),
            config: derive_config_path(vm_path),
            printer: vm_path.join(PRINTER_DIR),
            screenshots: vm_path.join(SCREENSHOTS_DIR),
            disks: vm_path.join(DISKS_DIR),
            shaders: vm_path.join(SHADERS_DIR),
        }
    }

    fn subdirectories(&self) -> [&Path; 4] {
        [&self.printer, &self.screenshots, &self.disks, &self.shaders]
    }
}

/// Default folder for a VM named `name` under `root`.
///
/// When the sanitized name is already taken on disk, a fresh unique token
/// becomes the folder name instead.
pub fn default_path(root: &Path, name: &str) -> PathBuf {
    let candidate = root.join(sanitize_vm_name(name));
    if candidate != root && !candidate.exists() {
        return candidate;
    }

    let unique = root.join(Uuid::new_v4().to_string());
    debug!(name, path = %unique.display(), "Default VM path taken, using unique folder");
    unique
}

pub fn derive_config_path(vm_path: &Path) -> PathBuf {
    vm_path.join(CONFIG_FILE_NAME)
}

/// Ensure the VM subfolders exist. Failures are logged and otherwise ignored.
pub fn materialize(vm_path: &Path) -> VmLayout {
    let layout = VmLayout::for_path(vm_path);
    for dir in layout.subdirectories() {
        if let Err(e) = std::fs::create_dir_all(dir) {
            warn!(path = %dir.display(), error = %e, "Failed to create VM directory");
        }
    }
    layout
}
