// SPDX-License-Identifier: GPL-3.0-only
use anyhow::Context;
use serde::Serialize;
use std::fs::OpenOptions;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

use crate::ini;
use crate::layout::{self, CONFIG_FILE_NAME};
use crate::specs::ChsGeometry;
use crate::utils::copy_dir_all;

/// Per-template description file.
pub const TEMPLATE_INFO_FILE: &str = "macbox.inf";

const GENERAL_SECTION: &str = "General";
const SHADERS_DIR: &str = "shaders";

/// Preconfigured machine a new VM can be seeded from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VmTemplate {
    /// Template folder name, stable across scans
    pub id: String,
    pub name: String,
    pub year: String,
    pub info_path: PathBuf,
    pub config_path: PathBuf,
    pub machine_logo: Option<String>,
    pub has_shaders: bool,
}

impl VmTemplate {
    fn root(&self) -> &Path {
        self.config_path.parent().unwrap_or_else(|| Path::new("."))
    }

    fn from_dir(dir: &Path) -> Option<Self> {
        let info_path = dir.join(TEMPLATE_INFO_FILE);
        let config_path = dir.join(CONFIG_FILE_NAME);
        if !info_path.is_file() || !config_path.is_file() {
            return None;
        }

        let info = ini::parse_file(&info_path);
        let general = |key: &str| info.get(GENERAL_SECTION, key).map(str::to_string);

        Some(Self {
            id: dir.file_name()?.to_string_lossy().into_owned(),
            name: general("Description").unwrap_or_default(),
            year: general("Year").unwrap_or_default(),
            machine_logo: general("Logo"),
            has_shaders: dir.join(SHADERS_DIR).is_dir(),
            info_path,
            config_path,
        })
    }
}

/// Templates found under `dir`, oldest machine first. A missing directory yields none.
pub fn scan_templates(dir: &Path) -> Vec<VmTemplate> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(path = %dir.display(), error = %e, "No template directory");
            return Vec::new();
        }
    };

    let mut templates: Vec<VmTemplate> = entries
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
        .filter_map(|e| VmTemplate::from_dir(&e.path()))
        .collect();

    templates.sort_by(|a, b| a.year.cmp(&b.year).then_with(|| a.name.cmp(&b.name)));
    templates
}

/// Seed the VM folder at `vm_path` from `template`.
/// Blocking; run it on the blocking pool.
pub fn apply_template(template: &VmTemplate, vm_path: &Path, use_shader: bool) -> anyhow::Result<()> {
    let vm_layout = layout::materialize(vm_path);

    std::fs::copy(&template.config_path, &vm_layout.config)
        .with_context(|| format!("Failed to copy template config to {}", vm_layout.config.display()))?;

    if use_shader && template.has_shaders {
        copy_dir_all(&template.root().join(SHADERS_DIR), &vm_layout.shaders)
            .context("Failed to copy template shaders")?;
    }

    let config = ini::parse_file(&vm_layout.config);
    if let Some(disk) = presize_disk(vm_path, &config)? {
        debug!(path = %disk.display(), "Created disk image");
    }

    info!(template = %template.id, path = %vm_path.display(), "VM created from template");
    Ok(())
}

/// Create the first configured hard-disk image as a sparse file of its CHS
/// size. Existing images are left alone.
/// `name` as a path below the VM folder, or `None` when it is absolute or climbs out.
fn enclosed_relative(name: &str) -> Option<PathBuf> {
    let mut relative = PathBuf::new();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    (!relative.as_os_str().is_empty()).then_some(relative)
}

pub fn presize_disk(vm_path: &Path, config: &ini::IniDocument) -> anyhow::Result<Option<PathBuf>> {
    let Some(file_name) = config.get("Hard disks", "hdd_01_fn") else {
        return Ok(None);
    };
    let Some(geometry) = config.get("Hard disks", "hdd_01_parameters").and_then(ChsGeometry::parse) else {
        warn!(file = file_name, "Disk image has no usable geometry, not creating it");
        return Ok(None);
    };

    let Some(relative) = enclosed_relative(file_name) else {
        warn!(file = file_name, "Disk image path leaves the VM folder, not creating it");
        return Ok(None);
    };
    let image = vm_path.join(relative);
    if image.exists() {
        return Ok(None);
    }
    if let Some(parent) = image.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&image)
        .with_context(|| format!("Failed to create disk image {}", image.display()))?;
    file.set_len(geometry.size_bytes())
        .with_context(|| format!("Failed to size disk image {}", image.display()))?;

    Ok(Some(image))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_template(root: &Path, id: &str, year: &str, description: &str, config: &str) -> PathBuf {
        let dir = root.join(id);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join(TEMPLATE_INFO_FILE),
            format!("[General]\nDescription = {description}\nYear = {year}\nLogo = {id}\n"),
        )
        .unwrap();
        std::fs::write(dir.join(CONFIG_FILE_NAME), config).unwrap();
        dir
    }

    #[test]
    fn test_scan_sorted_by_year() {
        let temp_dir = TempDir::new().unwrap();
        write_template(temp_dir.path(), "at", "1984", "IBM PC/AT", "");
        write_template(temp_dir.path(), "xt", "1982", "IBM PC/XT", "");
        write_template(temp_dir.path(), "ps2", "1987", "IBM PS/2", "");
        std::fs::create_dir_all(temp_dir.path().join("incomplete")).unwrap();

        let templates = scan_templates(temp_dir.path());
        let years: Vec<&str> = templates.iter().map(|t| t.year.as_str()).collect();
        assert_eq!(years, ["1982", "1984", "1987"]);
        assert_eq!(templates[0].name, "IBM PC/XT");
        assert_eq!(templates[0].machine_logo.as_deref(), Some("xt"));
        assert!(!templates[0].has_shaders);
    }

    #[test]
    fn test_scan_missing_dir() {
        assert!(scan_templates(Path::new("/nonexistent/templates")).is_empty());
    }

    #[test]
    fn test_apply_template_presizes_disk_and_copies_shaders() {
        let temp_dir = TempDir::new().unwrap();
        let template_dir = write_template(
            temp_dir.path(),
            "at",
            "1984",
            "IBM PC/AT",
            "[Hard disks]\nhdd_01_fn = disks/hdd.img\nhdd_01_parameters = 17, 4, 615, 0, mfm\n",
        );
        std::fs::create_dir_all(template_dir.join(SHADERS_DIR)).unwrap();
        std::fs::write(template_dir.join(SHADERS_DIR).join("crt.glsl"), "shader").unwrap();

        let template = scan_templates(temp_dir.path()).remove(0);
        assert!(template.has_shaders);

        let vm_path = temp_dir.path().join("vms").join("My AT");
        apply_template(&template, &vm_path, true).unwrap();

        assert!(vm_path.join(CONFIG_FILE_NAME).is_file());
        assert!(vm_path.join("shaders/crt.glsl").is_file());
        let size = std::fs::metadata(vm_path.join("disks/hdd.img")).unwrap().len();
        assert_eq!(size, 17 * 4 * 615 * 512);
    }

    #[test]
    fn test_apply_template_without_shader() {
        let temp_dir = TempDir::new().unwrap();
        let template_dir = write_template(temp_dir.path(), "xt", "1982", "IBM PC/XT", "[Machine]\nmachine = ibmxt\n");
        std::fs::create_dir_all(template_dir.join(SHADERS_DIR)).unwrap();
        std::fs::write(template_dir.join(SHADERS_DIR).join("crt.glsl"), "shader").unwrap();

        let template = scan_templates(temp_dir.path()).remove(0);
        let vm_path = temp_dir.path().join("xt-vm");
        apply_template(&template, &vm_path, false).unwrap();

        assert!(!vm_path.join("shaders/crt.glsl").exists());
        assert!(vm_path.join("shaders").is_dir());
    }

    #[test]
    fn test_presize_keeps_existing_image() {
        let temp_dir = TempDir::new().unwrap();
        let vm_path = temp_dir.path();
        std::fs::write(vm_path.join("hdd.img"), "data").unwrap();

        let config = ini::parse_str("[Hard disks]\nhdd_01_fn = hdd.img\nhdd_01_parameters = 63, 16, 100\n");
        assert_eq!(presize_disk(vm_path, &config).unwrap(), None);
        assert_eq!(std::fs::read_to_string(vm_path.join("hdd.img")).unwrap(), "data");
    }

    #[test]
    fn test_presize_stays_in_vm_folder() {
        let temp_dir = TempDir::new().unwrap();
        let vm_path = temp_dir.path().join("vm");
        std::fs::create_dir_all(&vm_path).unwrap();

        for name in ["../escape.img", "disks/../../escape.img"] {
            let config = ini::parse_str(&format!("[Hard disks]\nhdd_01_fn = {name}\nhdd_01_parameters = 63, 16, 100\n"));
            assert_eq!(presize_disk(&vm_path, &config).unwrap(), None);
        }
        assert!(!temp_dir.path().join("escape.img").exists());

        let absolute = temp_dir.path().join("absolute.img");
        let config = ini::parse_str(&format!(
            "[Hard disks]\nhdd_01_fn = {}\nhdd_01_parameters = 63, 16, 100\n",
            absolute.display()
        ));
        assert_eq!(presize_disk(&vm_path, &config).unwrap(), None);
        assert!(!absolute.exists());
    }
}
