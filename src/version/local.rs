// SPDX-License-Identifier: GPL-3.0-only
use anyhow::Context;
use plist::Value;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Length of the build identifier taken from the end of `CFBundleVersion`.
const BUILD_ID_LEN: usize = 4;

const ROMS_DATA_DIR: &str = "net.86box.86Box";

/// Version identifiers read from an application bundle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BundleVersions {
    pub app_version: Option<String>,
    pub build_version: Option<String>,
}

/// Locally installed emulator and ROM state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LocalInstall {
    /// Bundle found by scanning the application directories
    pub auto_path: Option<PathBuf>,
    /// User-forced bundle path from settings
    pub custom_path: Option<PathBuf>,
    pub versions: BundleVersions,
    /// Existing ROM directories
    pub rom_locations: Vec<PathBuf>,
}

impl LocalInstall {
    /// Bundle whose version is checked: the custom path when set
    pub fn checked_path(&self) -> Option<&Path> {
        self.custom_path.as_deref().or(self.auto_path.as_deref())
    }

    pub fn is_installed(&self) -> bool {
        self.checked_path().is_some()
    }
}

fn info_plist(bundle: &Path) -> PathBuf {
    bundle.join("Contents").join("Info.plist")
}

fn plist_string(info: &Value, key: &str) -> Option<String> {
    info.as_dictionary()
        .and_then(|dict| dict.get(key))
        .and_then(Value::as_string)
        .map(str::to_string)
}

pub fn read_bundle_identifier(bundle: &Path) -> anyhow::Result<Option<String>> {
    let info = Value::from_file(info_plist(bundle)).context("Read plist")?;
    Ok(plist_string(&info, "CFBundleIdentifier"))
}

/// Read the short version string and the build id (last characters of `CFBundleVersion`).
pub fn read_bundle_versions(bundle: &Path) -> anyhow::Result<BundleVersions> {
    let info = Value::from_file(info_plist(bundle))
        .with_context(|| format!("Failed to read Info.plist of {}", bundle.display()))?;

    let build_version = plist_string(&info, "CFBundleVersion").map(|version| {
        let chars: Vec<char> = version.chars().collect();
        let start = chars.len().saturating_sub(BUILD_ID_LEN);
        chars[start..].iter().collect()
    });

    Ok(BundleVersions {
        app_version: plist_string(&info, "CFBundleShortVersionString"),
        build_version,
    })
}

/// Finds an installed application bundle by identifier.
#[derive(Debug, Clone)]
pub struct BundleProbe {
    search_dirs: Vec<PathBuf>,
    bundle_id: String,
}

impl BundleProbe {
    pub fn new(search_dirs: Vec<PathBuf>, bundle_id: impl Into<String>) -> Self {
        Self {
            search_dirs,
            bundle_id: bundle_id.into(),
        }
    }

    /// First `*.app` directly inside a search directory with the expected identifier.
    pub fn find(&self) -> Option<PathBuf> {
        for dir in &self.search_dirs {
            let Ok(entries) = std::fs::read_dir(dir) else {
                continue;
            };

            let mut bundles: Vec<PathBuf> = entries
                .filter_map(Result::ok)
                .map(|e| e.path())
                .filter(|p| p.extension().is_some_and(|ext| ext == "app") && p.is_dir())
                .collect();
            bundles.sort();

            for bundle in bundles {
                match read_bundle_identifier(&bundle) {
                    Ok(Some(id)) if id == self.bundle_id => {
                        debug!(path = %bundle.display(), "Found emulator bundle");
                        return Some(bundle);
                    }
                    Ok(_) => {}
                    Err(e) => debug!(path = %bundle.display(), error = %e, "Skipping unreadable bundle"),
                }
            }
        }
        None
    }
}

/// Candidate ROM directories, in lookup order.
pub fn rom_candidates(app_support_dir: &Path, emulator_bundle: Option<&Path>) -> Vec<PathBuf> {
    let mut candidates = vec![default_rom_location(app_support_dir)];
    if let Some(bundle) = emulator_bundle {
        candidates.push(bundle.join("Contents").join("Resources").join("roms"));
    }
    candidates
}

/// ROM directory created when no installed ROMs are known.
pub fn default_rom_location(app_support_dir: &Path) -> PathBuf {
    app_support_dir.join(ROMS_DATA_DIR).join("roms")
}

/// Probe the local machine. Performs blocking filesystem reads.
pub fn detect(probe: &BundleProbe, custom_path: Option<PathBuf>, app_support_dir: &Path) -> LocalInstall {
    let auto_path = probe.find();
    let mut install = LocalInstall {
        auto_path,
        custom_path,
        ..Default::default()
    };

    if let Some(bundle) = install.checked_path().map(Path::to_path_buf) {
        match read_bundle_versions(&bundle) {
            Ok(versions) => install.versions = versions,
            Err(e) => warn!(path = %bundle.display(), error = %e, "Failed to read emulator version"),
        }
    }

    install.rom_locations = rom_candidates(app_support_dir, install.checked_path())
        .into_iter()
        .filter(|p| p.is_dir())
        .collect();

    install
}
