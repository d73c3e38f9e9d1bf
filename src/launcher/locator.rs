// SPDX-License-Identifier: GPL-3.0-only
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Default bundle name when nothing is installed yet.
pub const DEFAULT_BUNDLE_NAME: &str = "86Box.app";

/// How the emulator binary is handed to the launch command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Locator {
    Path(PathBuf),
    BundleId(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSource {
    PerVmOverride,
    GlobalCustom,
    AutoDetected,
}

const LAUNCH_CHAIN: [CandidateSource; 3] = [
    CandidateSource::PerVmOverride,
    CandidateSource::GlobalCustom,
    CandidateSource::AutoDetected,
];

const INSTALL_CHAIN: [CandidateSource; 2] = [CandidateSource::GlobalCustom, CandidateSource::AutoDetected];

#[derive(Debug, Clone, Default)]
pub struct LocatorInputs<'a> {
    pub vm_override: Option<&'a Path>,
    pub global_custom: Option<&'a Path>,
    pub auto_detected: Option<&'a Path>,
    pub bundle_id: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub locator: Locator,
    /// `None` when falling back to the bundle identifier
    pub source: Option<CandidateSource>,
    pub warnings: Vec<String>,
}

fn candidate(source: CandidateSource, inputs: &LocatorInputs<'_>, warnings: &mut Vec<String>) -> Option<PathBuf> {
    match source {
        CandidateSource::PerVmOverride => {
            let path = inputs.vm_override?;
            if path.exists() {
                Some(path.to_path_buf())
            } else {
                warn!(path = %path.display(), "VM emulator override is missing, using the global emulator");
                warnings.push(format!(
                    "The emulator selected for this VM was not found at {}. The default emulator will be used.",
                    path.display()
                ));
                None
            }
        }
        CandidateSource::GlobalCustom => inputs.global_custom.map(Path::to_path_buf),
        CandidateSource::AutoDetected => inputs.auto_detected.map(Path::to_path_buf),
    }
}

/// Walk the launch chain and return the first usable emulator locator.
pub fn resolve_binary(inputs: &LocatorInputs<'_>) -> Resolution {
    let mut warnings = Vec::new();
    for source in LAUNCH_CHAIN {
        if let Some(path) = candidate(source, inputs, &mut warnings) {
            debug!(?source, path = %path.display(), "Resolved emulator binary");
            return Resolution {
                locator: Locator::Path(path),
                source: Some(source),
                warnings,
            };
        }
    }

    debug!(bundle_id = inputs.bundle_id, "No emulator path known, launching by bundle id");
    Resolution {
        locator: Locator::BundleId(inputs.bundle_id.to_string()),
        source: None,
        warnings,
    }
}

/// Where a downloaded emulator bundle is installed. Per-VM overrides never apply.
pub fn resolve_install_target(inputs: &LocatorInputs<'_>, install_root: &Path) -> PathBuf {
    let mut warnings = Vec::new();
    INSTALL_CHAIN
        .into_iter()
        .find_map(|source| candidate(source, inputs, &mut warnings))
        .unwrap_or_else(|| install_root.join(DEFAULT_BUNDLE_NAME))
}
