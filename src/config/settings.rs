// SPDX-License-Identifier: GPL-3.0-only
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{info, warn};

use crate::utils::write_atomic;

/// Setting value meaning "use the auto-detected emulator install".
pub const AUTO_PATH: &str = "auto";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateChannel {
    Stable,
    Experimental,
}

impl UpdateChannel {
    /// `"stable"` selects the release feed, anything else the CI feed.
    pub fn from_setting(value: &str) -> Self {
        if value == "stable" {
            UpdateChannel::Stable
        } else {
            UpdateChannel::Experimental
        }
    }
}

/// User preferences persisted between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub update_channel: String,
    pub emulator_path: String,
    pub vm_home: Option<PathBuf>,
    pub roms_sha: Option<String>,
    pub last_selected_vm: Option<usize>,
    pub appearance: String,
    pub prevent_sleep: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            update_channel: "stable".to_string(),
            emulator_path: AUTO_PATH.to_string(),
            vm_home: None,
            roms_sha: None,
            last_selected_vm: None,
            appearance: "system".to_string(),
            prevent_sleep: false,
        }
    }
}

impl Settings {
    pub fn channel(&self) -> UpdateChannel {
        UpdateChannel::from_setting(&self.update_channel)
    }

    /// User-forced emulator bundle, if one is configured
    pub fn emulator_custom_path(&self) -> Option<PathBuf> {
        let value = self.emulator_path.trim();
        if value.is_empty() || value == AUTO_PATH {
            None
        } else {
            Some(PathBuf::from(value))
        }
    }
}

pub struct SettingsStore {
    path: PathBuf,
    current: RwLock<Settings>,
}

impl SettingsStore {
    /// Read settings from `path`. A missing or unreadable file yields defaults.
    pub fn load(path: &Path) -> Self {
        let settings = match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<Settings>(&contents) {
                Ok(settings) => settings,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Settings file is malformed, using defaults");
                    Settings::default()
                }
            },
            Err(_) => Settings::default(),
        };

        Self {
            path: path.to_path_buf(),
            current: RwLock::new(settings),
        }
    }

    pub fn get(&self) -> Settings {
        self.current.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Apply `change` and persist the result. The in-memory value is only
    /// replaced once the file has been written.
    pub fn update<F>(&self, change: F) -> anyhow::Result<Settings>
    where
        F: FnOnce(&mut Settings),
    {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        let mut next = guard.clone();
        change(&mut next);

        let contents = toml::to_string_pretty(&next)?;
        write_atomic(&self.path, contents.as_bytes())?;
        info!(path = %self.path.display(), "Settings saved");

        *guard = next.clone();
        Ok(next)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
