// SPDX-License-Identifier: GPL-3.0-only
use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;

/// One managed virtual machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmRecord {
    /// Display name
    #[serde(default, deserialize_with = "null_as_empty")]
    pub name: String,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub description: String,

    /// VM root folder; assigned when the record is first registered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Symbolic icon identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,

    /// Emulator binary used for this VM instead of the global one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_screen: Option<bool>,
}

impl VmRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            path: None,
            logo: None,
            app_path: None,
            full_screen: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn wants_full_screen(&self) -> bool {
        self.full_screen.unwrap_or(false)
    }
}

/// Partial update applied by `Registry::update_vm`. `None` leaves a field as is.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub logo: Option<String>,
    /// Empty string clears the override
    pub app_path: Option<String>,
    pub full_screen: Option<bool>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}
