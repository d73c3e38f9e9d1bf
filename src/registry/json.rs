// SPDX-License-Identifier: GPL-3.0-only
use anyhow::Context;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::layout;
use crate::registry::models::{VmRecord, VmUpdate};
use crate::registry::traits::{Registry, RegistryError};
use crate::utils::write_atomic;

/// File name of the registry document inside the home directory.
pub const REGISTRY_DOCUMENT: &str = "Config";

/// Registry persisted as a single JSON array, rewritten in full after every change.
pub struct JsonRegistry {
    home: PathBuf,
    document: PathBuf,
    vms: RwLock<Vec<VmRecord>>,
}

impl JsonRegistry {
    /// Load the registry stored under `home`, creating an empty one if needed.
    ///
    /// Every stored record is replayed through the same insertion rules as a
    /// newly created VM, so paths are assigned and materialized uniformly.
    pub async fn open(home: &Path) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(home)
            .await
            .with_context(|| format!("Failed to create home directory {}", home.display()))?;

        let document = home.join(REGISTRY_DOCUMENT);
        let stored = read_document(&document).await;

        let mut vms = Vec::with_capacity(stored.len());
        for mut vm in stored {
            if vm.name.trim().is_empty() {
                vm.name = fallback_name(&vm);
            }
            let name = vm.name.clone();
            if let Err(e) = insert_record(&mut vms, home, vm) {
                warn!(vm = %name, error = %e, "Skipping stored VM");
            }
        }

        persist(&document, &vms).await?;
        info!(path = %document.display(), count = vms.len(), "Registry loaded");

        Ok(Self {
            home: home.to_path_buf(),
            document,
            vms: RwLock::new(vms),
        })
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn document_path(&self) -> &Path {
        &self.document
    }

    fn check_name(vms: &[VmRecord], name: &str, skip: Option<usize>) -> Result<(), RegistryError> {
        if name.trim().is_empty() {
            return Err(RegistryError::EmptyName);
        }
        let taken = vms
            .iter()
            .enumerate()
            .any(|(i, vm)| Some(i) != skip && vm.name == name);
        if taken {
            return Err(RegistryError::NameTaken(name.to_string()));
        }
        Ok(())
    }
}

/// Serialized form of the registry document. Output is deterministic for a given list.
pub fn serialize(vms: &[VmRecord]) -> anyhow::Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec_pretty(vms).context("Failed to serialize registry")?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Rewrite the whole document on the blocking pool.
async fn persist(document: &Path, vms: &[VmRecord]) -> anyhow::Result<()> {
    let bytes = serialize(vms)?;
    let target = document.to_path_buf();
    tokio::task::spawn_blocking(move || write_atomic(&target, &bytes))
        .await?
        .with_context(|| format!("Failed to write registry {}", document.display()))?;
    debug!(path = %document.display(), count = vms.len(), "Registry persisted");
    Ok(())
}

async fn read_document(document: &Path) -> Vec<VmRecord> {
    let contents = match tokio::fs::read(document).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %document.display(), "No registry document, starting empty");
            return Vec::new();
        }
        Err(e) => {
            error!(path = %document.display(), error = %e, "Failed to read registry document");
            return Vec::new();
        }
    };

    match serde_json::from_slice(&contents) {
        Ok(vms) => vms,
        Err(e) => {
            let backup = document.with_extension(format!("corrupt-{}", chrono::Utc::now().timestamp()));
            error!(
                path = %document.display(),
                backup = %backup.display(),
                error = %e,
                "Registry document is malformed, moving it aside"
            );
            if let Err(e) = tokio::fs::rename(document, &backup).await {
                warn!(error = %e, "Failed to move malformed registry aside");
            }
            Vec::new()
        }
    }
}

fn fallback_name(vm: &VmRecord) -> String {
    vm.path
        .as_deref()
        .and_then(Path::file_name)
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| "Untitled VM".to_string())
}

/// Append `vm` after applying the path rules. Shared by load and interactive add.
fn insert_record(vms: &mut Vec<VmRecord>, home: &Path, mut vm: VmRecord) -> Result<usize, RegistryError> {
    if vm.name.trim().is_empty() {
        return Err(RegistryError::EmptyName);
    }

    let path = match vm.path.take() {
        Some(p) => {
            if vms.iter().any(|other| other.path.as_deref() == Some(p.as_path())) {
                return Err(RegistryError::DuplicatePath(p));
            }
            p
        }
        None => {
            let candidate = layout::default_path(home, &vm.name);
            if vms.iter().any(|other| other.path.as_deref() == Some(candidate.as_path())) {
                home.join(Uuid::new_v4().to_string())
            } else {
                candidate
            }
        }
    };

    layout::materialize(&path);
    vm.path = Some(path);
    vms.push(vm);
    Ok(vms.len() - 1)
}

#[async_trait]
impl Registry for JsonRegistry {
    async fn add_vm(&self, vm: VmRecord) -> Result<usize, RegistryError> {
        let mut vms = self.vms.write().await;
        Self::check_name(&vms, &vm.name, None)?;

        let index = insert_record(&mut vms, &self.home, vm)?;
        if let Err(e) = persist(&self.document, &vms).await {
            vms.pop();
            return Err(e.into());
        }

        info!(vm = %vms[index].name, index, "VM added");
        Ok(index)
    }

    async fn remove_vm(&self, index: usize) -> Result<VmRecord, RegistryError> {
        let mut vms = self.vms.write().await;
        if index >= vms.len() {
            return Err(RegistryError::IndexOutOfRange(index));
        }

        let removed = vms.remove(index);
        if let Err(e) = persist(&self.document, &vms).await {
            vms.insert(index, removed);
            return Err(e.into());
        }

        info!(vm = %removed.name, index, "VM removed");
        Ok(removed)
    }

    async fn move_vm(&self, from: usize, to: usize) -> Result<(), RegistryError> {
        let mut vms = self.vms.write().await;
        let len = vms.len();
        if from >= len {
            return Err(RegistryError::IndexOutOfRange(from));
        }
        if to >= len {
            return Err(RegistryError::IndexOutOfRange(to));
        }
        if from == to {
            return Ok(());
        }

        let vm = vms.remove(from);
        vms.insert(to, vm);
        if let Err(e) = persist(&self.document, &vms).await {
            let vm = vms.remove(to);
            vms.insert(from, vm);
            return Err(e.into());
        }

        debug!(from, to, "VM moved");
        Ok(())
    }

    async fn update_vm(&self, index: usize, update: VmUpdate) -> Result<VmRecord, RegistryError> {
        let mut vms = self.vms.write().await;
        let Some(current) = vms.get(index).cloned() else {
            return Err(RegistryError::IndexOutOfRange(index));
        };

        let mut updated = current.clone();
        if let Some(name) = update.name {
            if name != current.name {
                Self::check_name(&vms, &name, Some(index))?;
            }
            updated.name = name;
        }
        if let Some(description) = update.description {
            updated.description = description;
        }
        if let Some(logo) = update.logo {
            updated.logo = (!logo.is_empty()).then_some(logo);
        }
        if let Some(app_path) = update.app_path {
            updated.app_path = (!app_path.is_empty()).then(|| PathBuf::from(app_path));
        }
        if let Some(full_screen) = update.full_screen {
            updated.full_screen = Some(full_screen);
        }

        vms[index] = updated.clone();
        if let Err(e) = persist(&self.document, &vms).await {
            vms[index] = current;
            return Err(e.into());
        }

        debug!(vm = %updated.name, index, "VM updated");
        Ok(updated)
    }

    async fn relocate_vm(&self, index: usize, new_path: PathBuf) -> Result<VmRecord, RegistryError> {
        let mut vms = self.vms.write().await;
        if index >= vms.len() {
            return Err(RegistryError::IndexOutOfRange(index));
        }
        let taken = vms
            .iter()
            .enumerate()
            .any(|(i, vm)| i != index && vm.path.as_deref() == Some(new_path.as_path()));
        if taken {
            return Err(RegistryError::DuplicatePath(new_path));
        }

        let previous = vms[index].path.replace(new_path.clone());
        layout::materialize(&new_path);
        if let Err(e) = persist(&self.document, &vms).await {
            vms[index].path = previous;
            return Err(e.into());
        }

        info!(vm = %vms[index].name, path = %new_path.display(), "VM relocated");
        Ok(vms[index].clone())
    }

    async fn get_vm(&self, index: usize) -> Option<VmRecord> {
        self.vms.read().await.get(index).cloned()
    }

    async fn list_vms(&self) -> Vec<VmRecord> {
        self.vms.read().await.clone()
    }

    async fn contains_path(&self, path: &Path) -> bool {
        self.vms
            .read()
            .await
            .iter()
            .any(|vm| vm.path.as_deref() == Some(path))
    }
}
