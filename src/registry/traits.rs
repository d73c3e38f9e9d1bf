// SPDX-License-Identifier: GPL-3.0-only
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::registry::models::{VmRecord, VmUpdate};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("VM name cannot be empty")]
    EmptyName,

    #[error("VM name is already taken: {0}")]
    NameTaken(String),

    #[error("VM path is already registered: {}", .0.display())]
    DuplicatePath(PathBuf),

    #[error("no VM at index {0}")]
    IndexOutOfRange(usize),

    #[error(transparent)]
    Persist(#[from] anyhow::Error),
}

#[async_trait]
pub trait Registry: Send + Sync {
    /// Register a new VM and return its index.
    /// Rejects empty or already used names.
    async fn add_vm(&self, vm: VmRecord) -> Result<usize, RegistryError>;

    /// Remove the VM at `index` from the registry. Files are left alone.
    async fn remove_vm(&self, index: usize) -> Result<VmRecord, RegistryError>;

    /// Move the VM at `from` so that it ends up at `to`
    async fn move_vm(&self, from: usize, to: usize) -> Result<(), RegistryError>;

    async fn update_vm(&self, index: usize, update: VmUpdate) -> Result<VmRecord, RegistryError>;

    /// Point the VM at a different root folder
    async fn relocate_vm(&self, index: usize, new_path: PathBuf) -> Result<VmRecord, RegistryError>;

    async fn get_vm(&self, index: usize) -> Option<VmRecord>;

    async fn list_vms(&self) -> Vec<VmRecord>;

    async fn contains_path(&self, path: &Path) -> bool;
}
