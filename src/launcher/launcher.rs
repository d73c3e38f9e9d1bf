// SPDX-License-Identifier: GPL-3.0-only
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::launcher::locator::Locator;
use crate::registry::VmRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchMode {
    /// Boot the VM
    Run,
    /// Open the emulator's settings dialog for the VM
    Settings,
}

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("VM {0} has no folder assigned")]
    NoPath(String),

    #[error("failed to start {}: {source}", .command.display())]
    Spawn {
        command: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct RunningInstance {
    pub id: u64,
    pub vm_name: String,
    pub vm_path: PathBuf,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
}

/// Arguments passed to the launch command for `vm`.
/// `Run` launches add `-W` so the launch command lives as long as the emulator.
pub fn build_args(vm: &VmRecord, locator: &Locator, mode: LaunchMode) -> Result<Vec<OsString>, LaunchError> {
    let vm_path = vm.path.as_ref().ok_or_else(|| LaunchError::NoPath(vm.name.clone()))?;

    let mut args: Vec<OsString> = vec!["-n".into()];
    if mode == LaunchMode::Run {
        args.push("-W".into());
    }
    match locator {
        Locator::Path(app) => {
            args.push("-a".into());
            args.push(app.as_os_str().to_owned());
        }
        Locator::BundleId(id) => {
            args.push("-b".into());
            args.push(id.into());
        }
    }

    args.push("--args".into());
    args.push("-P".into());
    args.push(vm_path.as_os_str().to_owned());

    match mode {
        LaunchMode::Run => {
            args.push("-V".into());
            args.push(vm.name.as_str().into());
            if vm.wants_full_screen() {
                args.push("-F".into());
            }
        }
        LaunchMode::Settings => args.push("-S".into()),
    }

    Ok(args)
}

/// Starts emulator processes and tracks the ones booting a VM.
pub struct Launcher {
    launch_command: PathBuf,
    next_id: AtomicU64,
    running: Arc<Mutex<HashMap<u64, RunningInstance>>>,
}

impl Launcher {
    pub fn new(launch_command: PathBuf) -> Self {
        Self {
            launch_command,
            next_id: AtomicU64::new(1),
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Spawn the emulator for `vm`. Only `Run` launches are tracked as running.
    pub async fn launch(&self, vm: &VmRecord, locator: &Locator, mode: LaunchMode) -> Result<Option<u32>, LaunchError> {
        let args = build_args(vm, locator, mode)?;
        let vm_path = vm.path.clone().ok_or_else(|| LaunchError::NoPath(vm.name.clone()))?;

        debug!(command = %self.launch_command.display(), ?args, "Spawning emulator");
        let mut child = Command::new(&self.launch_command)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| {
                error!(vm = %vm.name, error = %source, "Failed to launch emulator");
                LaunchError::Spawn {
                    command: self.launch_command.clone(),
                    source,
                }
            })?;

        let pid = child.id();
        info!(vm = %vm.name, ?mode, ?pid, "Emulator launched");

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if mode == LaunchMode::Run {
            self.running.lock().await.insert(
                id,
                RunningInstance {
                    id,
                    vm_name: vm.name.clone(),
                    vm_path,
                    pid,
                    started_at: Utc::now(),
                },
            );
        }

        let running = Arc::clone(&self.running);
        let vm_name = vm.name.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => debug!(vm = %vm_name, %status, "Emulator exited"),
                Err(e) => warn!(vm = %vm_name, error = %e, "Failed to wait for emulator"),
            }
            if mode == LaunchMode::Run {
                running.lock().await.remove(&id);
            }
        });

        Ok(pid)
    }

    pub async fn is_running(&self, vm_path: &Path) -> bool {
        self.running.lock().await.values().any(|instance| instance.vm_path == vm_path)
    }

    /// Tracked instances, oldest first.
    pub async fn running(&self) -> Vec<RunningInstance> {
        let mut instances: Vec<RunningInstance> = self.running.lock().await.values().cloned().collect();
        instances.sort_by_key(|instance| (instance.started_at, instance.id));
        instances
    }
}
