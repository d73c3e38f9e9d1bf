// SPDX-License-Identifier: GPL-3.0-only
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::error;

/// Asset updated by an install job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Emulator,
    Roms,
    Manager,
}

impl JobKind {
    pub const ALL: [JobKind; 3] = [JobKind::Emulator, JobKind::Roms, JobKind::Manager];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Emulator => "emulator",
            JobKind::Roms => "roms",
            JobKind::Manager => "manager",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Downloading { progress: f64 },
    Staging,
    Installing,
    Done { restart_required: bool },
    Failed { error: String },
}

/// State change broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstallEvent {
    pub kind: JobKind,
    #[serde(flatten)]
    pub state: JobState,
}

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("{0} update is already in progress")]
    AlreadyRunning(JobKind),

    #[error("no downloadable {0} asset for this platform")]
    NoAsset(JobKind),

    #[error("no {0} release information available, check for updates first")]
    NotAvailable(JobKind),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Handle on a started job.
pub struct JobHandle {
    pub kind: JobKind,
    task: JoinHandle<JobState>,
}

impl JobHandle {
    pub(crate) fn new(kind: JobKind, task: JoinHandle<JobState>) -> Self {
        Self { kind, task }
    }

    /// Wait for the job to reach a terminal state
    pub async fn finished(self) -> JobState {
        match self.task.await {
            Ok(state) => state,
            Err(e) => {
                error!(kind = %self.kind, error = %e, "Install task panicked");
                JobState::Failed { error: e.to_string() }
            }
        }
    }
}
