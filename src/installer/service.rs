// SPDX-License-Identifier: GPL-3.0-only
use anyhow::Context;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

use crate::config::{Config, SettingsStore, UpdateChannel};
use crate::installer::downloader::{AssetDownloader, DownloadOutcome};
use crate::installer::extractor::{extract_zip, find_app_bundle, find_top_level_dir};
use crate::installer::job::{InstallError, InstallEvent, JobHandle, JobKind, JobState};
use crate::installer::replace::replace_item;
use crate::launcher::{LocatorInputs, resolve_install_target};
use crate::utils::{copy_dir_all, join_artifact_url, remove_item, sanitize_filename, validate_download_url};
use crate::version::SnapshotHandle;
use crate::version::local::{self, BundleVersions};

/// Name prefix of the folder inside the ROM archive.
const ROMS_FOLDER_PREFIX: &str = "86Box-roms";

const EVENT_CAPACITY: usize = 64;

/// Filesystem locations and URLs the installer works with.
#[derive(Debug, Clone)]
pub struct InstallPaths {
    /// Registry home used when the user has not relocated it
    pub default_home: PathBuf,
    pub app_support_dir: PathBuf,
    /// Bundle replaced by a self-update
    pub manager_bundle: PathBuf,
    pub ci_artifact_base: String,
    pub roms_archive_url: String,
}

/// Runs download, unpack and install jobs, at most one per asset kind.
pub struct InstallerService {
    downloader: AssetDownloader,
    snapshot: SnapshotHandle,
    settings: Arc<SettingsStore>,
    paths: InstallPaths,
    states: Mutex<HashMap<JobKind, JobState>>,
    active: Mutex<HashMap<JobKind, watch::Sender<bool>>>,
    events: broadcast::Sender<InstallEvent>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn is_cancelled(cancel: &watch::Receiver<bool>) -> bool {
    *cancel.borrow()
}

impl InstallerService {
    pub fn new(snapshot: SnapshotHandle, settings: Arc<SettingsStore>, paths: InstallPaths) -> anyhow::Result<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            downloader: AssetDownloader::new()?,
            snapshot,
            settings,
            paths,
            states: Mutex::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InstallEvent> {
        self.events.subscribe()
    }

    pub fn state(&self, kind: JobKind) -> JobState {
        lock(&self.states).get(&kind).cloned().unwrap_or(JobState::Idle)
    }

    pub fn states(&self) -> Vec<InstallEvent> {
        JobKind::ALL
            .into_iter()
            .map(|kind| InstallEvent {
                kind,
                state: self.state(kind),
            })
            .collect()
    }

    fn set_state(&self, kind: JobKind, state: JobState) {
        debug!(%kind, ?state, "Install job state changed");
        lock(&self.states).insert(kind, state.clone());
        // No subscribers is fine
        let _ = self.events.send(InstallEvent { kind, state });
    }

    fn home(&self) -> PathBuf {
        self.settings
            .get()
            .vm_home
            .unwrap_or_else(|| self.paths.default_home.clone())
    }

    /// Download URL of the asset for `kind`, taken from the current snapshot.
    fn asset_url(&self, kind: JobKind) -> Result<Url, InstallError> {
        let snapshot = self.snapshot.current();
        let url = match kind {
            JobKind::Emulator => {
                let release = snapshot
                    .emulator_release
                    .as_ref()
                    .ok_or(InstallError::NotAvailable(kind))?;
                match snapshot.channel {
                    UpdateChannel::Stable => {
                        validate_download_url(release.stable_asset().ok_or(InstallError::NoAsset(kind))?)?
                    }
                    UpdateChannel::Experimental => join_artifact_url(
                        &self.paths.ci_artifact_base,
                        release.experimental_asset().ok_or(InstallError::NoAsset(kind))?,
                    )?,
                }
            }
            JobKind::Roms => validate_download_url(&self.paths.roms_archive_url)?,
            JobKind::Manager => {
                let release = snapshot
                    .manager_release
                    .as_ref()
                    .ok_or(InstallError::NotAvailable(kind))?;
                validate_download_url(release.first_asset().ok_or(InstallError::NoAsset(kind))?)?
            }
        };
        Ok(url)
    }

    /// Start a job for `kind`. Fails when one is already running.
    pub fn start(self: &Arc<Self>, kind: JobKind) -> Result<JobHandle, InstallError> {
        let url = self.asset_url(kind)?;
        let roms_sha = self.snapshot.current().roms_commit.as_ref().and_then(|c| c.sha.clone());

        let (cancel_tx, cancel_rx) = watch::channel(false);
        {
            let mut active = lock(&self.active);
            if active.contains_key(&kind) {
                return Err(InstallError::AlreadyRunning(kind));
            }
            active.insert(kind, cancel_tx);
        }

        info!(%kind, url = %url, "Starting install job");
        self.set_state(kind, JobState::Downloading { progress: 0.0 });

        let service = Arc::clone(self);
        let task = tokio::spawn(async move {
            let state = service.run(kind, url, roms_sha, cancel_rx).await;
            // Free the slot first so a listener reacting to the event can restart
            lock(&service.active).remove(&kind);
            service.set_state(kind, state.clone());
            state
        });

        Ok(JobHandle::new(kind, task))
    }

    pub fn cancel(&self, kind: JobKind) -> bool {
        match lock(&self.active).get(&kind) {
            Some(cancel) => {
                cancel.send_replace(true);
                true
            }
            None => false,
        }
    }

    /// Cancel every outstanding job. Returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let active = lock(&self.active);
        for (kind, cancel) in active.iter() {
            info!(%kind, "Cancelling install job");
            cancel.send_replace(true);
        }
        active.len()
    }

    pub fn manager_bundle(&self) -> &Path {
        &self.paths.manager_bundle
    }

    /// Command starting a fresh instance of the manager bundle, even while
    /// another instance is still registered with the system.
    pub fn relaunch_command(&self, launch_command: &Path) -> std::process::Command {
        let mut command = std::process::Command::new(launch_command);
        command.arg("-n").arg(&self.paths.manager_bundle);
        command
    }

    /// Start the updated manager bundle. Call once this process has released
    /// its resources; it is expected to exit right afterwards.
    pub fn relaunch(&self, launch_command: &Path) -> anyhow::Result<()> {
        self.relaunch_command(launch_command)
            .spawn()
            .with_context(|| format!("Failed to relaunch {}", self.paths.manager_bundle.display()))?;
        info!(bundle = %self.paths.manager_bundle.display(), "Relaunched updated manager");
        Ok(())
    }

    async fn run(&self, kind: JobKind, url: Url, roms_sha: Option<String>, mut cancel: watch::Receiver<bool>) -> JobState {
        let scratch = Config::scratch_dir(&self.home()).join(format!("{kind}-{}", Uuid::new_v4().simple()));

        let state = match self.execute(kind, &url, roms_sha, &scratch, &mut cancel).await {
            Ok(Some(restart_required)) => {
                cleanup_scratch(&scratch).await;
                info!(%kind, restart_required, "Install job finished");
                JobState::Done { restart_required }
            }
            Ok(None) => {
                cleanup_scratch(&scratch).await;
                info!(%kind, "Install job cancelled");
                JobState::Idle
            }
            Err(e) => {
                let message = format!("{e:#}");
                error!(%kind, scratch = %scratch.display(), error = %message, "Install job failed");
                JobState::Failed { error: message }
            }
        };
        state
    }

    /// `Ok(None)` means the job was cancelled before anything was committed.
    async fn execute(
        &self,
        kind: JobKind,
        url: &Url,
        roms_sha: Option<String>,
        scratch: &Path,
        cancel: &mut watch::Receiver<bool>,
    ) -> anyhow::Result<Option<bool>> {
        tokio::fs::create_dir_all(scratch)
            .await
            .with_context(|| format!("Failed to create scratch directory {}", scratch.display()))?;

        let archive = scratch.join(archive_name(url));
        let outcome = self
            .downloader
            .download(
                url,
                &archive,
                |progress| self.set_state(kind, JobState::Downloading { progress }),
                cancel,
            )
            .await?;
        if outcome == DownloadOutcome::Cancelled || is_cancelled(cancel) {
            return Ok(None);
        }

        self.set_state(kind, JobState::Staging);
        let unpacked = scratch.join("unpacked");
        {
            let archive = archive.clone();
            let unpacked = unpacked.clone();
            tokio::task::spawn_blocking(move || extract_zip(&archive, &unpacked)).await??;
        }
        if is_cancelled(cancel) {
            return Ok(None);
        }

        self.set_state(kind, JobState::Installing);
        let restart_required = match kind {
            JobKind::Emulator => self.install_emulator(unpacked).await?,
            JobKind::Roms => self.install_roms(unpacked, roms_sha).await?,
            JobKind::Manager => self.install_manager(unpacked).await?,
        };
        Ok(Some(restart_required))
    }

    async fn install_emulator(&self, unpacked: PathBuf) -> anyhow::Result<bool> {
        let custom = self.settings.get().emulator_custom_path();
        let auto = self.snapshot.current().local.auto_path.clone();
        let home = self.home();

        let (target, versions) = tokio::task::spawn_blocking(move || -> anyhow::Result<(PathBuf, BundleVersions)> {
            let bundle = find_app_bundle(&unpacked)?
                .ok_or_else(|| anyhow::anyhow!("Archive does not contain an application bundle"))?;
            let versions = local::read_bundle_versions(&bundle).unwrap_or_else(|e| {
                warn!(error = %e, "Downloaded bundle has no readable version");
                BundleVersions::default()
            });

            let inputs = LocatorInputs {
                global_custom: custom.as_deref(),
                auto_detected: auto.as_deref(),
                ..Default::default()
            };
            let target = resolve_install_target(&inputs, &home);
            replace_item(&target, &bundle)?;
            Ok((target, versions))
        })
        .await??;

        info!(
            path = %target.display(),
            app_version = ?versions.app_version,
            build_version = ?versions.build_version,
            "Emulator installed"
        );
        self.snapshot.amend(|s| {
            if s.local.custom_path.is_none() {
                s.local.auto_path = Some(target);
            }
            s.local.versions = versions;
        });
        Ok(false)
    }

    async fn install_roms(&self, unpacked: PathBuf, sha: Option<String>) -> anyhow::Result<bool> {
        let locations = self.snapshot.current().local.rom_locations.clone();
        let default_location = local::default_rom_location(&self.paths.app_support_dir);

        let installed = tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<PathBuf>> {
            let roms = find_top_level_dir(&unpacked, |name| name.starts_with(ROMS_FOLDER_PREFIX))?
                .ok_or_else(|| anyhow::anyhow!("Archive does not contain a ROM folder"))?;

            if locations.is_empty() {
                replace_item(&default_location, &roms)?;
                return Ok(vec![default_location]);
            }

            for (i, location) in locations.iter().enumerate() {
                let staged = unpacked.join(format!(".stage-{i}"));
                copy_dir_all(&roms, &staged)?;
                replace_item(location, &staged)?;
            }
            Ok(locations)
        })
        .await??;

        if let Some(sha) = &sha {
            self.settings.update(|s| s.roms_sha = Some(sha.clone()))?;
        }
        info!(locations = ?installed, sha = ?sha, "ROMs installed");

        self.snapshot.amend(|s| {
            s.local.rom_locations = installed;
            if sha.is_some() {
                s.installed_roms_hash = sha;
            }
        });
        Ok(false)
    }

    async fn install_manager(&self, unpacked: PathBuf) -> anyhow::Result<bool> {
        let target = self.paths.manager_bundle.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let bundle = find_app_bundle(&unpacked)?
                .ok_or_else(|| anyhow::anyhow!("Archive does not contain an application bundle"))?;
            replace_item(&target, &bundle)
        })
        .await??;

        info!(path = %self.paths.manager_bundle.display(), "Manager updated, restart required");
        Ok(true)
    }
}

/// Local file name for the asset at `url`.
fn archive_name(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .map(sanitize_filename)
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "download.zip".to_string())
}

async fn cleanup_scratch(scratch: &Path) {
    let scratch = scratch.to_path_buf();
    let result = tokio::task::spawn_blocking(move || remove_item(&scratch)).await;
    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Failed to remove scratch directory"),
        Err(e) => warn!(error = %e, "Scratch cleanup task failed"),
    }
}
