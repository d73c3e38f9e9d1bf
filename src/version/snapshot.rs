// SPDX-License-Identifier: GPL-3.0-only
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

use crate::config::UpdateChannel;
use crate::version::feeds::{CommitInfo, ReleaseInfo};
use crate::version::local::LocalInstall;

/// Online version shown when a feed has not answered.
pub const UNKNOWN_VERSION: &str = "unknown";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PendingUpdates {
    pub emulator: bool,
    pub roms: bool,
    pub manager: bool,
}

/// Result of one reconciliation pass. Never mutated after publication.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VersionSnapshot {
    pub channel: UpdateChannel,
    pub online: bool,
    pub local: LocalInstall,
    pub installed_roms_hash: Option<String>,
    pub manager_version: String,
    pub emulator_release: Option<ReleaseInfo>,
    pub roms_commit: Option<CommitInfo>,
    pub manager_release: Option<ReleaseInfo>,
    pub emulator_online_version: String,
    pub roms_online_version: String,
    pub manager_online_version: String,
    pub pending: PendingUpdates,
    pub update_count: u32,
    pub checked_at: Option<DateTime<Utc>>,
}

impl VersionSnapshot {
    pub fn initial(manager_version: impl Into<String>) -> Self {
        Self {
            channel: UpdateChannel::Stable,
            online: false,
            local: LocalInstall::default(),
            installed_roms_hash: None,
            manager_version: manager_version.into(),
            emulator_release: None,
            roms_commit: None,
            manager_release: None,
            emulator_online_version: UNKNOWN_VERSION.to_string(),
            roms_online_version: UNKNOWN_VERSION.to_string(),
            manager_online_version: UNKNOWN_VERSION.to_string(),
            pending: PendingUpdates::default(),
            update_count: 0,
            checked_at: None,
        }
    }

    /// Recompute online version strings, pending flags and the update count from scratch.
    pub fn evaluate(&mut self) {
        self.emulator_online_version = self
            .emulator_release
            .as_ref()
            .and_then(|r| r.tag_name.clone())
            .unwrap_or_else(|| UNKNOWN_VERSION.to_string());
        self.roms_online_version = self
            .roms_commit
            .as_ref()
            .and_then(|c| c.sha.clone())
            .unwrap_or_else(|| UNKNOWN_VERSION.to_string());
        self.manager_online_version = self
            .manager_release
            .as_ref()
            .and_then(|r| r.tag_name.clone())
            .unwrap_or_else(|| UNKNOWN_VERSION.to_string());

        self.pending = PendingUpdates {
            emulator: emulator_pending(self.channel, self.emulator_release.as_ref(), &self.local),
            roms: roms_pending(
                self.roms_commit.as_ref(),
                self.installed_roms_hash.as_deref(),
                &self.local.rom_locations,
            ),
            manager: manager_pending(self.manager_release.as_ref(), &self.manager_version),
        };

        self.update_count = [self.pending.emulator, self.pending.roms, self.pending.manager]
            .into_iter()
            .map(u32::from)
            .sum();
    }
}

fn strip_v(version: &str) -> &str {
    version.strip_prefix('v').unwrap_or(version)
}

/// Stable compares the release tag with the app version, experimental the
/// CI build id with the bundle's build id. No release means no known update.
pub fn emulator_pending(channel: UpdateChannel, release: Option<&ReleaseInfo>, local: &LocalInstall) -> bool {
    let Some(tag) = release.and_then(|r| r.tag_name.as_deref()) else {
        return false;
    };

    match channel {
        UpdateChannel::Stable => local.versions.app_version.as_deref() != Some(strip_v(tag)),
        UpdateChannel::Experimental => local.versions.build_version.as_deref() != Some(tag),
    }
}

/// With no known ROM location the ROMs always count as out of date.
pub fn roms_pending(commit: Option<&CommitInfo>, installed_hash: Option<&str>, locations: &[std::path::PathBuf]) -> bool {
    let Some(sha) = commit.and_then(|c| c.sha.as_deref()) else {
        return false;
    };
    locations.is_empty() || installed_hash != Some(sha)
}

pub fn manager_pending(release: Option<&ReleaseInfo>, manager_version: &str) -> bool {
    match release.and_then(|r| r.tag_name.as_deref()) {
        Some(tag) => strip_v(tag) != strip_v(manager_version),
        None => false,
    }
}

/// Process-wide holder of the current snapshot. Readers always get a complete value.
#[derive(Clone)]
pub struct SnapshotHandle {
    tx: Arc<watch::Sender<Arc<VersionSnapshot>>>,
}

impl SnapshotHandle {
    pub fn new(initial: VersionSnapshot) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(initial));
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> Arc<VersionSnapshot> {
        Arc::clone(&self.tx.borrow())
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<VersionSnapshot>> {
        self.tx.subscribe()
    }

    /// Replace the snapshot wholesale
    pub fn publish(&self, snapshot: VersionSnapshot) {
        self.tx.send_replace(Arc::new(snapshot));
    }

    /// Derive a new snapshot from the current one, re-evaluate it and publish it.
    pub fn amend<F>(&self, change: F)
    where
        F: FnOnce(&mut VersionSnapshot),
    {
        self.tx.send_modify(|current| {
            let mut next = VersionSnapshot::clone(current);
            change(&mut next);
            next.evaluate();
            *current = Arc::new(next);
        });
    }
}
