// SPDX-License-Identifier: GPL-3.0-only
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::{FeedConfig, SettingsStore, UpdateChannel};
use crate::version::client::FeedClient;
use crate::version::feeds::ReleaseInfo;
use crate::version::local::{self, BundleProbe, LocalInstall};
use crate::version::snapshot::{SnapshotHandle, VersionSnapshot};

/// Runs reconciliation passes and publishes their snapshots.
pub struct VersionResolver {
    feeds: Arc<dyn FeedClient>,
    urls: FeedConfig,
    probe: BundleProbe,
    app_support_dir: PathBuf,
    settings: Arc<SettingsStore>,
    snapshot: SnapshotHandle,
    manager_version: String,
    pass: Mutex<()>,
}

impl VersionResolver {
    pub fn new(
        feeds: Arc<dyn FeedClient>,
        urls: FeedConfig,
        probe: BundleProbe,
        app_support_dir: PathBuf,
        settings: Arc<SettingsStore>,
        snapshot: SnapshotHandle,
        manager_version: impl Into<String>,
    ) -> Self {
        Self {
            feeds,
            urls,
            probe,
            app_support_dir,
            settings,
            snapshot,
            manager_version: manager_version.into(),
            pass: Mutex::new(()),
        }
    }

    /// One full pass: local detection, then each feed in turn. A failing
    /// feed only loses its own comparison. Passes never overlap.
    pub async fn reconcile(&self) -> Arc<VersionSnapshot> {
        let _pass = self.pass.lock().await;
        let settings = self.settings.get();

        let mut next = VersionSnapshot::initial(self.manager_version.clone());
        next.channel = settings.channel();
        next.installed_roms_hash = settings.roms_sha.clone();
        next.local = self.detect_local(settings.emulator_custom_path()).await;

        next.online = self.feeds.is_online().await;
        if next.online {
            next.emulator_release = self.fetch_emulator_release(next.channel).await;
            next.roms_commit = keep_ok("roms", self.feeds.latest_commit(&self.urls.roms_commit_url).await);
            next.manager_release = keep_ok(
                "manager",
                self.feeds.latest_release(&self.urls.manager_release_url).await,
            );
        } else {
            warn!("No network connectivity, skipping update feeds");
        }

        next.checked_at = Some(Utc::now());
        next.evaluate();
        info!(
            channel = ?next.channel,
            online = next.online,
            installed = next.local.is_installed(),
            update_count = next.update_count,
            "Version reconciliation finished"
        );

        self.snapshot.publish(next);
        self.snapshot.current()
    }

    async fn detect_local(&self, custom_path: Option<PathBuf>) -> LocalInstall {
        let probe = self.probe.clone();
        let app_support_dir = self.app_support_dir.clone();
        match tokio::task::spawn_blocking(move || local::detect(&probe, custom_path, &app_support_dir)).await {
            Ok(install) => {
                debug!(
                    auto = ?install.auto_path,
                    custom = ?install.custom_path,
                    roms = install.rom_locations.len(),
                    "Local install detected"
                );
                install
            }
            Err(e) => {
                error!(error = %e, "Local install detection task failed");
                LocalInstall::default()
            }
        }
    }

    async fn fetch_emulator_release(&self, channel: UpdateChannel) -> Option<ReleaseInfo> {
        match channel {
            UpdateChannel::Stable => keep_ok(
                "emulator",
                self.feeds.latest_release(&self.urls.emulator_release_url).await,
            ),
            UpdateChannel::Experimental => keep_ok(
                "emulator-ci",
                self.feeds.latest_ci_job(&self.urls.emulator_ci_url).await,
            )
            .map(|job| job.into_release()),
        }
    }
}

fn keep_ok<T>(feed: &str, result: anyhow::Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(feed, error = %e, "Feed query failed, treating as no update");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::client::HttpFeedClient;
    use crate::version::feeds::{CiJob, CommitInfo};
    use crate::version::local::tests::write_bundle;
    use async_trait::async_trait;
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Default)]
    struct StaticFeeds {
        online: bool,
        release_tag: Option<&'static str>,
        ci_id: Option<&'static str>,
        roms_sha: Option<&'static str>,
        manager_tag: Option<&'static str>,
    }

    #[async_trait]
    impl FeedClient for StaticFeeds {
        async fn is_online(&self) -> bool {
            self.online
        }

        async fn latest_release(&self, url: &str) -> anyhow::Result<ReleaseInfo> {
            let tag = if url.contains("manager") {
                self.manager_tag
            } else {
                self.release_tag
            };
            let tag = tag.ok_or_else(|| anyhow::anyhow!("feed down"))?;
            Ok(ReleaseInfo {
                tag_name: Some(tag.to_string()),
                ..Default::default()
            })
        }

        async fn latest_ci_job(&self, _url: &str) -> anyhow::Result<CiJob> {
            let id = self.ci_id.ok_or_else(|| anyhow::anyhow!("feed down"))?;
            Ok(CiJob {
                id: Some(id.to_string()),
                ..Default::default()
            })
        }

        async fn latest_commit(&self, _url: &str) -> anyhow::Result<CommitInfo> {
            let sha = self.roms_sha.ok_or_else(|| anyhow::anyhow!("feed down"))?;
            Ok(CommitInfo {
                sha: Some(sha.to_string()),
                ..Default::default()
            })
        }
    }

    struct Fixture {
        _temp_dir: TempDir,
        settings: Arc<SettingsStore>,
        apps: PathBuf,
        app_support: PathBuf,
    }

    fn fixture() -> Fixture {
        let temp_dir = TempDir::new().unwrap();
        let apps = temp_dir.path().join("Applications");
        write_bundle(&apps.join("86Box.app"), "net.86Box.86Box", "4.1", "4.1.5634");
        let app_support = temp_dir.path().join("Support");
        std::fs::create_dir_all(local::default_rom_location(&app_support)).unwrap();

        let settings = Arc::new(SettingsStore::load(&temp_dir.path().join("settings.toml")));
        settings.update(|s| s.roms_sha = Some("abc".to_string())).unwrap();

        Fixture {
            _temp_dir: temp_dir,
            settings,
            apps,
            app_support,
        }
    }

    fn feed_urls() -> FeedConfig {
        FeedConfig {
            manager_release_url: "http://feeds.test/manager".to_string(),
            ..FeedConfig::default()
        }
    }

    fn resolver(fixture: &Fixture, feeds: Arc<dyn FeedClient>, urls: FeedConfig) -> (VersionResolver, SnapshotHandle) {
        let snapshot = SnapshotHandle::new(VersionSnapshot::initial("1.2.0"));
        let resolver = VersionResolver::new(
            feeds,
            urls,
            BundleProbe::new(vec![fixture.apps.clone()], "net.86Box.86Box"),
            fixture.app_support.clone(),
            Arc::clone(&fixture.settings),
            snapshot.clone(),
            "1.2.0",
        );
        (resolver, snapshot)
    }

    #[tokio::test]
    async fn test_everything_current() {
        let fixture = fixture();
        let feeds = StaticFeeds {
            online: true,
            release_tag: Some("v4.1"),
            roms_sha: Some("abc"),
            manager_tag: Some("v1.2.0"),
            ..Default::default()
        };
        let (resolver, handle) = resolver(&fixture, Arc::new(feeds), feed_urls());

        let snapshot = resolver.reconcile().await;
        assert_eq!(snapshot.update_count, 0);
        assert_eq!(handle.current().update_count, 0);
        assert!(snapshot.checked_at.is_some());
    }

    #[tokio::test]
    async fn test_offline_skips_feeds() {
        let fixture = fixture();
        let feeds = StaticFeeds {
            online: false,
            release_tag: Some("v9"),
            roms_sha: Some("zzz"),
            manager_tag: Some("v9"),
            ..Default::default()
        };
        let (resolver, _) = resolver(&fixture, Arc::new(feeds), feed_urls());

        let snapshot = resolver.reconcile().await;
        assert!(!snapshot.online);
        assert_eq!(snapshot.update_count, 0);
        assert_eq!(snapshot.emulator_online_version, "unknown");
        assert_eq!(snapshot.local.versions.app_version.as_deref(), Some("4.1"));
    }

    #[tokio::test]
    async fn test_failed_feed_does_not_block_others() {
        let fixture = fixture();
        let feeds = StaticFeeds {
            online: true,
            release_tag: None,
            roms_sha: Some("new"),
            manager_tag: Some("v1.3.0"),
            ..Default::default()
        };
        let (resolver, _) = resolver(&fixture, Arc::new(feeds), feed_urls());

        let snapshot = resolver.reconcile().await;
        assert!(!snapshot.pending.emulator);
        assert!(snapshot.pending.roms);
        assert!(snapshot.pending.manager);
        assert_eq!(snapshot.update_count, 2);
    }

    #[tokio::test]
    async fn test_experimental_channel_uses_ci_feed() {
        let fixture = fixture();
        fixture
            .settings
            .update(|s| s.update_channel = "experimental".to_string())
            .unwrap();
        let feeds = StaticFeeds {
            online: true,
            release_tag: Some("v4.1"),
            ci_id: Some("5700"),
            roms_sha: Some("abc"),
            manager_tag: Some("v1.2.0"),
        };
        let (resolver, _) = resolver(&fixture, Arc::new(feeds), feed_urls());

        let snapshot = resolver.reconcile().await;
        assert_eq!(snapshot.channel, UpdateChannel::Experimental);
        assert_eq!(snapshot.emulator_online_version, "5700");
        assert_eq!(snapshot.update_count, 1);
    }

    #[tokio::test]
    async fn test_http_feed_server_error() {
        let fixture = fixture();
        let mut server = mockito::Server::new_async().await;
        server.mock("HEAD", "/").with_status(200).create_async().await;
        server
            .mock("GET", "/release")
            .with_status(500)
            .create_async()
            .await;
        server
            .mock("GET", "/commit")
            .with_status(200)
            .with_body(r#"{"sha": "abc"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/manager")
            .with_status(200)
            .with_body(r#"{"tag_name": "v2.0.0", "assets": []}"#)
            .create_async()
            .await;

        let urls = FeedConfig {
            emulator_release_url: format!("{}/release", server.url()),
            roms_commit_url: format!("{}/commit", server.url()),
            manager_release_url: format!("{}/manager", server.url()),
            connectivity_url: server.url(),
            ..FeedConfig::default()
        };
        let client = HttpFeedClient::new(server.url(), Duration::from_secs(5)).unwrap();
        let (resolver, _) = resolver(&fixture, Arc::new(client), urls);

        let snapshot = resolver.reconcile().await;
        assert!(snapshot.online);
        assert!(snapshot.emulator_release.is_none());
        assert!(!snapshot.pending.roms);
        assert!(snapshot.pending.manager);
        assert_eq!(snapshot.update_count, 1);
    }
}
