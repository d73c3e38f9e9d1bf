// SPDX-License-Identifier: GPL-3.0-only
use async_trait::async_trait;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;

use crate::config::{Config, FeedConfig};
use crate::version::FeedClient;
use crate::version::feeds::{CiJob, CommitInfo, ReleaseInfo};

/// Configuration with every path under `root`
pub fn test_config(root: &Path) -> Config {
    Config {
        home_dir: root.join("home"),
        settings_path: root.join("settings.toml"),
        local_api_bind: SocketAddr::from_str("127.0.0.1:0").unwrap(),
        log_level: "error".to_string(),
        log_json: false,
        emulator_bundle_id: "net.86Box.86Box".to_string(),
        app_search_dirs: vec![root.join("Applications")],
        app_support_dir: root.join("Support"),
        templates_dir: root.join("templates"),
        namedefs_path: None,
        launch_command: "/bin/echo".into(),
        feed_timeout_secs: 1,
        manager_bundle_path: Some(root.join("Apps").join("BoxKeeper.app")),
        feeds: FeedConfig::default(),
    }
}

/// Feed client for a machine without network access
pub struct OfflineFeeds;

#[async_trait]
impl FeedClient for OfflineFeeds {
    async fn is_online(&self) -> bool {
        false
    }

    async fn latest_release(&self, url: &str) -> anyhow::Result<ReleaseInfo> {
        anyhow::bail!("offline: {url}")
    }

    async fn latest_ci_job(&self, url: &str) -> anyhow::Result<CiJob> {
        anyhow::bail!("offline: {url}")
    }

    async fn latest_commit(&self, url: &str) -> anyhow::Result<CommitInfo> {
        anyhow::bail!("offline: {url}")
    }
}
