// SPDX-License-Identifier: GPL-3.0-only
use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

use crate::version::feeds::{CiJob, CommitInfo, ReleaseInfo};

/// Remote metadata sources queried during reconciliation.
#[async_trait]
pub trait FeedClient: Send + Sync {
    /// Whether the network is reachable at all
    async fn is_online(&self) -> bool;

    async fn latest_release(&self, url: &str) -> anyhow::Result<ReleaseInfo>;

    async fn latest_ci_job(&self, url: &str) -> anyhow::Result<CiJob>;

    async fn latest_commit(&self, url: &str) -> anyhow::Result<CommitInfo>;
}

pub struct HttpFeedClient {
    client: Client,
    connectivity_url: String,
}

impl HttpFeedClient {
    pub fn new(connectivity_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("BoxKeeperDaemon/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            connectivity_url: connectivity_url.into(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> anyhow::Result<T> {
        debug!(url = %url, "Querying feed");
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .with_context(|| format!("Request to {url} failed"))?;
        response.error_for_status_ref()?;

        response
            .json::<T>()
            .await
            .with_context(|| format!("Malformed response from {url}"))
    }
}

#[async_trait]
impl FeedClient for HttpFeedClient {
    async fn is_online(&self) -> bool {
        match self.client.head(&self.connectivity_url).send().await {
            Ok(_) => true,
            Err(e) => {
                debug!(url = %self.connectivity_url, error = %e, "Connectivity probe failed");
                false
            }
        }
    }

    async fn latest_release(&self, url: &str) -> anyhow::Result<ReleaseInfo> {
        self.get_json(url).await
    }

    async fn latest_ci_job(&self, url: &str) -> anyhow::Result<CiJob> {
        self.get_json(url).await
    }

    async fn latest_commit(&self, url: &str) -> anyhow::Result<CommitInfo> {
        self.get_json(url).await
    }
}
