// SPDX-License-Identifier: GPL-3.0-only
use anyhow::Context;
use futures_util::StreamExt;
use reqwest::Client;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tracing::{debug, info};
use url::Url;

/// Assumed size when the server sends no content length (50 MiB).
pub const FALLBACK_TOTAL_BYTES: u64 = 52_428_800;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    Completed { bytes: u64 },
    Cancelled,
}

/// Fraction of the download done, capped at 1.0.
pub fn progress_fraction(written: u64, content_length: Option<u64>) -> f64 {
    let total = content_length.filter(|&len| len > 0).unwrap_or(FALLBACK_TOTAL_BYTES);
    (written as f64 / total as f64).min(1.0)
}

/// Longest silence tolerated between two reads of a response.
const READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Resolves once `cancel` is set or its sender is gone.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    while !*cancel.borrow_and_update() {
        if cancel.changed().await.is_err() {
            return;
        }
    }
}

/// Streams assets to disk. Failed downloads are not retried.
pub struct AssetDownloader {
    client: Client,
}

impl AssetDownloader {
    pub fn new() -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .read_timeout(READ_TIMEOUT)
            .user_agent(concat!("BoxKeeperDaemon/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }

    /// Download `url` into `output_path`, reporting progress on every whole
    /// percent. Returns `Cancelled` as soon as `cancel` flips to true, also
    /// while still waiting for the response, and removes the partial file.
    pub async fn download<F>(
        &self,
        url: &Url,
        output_path: &Path,
        mut on_progress: F,
        cancel: &mut watch::Receiver<bool>,
    ) -> anyhow::Result<DownloadOutcome>
    where
        F: FnMut(f64) + Send,
    {
        if *cancel.borrow() {
            return Ok(DownloadOutcome::Cancelled);
        }

        info!(url = %url, path = %output_path.display(), "Starting download");
        let request = self.client.get(url.clone()).send();
        let response = tokio::select! {
            biased;
            _ = cancelled(cancel) => {
                info!(url = %url, "Download cancelled before the server responded");
                return Ok(DownloadOutcome::Cancelled);
            }
            response = request => response.with_context(|| format!("Request to {url} failed"))?,
        };
        response.error_for_status_ref()?;

        let content_length = response.content_length();
        let mut stream = response.bytes_stream();
        let mut file = tokio::fs::File::create(output_path)
            .await
            .with_context(|| format!("Failed to create {}", output_path.display()))?;

        let mut written: u64 = 0;
        let mut last_percent = 0u32;
        on_progress(0.0);

        loop {
            tokio::select! {
                biased;
                _ = cancelled(cancel) => {
                    drop(file);
                    let _ = tokio::fs::remove_file(output_path).await;
                    info!(url = %url, "Download cancelled");
                    return Ok(DownloadOutcome::Cancelled);
                }
                chunk = stream.next() => {
                    let Some(chunk) = chunk else { break };
                    let chunk = chunk.with_context(|| format!("Download of {url} interrupted"))?;
                    file.write_all(&chunk).await?;
                    written += chunk.len() as u64;

                    let fraction = progress_fraction(written, content_length);
                    let percent = (fraction * 100.0) as u32;
                    if percent > last_percent {
                        last_percent = percent;
                        on_progress(fraction);
                    }
                }
            }
        }

        file.flush().await?;
        file.sync_all().await?;
        debug!(url = %url, bytes = written, "Download completed");
        Ok(DownloadOutcome::Completed { bytes: written })
    }
}
