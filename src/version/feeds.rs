// SPDX-License-Identifier: GPL-3.0-only
use chrono::{DateTime, SecondsFormat};
use serde::{Deserialize, Deserializer, Serialize};

/// Release metadata in the release-hosting API shape. CI jobs are adapted into it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReleaseInfo {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub tag_name: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub published_at: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseAsset {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub browser_download_url: Option<String>,
}

impl ReleaseInfo {
    fn download_urls(&self) -> impl Iterator<Item = &str> {
        self.assets.iter().filter_map(|a| a.browser_download_url.as_deref())
    }

    /// Stable emulator build for this platform
    pub fn stable_asset(&self) -> Option<&str> {
        self.download_urls().find(|url| url.to_lowercase().contains("macos"))
    }

    /// Recommended CI artifact for this platform, as a path relative to the artifact base
    pub fn experimental_asset(&self) -> Option<&str> {
        self.download_urls().find(|url| {
            let url = url.to_lowercase();
            url.contains("recommended") && url.contains("macos")
        })
    }

    pub fn first_asset(&self) -> Option<&str> {
        self.download_urls().next()
    }
}

/// Latest successful job reported by the CI server.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CiJob {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub number: Option<u64>,
    /// Milliseconds since the epoch
    #[serde(default)]
    pub timestamp: Option<f64>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub artifacts: Vec<CiArtifact>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub change_sets: Vec<CiChangeSet>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CiArtifact {
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub relative_path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CiChangeSet {
    #[serde(default, deserialize_with = "null_as_default")]
    pub items: Vec<CiChangeItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CiChangeItem {
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
}

impl CiJob {
    /// Adapt the job into the release shape: the build id becomes the tag,
    /// the newest change comment the body, artifacts the assets.
    pub fn into_release(self) -> ReleaseInfo {
        let published_at = DateTime::from_timestamp_millis(self.timestamp.unwrap_or(0.0) as i64)
            .map(|date| date.to_rfc3339_opts(SecondsFormat::Secs, true));

        let body = self
            .change_sets
            .into_iter()
            .next()
            .and_then(|set| set.items.into_iter().next())
            .and_then(|item| item.comment);

        let assets = self
            .artifacts
            .into_iter()
            .map(|artifact| ReleaseAsset {
                url: artifact.file_name,
                browser_download_url: artifact.relative_path,
            })
            .collect();

        ReleaseInfo {
            url: self.url,
            html_url: None,
            tag_name: self.id,
            body,
            published_at,
            assets,
        }
    }
}

/// Latest commit on the ROM repository branch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    #[serde(default)]
    pub sha: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub commit: Option<CommitDetail>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitDetail {
    #[serde(default)]
    pub author: Option<CommitAuthor>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitAuthor {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
}

impl CommitInfo {
    pub fn date(&self) -> Option<&str> {
        self.commit.as_ref()?.author.as_ref()?.date.as_deref()
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
