// SPDX-License-Identifier: GPL-3.0-only
pub mod client;
pub mod feeds;
pub mod local;
pub mod resolver;
pub mod snapshot;

pub use client::{FeedClient, HttpFeedClient};
pub use feeds::{CiJob, CommitInfo, ReleaseInfo};
pub use local::{BundleProbe, LocalInstall};
pub use resolver::VersionResolver;
pub use snapshot::{SnapshotHandle, VersionSnapshot};
