// SPDX-License-Identifier: GPL-3.0-only
pub mod downloader;
pub mod extractor;
pub mod job;
pub mod replace;
pub mod service;

pub use job::{InstallError, InstallEvent, JobHandle, JobKind, JobState};
pub use service::{InstallPaths, InstallerService};
