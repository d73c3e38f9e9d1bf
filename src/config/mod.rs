// SPDX-License-Identifier: GPL-3.0-only
pub mod config;
pub mod settings;

pub use config::{Config, FeedConfig};
pub use settings::{Settings, SettingsStore, UpdateChannel};
