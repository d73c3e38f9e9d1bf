// SPDX-License-Identifier: GPL-3.0-only
pub mod launcher;
pub mod locator;

pub use launcher::{LaunchError, LaunchMode, Launcher, RunningInstance, build_args};
pub use locator::{CandidateSource, Locator, LocatorInputs, Resolution, resolve_binary, resolve_install_target};
