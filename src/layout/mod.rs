// SPDX-License-Identifier: GPL-3.0-only
pub mod resolver;

pub use resolver::{CONFIG_FILE_NAME, VmLayout, default_path, derive_config_path, materialize};
