// SPDX-License-Identifier: GPL-3.0-only
pub mod json;
pub mod models;
pub mod traits;

pub use json::JsonRegistry;
pub use models::{VmRecord, VmUpdate};
pub use traits::{Registry, RegistryError};
