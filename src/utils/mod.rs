// SPDX-License-Identifier: GPL-3.0-only
pub mod fs;
pub mod path_sanitizer;
pub mod url_validator;

pub use fs::{copy_dir_all, move_item, remove_item, write_atomic};
pub use path_sanitizer::{sanitize_filename, sanitize_vm_name};
pub use url_validator::{join_artifact_url, validate_download_url};
