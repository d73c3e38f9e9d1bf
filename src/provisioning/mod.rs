// SPDX-License-Identifier: GPL-3.0-only
pub mod import;
pub mod removal;
pub mod templates;

pub use import::{ImportCandidate, ImportError, ImportScanner, candidate_for_dir, scan_for_vms};
pub use removal::{disk_images, trash_vm_files};
pub use templates::{VmTemplate, apply_template, scan_templates};
