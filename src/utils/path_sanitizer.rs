// SPDX-License-Identifier: GPL-3.0-only
use std::path::Path;

/// Turn a VM display name into a single path component.
///
/// Only path separators are removed; the name otherwise keeps its spelling
/// so the folder matches what the user typed.
pub fn sanitize_vm_name(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '/' && *c != '\\' && *c != ':')
        .collect::<String>()
        .trim()
        .to_string()
}

/// Sanitize a filename extracted from a URL or user input
///
/// Removes path separators and other unsafe characters, ensuring only
/// a valid filename component remains.
pub fn sanitize_filename(filename: &str) -> String {
    let filename_only = Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(filename);

    let sanitized: String = filename_only
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_' || *c == '.' || *c == ' ')
        .collect();

    sanitized.trim().to_string()
}
