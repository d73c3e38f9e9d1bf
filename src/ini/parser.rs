// SPDX-License-Identifier: GPL-3.0-only
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Section used for key/value lines that appear before any `[header]`.
pub const MAIN_SECTION: &str = "main";

pub type Section = BTreeMap<String, String>;

/// Parsed key=value document: section name -> (key -> value).
///
/// Ordered maps keep serialization stable across writes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IniDocument {
    sections: BTreeMap<String, Section>,
}

impl IniDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)
            .and_then(|s| s.get(key))
            .map(String::as_str)
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.get(name)
    }

    /// Last write wins within a section.
    pub fn insert(&mut self, section: &str, key: &str, value: &str) {
        self.sections
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Serialize back into the line format. Every section gets an explicit
    /// header, including `main`, which parses back to the same mapping.
    pub fn to_ini_string(&self) -> String {
        let mut out = String::new();
        for (name, entries) in &self.sections {
            out.push('[');
            out.push_str(name);
            out.push_str("]\n");
            for (key, value) in entries {
                out.push_str(key);
                out.push_str(" = ");
                out.push_str(value);
                out.push('\n');
            }
            out.push('\n');
        }
        out
    }
}

fn trim(s: &str) -> &str {
    s.trim_matches(|c| matches!(c, ' ' | '\n' | '\r' | '\t'))
}

/// Everything from the first `#` onward is dropped, including inside values.
fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(pos) => &line[..pos],
        None => line,
    }
}

fn parse_section_header(line: &str) -> Option<&str> {
    if line.len() >= 2 && line.starts_with('[') && line.ends_with(']') {
        Some(&line[1..line.len() - 1])
    } else {
        None
    }
}

fn parse_pair(line: &str) -> Option<(&str, &str)> {
    let (key, value) = strip_comment(line).split_once('=')?;
    let key = trim(key);
    let value = trim(value);
    if key.is_empty() || value.is_empty() {
        return None;
    }
    Some((key, value))
}

/// Parse document text. Unrecognized lines are ignored.
pub fn parse_str(text: &str) -> IniDocument {
    let mut doc = IniDocument::new();
    let mut current = MAIN_SECTION.to_string();

    for raw in text.split('\n') {
        let line = trim(raw);
        if let Some(name) = parse_section_header(line) {
            current = name.to_string();
        } else if let Some((key, value)) = parse_pair(line) {
            doc.insert(&current, key, value);
        }
    }

    doc
}

/// Parse a file; an unreadable file yields an empty document.
pub fn parse_file(path: &Path) -> IniDocument {
    match std::fs::read_to_string(path) {
        Ok(text) => parse_str(&text),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Config file not readable, using empty document");
            IniDocument::new()
        }
    }
}
