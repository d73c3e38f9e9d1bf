// SPDX-License-Identifier: GPL-3.0-only
pub mod parser;

pub use parser::{IniDocument, parse_file, parse_str};
