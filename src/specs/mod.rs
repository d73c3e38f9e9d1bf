// SPDX-License-Identifier: GPL-3.0-only
pub mod format;
pub mod parser;

pub use format::format_byte_count;
pub use parser::{ChsGeometry, MachineSpecs, SpecsParser};
