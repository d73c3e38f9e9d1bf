// SPDX-License-Identifier: GPL-3.0-only
use serde::Serialize;
use std::path::Path;
use tracing::{debug, warn};

use crate::ini::{self, IniDocument};
use crate::specs::format::format_byte_count;

const BUNDLED_NAMEDEFS: &str = include_str!("../../resources/namedefs.inf");

const MACHINE_SECTION: &str = "Machine";
const HARD_DISKS_SECTION: &str = "Hard disks";
const RAM_EXPANSION_SECTION: &str = "IBM PC/XT Memory Expansion #1";

const MISSING: &str = "-";
const SECTOR_SIZE: u64 = 512;

/// Display strings for a VM's hardware.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MachineSpecs {
    pub machine: String,
    pub cpu: String,
    pub ram: String,
    pub hdd: String,
}

/// Sectors/heads/cylinders of a hard-disk image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChsGeometry {
    pub sectors: u64,
    pub heads: u64,
    pub cylinders: u64,
}

impl ChsGeometry {
    /// Parse the leading `sectors,heads,cylinders` fields of an
    /// `hdd_NN_parameters` value. Extra fields (bus type) are ignored.
    pub fn parse(parameters: &str) -> Option<Self> {
        let mut fields = parameters.split(',').map(|f| f.trim().parse::<u64>());
        let sectors = fields.next()?.ok()?;
        let heads = fields.next()?.ok()?;
        let cylinders = fields.next()?.ok()?;
        Some(Self { sectors, heads, cylinders })
    }

    pub fn size_bytes(&self) -> u64 {
        self.sectors
            .saturating_mul(self.heads)
            .saturating_mul(self.cylinders)
            .saturating_mul(SECTOR_SIZE)
    }
}

/// Turns a VM config into display strings using a code-to-name table.
pub struct SpecsParser {
    names: IniDocument,
}

impl SpecsParser {
    /// Parser using the name table compiled into the binary
    pub fn bundled() -> Self {
        Self {
            names: ini::parse_str(BUNDLED_NAMEDEFS),
        }
    }

    /// Parser using the name table at `path`, or the bundled one when
    /// `path` is unreadable or empty.
    pub fn with_names_file(path: &Path) -> Self {
        let names = ini::parse_file(path);
        if names.is_empty() {
            warn!(path = %path.display(), "Name table unavailable, using bundled table");
            return Self::bundled();
        }
        Self { names }
    }

    pub fn summarize(&self, config_path: &Path) -> MachineSpecs {
        let config = ini::parse_file(config_path);
        debug!(path = %config_path.display(), "Summarizing VM config");
        self.summarize_document(&config)
    }

    pub fn summarize_document(&self, config: &IniDocument) -> MachineSpecs {
        MachineSpecs {
            machine: self.machine(config),
            cpu: self.cpu(config),
            ram: ram(config),
            hdd: hdd(config),
        }
    }

    fn display_name<'a>(&'a self, table: &str, code: &'a str) -> &'a str {
        self.names.get(table, code).unwrap_or(code)
    }

    fn machine(&self, config: &IniDocument) -> String {
        match config.get(MACHINE_SECTION, "machine") {
            Some(code) => self.display_name("machine", code).to_string(),
            None => MISSING.to_string(),
        }
    }

    fn cpu(&self, config: &IniDocument) -> String {
        let family = config.get(MACHINE_SECTION, "cpu_family");
        let speed = config.get(MACHINE_SECTION, "cpu_speed");
        if family.is_none() && speed.is_none() {
            return MISSING.to_string();
        }

        let family = family.map_or(MISSING, |code| self.display_name("cpu_family", code));
        let mhz = speed.and_then(|s| s.parse::<f64>().ok()).unwrap_or(0.0) / 1_000_000.0;
        format!("{family} {mhz:.2} MHz")
    }
}

fn kilobytes(config: &IniDocument, section: &str, key: &str) -> Option<u64> {
    config.get(section, key)?.parse::<u64>().ok()
}

fn ram(config: &IniDocument) -> String {
    let Some(base) = kilobytes(config, MACHINE_SECTION, "mem_size") else {
        return MISSING.to_string();
    };
    let base = format_byte_count(base.saturating_mul(1024));

    match kilobytes(config, RAM_EXPANSION_SECTION, "size") {
        Some(expansion) if expansion > 0 => {
            let expansion = format_byte_count(expansion.saturating_mul(1024));
            format!("RAM {base} + {expansion} Expansion")
        }
        _ => format!("RAM {base}"),
    }
}

fn hdd(config: &IniDocument) -> String {
    if config.get(HARD_DISKS_SECTION, "hdd_01_fn").is_none() {
        return "No HDD".to_string();
    }

    match config
        .get(HARD_DISKS_SECTION, "hdd_01_parameters")
        .and_then(ChsGeometry::parse)
    {
        Some(geometry) => format!("HDD {}", format_byte_count(geometry.size_bytes())),
        None => format!("HDD {MISSING}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const XT_CONFIG: &str = "\
[Machine]
machine = ibmxt
cpu_family = 8088
cpu_speed = 4772728
mem_size = 640

[IBM PC/XT Memory Expansion #1]
size = 256

[Hard disks]
hdd_01_parameters = 17, 4, 615, 0, mfm
hdd_01_fn = disks/hdd.img
";

    #[test]
    fn test_chs_size() {
        let geometry = ChsGeometry::parse("63,16,100").unwrap();
        assert_eq!(geometry.size_bytes(), 51_609_600);
    }

    #[test]
    fn test_chs_parse_with_bus_fields() {
        let geometry = ChsGeometry::parse("17, 4, 615, 0, mfm").unwrap();
        assert_eq!(
            geometry,
            ChsGeometry {
                sectors: 17,
                heads: 4,
                cylinders: 615
            }
        );
    }

    #[test]
    fn test_chs_parse_rejects_short_or_garbage() {
        assert!(ChsGeometry::parse("63,16").is_none());
        assert!(ChsGeometry::parse("a,b,c").is_none());
        assert!(ChsGeometry::parse("").is_none());
    }

    #[test]
    fn test_summarize_full_config() {
        let parser = SpecsParser::bundled();
        let specs = parser.summarize_document(&ini::parse_str(XT_CONFIG));

        assert_eq!(specs.machine, "[8088] IBM XT (1982)");
        assert_eq!(specs.cpu, "Intel 8088 4.77 MHz");
        assert_eq!(specs.ram, "RAM 640 KB + 256 KB Expansion");
        assert_eq!(specs.hdd, "HDD 20.4 MB");
    }

    #[test]
    fn test_cpu_speed_formatting() {
        let parser = SpecsParser::bundled();
        let config = ini::parse_str("[Machine]\ncpu_family = i486dx\ncpu_speed = 500000000\n");
        assert_eq!(parser.summarize_document(&config).cpu, "Intel i486DX 500.00 MHz");
    }

    #[test]
    fn test_unknown_codes_shown_raw() {
        let parser = SpecsParser::bundled();
        let config = ini::parse_str("[Machine]\nmachine = mystery_board\ncpu_family = mystery_cpu\n");
        let specs = parser.summarize_document(&config);

        assert_eq!(specs.machine, "mystery_board");
        assert_eq!(specs.cpu, "mystery_cpu 0.00 MHz");
    }

    #[test]
    fn test_missing_fields_independent() {
        let parser = SpecsParser::bundled();
        let config = ini::parse_str("[Machine]\nmem_size = 16384\n");
        let specs = parser.summarize_document(&config);

        assert_eq!(specs.machine, "-");
        assert_eq!(specs.cpu, "-");
        assert_eq!(specs.ram, "RAM 16 MB");
        assert_eq!(specs.hdd, "No HDD");
    }

    #[test]
    fn test_malformed_hdd_parameters() {
        let parser = SpecsParser::bundled();
        let config = ini::parse_str("[Hard disks]\nhdd_01_fn = a.img\nhdd_01_parameters = junk\n");
        assert_eq!(parser.summarize_document(&config).hdd, "HDD -");
    }

    #[test]
    fn test_summarize_unreadable_file() {
        let temp_dir = TempDir::new().unwrap();
        let parser = SpecsParser::bundled();
        let specs = parser.summarize(&temp_dir.path().join("missing.cfg"));

        assert_eq!(specs.machine, "-");
        assert_eq!(specs.ram, "-");
        assert_eq!(specs.hdd, "No HDD");
    }

    #[test]
    fn test_names_file_override_and_fallback() {
        let temp_dir = TempDir::new().unwrap();
        let names = temp_dir.path().join("names.inf");
        std::fs::write(&names, "[machine]\nibmxt = Custom XT\n").unwrap();

        let config = ini::parse_str("[Machine]\nmachine = ibmxt\n");
        let custom = SpecsParser::with_names_file(&names);
        assert_eq!(custom.summarize_document(&config).machine, "Custom XT");

        let fallback = SpecsParser::with_names_file(&temp_dir.path().join("nope.inf"));
        assert_eq!(fallback.summarize_document(&config).machine, "[8088] IBM XT (1982)");
    }
}
