// SPDX-License-Identifier: GPL-3.0-only
use anyhow::Context;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Component, Path, PathBuf};
use tracing::info;
use zip::ZipArchive;

/// Upper bound on the unpacked size of one archive.
const MAX_EXTRACTED_BYTES: u64 = 4 * 1024 * 1024 * 1024;

/// Upper bound on the number of entries in one archive.
const MAX_ENTRIES: usize = 200_000;

#[cfg(unix)]
const S_IFMT: u32 = 0o170000;
#[cfg(unix)]
const S_IFLNK: u32 = 0o120000;

/// Whether a link at `link` (relative to the archive root) pointing at
/// `target` resolves inside the archive root.
fn link_target_is_enclosed(link: &Path, target: &Path) -> bool {
    let mut depth = link.parent().map_or(0, |parent| parent.components().count());
    for component in target.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return false;
                }
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => return false,
        }
    }
    true
}

/// First path below `dest` along `relative` that is already a symlink.
fn existing_symlink(dest: &Path, relative: &Path) -> Option<PathBuf> {
    let mut current = dest.to_path_buf();
    for component in relative.components() {
        current.push(component);
        if std::fs::symlink_metadata(&current).is_ok_and(|m| m.file_type().is_symlink()) {
            return Some(current);
        }
    }
    None
}

/// Unpack a zip archive into `dest`, keeping unix permissions and symlinks.
/// Links must point inside `dest`, and no entry is ever written through one.
/// Blocking; run it on the blocking pool.
pub fn extract_zip(archive_path: &Path, dest: &Path) -> anyhow::Result<()> {
    info!(archive = %archive_path.display(), dest = %dest.display(), "Extracting ZIP archive");

    std::fs::create_dir_all(dest)?;
    let file = File::open(archive_path)
        .with_context(|| format!("Failed to open {}", archive_path.display()))?;
    let mut archive = ZipArchive::new(BufReader::new(file)).context("Not a valid ZIP archive")?;

    if archive.len() > MAX_ENTRIES {
        anyhow::bail!("Archive has too many entries ({})", archive.len());
    }

    let mut total: u64 = 0;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            continue;
        };
        if let Some(link) = existing_symlink(dest, &relative) {
            anyhow::bail!("Archive entry {} would be written through link {}", relative.display(), link.display());
        }
        let outpath = dest.join(&relative);

        total = total.saturating_add(entry.size());
        if total > MAX_EXTRACTED_BYTES {
            anyhow::bail!("Archive exceeds the maximum unpacked size");
        }

        if entry.is_dir() {
            std::fs::create_dir_all(&outpath)?;
            continue;
        }
        if let Some(parent) = outpath.parent() {
            std::fs::create_dir_all(parent)?;
        }

        #[cfg(unix)]
        if entry.unix_mode().is_some_and(|mode| mode & S_IFMT == S_IFLNK) {
            let mut target = String::new();
            entry.read_to_string(&mut target)?;
            if !link_target_is_enclosed(&relative, Path::new(&target)) {
                anyhow::bail!("Archive link {} points outside the archive: {target}", relative.display());
            }
            std::os::unix::fs::symlink(&target, &outpath)
                .with_context(|| format!("Failed to create symlink {}", outpath.display()))?;
            continue;
        }

        let mut outfile = File::create(&outpath)
            .with_context(|| format!("Failed to create {}", outpath.display()))?;
        std::io::copy(&mut entry, &mut outfile)
            .with_context(|| format!("Failed to extract {}", outpath.display()))?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&outpath, std::fs::Permissions::from_mode(mode & 0o7777))?;
        }
    }

    info!(archive = %archive_path.display(), entries = archive.len(), "ZIP extraction completed");
    Ok(())
}

/// First top-level directory in `dir` whose name satisfies `matches`.
pub fn find_top_level_dir<F>(dir: &Path, matches: F) -> anyhow::Result<Option<PathBuf>>
where
    F: Fn(&str) -> bool,
{
    let mut found: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
        .filter(|e| matches(&e.file_name().to_string_lossy()))
        .map(|e| e.path())
        .collect();
    found.sort();
    Ok(found.into_iter().next())
}

/// Application bundle unpacked into `dir`.
pub fn find_app_bundle(dir: &Path) -> anyhow::Result<Option<PathBuf>> {
    find_top_level_dir(dir, |name| name.ends_with(".app"))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::FileOptions;

    /// Build a zip archive from `(name, contents)` pairs; names ending in `/` are directories.
    pub(crate) fn write_zip(path: &Path, entries: &[(&str, &str)]) {
        let file = File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        for (name, contents) in entries {
            if name.ends_with('/') {
                writer.add_directory(*name, FileOptions::default()).unwrap();
            } else {
                writer
                    .start_file(*name, FileOptions::default().unix_permissions(0o755))
                    .unwrap();
                writer.write_all(contents.as_bytes()).unwrap();
            }
        }
        writer.finish().unwrap();
    }

    #[test]
    fn test_extract_zip() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("a.zip");
        write_zip(
            &archive,
            &[
                ("86Box.app/", ""),
                ("86Box.app/Contents/MacOS/86Box", "binary"),
                ("86Box.app/Contents/Info.plist", "plist"),
            ],
        );

        let dest = temp_dir.path().join("out");
        extract_zip(&archive, &dest).unwrap();

        assert_eq!(
            std::fs::read_to_string(dest.join("86Box.app/Contents/MacOS/86Box")).unwrap(),
            "binary"
        );
        assert_eq!(find_app_bundle(&dest).unwrap(), Some(dest.join("86Box.app")));
    }

    #[cfg(unix)]
    #[test]
    fn test_extract_keeps_exec_bit() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("a.zip");
        write_zip(&archive, &[("tool", "#!/bin/sh\n")]);

        let dest = temp_dir.path().join("out");
        extract_zip(&archive, &dest).unwrap();
        let mode = std::fs::metadata(dest.join("tool")).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }

    #[cfg(unix)]
    fn write_zip_with_links(path: &Path, links: &[(&str, &str)], files: &[&str]) {
        let file = File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        for (name, target) in links {
            writer.add_symlink(*name, *target, FileOptions::default()).unwrap();
        }
        for name in files {
            writer.start_file(*name, FileOptions::default()).unwrap();
            writer.write_all(b"payload").unwrap();
        }
        writer.finish().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_link_leaving_dest_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("evil.zip");
        write_zip_with_links(&archive, &[("evil", "../outside")], &["evil/pwned"]);
        std::fs::create_dir_all(temp_dir.path().join("outside")).unwrap();

        let dest = temp_dir.path().join("out");
        assert!(extract_zip(&archive, &dest).is_err());
        assert!(!temp_dir.path().join("outside/pwned").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_absolute_link_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("evil.zip");
        write_zip_with_links(&archive, &[("etc", "/etc")], &[]);

        assert!(extract_zip(&archive, &temp_dir.path().join("out")).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_entries_never_written_through_links() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("a.zip");
        write_zip_with_links(&archive, &[("alias", "real")], &["real/keep", "alias/sneaky"]);

        let dest = temp_dir.path().join("out");
        assert!(extract_zip(&archive, &dest).is_err());
        assert!(!dest.join("real/sneaky").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_framework_links_inside_bundle() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("a.zip");
        write_zip_with_links(
            &archive,
            &[("86Box.app/Contents/Frameworks/Qt.framework/Versions/Current", "A")],
            &["86Box.app/Contents/Frameworks/Qt.framework/Versions/A/Qt"],
        );

        let dest = temp_dir.path().join("out");
        extract_zip(&archive, &dest).unwrap();
        let versions = dest.join("86Box.app/Contents/Frameworks/Qt.framework/Versions");
        assert_eq!(std::fs::read_link(versions.join("Current")).unwrap(), PathBuf::from("A"));
        assert_eq!(std::fs::read_to_string(versions.join("Current/Qt")).unwrap(), "payload");
    }

    #[test]
    fn test_link_target_is_enclosed() {
        assert!(link_target_is_enclosed(Path::new("a/b/link"), Path::new("../c")));
        assert!(link_target_is_enclosed(Path::new("a/link"), Path::new("./x/../y")));
        assert!(!link_target_is_enclosed(Path::new("a/link"), Path::new("../../c")));
        assert!(!link_target_is_enclosed(Path::new("link"), Path::new("/abs")));
    }

    #[test]
    fn test_extract_corrupt_archive_fails() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("bad.zip");
        std::fs::write(&archive, b"this is not a zip file").unwrap();

        assert!(extract_zip(&archive, &temp_dir.path().join("out")).is_err());
    }

    #[test]
    fn test_find_top_level_dir_prefix() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(temp_dir.path().join("86Box-roms-abc123")).unwrap();
        std::fs::write(temp_dir.path().join("86Box-roms.txt"), "").unwrap();

        let found = find_top_level_dir(temp_dir.path(), |n| n.starts_with("86Box-roms")).unwrap();
        assert_eq!(found, Some(temp_dir.path().join("86Box-roms-abc123")));
        assert_eq!(find_app_bundle(temp_dir.path()).unwrap(), None);
    }
}
