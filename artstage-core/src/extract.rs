// artstage-core/src/extract.rs
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::{Component, Path, PathBuf};

use artstage_common::error::{ArtError, Result};
use tracing::{debug, warn};
use zip::ZipArchive;

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    pub files: usize,
    pub directories: usize,
    pub skipped: usize,
}

/// Unpacks the zip at `archive_path` into `{destination_root}/{target_subdir}`.
///
/// Every entry name is checked before anything is written: a name (or a
/// `target_subdir`) that would leave `destination_root` fails the whole
/// archive with [`ArtError::ArchiveSafety`]. The target subdirectory is
/// replaced, not merged into.
pub fn extract(
    archive_path: &Path,
    target_subdir: &Path,
    destination_root: &Path,
) -> Result<ExtractSummary> {
    let subdir = confined_relative_path(&target_subdir.to_string_lossy()).ok_or_else(|| {
        ArtError::ArchiveSafety(format!(
            "target subdirectory {} escapes {}",
            target_subdir.display(),
            destination_root.display()
        ))
    })?;
    if subdir.as_os_str().is_empty() {
        return Err(ArtError::ArchiveSafety(
            "refusing to extract over the destination root itself".to_string(),
        ));
    }
    let target_dir = destination_root.join(&subdir);

    debug!(
        "Extracting archive '{}' to '{}'",
        archive_path.display(),
        target_dir.display()
    );

    let file = File::open(archive_path).map_err(|e| {
        ArtError::CorruptArchive(format!(
            "Failed to open archive {}: {}",
            archive_path.display(),
            e
        ))
    })?;
    let mut archive = ZipArchive::new(BufReader::new(file)).map_err(|e| {
        ArtError::CorruptArchive(format!(
            "Failed to open ZIP {}: {}",
            archive_path.display(),
            e
        ))
    })?;

    let entry_paths = plan_entries(&mut archive, archive_path)?;

    if target_dir.exists() {
        debug!("Clearing previous extraction at {}", target_dir.display());
        fs::remove_dir_all(&target_dir).map_err(|e| ArtError::io_at(&target_dir, e))?;
    }
    fs::create_dir_all(&target_dir).map_err(|e| ArtError::io_at(&target_dir, e))?;

    let mut summary = ExtractSummary::default();
    for (index, relative) in entry_paths.into_iter().enumerate() {
        let Some(relative) = relative else {
            summary.skipped += 1;
            continue;
        };

        let mut entry = archive.by_index(index).map_err(|e| {
            ArtError::CorruptArchive(format!(
                "Failed to read ZIP entry {} in {}: {}",
                index,
                archive_path.display(),
                e
            ))
        })?;
        let out_path = target_dir.join(&relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path).map_err(|e| ArtError::io_at(&out_path, e))?;
            summary.directories += 1;
            continue;
        }

        if entry
            .unix_mode()
            .is_some_and(|mode| mode & S_IFMT == S_IFLNK)
        {
            warn!(
                "Skipping symlink entry '{}' in {}",
                entry.name(),
                archive_path.display()
            );
            summary.skipped += 1;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(|e| ArtError::io_at(parent, e))?;
        }
        let mut out_file = File::create(&out_path).map_err(|e| ArtError::io_at(&out_path, e))?;
        copy_entry(&mut entry, &mut out_file, &out_path).map_err(|e| match e {
            CopyError::Read(e) => ArtError::CorruptArchive(format!(
                "Failed to read '{}' from {}: {}",
                entry.name(),
                archive_path.display(),
                e
            )),
            CopyError::Write(e) => ArtError::io_at(&out_path, e),
        })?;
        drop(out_file);

        #[cfg(unix)]
        {
            if let Some(mode) = entry.unix_mode() {
                apply_mode(&out_path, mode);
            }
        }

        debug!("Extracted ZIP entry to: {}", out_path.display());
        summary.files += 1;
    }

    debug!(
        "Finished extraction of {}: {} files, {} directories, {} skipped",
        archive_path.display(),
        summary.files,
        summary.directories,
        summary.skipped
    );
    Ok(summary)
}

enum CopyError {
    Read(io::Error),
    Write(io::Error),
}

/// Streams one entry into `out`. The size the archive declares is never used
/// to size a buffer, only the bytes actually read.
fn copy_entry(
    entry: &mut impl Read,
    out: &mut File,
    out_path: &Path,
) -> std::result::Result<u64, CopyError> {
    let mut buf = [0u8; 64 * 1024];
    let mut written = 0u64;
    loop {
        let n = match entry.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(CopyError::Read(e)),
        };
        out.write_all(&buf[..n]).map_err(CopyError::Write)?;
        written += n as u64;
    }
    out.flush().map_err(CopyError::Write)?;
    debug!("Wrote {} bytes to {}", written, out_path.display());
    Ok(written)
}

/// Maps each entry to its confined relative output path, or `None` for
/// entries that name nothing (such as `./`).
fn plan_entries<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    archive_path: &Path,
) -> Result<Vec<Option<PathBuf>>> {
    let mut planned = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let entry = archive.by_index_raw(index).map_err(|e| {
            ArtError::CorruptArchive(format!(
                "Error reading ZIP index {} in {}: {}",
                index,
                archive_path.display(),
                e
            ))
        })?;
        let name = entry.name();
        let relative = confined_relative_path(name).ok_or_else(|| {
            ArtError::ArchiveSafety(format!(
                "entry '{}' in {} escapes the extraction directory",
                name,
                archive_path.display()
            ))
        })?;
        planned.push((!relative.as_os_str().is_empty()).then_some(relative));
    }
    Ok(planned)
}

/// Turns an archive-style path (either separator) into a relative path made of
/// normal components only. Returns `None` for parent, root or prefix
/// components.
fn confined_relative_path(raw: &str) -> Option<PathBuf> {
    let normalized = raw.replace('\\', "/");
    if normalized.starts_with('/') {
        return None;
    }
    let mut out = PathBuf::new();
    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(part) => {
                // A drive letter ("C:") is a normal component on unix.
                if part.to_string_lossy().contains(':') {
                    return None;
                }
                out.push(part);
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(out)
}

#[cfg(unix)]
fn apply_mode(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;

    let permissions = mode & 0o777;
    if permissions == 0 {
        return;
    }
    // Owner must keep read/write so later runs can replace the file.
    let permissions = permissions | 0o600;
    if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(permissions)) {
        warn!("Failed to set permissions on {}: {}", path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use zip::write::SimpleFileOptions;
    use zip::{CompressionMethod, ZipWriter};

    use super::*;

    fn write_zip(path: &Path, entries: &[(&str, Option<&str>)]) {
        let file = File::create(path).unwrap();
        let mut writer = ZipWriter::new(file);
        let options = || SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        for (name, contents) in entries {
            match contents {
                Some(contents) => {
                    writer.start_file(*name, options()).unwrap();
                    writer.write_all(contents.as_bytes()).unwrap();
                }
                None => {
                    writer.add_directory(*name, options()).unwrap();
                }
            }
        }
        writer.finish().unwrap();
    }

    #[test]
    fn extracts_files_and_directories() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("win32-x64.zip");
        write_zip(
            &archive,
            &[
                ("a.dll", Some("dll bytes")),
                ("lua/", None),
                ("lua/emmy.lua", Some("return {}")),
            ],
        );

        let root = dir.path().join("staging");
        let summary = extract(&archive, Path::new("bin/win32-x64"), &root).unwrap();
        assert_eq!(summary.files, 2);
        assert_eq!(summary.directories, 1);

        let target = root.join("bin").join("win32-x64");
        assert_eq!(fs::read(target.join("a.dll")).unwrap(), b"dll bytes");
        assert_eq!(
            fs::read_to_string(target.join("lua").join("emmy.lua")).unwrap(),
            "return {}"
        );
    }

    #[test]
    fn traversal_entry_is_rejected_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("evil.zip");
        write_zip(
            &archive,
            &[("ok.txt", Some("fine")), ("../../escaped.txt", Some("gotcha"))],
        );

        let root = dir.path().join("staging");
        let err = extract(&archive, Path::new("bin/evil"), &root).unwrap_err();
        assert!(matches!(err, ArtError::ArchiveSafety(_)));
        assert!(!dir.path().join("escaped.txt").exists());
        assert!(!root.join("escaped.txt").exists());
        assert!(!root.join("bin").join("evil").join("ok.txt").exists());
    }

    #[test]
    fn backslash_traversal_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("evil.zip");
        write_zip(&archive, &[("..\\escaped.txt", Some("gotcha"))]);

        let err = extract(&archive, Path::new("bin/evil"), &dir.path().join("root")).unwrap_err();
        assert!(matches!(err, ArtError::ArchiveSafety(_)));
    }

    #[test]
    fn unsafe_target_subdir_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("a.zip");
        write_zip(&archive, &[("a.dll", Some("x"))]);

        let err = extract(&archive, Path::new("../outside"), &dir.path().join("root")).unwrap_err();
        assert!(matches!(err, ArtError::ArchiveSafety(_)));
        assert!(!dir.path().join("outside").exists());
    }

    #[test]
    fn garbage_is_a_corrupt_archive() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("broken.zip");
        fs::write(&archive, b"PK\x03\x04 but not really a zip").unwrap();
        let err = extract(&archive, Path::new("bin/x"), dir.path()).unwrap_err();
        assert!(matches!(err, ArtError::CorruptArchive(_)));

        let missing = dir.path().join("missing.zip");
        let err = extract(&missing, Path::new("bin/x"), dir.path()).unwrap_err();
        assert!(matches!(err, ArtError::CorruptArchive(_)));
    }

    #[test]
    fn stale_files_are_removed_on_reextract() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("staging");
        let stale = root.join("bin").join("p").join("old.dll");
        fs::create_dir_all(stale.parent().unwrap()).unwrap();
        fs::write(&stale, b"old").unwrap();

        let archive = dir.path().join("p.zip");
        write_zip(&archive, &[("new.dll", Some("new"))]);
        extract(&archive, Path::new("bin/p"), &root).unwrap();

        assert!(!stale.exists());
        assert!(root.join("bin").join("p").join("new.dll").is_file());
    }

    fn crc32(data: &[u8]) -> u32 {
        let mut crc = 0xFFFF_FFFFu32;
        for byte in data {
            crc ^= u32::from(*byte);
            for _ in 0..8 {
                let mask = (crc & 1).wrapping_neg();
                crc = (crc >> 1) ^ (0xEDB8_8320 & mask);
            }
        }
        !crc
    }

    /// A single stored entry whose zip64 extra field claims `declared_size`
    /// uncompressed bytes while only `data` is actually present.
    fn zip64_with_declared_size(name: &str, data: &[u8], declared_size: u64) -> Vec<u8> {
        let crc = crc32(data);
        let mut extra = Vec::new();
        extra.extend_from_slice(&1u16.to_le_bytes());
        extra.extend_from_slice(&16u16.to_le_bytes());
        extra.extend_from_slice(&declared_size.to_le_bytes());
        extra.extend_from_slice(&(data.len() as u64).to_le_bytes());

        let mut out = Vec::new();
        out.extend_from_slice(&0x0403_4b50u32.to_le_bytes());
        out.extend_from_slice(&45u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0x0021u16.to_le_bytes());
        out.extend_from_slice(&crc.to_le_bytes());
        out.extend_from_slice(&u32::MAX.to_le_bytes());
        out.extend_from_slice(&u32::MAX.to_le_bytes());
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(&(extra.len() as u16).to_le_bytes());
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(&extra);
        out.extend_from_slice(data);

        let central_start = out.len() as u32;
        out.extend_from_slice(&0x0201_4b50u32.to_le_bytes());
        out.extend_from_slice(&45u16.to_le_bytes());
        out.extend_from_slice(&45u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0x0021u16.to_le_bytes());
        out.extend_from_slice(&crc.to_le_bytes());
        out.extend_from_slice(&u32::MAX.to_le_bytes());
        out.extend_from_slice(&u32::MAX.to_le_bytes());
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(&(extra.len() as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(&extra);
        let central_size = out.len() as u32 - central_start;

        out.extend_from_slice(&0x0605_4b50u32.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&central_size.to_le_bytes());
        out.extend_from_slice(&central_start.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out
    }

    #[test]
    fn declared_entry_size_does_not_drive_allocation() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("huge.zip");
        fs::write(&archive, zip64_with_declared_size("a.dll", b"small", 1 << 60)).unwrap();

        let root = dir.path().join("staging");
        match extract(&archive, Path::new("bin/x"), &root) {
            Ok(summary) => {
                assert_eq!(summary.files, 1);
                let written = fs::read(root.join("bin").join("x").join("a.dll")).unwrap();
                assert_eq!(written, b"small");
            }
            Err(ArtError::CorruptArchive(_)) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn symlink_entries_are_not_created() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("links.zip");
        {
            let mut writer = ZipWriter::new(File::create(&archive).unwrap());
            writer
                .start_file("a.dll", SimpleFileOptions::default())
                .unwrap();
            writer.write_all(b"dll").unwrap();
            writer
                .add_symlink("passwd", "/etc/passwd", SimpleFileOptions::default())
                .unwrap();
            writer.finish().unwrap();
        }

        let root = dir.path().join("staging");
        let summary = extract(&archive, Path::new("bin/p"), &root).unwrap();
        assert_eq!(summary.files, 1);
        assert_eq!(summary.skipped, 1);
        let target = root.join("bin").join("p");
        assert!(target.join("a.dll").is_file());
        assert!(fs::symlink_metadata(target.join("passwd")).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn unix_permissions_are_applied() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("modes.zip");
        {
            let mut writer = ZipWriter::new(File::create(&archive).unwrap());
            writer
                .start_file("tool", SimpleFileOptions::default().unix_permissions(0o755))
                .unwrap();
            writer.write_all(b"#!/bin/sh\n").unwrap();
            writer
                .start_file("readonly.txt", SimpleFileOptions::default().unix_permissions(0o444))
                .unwrap();
            writer.write_all(b"ro").unwrap();
            writer.finish().unwrap();
        }

        let root = dir.path().join("staging");
        extract(&archive, Path::new("bin/p"), &root).unwrap();
        let target = root.join("bin").join("p");
        let mode = |name: &str| fs::metadata(target.join(name)).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode("tool"), 0o755);
        // Owner read/write is always kept so a later extraction can replace it.
        assert_eq!(mode("readonly.txt"), 0o644);
    }

    #[test]
    fn relative_path_rules() {
        assert_eq!(
            confined_relative_path("a/./b\\c.txt"),
            Some(PathBuf::from("a/b/c.txt"))
        );
        assert_eq!(confined_relative_path("./"), Some(PathBuf::new()));
        assert_eq!(confined_relative_path("/etc/passwd"), None);
        assert_eq!(confined_relative_path("a/../../b"), None);
        assert_eq!(confined_relative_path("C:/windows"), None);
    }
}
