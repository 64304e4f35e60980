// artstage-core/src/stage.rs
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use artstage_common::error::{ArtError, Result};
use artstage_net::sha256_file;
use tracing::{debug, error, info, instrument};
use walkdir::WalkDir;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DestinationReport {
    pub path: PathBuf,
    pub copied: usize,
    pub unchanged: usize,
    pub directories: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageReport {
    pub destinations: Vec<DestinationReport>,
}

impl StageReport {
    pub fn files_copied(&self) -> usize {
        self.destinations.iter().map(|d| d.copied).sum()
    }
}

/// Copies the tree under `source_root` into every destination.
///
/// All destinations are attempted even when one fails; the first failure in
/// destination order is then returned, naming the path it happened on.
#[instrument(skip_all, fields(source = %source_root.display()))]
pub fn stage(source_root: &Path, destinations: &[PathBuf]) -> Result<StageReport> {
    let mut report = StageReport::default();
    let mut first_error = None;
    for (destination, outcome) in stage_each(source_root, destinations)? {
        match outcome {
            Ok(done) => report.destinations.push(done),
            Err(e) => {
                error!("Staging into {} failed: {}", destination.display(), e);
                first_error.get_or_insert(e);
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(report),
    }
}

/// Per-destination outcomes of staging the whole of `source_root`, in
/// destination order. Fails up front only when the source tree itself is
/// unusable.
pub fn stage_each(
    source_root: &Path,
    destinations: &[PathBuf],
) -> Result<Vec<(PathBuf, Result<DestinationReport>)>> {
    stage_subtrees(source_root, &[PathBuf::new()], destinations)
}

/// Like [`stage_each`], but copies only the listed subtrees of `source_root`
/// (each to the same relative place in every destination). Anything else
/// under `source_root` is left behind.
pub fn stage_subtrees(
    source_root: &Path,
    subtrees: &[PathBuf],
    destinations: &[PathBuf],
) -> Result<Vec<(PathBuf, Result<DestinationReport>)>> {
    let sources: Vec<(PathBuf, &Path)> = subtrees
        .iter()
        .map(|sub| (join_relative(source_root, sub), sub.as_path()))
        .collect();
    for (source, _) in &sources {
        if !source.is_dir() {
            return Err(ArtError::io_at(
                source,
                io::Error::new(io::ErrorKind::NotFound, "staging source is not a directory"),
            ));
        }
    }

    Ok(destinations
        .iter()
        .map(|destination| {
            let outcome = sources.iter().try_fold(
                DestinationReport {
                    path: destination.clone(),
                    ..DestinationReport::default()
                },
                |mut total, (source, sub)| -> Result<DestinationReport> {
                    let part = stage_into(source, &join_relative(destination, sub))?;
                    total.copied += part.copied;
                    total.unchanged += part.unchanged;
                    total.directories += part.directories;
                    Ok(total)
                },
            );
            if let Ok(done) = &outcome {
                info!(
                    "Staged {} ({} copied, {} unchanged)",
                    destination.display(),
                    done.copied,
                    done.unchanged
                );
            }
            (destination.clone(), outcome)
        })
        .collect())
}

fn join_relative(root: &Path, sub: &Path) -> PathBuf {
    if sub.as_os_str().is_empty() {
        root.to_path_buf()
    } else {
        root.join(sub)
    }
}

fn stage_into(source_root: &Path, destination: &Path) -> Result<DestinationReport> {
    debug!(
        "Staging {} into {}",
        source_root.display(),
        destination.display()
    );
    fs::create_dir_all(destination).map_err(|e| ArtError::io_at(destination, e))?;

    let mut report = DestinationReport {
        path: destination.to_path_buf(),
        ..DestinationReport::default()
    };

    for entry in WalkDir::new(source_root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(source_root).to_path_buf();
            match e.into_io_error() {
                Some(io_err) => ArtError::io_at(path, io_err),
                None => ArtError::Generic(format!("filesystem loop under {}", path.display())),
            }
        })?;
        let relative = entry
            .path()
            .strip_prefix(source_root)
            .map_err(|e| ArtError::Generic(format!("walked outside source root: {e}")))?;
        let target = destination.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            if target.is_file() {
                fs::remove_file(&target).map_err(|e| ArtError::io_at(&target, e))?;
            }
            fs::create_dir_all(&target).map_err(|e| ArtError::io_at(&target, e))?;
            report.directories += 1;
        } else if file_type.is_file() {
            if is_identical(entry.path(), &target)? {
                report.unchanged += 1;
                continue;
            }
            if target.is_dir() {
                fs::remove_dir_all(&target).map_err(|e| ArtError::io_at(&target, e))?;
            }
            fs::copy(entry.path(), &target).map_err(|e| ArtError::io_at(&target, e))?;
            debug!("Copied {}", target.display());
            report.copied += 1;
        } else {
            debug!("Skipping non-regular file {}", entry.path().display());
        }
    }
    Ok(report)
}

fn is_identical(source: &Path, target: &Path) -> Result<bool> {
    let target_meta = match fs::metadata(target) {
        Ok(meta) if meta.is_file() => meta,
        _ => return Ok(false),
    };
    let source_meta = fs::metadata(source).map_err(|e| ArtError::io_at(source, e))?;
    if source_meta.len() != target_meta.len() {
        return Ok(false);
    }
    Ok(sha256_file(source)? == sha256_file(target)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source_tree(root: &Path) -> PathBuf {
        let source = root.join("src");
        fs::create_dir_all(source.join("win32-x64")).unwrap();
        fs::create_dir_all(source.join("win32-x86")).unwrap();
        fs::write(source.join("win32-x64").join("a.dll"), b"x64").unwrap();
        fs::write(source.join("win32-x86").join("a.dll"), b"x86").unwrap();
        source
    }

    #[test]
    fn copies_into_every_destination() {
        let dir = tempfile::tempdir().unwrap();
        let source = source_tree(dir.path());
        let destinations = vec![dir.path().join("res"), dir.path().join("sandbox").join("bin")];

        let report = stage(&source, &destinations).unwrap();
        assert_eq!(report.destinations.len(), 2);
        assert_eq!(report.files_copied(), 4);
        for dest in &destinations {
            assert_eq!(fs::read(dest.join("win32-x64").join("a.dll")).unwrap(), b"x64");
            assert_eq!(fs::read(dest.join("win32-x86").join("a.dll")).unwrap(), b"x86");
        }
    }

    #[test]
    fn restaging_overwrites_changed_and_keeps_identical() {
        let dir = tempfile::tempdir().unwrap();
        let source = source_tree(dir.path());
        let dest = dir.path().join("res");
        stage(&source, &[dest.clone()]).unwrap();

        fs::write(dest.join("win32-x64").join("a.dll"), b"tampered").unwrap();
        let report = stage(&source, &[dest.clone()]).unwrap();
        assert_eq!(report.destinations[0].copied, 1);
        assert_eq!(report.destinations[0].unchanged, 1);
        assert_eq!(fs::read(dest.join("win32-x64").join("a.dll")).unwrap(), b"x64");

        let report = stage(&source, &[dest]).unwrap();
        assert_eq!(report.files_copied(), 0);
    }

    #[test]
    fn unwritable_first_destination_still_stages_second() {
        let dir = tempfile::tempdir().unwrap();
        let source = source_tree(dir.path());
        let blocked = dir.path().join("blocked");
        fs::write(&blocked, b"a file where a directory should be").unwrap();
        let good = dir.path().join("good");

        let err = stage(&source, &[blocked.clone(), good.clone()]).unwrap_err();
        match &err {
            ArtError::IoPath(path, _) => assert!(path.starts_with(&blocked)),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().contains(&blocked.display().to_string()));
        assert!(good.join("win32-x64").join("a.dll").is_file());
        assert!(good.join("win32-x86").join("a.dll").is_file());
    }

    #[test]
    fn only_listed_subtrees_are_staged() {
        let dir = tempfile::tempdir().unwrap();
        let source = source_tree(dir.path());
        let dest = dir.path().join("res");

        let outcomes =
            stage_subtrees(&source, &[PathBuf::from("win32-x64")], &[dest.clone()]).unwrap();
        let report = outcomes[0].1.as_ref().unwrap();
        assert_eq!(report.copied, 1);
        assert_eq!(report.path, dest);
        assert_eq!(fs::read(dest.join("win32-x64").join("a.dll")).unwrap(), b"x64");
        assert!(!dest.join("win32-x86").exists());
    }

    #[test]
    fn missing_subtree_fails_before_touching_destinations() {
        let dir = tempfile::tempdir().unwrap();
        let source = source_tree(dir.path());
        let dest = dir.path().join("res");
        let err = stage_subtrees(&source, &[PathBuf::from("linux-x64")], &[dest.clone()])
            .unwrap_err();
        assert!(matches!(err, ArtError::IoPath(..)));
        assert!(!dest.exists());
    }

    #[test]
    fn missing_source_fails_before_touching_destinations() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("res");
        let err = stage(&dir.path().join("nope"), &[dest.clone()]).unwrap_err();
        assert!(matches!(err, ArtError::IoPath(..)));
        assert!(!dest.exists());
    }
}
