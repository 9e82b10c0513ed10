//! Preflight checks run before a backup does any work
//!
//! Measures the source folder, compares it against the free space at the
//! destination, and confirms the destination can be written to. The
//! comparison is conservative: no compression ratio is assumed, so a
//! source that would compress fine can still be rejected.

use crate::error::PreflightError;
use satchel_common::format_bytes;
use std::path::Path;
use walkdir::WalkDir;

/// What preflight learned about the job
#[derive(Debug, Clone)]
pub struct PreflightReport {
    /// Total uncompressed size of the source folder
    pub total_bytes: u64,

    /// Number of regular files under the source folder
    pub file_count: u64,

    /// Free space at the destination when the check ran
    pub available_bytes: u64,

    /// Source and destination share a filesystem; worth a warning since
    /// a dying disk would take both the data and the backup with it
    pub same_filesystem: bool,
}

/// Validate a job's source and destination before any work begins
///
/// Read-only apart from creating the destination directory when it does
/// not exist yet (the default destination is created on demand).
pub fn validate(source: &Path, destination: &Path) -> Result<PreflightReport, PreflightError> {
    if !source.exists() {
        return Err(PreflightError::SourceNotFound(source.to_path_buf()));
    }
    if !source.is_dir() {
        return Err(PreflightError::SourceNotADirectory(source.to_path_buf()));
    }

    ensure_writable_dir(destination)?;

    let (total_bytes, file_count) = source_size(source)?;

    let available_bytes =
        fs2::available_space(destination).map_err(|e| PreflightError::DestinationNotWritable {
            path: destination.to_path_buf(),
            reason: e.to_string(),
        })?;

    if !has_enough_space(total_bytes, available_bytes) {
        return Err(PreflightError::InsufficientSpace {
            required: total_bytes,
            available: available_bytes,
        });
    }

    let same_filesystem = same_filesystem(source, destination);

    log::info!(
        "preflight: {} files, {} required, {} available at {}",
        file_count,
        format_bytes(total_bytes),
        format_bytes(available_bytes),
        destination.display()
    );

    Ok(PreflightReport {
        total_bytes,
        file_count,
        available_bytes,
        same_filesystem,
    })
}

/// Sum the sizes of all regular files under `source`.
///
/// Symlinks are counted as entries but never followed, so a link cannot
/// recurse forever or drag in files outside the source tree.
pub fn source_size(source: &Path) -> Result<(u64, u64), PreflightError> {
    let mut total_bytes = 0u64;
    let mut file_count = 0u64;

    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry.map_err(|e| PreflightError::Scan(e.to_string()))?;
        if entry.file_type().is_file() {
            let metadata = entry
                .metadata()
                .map_err(|e| PreflightError::Scan(e.to_string()))?;
            total_bytes += metadata.len();
            file_count += 1;
        }
    }

    Ok((total_bytes, file_count))
}

/// The free-space decision, kept separate so it can be tested with
/// injected numbers
pub fn has_enough_space(required: u64, available: u64) -> bool {
    available >= required
}

fn ensure_writable_dir(destination: &Path) -> Result<(), PreflightError> {
    if !destination.exists() {
        std::fs::create_dir_all(destination).map_err(|e| {
            PreflightError::DestinationNotWritable {
                path: destination.to_path_buf(),
                reason: e.to_string(),
            }
        })?;
    }

    let metadata =
        std::fs::metadata(destination).map_err(|e| PreflightError::DestinationNotWritable {
            path: destination.to_path_buf(),
            reason: e.to_string(),
        })?;

    if !metadata.is_dir() {
        return Err(PreflightError::DestinationNotWritable {
            path: destination.to_path_buf(),
            reason: "not a directory".to_string(),
        });
    }

    if metadata.permissions().readonly() {
        return Err(PreflightError::DestinationNotWritable {
            path: destination.to_path_buf(),
            reason: "directory is read-only".to_string(),
        });
    }

    Ok(())
}

/// Whether two paths live on the same filesystem
#[cfg(unix)]
fn same_filesystem(a: &Path, b: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    match (std::fs::metadata(a), std::fs::metadata(b)) {
        (Ok(ma), Ok(mb)) => ma.dev() == mb.dev(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn same_filesystem(a: &Path, b: &Path) -> bool {
    // Best effort off Unix: compare the path roots (drive letters)
    let root = |p: &Path| p.components().next().map(|c| c.as_os_str().to_owned());
    match (root(a), root(b)) {
        (Some(ra), Some(rb)) => ra == rb,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_missing_source_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let dest = dir.path().join("out");

        match validate(&missing, &dest) {
            Err(PreflightError::SourceNotFound(path)) => assert_eq!(path, missing),
            other => panic!("expected SourceNotFound, got {other:?}"),
        }
        // No stray artifacts from a failed check
        assert!(!dest.join("anything").exists());
    }

    #[test]
    fn test_file_source_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file.txt");
        fs::write(&file, "hello").unwrap();

        match validate(&file, dir.path()) {
            Err(PreflightError::SourceNotADirectory(_)) => {}
            other => panic!("expected SourceNotADirectory, got {other:?}"),
        }
    }

    #[test]
    fn test_source_size_sums_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), vec![0u8; 100]).unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/b.txt"), vec![0u8; 200]).unwrap();
        fs::create_dir(dir.path().join("empty")).unwrap();

        let (bytes, files) = source_size(dir.path()).unwrap();
        assert_eq!(bytes, 300);
        assert_eq!(files, 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_source_size_does_not_follow_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        fs::write(outside.path().join("big.bin"), vec![0u8; 4096]).unwrap();

        fs::write(dir.path().join("a.txt"), vec![0u8; 10]).unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("loop")).unwrap();

        let (bytes, files) = source_size(dir.path()).unwrap();
        assert_eq!(bytes, 10);
        assert_eq!(files, 1);
    }

    #[test]
    fn test_space_decision() {
        // 10 MB needed, 5 MB free: rejected
        assert!(!has_enough_space(10 * 1024 * 1024, 5 * 1024 * 1024));
        assert!(has_enough_space(5 * 1024 * 1024, 10 * 1024 * 1024));
        // No compression-ratio optimism: equality is the lower bound
        assert!(has_enough_space(1024, 1024));
        assert!(has_enough_space(0, 0));
    }

    #[test]
    fn test_validate_creates_missing_destination() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("src");
        fs::create_dir(&source).unwrap();
        fs::write(source.join("a.txt"), "data").unwrap();

        let dest = dir.path().join("new").join("backups");
        let report = validate(&source, &dest).unwrap();
        assert!(dest.is_dir());
        assert_eq!(report.file_count, 1);
        assert_eq!(report.total_bytes, 4);
        // Both temp dirs live on the same filesystem here
        assert!(report.same_filesystem);
    }
}
