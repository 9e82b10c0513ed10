//! Archive construction
//!
//! Walks the source folder in a stable order and writes every entry into
//! a single ZIP container in the destination directory. The archive is
//! built under a temporary name and only renamed into place after the
//! last member, so a failed or cancelled run never leaves a partial
//! artifact behind under the final name.

use crate::error::ArchiveError;
use satchel_common::Secret;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use walkdir::WalkDir;
use zip::write::{SimpleFileOptions, ZipWriter};
use zip::{AesMode, CompressionMethod};

/// How archive members are protected
///
/// The cipher choice lives here, not in the pipeline; swapping schemes
/// means adding a variant and a match arm.
pub enum EncryptionMode {
    /// Plain Deflate members
    None,
    /// ZIP AES-256 member encryption; extractable by standard archive
    /// tools given the same password
    ZipAes256(Secret),
}

impl EncryptionMode {
    pub fn is_encrypted(&self) -> bool {
        !matches!(self, EncryptionMode::None)
    }
}

/// Result of a finished archive build
#[derive(Debug, Clone)]
pub struct ArchiveOutcome {
    /// Final artifact path inside the destination directory
    pub path: PathBuf,

    /// Number of file members written
    pub file_count: u64,

    /// Uncompressed bytes written into the container
    pub total_bytes: u64,
}

/// A progress tick, emitted after every member write
#[derive(Debug, Clone, Copy)]
pub struct ArchiveProgress {
    pub files_done: u64,
    pub files_total: u64,
    pub bytes_done: u64,
    pub bytes_total: u64,
}

impl ArchiveProgress {
    /// Fraction complete in [0, 100], byte-weighted when possible
    pub fn percent(&self) -> f64 {
        if self.bytes_total > 0 {
            (self.bytes_done as f64 / self.bytes_total as f64 * 100.0).min(100.0)
        } else if self.files_total > 0 {
            (self.files_done as f64 / self.files_total as f64 * 100.0).min(100.0)
        } else {
            100.0
        }
    }
}

/// One entry scheduled for the container
struct Member {
    path: PathBuf,
    name: String,
    is_dir: bool,
    size: u64,
}

/// Removes the temporary output unless disarmed after the final rename
struct PartialGuard {
    path: PathBuf,
    armed: bool,
}

impl Drop for PartialGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = fs::remove_file(&self.path);
        }
    }
}

/// Build a compressed archive of `source` inside `destination_dir`.
///
/// Members are enumerated in lexicographic path order so two runs over an
/// unchanged tree produce identical member lists. `on_progress` is called
/// after every member write; `cancel` is checked between members and
/// aborts the build with [`ArchiveError::Cancelled`].
pub fn build(
    source: &Path,
    destination_dir: &Path,
    encryption: &EncryptionMode,
    cancel: &AtomicBool,
    on_progress: &mut dyn FnMut(ArchiveProgress),
) -> Result<ArchiveOutcome, ArchiveError> {
    let members = collect_members(source)?;

    let files_total = members.iter().filter(|m| !m.is_dir).count() as u64;
    let bytes_total: u64 = members.iter().map(|m| m.size).sum();

    let final_path = unique_archive_path(destination_dir, source);
    let file_name = final_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "archive.zip".to_string());
    let partial_path = destination_dir.join(format!(".{file_name}.partial"));

    log::info!(
        "archiving {} -> {} ({} files)",
        source.display(),
        final_path.display(),
        files_total
    );

    let mut guard = PartialGuard {
        path: partial_path.clone(),
        armed: true,
    };

    let output = File::create(&partial_path)?;
    let mut writer = ZipWriter::new(output);

    let dir_options = SimpleFileOptions::default();
    let file_options = match encryption {
        EncryptionMode::None => SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .large_file(true),
        EncryptionMode::ZipAes256(password) => {
            if password.is_empty() {
                return Err(ArchiveError::Encryption(
                    "archive password is empty".to_string(),
                ));
            }
            SimpleFileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .large_file(true)
                .with_aes_encryption(AesMode::Aes256, password.reveal())
        }
    };

    let mut files_done = 0u64;
    let mut bytes_done = 0u64;

    for member in &members {
        if cancel.load(Ordering::Relaxed) {
            log::warn!("archive build cancelled at {}", member.name);
            return Err(ArchiveError::Cancelled);
        }

        if member.is_dir {
            writer.add_directory(member.name.clone(), dir_options.clone())?;
        } else {
            writer.start_file(member.name.clone(), file_options.clone())?;
            let mut input = File::open(&member.path)?;
            let copied = io::copy(&mut input, &mut writer)?;
            files_done += 1;
            bytes_done += copied;
        }

        on_progress(ArchiveProgress {
            files_done,
            files_total,
            bytes_done,
            bytes_total,
        });
    }

    writer.finish()?;
    fs::rename(&partial_path, &final_path)?;
    guard.armed = false;

    log::info!("archive complete: {}", final_path.display());

    Ok(ArchiveOutcome {
        path: final_path,
        file_count: files_done,
        total_bytes: bytes_done,
    })
}

/// Enumerate the source tree in stable lexicographic order.
///
/// Directories are included so empty folders survive the round trip;
/// symlinks are skipped, never followed.
fn collect_members(source: &Path) -> Result<Vec<Member>, ArchiveError> {
    let mut members = Vec::new();

    for entry in WalkDir::new(source)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| ArchiveError::Container(e.to_string()))?;

        if entry.path() == source {
            continue;
        }
        if entry.file_type().is_symlink() {
            log::debug!("skipping symlink {}", entry.path().display());
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| ArchiveError::Container(e.to_string()))?;
        let name = member_name(relative);

        if entry.file_type().is_dir() {
            members.push(Member {
                path: entry.path().to_path_buf(),
                name,
                is_dir: true,
                size: 0,
            });
        } else {
            let size = entry
                .metadata()
                .map_err(|e| ArchiveError::Container(e.to_string()))?
                .len();
            members.push(Member {
                path: entry.path().to_path_buf(),
                name,
                is_dir: false,
                size,
            });
        }
    }

    Ok(members)
}

/// Container member name for a path relative to the source root, always
/// with forward slashes
fn member_name(relative: &Path) -> String {
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    parts.join("/")
}

/// Pick a final artifact path that does not collide with earlier runs
fn unique_archive_path(destination_dir: &Path, source: &Path) -> PathBuf {
    let stem = archive_stem(source);
    let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    let base = format!("{stem}-{timestamp}");

    let candidate = destination_dir.join(format!("{base}.zip"));
    if !candidate.exists() {
        return candidate;
    }

    let mut counter = 1u32;
    loop {
        let candidate = destination_dir.join(format!("{base}-{counter}.zip"));
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

/// Derive a filesystem-safe archive stem from the source folder name
fn archive_stem(source: &Path) -> String {
    let raw = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let trimmed = cleaned.trim_matches(['.', '_']).to_string();
    if trimmed.is_empty() {
        "backup".to_string()
    } else {
        trimmed
    }
}
