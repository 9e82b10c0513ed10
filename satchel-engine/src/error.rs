//! Error taxonomy for the backup engine
//!
//! Each pipeline stage has its own error enum so the orchestrator can
//! react by failure class: validation errors stop the job before any
//! work, transient network errors are retried, authorization errors tell
//! the caller to re-authorize.

use satchel_common::format_bytes;
use std::path::PathBuf;
use thiserror::Error;

/// Failures detected before any work begins
#[derive(Debug, Error)]
pub enum PreflightError {
    #[error("source folder not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("source path is not a folder: {}", .0.display())]
    SourceNotADirectory(PathBuf),

    #[error("destination '{}' is not writable: {reason}", path.display())]
    DestinationNotWritable { path: PathBuf, reason: String },

    #[error(
        "not enough space at destination: need {}, {} available",
        bytes(.required),
        bytes(.available)
    )]
    InsufficientSpace { required: u64, available: u64 },

    #[error("failed to scan source folder: {0}")]
    Scan(String),
}

fn bytes(value: &u64) -> String {
    format_bytes(*value)
}

/// Failures while building the archive
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("archive container error: {0}")]
    Container(String),

    #[error("encryption error: {0}")]
    Encryption(String),

    #[error("backup cancelled")]
    Cancelled,
}

impl From<zip::result::ZipError> for ArchiveError {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(io) => ArchiveError::Io(io),
            other => ArchiveError::Container(other.to_string()),
        }
    }
}

/// Failures obtaining an access token
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error(
        "client identity document missing at {}; place the provider's client file there",
        .0.display()
    )]
    BootstrapMissing(PathBuf),

    #[error("no usable credential; run interactive authorization")]
    AuthorizationRequired,

    #[error("stored credential expired and cannot be refreshed; re-authorization required")]
    Expired,

    #[error("credential file is malformed: {0}")]
    Invalid(String),

    #[error("credential I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("token endpoint error: {0}")]
    Http(String),
}

/// Failures while transferring the archive to remote storage
#[derive(Debug, Error)]
pub enum UploadError {
    /// Transient transport failure; retried with backoff
    #[error("network error during upload: {0}")]
    Network(String),

    /// The remote rejected our authorization; not retried
    #[error("remote storage rejected the authorization (HTTP {status})")]
    AuthRejected { status: u16 },

    /// The remote account is out of space; not retried
    #[error("remote storage quota exceeded")]
    QuotaExceeded,

    #[error("remote storage error (HTTP {status}): {message}")]
    Remote { status: u16, message: String },

    #[error("upload I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("upload cancelled")]
    Cancelled,
}

impl UploadError {
    /// Whether the failure is worth another attempt
    pub fn is_transient(&self) -> bool {
        matches!(self, UploadError::Network(_))
    }
}

/// Failures surfaced by the pipeline to its caller
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Another job is already archiving or uploading
    #[error("a backup is already in progress")]
    Busy,

    #[error("invalid backup request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Validation(#[from] PreflightError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Upload(#[from] UploadError),
}
