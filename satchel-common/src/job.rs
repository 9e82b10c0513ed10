//! Backup job model and status tracking
//!
//! A [`BackupRequest`] is the trigger input (from the CLI or the
//! scheduler); the pipeline turns it into a [`BackupJob`] whose status
//! only ever moves forward through the lifecycle.

use crate::secret::Secret;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A request to back up one folder
#[derive(Debug, Clone)]
pub struct BackupRequest {
    /// Absolute path of the folder to archive
    pub source_path: PathBuf,

    /// Where the archive is written; `None` selects the default location
    pub destination_dir: Option<PathBuf>,

    /// Protect the archive with a password
    pub encrypt: bool,

    /// Archive password; required when `encrypt` is set. Never stored in
    /// the job record.
    pub password: Option<Secret>,

    /// Upload the finished archive to remote storage
    pub upload: bool,
}

impl BackupRequest {
    pub fn new(source_path: impl Into<PathBuf>) -> Self {
        Self {
            source_path: source_path.into(),
            destination_dir: None,
            encrypt: false,
            password: None,
            upload: false,
        }
    }
}

/// Lifecycle status of a backup job
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Accepted, no work started
    Pending,
    /// Preflight checks running
    Validating,
    /// Archive being written
    Archiving,
    /// Archive being transferred to remote storage
    Uploading,
    /// Finished successfully
    Completed,
    /// Finished with an error (see `BackupJob::error`)
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Validating => "validating",
            JobStatus::Archiving => "archiving",
            JobStatus::Uploading => "uploading",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Whether this status ends the job
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One requested or scheduled backup
///
/// The record never holds the archive password; only the `encrypt` flag
/// survives into the job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupJob {
    /// Process-local job id, monotonic per pipeline
    pub id: u64,

    pub source_path: PathBuf,

    /// Resolved destination (defaults already applied)
    pub destination_dir: PathBuf,

    pub encrypt: bool,

    pub upload: bool,

    pub status: JobStatus,

    pub created_at: DateTime<Utc>,

    /// Set only when the job reaches Completed or Failed
    pub finished_at: Option<DateTime<Utc>>,

    /// Set only when the job reaches Failed
    pub error: Option<String>,

    /// Local archive produced by the job, once archiving finished
    pub archive_path: Option<PathBuf>,

    /// Remote object reference, once the upload finished
    pub remote_ref: Option<String>,
}

impl BackupJob {
    pub fn new(
        id: u64,
        source_path: PathBuf,
        destination_dir: PathBuf,
        encrypt: bool,
        upload: bool,
    ) -> Self {
        Self {
            id,
            source_path,
            destination_dir,
            encrypt,
            upload,
            status: JobStatus::Pending,
            created_at: Utc::now(),
            finished_at: None,
            error: None,
            archive_path: None,
            remote_ref: None,
        }
    }

    /// Advance the job to the next lifecycle status.
    ///
    /// Transitions are one-directional: moving backwards or out of a
    /// terminal status is rejected.
    pub fn advance(&mut self, next: JobStatus) -> Result<(), String> {
        if self.status.is_terminal() {
            return Err(format!(
                "job {} is already {} and cannot move to {}",
                self.id, self.status, next
            ));
        }
        if next <= self.status {
            return Err(format!(
                "job {} cannot move backwards from {} to {}",
                self.id, self.status, next
            ));
        }
        self.status = next;
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Mark the job completed
    pub fn complete(&mut self) -> Result<(), String> {
        self.advance(JobStatus::Completed)
    }

    /// Mark the job failed with the originating error preserved
    pub fn fail(&mut self, error: impl Into<String>) {
        // A job can fail from any non-terminal status; only a terminal
        // status is sticky.
        if self.status.is_terminal() {
            return;
        }
        self.status = JobStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn job() -> BackupJob {
        BackupJob::new(
            1,
            Path::new("/data/photos").to_path_buf(),
            Path::new("/backups").to_path_buf(),
            false,
            false,
        )
    }

    #[test]
    fn test_new_job_is_pending() {
        let job = job();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.finished_at.is_none());
        assert!(job.error.is_none());
    }

    #[test]
    fn test_forward_transitions() {
        let mut job = job();
        assert!(job.advance(JobStatus::Validating).is_ok());
        assert!(job.advance(JobStatus::Archiving).is_ok());
        assert!(job.advance(JobStatus::Uploading).is_ok());
        assert!(job.complete().is_ok());
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn test_backward_transition_rejected() {
        let mut job = job();
        job.advance(JobStatus::Archiving).unwrap();
        assert!(job.advance(JobStatus::Validating).is_err());
        assert_eq!(job.status, JobStatus::Archiving);
    }

    #[test]
    fn test_terminal_status_is_sticky() {
        let mut job = job();
        job.fail("disk on fire");
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.advance(JobStatus::Archiving).is_err());

        // A second failure does not overwrite the first error
        job.fail("something else");
        assert_eq!(job.error.as_deref(), Some("disk on fire"));
    }

    #[test]
    fn test_fail_records_error_and_finish_time() {
        let mut job = job();
        job.advance(JobStatus::Validating).unwrap();
        job.fail("insufficient space");
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("insufficient space"));
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn test_status_ordering_matches_lifecycle() {
        assert!(JobStatus::Pending < JobStatus::Validating);
        assert!(JobStatus::Validating < JobStatus::Archiving);
        assert!(JobStatus::Archiving < JobStatus::Uploading);
        assert!(JobStatus::Uploading < JobStatus::Completed);
    }
}
