// Backup orchestration engine for Satchel
//
// Turns a folder-selection trigger into a completed (or failed) backup
// artifact: preflight validation, archive construction, optional
// encryption, optional remote upload, and optional daily scheduling.
// Callers (the CLI, or any other frontend) submit a BackupRequest and
// render the event stream; nothing in this crate talks to a user.

pub mod archive;
pub mod credentials;
pub mod error;
pub mod pipeline;
pub mod preflight;
pub mod scheduler;
pub mod upload;

pub use archive::{ArchiveOutcome, ArchiveProgress, EncryptionMode};
pub use credentials::{AccessToken, Authorizer, ClientIdentity, CredentialStore};
pub use error::{ArchiveError, CredentialError, PipelineError, PreflightError, UploadError};
pub use pipeline::{BackupPipeline, JobHandle, PipelineEvent};
pub use preflight::PreflightReport;
pub use scheduler::Scheduler;
pub use upload::{DriveStore, RemoteRef, RemoteStore};
