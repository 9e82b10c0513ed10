//! Backup pipeline orchestrator
//!
//! Sequences preflight, archiving, and upload into one job, tracks the
//! job's status, and reports every transition and progress tick as an
//! event. The caller renders events; the pipeline renders nothing.
//!
//! At most one job occupies Archiving/Uploading at a time, system-wide.
//! A second trigger while a job is running is rejected with
//! [`PipelineError::Busy`] rather than queued, so the manual and
//! scheduled submission paths can never race on the destination.

use crate::archive::{self, EncryptionMode};
use crate::credentials::CredentialStore;
use crate::error::{ArchiveError, PipelineError, UploadError};
use crate::preflight;
use crate::upload::{DriveStore, RemoteStore};
use satchel_common::validation::validate_request;
use satchel_common::{BackupJob, BackupRequest, JobStatus, SatchelConfig, Secret};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, mpsc};
use std::thread::JoinHandle;

/// Progress and status stream reported to the caller
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// The job entered a new lifecycle status
    Status { status: JobStatus, detail: String },

    /// A progress tick from archiving or uploading
    Progress {
        files_done: u64,
        files_total: u64,
        bytes_done: u64,
        bytes_total: u64,
        percent: f64,
    },

    /// Something worth telling the user that does not fail the job
    Warning(String),

    /// Terminal event; the job is Completed or Failed
    Finished(BackupJob),
}

/// Handle to a submitted job: event stream plus cancellation
pub struct JobHandle {
    pub job_id: u64,
    events: Receiver<PipelineEvent>,
    cancel: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl JobHandle {
    /// Receive the next event; `None` once the stream ends
    pub fn next_event(&self) -> Option<PipelineEvent> {
        self.events.recv().ok()
    }

    /// Request cancellation; checked between archive members and upload
    /// chunks
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Drain the event stream and return the terminal job record
    pub fn wait(mut self) -> Option<BackupJob> {
        let mut finished = None;
        while let Ok(event) = self.events.recv() {
            if let PipelineEvent::Finished(job) = event {
                finished = Some(job);
                break;
            }
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        finished
    }
}

/// The backup orchestration engine
///
/// Shared between the manual trigger path and the scheduler; both submit
/// through [`BackupPipeline::submit`].
pub struct BackupPipeline {
    config: SatchelConfig,
    credentials: Arc<CredentialStore>,
    remote: Arc<dyn RemoteStore>,
    busy: Arc<AtomicBool>,
    next_id: AtomicU64,
}

/// Releases the single-job slot when the worker finishes, however it
/// finishes
struct BusyGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::SeqCst);
    }
}

impl BackupPipeline {
    pub fn new(config: SatchelConfig) -> Self {
        let remote = Arc::new(DriveStore::new(None));
        Self::with_remote_store(config, remote)
    }

    /// Construct with a substitute remote backend
    pub fn with_remote_store(config: SatchelConfig, remote: Arc<dyn RemoteStore>) -> Self {
        let credentials = Arc::new(CredentialStore::new(&config));
        Self {
            config,
            credentials,
            remote,
            busy: Arc::new(AtomicBool::new(false)),
            next_id: AtomicU64::new(1),
        }
    }

    /// Whether a job currently occupies the archive/upload slot
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    /// Submit a backup request.
    ///
    /// Cheap validation happens here; the expensive work runs on a worker
    /// thread reporting through the returned handle. Rejects with
    /// [`PipelineError::Busy`] while another job is in flight.
    pub fn submit(&self, request: BackupRequest) -> Result<JobHandle, PipelineError> {
        validate_request(&request).map_err(PipelineError::InvalidRequest)?;

        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(PipelineError::Busy);
        }
        let guard = BusyGuard {
            busy: self.busy.clone(),
        };

        // An upload without the client identity document is a
        // configuration error; surface it before any work happens
        if request.upload {
            self.credentials.client_identity()?;
        }

        let destination_dir = request
            .destination_dir
            .clone()
            .unwrap_or_else(|| self.config.default_destination_dir.clone());

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let job = BackupJob::new(
            id,
            request.source_path.clone(),
            destination_dir,
            request.encrypt,
            request.upload,
        );

        let (tx, rx) = mpsc::channel();
        let cancel = Arc::new(AtomicBool::new(false));

        let password = request.password;
        let credentials = self.credentials.clone();
        let remote = self.remote.clone();
        let worker_cancel = cancel.clone();

        log::info!(
            "job {id}: backing up {} (encrypt: {}, upload: {})",
            job.source_path.display(),
            job.encrypt,
            job.upload
        );

        let worker = std::thread::spawn(move || {
            let _slot = guard;
            run_job(job, password, credentials, remote, &worker_cancel, &tx);
        });

        Ok(JobHandle {
            job_id: id,
            events: rx,
            cancel,
            worker: Some(worker),
        })
    }
}

/// Drive one job through its lifecycle on the worker thread
fn run_job(
    mut job: BackupJob,
    password: Option<Secret>,
    credentials: Arc<CredentialStore>,
    remote: Arc<dyn RemoteStore>,
    cancel: &AtomicBool,
    tx: &Sender<PipelineEvent>,
) {
    // The scheduler drops its handle after submitting; a gone receiver
    // must not bring the worker down
    let emit = |event: PipelineEvent| {
        let _ = tx.send(event);
    };

    // Validating
    enter(&mut job, JobStatus::Validating, "checking source and destination", &emit);
    let report = match preflight::validate(&job.source_path, &job.destination_dir) {
        Ok(report) => report,
        Err(err) => return finish_failed(job, err.to_string(), &emit),
    };
    if report.same_filesystem {
        let warning = format!(
            "destination {} is on the same filesystem as the source; \
             a disk failure would lose both",
            job.destination_dir.display()
        );
        log::warn!("job {}: {warning}", job.id);
        emit(PipelineEvent::Warning(warning));
    }

    // Archiving; the password is consumed here and dropped with `mode`
    enter(&mut job, JobStatus::Archiving, "writing archive", &emit);
    let mode = match (job.encrypt, password) {
        (true, Some(password)) => EncryptionMode::ZipAes256(password),
        (true, None) => {
            return finish_failed(job, "encryption requested but no password supplied", &emit);
        }
        (false, _) => EncryptionMode::None,
    };
    let outcome = {
        let mut on_progress = |p: archive::ArchiveProgress| {
            emit(PipelineEvent::Progress {
                files_done: p.files_done,
                files_total: p.files_total,
                bytes_done: p.bytes_done,
                bytes_total: p.bytes_total,
                percent: p.percent(),
            });
        };
        archive::build(
            &job.source_path,
            &job.destination_dir,
            &mode,
            cancel,
            &mut on_progress,
        )
    };
    drop(mode);
    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(ArchiveError::Cancelled) => return finish_failed(job, "backup cancelled", &emit),
        Err(err) => return finish_failed(job, err.to_string(), &emit),
    };
    job.archive_path = Some(outcome.path.clone());

    if !job.upload {
        return finish_completed(job, &emit);
    }

    // The archive is finalized; cancelling from here on keeps it
    if cancel.load(Ordering::Relaxed) {
        return finish_failed(job, "backup cancelled; local archive kept", &emit);
    }

    // Uploading
    enter(&mut job, JobStatus::Uploading, "transferring archive", &emit);
    let token = match credentials.access_token() {
        Ok(token) => token,
        Err(err) => {
            return finish_failed(
                job,
                format!("{err}; the local archive was kept"),
                &emit,
            );
        }
    };

    let uploaded = {
        let total_files = outcome.file_count;
        let mut on_progress = |sent: u64, total: u64| {
            let percent = if total > 0 {
                (sent as f64 / total as f64 * 100.0).min(100.0)
            } else {
                100.0
            };
            emit(PipelineEvent::Progress {
                files_done: total_files,
                files_total: total_files,
                bytes_done: sent,
                bytes_total: total,
                percent,
            });
        };
        remote.upload(&outcome.path, &token, cancel, &mut on_progress)
    };

    match uploaded {
        Ok(remote_ref) => {
            job.remote_ref = Some(remote_ref.id);
            finish_completed(job, &emit);
        }
        Err(UploadError::Cancelled) => {
            finish_failed(job, "backup cancelled; local archive kept", &emit);
        }
        Err(err) => {
            // A failed upload never discards the successful local archive
            finish_failed(job, format!("{err}; the local archive was kept"), &emit);
        }
    }
}

fn enter(
    job: &mut BackupJob,
    status: JobStatus,
    detail: &str,
    emit: &impl Fn(PipelineEvent),
) {
    if let Err(err) = job.advance(status) {
        // Transitions are driven linearly above; a violation is a bug
        log::error!("job {}: {err}", job.id);
        return;
    }
    log::info!("job {}: {status}", job.id);
    emit(PipelineEvent::Status {
        status,
        detail: detail.to_string(),
    });
}

fn finish_completed(mut job: BackupJob, emit: &impl Fn(PipelineEvent)) {
    if let Err(err) = job.complete() {
        log::error!("job {}: {err}", job.id);
    }
    log::info!("job {}: completed", job.id);
    emit(PipelineEvent::Finished(job));
}

fn finish_failed(mut job: BackupJob, error: impl Into<String>, emit: &impl Fn(PipelineEvent)) {
    let error = error.into();
    log::error!("job {}: failed: {error}", job.id);
    job.fail(error);
    emit(PipelineEvent::Finished(job));
}
