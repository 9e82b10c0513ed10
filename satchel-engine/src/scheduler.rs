//! Recurring daily backup scheduler
//!
//! A background loop that wakes at a coarse interval, compares local
//! wall-clock time against the configured time of day, and submits a
//! backup through the same pipeline entry point a manual trigger uses.
//! A tick that lands while a job is already running is dropped and
//! logged, never queued; disabling the scheduler leaves an in-flight
//! job untouched.

use crate::error::PipelineError;
use crate::pipeline::BackupPipeline;
use chrono::Local;
use satchel_common::schedule::{ScheduleConfig, next_occurrence};
use satchel_common::{BackupRequest, Secret};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

struct SchedulerState {
    armed: AtomicBool,
    stop: Mutex<bool>,
    wake: Condvar,
    next_fire: Mutex<chrono::NaiveDateTime>,
    fired: AtomicU64,
    skipped: AtomicU64,
}

impl SchedulerState {
    /// Wait up to `timeout` for a stop request; true when stopping
    fn wait_stop(&self, timeout: Duration) -> bool {
        let guard = self.stop.lock().unwrap();
        if *guard {
            return true;
        }
        let (guard, _) = self.wake.wait_timeout(guard, timeout).unwrap();
        *guard
    }
}

/// The armed daily schedule; at most one exists per process
pub struct Scheduler {
    state: Arc<SchedulerState>,
    worker: Option<JoinHandle<()>>,
}

impl Scheduler {
    /// Arm the schedule and start the background loop.
    ///
    /// The first fire is the next strictly-future occurrence of the
    /// configured time: a run missed while the process was down is not
    /// made up. `password` is held only in memory for encrypted
    /// scheduled backups; it is never persisted with the schedule.
    pub fn start(
        pipeline: Arc<BackupPipeline>,
        config: ScheduleConfig,
        password: Option<Secret>,
        poll: Duration,
    ) -> Result<Self, String> {
        config.validate()?;
        if !config.enabled {
            return Err("schedule is disabled".to_string());
        }
        if config.encrypt && password.is_none() {
            return Err("schedule uses encryption but no password was provided".to_string());
        }

        let (hour, minute) = config.hour_minute();
        let next = next_occurrence(Local::now().naive_local(), hour, minute);

        let state = Arc::new(SchedulerState {
            armed: AtomicBool::new(true),
            stop: Mutex::new(false),
            wake: Condvar::new(),
            next_fire: Mutex::new(next),
            fired: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
        });

        log::info!(
            "scheduler armed: daily at {}, next run {}",
            config.time,
            next
        );

        let loop_state = state.clone();
        let worker = std::thread::spawn(move || {
            run_loop(loop_state, pipeline, config, password, hour, minute, poll);
        });

        Ok(Self {
            state,
            worker: Some(worker),
        })
    }

    pub fn is_armed(&self) -> bool {
        self.state.armed.load(Ordering::Relaxed)
    }

    /// Number of ticks that started a backup
    pub fn fired_count(&self) -> u64 {
        self.state.fired.load(Ordering::Relaxed)
    }

    /// Number of ticks dropped because a backup was already running
    pub fn skipped_count(&self) -> u64 {
        self.state.skipped.load(Ordering::Relaxed)
    }

    /// Disarm the schedule and stop the loop.
    ///
    /// A job the scheduler already started keeps running.
    pub fn disable(&mut self) {
        self.state.armed.store(false, Ordering::Relaxed);
        *self.state.stop.lock().unwrap() = true;
        self.state.wake.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        log::info!("scheduler disabled");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.disable();
    }
}

fn run_loop(
    state: Arc<SchedulerState>,
    pipeline: Arc<BackupPipeline>,
    config: ScheduleConfig,
    password: Option<Secret>,
    hour: u32,
    minute: u32,
    poll: Duration,
) {
    loop {
        if state.wait_stop(poll) {
            break;
        }

        let now = Local::now().naive_local();
        let due = now >= *state.next_fire.lock().unwrap();
        if !due {
            continue;
        }

        // Re-arm for the next day before firing so a long job can never
        // double-fire within the same window
        *state.next_fire.lock().unwrap() = next_occurrence(now, hour, minute);
        fire(&state, &pipeline, &config, password.as_ref());
    }
    log::debug!("scheduler loop exited");
}

/// Submit one scheduled backup from the last-confirmed configuration
fn fire(
    state: &SchedulerState,
    pipeline: &BackupPipeline,
    config: &ScheduleConfig,
    password: Option<&Secret>,
) {
    let request = BackupRequest {
        source_path: config.source_path.clone(),
        destination_dir: config.destination_dir.clone(),
        encrypt: config.encrypt,
        password: if config.encrypt { password.cloned() } else { None },
        upload: config.upload,
    };

    match pipeline.submit(request) {
        Ok(handle) => {
            state.fired.fetch_add(1, Ordering::Relaxed);
            log::info!("scheduled backup started (job {})", handle.job_id);
            // The worker logs its own outcome; the handle is not awaited
            // so the loop stays responsive
        }
        Err(PipelineError::Busy) => {
            state.skipped.fetch_add(1, Ordering::Relaxed);
            log::warn!("scheduled backup skipped: a backup is already in progress");
        }
        Err(err) => {
            // A misconfigured tick must not bring the loop down; it
            // re-arms for the next day regardless
            log::error!("scheduled backup could not start: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::AccessToken;
    use crate::upload::{RemoteRef, RemoteStore};
    use satchel_common::SatchelConfig;
    use std::fs;
    use std::path::Path;
    use std::time::Instant;

    const TEST_POLL: Duration = Duration::from_millis(10);

    fn source_tree(dir: &Path) -> std::path::PathBuf {
        let source = dir.join("docs");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("notes.txt"), b"remember the milk").unwrap();
        source
    }

    fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !done() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn force_due(scheduler: &Scheduler) {
        *scheduler.state.next_fire.lock().unwrap() =
            Local::now().naive_local() - chrono::Duration::minutes(1);
    }

    /// Never-finishing remote store, used to hold the pipeline busy
    struct StuckStore;

    impl RemoteStore for StuckStore {
        fn name(&self) -> &str {
            "stuck"
        }

        fn upload(
            &self,
            archive: &Path,
            _token: &AccessToken,
            cancel: &std::sync::atomic::AtomicBool,
            _on_progress: &mut dyn FnMut(u64, u64),
        ) -> Result<RemoteRef, crate::error::UploadError> {
            while !cancel.load(Ordering::Relaxed) {
                std::thread::sleep(Duration::from_millis(5));
            }
            Ok(RemoteRef {
                id: "stuck-1".to_string(),
                name: archive.file_name().unwrap().to_string_lossy().into_owned(),
            })
        }
    }

    #[test]
    fn test_disabled_schedule_does_not_arm() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Arc::new(BackupPipeline::new(SatchelConfig::rooted_at(dir.path())));

        let mut config = ScheduleConfig::new("/data/docs", "02:00");
        config.enabled = false;
        assert!(Scheduler::start(pipeline, config, None, TEST_POLL).is_err());
    }

    #[test]
    fn test_encrypted_schedule_requires_password() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Arc::new(BackupPipeline::new(SatchelConfig::rooted_at(dir.path())));

        let mut config = ScheduleConfig::new("/data/docs", "02:00");
        config.encrypt = true;
        assert!(Scheduler::start(pipeline, config, None, TEST_POLL).is_err());
    }

    #[test]
    fn test_due_schedule_fires_and_rearms() {
        let dir = tempfile::tempdir().unwrap();
        let config = SatchelConfig::rooted_at(dir.path());
        let dest = config.default_destination_dir.clone();
        let source = source_tree(dir.path());
        let pipeline = Arc::new(BackupPipeline::new(config));

        let schedule = ScheduleConfig::new(&source, "02:00");
        let scheduler =
            Scheduler::start(pipeline.clone(), schedule, None, TEST_POLL).unwrap();
        assert!(scheduler.is_armed());
        assert_eq!(scheduler.fired_count(), 0);

        force_due(&scheduler);
        wait_until("scheduled fire", || scheduler.fired_count() == 1);

        // Re-armed strictly into the future; one due tick fires once
        assert!(*scheduler.state.next_fire.lock().unwrap() > Local::now().naive_local());

        wait_until("backup to finish", || !pipeline.is_busy());
        wait_until("archive to appear", || {
            fs::read_dir(&dest).map(|mut d| d.next().is_some()).unwrap_or(false)
        });
        assert_eq!(scheduler.fired_count(), 1);
        assert_eq!(scheduler.skipped_count(), 0);
    }

    #[test]
    fn test_tick_is_skipped_while_backup_in_progress() {
        let dir = tempfile::tempdir().unwrap();
        let config = SatchelConfig::rooted_at(dir.path());
        let source = source_tree(dir.path());

        // Valid credential so the manual upload job reaches the stuck store
        let expiry = chrono::Utc::now() + chrono::Duration::hours(1);
        fs::write(
            dir.path().join("token.json"),
            serde_json::json!({
                "access_token": "t",
                "expires_at": expiry.to_rfc3339(),
            })
            .to_string(),
        )
        .unwrap();
        fs::write(
            dir.path().join("client.json"),
            serde_json::json!({
                "client_id": "c",
                "client_secret": "s",
                "auth_uri": "https://accounts.example.com/auth",
                "token_uri": "https://oauth2.example.com/token",
            })
            .to_string(),
        )
        .unwrap();

        let pipeline = Arc::new(BackupPipeline::with_remote_store(
            config,
            Arc::new(StuckStore),
        ));

        // Occupy the pipeline with a manual job stuck in its upload
        let mut manual = BackupRequest::new(&source);
        manual.upload = true;
        let handle = pipeline.submit(manual).unwrap();
        wait_until("manual job to occupy the pipeline", || pipeline.is_busy());

        let schedule = ScheduleConfig::new(&source, "02:00");
        let scheduler =
            Scheduler::start(pipeline.clone(), schedule, None, TEST_POLL).unwrap();

        force_due(&scheduler);
        wait_until("tick to be skipped", || scheduler.skipped_count() == 1);
        assert_eq!(scheduler.fired_count(), 0);

        // The in-progress job was not disturbed
        assert!(pipeline.is_busy());
        handle.cancel();
        let job = handle.wait().unwrap();
        assert!(job.archive_path.unwrap().exists());
    }

    #[test]
    fn test_disable_stops_loop_and_disarms() {
        let dir = tempfile::tempdir().unwrap();
        let source = source_tree(dir.path());
        let pipeline = Arc::new(BackupPipeline::new(SatchelConfig::rooted_at(dir.path())));

        let schedule = ScheduleConfig::new(&source, "02:00");
        let mut scheduler = Scheduler::start(pipeline, schedule, None, TEST_POLL).unwrap();
        assert!(scheduler.is_armed());

        scheduler.disable();
        assert!(!scheduler.is_armed());
        assert!(scheduler.worker.is_none());
    }
}
