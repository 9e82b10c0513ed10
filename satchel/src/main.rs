// Satchel CLI - the frontend of the backup pipeline
// Parses trigger input, submits it to the engine, and renders the
// reported event stream; all real work happens in satchel-engine.

mod authorize;
mod cli;

use anyhow::{Context, Result, bail};
use clap::Parser;
use cli::{Cli, Commands, ScheduleCommands};
use satchel_common::schedule::next_occurrence;
use satchel_common::{
    BackupJob, BackupRequest, JobStatus, SatchelConfig, ScheduleConfig, Secret, format_bytes,
};
use satchel_engine::credentials::CredentialStore;
use satchel_engine::pipeline::{BackupPipeline, JobHandle, PipelineEvent};
use satchel_engine::scheduler::Scheduler;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(err) = run() {
        log::error!("{err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = SatchelConfig::new();

    match cli.command {
        Commands::Backup {
            source,
            destination,
            encrypt,
            upload,
        } => cmd_backup(config, source, destination, encrypt, upload),
        Commands::Watch => cmd_watch(config),
        Commands::Schedule { action } => cmd_schedule(config, action),
        Commands::Auth => cmd_auth(config),
    }
}

fn cmd_backup(
    config: SatchelConfig,
    source: PathBuf,
    destination: Option<PathBuf>,
    encrypt: bool,
    upload: bool,
) -> Result<()> {
    let password = if encrypt {
        Some(obtain_password()?)
    } else {
        None
    };

    let request = BackupRequest {
        source_path: absolutize(source)?,
        destination_dir: destination.map(absolutize).transpose()?,
        encrypt,
        password,
        upload,
    };

    let pipeline = BackupPipeline::new(config);
    let handle = pipeline
        .submit(request)
        .context("could not start the backup")?;

    let job = render_events(handle)?;
    report_outcome(&job)
}

fn cmd_watch(config: SatchelConfig) -> Result<()> {
    let schedule = ScheduleConfig::load_from_file(&config.schedule_file).with_context(|| {
        format!(
            "no usable schedule at {}; create one with 'satchel schedule set'",
            config.schedule_file.display()
        )
    })?;
    if !schedule.enabled {
        bail!("the schedule is disabled; arm it with 'satchel schedule enable'");
    }

    let password = if schedule.encrypt {
        Some(obtain_password()?)
    } else {
        None
    };

    let poll = Duration::from_secs(config.scheduler_poll_secs);
    let pipeline = Arc::new(BackupPipeline::new(config));
    let mut scheduler = Scheduler::start(pipeline, schedule, password, poll)
        .map_err(|e| anyhow::anyhow!(e))?;

    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || {
        handler_stop.store(true, Ordering::SeqCst);
    })
    .context("could not install the interrupt handler")?;

    log::info!("watching; press Ctrl-C to stop");
    while !stop.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(500));
    }

    scheduler.disable();
    Ok(())
}

fn cmd_schedule(config: SatchelConfig, action: ScheduleCommands) -> Result<()> {
    match action {
        ScheduleCommands::Set {
            source,
            time,
            destination,
            encrypt,
            upload,
        } => {
            let mut schedule = ScheduleConfig::new(absolutize(source)?, time);
            schedule.destination_dir = destination.map(absolutize).transpose()?;
            schedule.encrypt = encrypt;
            schedule.upload = upload;
            schedule.save_to_file(&config.schedule_file)?;
            log::info!(
                "schedule saved to {}; next run {}",
                config.schedule_file.display(),
                next_run_of(&schedule)
            );
            Ok(())
        }
        ScheduleCommands::Enable => {
            let mut schedule = ScheduleConfig::load_from_file(&config.schedule_file)?;
            schedule.enabled = true;
            schedule.save_to_file(&config.schedule_file)?;
            log::info!("schedule armed; next run {}", next_run_of(&schedule));
            Ok(())
        }
        ScheduleCommands::Disable => {
            let mut schedule = ScheduleConfig::load_from_file(&config.schedule_file)?;
            schedule.enabled = false;
            schedule.save_to_file(&config.schedule_file)?;
            log::info!("schedule disarmed");
            Ok(())
        }
        ScheduleCommands::Show => {
            let schedule = ScheduleConfig::load_from_file(&config.schedule_file)?;
            println!("source:      {}", schedule.source_path.display());
            println!(
                "destination: {}",
                schedule
                    .destination_dir
                    .as_ref()
                    .map(|d| d.display().to_string())
                    .unwrap_or_else(|| "(default)".to_string())
            );
            println!("time:        {} daily", schedule.time);
            println!("encrypt:     {}", schedule.encrypt);
            println!("upload:      {}", schedule.upload);
            println!(
                "state:       {}",
                if schedule.enabled { "armed" } else { "disabled" }
            );
            if schedule.enabled {
                println!("next run:    {}", next_run_of(&schedule));
            }
            Ok(())
        }
    }
}

fn cmd_auth(config: SatchelConfig) -> Result<()> {
    let store = CredentialStore::new(&config);
    store
        .authorize_interactive(&authorize::ConsoleAuthorizer)
        .context("authorization failed")?;
    println!("Authorization complete; uploads are ready to go.");
    Ok(())
}

/// Drain the pipeline's event stream into log output
fn render_events(handle: JobHandle) -> Result<BackupJob> {
    let mut last_logged = -10.0f64;

    while let Some(event) = handle.next_event() {
        match event {
            PipelineEvent::Status { status, detail } => {
                log::info!("{status}: {detail}");
            }
            PipelineEvent::Progress {
                bytes_done,
                bytes_total,
                percent,
                ..
            } => {
                // Log every ten percent rather than every member
                if percent - last_logged >= 10.0 || percent >= 100.0 {
                    log::info!(
                        "progress: {percent:.0}% ({} / {})",
                        format_bytes(bytes_done),
                        format_bytes(bytes_total)
                    );
                    last_logged = percent;
                }
            }
            PipelineEvent::Warning(warning) => log::warn!("{warning}"),
            PipelineEvent::Finished(job) => return Ok(job),
        }
    }

    bail!("the backup worker ended without reporting a result")
}

fn report_outcome(job: &BackupJob) -> Result<()> {
    match job.status {
        JobStatus::Completed => {
            if let Some(path) = &job.archive_path {
                println!("Backup complete: {}", path.display());
            }
            if let Some(remote) = &job.remote_ref {
                println!("Uploaded as remote object {remote}");
            }
            Ok(())
        }
        _ => {
            let reason = job.error.as_deref().unwrap_or("unknown error");
            bail!("backup failed: {reason}")
        }
    }
}

/// Archive password from the environment, or prompted on the terminal
fn obtain_password() -> Result<Secret> {
    if let Ok(value) = std::env::var("SATCHEL_PASSWORD") {
        if !value.is_empty() {
            return Ok(Secret::new(value));
        }
    }

    let password =
        rpassword::prompt_password("Archive password: ").context("could not read the password")?;
    if password.is_empty() {
        bail!("a password is required for an encrypted backup");
    }
    Ok(Secret::new(password))
}

fn absolutize(path: PathBuf) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path)
    } else {
        let cwd = std::env::current_dir().context("could not resolve the working directory")?;
        Ok(cwd.join(path))
    }
}

fn next_run_of(schedule: &ScheduleConfig) -> chrono::NaiveDateTime {
    let (hour, minute) = schedule.hour_minute();
    next_occurrence(chrono::Local::now().naive_local(), hour, minute)
}
