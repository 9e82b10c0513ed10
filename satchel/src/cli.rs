use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Satchel - archive a folder, optionally encrypt it and upload it to
/// remote storage
#[derive(Parser)]
#[command(name = "satchel")]
#[command(about = "Folder backup with optional encryption, cloud upload, and daily scheduling")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one backup now
    Backup {
        /// Folder to archive
        source: PathBuf,

        /// Where to write the archive (defaults to the data directory)
        #[arg(short, long)]
        destination: Option<PathBuf>,

        /// Protect the archive with a password (prompted, or
        /// SATCHEL_PASSWORD)
        #[arg(short, long)]
        encrypt: bool,

        /// Upload the finished archive to remote storage
        #[arg(short, long)]
        upload: bool,
    },

    /// Run the saved daily schedule in the foreground
    Watch,

    /// Manage the daily schedule
    Schedule {
        #[command(subcommand)]
        action: ScheduleCommands,
    },

    /// Run the interactive remote-storage authorization
    Auth,
}

#[derive(Subcommand)]
pub enum ScheduleCommands {
    /// Create or replace the daily schedule
    Set {
        /// Folder to archive on every run
        source: PathBuf,

        /// Time of day to run (HH:MM, 24-hour, local time)
        #[arg(short, long, default_value = "02:00")]
        time: String,

        /// Where to write archives (defaults to the data directory)
        #[arg(short, long)]
        destination: Option<PathBuf>,

        /// Protect scheduled archives with a password
        #[arg(short, long)]
        encrypt: bool,

        /// Upload scheduled archives to remote storage
        #[arg(short, long)]
        upload: bool,
    },

    /// Arm the saved schedule
    Enable,

    /// Disarm the saved schedule
    Disable,

    /// Show the saved schedule
    Show,
}
