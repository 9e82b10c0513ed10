// Centralized configuration for Satchel

use std::path::PathBuf;

/// Satchel configuration with support for environment variable overrides
#[derive(Debug, Clone)]
pub struct SatchelConfig {
    /// Directory holding schedule and credential files
    /// (default: ~/.config/satchel)
    pub config_dir: PathBuf,

    /// Default directory for archives when a job does not name one
    /// (default: ~/.local/share/satchel/backups)
    pub default_destination_dir: PathBuf,

    /// Path to the persisted remote-storage credential
    pub credential_file: PathBuf,

    /// Path to the operator-supplied client identity document
    pub client_secret_file: PathBuf,

    /// Path to the schedule TOML
    pub schedule_file: PathBuf,

    /// How often the scheduler compares wall-clock time, in seconds
    pub scheduler_poll_secs: u64,
}

impl Default for SatchelConfig {
    fn default() -> Self {
        let config_dir = dirs::config_dir()
            .map(|dir| dir.join("satchel"))
            .unwrap_or_else(|| PathBuf::from("/tmp/satchel"));

        let default_destination_dir = dirs::data_local_dir()
            .map(|dir| dir.join("satchel").join("backups"))
            .unwrap_or_else(|| PathBuf::from("/tmp/satchel/backups"));

        Self {
            credential_file: config_dir.join("token.json"),
            client_secret_file: config_dir.join("client.json"),
            schedule_file: config_dir.join("schedule.toml"),
            config_dir,
            default_destination_dir,
            scheduler_poll_secs: 60,
        }
    }
}

impl SatchelConfig {
    /// Create a new configuration with environment variable overrides
    ///
    /// Supported environment variables:
    /// - SATCHEL_CONFIG_DIR: Override the configuration directory
    ///   (credential, client identity, and schedule files follow unless
    ///   individually overridden)
    /// - SATCHEL_DESTINATION_DIR: Override the default archive destination
    /// - SATCHEL_CREDENTIAL_FILE: Override the credential file path
    /// - SATCHEL_CLIENT_SECRET_FILE: Override the client identity path
    /// - SATCHEL_SCHEDULE_FILE: Override the schedule file path
    /// - SATCHEL_SCHEDULER_POLL_SECS: Override the scheduler poll interval
    pub fn new() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("SATCHEL_CONFIG_DIR") {
            let dir = PathBuf::from(dir);
            config.credential_file = dir.join("token.json");
            config.client_secret_file = dir.join("client.json");
            config.schedule_file = dir.join("schedule.toml");
            config.config_dir = dir;
        }

        if let Ok(dir) = std::env::var("SATCHEL_DESTINATION_DIR") {
            config.default_destination_dir = PathBuf::from(dir);
        }

        if let Ok(file) = std::env::var("SATCHEL_CREDENTIAL_FILE") {
            config.credential_file = PathBuf::from(file);
        }

        if let Ok(file) = std::env::var("SATCHEL_CLIENT_SECRET_FILE") {
            config.client_secret_file = PathBuf::from(file);
        }

        if let Ok(file) = std::env::var("SATCHEL_SCHEDULE_FILE") {
            config.schedule_file = PathBuf::from(file);
        }

        if let Ok(secs) = std::env::var("SATCHEL_SCHEDULER_POLL_SECS") {
            if let Ok(secs) = secs.parse::<u64>() {
                if secs > 0 {
                    config.scheduler_poll_secs = secs;
                }
            }
        }

        config
    }

    /// Point every path into `dir`; used by tests and one-off runs
    pub fn rooted_at(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            credential_file: dir.join("token.json"),
            client_secret_file: dir.join("client.json"),
            schedule_file: dir.join("schedule.toml"),
            default_destination_dir: dir.join("backups"),
            config_dir: dir,
            scheduler_poll_secs: 60,
        }
    }
}
