//! Daily backup schedule configuration with TOML support
//!
//! At most one schedule is active per process. The schedule stores the
//! last-confirmed job settings so an unattended run needs no user input;
//! the archive password is deliberately not part of it and must be
//! supplied in memory when the schedule is armed.

use crate::validation::validate_time_format;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for the recurring daily backup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Whether the schedule is armed
    pub enabled: bool,

    /// Time of day the backup fires (HH:MM, 24-hour, local time)
    pub time: String,

    /// Folder to archive on every run
    pub source_path: PathBuf,

    /// Archive destination; `None` selects the default location
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_dir: Option<PathBuf>,

    /// Protect scheduled archives with a password
    #[serde(default)]
    pub encrypt: bool,

    /// Upload scheduled archives to remote storage
    #[serde(default)]
    pub upload: bool,
}

impl ScheduleConfig {
    pub fn new(source_path: impl Into<PathBuf>, time: impl Into<String>) -> Self {
        Self {
            enabled: true,
            time: time.into(),
            source_path: source_path.into(),
            destination_dir: None,
            encrypt: false,
            upload: false,
        }
    }

    /// Validate this schedule configuration
    pub fn validate(&self) -> Result<(), String> {
        validate_time_format(&self.time)?;

        if !self.source_path.is_absolute() {
            return Err(format!(
                "Schedule source path must be absolute, got '{}'",
                self.source_path.display()
            ));
        }

        if let Some(ref dest) = self.destination_dir {
            if !dest.is_absolute() {
                return Err(format!(
                    "Schedule destination must be absolute, got '{}'",
                    dest.display()
                ));
            }
        }

        Ok(())
    }

    /// The configured hour and minute, assuming `validate` passed
    pub fn hour_minute(&self) -> (u32, u32) {
        let mut parts = self.time.split(':');
        let hour = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        let minute = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        (hour, minute)
    }

    /// Load a schedule from a TOML file
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ScheduleConfig = toml::from_str(&content)?;
        config.validate().map_err(|e| anyhow::anyhow!(e))?;
        Ok(config)
    }

    /// Save the schedule to a TOML file
    pub fn save_to_file(&self, path: &Path) -> anyhow::Result<()> {
        self.validate().map_err(|e| anyhow::anyhow!(e))?;

        let content = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Compute the next occurrence of `hour:minute` strictly after `now`.
///
/// A schedule armed at exactly its firing time waits for the next day;
/// a run missed while the process was down is not made up.
pub fn next_occurrence(
    now: chrono::NaiveDateTime,
    hour: u32,
    minute: u32,
) -> chrono::NaiveDateTime {
    let today_target = now
        .date()
        .and_hms_opt(hour, minute, 0)
        .expect("validated hour/minute");

    if today_target > now {
        today_target
    } else {
        today_target + chrono::Duration::days(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 14)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_next_occurrence_later_today() {
        let next = next_occurrence(at(1, 30, 0), 2, 0);
        assert_eq!(next, at(2, 0, 0));
    }

    #[test]
    fn test_next_occurrence_rolls_to_tomorrow() {
        let next = next_occurrence(at(2, 30, 0), 2, 0);
        assert_eq!(next, at(2, 0, 0) + chrono::Duration::days(1));
    }

    #[test]
    fn test_next_occurrence_at_exact_time_waits_a_day() {
        let next = next_occurrence(at(2, 0, 0), 2, 0);
        assert_eq!(next, at(2, 0, 0) + chrono::Duration::days(1));
    }

    #[test]
    fn test_validate_accepts_sane_config() {
        let config = ScheduleConfig::new("/data/photos", "02:00");
        assert!(config.validate().is_ok());
        assert_eq!(config.hour_minute(), (2, 0));
    }

    #[test]
    fn test_validate_rejects_bad_time() {
        let mut config = ScheduleConfig::new("/data/photos", "25:00");
        assert!(config.validate().is_err());

        config.time = "2:00".to_string(); // not zero-padded
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_relative_source() {
        let config = ScheduleConfig::new("photos", "02:00");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schedule.toml");

        let mut config = ScheduleConfig::new("/data/photos", "02:00");
        config.upload = true;
        config.save_to_file(&path).unwrap();

        let loaded = ScheduleConfig::load_from_file(&path).unwrap();
        assert!(loaded.enabled);
        assert_eq!(loaded.time, "02:00");
        assert_eq!(loaded.source_path, PathBuf::from("/data/photos"));
        assert!(loaded.upload);
        assert!(!loaded.encrypt);
    }

    #[test]
    fn test_save_rejects_invalid_schedule() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schedule.toml");

        let config = ScheduleConfig::new("/data/photos", "99:99");
        assert!(config.save_to_file(&path).is_err());
        assert!(!path.exists());
    }
}
