//! Validation helpers shared by the engine and the CLI
//!
//! These are cheap, filesystem-free checks; the preflight checker in the
//! engine does the expensive work (size scan, free-space comparison).

use crate::job::BackupRequest;

/// Validate a time string in zero-padded HH:MM 24-hour format
pub fn validate_time_format(time: &str) -> Result<(), String> {
    let parts: Vec<&str> = time.split(':').collect();
    if parts.len() != 2 || parts[0].len() != 2 || parts[1].len() != 2 {
        return Err(format!(
            "Invalid time '{time}'. Expected zero-padded HH:MM (e.g. 02:00)"
        ));
    }

    let hours: u32 = parts[0]
        .parse()
        .map_err(|_| format!("Invalid hours in '{time}'"))?;
    let minutes: u32 = parts[1]
        .parse()
        .map_err(|_| format!("Invalid minutes in '{time}'"))?;

    if hours > 23 {
        return Err(format!("Hours must be 00-23, got {hours:02}"));
    }
    if minutes > 59 {
        return Err(format!("Minutes must be 00-59, got {minutes:02}"));
    }

    Ok(())
}

/// Validate the shape of a backup request before any work begins
///
/// Checks only what can be decided without touching the filesystem:
/// absolute paths and the encrypt/password pairing.
pub fn validate_request(request: &BackupRequest) -> Result<(), String> {
    if !request.source_path.is_absolute() {
        return Err(format!(
            "Source path must be absolute, got '{}'",
            request.source_path.display()
        ));
    }

    if let Some(ref dest) = request.destination_dir {
        if !dest.is_absolute() {
            return Err(format!(
                "Destination must be absolute, got '{}'",
                dest.display()
            ));
        }
    }

    match (&request.password, request.encrypt) {
        (None, true) => Err("Encryption requested but no password supplied".to_string()),
        (Some(p), true) if p.is_empty() => Err("Archive password cannot be empty".to_string()),
        (Some(_), false) => Err("Password supplied but encryption not requested".to_string()),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secret::Secret;

    #[test]
    fn test_time_format() {
        assert!(validate_time_format("00:00").is_ok());
        assert!(validate_time_format("02:00").is_ok());
        assert!(validate_time_format("23:59").is_ok());
        assert!(validate_time_format("24:00").is_err());
        assert!(validate_time_format("12:60").is_err());
        assert!(validate_time_format("2:00").is_err());
        assert!(validate_time_format("02:0").is_err());
        assert!(validate_time_format("0200").is_err());
        assert!(validate_time_format("02:00:00").is_err());
    }

    #[test]
    fn test_request_requires_absolute_source() {
        let request = BackupRequest::new("photos");
        assert!(validate_request(&request).is_err());

        let request = BackupRequest::new("/data/photos");
        assert!(validate_request(&request).is_ok());
    }

    #[test]
    fn test_encrypt_requires_password() {
        let mut request = BackupRequest::new("/data/photos");
        request.encrypt = true;
        assert!(validate_request(&request).is_err());

        request.password = Some(Secret::new(""));
        assert!(validate_request(&request).is_err());

        request.password = Some(Secret::new("p@ss"));
        assert!(validate_request(&request).is_ok());
    }

    #[test]
    fn test_password_without_encrypt_is_rejected() {
        let mut request = BackupRequest::new("/data/photos");
        request.password = Some(Secret::new("p@ss"));
        assert!(validate_request(&request).is_err());
    }
}
