//! Upload client for remote storage
//!
//! The pipeline only knows the [`RemoteStore`] capability; the default
//! implementation targets a Drive-style HTTP API with resumable upload
//! sessions. Transfers run in chunks so a transient disconnect resumes
//! from the last committed byte instead of starting over, and the store
//! replaces an existing remote object of the same name rather than
//! creating duplicates.

use crate::credentials::AccessToken;
use crate::error::UploadError;
use satchel_common::{format_bytes, format_duration};
use serde::Deserialize;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Upload chunk size; the session protocol requires a multiple of 256 KiB
const CHUNK_SIZE: u64 = 8 * 1024 * 1024;

/// Total attempts per operation, first try included
const MAX_ATTEMPTS: u32 = 4;

/// Base delay for exponential backoff between attempts
const BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Reference to the uploaded remote object
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteRef {
    pub id: String,
    pub name: String,
}

/// Capability interface the pipeline uploads through
///
/// Keeping this to two methods means an alternate remote backend can be
/// substituted without touching the orchestrator.
pub trait RemoteStore: Send + Sync {
    fn name(&self) -> &str;

    /// Transfer the archive as a single remote object.
    ///
    /// `on_progress` receives (bytes_sent, bytes_total) after every
    /// committed chunk; `cancel` is checked between chunks.
    fn upload(
        &self,
        archive: &Path,
        token: &AccessToken,
        cancel: &AtomicBool,
        on_progress: &mut dyn FnMut(u64, u64),
    ) -> Result<RemoteRef, UploadError>;
}

/// Drive-style remote storage over resumable HTTP sessions
pub struct DriveStore {
    api_base: String,
    upload_base: String,
    /// Remote folder to place archives in; root when unset
    folder_id: Option<String>,
    client: reqwest::blocking::Client,
}

impl DriveStore {
    pub fn new(folder_id: Option<String>) -> Self {
        Self {
            api_base: "https://www.googleapis.com/drive/v3".to_string(),
            upload_base: "https://www.googleapis.com/upload/drive/v3".to_string(),
            folder_id,
            client: reqwest::blocking::Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .expect("default HTTP client"),
        }
    }

    /// Look up an existing remote object with this archive name
    fn find_existing(&self, name: &str, token: &AccessToken) -> Result<Option<String>, UploadError> {
        #[derive(Deserialize)]
        struct FileList {
            #[serde(default)]
            files: Vec<RemoteRef>,
        }

        let query = format!("name = '{}' and trashed = false", escape_query_value(name));
        let response = self
            .client
            .get(format!("{}/files", self.api_base))
            .bearer_auth(token.bearer())
            .query(&[("q", query.as_str()), ("fields", "files(id,name)")])
            .send()
            .map_err(|e| UploadError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let list: FileList = response
            .json()
            .map_err(|e| UploadError::Network(e.to_string()))?;
        Ok(list.files.into_iter().next().map(|f| f.id))
    }

    /// Open a resumable upload session, replacing `existing` when given
    fn start_session(
        &self,
        name: &str,
        existing: Option<&str>,
        total: u64,
        token: &AccessToken,
    ) -> Result<String, UploadError> {
        let request = match existing {
            // Overwrite semantics keyed by archive name: a retried upload
            // of the same archive never duplicates the remote object
            Some(id) => self
                .client
                .patch(format!(
                    "{}/files/{id}?uploadType=resumable",
                    self.upload_base
                ))
                .json(&serde_json::json!({})),
            None => {
                let mut metadata = serde_json::json!({ "name": name });
                if let Some(folder) = &self.folder_id {
                    metadata["parents"] = serde_json::json!([folder]);
                }
                self.client
                    .post(format!("{}/files?uploadType=resumable", self.upload_base))
                    .json(&metadata)
            }
        };

        let response = request
            .bearer_auth(token.bearer())
            .header("X-Upload-Content-Length", total)
            .send()
            .map_err(|e| UploadError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .ok_or_else(|| UploadError::Remote {
                status,
                message: "upload session response had no Location header".to_string(),
            })
    }

    /// Ask the session how much it has committed so far
    fn probe_session(
        &self,
        session_url: &str,
        total: u64,
        token: &AccessToken,
    ) -> Result<SessionState, UploadError> {
        let response = self
            .client
            .put(session_url)
            .bearer_auth(token.bearer())
            .header(reqwest::header::CONTENT_RANGE, format!("bytes */{total}"))
            .body(Vec::new())
            .send()
            .map_err(|e| UploadError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        if status == 308 {
            let committed = parse_committed(
                response
                    .headers()
                    .get(reqwest::header::RANGE)
                    .and_then(|v| v.to_str().ok()),
            );
            return Ok(SessionState::Committed(committed));
        }
        if response.status().is_success() {
            let remote: RemoteRef = response
                .json()
                .map_err(|e| UploadError::Network(e.to_string()))?;
            return Ok(SessionState::Done(remote));
        }

        let body = response.text().unwrap_or_default();
        Err(classify_status(status, &body))
    }

    fn send_chunks(
        &self,
        archive: &Path,
        session_url: &str,
        total: u64,
        token: &AccessToken,
        cancel: &AtomicBool,
        on_progress: &mut dyn FnMut(u64, u64),
    ) -> Result<RemoteRef, UploadError> {
        let mut file = File::open(archive)?;
        let mut offset = 0u64;
        let mut failures = 0u32;

        loop {
            if cancel.load(Ordering::Relaxed) {
                return Err(UploadError::Cancelled);
            }

            if offset >= total {
                // Everything is committed but the session never answered
                // with the final object; ask it directly
                return match self.probe_session(session_url, total, token)? {
                    SessionState::Done(remote) => {
                        on_progress(total, total);
                        Ok(remote)
                    }
                    SessionState::Committed(_) => Err(UploadError::Network(
                        "session incomplete after final chunk".to_string(),
                    )),
                };
            }

            let len = CHUNK_SIZE.min(total - offset);
            file.seek(SeekFrom::Start(offset))?;
            let mut chunk = vec![0u8; len as usize];
            file.read_exact(&mut chunk)?;

            let result = self
                .client
                .put(session_url)
                .bearer_auth(token.bearer())
                .header(
                    reqwest::header::CONTENT_RANGE,
                    content_range(offset, offset + len - 1, total),
                )
                .body(chunk)
                .send();

            let recovering = match result {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if status == 308 {
                        let committed = parse_committed(
                            response
                                .headers()
                                .get(reqwest::header::RANGE)
                                .and_then(|v| v.to_str().ok()),
                        );
                        // Trust the session's committed count; a missing
                        // Range header means the whole chunk landed
                        offset = if committed > 0 { committed } else { offset + len };
                        failures = 0;
                        on_progress(offset.min(total), total);
                        continue;
                    }
                    if response.status().is_success() {
                        on_progress(total, total);
                        return response
                            .json()
                            .map_err(|e| UploadError::Network(e.to_string()));
                    }
                    let body = response.text().unwrap_or_default();
                    let err = classify_status(status, &body);
                    if !err.is_transient() {
                        return Err(err);
                    }
                    err
                }
                Err(e) => UploadError::Network(e.to_string()),
            };

            // Transient failure: back off, then ask the session where to
            // resume instead of re-sending from our own guess
            failures += 1;
            if failures >= MAX_ATTEMPTS {
                return Err(recovering);
            }
            let delay = backoff_delay(failures, BACKOFF_BASE);
            log::warn!(
                "chunk at {} failed ({recovering}), retrying in {} ({failures}/{})",
                format_bytes(offset),
                format_duration(delay),
                MAX_ATTEMPTS - 1
            );
            std::thread::sleep(delay);

            match self.probe_session(session_url, total, token) {
                Ok(SessionState::Committed(committed)) => offset = committed,
                Ok(SessionState::Done(remote)) => {
                    on_progress(total, total);
                    return Ok(remote);
                }
                Err(probe_err) if probe_err.is_transient() => {
                    log::debug!("session probe failed, keeping offset {offset}: {probe_err}");
                }
                Err(probe_err) => return Err(probe_err),
            }
        }
    }
}

enum SessionState {
    Committed(u64),
    Done(RemoteRef),
}

impl RemoteStore for DriveStore {
    fn name(&self) -> &str {
        "drive"
    }

    fn upload(
        &self,
        archive: &Path,
        token: &AccessToken,
        cancel: &AtomicBool,
        on_progress: &mut dyn FnMut(u64, u64),
    ) -> Result<RemoteRef, UploadError> {
        let file_name = archive
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| UploadError::Remote {
                status: 0,
                message: format!("archive path has no file name: {}", archive.display()),
            })?;
        let total = std::fs::metadata(archive)?.len();
        if total == 0 {
            return Err(UploadError::Remote {
                status: 0,
                message: "archive is empty".to_string(),
            });
        }

        log::info!(
            "uploading {} ({}) to {}",
            file_name,
            format_bytes(total),
            self.name()
        );

        let existing = with_retries("remote lookup", cancel, || {
            self.find_existing(&file_name, token)
        })?;
        if let Some(id) = &existing {
            log::info!("replacing existing remote object {id}");
        }

        let session_url = with_retries("upload session", cancel, || {
            self.start_session(&file_name, existing.as_deref(), total, token)
        })?;

        let remote = self.send_chunks(archive, &session_url, total, token, cancel, on_progress)?;
        log::info!("upload complete: {} (id {})", remote.name, remote.id);
        Ok(remote)
    }
}

/// Retry a short operation on transient failures with bounded backoff
fn with_retries<T>(
    what: &str,
    cancel: &AtomicBool,
    mut op: impl FnMut() -> Result<T, UploadError>,
) -> Result<T, UploadError> {
    let mut attempt = 1;
    loop {
        if cancel.load(Ordering::Relaxed) {
            return Err(UploadError::Cancelled);
        }
        match op() {
            Err(err) if err.is_transient() && attempt < MAX_ATTEMPTS => {
                let delay = backoff_delay(attempt, BACKOFF_BASE);
                log::warn!(
                    "{what} failed ({err}), retrying in {} ({attempt}/{})",
                    format_duration(delay),
                    MAX_ATTEMPTS - 1
                );
                std::thread::sleep(delay);
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// Delay before retry `attempt` (1-based): base, 2*base, 4*base, ...
fn backoff_delay(attempt: u32, base: Duration) -> Duration {
    base * 2u32.pow(attempt.saturating_sub(1).min(4))
}

/// Map an HTTP status to the upload error taxonomy
fn classify_status(status: u16, body: &str) -> UploadError {
    match status {
        401 => UploadError::AuthRejected { status },
        403 => {
            if body.to_ascii_lowercase().contains("quota") {
                UploadError::QuotaExceeded
            } else {
                UploadError::AuthRejected { status }
            }
        }
        507 => UploadError::QuotaExceeded,
        429 => UploadError::Network(format!("rate limited (HTTP {status})")),
        s if s >= 500 => UploadError::Network(format!("server error (HTTP {status})")),
        _ => UploadError::Remote {
            status,
            message: body.chars().take(200).collect(),
        },
    }
}

/// Content-Range header value for one chunk
fn content_range(start: u64, end: u64, total: u64) -> String {
    format!("bytes {start}-{end}/{total}")
}

/// Bytes committed so far from a session's Range header
/// (e.g. `bytes=0-8388607` means 8388608 bytes are safe)
fn parse_committed(range: Option<&str>) -> u64 {
    let Some(range) = range else { return 0 };
    range
        .rsplit('-')
        .next()
        .and_then(|last| last.trim().parse::<u64>().ok())
        .map(|end| end + 1)
        .unwrap_or(0)
}

/// Escape a value for embedding in a files.list query
fn escape_query_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_auth_and_quota() {
        assert!(matches!(
            classify_status(401, ""),
            UploadError::AuthRejected { status: 401 }
        ));
        assert!(matches!(
            classify_status(403, "insufficient permissions"),
            UploadError::AuthRejected { status: 403 }
        ));
        assert!(matches!(
            classify_status(403, "The user's Drive storage QUOTA has been exceeded"),
            UploadError::QuotaExceeded
        ));
        assert!(matches!(classify_status(507, ""), UploadError::QuotaExceeded));
    }

    #[test]
    fn test_classify_transient() {
        assert!(classify_status(429, "").is_transient());
        assert!(classify_status(500, "").is_transient());
        assert!(classify_status(503, "").is_transient());
        assert!(!classify_status(400, "bad request").is_transient());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let base = Duration::from_millis(100);
        assert_eq!(backoff_delay(1, base), Duration::from_millis(100));
        assert_eq!(backoff_delay(2, base), Duration::from_millis(200));
        assert_eq!(backoff_delay(3, base), Duration::from_millis(400));
        // Never grows past 16x base regardless of attempt count
        assert_eq!(backoff_delay(30, base), Duration::from_millis(1600));
    }

    #[test]
    fn test_content_range() {
        assert_eq!(content_range(0, 8_388_607, 20_000_000), "bytes 0-8388607/20000000");
        assert_eq!(content_range(10, 19, 20), "bytes 10-19/20");
    }

    #[test]
    fn test_parse_committed() {
        assert_eq!(parse_committed(Some("bytes=0-8388607")), 8_388_608);
        assert_eq!(parse_committed(Some("bytes=0-0")), 1);
        assert_eq!(parse_committed(None), 0);
        assert_eq!(parse_committed(Some("garbage")), 0);
    }

    #[test]
    fn test_escape_query_value() {
        assert_eq!(escape_query_value("plain.zip"), "plain.zip");
        assert_eq!(escape_query_value("it's.zip"), "it\\'s.zip");
        assert_eq!(escape_query_value("back\\slash"), "back\\\\slash");
    }

    #[test]
    fn test_with_retries_recovers_from_transient_errors() {
        let cancel = AtomicBool::new(false);
        let mut calls = 0;
        let result: Result<u32, UploadError> = with_retries("test", &cancel, || {
            calls += 1;
            if calls < 3 {
                Err(UploadError::Network("flaky".to_string()))
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_with_retries_fails_fast_on_terminal_errors() {
        let cancel = AtomicBool::new(false);
        let mut calls = 0;
        let result: Result<(), UploadError> = with_retries("test", &cancel, || {
            calls += 1;
            Err(UploadError::QuotaExceeded)
        });
        assert!(matches!(result, Err(UploadError::QuotaExceeded)));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_with_retries_respects_cancellation() {
        let cancel = AtomicBool::new(true);
        let mut calls = 0;
        let result: Result<(), UploadError> = with_retries("test", &cancel, || {
            calls += 1;
            Ok(())
        });
        assert!(matches!(result, Err(UploadError::Cancelled)));
        assert_eq!(calls, 0);
    }
}
