//! Credential store for remote uploads
//!
//! Owns the two authorization artifacts: the operator-supplied client
//! identity document (`client.json`) and the persisted refresh-capable
//! credential (`token.json`). Nothing outside this module ever sees the
//! raw credential; the rest of the engine works with a short-lived
//! [`AccessToken`].

use crate::error::CredentialError;
use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use satchel_common::{SatchelConfig, Secret};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Leeway subtracted from the recorded expiry so a token is refreshed
/// before it actually lapses mid-upload
const EXPIRY_LEEWAY_SECS: i64 = 60;

static HTTP: Lazy<reqwest::blocking::Client> = Lazy::new(|| {
    reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .expect("default HTTP client")
});

/// Provider-issued client identity, supplied by the operator out-of-band
///
/// Accepts both the flat form and the provider's wrapped
/// `{"installed": {...}}` download format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientIdentity {
    pub client_id: String,
    pub client_secret: String,
    pub auth_uri: String,
    pub token_uri: String,
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
    #[serde(default = "default_scope")]
    pub scope: String,
}

fn default_redirect_uri() -> String {
    "urn:ietf:wg:oauth:2.0:oob".to_string()
}

fn default_scope() -> String {
    "https://www.googleapis.com/auth/drive.file".to_string()
}

impl ClientIdentity {
    /// Parse a client identity document, unwrapping the provider's
    /// `installed` envelope when present
    pub fn from_json(raw: &str) -> Result<Self, CredentialError> {
        #[derive(Deserialize)]
        struct Wrapped {
            installed: ClientIdentity,
        }

        if let Ok(wrapped) = serde_json::from_str::<Wrapped>(raw) {
            return Ok(wrapped.installed);
        }

        serde_json::from_str(raw).map_err(|e| CredentialError::Invalid(e.to_string()))
    }
}

/// The persisted credential; never leaves this module
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCredential {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl StoredCredential {
    /// Whether the access token is still usable at `now`
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(EXPIRY_LEEWAY_SECS) < self.expires_at
    }

    pub fn is_refreshable(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

/// A short-lived bearer token handed to the upload client
#[derive(Debug, Clone)]
pub struct AccessToken {
    secret: Secret,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// The bearer value for the Authorization header
    pub fn bearer(&self) -> &str {
        self.secret.reveal()
    }
}

/// Interactive authorization flow, implemented by the frontend
///
/// The engine never talks to a user; when no usable credential exists it
/// fails with [`CredentialError::AuthorizationRequired`] and the caller
/// decides whether an `Authorizer` can be run.
pub trait Authorizer {
    fn authorize(&self, client: &ClientIdentity) -> Result<StoredCredential, CredentialError>;
}

/// Shape of the provider's token endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

impl TokenResponse {
    fn into_credential(self, previous_refresh: Option<String>) -> StoredCredential {
        StoredCredential {
            access_token: self.access_token,
            // The provider may omit the refresh token on renewal
            refresh_token: self.refresh_token.or(previous_refresh),
            expires_at: Utc::now() + Duration::seconds(self.expires_in),
        }
    }
}

/// Loads, refreshes, and persists the remote-storage credential
pub struct CredentialStore {
    client_file: PathBuf,
    token_file: PathBuf,
}

impl CredentialStore {
    pub fn new(config: &SatchelConfig) -> Self {
        Self {
            client_file: config.client_secret_file.clone(),
            token_file: config.credential_file.clone(),
        }
    }

    /// Load the operator-supplied client identity document.
    ///
    /// Its absence is a configuration error, reported before any upload
    /// is attempted.
    pub fn client_identity(&self) -> Result<ClientIdentity, CredentialError> {
        if !self.client_file.exists() {
            return Err(CredentialError::BootstrapMissing(self.client_file.clone()));
        }
        let raw = std::fs::read_to_string(&self.client_file)?;
        ClientIdentity::from_json(&raw)
    }

    /// Produce a usable access token, refreshing the persisted credential
    /// if it has expired.
    ///
    /// Never interactive: a missing or irrecoverably expired credential
    /// is an error for the caller to act on.
    pub fn access_token(&self) -> Result<AccessToken, CredentialError> {
        let credential = match self.load()? {
            Some(credential) => credential,
            None => return Err(CredentialError::AuthorizationRequired),
        };

        if credential.is_valid_at(Utc::now()) {
            return Ok(self.token_of(&credential));
        }

        if !credential.is_refreshable() {
            return Err(CredentialError::Expired);
        }

        log::info!("stored credential expired, refreshing");
        let client = self.client_identity()?;
        let refreshed = refresh_credential(&client, &credential)?;
        self.persist(&refreshed)?;
        Ok(self.token_of(&refreshed))
    }

    /// Run the given interactive flow and persist the resulting credential
    pub fn authorize_interactive(
        &self,
        authorizer: &dyn Authorizer,
    ) -> Result<(), CredentialError> {
        let client = self.client_identity()?;
        let credential = authorizer.authorize(&client)?;
        self.persist(&credential)?;
        log::info!("authorization complete, credential stored");
        Ok(())
    }

    /// Whether a persisted credential exists (says nothing about validity)
    pub fn has_credential(&self) -> bool {
        self.token_file.exists()
    }

    fn token_of(&self, credential: &StoredCredential) -> AccessToken {
        AccessToken {
            secret: Secret::new(credential.access_token.clone()),
            expires_at: credential.expires_at,
        }
    }

    fn load(&self) -> Result<Option<StoredCredential>, CredentialError> {
        if !self.token_file.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&self.token_file)?;
        let credential =
            serde_json::from_str(&raw).map_err(|e| CredentialError::Invalid(e.to_string()))?;
        Ok(Some(credential))
    }

    fn persist(&self, credential: &StoredCredential) -> Result<(), CredentialError> {
        if let Some(parent) = self.token_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(credential)
            .map_err(|e| CredentialError::Invalid(e.to_string()))?;
        std::fs::write(&self.token_file, raw)?;
        restrict_permissions(&self.token_file)?;
        Ok(())
    }
}

/// Renew an expired credential against the provider token endpoint
fn refresh_credential(
    client: &ClientIdentity,
    credential: &StoredCredential,
) -> Result<StoredCredential, CredentialError> {
    let refresh_token = credential
        .refresh_token
        .as_deref()
        .ok_or(CredentialError::Expired)?;

    let params = [
        ("client_id", client.client_id.as_str()),
        ("client_secret", client.client_secret.as_str()),
        ("refresh_token", refresh_token),
        ("grant_type", "refresh_token"),
    ];

    let response = HTTP
        .post(&client.token_uri)
        .form(&params)
        .send()
        .map_err(|e| CredentialError::Http(e.to_string()))?;

    let status = response.status();
    if status.is_client_error() {
        // Revoked or otherwise rejected refresh token: only a fresh
        // interactive authorization can recover
        return Err(CredentialError::Expired);
    }
    if !status.is_success() {
        return Err(CredentialError::Http(format!(
            "token endpoint returned HTTP {status}"
        )));
    }

    let token: TokenResponse = response
        .json()
        .map_err(|e| CredentialError::Http(e.to_string()))?;
    Ok(token.into_credential(credential.refresh_token.clone()))
}

/// Exchange an authorization code for a credential; used by interactive
/// flows after the user approves access
pub fn exchange_authorization_code(
    client: &ClientIdentity,
    code: &str,
) -> Result<StoredCredential, CredentialError> {
    let params = [
        ("client_id", client.client_id.as_str()),
        ("client_secret", client.client_secret.as_str()),
        ("redirect_uri", client.redirect_uri.as_str()),
        ("code", code),
        ("grant_type", "authorization_code"),
    ];

    let response = HTTP
        .post(&client.token_uri)
        .form(&params)
        .send()
        .map_err(|e| CredentialError::Http(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(CredentialError::Http(format!(
            "code exchange failed with HTTP {status}"
        )));
    }

    let token: TokenResponse = response
        .json()
        .map_err(|e| CredentialError::Http(e.to_string()))?;
    Ok(token.into_credential(None))
}

/// Build the URL a user must visit to approve access
pub fn authorization_url(client: &ClientIdentity) -> String {
    format!(
        "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline",
        client.auth_uri,
        urlencode(&client.client_id),
        urlencode(&client.redirect_uri),
        urlencode(&client.scope),
    )
}

fn urlencode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &Path) -> CredentialStore {
        CredentialStore::new(&SatchelConfig::rooted_at(dir))
    }

    fn credential(expires_at: DateTime<Utc>, refresh: Option<&str>) -> StoredCredential {
        StoredCredential {
            access_token: "token-value".to_string(),
            refresh_token: refresh.map(|r| r.to_string()),
            expires_at,
        }
    }

    #[test]
    fn test_validity_respects_leeway() {
        let now = Utc::now();
        let fresh = credential(now + Duration::hours(1), None);
        assert!(fresh.is_valid_at(now));

        // Inside the leeway window counts as expired
        let nearly = credential(now + Duration::seconds(30), None);
        assert!(!nearly.is_valid_at(now));

        let stale = credential(now - Duration::hours(1), None);
        assert!(!stale.is_valid_at(now));
    }

    #[test]
    fn test_missing_credential_requires_authorization() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        assert!(!store.has_credential());
        assert!(matches!(
            store.access_token(),
            Err(CredentialError::AuthorizationRequired)
        ));
    }

    #[test]
    fn test_valid_credential_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        store
            .persist(&credential(Utc::now() + Duration::hours(1), Some("refresh")))
            .unwrap();
        assert!(store.has_credential());

        let token = store.access_token().unwrap();
        assert_eq!(token.bearer(), "token-value");
    }

    #[cfg(unix)]
    #[test]
    fn test_persisted_credential_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        store
            .persist(&credential(Utc::now(), None))
            .unwrap();

        let mode = std::fs::metadata(dir.path().join("token.json"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_expired_without_refresh_token_is_irrecoverable() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        store
            .persist(&credential(Utc::now() - Duration::hours(1), None))
            .unwrap();

        assert!(matches!(store.access_token(), Err(CredentialError::Expired)));
    }

    #[test]
    fn test_refresh_requires_client_identity() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        store
            .persist(&credential(Utc::now() - Duration::hours(1), Some("refresh")))
            .unwrap();

        // Expired-but-refreshable credential with no bootstrap file:
        // the configuration error wins
        assert!(matches!(
            store.access_token(),
            Err(CredentialError::BootstrapMissing(_))
        ));
    }

    #[test]
    fn test_client_identity_parses_wrapped_form() {
        let raw = r#"{
            "installed": {
                "client_id": "abc.apps.example.com",
                "client_secret": "shhh",
                "auth_uri": "https://accounts.example.com/o/oauth2/auth",
                "token_uri": "https://oauth2.example.com/token"
            }
        }"#;
        let client = ClientIdentity::from_json(raw).unwrap();
        assert_eq!(client.client_id, "abc.apps.example.com");
        assert_eq!(client.scope, default_scope());
    }

    #[test]
    fn test_client_identity_parses_flat_form() {
        let raw = r#"{
            "client_id": "abc",
            "client_secret": "shhh",
            "auth_uri": "https://accounts.example.com/auth",
            "token_uri": "https://oauth2.example.com/token",
            "scope": "storage.readwrite"
        }"#;
        let client = ClientIdentity::from_json(raw).unwrap();
        assert_eq!(client.scope, "storage.readwrite");
        assert_eq!(client.redirect_uri, default_redirect_uri());
    }

    #[test]
    fn test_malformed_client_identity_is_invalid() {
        assert!(matches!(
            ClientIdentity::from_json("{\"nope\": true}"),
            Err(CredentialError::Invalid(_))
        ));
    }

    #[test]
    fn test_token_response_keeps_previous_refresh_token() {
        let response = TokenResponse {
            access_token: "new-token".to_string(),
            refresh_token: None,
            expires_in: 3600,
        };
        let credential = response.into_credential(Some("old-refresh".to_string()));
        assert_eq!(credential.refresh_token.as_deref(), Some("old-refresh"));
        assert!(credential.is_valid_at(Utc::now()));
    }

    #[test]
    fn test_authorization_url_encodes_parameters() {
        let client = ClientIdentity {
            client_id: "abc def".to_string(),
            client_secret: "shhh".to_string(),
            auth_uri: "https://accounts.example.com/auth".to_string(),
            token_uri: "https://oauth2.example.com/token".to_string(),
            redirect_uri: default_redirect_uri(),
            scope: default_scope(),
        };
        let url = authorization_url(&client);
        assert!(url.starts_with("https://accounts.example.com/auth?client_id=abc%20def"));
        assert!(url.contains("scope=https%3A%2F%2F"));
        assert!(!url.contains("shhh"));
    }
}
