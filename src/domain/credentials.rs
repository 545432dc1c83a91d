//! Usage: Per-identity credential files (`<tokens_dir>/<email>.json`).
//!
//! One file per authenticated account. The directory listing is the source of truth for
//! which identities exist; nothing is cached in memory.

use crate::shared::error::{AppError, AppResult, NO_CREDENTIALS};
use crate::shared::security::mask_token;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

const CREDENTIAL_FILE_EXT: &str = "json";
const TMP_FILE_SUFFIX: &str = "tmp";
const MAX_IDENTITY_LEN: usize = 254;

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CredentialRecord {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    pub token_uri: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Absolute expiry of `access_token` in unix seconds; `None` when the provider did not say.
    #[serde(default)]
    pub expires_at: Option<i64>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl std::fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("access_token", &mask_token(&self.access_token))
            .field("refresh_token", &mask_token(&self.refresh_token))
            .field("token_type", &self.token_type)
            .field("token_uri", &self.token_uri)
            .field("client_id", &self.client_id)
            .field("client_secret", &mask_token(&self.client_secret))
            .field("scopes", &self.scopes)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Trim and lower-case an identity, rejecting anything that is not a plain email address.
pub fn normalize_identity(raw: &str) -> AppResult<String> {
    let identity = raw.trim().to_ascii_lowercase();
    if identity.is_empty() {
        return Err("SEC_INVALID_INPUT: account identity is required".into());
    }
    if identity.len() > MAX_IDENTITY_LEN {
        return Err(format!(
            "SEC_INVALID_INPUT: account identity is too long ({} bytes)",
            identity.len()
        )
        .into());
    }
    if identity.starts_with('.')
        || identity.contains("..")
        || identity
            .chars()
            .any(|c| c == '/' || c == '\\' || c.is_whitespace() || c.is_control())
    {
        return Err(format!("SEC_INVALID_INPUT: invalid account identity {identity:?}").into());
    }

    let mut parts = identity.split('@');
    let (Some(local), Some(domain), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(format!("SEC_INVALID_INPUT: {identity:?} is not an email address").into());
    };
    if local.is_empty() || domain.is_empty() || domain.starts_with('.') || domain.ends_with('.')
    {
        return Err(format!("SEC_INVALID_INPUT: {identity:?} is not an email address").into());
    }

    Ok(identity)
}

#[derive(Debug, Clone)]
pub struct CredentialStore {
    dir: PathBuf,
}

impl CredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, identity: &str) -> PathBuf {
        self.dir.join(format!("{identity}.{CREDENTIAL_FILE_EXT}"))
    }

    pub fn contains(&self, identity: &str) -> AppResult<bool> {
        let identity = normalize_identity(identity)?;
        Ok(self.record_path(&identity).is_file())
    }

    pub fn load(&self, identity: &str) -> AppResult<CredentialRecord> {
        let identity = normalize_identity(identity)?;
        let path = self.record_path(&identity);

        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(AppError::new(
                    NO_CREDENTIALS,
                    format!("no stored credentials for {identity}"),
                ));
            }
            Err(err) => {
                return Err(AppError::with_source(
                    "STORE_DECODE_ERROR",
                    format!("failed to read credentials for {identity} ({})", path.display()),
                    err,
                ));
            }
        };

        serde_json::from_slice::<CredentialRecord>(&bytes).map_err(|err| {
            AppError::with_source(
                "STORE_DECODE_ERROR",
                format!(
                    "credentials for {identity} are corrupt ({}); remove the file and sign in again",
                    path.display()
                ),
                err,
            )
        })
    }

    /// Write (or overwrite) the record for `identity`. The file is replaced atomically and
    /// readable by the owner only.
    pub fn save(&self, identity: &str, record: &CredentialRecord) -> AppResult<()> {
        let identity = normalize_identity(identity)?;
        let bytes = serde_json::to_vec_pretty(record)
            .map_err(|e| format!("SYSTEM_ERROR: failed to serialize credentials: {e}"))?;

        std::fs::create_dir_all(&self.dir).map_err(|e| {
            AppError::with_source(
                "STORE_IO_ERROR",
                format!("failed to create credential dir {}", self.dir.display()),
                e,
            )
        })?;
        restrict_dir_permissions(&self.dir);

        let path = self.record_path(&identity);
        write_file_atomic(&path, &bytes).map_err(|e| {
            AppError::with_source(
                "STORE_IO_ERROR",
                format!("failed to write credentials for {identity} ({})", path.display()),
                e,
            )
        })?;

        tracing::debug!(identity = %identity, "credentials saved");
        Ok(())
    }

    /// Remove the record for `identity`. Returns `false` when there was nothing to remove.
    pub fn delete(&self, identity: &str) -> AppResult<bool> {
        let identity = normalize_identity(identity)?;
        let path = self.record_path(&identity);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::info!(identity = %identity, "credentials removed");
                Ok(true)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(AppError::with_source(
                "STORE_IO_ERROR",
                format!("failed to remove credentials for {identity} ({})", path.display()),
                err,
            )),
        }
    }

    /// Identities with a credential file, sorted. A missing directory means no accounts.
    pub fn list_identities(&self) -> AppResult<Vec<String>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(AppError::with_source(
                    "STORE_IO_ERROR",
                    format!("failed to list credential dir {}", self.dir.display()),
                    err,
                ))
            }
        };

        let mut identities = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if path.extension().and_then(|v| v.to_str()) != Some(CREDENTIAL_FILE_EXT) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|v| v.to_str()) else {
                continue;
            };
            match normalize_identity(stem) {
                Ok(identity) if identity == stem => identities.push(identity),
                _ => tracing::debug!(file = %path.display(), "skipping non-credential file"),
            }
        }

        identities.sort();
        identities.dedup();
        Ok(identities)
    }
}

fn write_file_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let file_name = path
        .file_name()
        .and_then(|v| v.to_str())
        .unwrap_or("credentials");
    let tmp_path = path.with_file_name(format!(".{file_name}.{TMP_FILE_SUFFIX}"));

    let result = (|| {
        let mut file = open_owner_only(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);
        std::fs::rename(&tmp_path, path)
    })();

    if result.is_err() {
        let _ = std::fs::remove_file(&tmp_path);
    }
    result
}

#[cfg(unix)]
fn open_owner_only(path: &Path) -> std::io::Result<std::fs::File> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // A stale temp file keeps its old mode; `mode` only applies on creation.
    file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    Ok(file)
}

#[cfg(not(unix))]
fn open_owner_only(path: &Path) -> std::io::Result<std::fs::File> {
    std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}

#[cfg(unix)]
fn restrict_dir_permissions(dir: &Path) {
    use std::os::unix::fs::PermissionsExt;

    if let Err(err) = std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700)) {
        tracing::warn!(dir = %dir.display(), "failed to restrict credential dir permissions: {err}");
    }
}

#[cfg(not(unix))]
fn restrict_dir_permissions(_dir: &Path) {}
