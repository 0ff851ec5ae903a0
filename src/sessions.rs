//! Session maintenance for one upload: durable progress for resumable
//! sessions, the temp file and placeholder conventions, and the bulk sweep
//! that reclaims state left behind by interrupted clients.

use crate::config::Config;
use crate::error::{Error, Result, ResultIoExt};
use crate::kv::Kv;
use crate::models::LogicalFile;
use crate::paths::PathResolver;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Session field recording the negotiated chunk size; progress is
/// reconstructed from the temp file size divided by this value
pub const CHUNK_SIZE_FIELD: &str = "chunkSize";

/// Zero-byte marker file in the session directory. Its name encodes which
/// temp file and KV rows belong to the session, and its mtime defines the
/// session's age for the sweeper.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionMarker {
    pub repository_type: String,
    pub dep_id: String,
    pub upload_id: String,
}

impl SessionMarker {
    /// Parse a placeholder file name: `{repoType}~{depId}~{uploadId}`
    pub fn parse(file_name: &str) -> Option<Self> {
        let mut tokens = file_name.split('~');
        let repository_type = tokens.next()?.to_string();
        let dep_id = tokens.next()?.to_string();
        let upload_id = tokens.next()?.to_string();
        if tokens.next().is_some()
            || repository_type.is_empty()
            || dep_id.is_empty()
            || upload_id.is_empty()
        {
            return None;
        }
        Some(SessionMarker {
            repository_type,
            dep_id,
            upload_id,
        })
    }

    pub fn file_name(&self) -> String {
        format!("{}~{}~{}", self.repository_type, self.dep_id, self.upload_id)
    }

    /// Derive the marker from the temp file's location:
    /// `{repoRoot}/{repoType}/{depId}/._{uploadId}`
    pub fn from_temp_path(temp_path: &Path) -> Result<Self> {
        let name = temp_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::Validation {
                msg: "temp path has no file name".to_string(),
            })?;
        let upload_id = name.trim_start_matches('.').trim_start_matches('_');
        let dep_id = temp_path
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str());
        let repository_type = temp_path
            .parent()
            .and_then(|p| p.parent())
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str());
        match (repository_type, dep_id) {
            (Some(repository_type), Some(dep_id)) => Ok(SessionMarker {
                repository_type: repository_type.to_string(),
                dep_id: dep_id.to_string(),
                upload_id: upload_id.to_string(),
            }),
            _ => Err(Error::Validation {
                msg: format!("temp path too shallow: {}", temp_path.display()),
            }),
        }
    }
}

/// In-place temp file beside the eventual target: `._{uploadId}`
pub fn temp_file_path(dir: &Path, upload_id: &str) -> PathBuf {
    dir.join(format!("._{}", upload_id))
}

pub struct SessionStore {
    kv: Arc<dyn Kv>,
    resolver: PathResolver,
    session_dir: PathBuf,
    max_age: Duration,
}

impl SessionStore {
    pub fn new(config: &Config, kv: Arc<dyn Kv>, resolver: PathResolver) -> Self {
        SessionStore {
            kv,
            resolver,
            session_dir: config.storage.session_dir.clone(),
            max_age: Duration::from_secs(config.kv.max_seconds),
        }
    }

    /// Opaque 128-bit identifier for one upload attempt
    pub fn new_upload_id() -> String {
        Uuid::new_v4().simple().to_string()
    }

    /// Open a session: a resumable request first looks for an active
    /// session bound to the same target file, otherwise a fresh id is minted
    pub async fn open(&self, file: &LogicalFile, resumable: bool) -> Result<String> {
        if resumable {
            if let Some(upload_id) = self.find_resumed(file).await? {
                tracing::info!(upload_id, "resuming session");
                return Ok(upload_id);
            }
        }
        Ok(Self::new_upload_id())
    }

    /// Look up the active upload id for a logical file via the Map table
    pub async fn find_resumed(&self, file: &LogicalFile) -> Result<Option<String>> {
        match self.map_key(file)? {
            Some(key) => self.kv.get_map(&key).await,
            None => Ok(None),
        }
    }

    /// Map key bound to the resolved versioned file name:
    /// `{repositoryType}_{filename}`
    pub fn map_key(&self, file: &LogicalFile) -> Result<Option<String>> {
        let Some(path) = self.resolver.resolve(file)? else {
            return Ok(None);
        };
        Ok(Some(Self::map_key_for_path(&file.repository_type, &path)))
    }

    /// Map key when the versioned path is already known
    pub fn map_key_for_path(repository_type: &str, versioned_path: &Path) -> String {
        let filename = versioned_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!("{}_{}", repository_type, filename)
    }

    /// Chunk index to resume at: temp file size divided by the recorded
    /// chunk size, zero when the temp file is absent
    pub async fn chunk_progress(&self, dir: &Path, upload_id: &str) -> Result<u64> {
        let Some(raw) = self.kv.get_session_field(upload_id, CHUNK_SIZE_FIELD).await? else {
            return Ok(0);
        };
        let chunk_size: u64 = raw.parse().map_err(|_| Error::Kv {
            msg: format!("corrupt chunkSize for session {}: {}", upload_id, raw),
        })?;
        if chunk_size == 0 {
            return Ok(0);
        }
        let temp_path = temp_file_path(dir, upload_id);
        match tokio::fs::metadata(&temp_path).await {
            Ok(meta) => Ok(meta.len() / chunk_size),
            Err(_) => Ok(0),
        }
    }

    pub async fn record_chunk_size(&self, upload_id: &str, chunk_size: u64) -> Result<()> {
        self.kv
            .set_session_field(upload_id, CHUNK_SIZE_FIELD, &chunk_size.to_string())
            .await
    }

    pub async fn bind_map_entry(&self, map_key: &str, upload_id: &str) -> Result<()> {
        self.kv.set_map(map_key, upload_id).await
    }

    pub fn placeholder_path(&self, temp_path: &Path) -> Result<PathBuf> {
        let marker = SessionMarker::from_temp_path(temp_path)?;
        Ok(self.session_dir.join(marker.file_name()))
    }

    /// Created when the first chunk is accepted; the single source of truth
    /// for the sweeper
    pub async fn make_placeholder(&self, temp_path: &Path) -> Result<()> {
        let placeholder = self.placeholder_path(temp_path)?;
        if let Some(parent) = placeholder.parent() {
            tokio::fs::create_dir_all(parent).await.map_io_err(parent)?;
        }
        if !placeholder.exists() {
            tokio::fs::write(&placeholder, b"").await.map_io_err(&placeholder)?;
        }
        Ok(())
    }

    pub async fn remove_placeholder(&self, temp_path: &Path) {
        match self.placeholder_path(temp_path) {
            Ok(placeholder) => {
                if let Err(e) = tokio::fs::remove_file(&placeholder).await {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        tracing::warn!(path = %placeholder.display(), error = %e,
                            "could not remove placeholder file");
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "could not derive placeholder path"),
        }
    }

    /// Remove the temp file and placeholder; for resumable sessions also the
    /// Sessions row and the Map entry. Runs on success and error paths alike.
    pub async fn close(
        &self,
        temp_path: &Path,
        resumable: bool,
        map_key: Option<&str>,
        upload_id: &str,
    ) -> Result<()> {
        if let Err(e) = tokio::fs::remove_file(temp_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %temp_path.display(), error = %e,
                    "could not remove temp file");
            }
        }
        self.remove_placeholder(temp_path).await;
        if !resumable {
            return Ok(());
        }
        self.kv.clear_session(upload_id).await?;
        match map_key {
            Some(key) => {
                self.kv.clear_map_key(key).await?;
            }
            None => {
                self.kv.clear_map_value(upload_id).await?;
            }
        }
        Ok(())
    }

    /// Sweep placeholders older than `max_age` (the configured session age
    /// when `None`, everything when zero), removing the temp file, KV rows
    /// and the placeholder itself. Returns the number of sessions removed.
    pub async fn sweep(&self, max_age: Option<Duration>) -> Result<usize> {
        let max_age = max_age.unwrap_or(self.max_age);
        if !self.session_dir.exists() {
            return Ok(0);
        }
        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.session_dir)
            .await
            .map_io_err(&self.session_dir)?;
        while let Some(entry) = entries.next_entry().await.map_io_err(&self.session_dir)? {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(marker) = SessionMarker::parse(&name) else {
                tracing::warn!(name, "unrecognized file in session directory");
                continue;
            };
            if !max_age.is_zero() {
                let age = entry
                    .metadata()
                    .await
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .and_then(|m| m.elapsed().ok());
                if age.is_some_and(|age| age < max_age) {
                    continue;
                }
            }
            tracing::info!(session = name, "clearing expired session");
            if !self.kv.clear_session(&marker.upload_id).await.unwrap_or(false) {
                tracing::debug!(
                    upload_id = marker.upload_id,
                    "no session row; upload may not have been resumable"
                );
            }
            let _ = self.kv.clear_map_value(&marker.upload_id).await;
            if let Ok(dir) = self
                .resolver
                .dir_path(&marker.repository_type, &marker.dep_id)
            {
                let temp_path = temp_file_path(&dir, &marker.upload_id);
                if let Err(e) = tokio::fs::remove_file(&temp_path).await {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        tracing::warn!(path = %temp_path.display(), error = %e,
                            "could not remove temp file");
                    }
                }
            }
            if let Err(e) = tokio::fs::remove_file(&path).await {
                tracing::warn!(path = %path.display(), error = %e,
                    "could not remove placeholder file");
            } else {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
