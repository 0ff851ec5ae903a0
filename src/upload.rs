//! Chunked upload engine. `upload_parameters` opens or resumes a session and
//! hands the client a repository-relative target path, the chunk index to
//! start from and the session's upload id; `upload` accepts one chunk per
//! call, appends it to the in-place temp file and, on the final chunk,
//! verifies integrity, serializes finalization under the exclusive path lock
//! and atomically promotes the temp file to its versioned name.

use crate::config::Config;
use crate::error::{Error, Result, ResultIoExt};
use crate::fileops;
use crate::lock::{LockManager, LockMode};
use crate::models::{HashKind, LogicalFile};
use crate::paths::PathResolver;
use crate::sessions::{temp_file_path, SessionStore};
use crate::{digest, models};
use axum::body::Bytes;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use utoipa::ToSchema;

/// Returned by `getUploadParameters`
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadParameters {
    /// Target path relative to the repository root
    pub file_path: String,
    /// Chunk index to start or resume from
    pub chunk_index: u64,
    /// Session identifier to pass with every chunk
    pub upload_id: String,
}

/// One chunk of an upload, parsed from the multipart form
#[derive(Debug)]
pub struct ChunkRequest {
    pub chunk: Bytes,
    pub chunk_size: u64,
    pub chunk_index: u64,
    pub expected_chunks: u64,
    pub upload_id: String,
    pub hash_type: Option<HashKind>,
    pub hash_digest: Option<String>,
    /// Repository-relative target path from `getUploadParameters`
    pub file_path: String,
    pub file_size: Option<u64>,
    pub file_extension: Option<String>,
    pub decompress: bool,
    pub allow_overwrite: bool,
    pub resumable: bool,
    /// Chunk body is a compressed frame to be expanded before append
    pub extract_chunk: bool,
}

pub struct UploadEngine {
    resolver: PathResolver,
    sessions: Arc<SessionStore>,
    locks: Arc<LockManager>,
    dir_mode: u32,
}

impl UploadEngine {
    pub fn new(
        config: &Config,
        resolver: PathResolver,
        sessions: Arc<SessionStore>,
        locks: Arc<LockManager>,
    ) -> Result<Self> {
        Ok(UploadEngine {
            resolver,
            sessions,
            locks,
            dir_mode: config.dir_mode()?,
        })
    }

    /// Validate the logical file, open or resume its session and return the
    /// parameters the client needs to start posting chunks
    pub async fn upload_parameters(
        &self,
        file: &LogicalFile,
        allow_overwrite: bool,
        resumable: bool,
    ) -> Result<UploadParameters> {
        file.validate()?;
        let upload_id = self.sessions.open(file, resumable).await?;

        let target = self.resolver.resolve(file)?.ok_or_else(|| Error::Validation {
            msg: "could not make file path from parameters".to_string(),
        })?;
        if target.exists() && !allow_overwrite {
            return Err(Error::OverwriteProhibited {
                path: self.resolver.relative_to_root(&target)?,
            });
        }
        // clients only ever see the repository-relative form
        let file_path = self.resolver.relative_to_root(&target)?;

        let dir = target.parent().ok_or_else(|| Error::Validation {
            msg: "target path has no parent directory".to_string(),
        })?;
        self.ensure_dir(dir).await?;

        let chunk_index = if resumable {
            let progress = self.sessions.chunk_progress(dir, &upload_id).await?;
            if progress > 0 {
                tracing::info!(upload_id, chunk_index = progress, "resuming upload");
            }
            progress
        } else {
            0
        };

        Ok(UploadParameters {
            file_path,
            chunk_index,
            upload_id,
        })
    }

    /// Accept one sequential chunk. The session is closed on the success and
    /// error paths of the finalization chunk so a failed upload does not leak
    /// a temp file or KV state; the one exception is a lock timeout on a
    /// resumable session, whose accumulated bytes stay recoverable.
    pub async fn upload(&self, request: ChunkRequest) -> Result<()> {
        // a chunk at or past the declared total breaks the serial-chunk
        // contract; reject it before any session state is touched
        if request.expected_chunks == 0 || request.chunk_index >= request.expected_chunks {
            return Err(Error::Protocol {
                msg: format!(
                    "chunk index {} out of range for {} expected chunks",
                    request.chunk_index, request.expected_chunks
                ),
            });
        }

        let target = self.resolver.absolute_from_relative(&request.file_path)?;
        let dir = target
            .parent()
            .ok_or_else(|| Error::Validation {
                msg: "file path has no parent directory".to_string(),
            })?
            .to_path_buf();
        let temp_path = temp_file_path(&dir, &request.upload_id);

        let map_key = if request.resumable {
            let repository_type = repository_type_of(&target)?;
            Some(SessionStore::map_key_for_path(&repository_type, &target))
        } else {
            None
        };

        if request.chunk_index == 0 {
            if request.resumable {
                self.sessions
                    .record_chunk_size(&request.upload_id, request.chunk_size)
                    .await?;
                if let Some(key) = &map_key {
                    self.sessions.bind_map_entry(key, &request.upload_id).await?;
                }
            }
            self.sessions.make_placeholder(&temp_path).await?;
        }

        // an empty payload is a client-side loop overrun; reject it without
        // touching accumulated state
        if request.chunk.is_empty() {
            return Err(Error::Validation {
                msg: "error - empty chunk".to_string(),
            });
        }

        let result = self.append_and_finalize(&request, &target, &temp_path).await;
        match result {
            Ok(finalized) => {
                if finalized {
                    self.sessions
                        .close(
                            &temp_path,
                            request.resumable,
                            map_key.as_deref(),
                            &request.upload_id,
                        )
                        .await?;
                }
                Ok(())
            }
            Err(e) => {
                let keep_session =
                    request.resumable && matches!(e, Error::LockTimeout { .. });
                if !keep_session {
                    if let Err(close_err) = self
                        .sessions
                        .close(
                            &temp_path,
                            request.resumable,
                            map_key.as_deref(),
                            &request.upload_id,
                        )
                        .await
                    {
                        tracing::warn!(
                            upload_id = request.upload_id,
                            error = %close_err,
                            "session cleanup failed after upload error"
                        );
                    }
                }
                Err(e)
            }
        }
    }

    async fn append_and_finalize(
        &self,
        request: &ChunkRequest,
        target: &Path,
        temp_path: &Path,
    ) -> Result<bool> {
        let contents = if request.extract_chunk {
            let compressed = request.chunk.clone();
            tokio::task::spawn_blocking(move || fileops::gunzip_bytes(&compressed))
                .await
                .map_err(|e| Error::Validation {
                    msg: format!("chunk decompression failed: {}", e),
                })??
        } else {
            request.chunk.to_vec()
        };

        append_to_file(temp_path, &contents).await?;

        if request.chunk_index + 1 < request.expected_chunks {
            return Ok(false);
        }

        self.verify_integrity(request, temp_path).await?;

        // serialize finalization across workers and hosts
        let guard = self.locks.acquire(target, LockMode::Exclusive).await?;
        // a competing upload may have landed while this one accumulated
        if target.exists() && !request.allow_overwrite {
            guard.release().await;
            return Err(Error::OverwriteProhibited {
                path: self.resolver.relative_to_root(target)?,
            });
        }
        let renamed = tokio::fs::rename(temp_path, target).await.map_io_err(target);
        guard.release().await;
        renamed?;

        if request.decompress {
            if let Some(extension) = &request.file_extension {
                fileops::decompress_in_place(target, extension).await?;
            }
        }
        Ok(true)
    }

    async fn verify_integrity(&self, request: &ChunkRequest, temp_path: &Path) -> Result<()> {
        if let (Some(hash_type), Some(hash_digest)) = (&request.hash_type, &request.hash_digest) {
            let path = temp_path.to_path_buf();
            let kind = *hash_type;
            let expected = hash_digest.clone();
            let matches = tokio::task::spawn_blocking(move || {
                digest::check_hash(&path, &expected, kind)
            })
            .await
            .map_err(|e| Error::Integrity {
                msg: format!("digest task failed: {}", e),
            })??;
            if !matches {
                return Err(Error::Integrity {
                    msg: format!("{} hash comparison failed", hash_type.as_str()),
                });
            }
            return Ok(());
        }
        if let Some(file_size) = request.file_size {
            let actual = tokio::fs::metadata(temp_path)
                .await
                .map_io_err(temp_path)?
                .len();
            if actual != file_size {
                return Err(Error::Integrity {
                    msg: format!(
                        "file size comparison failed: expected {}, got {}",
                        file_size, actual
                    ),
                });
            }
            return Ok(());
        }
        Err(Error::Validation {
            msg: "error - no hash or file size provided".to_string(),
        })
    }

    async fn ensure_dir(&self, dir: &Path) -> Result<()> {
        if dir.exists() {
            return Ok(());
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            let dir = dir.to_path_buf();
            let mode = self.dir_mode;
            tokio::task::spawn_blocking(move || {
                std::fs::DirBuilder::new()
                    .recursive(true)
                    .mode(mode)
                    .create(&dir)
                    .map_io_err(&dir)
            })
            .await
            .map_err(|e| Error::Validation {
                msg: format!("directory creation failed: {}", e),
            })??;
        }
        #[cfg(not(unix))]
        {
            tokio::fs::create_dir_all(dir).await.map_io_err(dir)?;
        }
        Ok(())
    }
}

/// Repository type component of an absolute target path
fn repository_type_of(target: &Path) -> Result<String> {
    target
        .parent()
        .and_then(|p| p.parent())
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .map(|s| s.to_string())
        .ok_or_else(|| Error::Validation {
            msg: format!("cannot derive repository type from {}", target.display()),
        })
}

async fn append_to_file(path: &Path, contents: &[u8]) -> Result<()> {
    use tokio::io::AsyncWriteExt;
    let mut file = tokio::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .await
        .map_io_err(path)?;
    file.write_all(contents).await.map_io_err(path)?;
    file.flush().await.map_io_err(path)?;
    Ok(())
}

/// Lookup helper shared by the status endpoints: find the active session for
/// a logical file via the Map table
pub async fn find_upload_id(
    sessions: &SessionStore,
    file: &LogicalFile,
) -> Result<Option<String>> {
    file.validate()?;
    sessions.find_resumed(file).await
}

/// Convenience used by the API layer to rebuild a LogicalFile from loose
/// request parameters
pub fn logical_file_from_parts(
    repository_type: String,
    dep_id: String,
    content_type: String,
    milestone: Option<String>,
    part_number: u32,
    content_format: String,
    version: &str,
) -> Result<LogicalFile> {
    Ok(LogicalFile {
        repository_type,
        dep_id,
        content_type,
        milestone: LogicalFile::normalize_milestone(milestone),
        part_number,
        content_format,
        version: models::Version::parse(version)?,
    })
}
