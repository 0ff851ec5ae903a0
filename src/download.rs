//! Download engine: serve a whole versioned file with digest headers, or a
//! single byte-range chunk as an opaque stream.

use crate::digest;
use crate::error::{Error, Result, ResultIoExt};
use crate::models::{format_extension, HashKind, LogicalFile};
use crate::paths::PathResolver;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;

/// What the HTTP layer turns into a response
#[derive(Debug)]
pub enum DownloadPayload {
    Whole {
        data: Vec<u8>,
        mime: &'static str,
        file_name: String,
        digest: (HashKind, String),
    },
    Chunk {
        data: Vec<u8>,
    },
}

pub struct DownloadEngine {
    resolver: PathResolver,
    default_hash: HashKind,
}

impl DownloadEngine {
    pub fn new(resolver: PathResolver, default_hash: HashKind) -> Self {
        DownloadEngine {
            resolver,
            default_hash,
        }
    }

    /// Serve the logical file. When both `chunk_size` and `chunk_index` are
    /// given, return that single byte range without digest headers; otherwise
    /// return the whole file with its MIME type and digest headers, computed
    /// with the requested algorithm or the configured default.
    pub async fn download(
        &self,
        file: &LogicalFile,
        hash_type: Option<HashKind>,
        chunk_size: Option<u64>,
        chunk_index: Option<u64>,
    ) -> Result<DownloadPayload> {
        // an ill-formed tuple is reported as 404 with a diagnostic that
        // distinguishes it from a file that is simply not on disk
        let path = match self.resolver.resolve(file) {
            Ok(Some(path)) => path,
            Ok(None) => {
                return Err(Error::NotFound {
                    msg: "bad or incomplete path metadata".to_string(),
                });
            }
            Err(Error::Validation { msg }) => {
                return Err(Error::NotFound {
                    msg: format!("bad or incomplete path metadata: {}", msg),
                });
            }
            Err(e) => return Err(e),
        };
        if !path.exists() {
            return Err(Error::NotFound {
                msg: format!(
                    "requested file path does not exist: {}",
                    self.resolver.relative_to_root(&path)?
                ),
            });
        }

        if let (Some(chunk_size), Some(chunk_index)) = (chunk_size, chunk_index) {
            let data = read_chunk(path, chunk_size, chunk_index).await?;
            return Ok(DownloadPayload::Chunk { data });
        }

        let kind = hash_type.unwrap_or(self.default_hash);
        let digest_path = path.clone();
        let hex =
            tokio::task::spawn_blocking(move || digest::hash_file(&digest_path, kind))
                .await
                .map_err(|e| Error::Integrity {
                    msg: format!("digest task failed: {}", e),
                })??;
        let digest = (kind, hex);

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let data = tokio::fs::read(&path).await.map_io_err(&path)?;

        Ok(DownloadPayload::Whole {
            data,
            mime: mime_type(&file.content_format),
            file_name,
            digest,
        })
    }
}

async fn read_chunk(path: PathBuf, chunk_size: u64, chunk_index: u64) -> Result<Vec<u8>> {
    tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
        let mut file = std::fs::File::open(&path).map_io_err(&path)?;
        file.seek(SeekFrom::Start(chunk_index.saturating_mul(chunk_size)))
            .map_io_err(&path)?;
        let mut data = Vec::with_capacity(chunk_size as usize);
        file.take(chunk_size).read_to_end(&mut data).map_io_err(&path)?;
        Ok(data)
    })
    .await
    .map_err(|e| Error::Validation {
        msg: format!("chunk read task failed: {}", e),
    })?
}

/// MIME type derived from the content format's on-disk extension
pub fn mime_type(content_format: &str) -> &'static str {
    let ext = format_extension(content_format).unwrap_or(content_format);
    match ext {
        "cif" => "chemical/x-mmcif",
        "pdf" => "application/pdf",
        "xml" => "application/xml",
        "json" => "application/json",
        "txt" => "text/plain",
        "pic" => "application/python-pickle",
        _ => "text/plain",
    }
}
