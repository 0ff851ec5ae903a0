//! File-management operations over the repository path convention: copy and
//! move between logical files, directory bundling and the post-upload
//! decompression step.

use crate::error::{Error, Result, ResultIoExt};
use crate::models::LogicalFile;
use crate::paths::PathResolver;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Expand one gzip frame held in memory (wire-compressed chunks)
pub fn gunzip_bytes(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).map_err(|e| Error::Validation {
        msg: format!("could not decompress chunk: {}", e),
    })?;
    Ok(out)
}

/// Compress a byte buffer into one gzip frame (client-side helper)
pub fn gzip_bytes(data: &[u8]) -> Result<Vec<u8>> {
    use std::io::Write;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).map_err(|e| Error::Validation {
        msg: format!("could not compress chunk: {}", e),
    })?;
    encoder.finish().map_err(|e| Error::Validation {
        msg: format!("could not compress chunk: {}", e),
    })
}

/// Decompress an uploaded file in place: rename the target to carry its
/// original extension, expand it back under the target name and drop the
/// compressed copy. An extension containing a second dot is ambiguous; the
/// upload fails and the file is removed.
pub async fn decompress_in_place(target: &Path, extension: &str) -> Result<()> {
    let extension = extension.trim_start_matches('.');
    if extension.contains('.') {
        let _ = tokio::fs::remove_file(target).await;
        return Err(Error::Validation {
            msg: "error - double file extension - could not decompress".to_string(),
        });
    }
    let compressed = PathBuf::from(format!("{}.{}", target.display(), extension));
    tokio::fs::rename(target, &compressed)
        .await
        .map_io_err(&compressed)?;

    let src = compressed.clone();
    let dst = target.to_path_buf();
    let expanded = tokio::task::spawn_blocking(move || -> Result<()> {
        let input = std::fs::File::open(&src).map_io_err(&src)?;
        let mut decoder = GzDecoder::new(std::io::BufReader::new(input));
        let mut output = std::fs::File::create(&dst).map_io_err(&dst)?;
        std::io::copy(&mut decoder, &mut output).map_err(|e| Error::Validation {
            msg: format!("could not decompress {}: {}", src.display(), e),
        })?;
        Ok(())
    })
    .await
    .map_err(|e| Error::Validation {
        msg: format!("decompression task failed: {}", e),
    });

    match expanded {
        Ok(Ok(())) => {
            tokio::fs::remove_file(&compressed)
                .await
                .map_io_err(&compressed)?;
            Ok(())
        }
        Ok(Err(e)) | Err(e) => {
            // leave no partial expansion behind
            let _ = tokio::fs::remove_file(target).await;
            let _ = tokio::fs::remove_file(&compressed).await;
            Err(e)
        }
    }
}

/// Copy one versioned file to another logical location
pub async fn copy_file(
    resolver: &PathResolver,
    source: &LogicalFile,
    target: &LogicalFile,
) -> Result<String> {
    let source_path = resolve_existing(resolver, source)?;
    let target_path = resolver.resolve(target)?.ok_or_else(|| Error::Validation {
        msg: "could not make target path from parameters".to_string(),
    })?;
    if let Some(parent) = target_path.parent() {
        tokio::fs::create_dir_all(parent).await.map_io_err(parent)?;
    }
    tracing::info!(
        source = %source_path.display(),
        target = %target_path.display(),
        "copying file"
    );
    tokio::fs::copy(&source_path, &target_path)
        .await
        .map_io_err(&target_path)?;
    resolver.relative_to_root(&target_path)
}

/// Move one versioned file to another logical location
pub async fn move_file(
    resolver: &PathResolver,
    source: &LogicalFile,
    target: &LogicalFile,
    overwrite: bool,
) -> Result<String> {
    let source_path = resolve_existing(resolver, source)?;
    let target_path = resolver.resolve(target)?.ok_or_else(|| Error::Validation {
        msg: "could not make target path from parameters".to_string(),
    })?;
    if target_path.exists() && !overwrite {
        return Err(Error::OverwriteProhibited {
            path: resolver.relative_to_root(&target_path)?,
        });
    }
    if let Some(parent) = target_path.parent() {
        tokio::fs::create_dir_all(parent).await.map_io_err(parent)?;
    }
    tokio::fs::rename(&source_path, &target_path)
        .await
        .map_io_err(&target_path)?;
    resolver.relative_to_root(&target_path)
}

/// Recursively copy a whole deposit directory
pub async fn copy_dir(
    resolver: &PathResolver,
    source_repository: &str,
    source_dep: &str,
    target_repository: &str,
    target_dep: &str,
) -> Result<()> {
    let source = resolver.dir_path(source_repository, source_dep)?;
    if !source.exists() {
        return Err(Error::NotFound {
            msg: format!("source directory does not exist: {}/{}", source_repository, source_dep),
        });
    }
    let target = resolver.dir_path(target_repository, target_dep)?;
    tokio::task::spawn_blocking(move || copy_tree(&source, &target))
        .await
        .map_err(|e| Error::Validation {
            msg: format!("copy task failed: {}", e),
        })?
}

fn copy_tree(source: &Path, target: &Path) -> Result<()> {
    std::fs::create_dir_all(target).map_io_err(target)?;
    for entry in std::fs::read_dir(source).map_io_err(source)? {
        let entry = entry.map_io_err(source)?;
        let from = entry.path();
        let to = target.join(entry.file_name());
        if from.is_dir() {
            copy_tree(&from, &to)?;
        } else {
            std::fs::copy(&from, &to).map_io_err(&to)?;
        }
    }
    Ok(())
}

/// Create the deposit directory (and parents)
pub async fn make_dirs(resolver: &PathResolver, repository_type: &str, dep_id: &str) -> Result<PathBuf> {
    let dir = resolver.dir_path(repository_type, dep_id)?;
    tokio::fs::create_dir_all(&dir).await.map_io_err(&dir)?;
    Ok(dir)
}

/// Bundle a deposit directory into `{dir}.tar.gz` and remove the original
pub async fn compress_dir(
    resolver: &PathResolver,
    repository_type: &str,
    dep_id: &str,
) -> Result<PathBuf> {
    let dir = resolver.dir_path(repository_type, dep_id)?;
    if !dir.exists() {
        return Err(Error::NotFound {
            msg: format!("requested directory does not exist: {}/{}", repository_type, dep_id),
        });
    }
    let bundle = PathBuf::from(format!("{}.tar.gz", dir.display()));
    let dep_name = dep_id.to_string();
    let dir_clone = dir.clone();
    let bundle_clone = bundle.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let output = std::fs::File::create(&bundle_clone).map_io_err(&bundle_clone)?;
        let encoder = GzEncoder::new(output, Compression::default());
        let mut tar = tar::Builder::new(encoder);
        tar.append_dir_all(&dep_name, &dir_clone)
            .map_io_err(&dir_clone)?;
        tar.into_inner()
            .and_then(|encoder| encoder.finish())
            .map_io_err(&bundle_clone)?;
        Ok(())
    })
    .await
    .map_err(|e| Error::Validation {
        msg: format!("compression task failed: {}", e),
    })??;

    tokio::fs::remove_dir_all(&dir).await.map_io_err(&dir)?;
    tracing::info!(bundle = %bundle.display(), "compressed deposit directory");
    Ok(bundle)
}

/// Expand a previously bundled `{dir}.tar.gz` back into the repository and
/// remove the bundle
pub async fn decompress_dir(
    resolver: &PathResolver,
    repository_type: &str,
    dep_id: &str,
) -> Result<PathBuf> {
    let dir = resolver.dir_path(repository_type, dep_id)?;
    let bundle = PathBuf::from(format!("{}.tar.gz", dir.display()));
    if !bundle.exists() {
        return Err(Error::NotFound {
            msg: format!("no compressed bundle for {}/{}", repository_type, dep_id),
        });
    }
    let parent = dir
        .parent()
        .ok_or_else(|| Error::Validation {
            msg: "deposit directory has no parent".to_string(),
        })?
        .to_path_buf();
    let bundle_clone = bundle.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let input = std::fs::File::open(&bundle_clone).map_io_err(&bundle_clone)?;
        let decoder = GzDecoder::new(std::io::BufReader::new(input));
        let mut archive = tar::Archive::new(decoder);
        archive.unpack(&parent).map_io_err(&parent)?;
        Ok(())
    })
    .await
    .map_err(|e| Error::Validation {
        msg: format!("decompression task failed: {}", e),
    })??;

    tokio::fs::remove_file(&bundle).await.map_io_err(&bundle)?;
    Ok(dir)
}

fn resolve_existing(resolver: &PathResolver, file: &LogicalFile) -> Result<PathBuf> {
    let path = resolver.resolve(file)?.ok_or_else(|| Error::NotFound {
        msg: "source file path could not be resolved".to_string(),
    })?;
    if !path.exists() {
        return Err(Error::NotFound {
            msg: format!("source file does not exist: {}", resolver.relative_to_root(&path)?),
        });
    }
    Ok(path)
}
