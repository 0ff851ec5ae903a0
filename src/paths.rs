use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{content_type_code, LogicalFile, Version};
use std::path::{Path, PathBuf};

/// Validate a path component to prevent directory traversal attacks
pub fn validate_path_component(component: &str) -> Result<()> {
    if component.is_empty() {
        return Err(Error::Validation {
            msg: "path component cannot be empty".to_string(),
        });
    }
    if component == "." || component == ".." {
        return Err(Error::Validation {
            msg: format!("invalid path component: '{}'", component),
        });
    }
    if component.contains('/') || component.contains('\\') {
        return Err(Error::Validation {
            msg: "path component cannot contain path separators".to_string(),
        });
    }
    if component.contains('\0') || component.contains('~') {
        return Err(Error::Validation {
            msg: "path component contains forbidden characters".to_string(),
        });
    }
    Ok(())
}

/// Pure derivation of repository paths and file names from logical file
/// parameters. Versioned-path resolution touches the filesystem only for
/// symbolic versions, and then only to scan a single deposit directory.
#[derive(Clone)]
pub struct PathResolver {
    repository_dir: PathBuf,
    session_dir: PathBuf,
    shared_lock_dir: PathBuf,
}

impl PathResolver {
    pub fn new(config: &Config) -> Self {
        Self {
            repository_dir: config.storage.repository_dir.clone(),
            session_dir: config.storage.session_dir.clone(),
            shared_lock_dir: config.storage.shared_lock_dir.clone(),
        }
    }

    pub fn repository_dir(&self) -> &Path {
        &self.repository_dir
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    pub fn shared_lock_dir(&self) -> &Path {
        &self.shared_lock_dir
    }

    /// Repository-root / repository-type directory
    pub fn repository_type_dir(&self, repository_type: &str) -> Result<PathBuf> {
        let normalized = crate::models::normalize_repository_type(repository_type).ok_or_else(
            || Error::Validation {
                msg: format!("unknown repository type: {}", repository_type),
            },
        )?;
        Ok(self.repository_dir.join(normalized))
    }

    /// Repository-root / repository-type / deposit-id directory
    pub fn dir_path(&self, repository_type: &str, dep_id: &str) -> Result<PathBuf> {
        validate_path_component(dep_id)?;
        Ok(self.repository_type_dir(repository_type)?.join(dep_id))
    }

    /// File name without the version suffix:
    /// `{depId}_{contentTypeCode}{-milestone}_P{part}.{formatExt}`
    pub fn base_file_name(&self, file: &LogicalFile) -> Result<String> {
        validate_path_component(&file.dep_id)?;
        let code = content_type_code(&file.content_type).ok_or_else(|| Error::Validation {
            msg: format!("unknown content type: {}", file.content_type),
        })?;
        let ext =
            crate::models::format_extension(&file.content_format).ok_or_else(|| Error::Validation {
                msg: format!("unknown content format: {}", file.content_format),
            })?;
        let milestone = match &file.milestone {
            Some(m) => format!("-{}", m),
            None => String::new(),
        };
        Ok(format!(
            "{}_{}{}_P{}.{}",
            file.dep_id, code, milestone, file.part_number, ext
        ))
    }

    /// File name with an explicit version number
    pub fn file_name(&self, file: &LogicalFile, version: u32) -> Result<String> {
        Ok(format!("{}.V{}", self.base_file_name(file)?, version))
    }

    /// Resolve the logical file to an absolute versioned path.
    ///
    /// Integer versions resolve without filesystem state. Symbolic versions
    /// enumerate `{base}.V*` in the deposit directory, sort by version
    /// descending and select by ordinal; a symbolic version with no matching
    /// file resolves to `None` rather than an error.
    pub fn resolve(&self, file: &LogicalFile) -> Result<Option<PathBuf>> {
        file.validate()?;
        let dir = self.dir_path(&file.repository_type, &file.dep_id)?;
        let base = self.base_file_name(file)?;
        if let Version::Number(n) = file.version {
            return Ok(Some(dir.join(format!("{}.V{}", base, n))));
        }

        // descending version order
        let mut found = self.scan_versions(&dir, &base)?;
        found.sort_by(|a, b| b.1.cmp(&a.1));

        let resolved = match file.version {
            Version::Next => {
                let next = found.first().map(|(_, v)| v + 1).unwrap_or(1);
                Some(dir.join(format!("{}.V{}", base, next)))
            }
            Version::Latest => found.first().map(|(p, _)| p.clone()),
            Version::Previous => found.get(1).map(|(p, _)| p.clone()),
            Version::First => found.last().map(|(p, _)| p.clone()),
            Version::Second => {
                if found.len() > 1 {
                    found.get(found.len() - 2).map(|(p, _)| p.clone())
                } else {
                    None
                }
            }
            Version::Number(_) => unreachable!(),
        };
        Ok(resolved)
    }

    /// Highest version number currently on disk for the logical file
    pub fn latest_version(&self, file: &LogicalFile) -> Result<Option<u32>> {
        let dir = self.dir_path(&file.repository_type, &file.dep_id)?;
        let base = self.base_file_name(file)?;
        let found = self.scan_versions(&dir, &base)?;
        Ok(found.iter().map(|(_, v)| *v).max())
    }

    fn scan_versions(&self, dir: &Path, base: &str) -> Result<Vec<(PathBuf, u32)>> {
        let pattern = format!("{}/{}.V*", dir.display(), base);
        let mut found = Vec::new();
        let entries = glob::glob(&pattern).map_err(|e| Error::Validation {
            msg: format!("bad version scan pattern: {}", e),
        })?;
        for entry in entries.flatten() {
            if let Some(v) = version_suffix(&entry) {
                found.push((entry, v));
            }
        }
        Ok(found)
    }

    /// Convert an absolute repository path to the root-relative form returned
    /// to clients; errors if the path is not under the repository root
    pub fn relative_to_root(&self, path: &Path) -> Result<String> {
        let rel = path.strip_prefix(&self.repository_dir).map_err(|_| Error::Validation {
            msg: "path is not inside the repository".to_string(),
        })?;
        Ok(rel.to_string_lossy().into_owned())
    }

    /// Re-prefix a client-supplied relative path with the repository root,
    /// rejecting traversal outside of it
    pub fn absolute_from_relative(&self, relative: &str) -> Result<PathBuf> {
        let rel = Path::new(relative);
        if rel.is_absolute() {
            return Err(Error::Validation {
                msg: "file path must be repository-relative".to_string(),
            });
        }
        for component in rel.components() {
            match component {
                std::path::Component::Normal(_) => {}
                _ => {
                    return Err(Error::Validation {
                        msg: "file path contains traversal components".to_string(),
                    });
                }
            }
        }
        Ok(self.repository_dir.join(rel))
    }
}

/// Integer version from a `{base}.V{n}` file name
pub fn version_suffix(path: &Path) -> Option<u32> {
    let name = path.file_name()?.to_str()?;
    let idx = name.rfind(".V")?;
    name[idx + 2..].parse().ok()
}
