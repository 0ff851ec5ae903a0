//! Cross-process advisory locking over logical file paths.
//!
//! Three interchangeable backends honor the same contract: shared and
//! exclusive modes, bounded asynchronous acquisition (timeout 0 waits
//! forever), writer fairness against reader streams, idempotent release and
//! stale-owner cleanup. Lock identity is `{repositoryType}~{filename}`, so
//! requests for the same logical file contend no matter which worker or host
//! serves them.
//!
//! The lock is advisory: nothing blocks raw filesystem access. Correctness
//! rests on every writer acquiring the exclusive mode before mutating a
//! target path.

mod kvlock;
mod soft;
mod ternary;

pub use kvlock::KvLock;
pub use soft::SoftLock;
pub use ternary::TernaryLock;

use crate::config::{Config, LockBackend};
use crate::error::{Error, Result};
use crate::kv::Kv;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const SHARED_MODE: char = 'r';
pub const EXCLUSIVE_MODE: char = 'w';
// internal to the ternary backend: a writer queued behind readers
pub const TRANSITORY_MODE: char = 't';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

impl LockMode {
    pub fn mode_char(&self) -> char {
        match self {
            LockMode::Shared => SHARED_MODE,
            LockMode::Exclusive => EXCLUSIVE_MODE,
        }
    }
}

/// Contention identity for a target path:
/// `{repositoryType}~{filename}`, derived from
/// `{repoRoot}/{repositoryType}/{depId}/{filename}`
pub fn lock_key(target: &Path) -> Result<String> {
    let filename = target
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::Lock {
            msg: format!("cannot derive lock key from {}", target.display()),
        })?;
    let repo_type = target
        .parent()
        .and_then(|p| p.parent())
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::Lock {
            msg: format!("cannot derive lock key from {}", target.display()),
        })?;
    Ok(format!("{}~{}", repo_type, filename))
}

/// Identity written into every lock record so a sweep can recognize and stop
/// a crashed or runaway holder
#[derive(Debug, Clone, PartialEq)]
pub struct OwnerInfo {
    pub pid: u32,
    pub hostname: String,
    pub start_time: f64,
}

impl OwnerInfo {
    pub fn current() -> Self {
        OwnerInfo {
            pid: std::process::id(),
            hostname: local_hostname(),
            start_time: now_secs(),
        }
    }

    /// Serialized lock-file contents: pid, hostname and start time, one per line
    pub fn to_file_contents(&self) -> String {
        format!("{}\n{}\n{}\n", self.pid, self.hostname, self.start_time)
    }

    pub fn from_file_contents(contents: &str) -> Option<Self> {
        let mut lines = contents.lines();
        let pid = lines.next()?.trim().parse().ok()?;
        let hostname = lines.next()?.trim().to_string();
        let start_time = lines.next()?.trim().parse().ok()?;
        Some(OwnerInfo {
            pid,
            hostname,
            start_time,
        })
    }
}

pub fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .map(|h| h.split('.').next().unwrap_or_default().to_string())
        .unwrap_or_else(|| "localhost".to_string())
}

pub fn now_secs() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Stop a same-host process that still owns an expired lock record
pub(crate) fn stop_local_owner(owner: &OwnerInfo) {
    if owner.hostname != local_hostname() || owner.pid == std::process::id() {
        return;
    }
    #[cfg(unix)]
    {
        let pid = owner.pid as libc::pid_t;
        if pid > 0 {
            unsafe {
                libc::kill(pid, libc::SIGSTOP);
            }
        }
    }
}

/// Handle for one granted acquisition. Release is idempotent; releasing a
/// lock whose record is already gone is a no-op.
pub enum LockGuard {
    Disabled,
    File(FileLockGuard),
    Kv(KvLockGuard),
}

impl LockGuard {
    pub async fn release(self) {
        match self {
            LockGuard::Disabled => {}
            LockGuard::File(guard) => guard.release().await,
            LockGuard::Kv(guard) => guard.release().await,
        }
    }
}

/// Guard over a lock file on the shared lock directory
pub struct FileLockGuard {
    path: Option<PathBuf>,
}

impl FileLockGuard {
    pub(crate) fn new(path: PathBuf) -> Self {
        FileLockGuard { path: Some(path) }
    }

    pub async fn release(mut self) {
        if let Some(path) = self.path.take() {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %e, "could not remove lock file");
                }
            }
        }
    }
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        // backstop for guards dropped without an explicit release
        if let Some(path) = self.path.take() {
            let _ = std::fs::remove_file(&path);
        }
    }
}

/// Guard over a record in the KV lock table
pub struct KvLockGuard {
    kv: Arc<dyn Kv>,
    key: String,
    mode: LockMode,
    released: bool,
}

impl KvLockGuard {
    pub(crate) fn new(kv: Arc<dyn Kv>, key: String, mode: LockMode) -> Self {
        KvLockGuard {
            kv,
            key,
            mode,
            released: false,
        }
    }

    pub async fn release(mut self) {
        self.released = true;
        let delta = match self.mode {
            LockMode::Shared => -1,
            LockMode::Exclusive => 1,
        };
        match self.kv.add_lock_modality(&self.key, delta).await {
            Ok(0) => {
                if let Err(e) = self.kv.remove_lock(&self.key).await {
                    tracing::warn!(key = self.key, error = %e, "could not remove free lock record");
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(key = self.key, error = %e, "could not release kv lock");
            }
        }
    }
}

impl Drop for KvLockGuard {
    fn drop(&mut self) {
        if !self.released {
            tracing::warn!(key = self.key, "kv lock guard dropped without release");
        }
    }
}

/// Backend-dispatching facade constructed once from the configuration
pub struct LockManager {
    inner: Inner,
    max_age: Duration,
}

enum Inner {
    Disabled,
    Soft(SoftLock),
    Ternary(TernaryLock),
    Kv(KvLock),
}

impl LockManager {
    pub fn new(config: &Config, kv: Arc<dyn Kv>) -> Self {
        let max_age = Duration::from_secs(config.lock.max_age_secs);
        if !config.lock.enabled {
            return LockManager {
                inner: Inner::Disabled,
                max_age,
            };
        }
        let inner = match config.lock.backend {
            LockBackend::Soft => Inner::Soft(SoftLock::new(config)),
            LockBackend::Ternary => Inner::Ternary(TernaryLock::new(config)),
            LockBackend::Redis => Inner::Kv(KvLock::new(config, kv)),
        };
        LockManager { inner, max_age }
    }

    /// Block (asynchronously) until the lock on `target` is granted in `mode`
    /// or the configured timeout elapses
    pub async fn acquire(&self, target: &Path, mode: LockMode) -> Result<LockGuard> {
        match &self.inner {
            Inner::Disabled => Ok(LockGuard::Disabled),
            Inner::Soft(lock) => lock.acquire(target, mode).await.map(LockGuard::File),
            Inner::Ternary(lock) => lock.acquire(target, mode).await.map(LockGuard::File),
            Inner::Kv(lock) => lock.acquire(target, mode).await.map(LockGuard::Kv),
        }
    }

    /// Remove lock records, optionally keeping those younger than the
    /// configured max age, and stop co-located owning processes.
    /// Returns the number of records removed.
    pub async fn cleanup(&self, keep_unexpired: bool) -> Result<usize> {
        match &self.inner {
            Inner::Disabled => Ok(0),
            Inner::Soft(lock) => lock.cleanup(keep_unexpired, self.max_age).await,
            Inner::Ternary(lock) => lock.cleanup(keep_unexpired, self.max_age).await,
            Inner::Kv(lock) => lock.cleanup(keep_unexpired, self.max_age).await,
        }
    }
}

// -- shared helpers for the file-based backends --

/// One lock file parsed from the shared lock directory:
/// `{repositoryType}~{filename}~{mode}~{uid}`
#[derive(Debug, Clone)]
pub(crate) struct LockEntry {
    pub path: PathBuf,
    pub mode: char,
    pub uid: String,
}

pub(crate) fn scan_lock_dir(
    dir: &Path,
    stem: &str,
    exclude: Option<&Path>,
) -> Result<Vec<LockEntry>> {
    let pattern = format!("{}/{}~*", dir.display(), stem);
    let mut entries = Vec::new();
    let paths = glob::glob(&pattern).map_err(|e| Error::Lock {
        msg: format!("bad lock scan pattern: {}", e),
    })?;
    for path in paths.flatten() {
        if exclude.is_some_and(|own| own == path) {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let tokens: Vec<&str> = name.split('~').collect();
        if tokens.len() != 4 {
            continue;
        }
        let Some(mode) = tokens[2].chars().next() else {
            continue;
        };
        entries.push(LockEntry {
            mode,
            uid: tokens[3].to_string(),
            path,
        });
    }
    Ok(entries)
}

pub(crate) fn read_owner(path: &Path) -> Option<OwnerInfo> {
    let contents = std::fs::read_to_string(path).ok()?;
    OwnerInfo::from_file_contents(&contents)
}

/// Shared sweep for the file-based backends
pub(crate) async fn cleanup_lock_dir(
    dir: &Path,
    keep_unexpired: bool,
    max_age: Duration,
) -> Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }
    let mut removed = 0;
    let mut entries = tokio::fs::read_dir(dir).await.map_err(|e| Error::Lock {
        msg: format!("cannot read lock directory: {}", e),
    })?;
    while let Some(entry) = entries.next_entry().await.map_err(|e| Error::Lock {
        msg: format!("cannot read lock directory: {}", e),
    })? {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if keep_unexpired {
            let age = entry
                .metadata()
                .await
                .ok()
                .and_then(|m| m.modified().ok())
                .and_then(|m| m.elapsed().ok());
            if age.is_some_and(|age| age <= max_age) {
                continue;
            }
        }
        if let Some(owner) = read_owner(&path) {
            stop_local_owner(&owner);
        }
        if let Err(e) = tokio::fs::remove_file(&path).await {
            tracing::warn!(path = %path.display(), error = %e, "could not remove lock record");
        } else {
            tracing::info!(path = %path.display(), "removed lock record");
            removed += 1;
        }
    }
    Ok(removed)
}
