//! Soft lock plus a third, internal `transitory` mode that keeps an endless
//! stream of readers from starving a writer. A writer that cannot acquire
//! immediately installs a transitory marker; readers observing the marker
//! defer, guaranteeing the writer's turn once current holders drain.
//! Simultaneous transitory writers order themselves by (start time, uid).

use crate::config::Config;
use crate::error::{Error, Result};
use crate::lock::{
    cleanup_lock_dir, lock_key, read_owner, scan_lock_dir, FileLockGuard, LockEntry, LockMode,
    OwnerInfo, EXCLUSIVE_MODE, SHARED_MODE, TRANSITORY_MODE,
};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use uuid::Uuid;

const RETRY_WAIT: Duration = Duration::from_millis(250);

pub struct TernaryLock {
    lock_dir: PathBuf,
    timeout: Duration,
    settle_wait: Duration,
}

impl TernaryLock {
    pub fn new(config: &Config) -> Self {
        TernaryLock {
            lock_dir: config.storage.shared_lock_dir.clone(),
            timeout: Duration::from_secs(config.lock.timeout_secs),
            settle_wait: Duration::from_secs(config.lock.second_traversal_secs),
        }
    }

    pub async fn acquire(&self, target: &Path, mode: LockMode) -> Result<FileLockGuard> {
        let stem = lock_key(target)?;
        std::fs::create_dir_all(&self.lock_dir).map_err(|e| Error::Lock {
            msg: format!("cannot create lock directory: {}", e),
        })?;
        match mode {
            LockMode::Shared => self.acquire_shared(&stem).await,
            LockMode::Exclusive => self.acquire_exclusive(&stem).await,
        }
    }

    async fn acquire_shared(&self, stem: &str) -> Result<FileLockGuard> {
        let started = Instant::now();
        let owner = OwnerInfo::current();
        loop {
            self.check_timeout(started, stem, None)?;

            let peers = scan_lock_dir(&self.lock_dir, stem, None)?;
            // a transitory marker means a writer is queued; defer to it
            if peers
                .iter()
                .any(|p| p.mode == EXCLUSIVE_MODE || p.mode == TRANSITORY_MODE)
            {
                tokio::time::sleep(RETRY_WAIT).await;
                continue;
            }

            let uid = Uuid::new_v4().simple().to_string();
            let own_path = self.lock_path(stem, SHARED_MODE, &uid);
            std::fs::write(&own_path, owner.to_file_contents()).map_err(|e| Error::Lock {
                msg: format!("cannot create lock file: {}", e),
            })?;

            tokio::time::sleep(self.settle_wait).await;
            let peers = scan_lock_dir(&self.lock_dir, stem, Some(&own_path))?;
            if peers.iter().all(|p| p.mode != EXCLUSIVE_MODE) {
                return Ok(FileLockGuard::new(own_path));
            }

            // a writer raced us in, defer to it
            let _ = std::fs::remove_file(&own_path);
            tokio::time::sleep(RETRY_WAIT).await;
        }
    }

    async fn acquire_exclusive(&self, stem: &str) -> Result<FileLockGuard> {
        let started = Instant::now();
        let owner = OwnerInfo::current();
        let uid = Uuid::new_v4().simple().to_string();
        // marker installed once this writer has to wait
        let mut transitory: Option<PathBuf> = None;

        loop {
            if let Err(e) = self.check_timeout(started, stem, transitory.as_deref()) {
                return Err(e);
            }

            let exclude = transitory.as_deref();
            let peers = scan_lock_dir(&self.lock_dir, stem, exclude)?;
            let holders = peers
                .iter()
                .any(|p| p.mode == SHARED_MODE || p.mode == EXCLUSIVE_MODE);
            let queued: Vec<&LockEntry> = peers
                .iter()
                .filter(|p| p.mode == TRANSITORY_MODE)
                .collect();

            if holders {
                // queue up behind the current holders, then wait
                if transitory.is_none() {
                    let path = self.lock_path(stem, TRANSITORY_MODE, &uid);
                    std::fs::write(&path, owner.to_file_contents()).map_err(|e| Error::Lock {
                        msg: format!("cannot create transitory lock file: {}", e),
                    })?;
                    transitory = Some(path);
                }
                tokio::time::sleep(RETRY_WAIT).await;
                continue;
            }

            if !queued.is_empty() {
                if transitory.is_none() {
                    let path = self.lock_path(stem, TRANSITORY_MODE, &uid);
                    std::fs::write(&path, owner.to_file_contents()).map_err(|e| Error::Lock {
                        msg: format!("cannot create transitory lock file: {}", e),
                    })?;
                    transitory = Some(path);
                    tokio::time::sleep(RETRY_WAIT).await;
                    continue;
                }
                // tiebreak between queued writers by (start time, uid)
                if !self.wins_tiebreak(&owner, &uid, &queued) {
                    tokio::time::sleep(RETRY_WAIT).await;
                    continue;
                }
            }

            // our turn: promote the marker (or create the lock file directly)
            let own_path = self.lock_path(stem, EXCLUSIVE_MODE, &uid);
            match transitory.take() {
                Some(marker) => {
                    std::fs::rename(&marker, &own_path).map_err(|e| Error::Lock {
                        msg: format!("cannot promote transitory lock: {}", e),
                    })?;
                }
                None => {
                    std::fs::write(&own_path, owner.to_file_contents()).map_err(|e| {
                        Error::Lock {
                            msg: format!("cannot create lock file: {}", e),
                        }
                    })?;
                }
            }

            tokio::time::sleep(self.settle_wait).await;
            let peers = scan_lock_dir(&self.lock_dir, stem, Some(&own_path))?;
            let lost = peers.iter().any(|p| {
                p.mode == EXCLUSIVE_MODE
                    && !self.beats(&owner, &uid, p)
            });
            if !lost {
                return Ok(FileLockGuard::new(own_path));
            }

            // lost to a simultaneous writer: step back into the queue
            let marker = self.lock_path(stem, TRANSITORY_MODE, &uid);
            if std::fs::rename(&own_path, &marker).is_ok() {
                transitory = Some(marker);
            } else {
                let _ = std::fs::remove_file(&own_path);
            }
            tokio::time::sleep(RETRY_WAIT).await;
        }
    }

    fn wins_tiebreak(&self, owner: &OwnerInfo, uid: &str, queued: &[&LockEntry]) -> bool {
        queued.iter().all(|peer| self.beats(owner, uid, peer))
    }

    /// Total order between contending writers: earlier start time wins, uid
    /// breaks exact ties
    fn beats(&self, owner: &OwnerInfo, uid: &str, peer: &LockEntry) -> bool {
        match read_owner(&peer.path) {
            Some(other) => {
                if owner.start_time != other.start_time {
                    owner.start_time < other.start_time
                } else {
                    uid < peer.uid.as_str()
                }
            }
            // unreadable peer record: do not defer to it
            None => true,
        }
    }

    fn lock_path(&self, stem: &str, mode: char, uid: &str) -> PathBuf {
        self.lock_dir.join(format!("{}~{}~{}", stem, mode, uid))
    }

    fn check_timeout(
        &self,
        started: Instant,
        stem: &str,
        transitory: Option<&Path>,
    ) -> Result<()> {
        if !self.timeout.is_zero() && started.elapsed() > self.timeout {
            if let Some(marker) = transitory {
                let _ = std::fs::remove_file(marker);
            }
            return Err(Error::LockTimeout {
                key: stem.to_string(),
            });
        }
        Ok(())
    }

    pub async fn cleanup(&self, keep_unexpired: bool, max_age: Duration) -> Result<usize> {
        cleanup_lock_dir(&self.lock_dir, keep_unexpired, max_age).await
    }
}
