//! File-per-request lock. Each acquisition creates one small file in the
//! shared lock directory named `{repositoryType}~{filename}~{mode}~{uid}`;
//! deciding is a directory scan, so the backend works across hosts that share
//! the lock directory. A settle wait and second scan after creating the file
//! detect a peer that raced the first scan; simultaneous writers resolve by
//! lexicographic uid.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::lock::{
    cleanup_lock_dir, lock_key, scan_lock_dir, FileLockGuard, LockMode, OwnerInfo,
    EXCLUSIVE_MODE,
};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use uuid::Uuid;

const RETRY_WAIT: Duration = Duration::from_millis(250);

pub struct SoftLock {
    lock_dir: PathBuf,
    timeout: Duration,
    settle_wait: Duration,
}

impl SoftLock {
    pub fn new(config: &Config) -> Self {
        SoftLock {
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
        let started = Instant::now();
        let owner = OwnerInfo::current();

        loop {
            self.check_timeout(started, &stem)?;

            let peers = scan_lock_dir(&self.lock_dir, &stem, None)?;
            let conflict = match mode {
                LockMode::Exclusive => !peers.is_empty(),
                LockMode::Shared => peers.iter().any(|p| p.mode == EXCLUSIVE_MODE),
            };
            if conflict {
                tokio::time::sleep(RETRY_WAIT).await;
                continue;
            }

            // provisionally take the lock
            let uid = Uuid::new_v4().simple().to_string();
            let own_path = self
                .lock_dir
                .join(format!("{}~{}~{}", stem, mode.mode_char(), uid));
            std::fs::write(&own_path, owner.to_file_contents()).map_err(|e| Error::Lock {
                msg: format!("cannot create lock file: {}", e),
            })?;

            // settle, then rescan for a peer that raced the first scan
            tokio::time::sleep(self.settle_wait).await;
            let peers = scan_lock_dir(&self.lock_dir, &stem, Some(&own_path))?;
            let granted = match mode {
                LockMode::Shared => peers.iter().all(|p| p.mode != EXCLUSIVE_MODE),
                LockMode::Exclusive => peers
                    .iter()
                    .filter(|p| p.mode == EXCLUSIVE_MODE)
                    .all(|p| uid < p.uid),
            };
            if granted {
                tracing::debug!(stem, uid, mode = %mode.mode_char(), "acquired soft lock");
                return Ok(FileLockGuard::new(own_path));
            }

            // lost the race, roll the transaction back and keep waiting
            let _ = std::fs::remove_file(&own_path);
            tokio::time::sleep(RETRY_WAIT).await;
        }
    }

    fn check_timeout(&self, started: Instant, stem: &str) -> Result<()> {
        if !self.timeout.is_zero() && started.elapsed() > self.timeout {
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
