//! Lock backed by the remote key-value store: one record per lock key holding
//! `[modality, hostname, pid, start time, waitlist]`. Modality is -1 for a
//! writer, 0 when free and the reader count otherwise; atomic increments on
//! the shared record replace the directory scans of the file-based backends.
//! A short verification wait after taking the writer slot detects two
//! writers that both observed modality 0; the losing side rolls back.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::kv::{Kv, LockRecord};
use crate::lock::{lock_key, now_secs, stop_local_owner, KvLockGuard, LockMode, OwnerInfo};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

const RETRY_WAIT: Duration = Duration::from_millis(250);

pub struct KvLock {
    kv: Arc<dyn Kv>,
    timeout: Duration,
    verify_wait: Duration,
}

impl KvLock {
    pub fn new(config: &Config, kv: Arc<dyn Kv>) -> Self {
        KvLock {
            kv,
            timeout: Duration::from_secs(config.lock.timeout_secs),
            // the verification wait is mandatory for this backend
            verify_wait: Duration::from_secs(config.lock.second_traversal_secs.max(1)),
        }
    }

    pub async fn acquire(&self, target: &Path, mode: LockMode) -> Result<KvLockGuard> {
        let key = lock_key(target)?;
        let started = Instant::now();
        let owner = OwnerInfo::current();
        // set when this writer claims the waitlist slot
        let mut waitlist_uid: Option<String> = None;

        let result = match mode {
            LockMode::Shared => self.acquire_shared(&key, &owner, started).await,
            LockMode::Exclusive => {
                self.acquire_exclusive(&key, &owner, started, &mut waitlist_uid)
                    .await
            }
        };

        if let Some(uid) = waitlist_uid {
            // grant or failure, the queue slot must not outlive the wait
            if let Ok(Some(record)) = self.kv.get_lock(&key).await {
                if record.waitlist.as_deref() == Some(uid.as_str()) {
                    let _ = self.kv.set_lock_waitlist(&key, None).await;
                }
            }
        }
        result
    }

    async fn ensure_record(&self, key: &str, owner: &OwnerInfo) -> Result<LockRecord> {
        match self.kv.get_lock(key).await? {
            Some(record) => Ok(record),
            None => {
                let record =
                    LockRecord::free(owner.hostname.clone(), owner.pid, owner.start_time);
                self.kv.put_lock(key, &record).await?;
                Ok(record)
            }
        }
    }

    async fn acquire_shared(
        &self,
        key: &str,
        owner: &OwnerInfo,
        started: Instant,
    ) -> Result<KvLockGuard> {
        loop {
            self.check_timeout(started, key)?;
            let record = self.ensure_record(key, owner).await?;

            // a held writer slot or a queued writer both turn readers away
            if record.modality < 0 || record.waitlist.is_some() {
                tokio::time::sleep(RETRY_WAIT).await;
                continue;
            }

            let modality = self.kv.add_lock_modality(key, 1).await?;
            if modality > 0 {
                return Ok(KvLockGuard::new(self.kv.clone(), key.to_string(), LockMode::Shared));
            }
            // a writer slipped in between the read and the increment
            self.kv.add_lock_modality(key, -1).await?;
            tokio::time::sleep(RETRY_WAIT).await;
        }
    }

    async fn acquire_exclusive(
        &self,
        key: &str,
        owner: &OwnerInfo,
        started: Instant,
        waitlist_uid: &mut Option<String>,
    ) -> Result<KvLockGuard> {
        loop {
            self.check_timeout(started, key)?;
            let record = self.ensure_record(key, owner).await?;

            if record.modality != 0 {
                // claim the next turn so readers stop piling on
                if record.waitlist.is_none() && waitlist_uid.is_none() {
                    let uid = Uuid::new_v4().simple().to_string();
                    self.kv.set_lock_waitlist(key, Some(&uid)).await?;
                    *waitlist_uid = Some(uid);
                }
                tokio::time::sleep(RETRY_WAIT).await;
                continue;
            }

            if let (Some(queued), Some(ours)) = (&record.waitlist, &*waitlist_uid) {
                if queued != ours {
                    // someone else holds the next turn
                    tokio::time::sleep(RETRY_WAIT).await;
                    continue;
                }
            } else if record.waitlist.is_some() && waitlist_uid.is_none() {
                tokio::time::sleep(RETRY_WAIT).await;
                continue;
            }

            let modality = self.kv.add_lock_modality(key, -1).await?;
            if modality != -1 {
                // simultaneous writer also decremented; roll back and retry
                self.kv.add_lock_modality(key, 1).await?;
                tokio::time::sleep(RETRY_WAIT).await;
                continue;
            }

            // verification wait: a peer that raced the decrement shows up here
            tokio::time::sleep(self.verify_wait).await;
            match self.kv.get_lock(key).await? {
                Some(record) if record.modality == -1 => {
                    return Ok(KvLockGuard::new(
                        self.kv.clone(),
                        key.to_string(),
                        LockMode::Exclusive,
                    ));
                }
                _ => {
                    self.kv.add_lock_modality(key, 1).await?;
                    tokio::time::sleep(RETRY_WAIT).await;
                }
            }
        }
    }

    fn check_timeout(&self, started: Instant, key: &str) -> Result<()> {
        if !self.timeout.is_zero() && started.elapsed() > self.timeout {
            return Err(Error::LockTimeout {
                key: key.to_string(),
            });
        }
        Ok(())
    }

    pub async fn cleanup(&self, keep_unexpired: bool, max_age: Duration) -> Result<usize> {
        let mut removed = 0;
        for (key, record) in self.kv.all_locks().await? {
            if keep_unexpired {
                let age = now_secs() - record.start_time;
                if age <= max_age.as_secs_f64() {
                    continue;
                }
            }
            self.kv.remove_lock(&key).await?;
            removed += 1;
            stop_local_owner(&OwnerInfo {
                pid: record.pid,
                hostname: record.hostname.clone(),
                start_time: record.start_time,
            });
            tracing::info!(key, "removed lock record");
        }
        Ok(removed)
    }
}
