//! Durable key-value layer backing resumable sessions and the KV lock.
//!
//! Two logical tables with identical semantics in both backends: *Sessions*
//! (uploadId -> small field map) and *Map* (filename-key -> uploadId). The
//! lock table is used only by the KV-backed lock; the configuration
//! validator guarantees that backend is only selected together with the
//! remote store.

mod redis;
mod sqlite;

pub use redis::RedisKv;
pub use sqlite::SqliteKv;

use crate::config::{Config, KvMode};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Sessions,
    Map,
    Locks,
}

/// Ownership record for one lock key.
///
/// `modality` is -1 for a writer, 0 when free and a positive reader count
/// otherwise. `waitlist` carries the uid of a writer queued for its turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockRecord {
    pub modality: i64,
    pub hostname: String,
    pub pid: u32,
    pub start_time: f64,
    pub waitlist: Option<String>,
}

impl LockRecord {
    pub fn free(hostname: String, pid: u32, start_time: f64) -> Self {
        LockRecord {
            modality: 0,
            hostname,
            pid,
            start_time,
            waitlist: None,
        }
    }
}

#[async_trait]
pub trait Kv: Send + Sync {
    // -- Sessions table --

    async fn get_session_field(&self, upload_id: &str, field: &str) -> Result<Option<String>>;
    async fn set_session_field(&self, upload_id: &str, field: &str, value: &str) -> Result<()>;
    async fn get_session(&self, upload_id: &str) -> Result<Option<HashMap<String, String>>>;
    async fn clear_session_field(&self, upload_id: &str, field: &str) -> Result<bool>;
    async fn clear_session(&self, upload_id: &str) -> Result<bool>;

    // -- Map table --

    async fn get_map(&self, key: &str) -> Result<Option<String>>;
    async fn set_map(&self, key: &str, upload_id: &str) -> Result<()>;
    async fn clear_map_key(&self, key: &str) -> Result<bool>;
    async fn clear_map_value(&self, upload_id: &str) -> Result<bool>;

    // -- Lock table --

    async fn get_lock(&self, key: &str) -> Result<Option<LockRecord>>;
    async fn put_lock(&self, key: &str, record: &LockRecord) -> Result<()>;
    /// Atomically add `delta` to the modality counter, returning the new value
    async fn add_lock_modality(&self, key: &str, delta: i64) -> Result<i64>;
    async fn set_lock_waitlist(&self, key: &str, uid: Option<&str>) -> Result<()>;
    async fn remove_lock(&self, key: &str) -> Result<()>;
    async fn all_locks(&self) -> Result<Vec<(String, LockRecord)>>;

    // -- Bulk --

    async fn clear_table(&self, table: Table) -> Result<()>;
}

/// Construct the backend selected by the configuration
pub async fn connect(config: &Config) -> Result<Arc<dyn Kv>> {
    match config.kv.mode {
        KvMode::Sqlite => Ok(Arc::new(SqliteKv::open(config).await?)),
        KvMode::Redis => Ok(Arc::new(RedisKv::connect(config).await?)),
    }
}
