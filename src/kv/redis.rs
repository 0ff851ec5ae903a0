//! Remote in-memory hash-server backend. Sessions and lock records map to a
//! hash per key with native field operations; Map entries are plain
//! string-valued keys. Every process node must point at the same server.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::kv::{Kv, LockRecord, Table};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;

// waitlist sentinel stored when no writer is queued
const NO_WAITLIST: &str = "-1";

pub struct RedisKv {
    conn: ConnectionManager,
    session_table: String,
    map_table: String,
    lock_table: String,
}

impl RedisKv {
    pub async fn connect(config: &Config) -> Result<Self> {
        let client = redis::Client::open(config.kv.redis_url.as_str()).map_err(redis_err)?;
        let conn = ConnectionManager::new(client).await.map_err(redis_err)?;
        Ok(RedisKv {
            conn,
            session_table: config.kv.session_table.clone(),
            map_table: config.kv.map_table.clone(),
            lock_table: config.kv.lock_table.clone(),
        })
    }

    fn session_key(&self, upload_id: &str) -> String {
        format!("{}:{}", self.session_table, upload_id)
    }

    fn map_key(&self, key: &str) -> String {
        format!("{}:{}", self.map_table, key)
    }

    fn lock_key(&self, key: &str) -> String {
        format!("{}:{}", self.lock_table, key)
    }

    fn table_prefix(&self, table: Table) -> &str {
        match table {
            Table::Sessions => &self.session_table,
            Table::Map => &self.map_table,
            Table::Locks => &self.lock_table,
        }
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .map_err(redis_err)?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(keys)
    }

    fn record_from_fields(fields: &HashMap<String, String>) -> Option<LockRecord> {
        let modality = fields.get("modality")?.parse().ok()?;
        let hostname = fields.get("hostname")?.clone();
        let pid = fields.get("pid")?.parse().ok()?;
        let start_time = fields.get("start_time")?.parse().ok()?;
        let waitlist = fields
            .get("waitlist")
            .filter(|w| w.as_str() != NO_WAITLIST)
            .cloned();
        Some(LockRecord {
            modality,
            hostname,
            pid,
            start_time,
            waitlist,
        })
    }
}

fn redis_err(e: redis::RedisError) -> Error {
    Error::Kv {
        msg: format!("redis: {}", e),
    }
}

#[async_trait]
impl Kv for RedisKv {
    async fn get_session_field(&self, upload_id: &str, field: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        conn.hget(self.session_key(upload_id), field)
            .await
            .map_err(redis_err)
    }

    async fn set_session_field(&self, upload_id: &str, field: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .hset(self.session_key(upload_id), field, value)
            .await
            .map_err(redis_err)?;
        Ok(())
    }

    async fn get_session(&self, upload_id: &str) -> Result<Option<HashMap<String, String>>> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn
            .hgetall(self.session_key(upload_id))
            .await
            .map_err(redis_err)?;
        if fields.is_empty() {
            Ok(None)
        } else {
            Ok(Some(fields))
        }
    }

    async fn clear_session_field(&self, upload_id: &str, field: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn
            .hdel(self.session_key(upload_id), field)
            .await
            .map_err(redis_err)?;
        Ok(removed > 0)
    }

    async fn clear_session(&self, upload_id: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn
            .del(self.session_key(upload_id))
            .await
            .map_err(redis_err)?;
        Ok(removed > 0)
    }

    async fn get_map(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(self.map_key(key)).await.map_err(redis_err)
    }

    async fn set_map(&self, key: &str, upload_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set(self.map_key(key), upload_id)
            .await
            .map_err(redis_err)?;
        Ok(())
    }

    async fn clear_map_key(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.del(self.map_key(key)).await.map_err(redis_err)?;
        Ok(removed > 0)
    }

    async fn clear_map_value(&self, upload_id: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let mut removed = false;
        for key in self.scan_keys(&format!("{}:*", self.map_table)).await? {
            let value: Option<String> = conn.get(&key).await.map_err(redis_err)?;
            if value.as_deref() == Some(upload_id) {
                let _: i64 = conn.del(&key).await.map_err(redis_err)?;
                removed = true;
            }
        }
        Ok(removed)
    }

    async fn get_lock(&self, key: &str) -> Result<Option<LockRecord>> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> =
            conn.hgetall(self.lock_key(key)).await.map_err(redis_err)?;
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Self::record_from_fields(&fields))
    }

    async fn put_lock(&self, key: &str, record: &LockRecord) -> Result<()> {
        let mut conn = self.conn.clone();
        let waitlist = record.waitlist.clone().unwrap_or_else(|| NO_WAITLIST.to_string());
        let _: () = redis::cmd("HSET")
            .arg(self.lock_key(key))
            .arg("modality")
            .arg(record.modality)
            .arg("hostname")
            .arg(&record.hostname)
            .arg("pid")
            .arg(record.pid)
            .arg("start_time")
            .arg(record.start_time)
            .arg("waitlist")
            .arg(waitlist)
            .query_async(&mut conn)
            .await
            .map_err(redis_err)?;
        Ok(())
    }

    async fn add_lock_modality(&self, key: &str, delta: i64) -> Result<i64> {
        let mut conn = self.conn.clone();
        conn.hincr(self.lock_key(key), "modality", delta)
            .await
            .map_err(redis_err)
    }

    async fn set_lock_waitlist(&self, key: &str, uid: Option<&str>) -> Result<()> {
        let mut conn = self.conn.clone();
        let value = uid.unwrap_or(NO_WAITLIST);
        let _: () = conn
            .hset(self.lock_key(key), "waitlist", value)
            .await
            .map_err(redis_err)?;
        Ok(())
    }

    async fn remove_lock(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.del(self.lock_key(key)).await.map_err(redis_err)?;
        Ok(())
    }

    async fn all_locks(&self) -> Result<Vec<(String, LockRecord)>> {
        let mut conn = self.conn.clone();
        let prefix = format!("{}:", self.lock_table);
        let mut locks = Vec::new();
        for key in self.scan_keys(&format!("{}*", prefix)).await? {
            let fields: HashMap<String, String> =
                conn.hgetall(&key).await.map_err(redis_err)?;
            if let Some(record) = Self::record_from_fields(&fields) {
                locks.push((key.trim_start_matches(&prefix).to_string(), record));
            }
        }
        Ok(locks)
    }

    async fn clear_table(&self, table: Table) -> Result<()> {
        let mut conn = self.conn.clone();
        let prefix = self.table_prefix(table);
        for key in self.scan_keys(&format!("{}:*", prefix)).await? {
            let _: i64 = conn.del(&key).await.map_err(redis_err)?;
        }
        Ok(())
    }
}
