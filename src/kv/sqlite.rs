//! Embedded SQL-file backend. One `(key, val)` table per logical table; the
//! session field map and lock records are stored as JSON strings and rewritten
//! whole on each update. Concurrent writers to the same key are precluded by
//! the one-active-writer-per-session protocol, not by this module.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::kv::{Kv, LockRecord, Table};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::PathBuf;

pub struct SqliteKv {
    file_path: PathBuf,
    session_table: String,
    map_table: String,
    lock_table: String,
}

impl SqliteKv {
    pub async fn open(config: &Config) -> Result<Self> {
        let kv = SqliteKv {
            file_path: config.kv.file_path.clone(),
            session_table: config.kv.session_table.clone(),
            map_table: config.kv.map_table.clone(),
            lock_table: config.kv.lock_table.clone(),
        };
        let this = kv.clone_paths();
        run_blocking(move || {
            let conn = this.connection()?;
            for table in [&this.session_table, &this.map_table, &this.lock_table] {
                conn.execute(
                    &format!("CREATE TABLE IF NOT EXISTS {} (key TEXT PRIMARY KEY, val TEXT)", table),
                    [],
                )
                .map_err(sql_err)?;
            }
            Ok(())
        })
        .await?;
        Ok(kv)
    }

    fn clone_paths(&self) -> SqliteKv {
        SqliteKv {
            file_path: self.file_path.clone(),
            session_table: self.session_table.clone(),
            map_table: self.map_table.clone(),
            lock_table: self.lock_table.clone(),
        }
    }

    fn connection(&self) -> Result<Connection> {
        if let Some(parent) = self.file_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::Kv {
                msg: format!("cannot create kv directory: {}", e),
            })?;
        }
        let conn = Connection::open(&self.file_path).map_err(sql_err)?;
        // serialize writers from concurrent worker threads
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(sql_err)?;
        Ok(conn)
    }

    fn get_raw(conn: &Connection, table: &str, key: &str) -> Result<Option<String>> {
        conn.query_row(
            &format!("SELECT val FROM {} WHERE key = ?1", table),
            params![key],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .map_err(sql_err)
    }

    fn set_raw(conn: &Connection, table: &str, key: &str, val: &str) -> Result<()> {
        conn.execute(
            &format!(
                "INSERT INTO {} (key, val) VALUES (?1, ?2) \
                 ON CONFLICT(key) DO UPDATE SET val = excluded.val",
                table
            ),
            params![key, val],
        )
        .map_err(sql_err)?;
        Ok(())
    }

    fn delete_key(conn: &Connection, table: &str, key: &str) -> Result<bool> {
        let n = conn
            .execute(
                &format!("DELETE FROM {} WHERE key = ?1", table),
                params![key],
            )
            .map_err(sql_err)?;
        Ok(n > 0)
    }

    fn table_name(&self, table: Table) -> &str {
        match table {
            Table::Sessions => &self.session_table,
            Table::Map => &self.map_table,
            Table::Locks => &self.lock_table,
        }
    }
}

fn sql_err(e: rusqlite::Error) -> Error {
    Error::Kv {
        msg: format!("sqlite: {}", e),
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| Error::Kv {
        msg: format!("blocking task failed: {}", e),
    })?
}

fn decode_fields(raw: &str) -> Result<HashMap<String, String>> {
    serde_json::from_str(raw).map_err(|e| Error::Kv {
        msg: format!("corrupt session row: {}", e),
    })
}

#[async_trait]
impl Kv for SqliteKv {
    async fn get_session_field(&self, upload_id: &str, field: &str) -> Result<Option<String>> {
        let this = self.clone_paths();
        let upload_id = upload_id.to_string();
        let field = field.to_string();
        run_blocking(move || {
            let conn = this.connection()?;
            match Self::get_raw(&conn, &this.session_table, &upload_id)? {
                Some(raw) => Ok(decode_fields(&raw)?.remove(&field)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn set_session_field(&self, upload_id: &str, field: &str, value: &str) -> Result<()> {
        let this = self.clone_paths();
        let upload_id = upload_id.to_string();
        let field = field.to_string();
        let value = value.to_string();
        run_blocking(move || {
            let conn = this.connection()?;
            let mut fields = match Self::get_raw(&conn, &this.session_table, &upload_id)? {
                Some(raw) => decode_fields(&raw)?,
                None => HashMap::new(),
            };
            fields.insert(field, value);
            let raw = serde_json::to_string(&fields)?;
            Self::set_raw(&conn, &this.session_table, &upload_id, &raw)
        })
        .await
    }

    async fn get_session(&self, upload_id: &str) -> Result<Option<HashMap<String, String>>> {
        let this = self.clone_paths();
        let upload_id = upload_id.to_string();
        run_blocking(move || {
            let conn = this.connection()?;
            match Self::get_raw(&conn, &this.session_table, &upload_id)? {
                Some(raw) => Ok(Some(decode_fields(&raw)?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn clear_session_field(&self, upload_id: &str, field: &str) -> Result<bool> {
        let this = self.clone_paths();
        let upload_id = upload_id.to_string();
        let field = field.to_string();
        run_blocking(move || {
            let conn = this.connection()?;
            let Some(raw) = Self::get_raw(&conn, &this.session_table, &upload_id)? else {
                return Ok(false);
            };
            let mut fields = decode_fields(&raw)?;
            if fields.remove(&field).is_none() {
                return Ok(false);
            }
            let raw = serde_json::to_string(&fields)?;
            Self::set_raw(&conn, &this.session_table, &upload_id, &raw)?;
            Ok(true)
        })
        .await
    }

    async fn clear_session(&self, upload_id: &str) -> Result<bool> {
        let this = self.clone_paths();
        let upload_id = upload_id.to_string();
        run_blocking(move || {
            let conn = this.connection()?;
            Self::delete_key(&conn, &this.session_table, &upload_id)
        })
        .await
    }

    async fn get_map(&self, key: &str) -> Result<Option<String>> {
        let this = self.clone_paths();
        let key = key.to_string();
        run_blocking(move || {
            let conn = this.connection()?;
            Self::get_raw(&conn, &this.map_table, &key)
        })
        .await
    }

    async fn set_map(&self, key: &str, upload_id: &str) -> Result<()> {
        let this = self.clone_paths();
        let key = key.to_string();
        let upload_id = upload_id.to_string();
        run_blocking(move || {
            let conn = this.connection()?;
            Self::set_raw(&conn, &this.map_table, &key, &upload_id)
        })
        .await
    }

    async fn clear_map_key(&self, key: &str) -> Result<bool> {
        let this = self.clone_paths();
        let key = key.to_string();
        run_blocking(move || {
            let conn = this.connection()?;
            Self::delete_key(&conn, &this.map_table, &key)
        })
        .await
    }

    async fn clear_map_value(&self, upload_id: &str) -> Result<bool> {
        let this = self.clone_paths();
        let upload_id = upload_id.to_string();
        run_blocking(move || {
            let conn = this.connection()?;
            let n = conn
                .execute(
                    &format!("DELETE FROM {} WHERE val = ?1", this.map_table),
                    params![upload_id],
                )
                .map_err(sql_err)?;
            Ok(n > 0)
        })
        .await
    }

    async fn get_lock(&self, key: &str) -> Result<Option<LockRecord>> {
        let this = self.clone_paths();
        let key = key.to_string();
        run_blocking(move || {
            let conn = this.connection()?;
            match Self::get_raw(&conn, &this.lock_table, &key)? {
                Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn put_lock(&self, key: &str, record: &LockRecord) -> Result<()> {
        let this = self.clone_paths();
        let key = key.to_string();
        let raw = serde_json::to_string(record)?;
        run_blocking(move || {
            let conn = this.connection()?;
            Self::set_raw(&conn, &this.lock_table, &key, &raw)
        })
        .await
    }

    async fn add_lock_modality(&self, key: &str, delta: i64) -> Result<i64> {
        let this = self.clone_paths();
        let key = key.to_string();
        run_blocking(move || {
            let mut conn = this.connection()?;
            let tx = conn
                .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
                .map_err(sql_err)?;
            let raw = Self::get_raw(&tx, &this.lock_table, &key)?.ok_or_else(|| Error::Kv {
                msg: format!("no lock record for {}", key),
            })?;
            let mut record: LockRecord = serde_json::from_str(&raw)?;
            record.modality += delta;
            let modality = record.modality;
            let raw = serde_json::to_string(&record)?;
            Self::set_raw(&tx, &this.lock_table, &key, &raw)?;
            tx.commit().map_err(sql_err)?;
            Ok(modality)
        })
        .await
    }

    async fn set_lock_waitlist(&self, key: &str, uid: Option<&str>) -> Result<()> {
        let this = self.clone_paths();
        let key = key.to_string();
        let uid = uid.map(|s| s.to_string());
        run_blocking(move || {
            let mut conn = this.connection()?;
            let tx = conn
                .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
                .map_err(sql_err)?;
            let Some(raw) = Self::get_raw(&tx, &this.lock_table, &key)? else {
                return Ok(());
            };
            let mut record: LockRecord = serde_json::from_str(&raw)?;
            record.waitlist = uid;
            let raw = serde_json::to_string(&record)?;
            Self::set_raw(&tx, &this.lock_table, &key, &raw)?;
            tx.commit().map_err(sql_err)?;
            Ok(())
        })
        .await
    }

    async fn remove_lock(&self, key: &str) -> Result<()> {
        let this = self.clone_paths();
        let key = key.to_string();
        run_blocking(move || {
            let conn = this.connection()?;
            Self::delete_key(&conn, &this.lock_table, &key)?;
            Ok(())
        })
        .await
    }

    async fn all_locks(&self) -> Result<Vec<(String, LockRecord)>> {
        let this = self.clone_paths();
        run_blocking(move || {
            let conn = this.connection()?;
            let mut stmt = conn
                .prepare(&format!("SELECT key, val FROM {}", this.lock_table))
                .map_err(sql_err)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })
                .map_err(sql_err)?;
            let mut locks = Vec::new();
            for row in rows {
                let (key, raw) = row.map_err(sql_err)?;
                match serde_json::from_str(&raw) {
                    Ok(record) => locks.push((key, record)),
                    Err(e) => tracing::warn!(key, error = %e, "skipping corrupt lock record"),
                }
            }
            Ok(locks)
        })
        .await
    }

    async fn clear_table(&self, table: Table) -> Result<()> {
        let this = self.clone_paths();
        let name = self.table_name(table).to_string();
        run_blocking(move || {
            let conn = this.connection()?;
            conn.execute(&format!("DELETE FROM {}", name), [])
                .map_err(sql_err)?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_kv(temp: &TempDir) -> SqliteKv {
        let mut config = Config::default();
        config.kv.file_path = temp.path().join("kv.sqlite");
        SqliteKv::open(&config).await.unwrap()
    }

    #[tokio::test]
    async fn test_session_fields_round_trip() {
        let temp = TempDir::new().unwrap();
        let kv = open_kv(&temp).await;

        assert_eq!(kv.get_session("u1").await.unwrap(), None);
        kv.set_session_field("u1", "chunkSize", "1024").await.unwrap();
        assert_eq!(
            kv.get_session_field("u1", "chunkSize").await.unwrap(),
            Some("1024".to_string())
        );

        kv.set_session_field("u1", "chunkSize", "2048").await.unwrap();
        let row = kv.get_session("u1").await.unwrap().unwrap();
        assert_eq!(row.get("chunkSize"), Some(&"2048".to_string()));

        assert!(kv.clear_session_field("u1", "chunkSize").await.unwrap());
        assert!(!kv.clear_session_field("u1", "chunkSize").await.unwrap());
        assert!(kv.clear_session("u1").await.unwrap());
        assert!(!kv.clear_session("u1").await.unwrap());
    }

    #[tokio::test]
    async fn test_map_delete_by_key_and_value() {
        let temp = TempDir::new().unwrap();
        let kv = open_kv(&temp).await;

        kv.set_map("deposit_D_1_model_P1.cif.V1", "aaaa").await.unwrap();
        kv.set_map("deposit_D_2_model_P1.cif.V1", "bbbb").await.unwrap();

        assert_eq!(
            kv.get_map("deposit_D_1_model_P1.cif.V1").await.unwrap(),
            Some("aaaa".to_string())
        );
        assert!(kv.clear_map_value("bbbb").await.unwrap());
        assert_eq!(kv.get_map("deposit_D_2_model_P1.cif.V1").await.unwrap(), None);
        assert!(kv.clear_map_key("deposit_D_1_model_P1.cif.V1").await.unwrap());
        assert_eq!(kv.get_map("deposit_D_1_model_P1.cif.V1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_lock_records_and_modality() {
        let temp = TempDir::new().unwrap();
        let kv = open_kv(&temp).await;

        let record = LockRecord::free("host1".to_string(), 42, 1000.0);
        kv.put_lock("deposit~f.V1", &record).await.unwrap();

        assert_eq!(kv.add_lock_modality("deposit~f.V1", 1).await.unwrap(), 1);
        assert_eq!(kv.add_lock_modality("deposit~f.V1", 1).await.unwrap(), 2);
        assert_eq!(kv.add_lock_modality("deposit~f.V1", -1).await.unwrap(), 1);

        kv.set_lock_waitlist("deposit~f.V1", Some("uid9")).await.unwrap();
        let got = kv.get_lock("deposit~f.V1").await.unwrap().unwrap();
        assert_eq!(got.waitlist.as_deref(), Some("uid9"));
        assert_eq!(got.hostname, "host1");

        assert_eq!(kv.all_locks().await.unwrap().len(), 1);
        kv.remove_lock("deposit~f.V1").await.unwrap();
        assert_eq!(kv.get_lock("deposit~f.V1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_clear_table() {
        let temp = TempDir::new().unwrap();
        let kv = open_kv(&temp).await;

        kv.set_session_field("u1", "chunkSize", "1").await.unwrap();
        kv.set_map("k1", "u1").await.unwrap();
        kv.clear_table(Table::Sessions).await.unwrap();
        kv.clear_table(Table::Map).await.unwrap();
        assert_eq!(kv.get_session("u1").await.unwrap(), None);
        assert_eq!(kv.get_map("k1").await.unwrap(), None);
    }
}
