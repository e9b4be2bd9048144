use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

use crate::db::init_store_db;
use crate::types::error::{DispatchError, Result};

use super::{PendingEntry, StreamEntry, StreamStore};

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

fn transport(e: sqlx::Error) -> DispatchError {
    DispatchError::transport(e.to_string())
}

/// SQLite realization of the StreamStore capability. A stream is an
/// append-only table of JSON-encoded field maps; a consumer group is a
/// per-(stream, group) high-water mark plus a delivery ledger used for
/// pending/claim bookkeeping. SQLite's single-writer semantics make each
/// append/claim atomic without extra application-level locking.
#[derive(Clone)]
pub struct SqliteStreamStore {
    pool: SqlitePool,
}

impl SqliteStreamStore {
    pub async fn new(db_path: &Path) -> anyhow::Result<Self> {
        let pool = init_store_db(db_path).await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn read_once(
        &self,
        group: &str,
        consumer: &str,
        stream: &str,
        max: usize,
    ) -> Result<Vec<StreamEntry>> {
        let mut tx = self.pool.begin().await.map_err(transport)?;

        let watermark: i64 = sqlx::query_scalar(
            "SELECT last_delivered_seq FROM stream_groups WHERE stream = ? AND group_name = ?",
        )
        .bind(stream)
        .bind(group)
        .fetch_optional(&mut *tx)
        .await
        .map_err(transport)?
        .unwrap_or(0);

        let rows = sqlx::query(
            "SELECT seq, id, fields_json FROM stream_records
             WHERE stream = ? AND seq > ? ORDER BY seq ASC LIMIT ?",
        )
        .bind(stream)
        .bind(watermark)
        .bind(max as i64)
        .fetch_all(&mut *tx)
        .await
        .map_err(transport)?;

        if rows.is_empty() {
            tx.commit().await.map_err(transport)?;
            return Ok(vec![]);
        }

        let mut entries = Vec::with_capacity(rows.len());
        let mut new_watermark = watermark;
        let delivered_at = now_ms();

        for row in &rows {
            let seq: i64 = row.get("seq");
            let id: String = row.get("id");
            let fields_json: String = row.get("fields_json");
            let fields: HashMap<String, String> = serde_json::from_str(&fields_json)
                .map_err(|e| DispatchError::validation(format!("corrupt stream record: {e}")))?;

            sqlx::query(
                "INSERT INTO stream_deliveries (stream, group_name, id, consumer, delivered_at, deliveries, acked)
                 VALUES (?, ?, ?, ?, ?, 1, 0)
                 ON CONFLICT(stream, group_name, id) DO UPDATE SET
                    consumer = excluded.consumer,
                    delivered_at = excluded.delivered_at,
                    deliveries = stream_deliveries.deliveries + 1",
            )
            .bind(stream)
            .bind(group)
            .bind(&id)
            .bind(consumer)
            .bind(delivered_at)
            .execute(&mut *tx)
            .await
            .map_err(transport)?;

            new_watermark = seq;
            entries.push((id, fields));
        }

        sqlx::query(
            "INSERT INTO stream_groups (stream, group_name, last_delivered_seq) VALUES (?, ?, ?)
             ON CONFLICT(stream, group_name) DO UPDATE SET last_delivered_seq = excluded.last_delivered_seq",
        )
        .bind(stream)
        .bind(group)
        .bind(new_watermark)
        .execute(&mut *tx)
        .await
        .map_err(transport)?;

        tx.commit().await.map_err(transport)?;
        Ok(entries)
    }
}

#[async_trait]
impl StreamStore for SqliteStreamStore {
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO stream_groups (stream, group_name, last_delivered_seq)
             VALUES (?, ?, 0)",
        )
        .bind(stream)
        .bind(group)
        .execute(&self.pool)
        .await
        .map_err(transport)?;
        Ok(())
    }

    async fn append(&self, stream: &str, fields: HashMap<String, String>) -> Result<String> {
        let fields_json = serde_json::to_string(&fields)
            .map_err(|e| DispatchError::validation(format!("failed to encode record: {e}")))?;
        let created_at = now_ms();

        let mut tx = self.pool.begin().await.map_err(transport)?;
        sqlx::query(
            "INSERT INTO stream_records (stream, id, fields_json, created_at) VALUES (?, '', ?, ?)",
        )
        .bind(stream)
        .bind(&fields_json)
        .bind(created_at)
        .execute(&mut *tx)
        .await
        .map_err(transport)?;

        let seq: i64 = sqlx::query_scalar("SELECT last_insert_rowid()")
            .fetch_one(&mut *tx)
            .await
            .map_err(transport)?;

        let id = format!("{created_at}-{seq}");
        sqlx::query("UPDATE stream_records SET id = ? WHERE seq = ?")
            .bind(&id)
            .bind(seq)
            .execute(&mut *tx)
            .await
            .map_err(transport)?;

        tx.commit().await.map_err(transport)?;
        Ok(id)
    }

    async fn read_new(
        &self,
        group: &str,
        consumer: &str,
        stream: &str,
        max: usize,
        block: Option<Duration>,
    ) -> Result<Vec<StreamEntry>> {
        let entries = self.read_once(group, consumer, stream, max).await?;
        if !entries.is_empty() || block.is_none() {
            return Ok(entries);
        }

        let deadline = block.unwrap();
        let step = Duration::from_millis(100);
        let mut waited = Duration::ZERO;
        loop {
            tokio::time::sleep(step.min(deadline.saturating_sub(waited))).await;
            waited += step;
            let entries = self.read_once(group, consumer, stream, max).await?;
            if !entries.is_empty() || waited >= deadline {
                return Ok(entries);
            }
        }
    }

    async fn read_history(
        &self,
        group: &str,
        consumer: &str,
        stream: &str,
        max: usize,
    ) -> Result<Vec<StreamEntry>> {
        let rows = sqlx::query(
            "SELECT d.id, r.fields_json FROM stream_deliveries d
             JOIN stream_records r ON r.stream = d.stream AND r.id = d.id
             WHERE d.stream = ? AND d.group_name = ? AND d.consumer = ? AND d.acked = 0
             ORDER BY d.delivered_at ASC LIMIT ?",
        )
        .bind(stream)
        .bind(group)
        .bind(consumer)
        .bind(max as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(transport)?;

        rows.into_iter()
            .map(|row| {
                let id: String = row.get("id");
                let fields_json: String = row.get("fields_json");
                let fields: HashMap<String, String> = serde_json::from_str(&fields_json)
                    .map_err(|e| DispatchError::validation(format!("corrupt stream record: {e}")))?;
                Ok((id, fields))
            })
            .collect()
    }

    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE stream_deliveries SET acked = 1 WHERE stream = ? AND group_name = ? AND id = ?",
        )
        .bind(stream)
        .bind(group)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(transport)?;
        Ok(())
    }

    async fn pending_scan(
        &self,
        stream: &str,
        group: &str,
        max: usize,
    ) -> Result<Vec<PendingEntry>> {
        let rows = sqlx::query(
            "SELECT id, delivered_at, deliveries, consumer FROM stream_deliveries
             WHERE stream = ? AND group_name = ? AND acked = 0
             ORDER BY delivered_at ASC LIMIT ?",
        )
        .bind(stream)
        .bind(group)
        .bind(max as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(transport)?;

        let now = now_ms();
        Ok(rows
            .into_iter()
            .map(|row| {
                let delivered_at: i64 = row.get("delivered_at");
                PendingEntry {
                    id: row.get("id"),
                    idle: Duration::from_millis((now - delivered_at).max(0) as u64),
                    deliveries: row.get("deliveries"),
                    consumer: row.get("consumer"),
                }
            })
            .collect())
    }

    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        ids: &[String],
        min_idle: Duration,
    ) -> Result<Vec<String>> {
        let now = now_ms();
        let min_idle_ms = min_idle.as_millis() as i64;
        let mut claimed = Vec::with_capacity(ids.len());

        for id in ids {
            let result = sqlx::query(
                "UPDATE stream_deliveries SET consumer = ?, delivered_at = ?, deliveries = deliveries + 1
                 WHERE stream = ? AND group_name = ? AND id = ? AND acked = 0 AND (? - delivered_at) >= ?",
            )
            .bind(consumer)
            .bind(now)
            .bind(stream)
            .bind(group)
            .bind(id)
            .bind(now)
            .bind(min_idle_ms)
            .execute(&self.pool)
            .await
            .map_err(transport)?;

            if result.rows_affected() > 0 {
                claimed.push(id.clone());
            }
        }

        Ok(claimed)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value, expires_at FROM kv_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(transport)?;

        let Some(row) = row else { return Ok(None) };
        let expires_at: Option<i64> = row.get("expires_at");
        if let Some(expires_at) = expires_at {
            if expires_at <= now_ms() {
                return Ok(None);
            }
        }
        Ok(Some(row.get("value")))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.map(|d| now_ms() + d.as_millis() as i64);
        sqlx::query(
            "INSERT INTO kv_store (key, value, expires_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(transport)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM kv_store WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(transport)?;
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let pattern = format!("{prefix}%");
        let now = now_ms();
        let rows = sqlx::query(
            "SELECT key FROM kv_store WHERE key LIKE ? AND (expires_at IS NULL OR expires_at > ?)",
        )
        .bind(&pattern)
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(transport)?;

        Ok(rows.into_iter().map(|row| row.get("key")).collect())
    }
}
