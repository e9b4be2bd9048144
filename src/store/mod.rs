pub mod sqlite;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::types::error::Result;

pub use sqlite::SqliteStreamStore;

/// One entry returned by `read_new`/`read_history`: a stream record id and
/// its flattened field map.
pub type StreamEntry = (String, HashMap<String, String>);

#[derive(Debug, Clone, PartialEq)]
pub struct PendingEntry {
    pub id: String,
    pub idle: Duration,
    pub deliveries: i64,
    pub consumer: String,
}

/// Capability over a durable, append-only stream with consumer-group
/// semantics, plus a small key/value facet for the bot registry and limiter
/// timestamps. All operations report transport failures distinctly from a
/// "group already exists" condition (which is treated as success).
#[async_trait]
pub trait StreamStore: Send + Sync {
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<()>;

    async fn append(&self, stream: &str, fields: HashMap<String, String>) -> Result<String>;

    async fn read_new(
        &self,
        group: &str,
        consumer: &str,
        stream: &str,
        max: usize,
        block: Option<Duration>,
    ) -> Result<Vec<StreamEntry>>;

    async fn read_history(
        &self,
        group: &str,
        consumer: &str,
        stream: &str,
        max: usize,
    ) -> Result<Vec<StreamEntry>>;

    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<()>;

    async fn pending_scan(
        &self,
        stream: &str,
        group: &str,
        max: usize,
    ) -> Result<Vec<PendingEntry>>;

    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        ids: &[String],
        min_idle: Duration,
    ) -> Result<Vec<String>>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}
