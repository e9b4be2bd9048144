use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::Mutex;

use crate::store::StreamStore;
use crate::types::envelope::ChatId;
use crate::types::error::Result;

use super::global::GlobalLimiter;

fn ceil_ttl(delay: Duration) -> Duration {
    Duration::from_secs(delay.as_secs_f64().ceil() as u64)
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// The three per-chat/per-group delay windows, shared cross-process via the
/// stream store's key/value facet. A chat id whose textual form starts with
/// `-` is a group and uses the group window for sends; edits always use the
/// edit window regardless of chat type.
pub struct ChatLimiter {
    store: Arc<dyn StreamStore>,
    global: Arc<GlobalLimiter>,
    critical: Mutex<()>,
    per_chat_delay: Duration,
    per_chat_edit_delay: Duration,
    per_group_delay: Duration,
}

impl ChatLimiter {
    pub fn new(
        store: Arc<dyn StreamStore>,
        global: Arc<GlobalLimiter>,
        per_chat_delay: Duration,
        per_chat_edit_delay: Duration,
        per_group_delay: Duration,
    ) -> Self {
        Self {
            store,
            global,
            critical: Mutex::new(()),
            per_chat_delay,
            per_chat_edit_delay,
            per_group_delay,
        }
    }

    pub async fn acquire_send(&self, chat_id: &ChatId, bot_id: i64) -> Result<()> {
        self.global.acquire(bot_id).await;
        let (prefix, delay) = if chat_id.is_group() {
            ("limiter:group:chat_id:", self.per_group_delay)
        } else {
            ("limiter:send:chat_id:", self.per_chat_delay)
        };
        self.acquire_window(prefix, delay, chat_id, bot_id).await
    }

    pub async fn acquire_edit(&self, chat_id: &ChatId, bot_id: i64) -> Result<()> {
        self.global.acquire(bot_id).await;
        self.acquire_window("limiter:edit:chat_id:", self.per_chat_edit_delay, chat_id, bot_id)
            .await
    }

    async fn acquire_window(
        &self,
        prefix: &str,
        delay: Duration,
        chat_id: &ChatId,
        bot_id: i64,
    ) -> Result<()> {
        let _guard = self.critical.lock().await;
        let key = format!("{prefix}{}:{bot_id}", chat_id.as_key_fragment());

        if let Some(stored) = self.store.get(&key).await? {
            if let Ok(last) = stored.parse::<f64>() {
                let wait = delay.as_secs_f64() - (now_secs() - last);
                if wait > 0.0 {
                    tokio::time::sleep(Duration::from_secs_f64(wait)).await;
                }
            }
        }

        self.store
            .set(&key, &now_secs().to_string(), Some(ceil_ttl(delay)))
            .await
    }
}
