use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::limiter::ChatLimiter;
use crate::producer::Producer;
use crate::store::StreamStore;
use crate::streams::{self, broadcast_stream, logs_stream, primary_stream};
use crate::telegram::{split_message, TelegramClient};
use crate::types::envelope::{Envelope, MessageKind, TaskPayload};
use crate::types::log_event::LogEvent;

const RECLAIM_INTERVAL: Duration = Duration::from_secs(60);
const IDLE_THRESHOLD: Duration = Duration::from_millis(30_000);
const MAX_PENDING_TO_SCAN: usize = 10;
const PRIMARY_READ_COUNT: usize = 10;
const PRIMARY_BLOCK: Duration = Duration::from_millis(2000);
const BROADCAST_READ_COUNT: usize = 10;
const HISTORY_READ_COUNT: usize = 10;

/// Drains a single bot's primary and broadcast streams, applying rate
/// limits and dispatching to Telegram. One instance per live bot,
/// constructed by the controller and run as its own tokio task.
pub struct BotWorker {
    bot_id: i64,
    want_logs: bool,
    store: Arc<dyn StreamStore>,
    telegram: TelegramClient,
    chat_limiter: Arc<ChatLimiter>,
    producer: Arc<Producer>,
    reclaim_interval: Duration,
    idle_threshold: Duration,
}

impl BotWorker {
    pub fn new(
        bot_id: i64,
        telegram: TelegramClient,
        want_logs: bool,
        store: Arc<dyn StreamStore>,
        chat_limiter: Arc<ChatLimiter>,
        producer: Arc<Producer>,
    ) -> Self {
        Self {
            bot_id,
            want_logs,
            store,
            telegram,
            chat_limiter,
            producer,
            reclaim_interval: RECLAIM_INTERVAL,
            idle_threshold: IDLE_THRESHOLD,
        }
    }

    #[cfg(test)]
    pub fn with_thresholds(mut self, reclaim_interval: Duration, idle_threshold: Duration) -> Self {
        self.reclaim_interval = reclaim_interval;
        self.idle_threshold = idle_threshold;
        self
    }

    fn consumer(&self) -> String {
        self.bot_id.to_string()
    }

    /// Validates the token against Telegram and ensures consumer groups
    /// exist. Returns `None` without spawning if validation fails (the
    /// registry key is deleted so the bot is not retried at restart).
    pub async fn spawn(self) -> Option<JoinHandle<()>> {
        let primary = primary_stream(self.bot_id);
        let broadcast = broadcast_stream(self.bot_id);
        let logs = logs_stream(self.bot_id);

        if let Err(e) = self.ensure_groups(&primary, &broadcast, &logs).await {
            warn!(bot_id = self.bot_id, error = %e, "failed to ensure consumer groups");
            return None;
        }

        if let Err(e) = self.telegram.get_me().await {
            warn!(bot_id = self.bot_id, error = %e, "token validation failed");
            let _ = self.store.delete(&streams::registry_key(self.bot_id)).await;
            return None;
        }

        info!(bot_id = self.bot_id, "bot worker starting");
        Some(tokio::spawn(async move { self.run(primary, broadcast).await }))
    }

    async fn ensure_groups(&self, primary: &str, broadcast: &str, logs: &str) -> crate::types::error::Result<()> {
        self.store.ensure_group(primary, streams::GROUP).await?;
        self.store.ensure_group(broadcast, streams::GROUP).await?;
        if self.want_logs {
            self.store.ensure_group(logs, streams::GROUP).await?;
        }
        Ok(())
    }

    async fn run(self, primary: String, broadcast: String) {
        let mut last_reclaim = tokio::time::Instant::now() - self.reclaim_interval;

        loop {
            if last_reclaim.elapsed() >= self.reclaim_interval {
                if let Err(e) = self.reclaim(&primary).await {
                    warn!(bot_id = self.bot_id, stream = %primary, error = %e, "reclaim failed");
                }
                if let Err(e) = self.reclaim(&broadcast).await {
                    warn!(bot_id = self.bot_id, stream = %broadcast, error = %e, "reclaim failed");
                }
                last_reclaim = tokio::time::Instant::now();
            }

            let consumer = self.consumer();
            match self
                .store
                .read_new(streams::GROUP, &consumer, &primary, PRIMARY_READ_COUNT, Some(PRIMARY_BLOCK))
                .await
            {
                Ok(entries) => {
                    for (id, fields) in entries {
                        self.process(&primary, id, fields).await;
                    }
                }
                Err(e) => {
                    warn!(bot_id = self.bot_id, error = %e, "primary read failed, backing off");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            }

            match self
                .store
                .read_new(streams::GROUP, &consumer, &broadcast, BROADCAST_READ_COUNT, None)
                .await
            {
                Ok(entries) => {
                    for (id, fields) in entries {
                        self.process(&broadcast, id, fields).await;
                    }
                }
                Err(e) => {
                    warn!(bot_id = self.bot_id, error = %e, "broadcast read failed, backing off");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    async fn reclaim(&self, stream: &str) -> crate::types::error::Result<()> {
        let pending = self.store.pending_scan(stream, streams::GROUP, MAX_PENDING_TO_SCAN).await?;
        let stuck: Vec<String> = pending
            .into_iter()
            .filter(|p| p.idle > self.idle_threshold)
            .map(|p| p.id)
            .collect();
        if stuck.is_empty() {
            return Ok(());
        }

        let consumer = self.consumer();
        let claimed = self
            .store
            .claim(stream, streams::GROUP, &consumer, &stuck, self.idle_threshold)
            .await?;
        if claimed.is_empty() {
            return Ok(());
        }

        let entries = self
            .store
            .read_history(streams::GROUP, &consumer, stream, HISTORY_READ_COUNT)
            .await?;
        for (id, fields) in entries {
            self.process(stream, id, fields).await;
        }
        Ok(())
    }

    /// Every pulled message is acked after processing regardless of
    /// outcome; failures surface as a LogEvent, not redelivery.
    async fn process(&self, stream: &str, id: String, fields: HashMap<String, String>) {
        let events = self.dispatch(&fields).await;

        if self.want_logs {
            let logs = logs_stream(self.bot_id);
            for event in &events {
                if let Err(e) = self.producer.publish_log(event, &logs, false).await {
                    warn!(bot_id = self.bot_id, error = %e, "failed to publish log event");
                }
            }
        }

        if let Err(e) = self.store.ack(stream, streams::GROUP, &id).await {
            warn!(bot_id = self.bot_id, id, error = %e, "failed to ack message");
        }
    }

    async fn dispatch(&self, fields: &HashMap<String, String>) -> Vec<LogEvent> {
        let envelope = match Envelope::from_fields(fields) {
            Ok(e) => e,
            Err(e) => {
                warn!(bot_id = self.bot_id, error = %e, "dropping invalid envelope");
                return Vec::new();
            }
        };

        let task = match envelope.as_task() {
            Ok(t) => t,
            Err(e) => {
                warn!(bot_id = self.bot_id, kind = ?envelope.kind, error = %e, "dropping non-task envelope on data stream");
                return Vec::new();
            }
        };

        match envelope.kind {
            MessageKind::SendMsg => self.dispatch_send(task).await,
            MessageKind::EditMsg => self.dispatch_edit(task).await.into_iter().collect(),
            MessageKind::DelMsg => self.dispatch_delete(task).await.into_iter().collect(),
            MessageKind::Pulse | MessageKind::AddBot | MessageKind::RemoveBot => {
                warn!(bot_id = self.bot_id, kind = ?envelope.kind, "control kind on data stream, dropping");
                Vec::new()
            }
        }
    }

    /// One LogEvent per part, each carrying that part's own text and
    /// returned message id, rather than one aggregated event for the task.
    async fn dispatch_send(&self, task: &TaskPayload) -> Vec<LogEvent> {
        let text = task.text.clone().unwrap_or_default();
        let parts = split_message(&text);
        let mut events = Vec::with_capacity(parts.len());

        for part in &parts {
            if let Err(e) = self.chat_limiter.acquire_send(&task.chat_id, task.bot_id).await {
                warn!(bot_id = task.bot_id, error = %e, "rate limiter acquire failed");
                events.push(self.send_log_event(task, part, 0, 0, Some(e.details())));
                continue;
            }

            let event = match self
                .telegram
                .send(
                    &task.chat_id,
                    part,
                    task.reply_markup.as_ref(),
                    task.reply_to_message_id.as_ref(),
                )
                .await
            {
                Ok(id) if id != 0 => self.send_log_event(task, part, 1, id, None),
                Ok(id) => self.send_log_event(task, part, 0, id, Some("Failed send message".to_string())),
                Err(e) => {
                    warn!(bot_id = task.bot_id, error = %e, "send failed");
                    self.send_log_event(task, part, 0, 0, Some(e.details()))
                }
            };
            events.push(event);
        }

        events
    }

    fn send_log_event(
        &self,
        task: &TaskPayload,
        part: &str,
        status: u8,
        sent_msg_id: i64,
        details: Option<String>,
    ) -> LogEvent {
        LogEvent {
            kind: MessageKind::SendMsg,
            status,
            bot_id: task.bot_id,
            chat_id: task.chat_id.clone(),
            text: Some(part.to_string()),
            reply_markup: task.reply_markup.clone(),
            reply_to_message_id: task.reply_to_message_id.clone(),
            message_id: None,
            sent_msg_id: Some(sent_msg_id),
            external_id: task.external_id,
            details,
        }
    }

    async fn dispatch_edit(&self, task: &TaskPayload) -> Option<LogEvent> {
        let Some(message_id) = task.message_id.clone() else {
            warn!(bot_id = task.bot_id, "edit_msg with null message_id, dropping");
            return None;
        };

        if let Err(e) = self.chat_limiter.acquire_edit(&task.chat_id, task.bot_id).await {
            return Some(self.edit_log_event(task, &message_id, 0, Some(e.details())));
        }

        let result = self
            .telegram
            .edit(&task.chat_id, &message_id, task.text.as_deref(), task.reply_markup.as_ref())
            .await;

        let (status, details) = match result {
            Ok(true) => (1, None),
            Ok(false) => (0, Some("Failed to change msg".to_string())),
            Err(e) => (0, Some(e.details())),
        };

        Some(self.edit_log_event(task, &message_id, status, details))
    }

    fn edit_log_event(
        &self,
        task: &TaskPayload,
        message_id: &crate::types::envelope::MessageIdValue,
        status: u8,
        details: Option<String>,
    ) -> LogEvent {
        LogEvent {
            kind: MessageKind::EditMsg,
            status,
            bot_id: task.bot_id,
            chat_id: task.chat_id.clone(),
            text: task.text.clone(),
            reply_markup: task.reply_markup.clone(),
            reply_to_message_id: task.reply_to_message_id.clone(),
            message_id: Some(message_id.clone()),
            sent_msg_id: None,
            external_id: task.external_id,
            details,
        }
    }

    async fn dispatch_delete(&self, task: &TaskPayload) -> Option<LogEvent> {
        let Some(message_id) = task.message_id.clone() else {
            warn!(bot_id = task.bot_id, "del_msg with null message_id, dropping");
            return None;
        };

        if let Err(e) = self.chat_limiter.acquire_send(&task.chat_id, task.bot_id).await {
            return Some(self.delete_log_event(task, &message_id, 0, Some(e.details())));
        }

        let result = self.telegram.delete(&task.chat_id, &message_id).await;
        let (status, details) = match result {
            Ok(true) => (1, None),
            Ok(false) => (0, Some("Failed to delete msg".to_string())),
            Err(e) => (0, Some(e.details())),
        };

        Some(self.delete_log_event(task, &message_id, status, details))
    }

    fn delete_log_event(
        &self,
        task: &TaskPayload,
        message_id: &crate::types::envelope::MessageIdValue,
        status: u8,
        details: Option<String>,
    ) -> LogEvent {
        LogEvent {
            kind: MessageKind::DelMsg,
            status,
            bot_id: task.bot_id,
            chat_id: task.chat_id.clone(),
            text: None,
            reply_markup: None,
            reply_to_message_id: task.reply_to_message_id.clone(),
            message_id: Some(message_id.clone()),
            sent_msg_id: None,
            external_id: task.external_id,
            details,
        }
    }
}
