use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::limiter::ChatLimiter;
use crate::producer::Producer;
use crate::store::StreamStore;
use crate::streams;
use crate::telegram::TelegramClient;
use crate::types::envelope::{Envelope, MessageKind, ServicePayload};
use crate::worker::BotWorker;

const CONTROL_READ_COUNT: usize = 2;
const CONTROL_BLOCK: Duration = Duration::from_millis(2000);
const MAX_PENDING_TO_SCAN: usize = 10;
const IDLE_THRESHOLD: Duration = Duration::from_millis(30_000);
const RESTORE_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Drains the control stream (`add_bot`/`remove_bot`/`pulse`) and owns the
/// live registry of worker handles. Exactly one instance runs per process.
pub struct Controller {
    store: Arc<dyn StreamStore>,
    chat_limiter: Arc<ChatLimiter>,
    producer: Arc<Producer>,
    workers: Mutex<HashMap<i64, JoinHandle<()>>>,
    telegram_factory: Box<dyn Fn(&str) -> TelegramClient + Send + Sync>,
}

impl Controller {
    pub fn new(store: Arc<dyn StreamStore>, chat_limiter: Arc<ChatLimiter>, producer: Arc<Producer>) -> Self {
        Self {
            store,
            chat_limiter,
            producer,
            workers: Mutex::new(HashMap::new()),
            telegram_factory: Box::new(TelegramClient::new),
        }
    }

    /// Swaps the Telegram client constructor, used by tests to point bot
    /// spawning at a wiremock server instead of the real Bot API.
    #[cfg(test)]
    pub fn with_telegram_factory(
        mut self,
        factory: impl Fn(&str) -> TelegramClient + Send + Sync + 'static,
    ) -> Self {
        self.telegram_factory = Box::new(factory);
        self
    }

    /// Scans the bot registry and spawns a worker per live entry. Retries
    /// on transport failure, excluding bots already restored, rather than
    /// the recursive-with-exclusion-set shape this pattern is sometimes
    /// given: a flat loop carries the restored set across attempts.
    pub async fn restore_bot_consumers(self: &Arc<Self>) {
        let mut restored = std::collections::HashSet::new();

        loop {
            let keys = match self.store.scan_prefix(streams::REGISTRY_PREFIX).await {
                Ok(keys) => keys,
                Err(e) => {
                    warn!(error = %e, "registry scan failed, retrying restore");
                    tokio::time::sleep(RESTORE_RETRY_DELAY).await;
                    continue;
                }
            };

            let mut transport_failed = false;
            for key in &keys {
                let Some(bot_id) = streams::bot_id_from_registry_key(key) else {
                    continue;
                };
                if restored.contains(&bot_id) {
                    continue;
                }

                match self.store.get(key).await {
                    Ok(Some(value)) => {
                        if let Some((token, want_logs)) = streams::decode_registry_value(&value) {
                            self.spawn_worker(bot_id, token, want_logs).await;
                        } else {
                            warn!(bot_id, "malformed registry value during restore");
                        }
                        restored.insert(bot_id);
                    }
                    Ok(None) => {
                        restored.insert(bot_id);
                    }
                    Err(e) => {
                        warn!(bot_id, error = %e, "transport failure restoring bot");
                        transport_failed = true;
                    }
                }
            }

            if !transport_failed {
                info!(count = restored.len(), "bot consumers restored");
                return;
            }
            tokio::time::sleep(RESTORE_RETRY_DELAY).await;
        }
    }

    pub async fn run(self: Arc<Self>) {
        self.restore_bot_consumers().await;

        if let Err(e) = self.store.ensure_group(streams::CONTROL_STREAM, streams::GROUP).await {
            warn!(error = %e, "failed to ensure control group, controller not starting");
            return;
        }

        let mut last_reclaim = tokio::time::Instant::now() - Duration::from_secs(60);
        loop {
            if last_reclaim.elapsed() >= Duration::from_secs(60) {
                if let Err(e) = self.reclaim().await {
                    warn!(error = %e, "control stream reclaim failed");
                }
                last_reclaim = tokio::time::Instant::now();
            }

            match self
                .store
                .read_new(
                    streams::GROUP,
                    streams::CONTROLLER_CONSUMER,
                    streams::CONTROL_STREAM,
                    CONTROL_READ_COUNT,
                    Some(CONTROL_BLOCK),
                )
                .await
            {
                Ok(entries) => {
                    for (id, fields) in entries {
                        self.handle(&fields).await;
                        if let Err(e) = self
                            .store
                            .ack(streams::CONTROL_STREAM, streams::GROUP, &id)
                            .await
                        {
                            warn!(id, error = %e, "failed to ack control message");
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "control read failed, backing off");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    async fn reclaim(&self) -> crate::types::error::Result<()> {
        let pending = self
            .store
            .pending_scan(streams::CONTROL_STREAM, streams::GROUP, MAX_PENDING_TO_SCAN)
            .await?;
        let stuck: Vec<String> = pending
            .into_iter()
            .filter(|p| p.idle >= IDLE_THRESHOLD)
            .map(|p| p.id)
            .collect();
        if stuck.is_empty() {
            return Ok(());
        }

        let claimed = self
            .store
            .claim(
                streams::CONTROL_STREAM,
                streams::GROUP,
                streams::CONTROLLER_CONSUMER,
                &stuck,
                IDLE_THRESHOLD,
            )
            .await?;
        if claimed.is_empty() {
            return Ok(());
        }

        let entries = self
            .store
            .read_history(streams::GROUP, streams::CONTROLLER_CONSUMER, streams::CONTROL_STREAM, 10)
            .await?;
        for (id, fields) in entries {
            self.handle(&fields).await;
            if let Err(e) = self.store.ack(streams::CONTROL_STREAM, streams::GROUP, &id).await {
                warn!(id, error = %e, "failed to ack reclaimed control message");
            }
        }
        Ok(())
    }

    async fn handle(&self, fields: &HashMap<String, String>) {
        let envelope = match Envelope::from_fields(fields) {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "dropping invalid control envelope");
                return;
            }
        };

        let service = match envelope.as_service() {
            Ok(s) => s,
            Err(e) => {
                warn!(kind = ?envelope.kind, error = %e, "dropping non-service envelope on control stream");
                return;
            }
        };

        match envelope.kind {
            MessageKind::Pulse => self.handle_pulse(service),
            MessageKind::AddBot => self.handle_add_bot(service).await,
            MessageKind::RemoveBot => self.handle_remove_bot(service.bot_id).await,
            MessageKind::SendMsg | MessageKind::DelMsg | MessageKind::EditMsg => {
                warn!(kind = ?envelope.kind, "task kind on control stream, dropping");
            }
        }
    }

    fn handle_pulse(&self, service: &ServicePayload) {
        info!(bot_id = service.bot_id, "pulse");
    }

    async fn handle_add_bot(&self, service: &ServicePayload) {
        let key = streams::registry_key(service.bot_id);
        match self.store.get(&key).await {
            Ok(Some(_)) => {
                info!(bot_id = service.bot_id, "add_bot: already activated");
                return;
            }
            Err(e) => {
                warn!(bot_id = service.bot_id, error = %e, "add_bot: registry lookup failed");
                return;
            }
            Ok(None) => {}
        }

        let value = streams::encode_registry_value(&service.token, service.want_logs);
        if let Err(e) = self.store.set(&key, &value, None).await {
            warn!(bot_id = service.bot_id, error = %e, "add_bot: failed to write registry");
            return;
        }

        self.spawn_worker(service.bot_id, service.token.clone(), service.want_logs).await;
    }

    async fn handle_remove_bot(&self, bot_id: i64) {
        if let Some(handle) = self.workers.lock().await.remove(&bot_id) {
            handle.abort();
        }
        if let Err(e) = self.store.delete(&streams::registry_key(bot_id)).await {
            warn!(bot_id, error = %e, "remove_bot: failed to delete registry key");
        }
        info!(bot_id, "bot removed");
    }

    async fn spawn_worker(&self, bot_id: i64, token: String, want_logs: bool) {
        let telegram = (self.telegram_factory)(&token);
        let worker = BotWorker::new(
            bot_id,
            telegram,
            want_logs,
            self.store.clone(),
            self.chat_limiter.clone(),
            self.producer.clone(),
        );

        if let Some(handle) = worker.spawn().await {
            let mut workers = self.workers.lock().await;
            if let Some(old) = workers.insert(bot_id, handle) {
                old.abort();
            }
        }
    }

    #[cfg(test)]
    pub async fn worker_count(&self) -> usize {
        self.workers.lock().await.len()
    }

    #[cfg(test)]
    pub async fn has_worker(&self, bot_id: i64) -> bool {
        self.workers.lock().await.contains_key(&bot_id)
    }
}
