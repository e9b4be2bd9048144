use std::sync::Arc;

use tracing::warn;

use crate::store::StreamStore;
use crate::types::envelope::Envelope;
use crate::types::error::Result;
use crate::types::log_event::LogEvent;

/// Serializes typed job/outcome messages and appends them to a stream.
/// Used both by the ingress handlers (appending Envelopes) and by bot
/// workers emitting LogEvents.
pub struct Producer {
    store: Arc<dyn StreamStore>,
}

impl Producer {
    pub fn new(store: Arc<dyn StreamStore>) -> Self {
        Self { store }
    }

    pub async fn publish_envelope(
        &self,
        envelope: &Envelope,
        stream: &str,
        raise_on_error: bool,
    ) -> Result<()> {
        let fields = envelope.to_fields()?;
        self.append(fields, stream, raise_on_error).await
    }

    pub async fn publish_log(
        &self,
        event: &LogEvent,
        stream: &str,
        raise_on_error: bool,
    ) -> Result<()> {
        let fields = event.to_fields()?;
        self.append(fields, stream, raise_on_error).await
    }

    async fn append(
        &self,
        fields: std::collections::HashMap<String, String>,
        stream: &str,
        raise_on_error: bool,
    ) -> Result<()> {
        match self.store.append(stream, fields).await {
            Ok(_) => Ok(()),
            Err(e) if raise_on_error => Err(e),
            Err(e) => {
                warn!(stream, error = %e, "failed to publish message, swallowing");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStreamStore;
    use crate::types::envelope::{ChatId, MessageKind, TaskPayload};
    use tempfile::TempDir;

    async fn test_producer() -> (Producer, Arc<dyn StreamStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn StreamStore> =
            Arc::new(SqliteStreamStore::new(&dir.path().join("d.db")).await.unwrap());
        (Producer::new(store.clone()), store, dir)
    }

    #[tokio::test]
    async fn test_publish_envelope_appends_to_stream() {
        let (producer, store, _dir) = test_producer().await;
        store.ensure_group("stream:tg_bot:42", "base").await.unwrap();

        let envelope = Envelope::new_task(
            MessageKind::SendMsg,
            TaskPayload {
                bot_id: 42,
                chat_id: ChatId::Int(100),
                text: Some("hi".to_string()),
                message_id: None,
                reply_markup: None,
                reply_to_message_id: None,
                external_id: None,
            },
        );

        producer
            .publish_envelope(&envelope, "stream:tg_bot:42", false)
            .await
            .unwrap();

        let entries = store
            .read_new("base", "c1", "stream:tg_bot:42", 10, None)
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_publish_log_appends_to_stream() {
        let (producer, store, _dir) = test_producer().await;
        store.ensure_group("stream:tg_bot:logs:1", "base").await.unwrap();

        let event = LogEvent {
            kind: MessageKind::SendMsg,
            status: 1,
            bot_id: 1,
            chat_id: ChatId::Int(1),
            text: None,
            reply_markup: None,
            reply_to_message_id: None,
            message_id: None,
            sent_msg_id: None,
            external_id: None,
            details: None,
        };

        let result = producer
            .publish_log(&event, "stream:tg_bot:logs:1", false)
            .await;
        assert!(result.is_ok());
    }
}
