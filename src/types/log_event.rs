use std::collections::HashMap;

use super::envelope::{ChatId, MessageIdValue, MessageKind, ReplyMarkup};
use super::error::DispatchError;

/// Outcome record a worker appends to a bot's (optional) log stream after
/// dispatching a message. Null/unset fields are omitted on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEvent {
    pub kind: MessageKind,
    pub status: u8,
    pub bot_id: i64,
    pub chat_id: ChatId,
    pub text: Option<String>,
    pub reply_markup: Option<ReplyMarkup>,
    pub reply_to_message_id: Option<MessageIdValue>,
    pub message_id: Option<MessageIdValue>,
    pub sent_msg_id: Option<i64>,
    pub external_id: Option<i64>,
    pub details: Option<String>,
}

impl LogEvent {
    pub fn to_fields(&self) -> Result<HashMap<String, String>, DispatchError> {
        let mut fields = HashMap::new();
        fields.insert("type".to_string(), self.kind.as_str().to_string());
        fields.insert("status".to_string(), self.status.to_string());
        fields.insert("bot_id".to_string(), self.bot_id.to_string());
        fields.insert("chat_id".to_string(), self.chat_id.to_string());

        if let Some(text) = &self.text {
            fields.insert("text".to_string(), text.clone());
        }
        if let Some(markup) = &self.reply_markup {
            let encoded = serde_json::to_string(markup).map_err(|e| {
                DispatchError::validation(format!("failed to encode reply_markup: {e}"))
            })?;
            fields.insert("reply_markup".to_string(), encoded);
        }
        if let Some(reply_to) = &self.reply_to_message_id {
            fields.insert("reply_to_message_id".to_string(), message_id_to_string(reply_to));
        }
        if let Some(message_id) = &self.message_id {
            fields.insert("message_id".to_string(), message_id_to_string(message_id));
        }
        if let Some(sent_msg_id) = self.sent_msg_id {
            fields.insert("sent_msg_id".to_string(), sent_msg_id.to_string());
        }
        if let Some(external_id) = self.external_id {
            fields.insert("external_id".to_string(), external_id.to_string());
        }
        if let Some(details) = &self.details {
            fields.insert("details".to_string(), details.clone());
        }

        Ok(fields)
    }
}

fn message_id_to_string(value: &MessageIdValue) -> String {
    match value {
        MessageIdValue::Int(n) => n.to_string(),
        MessageIdValue::Str(s) => s.clone(),
    }
}
