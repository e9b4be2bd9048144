use serde::{Deserialize, Serialize};

use super::error::DispatchError;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Pulse,
    AddBot,
    RemoveBot,
    SendMsg,
    DelMsg,
    EditMsg,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pulse => "pulse",
            Self::AddBot => "add_bot",
            Self::RemoveBot => "remove_bot",
            Self::SendMsg => "send_msg",
            Self::DelMsg => "del_msg",
            Self::EditMsg => "edit_msg",
        }
    }
}

/// A chat identifier as it travels the wire: Telegram numeric chat ids for
/// private/group chats, but occasionally a string in upstream payloads.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ChatId {
    Int(i64),
    Str(String),
}

impl ChatId {
    /// A leading '-' marks a group/supergroup chat id in Telegram's id space.
    pub fn is_group(&self) -> bool {
        match self {
            ChatId::Int(n) => *n < 0,
            ChatId::Str(s) => s.starts_with('-'),
        }
    }

    pub fn as_key_fragment(&self) -> String {
        match self {
            ChatId::Int(n) => n.to_string(),
            ChatId::Str(s) => s.clone(),
        }
    }
}

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatId::Int(n) => write!(f, "{n}"),
            ChatId::Str(s) => write!(f, "{s}"),
        }
    }
}

/// A message identifier, carried as either an int or a string depending on
/// the producer that emitted it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum MessageIdValue {
    Int(i64),
    Str(String),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct InlineButton {
    pub text: String,
    pub callback_data: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplyMarkup {
    pub inline_keyboard: Vec<Vec<InlineButton>>,
}

impl ReplyMarkup {
    /// The outer shape present but the inner list empty is treated as "no markup".
    pub fn is_effectively_empty(&self) -> bool {
        self.inline_keyboard.iter().all(|row| row.is_empty())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServicePayload {
    pub bot_id: i64,
    pub token: String,
    #[serde(default)]
    pub want_logs: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskPayload {
    pub bot_id: i64,
    pub chat_id: ChatId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageIdValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_markup: Option<ReplyMarkup>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_message_id: Option<MessageIdValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<i64>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Payload {
    Service(ServicePayload),
    Task(TaskPayload),
}

/// The top-level message shape carried on every stream record. On the wire,
/// `data` lives as a JSON-encoded string inside the record's flat field map;
/// `to_fields`/`from_fields` handle that flattening.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub kind: MessageKind,
    pub data: Payload,
}

impl Envelope {
    pub fn new_service(kind: MessageKind, data: ServicePayload) -> Self {
        Self {
            kind,
            data: Payload::Service(data),
        }
    }

    pub fn new_task(kind: MessageKind, data: TaskPayload) -> Self {
        Self {
            kind,
            data: Payload::Task(data),
        }
    }

    pub fn as_task(&self) -> Result<&TaskPayload, DispatchError> {
        match &self.data {
            Payload::Task(t) => Ok(t),
            Payload::Service(_) => Err(DispatchError::validation(format!(
                "envelope kind {:?} carries a service payload, expected a task payload",
                self.kind
            ))),
        }
    }

    pub fn as_service(&self) -> Result<&ServicePayload, DispatchError> {
        match &self.data {
            Payload::Service(s) => Ok(s),
            Payload::Task(_) => Err(DispatchError::validation(format!(
                "envelope kind {:?} carries a task payload, expected a service payload",
                self.kind
            ))),
        }
    }

    /// Flatten into the stream record's field map: `type` plus a JSON-encoded `data`.
    pub fn to_fields(&self) -> Result<std::collections::HashMap<String, String>, DispatchError> {
        let mut fields = std::collections::HashMap::new();
        fields.insert("type".to_string(), self.kind.as_str().to_string());
        let data_json = match &self.data {
            Payload::Service(s) => serde_json::to_string(s),
            Payload::Task(t) => serde_json::to_string(t),
        }
        .map_err(|e| DispatchError::validation(format!("failed to encode envelope data: {e}")))?;
        fields.insert("data".to_string(), data_json);
        Ok(fields)
    }

    /// Parse a stream record's flat field map back into a typed envelope.
    pub fn from_fields(
        fields: &std::collections::HashMap<String, String>,
    ) -> Result<Self, DispatchError> {
        let type_str = fields
            .get("type")
            .ok_or_else(|| DispatchError::validation("missing 'type' field"))?;
        let kind = match type_str.as_str() {
            "pulse" => MessageKind::Pulse,
            "add_bot" => MessageKind::AddBot,
            "remove_bot" => MessageKind::RemoveBot,
            "send_msg" => MessageKind::SendMsg,
            "del_msg" => MessageKind::DelMsg,
            "edit_msg" => MessageKind::EditMsg,
            other => {
                return Err(DispatchError::validation(format!(
                    "unknown message type: {other}"
                )))
            }
        };
        let data_str = fields
            .get("data")
            .ok_or_else(|| DispatchError::validation("missing 'data' field"))?;

        let data = match kind {
            MessageKind::Pulse | MessageKind::AddBot | MessageKind::RemoveBot => {
                let service: ServicePayload = serde_json::from_str(data_str).map_err(|e| {
                    DispatchError::validation(format!("invalid service payload: {e}"))
                })?;
                Payload::Service(service)
            }
            MessageKind::SendMsg | MessageKind::DelMsg | MessageKind::EditMsg => {
                let task: TaskPayload = serde_json::from_str(data_str)
                    .map_err(|e| DispatchError::validation(format!("invalid task payload: {e}")))?;
                Payload::Task(task)
            }
        };

        Ok(Self { kind, data })
    }
}
