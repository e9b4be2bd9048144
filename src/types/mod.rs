pub mod envelope;
pub mod error;
pub mod log_event;

pub use envelope::{
    ChatId, Envelope, InlineButton, MessageIdValue, MessageKind, Payload, ReplyMarkup,
    ServicePayload, TaskPayload,
};
pub use error::{DispatchError, Result};
pub use log_event::LogEvent;
