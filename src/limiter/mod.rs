pub mod chat;
pub mod global;

pub use chat::ChatLimiter;
pub use global::GlobalLimiter;

/// Telegram's documented soft RPS budget per bot.
pub const GLOBAL_RPS: f64 = 28.0;
pub const PER_CHAT_DELAY_SECS: f64 = 1.0;
pub const PER_CHAT_EDIT_DELAY_SECS: f64 = 3.05;
pub const PER_GROUP_MSG_DELAY_SECS: f64 = 3.05;
