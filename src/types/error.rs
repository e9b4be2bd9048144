use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum DispatchError {
    #[error("transport error: {message}")]
    Transport { message: String },

    #[error("auth error validating bot {bot_id}: {message}")]
    Auth { bot_id: i64, message: String },

    #[error("rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: f64 },

    #[error("forbidden: bot was blocked or kicked from chat {chat_id}")]
    Forbidden { chat_id: String },

    #[error("telegram api error: {message}")]
    Api { message: String },

    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("operation cancelled")]
    Cancelled,
}

impl DispatchError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn auth(bot_id: i64, message: impl Into<String>) -> Self {
        Self::Auth {
            bot_id,
            message: message.into(),
        }
    }

    pub fn rate_limited(retry_after_secs: f64) -> Self {
        Self::RateLimited { retry_after_secs }
    }

    pub fn forbidden(chat_id: impl Into<String>) -> Self {
        Self::Forbidden {
            chat_id: chat_id.into(),
        }
    }

    pub fn api(message: impl Into<String>) -> Self {
        Self::Api {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// True for errors that should leave the message pending for reclaim
    /// rather than being recorded as a terminal, acked outcome.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Cancelled)
    }

    /// Text stored in a LogEvent's `details` field for a failed dispatch.
    pub fn details(&self) -> String {
        match self {
            Self::Transport { message } => message.clone(),
            Self::Auth { message, .. } => message.clone(),
            Self::RateLimited { .. } => "rate limited".to_string(),
            Self::Forbidden { .. } => "Failed send message".to_string(),
            Self::Api { message } => message.clone(),
            Self::Validation { message } => message.clone(),
            Self::Cancelled => "cancelled".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error() {
        let err = DispatchError::transport("connection refused");
        assert_eq!(err.to_string(), "transport error: connection refused");
        assert!(err.is_transient());
    }

    #[test]
    fn test_auth_error() {
        let err = DispatchError::auth(42, "invalid token");
        assert_eq!(
            err.to_string(),
            "auth error validating bot 42: invalid token"
        );
        assert!(!err.is_transient());
    }

    #[test]
    fn test_rate_limited_error() {
        let err = DispatchError::rate_limited(5.0);
        assert_eq!(err.to_string(), "rate limited: retry after 5s");
    }

    #[test]
    fn test_forbidden_error() {
        let err = DispatchError::forbidden("100");
        assert_eq!(
            err.to_string(),
            "forbidden: bot was blocked or kicked from chat 100"
        );
        assert_eq!(err.details(), "Failed send message");
    }

    #[test]
    fn test_cancelled_is_transient() {
        assert!(DispatchError::Cancelled.is_transient());
    }

    #[test]
    fn test_validation_not_transient() {
        let err = DispatchError::validation("bad payload");
        assert!(!err.is_transient());
    }

    #[test]
    fn test_result_type() {
        let ok: Result<i32> = Ok(1);
        assert!(ok.is_ok());
        let err: Result<i32> = Err(DispatchError::Cancelled);
        assert!(err.is_err());
    }
}
