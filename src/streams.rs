//! Stream/key naming conventions shared by the controller, bot workers,
//! the producer, and ingress.

pub const GROUP: &str = "base";
pub const CONTROLLER_CONSUMER: &str = "CONTROLLER";
pub const CONTROL_STREAM: &str = "stream:tg_bot:control";
pub const REGISTRY_PREFIX: &str = "bot:";

pub fn primary_stream(bot_id: i64) -> String {
    format!("stream:tg_bot:{bot_id}")
}

pub fn broadcast_stream(bot_id: i64) -> String {
    format!("stream:tg_bot:broadcast:{bot_id}")
}

pub fn logs_stream(bot_id: i64) -> String {
    format!("stream:tg_bot:logs:{bot_id}")
}

pub fn registry_key(bot_id: i64) -> String {
    format!("{REGISTRY_PREFIX}{bot_id}")
}

pub fn bot_id_from_registry_key(key: &str) -> Option<i64> {
    key.strip_prefix(REGISTRY_PREFIX)?.parse().ok()
}

/// `"<token>:LOGS:<True|False>"`.
pub fn encode_registry_value(token: &str, want_logs: bool) -> String {
    format!("{token}:LOGS:{}", if want_logs { "True" } else { "False" })
}

pub fn decode_registry_value(value: &str) -> Option<(String, bool)> {
    let (token, flag) = value.split_once(":LOGS:")?;
    Some((token.to_string(), flag == "True"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_names() {
        assert_eq!(primary_stream(42), "stream:tg_bot:42");
        assert_eq!(broadcast_stream(42), "stream:tg_bot:broadcast:42");
        assert_eq!(logs_stream(42), "stream:tg_bot:logs:42");
        assert_eq!(registry_key(42), "bot:42");
    }

    #[test]
    fn test_bot_id_from_registry_key() {
        assert_eq!(bot_id_from_registry_key("bot:42"), Some(42));
        assert_eq!(bot_id_from_registry_key("other:42"), None);
        assert_eq!(bot_id_from_registry_key("bot:nope"), None);
    }

    #[test]
    fn test_registry_value_roundtrip() {
        let value = encode_registry_value("tokA", true);
        assert_eq!(value, "tokA:LOGS:True");
        assert_eq!(
            decode_registry_value(&value),
            Some(("tokA".to_string(), true))
        );

        let value = encode_registry_value("tokB", false);
        assert_eq!(decode_registry_value(&value), Some(("tokB".to_string(), false)));
    }
}
