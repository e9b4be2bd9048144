pub mod split;

use teloxide::payloads::{EditMessageReplyMarkupSetters, EditMessageTextSetters, SendMessageSetters};
use teloxide::requests::Requester;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, MessageId, ParseMode};
use teloxide::{ApiError, Bot, RequestError};

use crate::types::envelope::{ChatId, MessageIdValue, ReplyMarkup};
use crate::types::error::{DispatchError, Result};

pub use split::{split_message, TELEGRAM_MSG_LIMIT};

fn teloxide_chat_id(chat_id: &ChatId) -> Result<teloxide::types::ChatId> {
    let raw = match chat_id {
        ChatId::Int(n) => *n,
        ChatId::Str(s) => s
            .parse::<i64>()
            .map_err(|_| DispatchError::validation(format!("invalid chat_id: {s}")))?,
    };
    Ok(teloxide::types::ChatId(raw))
}

fn teloxide_message_id(value: &MessageIdValue) -> Result<MessageId> {
    let raw = match value {
        MessageIdValue::Int(n) => *n as i32,
        MessageIdValue::Str(s) => s
            .parse::<i32>()
            .map_err(|_| DispatchError::validation(format!("invalid message_id: {s}")))?,
    };
    Ok(MessageId(raw))
}

fn teloxide_markup(markup: &ReplyMarkup) -> Option<InlineKeyboardMarkup> {
    if markup.is_effectively_empty() {
        return None;
    }
    let rows = markup
        .inline_keyboard
        .iter()
        .map(|row| {
            row.iter()
                .map(|btn| InlineKeyboardButton::callback(btn.text.clone(), btn.callback_data.clone()))
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();
    Some(InlineKeyboardMarkup::new(rows))
}

/// One in-call retry on a rate-limit signal; any other failure is terminal
/// at this layer (the reclaim loop is the retry mechanism for transport
/// errors, not this wrapper).
async fn with_retry_after<F, Fut, T>(mut call: F) -> std::result::Result<T, RequestError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, RequestError>>,
{
    match call().await {
        Err(RequestError::RetryAfter(retry_after)) => {
            tokio::time::sleep(retry_after).await;
            call().await
        }
        other => other,
    }
}

fn is_forbidden(err: &RequestError) -> bool {
    matches!(
        err,
        RequestError::Api(ApiError::BotBlocked)
            | RequestError::Api(ApiError::BotKicked)
            | RequestError::Api(ApiError::ChatNotFound)
            | RequestError::Api(ApiError::UserDeactivated)
    )
}

/// Thin wrapper over teloxide's Bot request surface implementing the
/// retry-after and message-splitting policy this system requires.
pub struct TelegramClient {
    bot: Bot,
}

impl TelegramClient {
    pub fn new(token: &str) -> Self {
        Self { bot: Bot::new(token) }
    }

    #[cfg(test)]
    pub fn with_api_url(token: &str, api_url: reqwest::Url) -> Self {
        Self {
            bot: Bot::new(token).set_api_url(api_url),
        }
    }

    pub async fn get_me(&self) -> Result<()> {
        self.bot
            .get_me()
            .send()
            .await
            .map(|_| ())
            .map_err(|e| DispatchError::auth(0, e.to_string()))
    }

    /// Sends one part, honoring one retry-after. Returns `0` (not an error)
    /// for both forbidden and doubly-rate-limited outcomes, matching the
    /// "status=0 in the log event, worker continues" contract.
    pub async fn send(
        &self,
        chat_id: &ChatId,
        text: &str,
        reply_markup: Option<&ReplyMarkup>,
        reply_to: Option<&MessageIdValue>,
    ) -> Result<i64> {
        let tg_chat_id = teloxide_chat_id(chat_id)?;
        let markup = reply_markup.and_then(teloxide_markup);
        let reply_to_id = reply_to.map(teloxide_message_id).transpose()?;

        let result = with_retry_after(|| {
            let mut request = self.bot.send_message(tg_chat_id, text).parse_mode(ParseMode::Html);
            if let Some(markup) = markup.clone() {
                request = request.reply_markup(markup);
            }
            if let Some(reply_to_id) = reply_to_id {
                request = request.reply_to_message_id(reply_to_id);
            }
            request.send()
        })
        .await;

        match result {
            Ok(message) => Ok(message.id.0 as i64),
            Err(e) if is_forbidden(&e) => Ok(0),
            Err(RequestError::RetryAfter(_)) => Ok(0),
            Err(e) => Err(DispatchError::api(e.to_string())),
        }
    }

    pub async fn delete(&self, chat_id: &ChatId, message_id: &MessageIdValue) -> Result<bool> {
        let tg_chat_id = teloxide_chat_id(chat_id)?;
        let tg_message_id = teloxide_message_id(message_id)?;

        let result =
            with_retry_after(|| self.bot.delete_message(tg_chat_id, tg_message_id).send()).await;

        match result {
            Ok(_) => Ok(true),
            Err(e) if is_forbidden(&e) => Ok(false),
            Err(RequestError::RetryAfter(_)) => Ok(false),
            Err(e) => Err(DispatchError::api(e.to_string())),
        }
    }

    /// When `text` is `None`, edits the message's reply markup only
    /// (`editMessageReplyMarkup`) instead of requiring text on every edit.
    pub async fn edit(
        &self,
        chat_id: &ChatId,
        message_id: &MessageIdValue,
        text: Option<&str>,
        reply_markup: Option<&ReplyMarkup>,
    ) -> Result<bool> {
        let tg_chat_id = teloxide_chat_id(chat_id)?;
        let tg_message_id = teloxide_message_id(message_id)?;
        let markup = reply_markup.and_then(teloxide_markup);

        let result = match text {
            Some(t) => {
                let clamped = if t.chars().count() > TELEGRAM_MSG_LIMIT {
                    t.chars().take(TELEGRAM_MSG_LIMIT).collect::<String>()
                } else {
                    t.to_string()
                };
                with_retry_after(|| {
                    let mut request = self
                        .bot
                        .edit_message_text(tg_chat_id, tg_message_id, clamped.clone())
                        .parse_mode(ParseMode::Html);
                    if let Some(markup) = markup.clone() {
                        request = request.reply_markup(markup);
                    }
                    request.send()
                })
                .await
            }
            None => {
                with_retry_after(|| {
                    let mut request = self.bot.edit_message_reply_markup(tg_chat_id, tg_message_id);
                    if let Some(markup) = markup.clone() {
                        request = request.reply_markup(markup);
                    }
                    request.send()
                })
                .await
            }
        };

        match result {
            Ok(_) => Ok(true),
            Err(e) if is_forbidden(&e) => Ok(false),
            Err(RequestError::RetryAfter(_)) => Ok(false),
            Err(e) => Err(DispatchError::api(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ok_message_response(message_id: i64) -> serde_json::Value {
        serde_json::json!({
            "ok": true,
            "result": {
                "message_id": message_id,
                "date": 0,
                "chat": { "id": 100, "type": "private" }
            }
        })
    }

    async fn client_against(server: &MockServer) -> TelegramClient {
        let url = format!("{}/bot%s/", server.uri());
        TelegramClient::with_api_url("TEST_TOKEN", reqwest::Url::parse(&url).unwrap())
    }

    #[tokio::test]
    async fn test_send_returns_message_id_on_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTEST_TOKEN/sendMessage"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_message_response(555)))
            .mount(&server)
            .await;

        let client = client_against(&server).await;
        let id = client
            .send(&ChatId::Int(100), "hi", None, None)
            .await
            .unwrap();
        assert_eq!(id, 555);
    }

    #[tokio::test]
    async fn test_send_retries_once_after_rate_limit_and_returns_retry_result() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTEST_TOKEN/sendMessage"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("retry-after", "1")
                    .set_body_json(serde_json::json!({
                        "ok": false,
                        "error_code": 429,
                        "description": "Too Many Requests: retry after 1",
                        "parameters": { "retry_after": 1 }
                    })),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/botTEST_TOKEN/sendMessage"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_message_response(777)))
            .mount(&server)
            .await;

        let client = client_against(&server).await;
        let id = client
            .send(&ChatId::Int(100), "hi", None, None)
            .await
            .unwrap();
        assert_eq!(id, 777);
    }

    #[tokio::test]
    async fn test_send_forbidden_returns_zero_not_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTEST_TOKEN/sendMessage"))
            .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
                "ok": false,
                "error_code": 403,
                "description": "Forbidden: bot was blocked by the user"
            })))
            .mount(&server)
            .await;

        let client = client_against(&server).await;
        let id = client
            .send(&ChatId::Int(100), "hi", None, None)
            .await
            .unwrap();
        assert_eq!(id, 0);
    }

    #[tokio::test]
    async fn test_edit_clamps_text_over_limit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTEST_TOKEN/editMessageText"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_message_response(1)))
            .mount(&server)
            .await;

        let client = client_against(&server).await;
        let long_text = "a".repeat(5000);
        let ok = client
            .edit(
                &ChatId::Int(100),
                &MessageIdValue::Int(1),
                Some(&long_text),
                None,
            )
            .await
            .unwrap();
        assert!(ok);
    }

    #[tokio::test]
    async fn test_edit_with_empty_markup_sends_no_markup() {
        use crate::types::envelope::ReplyMarkup;

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTEST_TOKEN/editMessageText"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_message_response(1)))
            .mount(&server)
            .await;

        let client = client_against(&server).await;
        let markup = ReplyMarkup {
            inline_keyboard: vec![],
        };
        let ok = client
            .edit(
                &ChatId::Int(100),
                &MessageIdValue::Int(1),
                Some("hi"),
                Some(&markup),
            )
            .await
            .unwrap();
        assert!(ok);
    }

    #[tokio::test]
    async fn test_edit_with_no_text_calls_reply_markup_endpoint() {
        use crate::types::envelope::{InlineButton, ReplyMarkup};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTEST_TOKEN/editMessageReplyMarkup"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_message_response(1)))
            .mount(&server)
            .await;

        let client = client_against(&server).await;
        let markup = ReplyMarkup {
            inline_keyboard: vec![vec![InlineButton {
                text: "ok".to_string(),
                callback_data: "ok".to_string(),
            }]],
        };
        let ok = client
            .edit(&ChatId::Int(100), &MessageIdValue::Int(1), None, Some(&markup))
            .await
            .unwrap();
        assert!(ok);
    }

    #[test]
    fn test_invalid_chat_id_string_is_validation_error() {
        let result = teloxide_chat_id(&ChatId::Str("not-a-number".to_string()));
        assert!(result.is_err());
    }
}
