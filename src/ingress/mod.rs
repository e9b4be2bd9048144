use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, patch, post},
    Json, Router,
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tracing::warn;

use crate::producer::Producer;
use crate::streams;
use crate::types::envelope::{ChatId, Envelope, MessageIdValue, MessageKind, ReplyMarkup, ServicePayload, TaskPayload};

const SEND_MULTI_COUNT: usize = 30;

/// Shared state for every ingress handler.
#[derive(Clone)]
pub struct AppState {
    pub producer: Arc<Producer>,
    pub ingress_token: String,
}

#[derive(Debug, Deserialize)]
pub struct AddBotRequest {
    pub bot_id: i64,
    pub token: String,
    #[serde(default)]
    pub want_logs: bool,
}

#[derive(Debug, Deserialize)]
pub struct RemoveBotRequest {
    pub bot_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct SendMsgRequest {
    pub bot_id: i64,
    pub chat_id: ChatId,
    pub text: String,
    #[serde(default)]
    pub reply_markup: Option<ReplyMarkup>,
    #[serde(default)]
    pub reply_to_message_id: Option<MessageIdValue>,
    #[serde(default)]
    pub external_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteMsgRequest {
    pub bot_id: i64,
    pub chat_id: ChatId,
    pub message_id: MessageIdValue,
}

#[derive(Debug, Deserialize)]
pub struct EditMsgRequest {
    pub bot_id: i64,
    pub chat_id: ChatId,
    pub message_id: MessageIdValue,
    pub text: String,
    #[serde(default)]
    pub reply_markup: Option<ReplyMarkup>,
}

fn accepted() -> Response {
    StatusCode::CREATED.into_response()
}

fn publish_failure(e: crate::types::error::DispatchError) -> Response {
    warn!(error = %e, "ingress: failed to publish to stream");
    (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({ "error": e.to_string() }))).into_response()
}

async fn add_bot(State(state): State<Arc<AppState>>, Json(req): Json<AddBotRequest>) -> Response {
    let envelope = Envelope::new_service(
        MessageKind::AddBot,
        ServicePayload { bot_id: req.bot_id, token: req.token, want_logs: req.want_logs },
    );
    match state.producer.publish_envelope(&envelope, streams::CONTROL_STREAM, true).await {
        Ok(()) => accepted(),
        Err(e) => publish_failure(e),
    }
}

async fn remove_bot(State(state): State<Arc<AppState>>, Json(req): Json<RemoveBotRequest>) -> Response {
    let envelope = Envelope::new_service(
        MessageKind::RemoveBot,
        ServicePayload { bot_id: req.bot_id, token: String::new(), want_logs: false },
    );
    match state.producer.publish_envelope(&envelope, streams::CONTROL_STREAM, true).await {
        Ok(()) => accepted(),
        Err(e) => publish_failure(e),
    }
}

async fn send_msg(State(state): State<Arc<AppState>>, Json(req): Json<SendMsgRequest>) -> Response {
    let envelope = Envelope::new_task(
        MessageKind::SendMsg,
        TaskPayload {
            bot_id: req.bot_id,
            chat_id: req.chat_id.clone(),
            text: Some(req.text),
            message_id: None,
            reply_markup: req.reply_markup,
            reply_to_message_id: req.reply_to_message_id,
            external_id: req.external_id,
        },
    );
    let stream = streams::primary_stream(req.bot_id);
    match state.producer.publish_envelope(&envelope, &stream, true).await {
        Ok(()) => accepted(),
        Err(e) => publish_failure(e),
    }
}

/// Fans out N identical numbered messages to the bot's primary stream.
async fn send_multi_msg(State(state): State<Arc<AppState>>, Json(req): Json<SendMsgRequest>) -> Response {
    let stream = streams::primary_stream(req.bot_id);
    for n in 1..=SEND_MULTI_COUNT {
        let envelope = Envelope::new_task(
            MessageKind::SendMsg,
            TaskPayload {
                bot_id: req.bot_id,
                chat_id: req.chat_id.clone(),
                text: Some(format!("Report {n}")),
                message_id: None,
                reply_markup: None,
                reply_to_message_id: None,
                external_id: req.external_id,
            },
        );
        if let Err(e) = state.producer.publish_envelope(&envelope, &stream, true).await {
            return publish_failure(e);
        }
    }
    accepted()
}

async fn broadcast(State(state): State<Arc<AppState>>, Json(req): Json<SendMsgRequest>) -> Response {
    let envelope = Envelope::new_task(
        MessageKind::SendMsg,
        TaskPayload {
            bot_id: req.bot_id,
            chat_id: req.chat_id.clone(),
            text: Some(req.text),
            message_id: None,
            reply_markup: req.reply_markup,
            reply_to_message_id: req.reply_to_message_id,
            external_id: req.external_id,
        },
    );
    let stream = streams::broadcast_stream(req.bot_id);
    match state.producer.publish_envelope(&envelope, &stream, true).await {
        Ok(()) => accepted(),
        Err(e) => publish_failure(e),
    }
}

async fn delete_msg(State(state): State<Arc<AppState>>, Json(req): Json<DeleteMsgRequest>) -> Response {
    let envelope = Envelope::new_task(
        MessageKind::DelMsg,
        TaskPayload {
            bot_id: req.bot_id,
            chat_id: req.chat_id.clone(),
            text: None,
            message_id: Some(req.message_id),
            reply_markup: None,
            reply_to_message_id: None,
            external_id: None,
        },
    );
    let stream = streams::broadcast_stream(req.bot_id);
    match state.producer.publish_envelope(&envelope, &stream, true).await {
        Ok(()) => accepted(),
        Err(e) => publish_failure(e),
    }
}

async fn edit_msg(State(state): State<Arc<AppState>>, Json(req): Json<EditMsgRequest>) -> Response {
    let envelope = Envelope::new_task(
        MessageKind::EditMsg,
        TaskPayload {
            bot_id: req.bot_id,
            chat_id: req.chat_id.clone(),
            text: Some(req.text),
            message_id: Some(req.message_id),
            reply_markup: req.reply_markup,
            reply_to_message_id: None,
            external_id: None,
        },
    );
    let stream = streams::broadcast_stream(req.bot_id);
    match state.producer.publish_envelope(&envelope, &stream, true).await {
        Ok(()) => accepted(),
        Err(e) => publish_failure(e),
    }
}

async fn bearer_token_middleware(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    request: Request<Body>,
    next: Next,
) -> Response {
    let auth_header = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match auth_header {
        Some(token) if token == state.ingress_token => next.run(request).await,
        _ => (StatusCode::UNAUTHORIZED, "Unauthorized").into_response(),
    }
}

pub fn create_router(state: AppState) -> Router {
    let state = Arc::new(state);

    Router::new()
        .route("/add", post(add_bot))
        .route("/remove", delete(remove_bot))
        .route("/send_msg", post(send_msg))
        .route("/send_multi_msg", post(send_multi_msg))
        .route("/broadcast", post(broadcast))
        .route("/msg", delete(delete_msg).patch(edit_msg))
        .layer(middleware::from_fn_with_state(state.clone(), bearer_token_middleware))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{SqliteStreamStore, StreamStore};
    use axum::body::Body;
    use axum::http::{header, Method, Request};
    use std::sync::Arc as StdArc;
    use tempfile::TempDir;
    use tower::ServiceExt;

    async fn test_app() -> (Router, StdArc<dyn StreamStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store: StdArc<dyn StreamStore> =
            StdArc::new(SqliteStreamStore::new(&dir.path().join("d.db")).await.unwrap());
        let producer = Arc::new(Producer::new(store.clone()));
        store.ensure_group(streams::CONTROL_STREAM, streams::GROUP).await.unwrap();

        let state = AppState { producer, ingress_token: "secret".to_string() };
        (create_router(state), store, dir)
    }

    fn authed(builder: axum::http::request::Builder) -> axum::http::request::Builder {
        builder.header(header::AUTHORIZATION, "Bearer secret")
    }

    #[tokio::test]
    async fn test_add_bot_appends_to_control_stream() {
        let (app, store, _dir) = test_app().await;
        let payload = serde_json::json!({ "bot_id": 7, "token": "tok", "want_logs": true });

        let response = app
            .oneshot(
                authed(Request::builder().method(Method::POST).uri("/add"))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(serde_json::to_string(&payload).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        let entries = store
            .read_new(streams::GROUP, "c1", streams::CONTROL_STREAM, 10, None)
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].1.get("type").unwrap(), "add_bot");
    }

    #[tokio::test]
    async fn test_send_msg_appends_to_primary_stream() {
        let (app, store, _dir) = test_app().await;
        store.ensure_group("stream:tg_bot:42", streams::GROUP).await.unwrap();
        let payload = serde_json::json!({ "bot_id": 42, "chat_id": 100, "text": "hi" });

        let response = app
            .oneshot(
                authed(Request::builder().method(Method::POST).uri("/send_msg"))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(serde_json::to_string(&payload).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        let entries = store
            .read_new(streams::GROUP, "c1", "stream:tg_bot:42", 10, None)
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_send_multi_msg_fans_out_thirty_messages() {
        let (app, store, _dir) = test_app().await;
        store.ensure_group("stream:tg_bot:42", streams::GROUP).await.unwrap();
        let payload = serde_json::json!({ "bot_id": 42, "chat_id": 100, "text": "ignored" });

        let response = app
            .oneshot(
                authed(Request::builder().method(Method::POST).uri("/send_multi_msg"))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(serde_json::to_string(&payload).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        let entries = store
            .read_new(streams::GROUP, "c1", "stream:tg_bot:42", 100, None)
            .await
            .unwrap();
        assert_eq!(entries.len(), 30);
    }

    #[tokio::test]
    async fn test_broadcast_appends_to_broadcast_stream() {
        let (app, store, _dir) = test_app().await;
        store.ensure_group("stream:tg_bot:broadcast:42", streams::GROUP).await.unwrap();
        let payload = serde_json::json!({ "bot_id": 42, "chat_id": 100, "text": "hi all" });

        let response = app
            .oneshot(
                authed(Request::builder().method(Method::POST).uri("/broadcast"))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(serde_json::to_string(&payload).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        let entries = store
            .read_new(streams::GROUP, "c1", "stream:tg_bot:broadcast:42", 10, None)
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_msg_rejects_without_bearer_token() {
        let (app, _store, _dir) = test_app().await;
        let payload = serde_json::json!({ "bot_id": 42, "chat_id": 100, "message_id": 5 });

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::DELETE)
                    .uri("/msg")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(serde_json::to_string(&payload).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_edit_msg_rejects_wrong_bearer_token() {
        let (app, _store, _dir) = test_app().await;
        let payload = serde_json::json!({ "bot_id": 42, "chat_id": 100, "message_id": 5, "text": "updated" });

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::PATCH)
                    .uri("/msg")
                    .header(header::CONTENT_TYPE, "application/json")
                    .header(header::AUTHORIZATION, "Bearer wrong")
                    .body(Body::from(serde_json::to_string(&payload).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
