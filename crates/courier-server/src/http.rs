//! HTTP surface for the message log and conversation views.
//!
//! The durable path of the system: create message, fetch history, mark
//! read, unread count, and the conversation list. Caller identity comes
//! from the `x-user-id` header, a stand-in for the external auth
//! collaborator that owns credential validation.

use crate::handlers::AppState;
use crate::metrics;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use courier_core::{
    conversation::validate_user_id, ChatMessage, ConversationId, ConversationSummary,
    MessageKind, StoreError, UserDirectory,
};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// API errors, mapped onto HTTP statuses.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Caller identity missing from the request.
    #[error("Missing or invalid x-user-id header")]
    Unauthorized,

    /// Malformed or missing required fields; caller-recoverable.
    #[error("{0}")]
    Validation(String),

    /// Referenced counterpart is unknown to the identity collaborator.
    #[error("Unknown user: {0}")]
    NotFound(String),

    /// Persistence refused the write; transient, retry is the caller's call.
    #[error("Storage failure: {0}")]
    Storage(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        metrics::record_error(match self {
            Self::Unauthorized => "auth",
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::Storage(_) => "storage",
        });
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (self.status(), body).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InvalidMessage(msg) => Self::Validation(msg.to_string()),
            StoreError::CapacityExceeded(_) => Self::Storage(e.to_string()),
        }
    }
}

/// The message-log and conversation routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/messages", post(create_message))
        .route("/api/messages/:counterpart", get(fetch_history))
        .route("/api/conversations", get(list_conversations))
        .route("/api/conversations/:conversation/read", post(mark_read))
        .route("/api/unread", get(unread_count))
}

/// Resolve the calling user from the `x-user-id` header.
fn caller(headers: &HeaderMap) -> Result<String, ApiError> {
    let user_id = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;
    validate_user_id(user_id).map_err(|_| ApiError::Unauthorized)?;
    Ok(user_id.to_string())
}

#[derive(Debug, Deserialize)]
struct CreateMessageRequest {
    recipient_id: String,
    content: String,
    #[serde(default)]
    kind: Option<MessageKind>,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    page: Option<usize>,
    limit: Option<usize>,
}

/// `POST /api/messages` - persist a message to the log.
async fn create_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateMessageRequest>,
) -> Result<(StatusCode, Json<ChatMessage>), ApiError> {
    let sender_id = caller(&headers)?;

    if body.recipient_id.is_empty() {
        return Err(ApiError::Validation("recipient_id is required".into()));
    }
    if !state.directory.knows(&body.recipient_id) {
        return Err(ApiError::NotFound(body.recipient_id));
    }

    let message = state.store.send(
        &sender_id,
        &body.recipient_id,
        &body.content,
        body.kind.unwrap_or_default(),
    )?;

    metrics::record_stored_message();
    debug!(conversation = %message.conversation, sender = %sender_id, "Message stored");

    Ok((StatusCode::CREATED, Json(message)))
}

/// `GET /api/messages/{counterpart}` - one ascending page of history.
async fn fetch_history(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(counterpart): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<ChatMessage>>, ApiError> {
    let user_id = caller(&headers)?;

    let conversation = ConversationId::for_pair(&user_id, &counterpart)
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    Ok(Json(state.store.history(&conversation, query.page, query.limit)))
}

/// `POST /api/conversations/{conversation}/read` - record read receipts.
async fn mark_read(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(conversation): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user_id = caller(&headers)?;

    let conversation = ConversationId::parse(&conversation)
        .map_err(|e| ApiError::Validation(e.to_string()))?;
    if !conversation.involves(&user_id) {
        return Err(ApiError::Validation(
            "Not a participant of this conversation".into(),
        ));
    }

    let updated = state.store.mark_read(&conversation, &user_id);
    metrics::record_read_receipts(updated);

    Ok(Json(serde_json::json!({ "updated": updated })))
}

/// `GET /api/unread` - total unread messages for the caller.
async fn unread_count(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user_id = caller(&headers)?;
    let count = state.store.unread_count(&user_id);
    Ok(Json(serde_json::json!({ "count": count })))
}

/// `GET /api/conversations` - the caller's conversation list.
async fn list_conversations(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<ConversationSummary>>, ApiError> {
    let user_id = caller(&headers)?;
    let directory: &dyn UserDirectory = &state.directory;
    Ok(Json(state.aggregator.list_conversations(&user_id, directory)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn test_state() -> Arc<AppState> {
        Arc::new(AppState::new(Config::default()))
    }

    fn headers_for(user_id: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-user-id", user_id.parse().unwrap());
        headers
    }

    #[tokio::test]
    async fn test_create_message_requires_known_recipient() {
        let state = test_state();
        state.directory.upsert("bob", None, None);

        let result = create_message(
            State(state.clone()),
            headers_for("alice"),
            Json(CreateMessageRequest {
                recipient_id: "ghost".into(),
                content: "hi".into(),
                kind: None,
            }),
        )
        .await;
        assert!(matches!(result, Err(ApiError::NotFound(_))));

        let (status, Json(message)) = create_message(
            State(state),
            headers_for("alice"),
            Json(CreateMessageRequest {
                recipient_id: "bob".into(),
                content: "hi".into(),
                kind: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(message.conversation.as_str(), "alice:bob");
        assert!(!message.is_read);
    }

    #[tokio::test]
    async fn test_create_message_validation_maps_to_400() {
        let state = test_state();
        state.directory.upsert("bob", None, None);

        let result = create_message(
            State(state),
            headers_for("alice"),
            Json(CreateMessageRequest {
                recipient_id: "bob".into(),
                content: String::new(),
                kind: None,
            }),
        )
        .await;

        match result {
            Err(e @ ApiError::Validation(_)) => {
                assert_eq!(e.status(), StatusCode::BAD_REQUEST);
            }
            other => panic!("Expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_history_mark_read_unread_flow() {
        let state = test_state();
        state.directory.upsert("bob", None, None);

        create_message(
            State(state.clone()),
            headers_for("alice"),
            Json(CreateMessageRequest {
                recipient_id: "bob".into(),
                content: "hi".into(),
                kind: None,
            }),
        )
        .await
        .unwrap();

        let Json(page) = fetch_history(
            State(state.clone()),
            headers_for("bob"),
            Path("alice".into()),
            Query(HistoryQuery {
                page: None,
                limit: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].content, "hi");

        let Json(count) = unread_count(State(state.clone()), headers_for("bob"))
            .await
            .unwrap();
        assert_eq!(count["count"], 1);

        let Json(ack) = mark_read(
            State(state.clone()),
            headers_for("bob"),
            Path("alice:bob".into()),
        )
        .await
        .unwrap();
        assert_eq!(ack["updated"], 1);

        // Second call is a no-op
        let Json(ack) = mark_read(
            State(state.clone()),
            headers_for("bob"),
            Path("alice:bob".into()),
        )
        .await
        .unwrap();
        assert_eq!(ack["updated"], 0);

        let Json(count) = unread_count(State(state), headers_for("bob"))
            .await
            .unwrap();
        assert_eq!(count["count"], 0);
    }

    #[tokio::test]
    async fn test_mark_read_rejects_outsiders() {
        let state = test_state();

        let result = mark_read(
            State(state),
            headers_for("eve"),
            Path("alice:bob".into()),
        )
        .await;
        assert!(matches!(result, Err(ApiError::Validation(_))));
    }

    #[tokio::test]
    async fn test_list_conversations_for_caller() {
        let state = test_state();
        state.directory.upsert("alice", Some("Alice".into()), None);
        state.directory.upsert("bob", None, None);

        create_message(
            State(state.clone()),
            headers_for("alice"),
            Json(CreateMessageRequest {
                recipient_id: "bob".into(),
                content: "hi".into(),
                kind: None,
            }),
        )
        .await
        .unwrap();

        let Json(rows) = list_conversations(State(state), headers_for("bob"))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].counterpart.display_name, "Alice");
        assert_eq!(rows[0].unread_count, 1);
        assert!(!rows[0].counterpart_online);
    }

    #[tokio::test]
    async fn test_missing_identity_is_unauthorized() {
        let state = test_state();
        let result = unread_count(State(state), HeaderMap::new()).await;
        assert!(matches!(result, Err(ApiError::Unauthorized)));
    }
}
