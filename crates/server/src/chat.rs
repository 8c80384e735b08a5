use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use regdesk_agent::{DialogueOrchestrator, SessionId, FALLBACK_REPLY};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::error::{json_body, new_correlation_id, ApiError};

#[derive(Clone)]
pub struct ChatState {
    orchestrator: Arc<DialogueOrchestrator>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ChatMessage {
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatReply {
    pub reply: String,
}

pub fn router(orchestrator: Arc<DialogueOrchestrator>) -> Router {
    Router::new().route("/chat/{session_id}", post(chat)).with_state(ChatState { orchestrator })
}

/// One conversational turn. Oracle outages answer 503 (504 on timeout) with an
/// apologetic reply instead of an error body; unreadable bodies are a 422.
pub async fn chat(
    State(state): State<ChatState>,
    Path(session_id): Path<String>,
    payload: Result<Json<ChatMessage>, JsonRejection>,
) -> Result<(StatusCode, Json<ChatReply>), ApiError> {
    let correlation_id = new_correlation_id();
    let body = json_body(payload, &correlation_id)?;
    let session_id = SessionId::new(session_id);

    Ok(match state.orchestrator.handle_message(&session_id, &body.message).await {
        Ok(reply) => (StatusCode::OK, Json(ChatReply { reply })),
        Err(failure) => {
            let status = if failure.is_timeout() {
                StatusCode::GATEWAY_TIMEOUT
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            error!(
                event_name = "chat.request.failed",
                correlation_id = %correlation_id,
                session_id = %session_id,
                status = status.as_u16(),
                error = %failure,
                "chat turn failed"
            );
            (status, Json(ChatReply { reply: FALLBACK_REPLY.to_string() }))
        }
    })
}
