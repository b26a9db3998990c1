//! HTTP route handlers for the chat API.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chat::core::interrupt::InterruptStatus;
use crate::chat::{ChatError, ConversationState, ThreadId, TurnEvent, UserInput};

use super::state::AppState;

type ApiError = (StatusCode, String);

/// Create the API router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/chat/get_new_chat_id", get(new_chat_id))
        .route("/api/chat/{thread_id}", post(start_turn).delete(delete_thread))
        .route("/api/chat/{thread_id}/stream", get(stream_turn))
        .route("/api/chat/{thread_id}/resume", post(resume_turn))
        .route("/api/chat/{thread_id}/state", get(current_state))
        .route("/api/chat/{thread_id}/history", get(history))
        .route("/api/chat/{thread_id}/interrupt", get(interrupt_status))
        .with_state(state)
}

fn api_error(err: &ChatError) -> ApiError {
    let status = match err {
        ChatError::InvalidState(_) => StatusCode::CONFLICT,
        ChatError::InvalidFilter(_) | ChatError::InterruptValidation(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "scholar-agent",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Fresh thread identifier.
#[derive(Debug, Serialize, Deserialize)]
pub struct NewChatResponse {
    /// Thread to use for the next requests.
    pub thread_id: ThreadId,
}

async fn new_chat_id() -> Json<NewChatResponse> {
    Json(NewChatResponse {
        thread_id: ThreadId::new(),
    })
}

/// Acknowledgement of a stored user input.
#[derive(Debug, Serialize, Deserialize)]
pub struct TurnAccepted {
    /// Owning thread.
    pub thread_id: ThreadId,
    /// Sequence number of the stored checkpoint.
    pub seq: i64,
}

async fn start_turn(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<ThreadId>,
    Json(input): Json<UserInput>,
) -> Result<(StatusCode, Json<TurnAccepted>), ApiError> {
    let checkpoint = state
        .orchestrator
        .submit(thread_id, input)
        .await
        .map_err(|err| api_error(&err))?;
    Ok((
        StatusCode::ACCEPTED,
        Json(TurnAccepted {
            thread_id,
            seq: checkpoint.seq,
        }),
    ))
}

/// Query string of the stream endpoint.
#[derive(Debug, Deserialize)]
pub struct StreamParams {
    /// JSON-encoded answer to the pending interrupt.
    pub resume: Option<String>,
}

/// Body of the resume endpoint.
#[derive(Debug, Deserialize)]
pub struct ResumeRequest {
    /// Answer to the pending interrupt.
    pub resume: Value,
}

fn sse(
    events: BoxStream<'static, TurnEvent>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let frames = events.map(|event| Event::default().event(event.name()).json_data(event.payload()));
    Sse::new(frames).keep_alive(KeepAlive::default())
}

async fn stream_turn(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<ThreadId>,
    Query(params): Query<StreamParams>,
) -> Result<impl IntoResponse, ApiError> {
    let resume = params
        .resume
        .map(|raw| serde_json::from_str::<Value>(&raw))
        .transpose()
        .map_err(|err| (StatusCode::BAD_REQUEST, format!("invalid resume value: {err}")))?;
    Ok(sse(state.orchestrator.stream_turn(thread_id, resume)))
}

async fn resume_turn(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<ThreadId>,
    Json(request): Json<ResumeRequest>,
) -> impl IntoResponse {
    sse(state.orchestrator.stream_turn(thread_id, Some(request.resume)))
}

async fn current_state(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<ThreadId>,
) -> Result<Json<Option<ConversationState>>, ApiError> {
    state
        .orchestrator
        .current_state(thread_id)
        .await
        .map(Json)
        .map_err(|err| api_error(&err))
}

async fn history(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<ThreadId>,
) -> Result<Json<Vec<ConversationState>>, ApiError> {
    state
        .orchestrator
        .history(thread_id)
        .await
        .map(Json)
        .map_err(|err| api_error(&err))
}

async fn interrupt_status(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<ThreadId>,
) -> Result<Json<InterruptStatus>, ApiError> {
    state
        .orchestrator
        .interrupt_status(thread_id)
        .await
        .map(Json)
        .map_err(|err| api_error(&err))
}

async fn delete_thread(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<ThreadId>,
) -> Result<StatusCode, ApiError> {
    state
        .orchestrator
        .delete_thread(thread_id)
        .await
        .map_err(|err| api_error(&err))?;
    Ok(StatusCode::NO_CONTENT)
}
