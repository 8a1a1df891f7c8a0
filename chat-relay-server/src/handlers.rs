use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::sse::{Event, Sse},
    response::{IntoResponse, Response},
    Json,
};
use chat_relay_core::export::render_markdown;
use chat_relay_core::session::Turn;
use chat_relay_core::Error;
use chat_relay_stream::DEFAULT_SESSION_ID;
use futures::stream::{Stream, StreamExt};
use std::convert::Infallible;

use crate::state::{AppState, ChatQuery, ChatRequest, ReplyRequest};

pub async fn root_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "message": "Chat relay streaming backend is running." }))
}

fn session_or_default(session_id: Option<String>) -> String {
    session_id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| DEFAULT_SESSION_ID.to_string())
}

fn relay(
    state: &AppState,
    prompt: String,
    session_id: Option<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let session_id = session_or_default(session_id);
    tracing::info!(session = %session_id, "Streaming reply");

    let stream = state
        .coalescer
        .stream(prompt, session_id)
        .map(|event| Ok(Event::default().data(event.data())));

    Sse::new(stream)
}

pub async fn chat_stream_handler(
    State(state): State<AppState>,
    Query(query): Query<ChatQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    relay(&state, query.prompt, query.session_id)
}

pub async fn chat_handler(
    State(state): State<AppState>,
    Json(payload): Json<ChatRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    relay(&state, payload.prompt, payload.session_id)
}

/// Whole reply in one JSON body; a backend timeout maps to 504
pub async fn reply_handler(
    State(state): State<AppState>,
    Json(payload): Json<ReplyRequest>,
) -> Response {
    let session_id = session_or_default(payload.session_id);
    tracing::info!(session = %session_id, "Answering without streaming");

    match state.coalescer.reply(payload.message, session_id).await {
        Ok(response) => Json(serde_json::json!({ "response": response })).into_response(),
        Err(failure) => {
            let status = if failure.is_timeout() {
                StatusCode::GATEWAY_TIMEOUT
            } else {
                StatusCode::BAD_GATEWAY
            };
            tracing::warn!("Reply failed with {}: {}", status, failure);
            (
                status,
                Json(serde_json::json!({ "detail": failure.to_string() })),
            )
                .into_response()
        }
    }
}

pub async fn session_history_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Json<Vec<Turn>> {
    Json(state.sessions().get_history(&session_id).await)
}

pub async fn export_markdown_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    let turns = state.sessions().get_history(&session_id).await;
    match render_markdown(&session_id, &turns) {
        Ok(document) => (
            [(header::CONTENT_TYPE, "text/markdown; charset=utf-8")],
            document,
        )
            .into_response(),
        Err(err) => error_response(err),
    }
}

fn error_response(err: Error) -> Response {
    let status = match &err {
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let message = match err {
        Error::NotFound(message) | Error::Validation(message) => message,
        other => other.to_string(),
    };
    (
        status,
        Json(serde_json::json!({ "status": "error", "message": message })),
    )
        .into_response()
}
