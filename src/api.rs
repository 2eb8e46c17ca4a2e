//! HTTP surface (spec §6). Generalizes the teacher's `create_router` +
//! `#[axum::debug_handler]` handler style (`src/api.rs`) from directory
//! ingestion and graph visualization endpoints to the session/ingest/chat
//! surface spec §6 names.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Multipart, Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::answerer::AnswerEvent;
use crate::app_state::AppState;
use crate::error::{AppError, AppResult};
use crate::models::Session;

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/sessions", post(create_session_handler).get(list_sessions_handler))
        .route(
            "/sessions/{id}",
            get(get_session_handler).put(update_session_handler).delete(delete_session_handler),
        )
        .route("/ingest", post(ingest_handler))
        .route("/chat", post(chat_stream_handler))
        .route("/chat/non-streaming", post(chat_non_streaming_handler))
        .route("/chat/history/{session_id}", get(chat_history_handler))
        .route("/health", get(health_handler))
        .route("/shutdown", post(shutdown_handler))
        .with_state(app_state)
}

#[derive(Deserialize)]
struct CreateSessionPayload {
    name: Option<String>,
}

#[derive(Deserialize)]
struct UpdateSessionPayload {
    name: String,
}

async fn create_session_handler(
    State(state): State<AppState>,
    Json(payload): Json<CreateSessionPayload>,
) -> AppResult<Json<Session>> {
    let name = payload.name.unwrap_or_else(|| "Untitled session".to_string());
    let session = state.relational.create_session(&name).await?;
    Ok(Json(session))
}

async fn list_sessions_handler(State(state): State<AppState>) -> AppResult<Json<Vec<Session>>> {
    Ok(Json(state.relational.list_sessions().await?))
}

async fn get_session_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Session>> {
    let session = state
        .relational
        .get_session(&id)
        .await?
        .ok_or_else(|| AppError::SessionGone(id.clone()))?;
    Ok(Json(session))
}

async fn update_session_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<UpdateSessionPayload>,
) -> AppResult<Json<Session>> {
    if state.relational.get_session(&id).await?.is_none() {
        return Err(AppError::SessionGone(id));
    }
    state.relational.rename_session(&id, &payload.name).await?;
    let session = state
        .relational
        .get_session(&id)
        .await?
        .ok_or_else(|| AppError::SessionGone(id.clone()))?;
    Ok(Json(session))
}

async fn delete_session_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    // Delete is a barrier (spec §5): trip the cancellation flag first so any
    // in-flight Ingest/Answer for this session observes it on its next check
    // and aborts with SessionGone, rather than racing the deletes below.
    state.cancel_session(&id);
    state.relational.delete_session(&id).await?;
    state.graph.delete_where(&id).await.map_err(AppError::Internal)?;
    state.forget_session_lock(&id);
    Ok(axum::http::StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
struct IngestResponse {
    status: String,
    session_id: String,
    file_name: String,
    size_bytes: usize,
    chunks: usize,
    nodes_created: usize,
    relationships_created: usize,
    batch_id: String,
}

async fn ingest_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<Json<IngestResponse>> {
    let mut session_id: Option<String> = None;
    let mut file_name: Option<String> = None;
    let mut bytes: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::InvalidInput(e.to_string()))?
    {
        match field.name().unwrap_or_default() {
            "session_id" => {
                session_id = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| AppError::InvalidInput(e.to_string()))?,
                );
            }
            "file" => {
                file_name = field.file_name().map(|s| s.to_string());
                bytes = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| AppError::InvalidInput(e.to_string()))?
                        .to_vec(),
                );
            }
            _ => {}
        }
    }

    let session_id = session_id.ok_or_else(|| AppError::InvalidInput("missing session_id".to_string()))?;
    let file_name = file_name.unwrap_or_else(|| "upload.pdf".to_string());
    let bytes = bytes.ok_or_else(|| AppError::InvalidInput("missing file".to_string()))?;
    let size_bytes = bytes.len();

    let cancellation = state.cancellation_token(&session_id);
    let summary = state
        .ingestor
        .ingest_pdf(&session_id, &file_name, &bytes, cancellation)
        .await?;

    Ok(Json(IngestResponse {
        status: "ingested".to_string(),
        session_id,
        file_name,
        size_bytes,
        chunks: summary.chunks_created,
        nodes_created: summary.entities_created
            + summary.facts_created
            + summary.concepts_created
            + summary.cases_created,
        relationships_created: summary.relations_created,
        batch_id: uuid::Uuid::new_v4().to_string(),
    }))
}

#[derive(Deserialize)]
struct ChatPayload {
    session_id: String,
    message: String,
}

#[derive(Serialize)]
struct ChatResponse {
    response: String,
    sources: Vec<crate::answerer::SourceRef>,
}

async fn chat_stream_handler(
    State(state): State<AppState>,
    Json(payload): Json<ChatPayload>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let lock = state.session_lock(&payload.session_id);
    let max_message_chars = state.config.max_message_chars;

    let stream = async_stream::stream! {
        if payload.message.chars().count() > max_message_chars {
            let err = AppError::InvalidInput(format!(
                "message exceeds the {max_message_chars} character limit"
            ));
            yield Ok(Event::default().event("error").data(err.to_string()));
            return;
        }

        let _guard = lock.lock().await;
        let cancellation = state.cancellation_token(&payload.session_id);
        let mut events = match state.answerer.answer(&payload.session_id, &payload.message, cancellation).await {
            Ok(events) => events,
            Err(e) => {
                yield Ok(Event::default().event("error").data(e.to_string()));
                return;
            }
        };

        while let Some(event) = events.next().await {
            match event {
                Ok(AnswerEvent::Fragment(text)) => {
                    yield Ok(Event::default().data(json!({ "chunk": text }).to_string()));
                }
                Ok(AnswerEvent::Done { sources }) => {
                    yield Ok(Event::default().data(json!({ "done": true, "sources": sources }).to_string()));
                }
                Err(e) => {
                    yield Ok(Event::default().event("error").data(e.to_string()));
                }
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("keep-alive"))
}

async fn chat_non_streaming_handler(
    State(state): State<AppState>,
    Json(payload): Json<ChatPayload>,
) -> AppResult<Json<ChatResponse>> {
    if payload.message.chars().count() > state.config.max_message_chars {
        return Err(AppError::InvalidInput(format!(
            "message exceeds the {} character limit",
            state.config.max_message_chars
        )));
    }

    let lock = state.session_lock(&payload.session_id);
    let _guard = lock.lock().await;

    let cancellation = state.cancellation_token(&payload.session_id);
    let mut events = state
        .answerer
        .answer(&payload.session_id, &payload.message, cancellation)
        .await?;
    let mut response = String::new();
    let mut sources = Vec::new();

    while let Some(event) = events.next().await {
        match event? {
            AnswerEvent::Fragment(text) => response.push_str(&text),
            AnswerEvent::Done { sources: s } => sources = s,
        }
    }

    Ok(Json(ChatResponse { response, sources }))
}

#[derive(Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

#[derive(Serialize)]
struct HistoryResponse {
    session_id: String,
    messages: Vec<crate::models::Message>,
    total_count: usize,
}

async fn chat_history_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(params): Query<HistoryQuery>,
) -> AppResult<Json<HistoryResponse>> {
    if state.relational.get_session(&session_id).await?.is_none() {
        return Err(AppError::SessionGone(session_id));
    }

    let mut messages = state.relational.list_messages(&session_id).await?;
    let total_count = messages.len();
    if let Some(limit) = params.limit {
        if messages.len() > limit {
            messages = messages.split_off(messages.len() - limit);
        }
    }

    Ok(Json(HistoryResponse {
        session_id,
        messages,
        total_count,
    }))
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn shutdown_handler(State(state): State<AppState>) -> impl IntoResponse {
    info!("shutdown requested");
    if let Some(sender) = state.shutdown_sender.lock().unwrap().take() {
        let _ = sender.send(());
    }
    axum::http::StatusCode::OK
}
