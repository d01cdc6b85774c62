//! HTTP surface for the document chat server.
//!
//! A compact Axum router over the application context:
//!
//! - `POST /documents/{file_name}` – Store an uploaded document (raw bytes
//!   body), ingest it, and index its chunks.
//! - `GET /documents` – List stored documents with sizes.
//! - `DELETE /documents/{file_name}` – Remove a document from every store;
//!   partial cleanup is reported as warnings in a 200 response.
//! - `POST /process` – Reset derived stores and rebuild them from the raw
//!   documents.
//! - `POST /ask` – Answer a question, threading conversation history through
//!   the named (or freshly minted) session.
//! - `GET /sessions`, `GET /sessions/{id}`, `POST /sessions/{id}/title`,
//!   `DELETE /sessions/{id}` – Conversation management.

use crate::app::AppContext;
use crate::chat::ChatStoreError;
use crate::index::IndexError;
use crate::lifecycle::LifecycleError;
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

/// Build the HTTP router over the shared application context.
pub fn create_router(context: Arc<AppContext>) -> Router {
    Router::new()
        .route(
            "/documents/:file_name",
            post(upload_document).delete(delete_document),
        )
        .route("/documents", get(list_documents))
        .route("/process", post(process_all))
        .route("/ask", post(ask))
        .route("/sessions", get(list_sessions))
        .route("/sessions/:id", get(get_session).delete(delete_session))
        .route("/sessions/:id/title", post(rename_session))
        .with_state(context)
}

/// Store, ingest, and index one uploaded document.
async fn upload_document(
    State(context): State<Arc<AppContext>>,
    Path(file_name): Path<String>,
    body: Bytes,
) -> Result<Response, AppError> {
    let report = context.lifecycle.upload(&file_name, &body).await?;
    Ok((StatusCode::CREATED, Json(report)).into_response())
}

/// List stored documents.
async fn list_documents(State(context): State<Arc<AppContext>>) -> Result<Response, AppError> {
    let documents = context.lifecycle.list_documents().await?;
    Ok(Json(json!({ "documents": documents })).into_response())
}

/// Delete a document from every store. Partial cleanup still answers 200;
/// the per-store failures are listed in `warnings`.
async fn delete_document(
    State(context): State<Arc<AppContext>>,
    Path(file_name): Path<String>,
) -> Result<Response, AppError> {
    let report = context.lifecycle.delete(&file_name).await?;
    Ok(Json(report).into_response())
}

/// Rebuild every derived store from the raw documents.
async fn process_all(State(context): State<Arc<AppContext>>) -> Result<Response, AppError> {
    let report = context.lifecycle.process_all().await?;
    Ok(Json(report).into_response())
}

#[derive(Deserialize)]
struct AskRequest {
    /// Question to answer against the indexed documents.
    question: String,
    /// Session to continue; a new one is minted when omitted.
    #[serde(default)]
    session_id: Option<String>,
}

/// Answer a question within a conversation session.
async fn ask(
    State(context): State<Arc<AppContext>>,
    Json(request): Json<AskRequest>,
) -> Result<Response, AppError> {
    let outcome = context
        .ask(&request.question, request.session_id)
        .await?;
    Ok(Json(outcome).into_response())
}

/// List stored sessions.
async fn list_sessions(State(context): State<Arc<AppContext>>) -> Result<Response, AppError> {
    let sessions = context.sessions.list().await?;
    Ok(Json(json!({ "sessions": sessions })).into_response())
}

/// Return the message history of one session; unknown ids are a 404.
async fn get_session(
    State(context): State<Arc<AppContext>>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    if !context.sessions.exists(&id).await? {
        return Err(AppError::Chat(ChatStoreError::NotFound(id)));
    }
    let messages = context.sessions.history(&id).await?;
    Ok(Json(json!({ "id": id, "messages": messages })).into_response())
}

#[derive(Deserialize)]
struct RenameRequest {
    title: String,
}

/// Rename a session; unknown ids are a 404.
async fn rename_session(
    State(context): State<Arc<AppContext>>,
    Path(id): Path<String>,
    Json(request): Json<RenameRequest>,
) -> Result<Response, AppError> {
    context.sessions.rename(&id, &request.title).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// Delete a session; unknown ids are a 404.
async fn delete_session(
    State(context): State<Arc<AppContext>>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    if !context.sessions.delete(&id).await? {
        return Err(AppError::Chat(ChatStoreError::NotFound(id)));
    }
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// Request-level error carrying enough structure to pick a status code.
enum AppError {
    Lifecycle(LifecycleError),
    Chat(ChatStoreError),
}

impl From<LifecycleError> for AppError {
    fn from(inner: LifecycleError) -> Self {
        Self::Lifecycle(inner)
    }
}

impl From<ChatStoreError> for AppError {
    fn from(inner: ChatStoreError) -> Self {
        Self::Chat(inner)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Lifecycle(error) => {
                let status = match error {
                    LifecycleError::NotFound(_) => StatusCode::NOT_FOUND,
                    LifecycleError::AlreadyExists(_) => StatusCode::CONFLICT,
                    LifecycleError::UnsupportedFormat(_) => StatusCode::BAD_REQUEST,
                    LifecycleError::Index(IndexError::BackendUnavailable) => {
                        StatusCode::SERVICE_UNAVAILABLE
                    }
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, error.to_string())
            }
            AppError::Chat(error) => {
                let status = match error {
                    ChatStoreError::NotFound(_) => StatusCode::NOT_FOUND,
                    ChatStoreError::InvalidId(_) => StatusCode::BAD_REQUEST,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, error.to_string())
            }
        };

        if status.is_server_error() {
            tracing::error!(%status, error = %message, "Request failed");
        }
        (status, Json(json!({ "error": message }))).into_response()
    }
}
