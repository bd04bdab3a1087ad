//! HTTP API route handlers.
//!
//! One JSON front-end over the core. Every handler maps errors through a
//! single `IntoResponse` impl for `CoreError` so the error envelope (stable
//! `code`, message, timestamp, correlation id) stays consistent across
//! endpoints. No web UI is served here — this is a pure JSON API.

use std::sync::Arc;

use axum::extract::{Path, Query as QueryParams, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post};
use axum::Router;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::config::RetrievalMethod;
use crate::errors::CoreError;
use crate::ingest;
use crate::ingest::IncomingFile;
use crate::query::QueryOptions;

use super::state::AppState;

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let status = match &self {
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::InvalidQuery(_)
            | CoreError::FileValidationType(_)
            | CoreError::FileValidationSize { .. }
            | CoreError::FileValidationEmpty(_)
            | CoreError::BatchTooLarge { .. }
            | CoreError::DuplicateDocument { .. }
            | CoreError::ExtractionFailed { .. }
            | CoreError::PageLimitExceeded { .. }
            | CoreError::EmptyDocument => StatusCode::BAD_REQUEST,
            CoreError::EmbeddingFailed { .. }
            | CoreError::VectorStoreFailed { .. }
            | CoreError::GenerationFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
            CoreError::DimensionMismatch { .. } | CoreError::TokenizerUnavailable(_) | CoreError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
                "correlation_id": Uuid::new_v4(),
                "timestamp": Utc::now(),
            }
        });
        (status, Json(body)).into_response()
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .nest("/api", create_api_routes())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn create_api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/uploads", post(handle_create_upload))
        .route("/uploads", get(handle_list_uploads))
        .route("/uploads/:id", get(handle_get_upload))
        .route("/documents", get(handle_list_documents))
        .route("/documents/:id", get(handle_get_document))
        .route("/documents/:id", delete(handle_delete_document))
        .route("/documents/:id/indexing-status", get(handle_indexing_status))
        .route("/documents/:id/reindex", post(handle_reindex_document))
        .route("/queries", post(handle_create_query))
        .route("/queries", get(handle_list_queries))
        .route("/queries/:id", get(handle_get_query))
}

async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let store_ok = state.store.list_uploads(0, 1).is_ok();
    let vector_ok = state.vectors.stats("health-probe").await.is_ok();
    let status = if store_ok { "ok" } else { "degraded" };
    (
        StatusCode::OK,
        Json(json!({
            "status": status,
            "dependencies": {
                "metadata_store": store_ok,
                "vector_store_reachable": vector_ok,
                "embedding_model": state.embedder.model_name(),
            }
        })),
    )
}

// ─── Uploads ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct UploadFilePayload {
    filename: String,
    /// Base64-encoded file bytes, submitted over JSON rather than
    /// multipart.
    content_base64: String,
}

#[derive(Deserialize)]
struct CreateUploadPayload {
    batch_label: String,
    files: Vec<UploadFilePayload>,
}

#[derive(Serialize)]
struct DocumentOutcome {
    id: Uuid,
    filename: String,
    status: String,
    error_message: Option<String>,
}

async fn handle_create_upload(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateUploadPayload>,
) -> Result<impl IntoResponse, CoreError> {
    let mut files = Vec::with_capacity(payload.files.len());
    for f in payload.files {
        let bytes = {
            use base64::Engine;
            base64::engine::general_purpose::STANDARD
                .decode(&f.content_base64)
                .map_err(|e| CoreError::FileValidationType(format!("{}: invalid base64 ({e})", f.filename)))?
        };
        files.push(IncomingFile {
            filename: f.filename,
            bytes,
        });
    }

    let outcome = state.ingestion.ingest_batch(payload.batch_label, files).await?;
    let documents: Vec<DocumentOutcome> = outcome
        .documents
        .iter()
        .map(|d| DocumentOutcome {
            id: d.id,
            filename: d.filename.clone(),
            status: d.status.to_string(),
            error_message: d.error_message.clone(),
        })
        .collect();

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "upload": outcome.upload,
            "documents": documents,
        })),
    ))
}

#[derive(Deserialize)]
struct PageParams {
    #[serde(default)]
    page: usize,
    #[serde(default = "default_page_limit")]
    limit: usize,
}

fn default_page_limit() -> usize {
    20
}

async fn handle_list_uploads(
    State(state): State<Arc<AppState>>,
    QueryParams(params): QueryParams<PageParams>,
) -> Result<impl IntoResponse, CoreError> {
    let uploads = state.store.list_uploads(params.page, params.limit)?;
    Ok((StatusCode::OK, Json(json!({ "uploads": uploads }))))
}

async fn handle_get_upload(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, CoreError> {
    let upload = state.store.get_upload(id)?;
    let documents = state.store.list_documents_for_upload(id)?;
    Ok((
        StatusCode::OK,
        Json(json!({ "upload": upload, "documents": documents })),
    ))
}

// ─── Documents ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ListDocumentsParams {
    upload_id: Uuid,
}

async fn handle_list_documents(
    State(state): State<Arc<AppState>>,
    QueryParams(params): QueryParams<ListDocumentsParams>,
) -> Result<impl IntoResponse, CoreError> {
    let documents = state.store.list_documents_for_upload(params.upload_id)?;
    Ok((StatusCode::OK, Json(json!({ "documents": documents }))))
}

async fn handle_get_document(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, CoreError> {
    let document = state.store.get_document(id)?;
    let chunks = state.store.list_chunks(id, None, None)?;
    Ok((
        StatusCode::OK,
        Json(json!({ "document": document, "chunk_count": chunks.len() })),
    ))
}

async fn handle_delete_document(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, CoreError> {
    ingest::delete_document(&state.store, &state.indexer, id).await?;
    state.keyword.invalidate(&crate::retrieval::RetrievalScope::Document(id));
    Ok((StatusCode::OK, Json(json!({ "deleted": id }))))
}

async fn handle_indexing_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, CoreError> {
    // Touch the document first so a bad id 404s instead of returning a
    // zeroed status for a document that was never there.
    state.store.get_document(id)?;
    let status = state.indexer.status(id);
    Ok((
        StatusCode::OK,
        Json(json!({
            "total": status.total_chunks,
            "indexed": status.indexed_chunks,
            "pending": status.pending_chunks,
            "percent": status.percent,
        })),
    ))
}

async fn handle_reindex_document(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, CoreError> {
    state.store.get_document(id)?;
    let outcome = state.indexer.reindex_document(id).await;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "indexed": outcome.indexed,
            "skipped": outcome.skipped,
            "failed": outcome.failed,
        })),
    ))
}

// ─── Queries ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct CreateQueryPayload {
    query_text: String,
    #[serde(default)]
    upload_filter: Option<Uuid>,
    #[serde(default)]
    retrieval_method: Option<RetrievalMethod>,
    #[serde(default)]
    top_k: Option<usize>,
    #[serde(default)]
    mmr_lambda: Option<f32>,
}

async fn handle_create_query(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateQueryPayload>,
) -> Result<impl IntoResponse, CoreError> {
    let opts = QueryOptions {
        upload_filter: payload.upload_filter,
        retrieval_method: payload.retrieval_method,
        top_k: payload.top_k,
        mmr_lambda: payload.mmr_lambda,
    };
    let query = state.query_engine.answer(&payload.query_text, opts).await?;
    Ok((StatusCode::CREATED, Json(json!(query))))
}

async fn handle_get_query(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, CoreError> {
    let query = state.store.get_query(id)?;
    Ok((StatusCode::OK, Json(json!(query))))
}

async fn handle_list_queries(
    State(state): State<Arc<AppState>>,
    QueryParams(params): QueryParams<PageParams>,
) -> Result<impl IntoResponse, CoreError> {
    let queries = state.store.list_queries(params.page, params.limit)?;
    Ok((StatusCode::OK, Json(json!({ "queries": queries }))))
}
