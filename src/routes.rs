use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Multipart, State},
    http::{Method, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::error::RagError;
use crate::models::{
    ChatRequest, ChatResponse, DocumentList, IndexStatusResponse, IngestRequest, IngestResponse,
    UploadResponse,
};
use crate::rag::index_manager::{IngestReport, IngestionPipeline};
use crate::rag::RagEngine;

pub struct AppState {
    pub pipeline: Arc<IngestionPipeline>,
    pub engine: RagEngine,
}

type HandlerError = (StatusCode, String);

pub fn status_code(error: &RagError) -> StatusCode {
    match error {
        RagError::NotFound(_) => StatusCode::NOT_FOUND,
        RagError::InvalidName(_) | RagError::Config(_) | RagError::Decode { .. } => {
            StatusCode::BAD_REQUEST
        }
        RagError::IngestionInProgress => StatusCode::CONFLICT,
        RagError::Gateway { .. } => StatusCode::BAD_GATEWAY,
        RagError::IndexLoad { .. }
        | RagError::IndexPersist { .. }
        | RagError::DimensionMismatch { .. }
        | RagError::Storage { .. }
        | RagError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn handler_error(context: &str, error: RagError) -> HandlerError {
    let status = status_code(&error);
    if status.is_server_error() {
        tracing::error!(error = %error, "{context} failed");
    } else {
        tracing::warn!(error = %error, "{context} rejected");
    }
    (status, format!("{context} error: {error}"))
}

pub fn router(state: Arc<AppState>, request_timeout: Duration) -> Router {
    // CORS設定
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/", get(root_handler))
        .route("/api/v1/chat", post(chat_handler))
        .route("/api/v1/ingest", post(ingest_file_handler))
        .route("/api/v1/ingest/all", post(ingest_all_handler))
        .route(
            "/api/v1/documents",
            get(list_documents_handler).post(upload_documents_handler),
        )
        .route("/api/v1/index/status", get(index_status_handler))
        .route("/api/health", get(health_check))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn root_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "message": "RAG Service API",
        "docs": "/api/v1",
        "chat_endpoint": "/api/v1/chat"
    }))
}

async fn chat_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, HandlerError> {
    let request_id = Uuid::new_v4();
    tracing::info!(%request_id, "chat request received");

    let answer = state
        .engine
        .answer(&request.query)
        .await
        .map_err(|e| handler_error("Chat", e))?;

    tracing::info!(%request_id, sources = answer.sources.len(), "chat request answered");

    Ok(Json(ChatResponse {
        answer: answer.text,
        sources: answer.sources.into_iter().collect(),
    }))
}

async fn ingest_file_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<IngestRequest>,
) -> Result<Json<IngestResponse>, HandlerError> {
    let chunk_ids = state
        .pipeline
        .ingest_file(&request.file_name)
        .await
        .map_err(|e| handler_error("Ingest", e))?;

    Ok(Json(IngestResponse {
        file_name: request.file_name,
        chunk_ids,
    }))
}

async fn ingest_all_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<IngestReport>, HandlerError> {
    let report = state
        .pipeline
        .ingest_all()
        .await
        .map_err(|e| handler_error("Ingest", e))?;
    Ok(Json(report))
}

async fn list_documents_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<DocumentList>, HandlerError> {
    let documents = state
        .pipeline
        .list_documents()
        .await
        .map_err(|e| handler_error("List documents", e))?;
    Ok(Json(DocumentList { documents }))
}

async fn upload_documents_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, HandlerError> {
    let mut uploaded_files = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Invalid multipart body: {e}")))?
    {
        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let bytes = field
            .bytes()
            .await
            .map_err(|e| (StatusCode::BAD_REQUEST, format!("Invalid upload: {e}")))?;

        state
            .pipeline
            .save_document(&file_name, &bytes)
            .await
            .map_err(|e| handler_error("Upload", e))?;
        uploaded_files.push(file_name);
    }

    let total_files_in_dir = state
        .pipeline
        .list_documents()
        .await
        .map_err(|e| handler_error("Upload", e))?
        .len();

    Ok(Json(UploadResponse {
        uploaded_files,
        total_files_in_dir,
    }))
}

async fn index_status_handler(State(state): State<Arc<AppState>>) -> Json<IndexStatusResponse> {
    Json(IndexStatusResponse {
        status: state.pipeline.get_status().await,
        snapshot_path: state.pipeline.index().path().display().to_string(),
    })
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "index_entries": state.pipeline.index().len().await,
    }))
}
