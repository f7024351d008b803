use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};

use crate::{agents, app_state::AppState};

// --- Payloads y Respuestas de la API ---

#[derive(Deserialize)]
pub struct QueryPayload {
    question: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct QueryResponse {
    pub answer: String,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/query", post(query_handler))
        .route("/api/health", get(health_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .with_state(app_state)
}

// --- Handlers ---

/// Siempre responde 200 con texto: los fallos ya vienen redactados.
#[axum::debug_handler]
async fn query_handler(State(state): State<AppState>, Json(payload): Json<QueryPayload>) -> Json<QueryResponse> {
    let answer = agents::ask(&state.context, &payload.question).await;
    Json(QueryResponse { answer })
}

#[axum::debug_handler]
async fn health_handler(State(state): State<AppState>) -> Result<Json<serde_json::Value>, StatusCode> {
    match state.context.store.stats().await {
        Ok(stats) => Ok(Json(json!({
            "status": "ok",
            "files": stats.files,
            "chunks": stats.chunks,
        }))),
        Err(e) => {
            error!("Error en el health check del almacén: {}", e);
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

#[axum::debug_handler]
async fn shutdown_handler(State(state): State<AppState>) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    if let Ok(mut guard) = state.shutdown_sender.lock() {
        if let Some(sender) = guard.take() {
            let _ = sender.send(());
        }
    }
    StatusCode::OK
}
