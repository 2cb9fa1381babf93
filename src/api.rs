//! REST API adapter for the booking engine
//!
//! Thin layer: parse, call the engine, map the error kind to a status
//! code. All domain rules live in the engine.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;
use uuid::Uuid;

use crate::engine::{Actor, BookingEngine, CreateAdvisoryInput, HoldPaymentInput};
use crate::error::EngineError;
use crate::models::RefundMode;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct TransitionRequest {
    #[serde(rename = "actorId")]
    pub actor_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    pub mode: RefundMode,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<BookingEngine>,
}

/// Deterministic error-kind → status-code mapping
fn status_for(error: &EngineError) -> StatusCode {
    match error.kind() {
        "validation" => StatusCode::BAD_REQUEST,
        "not_found" => StatusCode::NOT_FOUND,
        "conflict" => StatusCode::CONFLICT,
        "invalid_transition" => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn respond<T: Serialize>(
    result: crate::Result<T>,
) -> (StatusCode, Json<ApiResponse>) {
    match result {
        Ok(value) => (StatusCode::OK, Json(ApiResponse::success(value))),
        Err(e) => (status_for(&e), Json(ApiResponse::error(e.to_string()))),
    }
}

/// =============================
/// Handlers
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn create_advisory(
    State(state): State<ApiState>,
    Json(input): Json<CreateAdvisoryInput>,
) -> (StatusCode, Json<ApiResponse>) {
    info!(titulo = %input.titulo, experto = %input.experto_email, "booking request");
    respond(state.engine.create_advisory(input).await)
}

async fn get_advisory(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> (StatusCode, Json<ApiResponse>) {
    respond(state.engine.get_advisory(id).await)
}

async fn finalize_advisory(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Json(req): Json<TransitionRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    respond(
        state
            .engine
            .finalize_advisory(id, Actor::Party(req.actor_id))
            .await,
    )
}

async fn cancel_advisory(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Json(req): Json<TransitionRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    respond(
        state
            .engine
            .cancel_advisory(id, Actor::Party(req.actor_id))
            .await,
    )
}

async fn reject_advisory(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Json(req): Json<TransitionRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    respond(
        state
            .engine
            .reject_advisory(id, Actor::Party(req.actor_id))
            .await,
    )
}

async fn create_payment(
    State(state): State<ApiState>,
    Json(input): Json<HoldPaymentInput>,
) -> (StatusCode, Json<ApiResponse>) {
    respond(state.engine.hold_payment(input).await)
}

async fn get_payment(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> (StatusCode, Json<ApiResponse>) {
    respond(state.engine.get_payment(id).await)
}

async fn release_payment(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> (StatusCode, Json<ApiResponse>) {
    respond(state.engine.release_payment(id).await)
}

async fn refund_payment(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Json(req): Json<RefundRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    respond(state.engine.refund_payment(id, req.mode).await)
}

async fn deactivate_party(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> (StatusCode, Json<ApiResponse>) {
    respond(state.engine.deactivate_party(id).await)
}

/// =============================
/// Router
/// =============================

pub fn create_router(engine: Arc<BookingEngine>) -> Router {
    let state = ApiState { engine };

    Router::new()
        .route("/health", get(health))
        .route("/api/asesorias", post(create_advisory))
        .route("/api/asesorias/:id", get(get_advisory))
        .route("/api/asesorias/:id/finalizar", post(finalize_advisory))
        .route("/api/asesorias/:id/cancelar", post(cancel_advisory))
        .route("/api/asesorias/:id/rechazar", post(reject_advisory))
        .route("/api/pagos", post(create_payment))
        .route("/api/pagos/:id", get(get_payment))
        .route("/api/pagos/:id/liberar", post(release_payment))
        .route("/api/pagos/:id/reembolsar", post(refund_payment))
        .route("/api/cuentas/:id/desactivar", post(deactivate_party))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    engine: Arc<BookingEngine>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(engine);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API server listening on http://0.0.0.0:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
