//! Solace HTTP API
//!
//! Axum-based JSON API through which the UI talks to the dispatch pipeline.
//!
//! Architecture: each endpoint has a thin axum handler that delegates to a pure
//! inner function returning `(StatusCode, serde_json::Value)`. The inner
//! functions are directly testable without axum dispatch machinery.
//!
//! Endpoints:
//! - GET  /health                 — health check with store status
//! - GET  /version                — server version info
//! - POST /sessions               — create a session
//! - GET  /sessions/active        — most recent open session, or a new one
//! - GET  /sessions/:id           — fetch a session
//! - POST /sessions/:id/end       — end a session
//! - GET  /sessions/:id/messages  — ordered messages of a session
//! - GET  /sessions/:id/greet     — whether the UI should greet
//! - POST /sessions/:id/messages  — send a user message, get the reply

use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use solace_core::{ConversationStore, DispatchError, Dispatcher, SolaceConfig, StoreError};
use sqlx::PgPool;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub dispatcher: Arc<Dispatcher>,
    pub store: Arc<dyn ConversationStore>,
    pub pool: Option<PgPool>,
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/sessions", post(create_session_handler))
        .route("/sessions/active", get(active_session_handler))
        .route("/sessions/:id", get(get_session_handler))
        .route("/sessions/:id/end", post(end_session_handler))
        .route(
            "/sessions/:id/messages",
            get(messages_handler).post(send_handler),
        )
        .route("/sessions/:id/greet", get(greet_handler))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    state: HttpState,
    config: &SolaceConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", config.http.host, config.http.port);

    let app = build_router(Arc::new(state));
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Solace HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request DTOs
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub text: Option<String>,
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

/// Inner health check — reports the store and, for PostgreSQL, the DB version.
pub async fn health_inner(state: &HttpState) -> (StatusCode, serde_json::Value) {
    let postgresql = match &state.pool {
        Some(pool) => match solace_core::db::health_check(pool).await {
            Ok(v) => Some(v),
            Err(e) => {
                return (
                    StatusCode::SERVICE_UNAVAILABLE,
                    serde_json::json!({
                        "status": "unhealthy",
                        "error": e.to_string(),
                    }),
                );
            }
        },
        None => None,
    };

    (
        StatusCode::OK,
        serde_json::json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
            "store": state.store.name(),
            "backend": state.dispatcher.backend_name(),
            "postgresql": postgresql,
        }),
    )
}

/// Inner version — returns version info (pure, no IO).
pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "solace/1",
    })
}

pub async fn create_session_inner(store: &dyn ConversationStore) -> (StatusCode, serde_json::Value) {
    match store.create_session().await {
        Ok(session) => (StatusCode::CREATED, to_json(&session)),
        Err(e) => store_error_response(e),
    }
}

pub async fn active_session_inner(store: &dyn ConversationStore) -> (StatusCode, serde_json::Value) {
    match store.active_or_new_session().await {
        Ok(session) => (StatusCode::OK, to_json(&session)),
        Err(e) => store_error_response(e),
    }
}

pub async fn get_session_inner(
    store: &dyn ConversationStore,
    id: Uuid,
) -> (StatusCode, serde_json::Value) {
    match store.session(id).await {
        Ok(Some(session)) => (StatusCode::OK, to_json(&session)),
        Ok(None) => store_error_response(StoreError::UnknownSession(id)),
        Err(e) => store_error_response(e),
    }
}

pub async fn end_session_inner(
    store: &dyn ConversationStore,
    id: Uuid,
) -> (StatusCode, serde_json::Value) {
    match store.end_session(id).await {
        Ok(session) => {
            tracing::info!(session_id = %id, crisis = session.crisis_flag, "Session ended");
            (StatusCode::OK, to_json(&session))
        }
        Err(e) => store_error_response(e),
    }
}

pub async fn messages_inner(
    store: &dyn ConversationStore,
    id: Uuid,
) -> (StatusCode, serde_json::Value) {
    match store.messages_for(id).await {
        Ok(messages) => (
            StatusCode::OK,
            serde_json::json!({
                "session_id": id,
                "count": messages.len(),
                "messages": messages,
            }),
        ),
        Err(e) => store_error_response(e),
    }
}

pub async fn greet_inner(
    store: &dyn ConversationStore,
    id: Uuid,
) -> (StatusCode, serde_json::Value) {
    match store.should_greet(id).await {
        Ok(should_greet) => (
            StatusCode::OK,
            serde_json::json!({
                "session_id": id,
                "should_greet": should_greet,
            }),
        ),
        Err(e) => store_error_response(e),
    }
}

/// Inner send — validates the text and runs the dispatcher. Model failures
/// never reach this layer; only store failures can.
pub async fn send_inner(
    dispatcher: &Dispatcher,
    id: Uuid,
    req: SendRequest,
) -> (StatusCode, serde_json::Value) {
    let text = match req.text {
        Some(t) if !t.trim().is_empty() => t,
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                serde_json::json!({
                    "error": "text field is required",
                    "status": "error",
                }),
            );
        }
    };

    match dispatcher.dispatch(&text, id).await {
        Ok(dispatched) => (
            StatusCode::OK,
            serde_json::json!({
                "message": dispatched.message,
                "suggested_topic": dispatched.suggested_topic,
            }),
        ),
        Err(DispatchError::Store(e)) => store_error_response(e),
    }
}

// ============================================================================
// Axum handler wrappers (thin — delegate to inner functions)
// ============================================================================

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn create_session_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = create_session_inner(state.store.as_ref()).await;
    (status, Json(body))
}

pub async fn active_session_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = active_session_inner(state.store.as_ref()).await;
    (status, Json(body))
}

pub async fn get_session_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let (status, body) = get_session_inner(state.store.as_ref(), id).await;
    (status, Json(body))
}

pub async fn end_session_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let (status, body) = end_session_inner(state.store.as_ref(), id).await;
    (status, Json(body))
}

pub async fn messages_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let (status, body) = messages_inner(state.store.as_ref(), id).await;
    (status, Json(body))
}

pub async fn greet_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let (status, body) = greet_inner(state.store.as_ref(), id).await;
    (status, Json(body))
}

pub async fn send_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<SendRequest>,
) -> impl IntoResponse {
    let (status, body) = send_inner(&state.dispatcher, id, req).await;
    (status, Json(body))
}

// ============================================================================
// Helpers
// ============================================================================

fn to_json<T: serde::Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or_else(|e| {
        serde_json::json!({ "error": e.to_string(), "status": "error" })
    })
}

/// Map a store failure to an HTTP status and error body.
pub fn store_error_response(error: StoreError) -> (StatusCode, serde_json::Value) {
    let status = match &error {
        StoreError::UnknownSession(_) => StatusCode::NOT_FOUND,
        StoreError::EmptyMessage => StatusCode::BAD_REQUEST,
        StoreError::Corrupt(_) | StoreError::Database(_) => {
            tracing::error!(error = %error, "Conversation store failure");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (
        status,
        serde_json::json!({
            "error": error.to_string(),
            "status": "error",
        }),
    )
}

// ============================================================================
// Unit Tests — call inner functions directly
// ============================================================================
