//! HTTP transport
//!
//! Thin axum bridge over the task router: task submission, health and
//! Prometheus metrics. Stands in for the on-chain task mailbox in local and
//! demo deployments.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::error::OracleError;
use crate::metrics;
use crate::router::TaskRouter;

struct ServerError(OracleError);

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = if self.0.is_bad_request() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        let body = json!({
            "success": false,
            "error": self.0.to_string(),
            "kind": self.0.kind(),
        });
        (status, Json(body)).into_response()
    }
}

impl From<OracleError> for ServerError {
    fn from(err: OracleError) -> Self {
        Self(err)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub router: Arc<TaskRouter>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/task", post(submit_task))
        .route("/health", get(health))
        .route("/metrics", get(metrics_text))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

async fn submit_task(
    State(state): State<AppState>,
    Json(payload): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let task_id = format!("task-{}", Uuid::new_v4());
    let body = serde_json::to_vec(&payload)
        .map_err(|e| OracleError::BadRequest(format!("invalid payload: {}", e)))?;

    let result = state.router.execute_task(&task_id, &body).await?;
    Ok(Json(json!({
        "success": true,
        "task_id": task_id,
        "result": result,
    })))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn metrics_text() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::gather(),
    )
}

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "task server listening");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;
    Ok(())
}
