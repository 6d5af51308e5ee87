pub mod error;
pub mod payment;
pub mod tickets;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json, Router};
use serde_json::json;
use std::sync::Arc;

use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .merge(tickets::routes())
        .merge(payment::routes())
}

// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let breakers: Vec<_> = state
        .gateway
        .circuit_breaker_status()
        .into_iter()
        .map(|(name, circuit, failures)| {
            json!({ "name": name, "state": format!("{:?}", circuit), "failures": failures })
        })
        .collect();

    let (status, database) = match state.store.ping().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(e) => {
            tracing::error!("Health check: database unavailable: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
        }
    };

    (
        status,
        Json(json!({ "database": database, "circuit_breakers": breakers })),
    )
}
