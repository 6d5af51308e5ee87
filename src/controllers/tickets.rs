use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

use super::error::{ApiError, ApiResult};
use crate::{middleware::AuthUser, AppState};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/tickets/reserve", post(reserve))
}

#[derive(Debug, Deserialize, Validate)]
pub struct ReserveRequest {
    #[validate(length(min = 1, max = 20))]
    pub flight_number: String,
    #[validate(length(min = 1))]
    pub passengers: Vec<i64>,
}

#[derive(Debug, Serialize)]
pub struct ReserveResponse {
    pub ticket_id: i64,
}

// POST /api/tickets/reserve
async fn reserve(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<ReserveRequest>,
) -> ApiResult<impl IntoResponse> {
    req.validate()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let ticket = state
        .reservations
        .reserve(user.user_id, &req.flight_number, &req.passengers)
        .await?;

    Ok((StatusCode::CREATED, Json(ReserveResponse { ticket_id: ticket.id })))
}
