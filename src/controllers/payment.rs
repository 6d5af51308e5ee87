use axum::{
    extract::{Query, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

use super::error::{ApiError, ApiResult};
use crate::{middleware::AuthUser, models::PaymentStatus, AppState};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/payments/pay", post(pay))
        .route("/payments/callback", get(callback))
}

// --- Request/Response структуры ---
#[derive(Debug, Deserialize, Validate)]
pub struct PayRequest {
    #[validate(range(min = 1))]
    pub ticket_id: i64,
}

#[derive(Debug, Serialize)]
pub struct PayResponse {
    pub gate_way_url: String,
}

/// Параметры возврата пользователя со шлюза: номер счёта, дата счёта, номер транзакции.
#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    #[serde(rename = "iN")]
    pub invoice_number: Option<String>,
    #[serde(rename = "iD")]
    pub invoice_date: Option<String>,
    pub tref: Option<String>,
}

#[derive(Debug, PartialEq)]
pub struct Callback {
    pub payment_id: i64,
    pub payment_date: NaiveDate,
    pub transaction_reference_id: i64,
}

impl CallbackQuery {
    pub fn parse(&self) -> Result<Callback, ApiError> {
        let payment_id = parse_field(self.invoice_number.as_deref(), "iN")?;
        let transaction_reference_id = parse_field(self.tref.as_deref(), "tref")?;
        let payment_date = self
            .invoice_date
            .as_deref()
            .and_then(|date| NaiveDate::parse_from_str(date.trim(), "%Y/%m/%d").ok())
            .ok_or_else(|| ApiError::bad_request("iD must be a date formatted YYYY/MM/DD"))?;

        Ok(Callback {
            payment_id,
            payment_date,
            transaction_reference_id,
        })
    }
}

fn parse_field(value: Option<&str>, name: &str) -> Result<i64, ApiError> {
    value
        .and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|v| *v > 0)
        .ok_or_else(|| ApiError::bad_request(format!("{} must be a positive integer", name)))
}

#[derive(Debug, Serialize)]
pub struct CallbackResponse {
    pub status: PaymentStatus,
}

// --- HTTP Handlers ---

/// POST /api/payments/pay
async fn pay(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<PayRequest>,
) -> ApiResult<impl IntoResponse> {
    req.validate()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    // Чужой билет выглядит как несуществующий.
    let owned = state
        .store
        .find_ticket(req.ticket_id)
        .await
        .map_err(|e| ApiError::from(crate::services::PaymentError::Store(e)))?
        .is_some_and(|ticket| ticket.user_id == user.user_id);
    if !owned {
        return Err(ApiError::not_found("Ticket not found"));
    }

    let gate_way_url = state.payments.pay(req.ticket_id).await?;
    Ok(Json(PayResponse { gate_way_url }))
}

/// GET /api/payments/callback?iN=&iD=&tref=
async fn callback(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CallbackQuery>,
) -> ApiResult<impl IntoResponse> {
    let callback = query.parse()?;
    tracing::info!(
        "Payment callback: payment_id={}, tref={}",
        callback.payment_id, callback.transaction_reference_id
    );

    let status = state
        .payments
        .verify_payment(
            callback.payment_id,
            callback.payment_date,
            callback.transaction_reference_id,
        )
        .await?;

    Ok(Json(CallbackResponse { status }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(n: &str, d: &str, tref: &str) -> CallbackQuery {
        CallbackQuery {
            invoice_number: Some(n.to_string()),
            invoice_date: Some(d.to_string()),
            tref: Some(tref.to_string()),
        }
    }

    #[test]
    fn parses_gateway_callback_parameters() {
        let callback = query("12", "2026/10/17", "998877").parse().unwrap();
        assert_eq!(
            callback,
            Callback {
                payment_id: 12,
                payment_date: NaiveDate::from_ymd_opt(2026, 10, 17).unwrap(),
                transaction_reference_id: 998877,
            }
        );
    }

    #[test]
    fn rejects_malformed_callback() {
        assert!(query("abc", "2026/10/17", "1").parse().is_err());
        assert!(query("12", "2026-10-17", "1").parse().is_err());
        assert!(query("12", "2026/10/17", "0").parse().is_err());
        assert!(CallbackQuery {
            invoice_number: None,
            invoice_date: None,
            tref: None
        }
        .parse()
        .is_err());
    }
}
