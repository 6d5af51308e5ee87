//! Единая форма ошибок HTTP-слоя. Наружу уходят только категория и общее
//! сообщение, подробности пишутся в лог.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{error, warn};

use crate::services::{PaymentError, ReservationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    BadRequest,
    NotFound,
    Conflict,
    Unauthorized,
    UpstreamFailure,
    Internal,
}

impl ErrorCategory {
    fn status(self) -> StatusCode {
        match self {
            ErrorCategory::BadRequest => StatusCode::BAD_REQUEST,
            ErrorCategory::NotFound => StatusCode::NOT_FOUND,
            ErrorCategory::Conflict => StatusCode::CONFLICT,
            ErrorCategory::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorCategory::UpstreamFailure => StatusCode::BAD_GATEWAY,
            ErrorCategory::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub success: bool,
    pub error: ErrorCategory,
    pub message: String,
}

impl ApiError {
    pub fn new(error: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::BadRequest, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::NotFound, message)
    }

    fn internal() -> Self {
        Self::new(ErrorCategory::Internal, "Internal server error")
    }

    fn upstream() -> Self {
        Self::new(
            ErrorCategory::UpstreamFailure,
            "Upstream service unavailable, try again later",
        )
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.error.status(), Json(self)).into_response()
    }
}

impl From<ReservationError> for ApiError {
    fn from(err: ReservationError) -> Self {
        match err {
            ReservationError::Validation(message) => ApiError::bad_request(message),
            ReservationError::PassengersNotFound => ApiError::not_found("Passengers not found"),
            ReservationError::SoldOut(_) => {
                ApiError::new(ErrorCategory::Conflict, "Sold out")
            }
            ReservationError::Upstream(e) => {
                warn!("Reserve failed upstream: {}", e);
                ApiError::upstream()
            }
            ReservationError::Store(e) => {
                error!("Reserve failed in store: {}", e);
                ApiError::internal()
            }
        }
    }
}

impl From<PaymentError> for ApiError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::TicketNotFound(_) => ApiError::not_found("Ticket not found"),
            PaymentError::PaymentNotFound(_) => ApiError::not_found("Payment not found"),
            PaymentError::TicketNotPayable { .. } => {
                ApiError::new(ErrorCategory::Conflict, "Ticket cannot be paid")
            }
            PaymentError::TransactionMismatch { .. } | PaymentError::VerificationRejected(_) => {
                warn!("Payment not accepted: {}", err);
                ApiError::new(
                    ErrorCategory::Conflict,
                    "Payment was not accepted and has been refunded",
                )
            }
            PaymentError::RefundFailed { .. } => {
                error!("{}", err);
                ApiError::internal()
            }
            PaymentError::Upstream(e) => {
                warn!("Payment failed upstream: {}", e);
                ApiError::upstream()
            }
            PaymentError::Store(e) => {
                error!("Payment failed in store: {}", e);
                ApiError::internal()
            }
        }
    }
}
