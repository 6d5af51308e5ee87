//! Outbound calls to the upstream flight inventory and payment provider.
//!
//! Services depend on the [`Gateway`] trait only; [`HttpGateway`] is the real
//! implementation, tests substitute their own double.

pub mod breaker;
pub mod http;

pub use breaker::{CircuitBreaker, CircuitState};
pub use http::HttpGateway;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::FlightInfo;

/// Ошибки внешнего шлюза. Каждая ошибка транспорта помечена операцией и стадией,
/// на которой она произошла.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{upstream} circuit breaker is open")]
    BreakerOpen { upstream: &'static str },

    #[error("{op}: request failed: {source}")]
    Network {
        op: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{op}: request timed out")]
    Timeout { op: &'static str },

    #[error("{op}: unhandled response, status: {status}")]
    Status {
        op: &'static str,
        status: u16,
        body: String,
    },

    #[error("{op}: encode request body failed: {source}")]
    Encode {
        op: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{op}: parse response body failed: {source}")]
    Decode {
        op: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// The provider answered, but declined the request.
    #[error("{op}: rejected by provider: {message}")]
    Rejected { op: &'static str, message: String },
}

impl GatewayError {
    /// Whether this outcome should count toward opening the breaker.
    pub fn is_transport_failure(&self) -> bool {
        !matches!(
            self,
            GatewayError::BreakerOpen { .. } | GatewayError::Rejected { .. }
        )
    }
}

/// Result of looking up a remote payment transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionCheck {
    pub is_success: bool,
    pub amount: i64,
}

/// Capabilities of the upstream provider used by the settlement engine.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn get_flight(&self, number: &str) -> Result<FlightInfo, GatewayError>;

    /// `Ok(false)` means the provider refused (sold out), not a transport error.
    async fn reserve_seats(&self, number: &str, count: i32) -> Result<bool, GatewayError>;

    async fn refund_seats(&self, number: &str, count: i32) -> Result<bool, GatewayError>;

    /// Returns the redirect address the user should be sent to.
    async fn create_payment(
        &self,
        payment_id: i64,
        amount: i64,
        invoice_date: NaiveDate,
    ) -> Result<String, GatewayError>;

    async fn check_transaction(
        &self,
        invoice_number: i64,
        invoice_date: NaiveDate,
        transaction_reference_id: i64,
    ) -> Result<TransactionCheck, GatewayError>;

    async fn verify_payment(
        &self,
        invoice_number: i64,
        invoice_date: NaiveDate,
        amount: i64,
    ) -> Result<bool, GatewayError>;

    async fn refund_payment(
        &self,
        invoice_number: i64,
        invoice_date: NaiveDate,
    ) -> Result<bool, GatewayError>;
}
