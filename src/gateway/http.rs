//! http.rs
//!
//! HTTP-клиент внешнего провайдера: сервис рейсов (бронирование и возврат мест)
//! и платёжный шлюз. Все сетевые вызовы проходят через `CircuitBreaker`
//! соответствующего сервиса и ограничены фиксированным таймаутом клиента.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::{CircuitBreaker, CircuitState, Gateway, GatewayError, TransactionCheck};
use crate::config::{CircuitBreakerConfig, InventoryConfig, PaymentConfig};
use crate::models::FlightInfo;

const INVOICE_DATE_FORMAT: &str = "%Y/%m/%d";
const TIMESTAMP_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

// --- Модели данных для API сервиса рейсов ---

#[derive(Debug, Serialize)]
struct SeatsRequest<'a> {
    number: &'a str,
    count: i32,
}

#[derive(Debug, Deserialize)]
struct SeatsResponse {
    status: bool,
    #[serde(default)]
    message: String,
}

// --- Модели данных для API платёжного шлюза ---

#[derive(Debug, Serialize)]
struct CreatePaymentRequest<'a> {
    merchant_code: &'a str,
    terminal_code: &'a str,
    invoice_number: String,
    invoice_date: String,
    amount: i64,
    redirect_address: &'a str,
    timestamp: String,
}

#[derive(Debug, Deserialize)]
struct CreatePaymentResponse {
    is_success: bool,
    #[serde(default)]
    message: String,
    redirect_address: Option<String>,
}

#[derive(Debug, Serialize)]
struct CheckTransactionRequest<'a> {
    merchant_code: &'a str,
    terminal_code: &'a str,
    invoice_number: String,
    invoice_date: String,
    transaction_reference_id: String,
}

#[derive(Debug, Deserialize)]
struct CheckTransactionResponse {
    is_success: bool,
    #[serde(default)]
    amount: i64,
}

#[derive(Debug, Serialize)]
struct VerifyPaymentRequest<'a> {
    merchant_code: &'a str,
    terminal_code: &'a str,
    invoice_number: String,
    invoice_date: String,
    amount: i64,
    timestamp: String,
}

#[derive(Debug, Serialize)]
struct RefundPaymentRequest<'a> {
    merchant_code: &'a str,
    terminal_code: &'a str,
    invoice_number: String,
    invoice_date: String,
    timestamp: String,
}

#[derive(Debug, Deserialize)]
struct ProviderAck {
    is_success: bool,
    #[serde(default)]
    message: String,
}

/// Клиент внешнего провайдера.
#[derive(Clone)]
pub struct HttpGateway {
    http_client: reqwest::Client,
    inventory_url: String,
    payment_url: String,
    merchant_code: String,
    terminal_code: String,
    /// Секрет для подписи запросов к платёжному шлюзу.
    merchant_secret: String,
    callback_url: String,
    inventory_breaker: Arc<CircuitBreaker>,
    payment_breaker: Arc<CircuitBreaker>,
}

impl HttpGateway {
    /// Один HTTP-клиент на оба сервиса, поэтому таймаут берётся наибольший из двух.
    pub fn from_config(
        inventory: &InventoryConfig,
        payment: &PaymentConfig,
        breaker: &CircuitBreakerConfig,
    ) -> Result<Self, reqwest::Error> {
        let http_client = reqwest::Client::builder()
            .timeout(inventory.timeout.max(payment.timeout))
            .build()?;

        Ok(Self {
            http_client,
            inventory_url: inventory.base_url.trim_end_matches('/').to_string(),
            payment_url: payment.gateway_url.trim_end_matches('/').to_string(),
            merchant_code: payment.merchant_code.clone(),
            terminal_code: payment.terminal_code.clone(),
            merchant_secret: payment.merchant_secret.clone(),
            callback_url: payment.callback_url.clone(),
            inventory_breaker: Arc::new(CircuitBreaker::new(
                "inventory",
                breaker.failure_threshold,
                breaker.cooldown,
            )),
            payment_breaker: Arc::new(CircuitBreaker::new(
                "payment",
                breaker.failure_threshold,
                breaker.cooldown,
            )),
        })
    }

    /// Состояние выключателей для мониторинга: (имя, состояние, сбоев подряд).
    pub fn circuit_breaker_status(&self) -> Vec<(&'static str, CircuitState, u32)> {
        [&self.inventory_breaker, &self.payment_breaker]
            .into_iter()
            .map(|breaker| {
                let (state, failures) = breaker.status();
                (breaker.name(), state, failures)
            })
            .collect()
    }

    /// Выполняет операцию, пропуская её через Circuit Breaker.
    async fn execute_with_circuit_breaker<T, F>(
        breaker: &CircuitBreaker,
        op: &'static str,
        operation: F,
    ) -> Result<T, GatewayError>
    where
        F: Future<Output = Result<T, GatewayError>>,
    {
        if !breaker.can_execute() {
            warn!(op, breaker = breaker.name(), "Circuit breaker is OPEN - blocking request");
            return Err(GatewayError::BreakerOpen { upstream: breaker.name() });
        }

        match operation.await {
            Ok(result) => {
                breaker.record_success();
                Ok(result)
            }
            Err(e) if e.is_transport_failure() => {
                error!(op, error = %e, "Upstream request failed");
                breaker.record_failure();
                Err(e)
            }
            Err(e) => {
                // The provider is reachable, it just said no.
                breaker.record_success();
                Err(e)
            }
        }
    }

    fn sign(&self, body: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(body);
        hasher.update(self.merchant_secret.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    async fn read_json<T: DeserializeOwned>(
        op: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, GatewayError> {
        let transport = |source: reqwest::Error| {
            if source.is_timeout() {
                GatewayError::Timeout { op }
            } else {
                GatewayError::Network { op, source }
            }
        };

        let response = request.send().await.map_err(transport)?;
        let status = response.status();
        let body = response.text().await.map_err(transport)?;

        if !status.is_success() {
            return Err(GatewayError::Status { op, status: status.as_u16(), body });
        }

        serde_json::from_str(&body).map_err(|source| GatewayError::Decode { op, source })
    }

    async fn inventory_post(
        &self,
        op: &'static str,
        path: &str,
        number: &str,
        count: i32,
    ) -> Result<bool, GatewayError> {
        let request = self
            .http_client
            .post(format!("{}{}", self.inventory_url, path))
            .json(&SeatsRequest { number, count });

        let response: SeatsResponse = Self::execute_with_circuit_breaker(
            &self.inventory_breaker,
            op,
            Self::read_json(op, request),
        )
        .await?;

        if !response.status {
            info!(op, number, count, message = %response.message, "Inventory declined request");
        }
        Ok(response.status)
    }

    async fn payment_post<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        op: &'static str,
        path: &str,
        body: &Req,
    ) -> Result<Resp, GatewayError> {
        let payload = serde_json::to_vec(body).map_err(|source| GatewayError::Encode { op, source })?;
        let request = self
            .http_client
            .post(format!("{}{}", self.payment_url, path))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header("Sign", self.sign(&payload))
            .body(payload);

        Self::execute_with_circuit_breaker(&self.payment_breaker, op, Self::read_json(op, request))
            .await
    }

    fn timestamp() -> String {
        Utc::now().format(TIMESTAMP_FORMAT).to_string()
    }
}

fn invoice_date(date: NaiveDate) -> String {
    date.format(INVOICE_DATE_FORMAT).to_string()
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn get_flight(&self, number: &str) -> Result<FlightInfo, GatewayError> {
        const OP: &str = "get_flight";
        debug!(number, "Fetching flight from inventory");

        let request = self
            .http_client
            .get(format!("{}/flights/{}", self.inventory_url, number));

        Self::execute_with_circuit_breaker(&self.inventory_breaker, OP, Self::read_json(OP, request))
            .await
    }

    async fn reserve_seats(&self, number: &str, count: i32) -> Result<bool, GatewayError> {
        self.inventory_post("reserve_seats", "/flights/reserve", number, count).await
    }

    async fn refund_seats(&self, number: &str, count: i32) -> Result<bool, GatewayError> {
        self.inventory_post("refund_seats", "/flights/refund", number, count).await
    }

    async fn create_payment(
        &self,
        payment_id: i64,
        amount: i64,
        date: NaiveDate,
    ) -> Result<String, GatewayError> {
        const OP: &str = "create_payment";
        info!(payment_id, amount, "Creating payment with circuit breaker");

        let request = CreatePaymentRequest {
            merchant_code: &self.merchant_code,
            terminal_code: &self.terminal_code,
            invoice_number: payment_id.to_string(),
            invoice_date: invoice_date(date),
            amount,
            redirect_address: &self.callback_url,
            timestamp: Self::timestamp(),
        };

        let response: CreatePaymentResponse =
            self.payment_post(OP, "/payments/create", &request).await?;

        match response.redirect_address {
            Some(address) if response.is_success => Ok(address),
            _ => Err(GatewayError::Rejected { op: OP, message: response.message }),
        }
    }

    async fn check_transaction(
        &self,
        invoice_number: i64,
        date: NaiveDate,
        transaction_reference_id: i64,
    ) -> Result<TransactionCheck, GatewayError> {
        let request = CheckTransactionRequest {
            merchant_code: &self.merchant_code,
            terminal_code: &self.terminal_code,
            invoice_number: invoice_number.to_string(),
            invoice_date: invoice_date(date),
            transaction_reference_id: transaction_reference_id.to_string(),
        };

        let response: CheckTransactionResponse = self
            .payment_post("check_transaction", "/payments/check", &request)
            .await?;

        Ok(TransactionCheck { is_success: response.is_success, amount: response.amount })
    }

    async fn verify_payment(
        &self,
        invoice_number: i64,
        date: NaiveDate,
        amount: i64,
    ) -> Result<bool, GatewayError> {
        let request = VerifyPaymentRequest {
            merchant_code: &self.merchant_code,
            terminal_code: &self.terminal_code,
            invoice_number: invoice_number.to_string(),
            invoice_date: invoice_date(date),
            amount,
            timestamp: Self::timestamp(),
        };

        let response: ProviderAck = self
            .payment_post("verify_payment", "/payments/verify", &request)
            .await?;
        if !response.is_success {
            warn!(invoice_number, message = %response.message, "Payment verification declined");
        }
        Ok(response.is_success)
    }

    async fn refund_payment(
        &self,
        invoice_number: i64,
        date: NaiveDate,
    ) -> Result<bool, GatewayError> {
        let request = RefundPaymentRequest {
            merchant_code: &self.merchant_code,
            terminal_code: &self.terminal_code,
            invoice_number: invoice_number.to_string(),
            invoice_date: invoice_date(date),
            timestamp: Self::timestamp(),
        };

        let response: ProviderAck = self
            .payment_post("refund_payment", "/payments/refund", &request)
            .await?;
        if !response.is_success {
            warn!(invoice_number, message = %response.message, "Payment refund declined");
        }
        Ok(response.is_success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_json, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gateway(server: &MockServer, threshold: u32, timeout: Duration) -> HttpGateway {
        let inventory = InventoryConfig { base_url: server.uri(), timeout };
        let payment = PaymentConfig {
            gateway_url: server.uri(),
            merchant_code: "4412".to_string(),
            terminal_code: "1710".to_string(),
            merchant_secret: "secret".to_string(),
            callback_url: "http://localhost/api/payments/callback".to_string(),
            timeout,
        };
        let breaker = CircuitBreakerConfig {
            failure_threshold: threshold,
            cooldown: Duration::from_secs(60),
        };
        HttpGateway::from_config(&inventory, &payment, &breaker).expect("client")
    }

    fn flight_json() -> serde_json::Value {
        json!({
            "number": "F101",
            "airplane": "A320",
            "airline": "Mahan",
            "price": 1000000,
            "origin": "Tehran",
            "destination": "Mashhad",
            "capacity": 180,
            "empty_capacity": 42,
            "started_at": "2026-11-01T08:00:00Z",
            "finished_at": "2026-11-01T09:30:00Z",
            "penalties": [{"start": "0", "end": "24h", "percent": 30}]
        })
    }

    #[tokio::test]
    async fn get_flight_decodes_inventory_payload() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flights/F101"))
            .respond_with(ResponseTemplate::new(200).set_body_json(flight_json()))
            .expect(1)
            .mount(&server)
            .await;

        let flight = gateway(&server, 3, Duration::from_secs(2))
            .get_flight("F101")
            .await
            .expect("flight");

        assert_eq!(flight.number, "F101");
        assert_eq!(flight.price, 1_000_000);
        assert_eq!(flight.penalties.len(), 1);
    }

    #[tokio::test]
    async fn sold_out_is_a_business_answer_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/flights/reserve"))
            .and(body_json(json!({"number": "F101", "count": 3})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"status": false, "message": "sold out"})),
            )
            .mount(&server)
            .await;

        let gw = gateway(&server, 1, Duration::from_secs(2));
        let reserved = gw.reserve_seats("F101", 3).await.expect("answer");

        assert!(!reserved);
        assert_eq!(gw.circuit_breaker_status()[0].1, CircuitState::Closed);
    }

    #[tokio::test]
    async fn non_2xx_is_reported_with_status_stage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/flights/refund"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let err = gateway(&server, 5, Duration::from_secs(2))
            .refund_seats("F101", 1)
            .await
            .unwrap_err();

        match err {
            GatewayError::Status { op, status, body } => {
                assert_eq!(op, "refund_seats");
                assert_eq!(status, 503);
                assert_eq!(body, "maintenance");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_body_is_reported_as_decode_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flights/F101"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = gateway(&server, 5, Duration::from_secs(2))
            .get_flight("F101")
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::Decode { op: "get_flight", .. }));
    }

    #[tokio::test]
    async fn slow_upstream_hits_the_fixed_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flights/F101"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(flight_json())
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let err = gateway(&server, 5, Duration::from_millis(100))
            .get_flight("F101")
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::Timeout { op: "get_flight" }));
    }

    #[tokio::test]
    async fn breaker_fails_fast_without_network_call_after_threshold() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/flights/reserve"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let gw = gateway(&server, 3, Duration::from_secs(2));
        for _ in 0..3 {
            let err = gw.reserve_seats("F101", 1).await.unwrap_err();
            assert!(matches!(err, GatewayError::Status { status: 500, .. }));
        }

        let err = gw.reserve_seats("F101", 1).await.unwrap_err();
        assert!(matches!(err, GatewayError::BreakerOpen { upstream: "inventory" }));

        // The payment breaker is independent.
        let status = gw.circuit_breaker_status();
        assert_eq!(status[0].1, CircuitState::Open);
        assert_eq!(status[1].1, CircuitState::Closed);
    }

    #[tokio::test]
    async fn create_payment_returns_redirect_address_and_signs_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/payments/create"))
            .and(header_exists("Sign"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "is_success": true,
                "message": "",
                "redirect_address": "https://pay.example/gate?n=abc"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let date = NaiveDate::from_ymd_opt(2026, 10, 17).expect("date");
        let address = gateway(&server, 3, Duration::from_secs(2))
            .create_payment(7, 200_000, date)
            .await
            .expect("redirect");

        assert_eq!(address, "https://pay.example/gate?n=abc");
    }

    #[tokio::test]
    async fn declined_payment_creation_does_not_trip_the_breaker() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/payments/create"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "is_success": false,
                "message": "invalid merchant"
            })))
            .mount(&server)
            .await;

        let gw = gateway(&server, 1, Duration::from_secs(2));
        let date = NaiveDate::from_ymd_opt(2026, 10, 17).expect("date");
        let err = gw.create_payment(7, 200_000, date).await.unwrap_err();

        assert!(matches!(err, GatewayError::Rejected { op: "create_payment", .. }));
        assert_eq!(gw.circuit_breaker_status()[1].1, CircuitState::Closed);
    }

    #[tokio::test]
    async fn check_transaction_sends_invoice_fields() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/payments/check"))
            .and(body_json(json!({
                "merchant_code": "4412",
                "terminal_code": "1710",
                "invoice_number": "7",
                "invoice_date": "2026/10/17",
                "transaction_reference_id": "99"
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"is_success": true, "amount": 50000})),
            )
            .mount(&server)
            .await;

        let date = NaiveDate::from_ymd_opt(2026, 10, 17).expect("date");
        let check = gateway(&server, 3, Duration::from_secs(2))
            .check_transaction(7, date, 99)
            .await
            .expect("check");

        assert_eq!(check, TransactionCheck { is_success: true, amount: 50_000 });
    }
}
