//! payment.rs
//!
//! Сервисный слой оплаты билета.
//!
//! 1.  **pay**: создаёт локальный платёж в статусе `Requested` и запрашивает у шлюза
//!     адрес для перенаправления пользователя.
//! 2.  **verify_payment**: обрабатывает возврат пользователя со шлюза. Сверяет сумму,
//!     подтверждает транзакцию и атомарно переводит платёж в `Verified`, а билет в `Paid`.
//!     На любом пути, где деньги списаны, а локальное состояние не обновлено, платёж
//!     возвращается пользователю.
//! 3.  **refund_payment**: возврат платежа с повторными попытками и экспоненциальной задержкой.

use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::RefundConfig;
use crate::gateway::{Gateway, GatewayError};
use crate::models::{Payment, PaymentStatus, TicketStatus};
use crate::store::{self, ReservationStore, StoreError};

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("ticket {0} not found")]
    TicketNotFound(i64),

    #[error("ticket {ticket_id} cannot be paid in state {status}")]
    TicketNotPayable { ticket_id: i64, status: TicketStatus },

    #[error("payment {0} not found")]
    PaymentNotFound(i64),

    #[error("payment {payment_id}: transaction mismatch, expected {expected}, got {actual}")]
    TransactionMismatch {
        payment_id: i64,
        expected: i64,
        actual: i64,
    },

    #[error("payment {0}: verification rejected by provider")]
    VerificationRejected(i64),

    #[error("payment {payment_id}: refund failed after {attempts} attempts")]
    RefundFailed { payment_id: i64, attempts: u32 },

    #[error(transparent)]
    Upstream(#[from] GatewayError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone)]
pub struct PaymentService {
    store: Arc<dyn ReservationStore>,
    gateway: Arc<dyn Gateway>,
    refund: RefundConfig,
}

impl PaymentService {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        gateway: Arc<dyn Gateway>,
        refund: RefundConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            refund,
        }
    }

    /// Открывает платёж по билету и возвращает адрес страницы оплаты.
    pub async fn pay(&self, ticket_id: i64) -> Result<String, PaymentError> {
        let ticket = self
            .store
            .find_ticket(ticket_id)
            .await?
            .ok_or(PaymentError::TicketNotFound(ticket_id))?;

        if ticket.status != TicketStatus::Reserved {
            return Err(PaymentError::TicketNotPayable {
                ticket_id,
                status: ticket.status,
            });
        }

        let payment = self
            .store
            .create_payment(ticket.id, ticket.total_amount())
            .await?;
        info!(
            "Creating payment {} for ticket {}: amount={}",
            payment.id, ticket.id, payment.amount
        );

        let redirect = self
            .gateway
            .create_payment(payment.id, payment.amount, payment.invoice_date())
            .await?;

        Ok(redirect)
    }

    /// Завершает оплату после возврата пользователя со шлюза.
    ///
    /// Повторный вызов для уже завершённого платежа возвращает его статус без
    /// обращения к шлюзу.
    pub async fn verify_payment(
        &self,
        payment_id: i64,
        payment_date: NaiveDate,
        transaction_reference_id: i64,
    ) -> Result<PaymentStatus, PaymentError> {
        let payment = self
            .store
            .find_payment(payment_id)
            .await?
            .ok_or(PaymentError::PaymentNotFound(payment_id))?;

        match payment.status {
            PaymentStatus::Requested => {}
            PaymentStatus::Expired => {
                return self
                    .settle_late_callback(&payment, payment_date, transaction_reference_id)
                    .await;
            }
            status => {
                info!("Payment {} already settled as {}", payment_id, status);
                return Ok(status);
            }
        }

        let check = self
            .gateway
            .check_transaction(payment.id, payment_date, transaction_reference_id)
            .await?;

        if !check.is_success || check.amount != payment.amount {
            warn!(
                payment_id,
                expected = payment.amount,
                actual = check.amount,
                remote_success = check.is_success,
                "Transaction check mismatch, refunding"
            );
            self.refund_payment(&payment).await?;
            return Err(PaymentError::TransactionMismatch {
                payment_id,
                expected: payment.amount,
                actual: check.amount,
            });
        }

        let verified = self
            .gateway
            .verify_payment(payment.id, payment.invoice_date(), payment.amount)
            .await?;
        if !verified {
            warn!(payment_id, "Verification rejected by provider, refunding");
            self.refund_payment(&payment).await?;
            return Err(PaymentError::VerificationRejected(payment_id));
        }

        match store::settle_payment(self.store.as_ref(), payment.id, Utc::now()).await {
            Ok(settled) => {
                info!("✅ Payment {} verified, ticket {} paid", settled.id, settled.ticket_id);
                Ok(settled.status)
            }
            Err(e) => {
                error!(payment_id, error = %e, "Failed to settle verified payment, refunding");
                self.refund_payment(&payment).await?;
                self.mark_refunded(payment_id).await;
                Err(e.into())
            }
        }
    }

    /// Возврат платежа пользователю. Отказы и ошибки шлюза повторяются с
    /// экспоненциальной задержкой до `max_attempts` попыток.
    pub async fn refund_payment(&self, payment: &Payment) -> Result<(), PaymentError> {
        let max_attempts = self.refund.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self
                .gateway
                .refund_payment(payment.id, payment.invoice_date())
                .await
            {
                Ok(true) => {
                    info!("💸 Payment {} refunded (attempt {})", payment.id, attempt);
                    return Ok(());
                }
                Ok(false) => warn!(payment_id = payment.id, attempt, "Refund declined by provider"),
                Err(e) => warn!(payment_id = payment.id, attempt, error = %e, "Refund request failed"),
            }

            if attempt >= max_attempts {
                error!(
                    payment_id = payment.id,
                    ticket_id = payment.ticket_id,
                    amount = payment.amount,
                    attempts = attempt,
                    "🚨 Refund failed, manual intervention required"
                );
                return Err(PaymentError::RefundFailed {
                    payment_id: payment.id,
                    attempts: attempt,
                });
            }

            tokio::time::sleep(self.refund.backoff_for(attempt)).await;
        }
    }

    /// Пользователь оплатил уже истёкший платёж: места освобождены, поэтому
    /// списанные деньги возвращаются.
    async fn settle_late_callback(
        &self,
        payment: &Payment,
        payment_date: NaiveDate,
        transaction_reference_id: i64,
    ) -> Result<PaymentStatus, PaymentError> {
        let check = self
            .gateway
            .check_transaction(payment.id, payment_date, transaction_reference_id)
            .await?;
        if !check.is_success {
            info!("Payment {} expired and was never charged", payment.id);
            return Ok(PaymentStatus::Expired);
        }

        warn!(payment_id = payment.id, "Charge arrived for expired payment, refunding");
        self.refund_payment(payment).await?;
        self.mark_refunded(payment.id).await;
        Ok(PaymentStatus::Refunded)
    }

    async fn mark_refunded(&self, payment_id: i64) {
        if let Err(e) = self
            .store
            .update_payment_status(payment_id, PaymentStatus::Refunded)
            .await
        {
            error!(payment_id, error = %e, "Failed to record refunded payment status");
        }
    }
}
