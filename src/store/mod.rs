//! Persistence for flights, tickets and payments.
//!
//! All ticket and payment state transitions go through [`ReservationStore`].
//! Multi-row transitions run inside a [`StoreTx`] obtained from
//! [`ReservationStore::begin`]; dropping a transaction without committing
//! rolls it back.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::info;

use crate::models::{
    Flight, NewFlight, NewTicket, Payment, PaymentStatus, Ticket, TicketStatus, UnknownStatus,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("{entity} {id} is in state {actual}")]
    Conflict {
        entity: &'static str,
        id: i64,
        actual: String,
    },

    #[error(transparent)]
    Corrupt(#[from] UnknownStatus),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Number of distinct passengers among `passenger_ids` owned by `user_id`.
    async fn count_passengers(&self, user_id: i64, passenger_ids: &[i64]) -> StoreResult<i64>;

    /// Inserts the flight unless its number is already known. An existing row
    /// keeps its identity and only gets its penalty schedule refreshed.
    async fn find_or_create_flight(&self, flight: &NewFlight) -> StoreResult<Flight>;

    async fn find_flight(&self, id: i64) -> StoreResult<Option<Flight>>;

    /// Inserts a `Reserved` ticket and its passenger links atomically.
    async fn create_ticket(&self, ticket: &NewTicket) -> StoreResult<Ticket>;

    async fn find_ticket(&self, id: i64) -> StoreResult<Option<Ticket>>;

    /// Reserved tickets created strictly before `cutoff`, oldest first.
    async fn find_expired_tickets(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Ticket>>;

    async fn create_payment(&self, ticket_id: i64, amount: i64) -> StoreResult<Payment>;

    async fn find_payment(&self, id: i64) -> StoreResult<Option<Payment>>;

    async fn payments_for_ticket(&self, ticket_id: i64) -> StoreResult<Vec<Payment>>;

    async fn update_payment_status(&self, id: i64, status: PaymentStatus) -> StoreResult<()>;

    async fn ping(&self) -> StoreResult<()>;

    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>>;
}

#[async_trait]
pub trait StoreTx: Send {
    /// Loads the ticket and holds its row lock until the transaction ends.
    async fn lock_ticket(&mut self, id: i64) -> StoreResult<Option<Ticket>>;

    async fn lock_payment(&mut self, id: i64) -> StoreResult<Option<Payment>>;

    async fn find_flight(&mut self, id: i64) -> StoreResult<Option<Flight>>;

    async fn set_ticket_status(&mut self, id: i64, status: TicketStatus) -> StoreResult<()>;

    /// Moves every still-`Requested` payment of the ticket to `Expired`.
    async fn expire_requested_payments(&mut self, ticket_id: i64) -> StoreResult<u64>;

    async fn mark_payment_verified(&mut self, id: i64, settled_at: DateTime<Utc>)
        -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}

/// Marks the payment `Verified` and its ticket `Paid` in one transaction.
///
/// Rows are locked ticket first, then payment, the same order the expiry
/// worker uses. Settling an already verified payment is a no-op. Fails with
/// [`StoreError::Conflict`] when the ticket is no longer `Reserved` (expired,
/// or already paid by another payment) or the payment was expired or refunded
/// in the meantime.
pub async fn settle_payment(
    store: &dyn ReservationStore,
    payment_id: i64,
    settled_at: DateTime<Utc>,
) -> StoreResult<Payment> {
    let ticket_id = store
        .find_payment(payment_id)
        .await?
        .ok_or(StoreError::NotFound { entity: "payment", id: payment_id })?
        .ticket_id;

    let mut tx = store.begin().await?;

    let ticket = tx
        .lock_ticket(ticket_id)
        .await?
        .ok_or(StoreError::NotFound { entity: "ticket", id: ticket_id })?;
    let mut payment = tx
        .lock_payment(payment_id)
        .await?
        .ok_or(StoreError::NotFound { entity: "payment", id: payment_id })?;

    match payment.status {
        PaymentStatus::Verified => {
            tx.rollback().await?;
            return Ok(payment);
        }
        PaymentStatus::Requested => {}
        other => {
            tx.rollback().await?;
            return Err(StoreError::Conflict {
                entity: "payment",
                id: payment_id,
                actual: other.to_string(),
            });
        }
    }

    if ticket.status != TicketStatus::Reserved {
        tx.rollback().await?;
        return Err(StoreError::Conflict {
            entity: "ticket",
            id: ticket.id,
            actual: ticket.status.to_string(),
        });
    }

    tx.mark_payment_verified(payment_id, settled_at).await?;
    tx.set_ticket_status(ticket.id, TicketStatus::Paid).await?;
    tx.commit().await?;

    info!(payment_id, ticket_id = ticket.id, "Payment settled, ticket paid");
    payment.status = PaymentStatus::Verified;
    payment.settled_at = Some(settled_at);
    Ok(payment)
}
