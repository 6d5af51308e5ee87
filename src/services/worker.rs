//! worker.rs
//!
//! Фоновый процесс истечения неоплаченных броней. Каждый тик находит билеты в
//! статусе `Reserved` старше льготного периода, возвращает их места провайдеру
//! и переводит билет в `Expired`, а его незавершённые платежи тоже в `Expired`.

use chrono::Utc;
use futures::{stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::gateway::{Gateway, GatewayError};
use crate::models::{Ticket, TicketStatus};
use crate::store::{ReservationStore, StoreError};

/// Итог одного прохода.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub expired: usize,
    /// Ticket already left `Reserved` before its row was locked.
    pub skipped: usize,
    pub failed: usize,
}

/// Итог работы процесса до остановки.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerReport {
    pub ticks: u32,
    pub expired: usize,
    pub failed: usize,
}

#[derive(Debug, Error)]
enum ExpireError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("inventory declined the seat release")]
    Declined,
}

enum Outcome {
    Expired,
    Skipped,
    Failed,
}

pub struct SettlementWorker {
    store: Arc<dyn ReservationStore>,
    gateway: Arc<dyn Gateway>,
    config: WorkerConfig,
}

impl SettlementWorker {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        gateway: Arc<dyn Gateway>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            config,
        }
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<WorkerReport> {
        tokio::spawn(self.run(shutdown))
    }

    /// Runs ticks until `shutdown` flips to `true`, its sender is dropped, or the
    /// configured iteration count is reached. A tick in flight always completes.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> WorkerReport {
        let mut ticker = interval(self.config.interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut report = WorkerReport::default();
        info!(
            "🧹 Settlement worker started: interval={:?}, iterations={}",
            self.config.interval, self.config.iterations
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown signal received");
                        break;
                    }
                    continue;
                }

                _ = ticker.tick() => {}
            }

            let tick = self.tick().await;
            report.ticks += 1;
            report.expired += tick.expired;
            report.failed += tick.failed;

            if self.config.iterations > 0 && report.ticks >= self.config.iterations {
                break;
            }
        }

        info!(
            "✅ Settlement worker stopped: ticks={}, expired={}, failed={}",
            report.ticks, report.expired, report.failed
        );
        report
    }

    /// Один проход: истекшие билеты обрабатываются параллельно, каждый в своей
    /// транзакции. Ошибка по одному билету не прерывает остальные.
    pub async fn tick(&self) -> TickReport {
        let grace = chrono::Duration::from_std(self.config.grace_period)
            .unwrap_or_else(|_| chrono::Duration::minutes(15));
        let cutoff = Utc::now() - grace;

        let tickets = match self
            .store
            .find_expired_tickets(cutoff, self.config.batch_limit)
            .await
        {
            Ok(tickets) => tickets,
            Err(e) => {
                error!("Failed to load expired reservations: {}", e);
                return TickReport::default();
            }
        };

        if tickets.is_empty() {
            debug!("🎫 No expired reservations");
            return TickReport::default();
        }
        info!("🎫 Found {} expired reservations", tickets.len());

        let outcomes: Vec<Outcome> = stream::iter(tickets)
            .map(|ticket| self.expire_ticket(ticket))
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut report = TickReport::default();
        for outcome in outcomes {
            match outcome {
                Outcome::Expired => report.expired += 1,
                Outcome::Skipped => report.skipped += 1,
                Outcome::Failed => report.failed += 1,
            }
        }
        report
    }

    async fn expire_ticket(&self, ticket: Ticket) -> Outcome {
        match self.try_expire(&ticket).await {
            Ok(true) => Outcome::Expired,
            Ok(false) => Outcome::Skipped,
            Err(e) => {
                warn!(
                    ticket_id = ticket.id,
                    error = %e,
                    "Failed to expire reservation, will retry on next tick"
                );
                Outcome::Failed
            }
        }
    }

    async fn try_expire(&self, ticket: &Ticket) -> Result<bool, ExpireError> {
        let mut tx = self.store.begin().await?;

        // Re-read under the row lock: a payment may have settled since the scan.
        let current = match tx.lock_ticket(ticket.id).await? {
            Some(current) if current.status == TicketStatus::Reserved => current,
            _ => {
                tx.rollback().await?;
                debug!("Ticket {} no longer reserved, skipping", ticket.id);
                return Ok(false);
            }
        };

        let flight = tx
            .find_flight(current.flight_id)
            .await?
            .ok_or(StoreError::NotFound {
                entity: "flight",
                id: current.flight_id,
            })?;

        if !self.gateway.refund_seats(&flight.number, current.count).await? {
            tx.rollback().await?;
            return Err(ExpireError::Declined);
        }

        tx.set_ticket_status(current.id, TicketStatus::Expired).await?;
        let payments = tx.expire_requested_payments(current.id).await?;
        tx.commit().await?;

        info!(
            "🎫 Reservation {} expired: {} seats of {} released, {} payments expired",
            current.id, current.count, flight.number, payments
        );
        Ok(true)
    }
}
