use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::time::Duration;
use tracing::{debug, info};

use super::{ReservationStore, StoreError, StoreResult, StoreTx};
use crate::config::DatabaseConfig;
use crate::models::{
    Flight, NewFlight, NewTicket, Payment, PaymentStatus, Penalty, Ticket, TicketStatus,
};

const TICKET_SELECT: &str = r#"
    SELECT t.id, t.user_id, t.flight_id, t.unit_price, t.count, t.status, t.created_at,
           ARRAY(
               SELECT tp.passenger_id FROM ticket_passengers tp
               WHERE tp.ticket_id = t.id
               ORDER BY tp.passenger_id
           ) AS passenger_ids
    FROM tickets t
"#;

const FLIGHT_COLUMNS: &str =
    "id, number, from_city_id, to_city_id, airline, airplane, started_at, finished_at, penalties";

const PAYMENT_COLUMNS: &str = "id, ticket_id, amount, status, created_at, settled_at";

// --- Строки таблиц ---

#[derive(Debug, FromRow)]
struct TicketRow {
    id: i64,
    user_id: i64,
    flight_id: i64,
    unit_price: i64,
    count: i32,
    status: String,
    created_at: DateTime<Utc>,
    passenger_ids: Vec<i64>,
}

impl TryFrom<TicketRow> for Ticket {
    type Error = StoreError;

    fn try_from(row: TicketRow) -> Result<Self, Self::Error> {
        Ok(Ticket {
            id: row.id,
            user_id: row.user_id,
            flight_id: row.flight_id,
            passenger_ids: row.passenger_ids,
            unit_price: row.unit_price,
            count: row.count,
            status: row.status.parse()?,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct FlightRow {
    id: i64,
    number: String,
    from_city_id: Option<i64>,
    to_city_id: Option<i64>,
    airline: String,
    airplane: String,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    penalties: Json<Vec<Penalty>>,
}

impl From<FlightRow> for Flight {
    fn from(row: FlightRow) -> Self {
        Flight {
            id: row.id,
            number: row.number,
            from_city_id: row.from_city_id,
            to_city_id: row.to_city_id,
            airline: row.airline,
            airplane: row.airplane,
            started_at: row.started_at,
            finished_at: row.finished_at,
            penalties: row.penalties.0,
        }
    }
}

#[derive(Debug, FromRow)]
struct PaymentRow {
    id: i64,
    ticket_id: i64,
    amount: i64,
    status: String,
    created_at: DateTime<Utc>,
    settled_at: Option<DateTime<Utc>>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = StoreError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(Payment {
            id: row.id,
            ticket_id: row.ticket_id,
            amount: row.amount,
            status: row.status.parse()?,
            created_at: row.created_at,
            settled_at: row.settled_at,
        })
    }
}

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size)
            .acquire_timeout(Duration::from_secs(5))
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Running database migrations...");
        sqlx::migrate!("./src/migrations").run(&self.pool).await?;
        info!("Migrations completed");
        Ok(())
    }
}

#[async_trait]
impl ReservationStore for PgStore {
    async fn count_passengers(&self, user_id: i64, passenger_ids: &[i64]) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM passengers WHERE user_id = $1 AND id = ANY($2)",
        )
        .bind(user_id)
        .bind(passenger_ids)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn find_or_create_flight(&self, flight: &NewFlight) -> StoreResult<Flight> {
        // ON CONFLICT keeps the first writer's row when two reservations race.
        let row: FlightRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO flights
                (number, from_city_id, to_city_id, airline, airplane, started_at, finished_at, penalties)
            VALUES
                ($1, (SELECT id FROM cities WHERE name = $2), (SELECT id FROM cities WHERE name = $3),
                 $4, $5, $6, $7, $8)
            ON CONFLICT (number) DO UPDATE SET penalties = EXCLUDED.penalties
            RETURNING {FLIGHT_COLUMNS}
            "#
        ))
        .bind(&flight.number)
        .bind(&flight.origin)
        .bind(&flight.destination)
        .bind(&flight.airline)
        .bind(&flight.airplane)
        .bind(flight.started_at)
        .bind(flight.finished_at)
        .bind(Json(&flight.penalties))
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn find_flight(&self, id: i64) -> StoreResult<Option<Flight>> {
        let row: Option<FlightRow> =
            sqlx::query_as(&format!("SELECT {FLIGHT_COLUMNS} FROM flights WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(Flight::from))
    }

    async fn create_ticket(&self, ticket: &NewTicket) -> StoreResult<Ticket> {
        let mut tx = self.pool.begin().await?;

        let (id, created_at): (i64, DateTime<Utc>) = sqlx::query_as(
            "INSERT INTO tickets (user_id, flight_id, unit_price, count, status)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING id, created_at",
        )
        .bind(ticket.user_id)
        .bind(ticket.flight_id)
        .bind(ticket.unit_price)
        .bind(ticket.count)
        .bind(TicketStatus::Reserved.as_str())
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO ticket_passengers (ticket_id, passenger_id)
             SELECT $1, UNNEST($2::BIGINT[])",
        )
        .bind(id)
        .bind(&ticket.passenger_ids)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(ticket_id = id, "Ticket row inserted");

        let mut passenger_ids = ticket.passenger_ids.clone();
        passenger_ids.sort_unstable();

        Ok(Ticket {
            id,
            user_id: ticket.user_id,
            flight_id: ticket.flight_id,
            passenger_ids,
            unit_price: ticket.unit_price,
            count: ticket.count,
            status: TicketStatus::Reserved,
            created_at,
        })
    }

    async fn find_ticket(&self, id: i64) -> StoreResult<Option<Ticket>> {
        let row: Option<TicketRow> = sqlx::query_as(&format!("{TICKET_SELECT} WHERE t.id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Ticket::try_from).transpose()
    }

    async fn find_expired_tickets(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Ticket>> {
        let rows: Vec<TicketRow> = sqlx::query_as(&format!(
            "{TICKET_SELECT} WHERE t.status = $1 AND t.created_at < $2 ORDER BY t.created_at LIMIT $3"
        ))
        .bind(TicketStatus::Reserved.as_str())
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Ticket::try_from).collect()
    }

    async fn create_payment(&self, ticket_id: i64, amount: i64) -> StoreResult<Payment> {
        let row: PaymentRow = sqlx::query_as(&format!(
            "INSERT INTO payments (ticket_id, amount, status) VALUES ($1, $2, $3)
             RETURNING {PAYMENT_COLUMNS}"
        ))
        .bind(ticket_id)
        .bind(amount)
        .bind(PaymentStatus::Requested.as_str())
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn find_payment(&self, id: i64) -> StoreResult<Option<Payment>> {
        let row: Option<PaymentRow> =
            sqlx::query_as(&format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(Payment::try_from).transpose()
    }

    async fn payments_for_ticket(&self, ticket_id: i64) -> StoreResult<Vec<Payment>> {
        let rows: Vec<PaymentRow> = sqlx::query_as(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE ticket_id = $1 ORDER BY created_at, id"
        ))
        .bind(ticket_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Payment::try_from).collect()
    }

    async fn update_payment_status(&self, id: i64, status: PaymentStatus) -> StoreResult<()> {
        let result = sqlx::query("UPDATE payments SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound { entity: "payment", id });
        }
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgStoreTx { tx }))
    }
}

/// Транзакция поверх `sqlx::Transaction`; при drop без commit выполняется откат.
pub struct PgStoreTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgStoreTx {
    async fn lock_ticket(&mut self, id: i64) -> StoreResult<Option<Ticket>> {
        let row: Option<TicketRow> =
            sqlx::query_as(&format!("{TICKET_SELECT} WHERE t.id = $1 FOR UPDATE OF t"))
                .bind(id)
                .fetch_optional(&mut *self.tx)
                .await?;

        row.map(Ticket::try_from).transpose()
    }

    async fn lock_payment(&mut self, id: i64) -> StoreResult<Option<Payment>> {
        let row: Option<PaymentRow> = sqlx::query_as(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(Payment::try_from).transpose()
    }

    async fn find_flight(&mut self, id: i64) -> StoreResult<Option<Flight>> {
        let row: Option<FlightRow> =
            sqlx::query_as(&format!("SELECT {FLIGHT_COLUMNS} FROM flights WHERE id = $1"))
                .bind(id)
                .fetch_optional(&mut *self.tx)
                .await?;

        Ok(row.map(Flight::from))
    }

    async fn set_ticket_status(&mut self, id: i64, status: TicketStatus) -> StoreResult<()> {
        let result = sqlx::query("UPDATE tickets SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&mut *self.tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound { entity: "ticket", id });
        }
        Ok(())
    }

    async fn expire_requested_payments(&mut self, ticket_id: i64) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE payments SET status = $2 WHERE ticket_id = $1 AND status = $3",
        )
        .bind(ticket_id)
        .bind(PaymentStatus::Expired.as_str())
        .bind(PaymentStatus::Requested.as_str())
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected())
    }

    async fn mark_payment_verified(
        &mut self,
        id: i64,
        settled_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let result = sqlx::query("UPDATE payments SET status = $2, settled_at = $3 WHERE id = $1")
            .bind(id)
            .bind(PaymentStatus::Verified.as_str())
            .bind(settled_at)
            .execute(&mut *self.tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound { entity: "payment", id });
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
