//! In-process store with the same semantics as [`super::PgStore`].
//!
//! Transactions lock individual ticket and payment rows, like
//! `SELECT ... FOR UPDATE`, and buffer their writes until commit, so readers
//! outside the transaction never see uncommitted state. Used by the
//! integration tests and for running without a database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{ReservationStore, StoreError, StoreResult, StoreTx};
use crate::models::{
    Flight, NewFlight, NewTicket, Passenger, Payment, PaymentStatus, Ticket, TicketStatus,
};

/// Operations that can be forced to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailurePoint {
    CreateTicket,
    CreatePayment,
    SettlePayment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum RowKey {
    Ticket(i64),
    Payment(i64),
}

#[derive(Debug, Default)]
struct MemoryState {
    next_id: i64,
    passengers: BTreeMap<i64, Passenger>,
    flights: BTreeMap<i64, Flight>,
    tickets: BTreeMap<i64, Ticket>,
    payments: BTreeMap<i64, Payment>,
}

impl MemoryState {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    /// Never held across an await.
    state: Arc<StdMutex<MemoryState>>,
    row_locks: Arc<StdMutex<HashMap<RowKey, Arc<Mutex<()>>>>>,
    failures: Arc<StdMutex<HashSet<FailurePoint>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every later call to `point` fails until [`MemoryStore::clear_failure`].
    pub fn inject_failure(&self, point: FailurePoint) {
        self.failures_guard().insert(point);
    }

    pub fn clear_failure(&self, point: FailurePoint) {
        self.failures_guard().remove(&point);
    }

    fn failures_guard(&self) -> MutexGuard<'_, HashSet<FailurePoint>> {
        self.failures.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn lock_row(&self, key: RowKey) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.row_locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            locks.entry(key).or_default().clone()
        };
        lock.lock_owned().await
    }

    fn check(&self, point: FailurePoint) -> StoreResult<()> {
        if self.failures_guard().contains(&point) {
            return Err(StoreError::Unavailable(format!("injected failure at {point:?}")));
        }
        Ok(())
    }

    pub async fn add_passenger(
        &self,
        user_id: i64,
        national_code: &str,
        first_name: &str,
        last_name: &str,
    ) -> Passenger {
        let mut state = self.state();
        let id = state.allocate_id();
        let passenger = Passenger {
            id,
            user_id,
            national_code: national_code.to_string(),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            gender: String::new(),
        };
        state.passengers.insert(id, passenger.clone());
        passenger
    }

    /// Stores a ticket as-is, keeping its id.
    pub async fn put_ticket(&self, ticket: Ticket) {
        let mut state = self.state();
        state.next_id = state.next_id.max(ticket.id);
        state.tickets.insert(ticket.id, ticket);
    }

    /// Moves a ticket's creation time, e.g. to push it past the grace period.
    pub async fn backdate_ticket(&self, id: i64, created_at: DateTime<Utc>) -> StoreResult<()> {
        let mut state = self.state();
        let ticket = state
            .tickets
            .get_mut(&id)
            .ok_or(StoreError::NotFound { entity: "ticket", id })?;
        ticket.created_at = created_at;
        Ok(())
    }

    pub async fn ticket_count(&self) -> usize {
        self.state().tickets.len()
    }
}

#[async_trait]
impl ReservationStore for MemoryStore {
    async fn count_passengers(&self, user_id: i64, passenger_ids: &[i64]) -> StoreResult<i64> {
        let state = self.state();
        let distinct: HashSet<&i64> = passenger_ids.iter().collect();
        let count = distinct
            .into_iter()
            .filter(|id| state.passengers.get(*id).is_some_and(|p| p.user_id == user_id))
            .count();
        Ok(count as i64)
    }

    async fn find_or_create_flight(&self, flight: &NewFlight) -> StoreResult<Flight> {
        let mut state = self.state();

        if let Some(existing) = state.flights.values_mut().find(|f| f.number == flight.number) {
            existing.penalties = flight.penalties.clone();
            return Ok(existing.clone());
        }

        let id = state.allocate_id();
        let created = Flight {
            id,
            number: flight.number.clone(),
            from_city_id: None,
            to_city_id: None,
            airline: flight.airline.clone(),
            airplane: flight.airplane.clone(),
            started_at: flight.started_at,
            finished_at: flight.finished_at,
            penalties: flight.penalties.clone(),
        };
        state.flights.insert(id, created.clone());
        Ok(created)
    }

    async fn find_flight(&self, id: i64) -> StoreResult<Option<Flight>> {
        Ok(self.state().flights.get(&id).cloned())
    }

    async fn create_ticket(&self, ticket: &NewTicket) -> StoreResult<Ticket> {
        self.check(FailurePoint::CreateTicket)?;
        let mut state = self.state();

        if !state.flights.contains_key(&ticket.flight_id) {
            return Err(StoreError::NotFound { entity: "flight", id: ticket.flight_id });
        }

        let mut passenger_ids = ticket.passenger_ids.clone();
        passenger_ids.sort_unstable();

        let id = state.allocate_id();
        let created = Ticket {
            id,
            user_id: ticket.user_id,
            flight_id: ticket.flight_id,
            passenger_ids,
            unit_price: ticket.unit_price,
            count: ticket.count,
            status: TicketStatus::Reserved,
            created_at: Utc::now(),
        };
        state.tickets.insert(id, created.clone());
        Ok(created)
    }

    async fn find_ticket(&self, id: i64) -> StoreResult<Option<Ticket>> {
        Ok(self.state().tickets.get(&id).cloned())
    }

    async fn find_expired_tickets(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Ticket>> {
        let state = self.state();
        let mut expired: Vec<Ticket> = state
            .tickets
            .values()
            .filter(|t| t.status == TicketStatus::Reserved && t.created_at < cutoff)
            .cloned()
            .collect();
        expired.sort_by_key(|t| t.created_at);
        expired.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(expired)
    }

    async fn create_payment(&self, ticket_id: i64, amount: i64) -> StoreResult<Payment> {
        self.check(FailurePoint::CreatePayment)?;
        let mut state = self.state();

        if !state.tickets.contains_key(&ticket_id) {
            return Err(StoreError::NotFound { entity: "ticket", id: ticket_id });
        }

        let id = state.allocate_id();
        let payment = Payment {
            id,
            ticket_id,
            amount,
            status: PaymentStatus::Requested,
            created_at: Utc::now(),
            settled_at: None,
        };
        state.payments.insert(id, payment.clone());
        Ok(payment)
    }

    async fn find_payment(&self, id: i64) -> StoreResult<Option<Payment>> {
        Ok(self.state().payments.get(&id).cloned())
    }

    async fn payments_for_ticket(&self, ticket_id: i64) -> StoreResult<Vec<Payment>> {
        let state = self.state();
        Ok(state
            .payments
            .values()
            .filter(|p| p.ticket_id == ticket_id)
            .cloned()
            .collect())
    }

    async fn update_payment_status(&self, id: i64, status: PaymentStatus) -> StoreResult<()> {
        // A plain UPDATE still waits for the row lock.
        let _row = self.lock_row(RowKey::Payment(id)).await;
        let mut state = self.state();
        let payment = state
            .payments
            .get_mut(&id)
            .ok_or(StoreError::NotFound { entity: "payment", id })?;
        payment.status = status;
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        Ok(Box::new(MemoryTx {
            store: self.clone(),
            locks: HashMap::new(),
            tickets: BTreeMap::new(),
            payments: BTreeMap::new(),
            settle_fails: self.failures_guard().contains(&FailurePoint::SettlePayment),
        }))
    }
}

/// Row locks are released and buffered writes discarded when dropped without commit.
pub struct MemoryTx {
    store: MemoryStore,
    locks: HashMap<RowKey, OwnedMutexGuard<()>>,
    tickets: BTreeMap<i64, Ticket>,
    payments: BTreeMap<i64, Payment>,
    settle_fails: bool,
}

impl MemoryTx {
    async fn lock(&mut self, key: RowKey) {
        if !self.locks.contains_key(&key) {
            let guard = self.store.lock_row(key).await;
            self.locks.insert(key, guard);
        }
    }

    fn ticket(&self, id: i64) -> Option<Ticket> {
        self.tickets
            .get(&id)
            .cloned()
            .or_else(|| self.store.state().tickets.get(&id).cloned())
    }

    fn payment(&self, id: i64) -> Option<Payment> {
        self.payments
            .get(&id)
            .cloned()
            .or_else(|| self.store.state().payments.get(&id).cloned())
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn lock_ticket(&mut self, id: i64) -> StoreResult<Option<Ticket>> {
        self.lock(RowKey::Ticket(id)).await;
        Ok(self.ticket(id))
    }

    async fn lock_payment(&mut self, id: i64) -> StoreResult<Option<Payment>> {
        self.lock(RowKey::Payment(id)).await;
        Ok(self.payment(id))
    }

    async fn find_flight(&mut self, id: i64) -> StoreResult<Option<Flight>> {
        Ok(self.store.state().flights.get(&id).cloned())
    }

    async fn set_ticket_status(&mut self, id: i64, status: TicketStatus) -> StoreResult<()> {
        self.lock(RowKey::Ticket(id)).await;
        let mut ticket = self
            .ticket(id)
            .ok_or(StoreError::NotFound { entity: "ticket", id })?;
        ticket.status = status;
        self.tickets.insert(id, ticket);
        Ok(())
    }

    async fn expire_requested_payments(&mut self, ticket_id: i64) -> StoreResult<u64> {
        let ids: Vec<i64> = {
            let state = self.store.state();
            state
                .payments
                .values()
                .filter(|p| p.ticket_id == ticket_id)
                .map(|p| p.id)
                .collect()
        };

        let mut expired = 0;
        for id in ids {
            self.lock(RowKey::Payment(id)).await;
            if let Some(mut payment) = self.payment(id) {
                if payment.status == PaymentStatus::Requested {
                    payment.status = PaymentStatus::Expired;
                    self.payments.insert(id, payment);
                    expired += 1;
                }
            }
        }
        Ok(expired)
    }

    async fn mark_payment_verified(
        &mut self,
        id: i64,
        settled_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        if self.settle_fails {
            return Err(StoreError::Unavailable("injected failure at SettlePayment".to_string()));
        }
        self.lock(RowKey::Payment(id)).await;
        let mut payment = self
            .payment(id)
            .ok_or(StoreError::NotFound { entity: "payment", id })?;
        payment.status = PaymentStatus::Verified;
        payment.settled_at = Some(settled_at);
        self.payments.insert(id, payment);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTx {
            store,
            locks,
            tickets,
            payments,
            ..
        } = *self;

        {
            let mut state = store.state();
            state.tickets.extend(tickets);
            state.payments.extend(payments);
        }
        drop(locks);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_flight(number: &str) -> NewFlight {
        NewFlight {
            number: number.to_string(),
            origin: "Tehran".to_string(),
            destination: "Shiraz".to_string(),
            airline: "Iran Air".to_string(),
            airplane: "A321".to_string(),
            started_at: Utc::now(),
            finished_at: Utc::now() + Duration::hours(1),
            penalties: Vec::new(),
        }
    }

    #[tokio::test]
    async fn flight_is_created_once_per_number() {
        let store = MemoryStore::new();

        let first = store.find_or_create_flight(&new_flight("F101")).await.unwrap();
        let second = store.find_or_create_flight(&new_flight("F101")).await.unwrap();

        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn uncommitted_transaction_is_rolled_back_on_drop() {
        let store = MemoryStore::new();
        let flight = store.find_or_create_flight(&new_flight("F101")).await.unwrap();
        let ticket = store
            .create_ticket(&NewTicket {
                user_id: 1,
                flight_id: flight.id,
                passenger_ids: vec![],
                unit_price: 10,
                count: 1,
            })
            .await
            .unwrap();

        {
            let mut tx = store.begin().await.unwrap();
            tx.set_ticket_status(ticket.id, TicketStatus::Expired).await.unwrap();
        }

        let reloaded = store.find_ticket(ticket.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, TicketStatus::Reserved);
    }

    async fn reserved_ticket(store: &MemoryStore, flight_id: i64) -> Ticket {
        store
            .create_ticket(&NewTicket {
                user_id: 1,
                flight_id,
                passenger_ids: vec![],
                unit_price: 10,
                count: 1,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn writes_are_invisible_until_commit() {
        let store = MemoryStore::new();
        let flight = store.find_or_create_flight(&new_flight("F101")).await.unwrap();
        let ticket = reserved_ticket(&store, flight.id).await;

        let mut tx = store.begin().await.unwrap();
        tx.lock_ticket(ticket.id).await.unwrap();
        tx.set_ticket_status(ticket.id, TicketStatus::Paid).await.unwrap();

        let outside = store.find_ticket(ticket.id).await.unwrap().unwrap();
        assert_eq!(outside.status, TicketStatus::Reserved);
        let inside = tx.lock_ticket(ticket.id).await.unwrap().unwrap();
        assert_eq!(inside.status, TicketStatus::Paid);

        tx.commit().await.unwrap();
        let committed = store.find_ticket(ticket.id).await.unwrap().unwrap();
        assert_eq!(committed.status, TicketStatus::Paid);
    }

    #[tokio::test]
    async fn row_locks_block_only_the_same_row() {
        let store = MemoryStore::new();
        let flight = store.find_or_create_flight(&new_flight("F101")).await.unwrap();
        let first = reserved_ticket(&store, flight.id).await;
        let second = reserved_ticket(&store, flight.id).await;

        let mut a = store.begin().await.unwrap();
        a.lock_ticket(first.id).await.unwrap();

        let mut b = store.begin().await.unwrap();
        b.lock_ticket(second.id).await.unwrap();

        let wait = std::time::Duration::from_millis(50);
        let blocked = tokio::time::timeout(wait, b.lock_ticket(first.id)).await;
        assert!(blocked.is_err());

        a.commit().await.unwrap();
        let unblocked = tokio::time::timeout(wait, b.lock_ticket(first.id)).await;
        assert!(unblocked.is_ok());
    }

    #[tokio::test]
    async fn duplicate_passenger_ids_count_once() {
        let store = MemoryStore::new();
        let p = store.add_passenger(1, "0012345678", "Sara", "Ahmadi").await;

        let count = store.count_passengers(1, &[p.id, p.id]).await.unwrap();
        assert_eq!(count, 1);
        assert_eq!(store.count_passengers(2, &[p.id]).await.unwrap(), 0);
    }
}
