#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use std::collections::HashMap;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use flight_reservation::config::RefundConfig;
use flight_reservation::gateway::{Gateway, GatewayError, TransactionCheck};
use flight_reservation::models::{FlightInfo, Ticket, TicketStatus};
use flight_reservation::services::{PaymentService, ReservationService};
use flight_reservation::store::MemoryStore;

pub const REDIRECT: &str = "https://ipg.example/pay?token=abc";

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    GetFlight(String),
    ReserveSeats(String, i32),
    RefundSeats(String, i32),
    CreatePayment { payment_id: i64, amount: i64 },
    CheckTransaction { payment_id: i64, tref: i64 },
    VerifyPayment { payment_id: i64, amount: i64 },
    RefundPayment(i64),
}

/// Recording gateway double with switchable upstream behavior.
pub struct FakeGateway {
    calls: Mutex<Vec<Call>>,
    flights: Mutex<HashMap<String, FlightInfo>>,
    pub sold_out: AtomicBool,
    pub refund_seats_fails: AtomicBool,
    pub verify_ok: AtomicBool,
    /// Number of `refund_payment` calls that fail before one succeeds.
    pub refund_payment_failures: AtomicU32,
    check: Mutex<Option<TransactionCheck>>,
    seat_release_delay: Mutex<std::time::Duration>,
    before_seat_release: Mutex<Option<BoxFuture<'static, ()>>>,
    releases_in_flight: AtomicUsize,
    peak_releases_in_flight: AtomicUsize,
}

impl Default for FakeGateway {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            flights: Mutex::new(HashMap::new()),
            sold_out: AtomicBool::new(false),
            refund_seats_fails: AtomicBool::new(false),
            verify_ok: AtomicBool::new(true),
            refund_payment_failures: AtomicU32::new(0),
            check: Mutex::new(None),
            seat_release_delay: Mutex::new(std::time::Duration::ZERO),
            before_seat_release: Mutex::new(None),
            releases_in_flight: AtomicUsize::new(0),
            peak_releases_in_flight: AtomicUsize::new(0),
        }
    }
}

impl FakeGateway {
    pub fn with_flight(number: &str, price: i64) -> Arc<Self> {
        let gateway = Self::default();
        gateway.add_flight(number, price);
        Arc::new(gateway)
    }

    pub fn add_flight(&self, number: &str, price: i64) {
        let started_at = Utc::now() + Duration::days(7);
        self.flights.lock().unwrap().insert(
            number.to_string(),
            FlightInfo {
                number: number.to_string(),
                airplane: "A320".to_string(),
                airline: "Caspian".to_string(),
                price,
                origin: "Tehran".to_string(),
                destination: "Mashhad".to_string(),
                capacity: 180,
                empty_capacity: 42,
                started_at,
                finished_at: started_at + Duration::hours(2),
                penalties: Vec::new(),
            },
        );
    }

    /// What `check_transaction` reports; by default it echoes a successful
    /// transaction of whatever amount the payment was created with.
    pub fn set_check(&self, is_success: bool, amount: i64) {
        *self.check.lock().unwrap() = Some(TransactionCheck { is_success, amount });
    }

    /// Every `refund_seats` call sleeps this long before answering.
    pub fn slow_seat_release(&self, delay: std::time::Duration) {
        *self.seat_release_delay.lock().unwrap() = delay;
    }

    /// Runs `hook` once, inside the next `refund_seats` call.
    pub fn before_next_seat_release(&self, hook: BoxFuture<'static, ()>) {
        *self.before_seat_release.lock().unwrap() = Some(hook);
    }

    /// Highest number of `refund_seats` calls that were running at once.
    pub fn peak_seat_releases(&self) -> usize {
        self.peak_releases_in_flight.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| matches(c)).count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn created_amount(&self, payment_id: i64) -> Option<i64> {
        self.calls.lock().unwrap().iter().find_map(|call| match call {
            Call::CreatePayment { payment_id: id, amount } if *id == payment_id => Some(*amount),
            _ => None,
        })
    }
}

#[async_trait]
impl Gateway for FakeGateway {
    async fn get_flight(&self, number: &str) -> Result<FlightInfo, GatewayError> {
        self.record(Call::GetFlight(number.to_string()));
        self.flights
            .lock()
            .unwrap()
            .get(number)
            .cloned()
            .ok_or(GatewayError::Status {
                op: "get flight",
                status: 404,
                body: "flight not found".to_string(),
            })
    }

    async fn reserve_seats(&self, number: &str, count: i32) -> Result<bool, GatewayError> {
        self.record(Call::ReserveSeats(number.to_string(), count));
        Ok(!self.sold_out.load(Ordering::SeqCst))
    }

    async fn refund_seats(&self, number: &str, count: i32) -> Result<bool, GatewayError> {
        self.record(Call::RefundSeats(number.to_string(), count));

        let hook = self.before_seat_release.lock().unwrap().take();
        if let Some(hook) = hook {
            hook.await;
        }

        let running = self.releases_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_releases_in_flight.fetch_max(running, Ordering::SeqCst);
        let delay = *self.seat_release_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.releases_in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.refund_seats_fails.load(Ordering::SeqCst) {
            return Err(GatewayError::Timeout { op: "refund seats" });
        }
        Ok(true)
    }

    async fn create_payment(
        &self,
        payment_id: i64,
        amount: i64,
        _invoice_date: NaiveDate,
    ) -> Result<String, GatewayError> {
        self.record(Call::CreatePayment { payment_id, amount });
        Ok(REDIRECT.to_string())
    }

    async fn check_transaction(
        &self,
        invoice_number: i64,
        _invoice_date: NaiveDate,
        transaction_reference_id: i64,
    ) -> Result<TransactionCheck, GatewayError> {
        let configured = self.check.lock().unwrap().clone();
        let check = configured.unwrap_or_else(|| TransactionCheck {
            is_success: true,
            amount: self.created_amount(invoice_number).unwrap_or_default(),
        });
        self.record(Call::CheckTransaction {
            payment_id: invoice_number,
            tref: transaction_reference_id,
        });
        Ok(check)
    }

    async fn verify_payment(
        &self,
        invoice_number: i64,
        _invoice_date: NaiveDate,
        amount: i64,
    ) -> Result<bool, GatewayError> {
        self.record(Call::VerifyPayment { payment_id: invoice_number, amount });
        Ok(self.verify_ok.load(Ordering::SeqCst))
    }

    async fn refund_payment(
        &self,
        invoice_number: i64,
        _invoice_date: NaiveDate,
    ) -> Result<bool, GatewayError> {
        self.record(Call::RefundPayment(invoice_number));
        let remaining = self.refund_payment_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.refund_payment_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(GatewayError::Status {
                op: "refund payment",
                status: 503,
                body: String::new(),
            });
        }
        Ok(true)
    }
}

pub fn fast_refunds(max_attempts: u32) -> RefundConfig {
    RefundConfig {
        max_attempts,
        initial_backoff: std::time::Duration::from_millis(1),
        max_backoff: std::time::Duration::from_millis(4),
    }
}

pub fn reservation_service(store: &MemoryStore, gateway: &Arc<FakeGateway>) -> ReservationService {
    ReservationService::new(Arc::new(store.clone()), gateway.clone())
}

pub fn payment_service(
    store: &MemoryStore,
    gateway: &Arc<FakeGateway>,
    refund: RefundConfig,
) -> PaymentService {
    PaymentService::new(Arc::new(store.clone()), gateway.clone(), refund)
}

/// Three passengers owned by `user_id`.
pub async fn family(store: &MemoryStore, user_id: i64) -> Vec<i64> {
    let mut ids = Vec::new();
    for (code, first) in [("0012345678", "Sara"), ("0023456789", "Reza"), ("0034567890", "Nika")] {
        ids.push(store.add_passenger(user_id, code, first, "Ahmadi").await.id);
    }
    ids
}

pub fn reserved_ticket(id: i64, unit_price: i64, count: i32) -> Ticket {
    Ticket {
        id,
        user_id: 1,
        flight_id: 1,
        passenger_ids: (1..=count as i64).collect(),
        unit_price,
        count,
        status: TicketStatus::Reserved,
        created_at: Utc::now(),
    }
}
