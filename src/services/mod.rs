pub mod payment;
pub mod reservation;
pub mod worker;

pub use payment::{PaymentError, PaymentService};
pub use reservation::{ReservationError, ReservationService};
pub use worker::{SettlementWorker, TickReport, WorkerReport};
