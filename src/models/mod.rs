pub mod flight;
pub mod passenger;
pub mod payment;
pub mod ticket;

pub use flight::{Flight, FlightInfo, NewFlight, Penalty};
pub use passenger::Passenger;
pub use payment::{Payment, PaymentStatus};
pub use ticket::{NewTicket, Ticket, TicketStatus};

use thiserror::Error;

/// Статус в базе не соответствует ни одному известному варианту.
#[derive(Debug, Error)]
#[error("unknown {kind} status '{value}'")]
pub struct UnknownStatus {
    pub kind: &'static str,
    pub value: String,
}
