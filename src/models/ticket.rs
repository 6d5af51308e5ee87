use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::UnknownStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TicketStatus {
    Reserved,
    Paid,
    Expired,
    Refunded,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Reserved => "Reserved",
            TicketStatus::Paid => "Paid",
            TicketStatus::Expired => "Expired",
            TicketStatus::Refunded => "Refunded",
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Reserved" => Ok(TicketStatus::Reserved),
            "Paid" => Ok(TicketStatus::Paid),
            "Expired" => Ok(TicketStatus::Expired),
            "Refunded" => Ok(TicketStatus::Refunded),
            other => Err(UnknownStatus { kind: "ticket", value: other.to_string() }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: i64,
    pub user_id: i64,
    pub flight_id: i64,
    pub passenger_ids: Vec<i64>,
    pub unit_price: i64,
    pub count: i32,
    pub status: TicketStatus,
    pub created_at: DateTime<Utc>,
}

impl Ticket {
    /// Сумма к оплате за все места в брони.
    pub fn total_amount(&self) -> i64 {
        self.unit_price * i64::from(self.count)
    }
}

/// Данные для создания брони. Статус всегда `Reserved`.
#[derive(Debug, Clone)]
pub struct NewTicket {
    pub user_id: i64,
    pub flight_id: i64,
    pub passenger_ids: Vec<i64>,
    pub unit_price: i64,
    pub count: i32,
}
