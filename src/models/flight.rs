use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row of a flight's cancellation penalty schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Penalty {
    pub start: String,
    pub end: String,
    pub percent: i32,
}

/// Locally cached flight. City references are resolved from the upstream
/// city names and may be missing if reference data hasn't been synced yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flight {
    pub id: i64,
    pub number: String,
    pub from_city_id: Option<i64>,
    pub to_city_id: Option<i64>,
    pub airline: String,
    pub airplane: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub penalties: Vec<Penalty>,
}

/// Flight details as reported by the upstream inventory provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightInfo {
    pub number: String,
    pub airplane: String,
    pub airline: String,
    pub price: i64,
    pub origin: String,
    pub destination: String,
    pub capacity: i32,
    pub empty_capacity: i32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(default)]
    pub penalties: Vec<Penalty>,
}

#[derive(Debug, Clone)]
pub struct NewFlight {
    pub number: String,
    pub origin: String,
    pub destination: String,
    pub airline: String,
    pub airplane: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub penalties: Vec<Penalty>,
}

impl From<&FlightInfo> for NewFlight {
    fn from(info: &FlightInfo) -> Self {
        Self {
            number: info.number.clone(),
            origin: info.origin.clone(),
            destination: info.destination.clone(),
            airline: info.airline.clone(),
            airplane: info.airplane.clone(),
            started_at: info.started_at,
            finished_at: info.finished_at,
            penalties: info.penalties.clone(),
        }
    }
}
