use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// Passengers are managed elsewhere; reservations only reference them by id.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Passenger {
    pub id: i64,
    pub user_id: i64,
    pub national_code: String,
    pub first_name: String,
    pub last_name: String,
    pub gender: String,
}
