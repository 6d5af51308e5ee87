//! reservation.rs
//!
//! Бронирование мест: проверка пассажиров, кэширование рейса, резерв мест у
//! внешнего провайдера и сохранение билета. Если билет не удалось сохранить
//! после успешного резерва, места возвращаются провайдеру.

use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::gateway::{Gateway, GatewayError};
use crate::models::{NewFlight, NewTicket, Ticket};
use crate::store::{ReservationStore, StoreError};

#[derive(Debug, Error)]
pub enum ReservationError {
    #[error("invalid reservation request: {0}")]
    Validation(&'static str),

    #[error("one or more passengers were not found")]
    PassengersNotFound,

    #[error("flight {0} is sold out")]
    SoldOut(String),

    #[error(transparent)]
    Upstream(#[from] GatewayError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone)]
pub struct ReservationService {
    store: Arc<dyn ReservationStore>,
    gateway: Arc<dyn Gateway>,
}

impl ReservationService {
    pub fn new(store: Arc<dyn ReservationStore>, gateway: Arc<dyn Gateway>) -> Self {
        Self { store, gateway }
    }

    /// Резервирует по одному месту на каждого пассажира и возвращает билет в статусе `Reserved`.
    pub async fn reserve(
        &self,
        user_id: i64,
        flight_number: &str,
        passenger_ids: &[i64],
    ) -> Result<Ticket, ReservationError> {
        let flight_number = flight_number.trim();
        if flight_number.is_empty() {
            return Err(ReservationError::Validation("flight number is required"));
        }
        if passenger_ids.is_empty() {
            return Err(ReservationError::Validation("at least one passenger is required"));
        }
        let count = seat_count(passenger_ids.len())?;

        // A count mismatch covers unknown ids, foreign ids and duplicates alike.
        let found = self.store.count_passengers(user_id, passenger_ids).await?;
        if found != passenger_ids.len() as i64 {
            warn!(user_id, requested = passenger_ids.len(), found, "Reservation rejected: passengers not found");
            return Err(ReservationError::PassengersNotFound);
        }

        let flight_info = self.gateway.get_flight(flight_number).await?;
        let flight = self
            .store
            .find_or_create_flight(&NewFlight::from(&flight_info))
            .await?;

        if !self.gateway.reserve_seats(&flight.number, count).await? {
            info!(flight = %flight.number, count, "Reservation rejected: sold out");
            return Err(ReservationError::SoldOut(flight.number));
        }

        let new_ticket = NewTicket {
            user_id,
            flight_id: flight.id,
            passenger_ids: passenger_ids.to_vec(),
            unit_price: flight_info.price,
            count,
        };

        match self.store.create_ticket(&new_ticket).await {
            Ok(ticket) => {
                info!(
                    ticket_id = ticket.id,
                    user_id,
                    flight = %flight.number,
                    count,
                    "Seats reserved"
                );
                Ok(ticket)
            }
            Err(e) => {
                error!(flight = %flight.number, count, error = %e, "Failed to persist ticket after upstream reservation");
                self.release_seats(&flight.number, count).await;
                Err(e.into())
            }
        }
    }

    /// Компенсация: вернуть места провайдеру. Не повторяется, только логируется.
    async fn release_seats(&self, flight_number: &str, count: i32) {
        match self.gateway.refund_seats(flight_number, count).await {
            Ok(true) => info!(flight = flight_number, count, "Compensating seat release done"),
            Ok(false) => error!(
                flight = flight_number,
                count,
                "Compensating seat release declined by inventory, seats are leaked"
            ),
            Err(e) => error!(
                flight = flight_number,
                count,
                error = %e,
                "Compensating seat release failed, seats are leaked"
            ),
        }
    }
}

fn seat_count(passengers: usize) -> Result<i32, ReservationError> {
    i32::try_from(passengers).map_err(|_| ReservationError::Validation("too many passengers"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seat_count_rejects_values_beyond_i32() {
        assert_eq!(seat_count(3).unwrap(), 3);
        assert!(matches!(
            seat_count(usize::MAX),
            Err(ReservationError::Validation("too many passengers"))
        ));
    }
}
