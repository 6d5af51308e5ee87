pub mod config;
pub mod controllers;
pub mod gateway;
pub mod middleware;
pub mod models;
pub mod services;
pub mod store;

use std::sync::Arc;

use gateway::HttpGateway;
use services::{PaymentService, ReservationService};
use store::ReservationStore;

// Shared state для всего приложения
pub struct AppState {
    pub config: config::Config,
    pub store: Arc<dyn ReservationStore>,
    pub gateway: Arc<HttpGateway>,
    pub reservations: ReservationService,
    pub payments: PaymentService,
}

impl AppState {
    pub fn new(
        config: config::Config,
        store: Arc<dyn ReservationStore>,
        gateway: Arc<HttpGateway>,
    ) -> Arc<Self> {
        let reservations = ReservationService::new(store.clone(), gateway.clone());
        let payments = PaymentService::new(store.clone(), gateway.clone(), config.refund.clone());

        Arc::new(Self {
            config,
            store,
            gateway,
            reservations,
            payments,
        })
    }
}
