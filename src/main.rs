use anyhow::Context;
use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use flight_reservation::{
    config::Config,
    controllers,
    gateway::HttpGateway,
    services::SettlementWorker,
    store::PgStore,
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env().context("Failed to load configuration")?;

    let registry = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.app.rust_log));
    if config.app.json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    info!("Starting flight reservation service");

    // Connect to the database
    let store = PgStore::connect(&config.database)
        .await
        .context("Failed to connect to database")?;
    info!("Database connected");

    // Run migrations
    store
        .run_migrations()
        .await
        .context("Failed to run migrations")?;

    let gateway = HttpGateway::from_config(
        &config.inventory,
        &config.payment,
        &config.circuit_breaker,
    )
    .context("Failed to build gateway HTTP client")?;

    let app_state = AppState::new(config.clone(), Arc::new(store), Arc::new(gateway));

    // --- Start background tasks ---

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = if config.worker.enabled {
        let worker = SettlementWorker::new(
            app_state.store.clone(),
            app_state.gateway.clone(),
            config.worker.clone(),
        );
        Some(worker.spawn(shutdown_rx))
    } else {
        info!("Settlement worker disabled");
        None
    };

    // --- Start the web server ---

    let app = Router::new()
        .route("/health", get(controllers::health))
        .nest("/api", controllers::routes())
        .with_state(app_state)
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.app.host, config.app.port)
        .parse()
        .context("Invalid HOST/PORT")?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Server drained: stop scheduling worker ticks and wait for the current one.
    let _ = shutdown_tx.send(true);
    if let Some(handle) = worker {
        match handle.await {
            Ok(report) => info!(
                "Settlement worker finished: ticks={}, expired={}, failed={}",
                report.ticks, report.expired, report.failed
            ),
            Err(e) => error!("Settlement worker task failed: {}", e),
        }
    }

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C signal"),
        () = terminate => info!("Received SIGTERM signal"),
    }
}
