use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dotenv::dotenv;
use tokio::signal;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use vpc_payments::api::{self, AppState};
use vpc_payments::config::{AppConfig, LoggingConfig, StoreBackend};
use vpc_payments::database::{
    self, InMemoryTransactionStore, PgTransactionStore, TransactionStore,
};
use vpc_payments::health::HealthChecker;
use vpc_payments::logging::{init_tracing, mask_secret};
use vpc_payments::middleware::logging::{request_logging_middleware, UuidRequestId};
use vpc_payments::payments::gateway::PaymentGateway;
use vpc_payments::payments::providers::VpcGateway;
use vpc_payments::services::{PaymentService, WebhookProcessor};
use vpc_payments::workers::{JobScheduler, ReconciliationWorker};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    init_tracing(&LoggingConfig::from_env());

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting VPC payment gateway service"
    );

    let config = match AppConfig::from_env().and_then(|c| c.validate().map(|_| c)) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration, refusing to start");
            std::process::exit(1);
        }
    };

    info!(
        merchant_id = %config.gateway.merchant_id,
        secure_secret = %mask_secret(&config.gateway.secure_secret),
        hash_algorithm = config.gateway.hash_algorithm.as_str(),
        store = ?config.store,
        refund_failure_mode = ?config.refund_failure_mode,
        "Configuration loaded"
    );

    let store: Arc<dyn TransactionStore> = match config.store {
        StoreBackend::Postgres => {
            info!("Initializing database connection pool...");
            let pool = database::connect(&config.database).await?;
            if config.database.run_migrations {
                database::run_migrations(&pool).await?;
            }
            info!(
                max_connections = pool.options().get_max_connections(),
                "Database connection pool initialized"
            );
            Arc::new(PgTransactionStore::new(pool))
        }
        StoreBackend::Memory => {
            warn!("Using in-memory transaction store; data is lost on restart");
            Arc::new(InMemoryTransactionStore::new())
        }
    };

    let gateway: Arc<dyn PaymentGateway> = Arc::new(VpcGateway::new(config.gateway.clone())?);
    let payments = Arc::new(
        PaymentService::new(store.clone(), gateway)
            .with_refund_failure_mode(config.refund_failure_mode),
    );

    let worker = Arc::new(ReconciliationWorker::new(
        payments.clone(),
        config.reconciliation.clone(),
    ));
    let scheduler = JobScheduler::new(worker, config.scheduler.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_handle = tokio::spawn(scheduler.clone().run(shutdown_rx));

    if config.webhook.secret.is_none() {
        warn!("WEBHOOK_SECRET not set; webhook notifications will be refused");
    }
    let webhooks = Arc::new(WebhookProcessor::new(
        payments.clone(),
        config.webhook.secret.clone(),
    ));

    let state = AppState {
        payments,
        scheduler: scheduler.clone(),
        webhooks,
        redirect: config.redirect.clone(),
        health: HealthChecker::new(store, Some(scheduler)),
    };

    let app = api::router(state).layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
            .layer(TraceLayer::new_for_http())
            .layer(axum::middleware::from_fn(request_logging_middleware))
            .layer(PropagateRequestIdLayer::x_request_id()),
    );

    let addr: SocketAddr = config.server.bind_address().parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to address {}: {}", addr, e);
        e
    })?;

    info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(shutdown_tx.clone()))
        .await?;

    let _ = shutdown_tx.send(true);
    if tokio::time::timeout(Duration::from_secs(30), scheduler_handle)
        .await
        .is_err()
    {
        error!("Timed out waiting for reconciliation scheduler shutdown");
    }

    info!("Server shutdown complete");

    Ok(())
}
