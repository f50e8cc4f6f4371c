//! API server entry point.

use std::sync::Arc;

use api::Stores;
use api::config::Config;
use api::consumer::{RollbackConsumer, VerifyConsumer};
use domain::{Blob, Category};
use event_bus::{Broker, CircuitBreakerRegistry, InMemoryBroker};
use sqlx::postgres::PgPoolOptions;
use store::{InMemoryObjectStore, LocalObjectStore, ObjectStore, PostgresRepository};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

async fn open_stores(config: &Config) -> Stores {
    let mut stores = Stores::in_memory();

    if let Some(url) = &config.database_url {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .expect("failed to connect to PostgreSQL");
        let categories = PostgresRepository::<Category>::new(pool.clone());
        categories
            .run_migrations()
            .await
            .expect("failed to run migrations");
        stores.categories = Arc::new(categories);
        stores.blobs = Arc::new(PostgresRepository::<Blob>::new(pool));
        tracing::info!("using PostgreSQL repositories");
    }

    stores.objects = match &config.blob_root {
        Some(root) => {
            let local = LocalObjectStore::new(root)
                .await
                .expect("failed to open blob root");
            tracing::info!(root = %root.display(), "using local object store");
            Arc::new(local) as Arc<dyn ObjectStore>
        }
        None => Arc::new(InMemoryObjectStore::new()),
    };

    stores
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Stores, broker and breakers
    let stores = open_stores(&config).await;
    let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new());
    let breakers = Arc::new(CircuitBreakerRegistry::new(config.breaker_config()));
    let shutdown = CancellationToken::new();

    // 4. Build the application state
    let state = api::create_state(
        &config,
        &stores,
        broker.clone(),
        breakers.clone(),
        shutdown.clone(),
    );

    // 5. Verify and rollback consumers
    let verifier = api::create_verifier(&config, &stores, broker.clone(), breakers);
    let verify = VerifyConsumer::new(verifier, broker.clone());
    let rollback = RollbackConsumer::new(state.blobs.clone(), broker);
    let consumers = [
        ("verify", tokio::spawn(verify.run(shutdown.clone()))),
        ("rollback", tokio::spawn(rollback.run(shutdown.clone()))),
    ];

    let app = api::create_app(state, metrics_handle);

    // 6. Start server
    let addr = config.addr();
    tracing::info!(%addr, service = %config.service_name, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    let signal_token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            signal_token.cancel();
        })
        .await
        .expect("server error");

    shutdown.cancel();
    for (name, consumer) in consumers {
        match consumer.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(consumer = name, error = %e, "consumer failed"),
            Err(e) => tracing::error!(consumer = name, error = %e, "consumer panicked"),
        }
    }

    tracing::info!("server shut down gracefully");
}
