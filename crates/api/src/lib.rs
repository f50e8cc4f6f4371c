//! HTTP API and verify consumer for the entity services.
//!
//! Every mutating endpoint runs one saga on the coordinator of its entity;
//! verify requests and rejected-upload reports from other services arrive
//! through [`consumer`].

pub mod config;
pub mod consumer;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use domain::{Blob, Category, StorageLocation};
use event_bus::{Broker, BrokerEventPublisher, CircuitBreakerRegistry};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{SagaCoordinator, SagaVerifier};
use store::{InMemoryObjectStore, InMemoryRepository, ObjectStore, Repository};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub service_name: String,
    pub categories: SagaCoordinator<Category>,
    pub blobs: SagaCoordinator<Blob>,
    pub location: StorageLocation,
    /// Parent of every request's cancellation token.
    pub shutdown: CancellationToken,
}

/// Storage adapters the coordinators write through.
#[derive(Clone)]
pub struct Stores {
    pub categories: Arc<dyn Repository<Category>>,
    pub blobs: Arc<dyn Repository<Blob>>,
    pub objects: Arc<dyn ObjectStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            categories: Arc::new(InMemoryRepository::<Category>::new()),
            blobs: Arc::new(InMemoryRepository::<Blob>::new()),
            objects: Arc::new(InMemoryObjectStore::new()),
        }
    }
}

/// Builds the application state: one coordinator per entity, all publishing
/// through `broker` behind the breakers of `breakers`.
pub fn create_state(
    config: &Config,
    stores: &Stores,
    broker: Arc<dyn Broker>,
    breakers: Arc<CircuitBreakerRegistry>,
    shutdown: CancellationToken,
) -> Arc<AppState> {
    let category_events = BrokerEventPublisher::<Category>::new(
        broker.clone(),
        breakers.clone(),
        config.service_name.clone(),
    );
    let blob_events =
        BrokerEventPublisher::<Blob>::new(broker, breakers, config.service_name.clone());

    let categories = SagaCoordinator::new(stores.categories.clone(), Arc::new(category_events))
        .with_config(config.saga_config());
    let blobs = SagaCoordinator::new(stores.blobs.clone(), Arc::new(blob_events))
        .with_object_store(stores.objects.clone())
        .with_config(config.saga_config());

    Arc::new(AppState {
        service_name: config.service_name.clone(),
        categories,
        blobs,
        location: config.storage_location(),
        shutdown,
    })
}

/// Builds the verifier answering `CATEGORY_VERIFY` requests.
pub fn create_verifier(
    config: &Config,
    stores: &Stores,
    broker: Arc<dyn Broker>,
    breakers: Arc<CircuitBreakerRegistry>,
) -> Arc<SagaVerifier<Category>> {
    Arc::new(SagaVerifier::new(
        stores.categories.clone(),
        broker,
        breakers,
        config.service_name.clone(),
    ))
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::render))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/categories", post(routes::categories::create))
        .route(
            "/categories/{id}",
            get(routes::categories::get)
                .patch(routes::categories::update)
                .delete(routes::categories::delete),
        )
        .route("/categories/{id}/restore", post(routes::categories::restore))
        .route(
            "/categories/{id}/permanent",
            axum::routing::delete(routes::categories::hard_delete),
        )
        .route(
            "/blobs/{service}/{id}",
            post(routes::blobs::upload)
                .get(routes::blobs::get)
                .delete(routes::blobs::erase),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
