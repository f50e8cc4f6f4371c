//! Prometheus scrape endpoint.

use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;

const TEXT_FORMAT: &str = "text/plain; version=0.0.4; charset=utf-8";

/// GET /metrics: saga, breaker and verifier counters in text format.
pub async fn render(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    ([(CONTENT_TYPE, TEXT_FORMAT)], handle.render())
}
