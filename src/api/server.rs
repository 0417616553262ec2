use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::models::{HealthResponse, MetricsResponse, StatusResponse};
use super::state::AppState;
use crate::monitor::HealthStatus;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Serve the health/status endpoints until the token is cancelled.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    cancel: CancellationToken,
) -> Result<(), AnyError> {
    let address = listener.local_addr()?;

    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/status", get(status))
        .with_state(state);

    info!(%address, "Health endpoint listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    info!("Health endpoint stopped");
    Ok(())
}

fn health_response(state: &AppState) -> HealthResponse {
    let report = state.monitor.health();
    HealthResponse {
        status: report.status,
        uptime_seconds: report.uptime_secs,
        issues: report.issues,
        version: env!("CARGO_PKG_VERSION").to_string(),
    }
}

/// GET /health — 503 when unhealthy so probes can act on the status code
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let response = health_response(&state);
    let code = if response.status == HealthStatus::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (code, Json(response))
}

/// GET /metrics — pipeline counters plus system gauges
async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let response = MetricsResponse {
        processing: state.monitor.snapshot(),
        system: state.monitor.gauges(),
    };
    (StatusCode::OK, Json(response))
}

/// GET /status — full operator view including the queue snapshot
async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let queue = state.store.snapshot().unwrap_or_default();
    let last_purge = state.store.last_purge().unwrap_or(None);

    let response = StatusResponse {
        health: health_response(&state),
        metrics: MetricsResponse {
            processing: state.monitor.snapshot(),
            system: state.monitor.gauges(),
        },
        queue,
        last_purge,
    };
    (StatusCode::OK, Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LifecycleStore;
    use crate::monitor::Monitor;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn spawn_server() -> (String, CancellationToken, TempDir) {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(LifecycleStore::open(temp.path().join("ledger")).unwrap());
        let monitor = Arc::new(Monitor::new());
        monitor.record_success();
        let state = AppState::new(monitor, store);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();

        let server_cancel = cancel.clone();
        tokio::spawn(async move {
            serve(listener, state, server_cancel).await.unwrap();
        });

        (format!("http://{}", address), cancel, temp)
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (base, cancel, _temp) = spawn_server().await;

        let response = reqwest::get(format!("{}/health", base)).await.unwrap();
        assert!(response.status().is_success());

        let body: serde_json::Value = response.json().await.unwrap();
        assert!(body["status"].is_string());
        assert!(body["version"].is_string());

        cancel.cancel();
    }

    #[tokio::test]
    async fn test_metrics_endpoint_reports_counters() {
        let (base, cancel, _temp) = spawn_server().await;

        let response = reqwest::get(format!("{}/metrics", base)).await.unwrap();
        let body: serde_json::Value = response.json().await.unwrap();

        assert_eq!(body["processing"]["successful_uploads"], 1);
        assert!(body["system"]["memory_usage_percent"].is_number());

        cancel.cancel();
    }

    #[tokio::test]
    async fn test_status_endpoint_includes_queue() {
        let (base, cancel, _temp) = spawn_server().await;

        let response = reqwest::get(format!("{}/status", base)).await.unwrap();
        let body: serde_json::Value = response.json().await.unwrap();

        assert_eq!(body["queue"]["discovered"], 0);
        assert!(body["health"]["uptime_seconds"].is_number());

        cancel.cancel();
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let (base, cancel, _temp) = spawn_server().await;

        let response = reqwest::get(format!("{}/nope", base)).await.unwrap();
        assert_eq!(response.status(), 404);

        cancel.cancel();
    }
}
