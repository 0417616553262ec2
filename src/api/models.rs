//! Response models for the health/status endpoints.
//!
//! Three JSON surfaces:
//! - `GET /health` — liveness verdict, 503 when unhealthy
//! - `GET /metrics` — pipeline counters plus system gauges
//! - `GET /status` — everything at once, for operators and the status CLI

use serde::{Deserialize, Serialize};

use crate::ledger::QueueSnapshot;
use crate::monitor::{HealthStatus, MetricsSnapshot, SystemGauges};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub uptime_seconds: u64,
    pub issues: Vec<String>,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub processing: MetricsSnapshot,
    pub system: SystemGauges,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub health: HealthResponse,
    pub metrics: MetricsResponse,
    pub queue: QueueSnapshot,
    pub last_purge: Option<String>,
}

/// Client-side mirror of [`StatusResponse`] with only the fields the status
/// CLI prints; keeps the CLI tolerant of additions to the server payload.
#[derive(Debug, Deserialize)]
pub struct StatusView {
    pub health: HealthView,
    pub metrics: MetricsView,
    pub queue: QueueSnapshot,
}

#[derive(Debug, Deserialize)]
pub struct HealthView {
    pub status: String,
    pub uptime_seconds: u64,
    #[serde(default)]
    pub issues: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct MetricsView {
    pub processing: ProcessingView,
    pub system: SystemView,
}

#[derive(Debug, Deserialize)]
pub struct ProcessingView {
    pub processed_files: u64,
    pub successful_uploads: u64,
    pub failed_uploads: u64,
    pub success_rate: f64,
    pub queue_depth: u64,
}

#[derive(Debug, Deserialize)]
pub struct SystemView {
    pub cpu_usage_percent: f32,
    pub memory_usage_percent: f32,
    pub disk_usage_percent: f32,
}
