//! HTTP surface for health reporting: the coordinator pushes counters into
//! the monitor, this module exposes them as JSON over `/health`, `/metrics`
//! and `/status`.

pub mod models;
mod server;
mod state;

pub use models::{HealthResponse, MetricsResponse, StatusResponse, StatusView};
pub use server::serve;
pub use state::AppState;
