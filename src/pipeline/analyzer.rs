//! Content analyzer contract and HTTP client.
//!
//! Analysis is idempotent and side-effect-free: the service reads the file,
//! classifies it, and proposes a caption seed. Failures come back as
//! structured errors, never unhandled faults.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::AnalyzerConfig;
use crate::media::MediaKind;

#[derive(Debug, Error)]
pub enum AnalyzeError {
    #[error("analysis request failed: {0}")]
    RequestFailed(String),

    #[error("analysis service rejected file: {0}")]
    Rejected(String),

    #[error("analysis timed out")]
    Timeout,
}

pub type Result<T> = std::result::Result<T, AnalyzeError>;

/// Structured description of a media file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    pub category: String,
    pub caption_seed: String,
    pub confidence: f32,
    #[serde(default)]
    pub visual_features: Vec<String>,
}

/// Turns a media file into a structured description. May be slow, may fail.
#[async_trait]
pub trait ContentAnalyzer: Send + Sync {
    async fn analyze(&self, path: &Path, kind: MediaKind) -> Result<Analysis>;
}

#[derive(Serialize)]
struct AnalyzeRequest<'a> {
    path: &'a str,
    kind: MediaKind,
}

/// Client for the co-located analysis sidecar service.
pub struct HttpAnalyzer {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpAnalyzer {
    pub fn new(config: &AnalyzerConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(concat!("autopost/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AnalyzeError::RequestFailed(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ContentAnalyzer for HttpAnalyzer {
    async fn analyze(&self, path: &Path, kind: MediaKind) -> Result<Analysis> {
        debug!(path = %path.display(), %kind, "Requesting analysis");

        let request = AnalyzeRequest {
            path: path.to_str().ok_or_else(|| {
                AnalyzeError::Rejected(format!("non-UTF-8 path: {}", path.display()))
            })?,
            kind,
        };

        let response = self
            .client
            .post(format!("{}/analyze", self.endpoint))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AnalyzeError::Timeout
                } else {
                    AnalyzeError::RequestFailed(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalyzeError::Rejected(format!("HTTP {}: {}", status, body)));
        }
        if !status.is_success() {
            return Err(AnalyzeError::RequestFailed(format!("HTTP {}", status)));
        }

        let analysis: Analysis = response
            .json()
            .await
            .map_err(|e| AnalyzeError::RequestFailed(format!("bad response body: {}", e)))?;

        debug!(
            path = %path.display(),
            category = %analysis.category,
            confidence = analysis.confidence,
            "Analysis complete"
        );
        Ok(analysis)
    }
}
