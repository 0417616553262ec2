//! Uploader contract and HTTP gateway client.
//!
//! The uploader owns its own rate limiting: a minimum gap between uploads on
//! the same account (waited out internally) and a conservative daily cap
//! (surfaced as a rate-limit error with a retry hint). Session persistence is
//! internal to the client; the orchestrator only sees
//! authenticate/upload/logout.

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::UploaderConfig;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("rate limited{}", retry_after_suffix(.retry_after))]
    RateLimited { retry_after: Option<Duration> },

    #[error("content rejected by platform: {0}")]
    ContentRejected(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("upload failed: {0}")]
    Transient(String),
}

fn retry_after_suffix(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(duration) => format!(" (retry after {}s)", duration.as_secs()),
        None => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, UploadError>;

/// Successful upload outcome.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadReceipt {
    pub media_id: String,
}

/// Publishes content on the remote platform for one account.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn authenticate(&mut self) -> Result<bool>;
    async fn upload_photo(&mut self, path: &Path, caption: &str) -> Result<UploadReceipt>;
    async fn upload_video(&mut self, path: &Path, caption: &str) -> Result<UploadReceipt>;
    async fn logout(&mut self);
}

/// Creates uploaders on demand, one per managed user.
pub trait UploaderFactory: Send + Sync {
    fn create(&self, username: &str) -> Result<Box<dyn Uploader>>;
}

#[derive(Serialize)]
struct SessionRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct SessionResponse {
    token: String,
}

#[derive(Serialize)]
struct UploadRequest<'a> {
    path: &'a str,
    caption: &'a str,
}

/// Client for the upload gateway service.
pub struct HttpUploader {
    client: reqwest::Client,
    endpoint: String,
    username: String,
    password: String,
    token: Option<String>,
    upload_gap: Duration,
    max_daily_uploads: u32,
    last_upload: Option<Instant>,
    uploads_today: u32,
    today: NaiveDate,
}

impl HttpUploader {
    pub fn new(config: &UploaderConfig, username: &str, password: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(concat!("autopost/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| UploadError::Transient(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: password.to_string(),
            token: None,
            upload_gap: config.upload_gap(),
            max_daily_uploads: config.max_daily_uploads,
            last_upload: None,
            uploads_today: 0,
            today: Utc::now().date_naive(),
        })
    }

    /// Enforce the per-account limits before touching the gateway.
    /// The minimum gap is waited out here; the daily cap is an error with a
    /// retry hint because waiting for midnight inline would stall the queue.
    async fn throttle(&mut self) -> Result<()> {
        let today = Utc::now().date_naive();
        if today != self.today {
            self.today = today;
            self.uploads_today = 0;
        }

        if self.uploads_today >= self.max_daily_uploads {
            let midnight = self
                .today
                .succ_opt()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|next| (next.and_utc() - Utc::now()).num_seconds().max(0) as u64);
            warn!(
                user = %self.username,
                uploads_today = self.uploads_today,
                "Daily upload cap reached"
            );
            return Err(UploadError::RateLimited {
                retry_after: midnight.map(Duration::from_secs),
            });
        }

        if let Some(last) = self.last_upload {
            let since = last.elapsed();
            if since < self.upload_gap {
                let wait = self.upload_gap - since;
                info!(
                    user = %self.username,
                    wait_secs = wait.as_secs(),
                    "Waiting out upload gap"
                );
                tokio::time::sleep(wait).await;
            }
        }

        Ok(())
    }

    async fn upload(&mut self, route: &str, path: &Path, caption: &str) -> Result<UploadReceipt> {
        let token = self
            .token
            .clone()
            .ok_or_else(|| UploadError::Auth("not authenticated".to_string()))?;

        self.throttle().await?;

        let request = UploadRequest {
            path: path.to_str().ok_or_else(|| {
                UploadError::ContentRejected(format!("non-UTF-8 path: {}", path.display()))
            })?,
            caption,
        };

        debug!(user = %self.username, path = %path.display(), route, "Uploading");

        let response = self
            .client
            .post(format!("{}/media/{}", self.endpoint, route))
            .bearer_auth(&token)
            .json(&request)
            .send()
            .await
            .map_err(|e| UploadError::Transient(e.to_string()))?;

        let status = response.status();
        match status.as_u16() {
            200 | 201 => {
                let receipt: UploadReceipt = response
                    .json()
                    .await
                    .map_err(|e| UploadError::Transient(format!("bad response body: {}", e)))?;
                self.last_upload = Some(Instant::now());
                self.uploads_today += 1;
                info!(user = %self.username, media_id = %receipt.media_id, "Upload succeeded");
                Ok(receipt)
            }
            401 | 403 => {
                self.token = None;
                Err(UploadError::Auth(format!("HTTP {}", status)))
            }
            422 => {
                let body = response.text().await.unwrap_or_default();
                Err(UploadError::ContentRejected(body))
            }
            429 => {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(Duration::from_secs);
                Err(UploadError::RateLimited { retry_after })
            }
            _ => {
                let body = response.text().await.unwrap_or_default();
                Err(UploadError::Transient(format!("HTTP {}: {}", status, body)))
            }
        }
    }
}

#[async_trait]
impl Uploader for HttpUploader {
    async fn authenticate(&mut self) -> Result<bool> {
        if self.token.is_some() {
            return Ok(true);
        }

        info!(user = %self.username, "Authenticating with upload gateway");

        let request = SessionRequest {
            username: &self.username,
            password: &self.password,
        };

        let response = self
            .client
            .post(format!("{}/sessions", self.endpoint))
            .json(&request)
            .send()
            .await
            .map_err(|e| UploadError::Transient(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(UploadError::Auth("bad credentials".to_string()));
        }
        if !status.is_success() {
            return Err(UploadError::Transient(format!("HTTP {}", status)));
        }

        let session: SessionResponse = response
            .json()
            .await
            .map_err(|e| UploadError::Transient(format!("bad session body: {}", e)))?;
        self.token = Some(session.token);
        Ok(true)
    }

    async fn upload_photo(&mut self, path: &Path, caption: &str) -> Result<UploadReceipt> {
        self.upload("photo", path, caption).await
    }

    async fn upload_video(&mut self, path: &Path, caption: &str) -> Result<UploadReceipt> {
        self.upload("video", path, caption).await
    }

    async fn logout(&mut self) {
        if self.token.take().is_some() {
            let result = self
                .client
                .delete(format!("{}/sessions", self.endpoint))
                .send()
                .await;
            if let Err(err) = result {
                warn!(user = %self.username, error = %err, "Logout request failed");
            } else {
                info!(user = %self.username, "Logged out");
            }
        }
    }
}

/// Factory producing gateway clients from configured credentials.
pub struct HttpUploaderFactory {
    config: UploaderConfig,
}

impl HttpUploaderFactory {
    pub fn new(config: UploaderConfig) -> Self {
        Self { config }
    }
}

impl UploaderFactory for HttpUploaderFactory {
    fn create(&self, username: &str) -> Result<Box<dyn Uploader>> {
        let account = self
            .config
            .username
            .as_deref()
            .ok_or_else(|| UploadError::Auth("UPLOAD_USERNAME not set".to_string()))?;
        let password = self
            .config
            .password
            .as_deref()
            .ok_or_else(|| UploadError::Auth("UPLOAD_PASSWORD not set".to_string()))?;

        debug!(user = username, account, "Creating uploader");
        let uploader = HttpUploader::new(&self.config, account, password)?;
        Ok(Box::new(uploader))
    }
}
