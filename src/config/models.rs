use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
    #[serde(default)]
    pub caption: CaptionConfig,
    #[serde(default)]
    pub uploader: UploaderConfig,
}

/// Filesystem roots
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PathsConfig {
    /// Root holding one drop-folder tree per managed user
    #[serde(default = "default_input_root")]
    pub input_root: PathBuf,
    /// Root receiving processed/failed relocations, one tree per user
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            input_root: default_input_root(),
            output_root: default_output_root(),
            ledger_path: default_ledger_path(),
        }
    }
}

fn default_input_root() -> PathBuf {
    PathBuf::from("/shared")
}

fn default_output_root() -> PathBuf {
    PathBuf::from("/processed")
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("data/ledger")
}

/// Trigger cadence and loop timing
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_scan_interval_minutes")]
    pub scan_interval_minutes: u64,
    /// Sleep between empty dequeue attempts; also bounds how fast the
    /// processing loop observes a stop request
    #[serde(default = "default_idle_poll_secs")]
    pub idle_poll_secs: u64,
    /// How long stop() waits for an in-flight item before giving up the join
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            scan_interval_minutes: default_scan_interval_minutes(),
            idle_poll_secs: default_idle_poll_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl ScheduleConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_minutes * 60)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_secs(self.idle_poll_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

fn default_scan_interval_minutes() -> u64 {
    30
}

fn default_idle_poll_secs() -> u64 {
    10
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

/// Retry policy for pipeline failures
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Whether a rate-limited upload consumes an attempt. When false the
    /// item is released back to the queue with its counter untouched.
    #[serde(default)]
    pub rate_limit_counts_attempt: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            rate_limit_counts_attempt: false,
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

/// Retention for terminal ledger entries
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetentionConfig {
    #[serde(default = "default_terminal_ttl_days")]
    pub terminal_ttl_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            terminal_ttl_days: default_terminal_ttl_days(),
        }
    }
}

fn default_terminal_ttl_days() -> u32 {
    30
}

/// Health/status HTTP endpoint
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthConfig {
    #[serde(default = "default_health_enabled")]
    pub enabled: bool,
    #[serde(default = "default_health_bind_addr")]
    pub bind_addr: SocketAddr,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: default_health_enabled(),
            bind_addr: default_health_bind_addr(),
        }
    }
}

fn default_health_enabled() -> bool {
    true
}

fn default_health_bind_addr() -> SocketAddr {
    "0.0.0.0:8080".parse().unwrap()
}

/// Content analysis service client
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnalyzerConfig {
    #[serde(default = "default_analyzer_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Analysis of large videos can be slow; this bounds a single call
    #[serde(default = "default_analyzer_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            endpoint: default_analyzer_endpoint(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_analyzer_timeout_secs(),
        }
    }
}

fn default_analyzer_endpoint() -> String {
    "http://127.0.0.1:8765".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_analyzer_timeout_secs() -> u64 {
    300
}

/// Caption generation
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CaptionConfig {
    /// Optional remote refinement endpoint; the template fallback is used
    /// whenever it is unset or errors
    pub refine_endpoint: Option<String>,
    /// Refinement API key (loaded from environment, not from config file)
    #[serde(skip)]
    pub api_key: Option<String>,
    #[serde(default = "default_caption_style")]
    pub style: String,
    #[serde(default = "default_max_caption_length")]
    pub max_caption_length: usize,
    #[serde(default = "default_use_hashtags")]
    pub use_hashtags: bool,
    #[serde(default = "default_max_hashtags")]
    pub max_hashtags: usize,
    #[serde(default = "default_caption_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for CaptionConfig {
    fn default() -> Self {
        Self {
            refine_endpoint: None,
            api_key: None,
            style: default_caption_style(),
            max_caption_length: default_max_caption_length(),
            use_hashtags: default_use_hashtags(),
            max_hashtags: default_max_hashtags(),
            request_timeout_secs: default_caption_timeout_secs(),
        }
    }
}

fn default_caption_style() -> String {
    "engaging".to_string()
}

fn default_max_caption_length() -> usize {
    2200
}

fn default_use_hashtags() -> bool {
    true
}

fn default_max_hashtags() -> usize {
    30
}

fn default_caption_timeout_secs() -> u64 {
    60
}

/// Upload gateway client
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UploaderConfig {
    #[serde(default = "default_uploader_endpoint")]
    pub endpoint: String,
    /// Account credentials (loaded from environment, not from config file)
    #[serde(skip)]
    pub username: Option<String>,
    #[serde(skip)]
    pub password: Option<String>,
    /// Minimum gap between two uploads on the same account
    #[serde(default = "default_upload_gap_minutes")]
    pub upload_gap_minutes: u64,
    #[serde(default = "default_max_daily_uploads")]
    pub max_daily_uploads: u32,
    #[serde(default = "default_upload_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            endpoint: default_uploader_endpoint(),
            username: None,
            password: None,
            upload_gap_minutes: default_upload_gap_minutes(),
            max_daily_uploads: default_max_daily_uploads(),
            request_timeout_secs: default_upload_timeout_secs(),
        }
    }
}

impl UploaderConfig {
    pub fn upload_gap(&self) -> Duration {
        Duration::from_secs(self.upload_gap_minutes * 60)
    }
}

fn default_uploader_endpoint() -> String {
    "http://127.0.0.1:8799".to_string()
}

fn default_upload_gap_minutes() -> u64 {
    60
}

fn default_max_daily_uploads() -> u32 {
    50
}

fn default_upload_timeout_secs() -> u64 {
    600
}
