use super::models::Config;
use config::{ConfigError, Environment, File};
use std::env;
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "AUTOPOST_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/autopost.toml";
const ENV_PREFIX: &str = "AUTOPOST";
const ENV_SEPARATOR: &str = "__";

/// Load configuration from multiple sources with priority:
/// 1. Defaults (embedded in structs)
/// 2. TOML file (if exists)
/// 3. Environment variables from .env file (via dotenvy)
/// 4. System environment variables (highest priority)
pub fn load() -> Result<Config, ConfigError> {
    // Load .env file if it exists (ignore errors if file doesn't exist)
    let _ = dotenvy::dotenv();

    let config_path = env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

    let mut config = load_from_sources(config_path)?;

    // Load secrets from environment variables
    load_secrets(&mut config);

    Ok(config)
}

/// Load secrets from environment variables into config.
/// Secrets are never stored in TOML files, only in environment.
fn load_secrets(config: &mut Config) {
    if let Ok(username) = env::var("UPLOAD_USERNAME") {
        config.uploader.username = Some(username);
    }
    if let Ok(password) = env::var("UPLOAD_PASSWORD") {
        config.uploader.password = Some(password);
    }
    if let Ok(api_key) = env::var("CAPTION_API_KEY") {
        config.caption.api_key = Some(api_key);
    }
}

/// Load configuration from a specific path and environment.
/// Useful for testing with custom config files.
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    // Start with defaults (handled by struct Default implementations)
    // Add TOML file if it exists (optional)
    if config_path.exists() {
        tracing::info!("Loading configuration from: {}", config_path.display());
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::warn!(
            "Configuration file not found at {}, using defaults and environment overrides",
            config_path.display()
        );
    }

    // Add environment variable overrides
    // AUTOPOST__SCHEDULE__SCAN_INTERVAL_MINUTES -> schedule.scan_interval_minutes
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    let config = builder.build()?;
    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_defaults_only() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nonexistent.toml");

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.health.bind_addr.to_string(), "0.0.0.0:8080");
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[paths]
input_root = "/data/drop"
output_root = "/data/done"

[schedule]
scan_interval_minutes = 5
idle_poll_secs = 2

[retry]
max_attempts = 5
rate_limit_counts_attempt = true
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.paths.input_root.to_str().unwrap(), "/data/drop");
        assert_eq!(config.schedule.scan_interval_minutes, 5);
        assert_eq!(config.retry.max_attempts, 5);
        assert!(config.retry.rate_limit_counts_attempt);
    }

    #[test]
    fn test_complex_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[paths]
input_root = "/shared"
output_root = "/processed"
ledger_path = "/var/lib/autopost/ledger"

[schedule]
scan_interval_minutes = 30
idle_poll_secs = 10
shutdown_grace_secs = 30

[retention]
terminal_ttl_days = 14

[health]
enabled = true
bind_addr = "127.0.0.1:9000"

[analyzer]
endpoint = "http://analysis:8765"
request_timeout_secs = 120

[caption]
refine_endpoint = "http://captions:9100/refine"
style = "casual"
max_hashtags = 10

[uploader]
endpoint = "http://gateway:8799"
upload_gap_minutes = 45
max_daily_uploads = 20
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = load_from_sources(config_path).unwrap();

        assert_eq!(
            config.paths.ledger_path.to_str().unwrap(),
            "/var/lib/autopost/ledger"
        );
        assert_eq!(config.retention.terminal_ttl_days, 14);
        assert_eq!(config.health.bind_addr.to_string(), "127.0.0.1:9000");
        assert_eq!(config.analyzer.endpoint, "http://analysis:8765");
        assert_eq!(
            config.caption.refine_endpoint.as_deref(),
            Some("http://captions:9100/refine")
        );
        assert_eq!(config.caption.style, "casual");
        assert_eq!(config.uploader.upload_gap_minutes, 45);
        assert_eq!(config.uploader.max_daily_uploads, 20);
    }

    #[test]
    fn test_secrets_never_deserialized_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        // serde(skip) fields stay None even when someone puts them in TOML
        let toml_content = r#"
[uploader]
endpoint = "http://gateway:8799"
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = load_from_sources(config_path).unwrap();
        assert!(config.uploader.username.is_none());
        assert!(config.uploader.password.is_none());
        assert!(config.caption.api_key.is_none());
    }
}
