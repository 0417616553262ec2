//! Command implementations behind the CLI surface.

use std::sync::Arc;

use tracing::{error, info};

use autopost::config::Config;
use autopost::discovery::DiscoveryEngine;
use autopost::ledger::LifecycleStore;
use autopost::monitor::Monitor;
use autopost::pipeline::{
    ContentProcessor, HttpAnalyzer, HttpUploaderFactory, PipelinePolicy, TemplateCaptioner,
};
use autopost::scheduler::Scheduler;

/// Check credentials and required directories before doing any work.
fn validate_environment(config: &Config) -> bool {
    if config.uploader.username.is_none() || config.uploader.password.is_none() {
        error!("Upload credentials not provided. Please set UPLOAD_USERNAME and UPLOAD_PASSWORD");
        return false;
    }

    for directory in [&config.paths.input_root, &config.paths.output_root] {
        if !directory.exists() {
            if let Err(err) = std::fs::create_dir_all(directory) {
                error!(
                    path = %directory.display(),
                    error = %err,
                    "Cannot create required directory"
                );
                return false;
            }
            info!(path = %directory.display(), "Created directory");
        }
    }

    true
}

/// Wire the whole system together: ledger, discovery, collaborator clients,
/// processor, monitor, scheduler.
fn build_scheduler(config: Config) -> Result<Scheduler, String> {
    let store = Arc::new(
        LifecycleStore::open(&config.paths.ledger_path)
            .map_err(|e| format!("Failed to open ledger: {}", e))?,
    );

    let discovery = Arc::new(DiscoveryEngine::new(
        store.clone(),
        config.paths.input_root.clone(),
        config.paths.output_root.clone(),
    ));

    let monitor = Arc::new(Monitor::new());

    let analyzer = HttpAnalyzer::new(&config.analyzer)
        .map_err(|e| format!("Failed to build analyzer client: {}", e))?;
    let captioner = TemplateCaptioner::new(config.caption.clone());
    let uploader_factory = HttpUploaderFactory::new(config.uploader.clone());

    let processor = ContentProcessor::new(
        store.clone(),
        Arc::new(analyzer),
        Arc::new(captioner),
        Arc::new(uploader_factory),
        monitor.clone(),
        PipelinePolicy {
            max_attempts: config.retry.max_attempts,
            rate_limit_counts_attempt: config.retry.rate_limit_counts_attempt,
        },
        config.caption.style.clone(),
    );

    Ok(Scheduler::new(config, store, discovery, processor, monitor))
}

/// Register users; at least one must succeed for the command to proceed.
fn setup_users(scheduler: &mut Scheduler, usernames: &[String]) -> bool {
    let mut registered = 0usize;
    for username in usernames {
        if scheduler.add_user(username) {
            registered += 1;
        } else {
            error!(user = %username, "Failed to add user");
        }
    }

    if registered < usernames.len() {
        error!(
            registered,
            requested = usernames.len(),
            "Some users failed to register"
        );
    }
    registered > 0
}

/// `run` command: continuous monitoring and posting until a shutdown signal.
pub async fn run(usernames: &[String]) -> i32 {
    let config = match Config::load() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "Failed to load configuration");
            return 1;
        }
    };

    if !validate_environment(&config) {
        return 1;
    }

    let mut scheduler = match build_scheduler(config) {
        Ok(scheduler) => scheduler,
        Err(err) => {
            error!(error = %err, "Setup failed");
            return 1;
        }
    };

    if !setup_users(&mut scheduler, usernames) {
        return 1;
    }

    // Process-termination signals funnel into the same stop sequence
    let token = scheduler.shutdown_token();
    tokio::spawn(async move {
        shutdown_signal().await;
        token.cancel();
    });

    info!("Starting automation scheduler");
    match scheduler.start().await {
        Ok(()) => 0,
        Err(err) => {
            error!(error = %err, "Scheduler failed");
            1
        }
    }
}

/// `scan` command: one pass over each user's folders, drain the queue, exit.
pub async fn scan(usernames: &[String]) -> i32 {
    let config = match Config::load() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "Failed to load configuration");
            return 1;
        }
    };

    if !validate_environment(&config) {
        return 1;
    }

    let mut scheduler = match build_scheduler(config) {
        Ok(scheduler) => scheduler,
        Err(err) => {
            error!(error = %err, "Setup failed");
            return 1;
        }
    };

    if !setup_users(&mut scheduler, usernames) {
        return 1;
    }

    match scheduler.run_once().await {
        Ok(()) => 0,
        Err(err) => {
            error!(error = %err, "Single scan failed");
            1
        }
    }
}

/// `status` command: query a running instance's health endpoint and print a
/// human-readable summary.
pub async fn status(endpoint: &str) -> i32 {
    use autopost::api::StatusView;

    let url = format!("{}/status", endpoint.trim_end_matches('/'));
    let client = match reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(5))
        .build()
    {
        Ok(client) => client,
        Err(err) => {
            error!(error = %err, "Failed to build HTTP client");
            return 1;
        }
    };

    let response = match client.get(&url).send().await {
        Ok(response) => response,
        Err(_) => {
            println!("No running instance found (health check unavailable)");
            return 1;
        }
    };

    if !response.status().is_success() {
        println!("Health check returned status {}", response.status());
        return 1;
    }

    let status: StatusView = match response.json().await {
        Ok(status) => status,
        Err(err) => {
            error!(error = %err, "Malformed status payload");
            return 1;
        }
    };

    println!("=== autopost status ===");
    println!("Health: {}", status.health.status);
    println!("Uptime: {} seconds", status.health.uptime_seconds);
    if !status.health.issues.is_empty() {
        println!("Issues: {}", status.health.issues.join(", "));
    }

    println!("\nProcessing:");
    println!("  Processed Files: {}", status.metrics.processing.processed_files);
    println!(
        "  Successful Uploads: {}",
        status.metrics.processing.successful_uploads
    );
    println!("  Failed Uploads: {}", status.metrics.processing.failed_uploads);
    println!(
        "  Success Rate: {:.1}%",
        status.metrics.processing.success_rate
    );
    println!("  Queue Depth: {}", status.metrics.processing.queue_depth);

    println!("\nQueue:");
    println!("  Discovered: {}", status.queue.discovered);
    println!("  Processing: {}", status.queue.processing);
    println!("  Completed: {}", status.queue.completed);
    println!("  Failed: {}", status.queue.failed);

    println!("\nSystem:");
    println!(
        "  CPU Usage: {:.1}%",
        status.metrics.system.cpu_usage_percent
    );
    println!(
        "  Memory Usage: {:.1}%",
        status.metrics.system.memory_usage_percent
    );
    println!(
        "  Disk Usage: {:.1}%",
        status.metrics.system.disk_usage_percent
    );

    0
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
