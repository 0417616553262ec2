//! Scheduler / coordinator: owns the background processing loop, the
//! periodic triggers, and startup/shutdown across the whole system.
//!
//! System state machine: `Stopped -> Running -> Stopping -> Stopped`.
//!
//! Two long-lived tasks:
//! - the trigger loop (runs inside [`Scheduler::start`]), firing periodic
//!   scans, health snapshots, retention purges and stats reports;
//! - the processing loop, the sole consumer, which dequeues one entry at a
//!   time and runs the pipeline on it serially. Throughput is bounded by the
//!   external services' own rate limits, so a single worker is deliberate;
//!   it also means no two pipeline runs ever race each other.
//!
//! Shutdown is a cancellation token observed at iteration boundaries: an
//! in-flight `process()` call is never aborted, so no entry can be stranded
//! in PROCESSING by a clean stop.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::api;
use crate::config::Config;
use crate::discovery::{DiscoveryEngine, ManagedUser};
use crate::ledger::{LedgerError, LifecycleStore};
use crate::monitor::{HealthStatus, Monitor};
use crate::pipeline::ContentProcessor;

const HEALTH_CHECK_PERIOD: Duration = Duration::from_secs(5 * 60);
const STATS_PERIOD: Duration = Duration::from_secs(60 * 60);
const PURGE_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("setup failed: {0}")]
    Setup(String),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemState {
    Stopped,
    Running,
    Stopping,
}

/// Coordinates discovery, processing, and housekeeping. Constructed with
/// explicit references to its collaborators; no process-wide state.
pub struct Scheduler {
    config: Config,
    store: Arc<LifecycleStore>,
    discovery: Arc<DiscoveryEngine>,
    processor: Option<ContentProcessor>,
    monitor: Arc<Monitor>,
    users: Vec<ManagedUser>,
    cancel: CancellationToken,
    state: Mutex<SystemState>,
}

impl Scheduler {
    pub fn new(
        config: Config,
        store: Arc<LifecycleStore>,
        discovery: Arc<DiscoveryEngine>,
        processor: ContentProcessor,
        monitor: Arc<Monitor>,
    ) -> Self {
        Self {
            config,
            store,
            discovery,
            processor: Some(processor),
            monitor,
            users: Vec::new(),
            cancel: CancellationToken::new(),
            state: Mutex::new(SystemState::Stopped),
        }
    }

    pub fn state(&self) -> SystemState {
        *self.state.lock().unwrap()
    }

    /// Token that external shutdown sources (signal handlers, tests) can
    /// cancel; equivalent to calling [`Scheduler::stop`].
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Request shutdown. The blocked `start()` call performs the actual
    /// stop sequence and returns once the in-flight item (if any) has
    /// reached a terminal or requeued state.
    pub fn stop(&self) {
        info!("Stop requested");
        self.cancel.cancel();
    }

    /// Add a user to automation. Failure is recoverable: other users
    /// continue, and the caller decides whether zero users is fatal.
    pub fn add_user(&mut self, username: &str) -> bool {
        if self.users.iter().any(|user| user.name == username) {
            info!(user = username, "User already managed");
            return true;
        }

        let user = match self.discovery.register_user(username) {
            Ok(user) => user,
            Err(err) => {
                error!(user = username, error = %err, "Failed to register user");
                return false;
            }
        };

        // Initial scan so pre-existing files enter the queue immediately
        match self.discovery.scan(&user) {
            Ok(found) => {
                info!(
                    user = username,
                    existing_files = found.len(),
                    "Added user to automation"
                );
            }
            Err(err) => {
                warn!(user = username, error = %err, "Initial scan failed");
            }
        }

        if let Some(processor) = self.processor.as_mut() {
            processor.add_user(&user);
        }
        self.users.push(user);
        true
    }

    /// Run the system until stopped.
    ///
    /// Spawns the health server and the processing loop, then blocks in the
    /// trigger loop. Returns only on shutdown or fatal setup error; failure
    /// to bind the health endpoint is fatal.
    pub async fn start(&mut self) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            if *state != SystemState::Stopped {
                return Err(SchedulerError::Setup("scheduler already running".to_string()));
            }
            *state = SystemState::Running;
        }

        if self.users.is_empty() {
            *self.state.lock().unwrap() = SystemState::Stopped;
            return Err(SchedulerError::Setup("no users registered".to_string()));
        }

        info!(
            users = self.users.len(),
            scan_interval_minutes = self.config.schedule.scan_interval_minutes,
            "Starting scheduler"
        );

        // Health endpoint: a bind failure here aborts startup
        if self.config.health.enabled {
            let listener = tokio::net::TcpListener::bind(self.config.health.bind_addr)
                .await
                .map_err(|e| {
                    *self.state.lock().unwrap() = SystemState::Stopped;
                    SchedulerError::Setup(format!(
                        "cannot bind health endpoint {}: {}",
                        self.config.health.bind_addr, e
                    ))
                })?;
            let state = api::AppState::new(self.monitor.clone(), self.store.clone());
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                if let Err(err) = api::serve(listener, state, cancel).await {
                    error!(error = %err, "Health server exited with error");
                }
            });
        }

        let processing = self.spawn_processing_loop()?;

        self.trigger_loop().await;

        self.shutdown(processing).await;
        Ok(())
    }

    /// Single-pass mode: scan every user once, then drain the queue.
    pub async fn run_once(&mut self) -> Result<()> {
        let mut processor = self
            .processor
            .take()
            .ok_or_else(|| SchedulerError::Setup("scheduler already started".to_string()))?;

        for user in &self.users {
            if let Err(err) = self.discovery.scan(user) {
                warn!(user = %user.name, error = %err, "Scan failed");
            }
        }

        let mut processed = 0usize;
        let mut succeeded = 0usize;
        while let Some(entry) = self.store.next_discovered()? {
            processed += 1;
            if processor.process(&entry).await {
                succeeded += 1;
            }
        }

        processor.logout_all().await;
        self.processor = Some(processor);
        self.store.persist()?;
        info!(processed, succeeded, "Single scan complete");
        Ok(())
    }

    fn spawn_processing_loop(&mut self) -> Result<JoinHandle<()>> {
        let processor = self
            .processor
            .take()
            .ok_or_else(|| SchedulerError::Setup("processing loop already started".to_string()))?;
        let store = self.store.clone();
        let monitor = self.monitor.clone();
        let idle_poll = self.config.schedule.idle_poll();
        let cancel = self.cancel.clone();

        Ok(tokio::spawn(processing_loop(
            processor, store, monitor, idle_poll, cancel,
        )))
    }

    /// Fire periodic triggers until cancelled. Scans only ever *add*
    /// DISCOVERED entries, so racing the processing loop's acquisitions is
    /// safe by construction.
    async fn trigger_loop(&self) {
        let scan_period = self.config.schedule.scan_interval();
        let mut scan_tick = interval_at(Instant::now() + scan_period, scan_period);
        let mut health_tick =
            interval_at(Instant::now() + HEALTH_CHECK_PERIOD, HEALTH_CHECK_PERIOD);
        let mut stats_tick = interval_at(Instant::now() + STATS_PERIOD, STATS_PERIOD);
        let mut purge_tick = interval_at(Instant::now() + PURGE_PERIOD, PURGE_PERIOD);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = scan_tick.tick() => self.scheduled_scan(),
                _ = health_tick.tick() => self.health_check(),
                _ = stats_tick.tick() => self.report_stats(),
                _ = purge_tick.tick() => self.retention_purge(),
            }
        }
    }

    fn scheduled_scan(&self) {
        debug!("Running scheduled scan");
        let mut total = 0usize;
        for user in &self.users {
            match self.discovery.scan(user) {
                Ok(found) => total += found.len(),
                Err(err) => {
                    error!(user = %user.name, error = %err, "Scheduled scan failed");
                }
            }
        }
        if total > 0 {
            info!(new_files = total, "Scheduled scan found new files");
        }
        self.publish_queue_depth();
    }

    fn health_check(&self) {
        let report = self.monitor.health();
        if report.status != HealthStatus::Healthy {
            warn!(
                status = %report.status,
                issues = ?report.issues,
                "System health degraded"
            );
        }
        self.publish_queue_depth();
    }

    fn report_stats(&self) {
        let metrics = self.monitor.snapshot();
        let gauges = self.monitor.gauges();
        info!(
            processed = metrics.processed_files,
            succeeded = metrics.successful_uploads,
            failed = metrics.failed_uploads,
            queue_depth = metrics.queue_depth,
            cpu = format!("{:.1}%", gauges.cpu_usage_percent),
            memory = format!("{:.1}%", gauges.memory_usage_percent),
            "Hourly stats"
        );
    }

    fn retention_purge(&self) {
        let retention =
            Duration::from_secs(self.config.retention.terminal_ttl_days as u64 * 86400);
        match self.store.purge_terminal_older_than(retention) {
            Ok(purged) => debug!(purged, "Retention purge complete"),
            Err(err) => error!(error = %err, "Retention purge failed"),
        }
    }

    fn publish_queue_depth(&self) {
        if let Ok(snapshot) = self.store.snapshot() {
            self.monitor.set_queue_depth(snapshot.depth() as u64);
        }
    }

    /// Stop sequence: join the processing loop within the grace period,
    /// flush the ledger, report final stats.
    async fn shutdown(&mut self, processing: JoinHandle<()>) {
        *self.state.lock().unwrap() = SystemState::Stopping;
        info!("Stopping scheduler");

        let grace = self.config.schedule.shutdown_grace();
        match tokio::time::timeout(grace, processing).await {
            Ok(Ok(())) => debug!("Processing loop joined"),
            Ok(Err(err)) => error!(error = %err, "Processing loop panicked"),
            Err(_) => warn!(
                grace_secs = grace.as_secs(),
                "Processing loop did not stop within the grace period"
            ),
        }

        if let Err(err) = self.store.persist() {
            error!(error = %err, "Final ledger flush failed");
        }

        let metrics = self.monitor.snapshot();
        info!(
            processed = metrics.processed_files,
            succeeded = metrics.successful_uploads,
            failed = metrics.failed_uploads,
            "Scheduler stopped"
        );
        *self.state.lock().unwrap() = SystemState::Stopped;
    }
}

/// The sole consumer: dequeue, process serially, publish queue depth.
///
/// Cancellation is observed between items and during the idle sleep, never
/// mid-`process()`: letting the current item finish is what keeps the
/// single-owner invariant intact across shutdown.
async fn processing_loop(
    mut processor: ContentProcessor,
    store: Arc<LifecycleStore>,
    monitor: Arc<Monitor>,
    idle_poll: Duration,
    cancel: CancellationToken,
) {
    info!("Processing loop started");

    loop {
        if cancel.is_cancelled() {
            break;
        }

        match store.next_discovered() {
            Ok(Some(entry)) => {
                processor.process(&entry).await;
            }
            Ok(None) => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(idle_poll) => {}
                }
            }
            Err(err) => {
                // Fail closed: a broken ledger authorizes nothing
                error!(error = %err, "Dequeue failed");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(idle_poll) => {}
                }
            }
        }

        if let Ok(snapshot) = store.snapshot() {
            monitor.set_queue_depth(snapshot.depth() as u64);
        }
    }

    processor.logout_all().await;
    info!("Processing loop stopped");
}
