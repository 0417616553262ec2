//! Pipeline counters and system gauges.
//!
//! The coordinator pushes counters here and the health API reads them back
//! out, together with CPU/memory/disk gauges sampled on demand.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;
use sysinfo::{CpuRefreshKind, Disks, MemoryRefreshKind, RefreshKind, System};

/// Overall health classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Point-in-time counter values.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub processed_files: u64,
    pub successful_uploads: u64,
    pub failed_uploads: u64,
    pub analysis_failures: u64,
    pub caption_failures: u64,
    pub queue_depth: u64,
    pub success_rate: f64,
}

/// Sampled system resource usage.
#[derive(Debug, Clone, Serialize)]
pub struct SystemGauges {
    pub cpu_usage_percent: f32,
    pub memory_usage_percent: f32,
    pub disk_usage_percent: f32,
}

/// Health verdict plus the reasons behind it.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub uptime_secs: u64,
    pub issues: Vec<String>,
}

const CPU_DEGRADED_PERCENT: f32 = 90.0;
const MEMORY_DEGRADED_PERCENT: f32 = 90.0;
const DISK_UNHEALTHY_PERCENT: f32 = 95.0;

pub struct Monitor {
    started_at: Instant,
    processed_files: AtomicU64,
    successful_uploads: AtomicU64,
    failed_uploads: AtomicU64,
    analysis_failures: AtomicU64,
    caption_failures: AtomicU64,
    queue_depth: AtomicU64,
    system: Mutex<System>,
    disks: Mutex<Disks>,
}

impl Monitor {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            processed_files: AtomicU64::new(0),
            successful_uploads: AtomicU64::new(0),
            failed_uploads: AtomicU64::new(0),
            analysis_failures: AtomicU64::new(0),
            caption_failures: AtomicU64::new(0),
            queue_depth: AtomicU64::new(0),
            system: Mutex::new(System::new_with_specifics(
                RefreshKind::nothing()
                    .with_cpu(CpuRefreshKind::everything())
                    .with_memory(MemoryRefreshKind::everything()),
            )),
            disks: Mutex::new(Disks::new_with_refreshed_list()),
        }
    }

    pub fn record_success(&self) {
        self.processed_files.fetch_add(1, Ordering::Relaxed);
        self.successful_uploads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_upload_failure(&self) {
        self.processed_files.fetch_add(1, Ordering::Relaxed);
        self.failed_uploads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_analysis_failure(&self) {
        self.processed_files.fetch_add(1, Ordering::Relaxed);
        self.analysis_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_caption_failure(&self) {
        self.processed_files.fetch_add(1, Ordering::Relaxed);
        self.caption_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_queue_depth(&self, depth: u64) {
        self.queue_depth.store(depth, Ordering::Relaxed);
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let successful = self.successful_uploads.load(Ordering::Relaxed);
        let processed = self.processed_files.load(Ordering::Relaxed);
        let success_rate = if processed > 0 {
            successful as f64 / processed as f64 * 100.0
        } else {
            0.0
        };

        MetricsSnapshot {
            processed_files: processed,
            successful_uploads: successful,
            failed_uploads: self.failed_uploads.load(Ordering::Relaxed),
            analysis_failures: self.analysis_failures.load(Ordering::Relaxed),
            caption_failures: self.caption_failures.load(Ordering::Relaxed),
            queue_depth: self.queue_depth.load(Ordering::Relaxed),
            success_rate,
        }
    }

    /// Sample CPU, memory and disk usage.
    pub fn gauges(&self) -> SystemGauges {
        let (cpu_usage, memory_usage) = {
            let mut system = self.system.lock().unwrap();
            system.refresh_cpu_all();
            system.refresh_memory();

            let cpu = system.global_cpu_usage();
            let total = system.total_memory();
            let used = system.used_memory();
            let memory = if total > 0 {
                (used as f64 / total as f64 * 100.0) as f32
            } else {
                0.0
            };
            (cpu, memory)
        };

        let disk_usage = {
            let mut disks = self.disks.lock().unwrap();
            disks.refresh(true);
            let (mut total, mut available) = (0u64, 0u64);
            for disk in disks.iter() {
                total += disk.total_space();
                available += disk.available_space();
            }
            if total > 0 {
                ((total - available) as f64 / total as f64 * 100.0) as f32
            } else {
                0.0
            }
        };

        SystemGauges {
            cpu_usage_percent: cpu_usage,
            memory_usage_percent: memory_usage,
            disk_usage_percent: disk_usage,
        }
    }

    /// Derive a health verdict from the current gauges.
    pub fn health(&self) -> HealthReport {
        let gauges = self.gauges();
        let mut issues = Vec::new();
        let mut status = HealthStatus::Healthy;

        if gauges.cpu_usage_percent > CPU_DEGRADED_PERCENT {
            issues.push(format!("high CPU usage: {:.1}%", gauges.cpu_usage_percent));
            status = HealthStatus::Degraded;
        }
        if gauges.memory_usage_percent > MEMORY_DEGRADED_PERCENT {
            issues.push(format!(
                "high memory usage: {:.1}%",
                gauges.memory_usage_percent
            ));
            status = HealthStatus::Degraded;
        }
        if gauges.disk_usage_percent > DISK_UNHEALTHY_PERCENT {
            issues.push(format!(
                "disk almost full: {:.1}%",
                gauges.disk_usage_percent
            ));
            status = HealthStatus::Unhealthy;
        }

        HealthReport {
            status,
            uptime_secs: self.uptime_secs(),
            issues,
        }
    }
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let monitor = Monitor::new();

        monitor.record_success();
        monitor.record_success();
        monitor.record_upload_failure();
        monitor.record_analysis_failure();
        monitor.record_caption_failure();
        monitor.set_queue_depth(7);

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.processed_files, 5);
        assert_eq!(snapshot.successful_uploads, 2);
        assert_eq!(snapshot.failed_uploads, 1);
        assert_eq!(snapshot.analysis_failures, 1);
        assert_eq!(snapshot.caption_failures, 1);
        assert_eq!(snapshot.queue_depth, 7);
        assert!((snapshot.success_rate - 40.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_success_rate_with_no_traffic() {
        let monitor = Monitor::new();
        assert_eq!(monitor.snapshot().success_rate, 0.0);
    }

    #[test]
    fn test_gauges_are_sane() {
        let monitor = Monitor::new();
        let gauges = monitor.gauges();
        assert!(gauges.memory_usage_percent >= 0.0);
        assert!(gauges.memory_usage_percent <= 100.0);
        assert!(gauges.disk_usage_percent >= 0.0);
        assert!(gauges.disk_usage_percent <= 100.0);
    }
}
