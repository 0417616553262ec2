//! Ledger record types.
//!
//! A `LifecycleEntry` is the durable record of one unit of work, keyed by the
//! blake3 fingerprint of the file's bytes. The state machine:
//!
//! ```text
//!  DISCOVERED --acquire--> PROCESSING --complete--> COMPLETED (terminal)
//!  DISCOVERED --acquire--> PROCESSING --fail, attempts < max--> DISCOVERED
//!  DISCOVERED --acquire--> PROCESSING --fail, attempts >= max--> FAILED (terminal)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::media::MediaKind;

/// Processing state of a fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Discovered,
    Processing,
    Completed,
    Failed,
}

impl LifecycleState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Completed | LifecycleState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Discovered => "discovered",
            LifecycleState::Processing => "processing",
            LifecycleState::Completed => "completed",
            LifecycleState::Failed => "failed",
        }
    }
}

/// A candidate unit of work produced by a directory scan.
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    pub kind: MediaKind,
    pub fingerprint: String,
    pub user: String,
    pub discovered_at: DateTime<Utc>,
}

/// Durable record of one unit of work's progress, keyed by fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEntry {
    pub fingerprint: String,
    pub state: LifecycleState,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub user: String,
    pub source_path: PathBuf,
    pub kind: MediaKind,
}

impl LifecycleEntry {
    pub fn new(file: &DiscoveredFile) -> Self {
        Self {
            fingerprint: file.fingerprint.clone(),
            state: LifecycleState::Discovered,
            attempts: 0,
            last_error: None,
            first_seen: file.discovered_at,
            updated_at: file.discovered_at,
            user: file.user.clone(),
            source_path: file.path.clone(),
            kind: file.kind,
        }
    }
}

/// Outcome of a `fail` transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Back in DISCOVERED, eligible for another dequeue
    Requeued { attempts: u32 },
    /// Terminal FAILED
    Failed { attempts: u32 },
}

impl FailureDisposition {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FailureDisposition::Failed { .. })
    }
}

/// Read-only view of the ledger used for monitoring; derived, not
/// authoritative.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub discovered: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

impl QueueSnapshot {
    /// Items waiting to be dequeued.
    pub fn depth(&self) -> usize {
        self.discovered
    }

    pub fn total(&self) -> usize {
        self.discovered + self.processing + self.completed + self.failed
    }
}
