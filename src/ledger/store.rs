use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use tracing::{debug, info, warn};

use super::entry::{
    DiscoveredFile, FailureDisposition, LifecycleEntry, LifecycleState, QueueSnapshot,
};
use super::error::{LedgerError, Result};
use super::partitions::{encode_entry_key, encode_meta_key};

const META_LAST_PURGE: &str = "last_purge";

/// Fjall-backed lifecycle table: the authoritative, crash-tolerant record of
/// every fingerprint ever seen and its processing state.
///
/// Architecture:
/// - `entries` partition: entry:{fingerprint} -> LifecycleEntry (JSON)
/// - `metadata` partition: meta:{key} -> value (string)
///
/// All state transitions go through a single transition mutex, which makes
/// each of them a compare-and-set: discovery scans for several users may race
/// dequeue attempts from the processing loop, and only one caller can win an
/// acquire for a given fingerprint. Storage errors fail closed: an `Err`
/// never authorizes processing.
pub struct LifecycleStore {
    keyspace: Keyspace,
    entries: PartitionHandle,
    metadata: PartitionHandle,
    transition: Mutex<()>,
}

impl LifecycleStore {
    /// Open or create a lifecycle store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening lifecycle store at: {}", path.display());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let keyspace = Config::new(path).open()?;

        let entries = keyspace.open_partition("entries", PartitionCreateOptions::default())?;
        let metadata = keyspace.open_partition("metadata", PartitionCreateOptions::default())?;

        info!("Lifecycle store opened");
        Ok(Self {
            keyspace,
            entries,
            metadata,
            transition: Mutex::new(()),
        })
    }

    /// Create a DISCOVERED entry iff the fingerprint is unknown.
    ///
    /// Returns whether a new entry was created. False means the fingerprint
    /// is already known in *any* state: re-discovering the same bytes never
    /// resurrects a terminal entry.
    pub fn record_if_new(&self, file: &DiscoveredFile) -> Result<bool> {
        let _guard = self.transition.lock().unwrap();

        let key = encode_entry_key(&file.fingerprint);
        if self.entries.get(&key)?.is_some() {
            debug!(
                fingerprint = %file.fingerprint,
                path = %file.path.display(),
                "Fingerprint already known, skipping"
            );
            return Ok(false);
        }

        let entry = LifecycleEntry::new(file);
        self.entries.insert(key, serde_json::to_vec(&entry)?)?;

        debug!(
            fingerprint = %file.fingerprint,
            user = %file.user,
            path = %file.path.display(),
            "Recorded new entry"
        );
        Ok(true)
    }

    /// Atomically transition DISCOVERED -> PROCESSING.
    ///
    /// Returns false if the entry is missing or not in DISCOVERED state.
    /// A successful acquire is the only thing that authorizes a consumer to
    /// run the pipeline on this fingerprint.
    pub fn try_acquire_for_processing(&self, fingerprint: &str) -> Result<bool> {
        let _guard = self.transition.lock().unwrap();

        let Some(mut entry) = self.load(fingerprint)? else {
            return Ok(false);
        };

        if entry.state != LifecycleState::Discovered {
            return Ok(false);
        }

        entry.state = LifecycleState::Processing;
        entry.updated_at = Utc::now();
        self.save(&entry)?;

        debug!(fingerprint, "Acquired for processing");
        Ok(true)
    }

    /// Transition PROCESSING -> COMPLETED.
    pub fn complete(&self, fingerprint: &str) -> Result<()> {
        let _guard = self.transition.lock().unwrap();

        let mut entry = self.load_required(fingerprint)?;
        self.expect_processing(&entry, "completed")?;

        entry.state = LifecycleState::Completed;
        entry.updated_at = Utc::now();
        self.save(&entry)?;

        info!(fingerprint, user = %entry.user, "Entry completed");
        Ok(())
    }

    /// Record a failure: increments attempts, then either requeues the entry
    /// (attempts < max_attempts) or marks it terminally FAILED.
    pub fn fail(
        &self,
        fingerprint: &str,
        error: &str,
        max_attempts: u32,
    ) -> Result<FailureDisposition> {
        let _guard = self.transition.lock().unwrap();

        let mut entry = self.load_required(fingerprint)?;
        self.expect_processing(&entry, "failed")?;

        entry.attempts += 1;
        entry.last_error = Some(error.to_string());
        entry.updated_at = Utc::now();

        let disposition = if entry.attempts < max_attempts {
            entry.state = LifecycleState::Discovered;
            FailureDisposition::Requeued {
                attempts: entry.attempts,
            }
        } else {
            entry.state = LifecycleState::Failed;
            FailureDisposition::Failed {
                attempts: entry.attempts,
            }
        };
        self.save(&entry)?;

        match disposition {
            FailureDisposition::Requeued { attempts } => {
                warn!(fingerprint, attempts, error, "Entry failed, requeued");
            }
            FailureDisposition::Failed { attempts } => {
                warn!(fingerprint, attempts, error, "Entry failed terminally");
            }
        }
        Ok(disposition)
    }

    /// Transition PROCESSING -> FAILED immediately, regardless of the attempt
    /// count. Used for outcomes that retrying cannot change (content rejected
    /// by the platform, unsupported media kind).
    pub fn fail_terminal(&self, fingerprint: &str, error: &str) -> Result<()> {
        let _guard = self.transition.lock().unwrap();

        let mut entry = self.load_required(fingerprint)?;
        self.expect_processing(&entry, "failed")?;

        entry.attempts += 1;
        entry.last_error = Some(error.to_string());
        entry.state = LifecycleState::Failed;
        entry.updated_at = Utc::now();
        self.save(&entry)?;

        warn!(fingerprint, error, "Entry failed terminally (no retry)");
        Ok(())
    }

    /// Transition PROCESSING -> DISCOVERED with the attempt counter
    /// untouched. Used when a rate-limited upload is treated as "not yet
    /// attempted" by policy.
    pub fn release_without_penalty(&self, fingerprint: &str, note: &str) -> Result<()> {
        let _guard = self.transition.lock().unwrap();

        let mut entry = self.load_required(fingerprint)?;
        self.expect_processing(&entry, "discovered")?;

        entry.last_error = Some(note.to_string());
        entry.state = LifecycleState::Discovered;
        entry.updated_at = Utc::now();
        self.save(&entry)?;

        info!(fingerprint, note, "Entry released without penalty");
        Ok(())
    }

    /// The dequeue protocol: scan DISCOVERED entries oldest-first (ties
    /// broken by fingerprint for a deterministic order), acquire the first
    /// candidate that wins the compare-and-set, and return it. Candidates
    /// raced away by another caller are skipped, not errors.
    pub fn next_discovered(&self) -> Result<Option<LifecycleEntry>> {
        let mut candidates: Vec<LifecycleEntry> = Vec::new();
        for item in self.entries.iter() {
            let (_, value) = item?;
            let entry: LifecycleEntry = serde_json::from_slice(&value)?;
            if entry.state == LifecycleState::Discovered {
                candidates.push(entry);
            }
        }

        candidates.sort_by(|a, b| {
            a.first_seen
                .cmp(&b.first_seen)
                .then_with(|| a.fingerprint.cmp(&b.fingerprint))
        });

        for candidate in candidates {
            if self.try_acquire_for_processing(&candidate.fingerprint)? {
                // Reload to return the post-acquire state
                return self.load(&candidate.fingerprint);
            }
            debug!(
                fingerprint = %candidate.fingerprint,
                "Lost acquire race, trying next candidate"
            );
        }

        Ok(None)
    }

    /// Get an entry by fingerprint
    pub fn get(&self, fingerprint: &str) -> Result<Option<LifecycleEntry>> {
        self.load(fingerprint)
    }

    /// Count entries by state. O(n) scan; acceptable at the queue depths
    /// this system sees.
    pub fn snapshot(&self) -> Result<QueueSnapshot> {
        let mut snapshot = QueueSnapshot::default();

        for item in self.entries.iter() {
            let (_, value) = item?;
            let entry: LifecycleEntry = serde_json::from_slice(&value)?;
            match entry.state {
                LifecycleState::Discovered => snapshot.discovered += 1,
                LifecycleState::Processing => snapshot.processing += 1,
                LifecycleState::Completed => snapshot.completed += 1,
                LifecycleState::Failed => snapshot.failed += 1,
            }
        }

        Ok(snapshot)
    }

    /// Remove COMPLETED/FAILED entries whose last update is older than the
    /// retention window. DISCOVERED/PROCESSING entries are never touched.
    pub fn purge_terminal_older_than(&self, retention: Duration) -> Result<usize> {
        let _guard = self.transition.lock().unwrap();

        let window = chrono::Duration::from_std(retention).unwrap_or(chrono::TimeDelta::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(window)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

        let mut expired: Vec<Vec<u8>> = Vec::new();
        for item in self.entries.iter() {
            let (key, value) = item?;
            let entry: LifecycleEntry = serde_json::from_slice(&value)?;
            if entry.state.is_terminal() && entry.updated_at < cutoff {
                expired.push(key.to_vec());
            }
        }

        let purged = expired.len();
        for key in expired {
            self.entries.remove(key)?;
        }

        self.metadata.insert(
            encode_meta_key(META_LAST_PURGE),
            Utc::now().to_rfc3339().as_bytes(),
        )?;

        info!(purged, "Purged expired terminal entries");
        Ok(purged)
    }

    /// When the last retention purge ran, if ever
    pub fn last_purge(&self) -> Result<Option<String>> {
        match self.metadata.get(encode_meta_key(META_LAST_PURGE))? {
            Some(value) => Ok(Some(String::from_utf8_lossy(&value).to_string())),
            None => Ok(None),
        }
    }

    /// Persist all pending writes to disk
    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }

    fn load(&self, fingerprint: &str) -> Result<Option<LifecycleEntry>> {
        match self.entries.get(encode_entry_key(fingerprint))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    fn load_required(&self, fingerprint: &str) -> Result<LifecycleEntry> {
        self.load(fingerprint)?
            .ok_or_else(|| LedgerError::EntryNotFound(fingerprint.to_string()))
    }

    fn save(&self, entry: &LifecycleEntry) -> Result<()> {
        self.entries.insert(
            encode_entry_key(&entry.fingerprint),
            serde_json::to_vec(entry)?,
        )?;
        Ok(())
    }

    fn expect_processing(&self, entry: &LifecycleEntry, to: &'static str) -> Result<()> {
        if entry.state != LifecycleState::Processing {
            return Err(LedgerError::InvalidTransition {
                fingerprint: entry.fingerprint.clone(),
                from: entry.state.as_str(),
                to,
            });
        }
        Ok(())
    }
}
