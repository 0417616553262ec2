/// Fjall-based persistence layer for the per-file lifecycle table
///
/// This module is the source of truth for deduplication and retries. It uses
/// Fjall (an embedded LSM key-value store) to persist one `LifecycleEntry`
/// per content fingerprint, and it is the only place where lifecycle state
/// transitions happen:
///
/// - `record_if_new` — idempotent discovery (DISCOVERED)
/// - `try_acquire_for_processing` — the single-owner compare-and-set
/// - `complete` / `fail` / `fail_terminal` / `release_without_penalty`
/// - `next_discovered` — the dequeue protocol (FIFO by discovery time)
/// - `purge_terminal_older_than` — retention for terminal entries
///
/// ## Usage
///
/// ```rust,ignore
/// use autopost::ledger::LifecycleStore;
///
/// let store = LifecycleStore::open("data/ledger")?;
/// store.record_if_new(&discovered_file)?;
/// if let Some(entry) = store.next_discovered()? {
///     // run the pipeline, then complete() or fail()
/// }
/// ```

pub mod entry;
pub mod error;
pub mod partitions;
pub mod store;

pub use entry::{
    DiscoveredFile, FailureDisposition, LifecycleEntry, LifecycleState, QueueSnapshot,
};
pub use error::{LedgerError, Result};
pub use store::LifecycleStore;
