//! File discovery: per-user drop folders -> lifecycle-table entries.
//!
//! Discovery walks each registered user's `images/` and `videos/` folders,
//! classifies files by leading bytes, fingerprints their content with blake3,
//! and records unseen fingerprints in the ledger. Recording is the enqueue;
//! the returned file list only feeds logging and metrics.

pub mod fingerprint;
pub mod scanner;

pub use fingerprint::fingerprint_file;
pub use scanner::{DiscoveryEngine, DiscoveryError, ManagedUser, Result, UserPaths};
