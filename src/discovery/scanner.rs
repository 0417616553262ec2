use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::fingerprint::fingerprint_file;
use crate::ledger::{DiscoveredFile, LedgerError, LifecycleStore};
use crate::media::{sniff_media_kind, MediaKind};

/// Enough head bytes for every signature, including the MPEG-TS double-sync
/// check at offset 188.
const SNIFF_BUF_SIZE: usize = 512;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Invalid username: {0}")]
    InvalidUsername(String),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DiscoveryError>;

/// One automation target: a username plus its resolved directory set.
#[derive(Debug, Clone)]
pub struct ManagedUser {
    pub name: String,
    pub paths: UserPaths,
}

/// Per-user directory layout:
/// - `<input_root>/<user>/{images,videos}` — the drop folders
/// - `<output_root>/<user>/{images,videos}` — successful relocations
/// - `<output_root>/<user>/failed` — terminal failures + `.meta` sidecars
#[derive(Debug, Clone)]
pub struct UserPaths {
    pub images: PathBuf,
    pub videos: PathBuf,
    pub processed_images: PathBuf,
    pub processed_videos: PathBuf,
    pub failed: PathBuf,
}

impl UserPaths {
    pub fn resolve(input_root: &Path, output_root: &Path, user: &str) -> Self {
        let input_base = input_root.join(user);
        let output_base = output_root.join(user);
        Self {
            images: input_base.join("images"),
            videos: input_base.join("videos"),
            processed_images: output_base.join("images"),
            processed_videos: output_base.join("videos"),
            failed: output_base.join("failed"),
        }
    }

    fn all(&self) -> [&PathBuf; 5] {
        [
            &self.images,
            &self.videos,
            &self.processed_images,
            &self.processed_videos,
            &self.failed,
        ]
    }
}

/// Turns per-user directory trees into lifecycle-table entries.
///
/// Recording a fingerprint *is* the enqueue: the scan result is returned for
/// logging and metrics only.
pub struct DiscoveryEngine {
    store: Arc<LifecycleStore>,
    input_root: PathBuf,
    output_root: PathBuf,
}

impl DiscoveryEngine {
    pub fn new(store: Arc<LifecycleStore>, input_root: PathBuf, output_root: PathBuf) -> Self {
        Self {
            store,
            input_root,
            output_root,
        }
    }

    /// Validate the username and create its expected directory tree.
    /// Idempotent: registering an existing user succeeds.
    pub fn register_user(&self, username: &str) -> Result<ManagedUser> {
        if username.is_empty()
            || username.contains(['/', '\\'])
            || username.starts_with('.')
            || username.starts_with('-')
        {
            return Err(DiscoveryError::InvalidUsername(username.to_string()));
        }

        let paths = UserPaths::resolve(&self.input_root, &self.output_root, username);
        for dir in paths.all() {
            fs::create_dir_all(dir)?;
        }

        info!(user = username, "Registered user");
        Ok(ManagedUser {
            name: username.to_string(),
            paths,
        })
    }

    /// Walk the user's drop folders and record every previously-unseen file.
    ///
    /// Classification is by content signature, not extension or folder:
    /// a video dropped into `images/` still routes to the video path.
    /// Files that vanish between listing and hashing are skipped silently;
    /// unreadable or unrecognized files are skipped with a log line.
    pub fn scan(&self, user: &ManagedUser) -> Result<Vec<DiscoveredFile>> {
        let mut newly_recorded = Vec::new();

        for root in [&user.paths.images, &user.paths.videos] {
            for dir_entry in WalkDir::new(root).follow_links(false) {
                let dir_entry = match dir_entry {
                    Ok(entry) => entry,
                    Err(err) => {
                        warn!(user = %user.name, error = %err, "Skipping unreadable entry");
                        continue;
                    }
                };

                if !dir_entry.file_type().is_file() {
                    continue;
                }

                let path = dir_entry.path();
                match self.examine(path, &user.name) {
                    Ok(Some(file)) => {
                        if self.store.record_if_new(&file)? {
                            newly_recorded.push(file);
                        }
                    }
                    Ok(None) => {}
                    Err(err) if err.kind() == io::ErrorKind::NotFound => {
                        // Deleted between listing and hashing; nothing was enqueued
                        debug!(path = %path.display(), "File vanished during scan");
                    }
                    Err(err) => {
                        warn!(path = %path.display(), error = %err, "Skipping unreadable file");
                    }
                }
            }
        }

        if !newly_recorded.is_empty() {
            info!(
                user = %user.name,
                count = newly_recorded.len(),
                "Scan recorded new files"
            );
        }
        Ok(newly_recorded)
    }

    /// Sniff and fingerprint one file. Returns None for unrecognized content.
    fn examine(&self, path: &Path, user: &str) -> io::Result<Option<DiscoveredFile>> {
        let mut head = [0u8; SNIFF_BUF_SIZE];
        let n = {
            let mut file = File::open(path)?;
            let mut read = 0;
            loop {
                let count = file.read(&mut head[read..])?;
                if count == 0 {
                    break read;
                }
                read += count;
                if read == head.len() {
                    break read;
                }
            }
        };

        let kind = sniff_media_kind(&head[..n]);
        if kind == MediaKind::Unsupported {
            warn!(path = %path.display(), "Unrecognized content, skipping");
            return Ok(None);
        }

        let fingerprint = fingerprint_file(path)?;

        Ok(Some(DiscoveredFile {
            path: path.to_path_buf(),
            kind,
            fingerprint,
            user: user.to_string(),
            discovered_at: Utc::now(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const JPEG_HEAD: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46];

    fn create_engine() -> (DiscoveryEngine, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(
            LifecycleStore::open(temp_dir.path().join("ledger")).unwrap(),
        );
        let engine = DiscoveryEngine::new(
            store,
            temp_dir.path().join("input"),
            temp_dir.path().join("output"),
        );
        (engine, temp_dir)
    }

    fn write_jpeg(dir: &Path, name: &str, tail: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut data = JPEG_HEAD.to_vec();
        data.extend_from_slice(tail);
        fs::write(&path, data).unwrap();
        path
    }

    #[test]
    fn test_register_user_creates_tree() {
        let (engine, _temp) = create_engine();
        let user = engine.register_user("alice").unwrap();

        assert!(user.paths.images.is_dir());
        assert!(user.paths.videos.is_dir());
        assert!(user.paths.processed_images.is_dir());
        assert!(user.paths.processed_videos.is_dir());
        assert!(user.paths.failed.is_dir());

        // Idempotent
        engine.register_user("alice").unwrap();
    }

    #[test]
    fn test_register_rejects_bad_usernames() {
        let (engine, _temp) = create_engine();
        assert!(engine.register_user("").is_err());
        assert!(engine.register_user("../escape").is_err());
        assert!(engine.register_user("a/b").is_err());
    }

    #[test]
    fn test_scan_records_new_files() {
        let (engine, _temp) = create_engine();
        let user = engine.register_user("alice").unwrap();

        write_jpeg(&user.paths.images, "one.jpg", b"one");
        write_jpeg(&user.paths.images, "two.jpg", b"two");

        let found = engine.scan(&user).unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|f| f.kind == MediaKind::Image));
    }

    #[test]
    fn test_scan_is_idempotent() {
        let (engine, _temp) = create_engine();
        let user = engine.register_user("alice").unwrap();
        write_jpeg(&user.paths.images, "one.jpg", b"one");

        assert_eq!(engine.scan(&user).unwrap().len(), 1);
        // Unchanged directory: second scan records nothing
        assert_eq!(engine.scan(&user).unwrap().len(), 0);
    }

    #[test]
    fn test_scan_dedups_identical_bytes_across_names() {
        let (engine, _temp) = create_engine();
        let user = engine.register_user("alice").unwrap();

        write_jpeg(&user.paths.images, "a.jpg", b"same");
        write_jpeg(&user.paths.images, "b.jpg", b"same");

        let found = engine.scan(&user).unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_scan_skips_unrecognized_content() {
        let (engine, _temp) = create_engine();
        let user = engine.register_user("alice").unwrap();

        fs::write(user.paths.images.join("notes.txt"), b"just some text").unwrap();
        write_jpeg(&user.paths.images, "real.jpg", b"payload");

        let found = engine.scan(&user).unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].path.ends_with("real.jpg"));
    }

    #[test]
    fn test_scan_classifies_by_content_not_folder() {
        let (engine, _temp) = create_engine();
        let user = engine.register_user("alice").unwrap();

        // An MP4 dropped into images/ with a .jpg name
        let mut mp4 = vec![0u8, 0, 0, 0x18];
        mp4.extend_from_slice(b"ftypisom");
        mp4.extend_from_slice(&[0u8; 32]);
        fs::write(user.paths.images.join("mislabeled.jpg"), &mp4).unwrap();

        let found = engine.scan(&user).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, MediaKind::Video);
    }

    #[test]
    fn test_scan_empty_directories() {
        let (engine, _temp) = create_engine();
        let user = engine.register_user("alice").unwrap();
        assert!(engine.scan(&user).unwrap().is_empty());
    }
}
