//! Pipeline orchestrator: drives one acquired item through
//! analyze -> caption -> upload and reports the terminal outcome back to the
//! lifecycle table.
//!
//! Nothing in here is allowed to escape and crash the processing loop: every
//! failure becomes a lifecycle transition plus a metrics update, and every
//! terminal failure leaves a human-readable `.meta` trail next to the
//! relocated file.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::analyzer::ContentAnalyzer;
use super::caption::CaptionGenerator;
use super::uploader::{UploadError, Uploader, UploaderFactory};
use crate::discovery::{ManagedUser, UserPaths};
use crate::ledger::{FailureDisposition, LifecycleEntry, LifecycleStore};
use crate::media::MediaKind;
use crate::monitor::Monitor;

/// Retry policy applied by the orchestrator.
#[derive(Debug, Clone, Copy)]
pub struct PipelinePolicy {
    pub max_attempts: u32,
    /// Whether a rate-limited upload consumes an attempt
    pub rate_limit_counts_attempt: bool,
}

/// Sidecar written next to terminally failed files.
#[derive(Debug, Serialize)]
struct SidecarRecord<'a> {
    original_path: &'a str,
    processed_time: String,
    status: &'a str,
    error: &'a str,
    username: &'a str,
}

/// Drives one dequeued item through the three pipeline stages.
///
/// Owned exclusively by the processing loop; uploader sessions are cached
/// per user for the processor's lifetime.
pub struct ContentProcessor {
    store: Arc<LifecycleStore>,
    analyzer: Arc<dyn ContentAnalyzer>,
    captioner: Arc<dyn CaptionGenerator>,
    uploader_factory: Arc<dyn UploaderFactory>,
    uploaders: HashMap<String, Box<dyn Uploader>>,
    users: HashMap<String, UserPaths>,
    monitor: Arc<Monitor>,
    policy: PipelinePolicy,
    caption_style: String,
}

impl ContentProcessor {
    pub fn new(
        store: Arc<LifecycleStore>,
        analyzer: Arc<dyn ContentAnalyzer>,
        captioner: Arc<dyn CaptionGenerator>,
        uploader_factory: Arc<dyn UploaderFactory>,
        monitor: Arc<Monitor>,
        policy: PipelinePolicy,
        caption_style: String,
    ) -> Self {
        Self {
            store,
            analyzer,
            captioner,
            uploader_factory,
            uploaders: HashMap::new(),
            users: HashMap::new(),
            monitor,
            policy,
            caption_style,
        }
    }

    /// Make a registered user's directory layout known for relocations.
    pub fn add_user(&mut self, user: &ManagedUser) {
        self.users.insert(user.name.clone(), user.paths.clone());
    }

    /// Process one acquired entry to a terminal or requeued state.
    /// Returns whether the upload succeeded.
    pub async fn process(&mut self, entry: &LifecycleEntry) -> bool {
        info!(
            fingerprint = %entry.fingerprint,
            user = %entry.user,
            kind = %entry.kind,
            path = %entry.source_path.display(),
            attempt = entry.attempts + 1,
            "Processing file"
        );

        // Unsupported kinds are terminal without consuming an attempt
        // against the external service
        if entry.kind == MediaKind::Unsupported {
            self.fail_terminally(entry, "unsupported media kind");
            self.monitor.record_upload_failure();
            return false;
        }

        // Stage 1: analysis. No analyzer retry within this call; the
        // lifecycle retry policy covers it.
        let analysis = match self.analyzer.analyze(&entry.source_path, entry.kind).await {
            Ok(analysis) => analysis,
            Err(err) => {
                self.monitor.record_analysis_failure();
                self.fail_bounded(entry, &format!("analysis failed: {err}"));
                return false;
            }
        };
        debug!(
            fingerprint = %entry.fingerprint,
            category = %analysis.category,
            "Analysis complete"
        );

        // Stage 2: caption
        let caption = match self
            .captioner
            .generate(&analysis, &entry.user, &self.caption_style)
            .await
        {
            Ok(caption) => caption,
            Err(err) => {
                self.monitor.record_caption_failure();
                self.fail_bounded(entry, &format!("caption generation failed: {err}"));
                return false;
            }
        };
        debug!(
            fingerprint = %entry.fingerprint,
            caption_len = caption.len(),
            "Caption generated"
        );

        // Stage 3: upload via the per-user cached session
        let outcome = match self.uploader_for(&entry.user).await {
            Ok(uploader) => match entry.kind {
                MediaKind::Image => uploader.upload_photo(&entry.source_path, &caption).await,
                MediaKind::Video => uploader.upload_video(&entry.source_path, &caption).await,
                MediaKind::Unsupported => unreachable!("rejected above"),
            },
            Err(err) => Err(err),
        };

        match outcome {
            Ok(receipt) => {
                info!(
                    fingerprint = %entry.fingerprint,
                    media_id = %receipt.media_id,
                    "Upload succeeded"
                );
                if let Err(err) = self.store.complete(&entry.fingerprint) {
                    error!(
                        fingerprint = %entry.fingerprint,
                        error = %err,
                        "Failed to record completion"
                    );
                    return false;
                }
                self.relocate_processed(entry);
                self.monitor.record_success();
                true
            }
            Err(UploadError::RateLimited { retry_after })
                if !self.policy.rate_limit_counts_attempt =>
            {
                warn!(
                    fingerprint = %entry.fingerprint,
                    retry_after_secs = retry_after.map(|d| d.as_secs()),
                    "Rate limited, releasing without penalty"
                );
                if let Err(err) = self
                    .store
                    .release_without_penalty(&entry.fingerprint, "rate limited")
                {
                    error!(fingerprint = %entry.fingerprint, error = %err, "Release failed");
                }
                false
            }
            Err(UploadError::ContentRejected(reason)) => {
                // Retrying cannot change a platform policy verdict
                self.fail_terminally(entry, &format!("content rejected: {reason}"));
                self.monitor.record_upload_failure();
                false
            }
            Err(err) => {
                self.monitor.record_upload_failure();
                self.fail_bounded(entry, &format!("upload failed: {err}"));
                false
            }
        }
    }

    /// Log out and drop every cached uploader session.
    pub async fn logout_all(&mut self) {
        for (user, mut uploader) in self.uploaders.drain() {
            debug!(user = %user, "Logging out uploader");
            uploader.logout().await;
        }
    }

    /// Resolve or lazily create an authenticated uploader for the user.
    /// Creation or authentication failure propagates as an upload failure.
    async fn uploader_for(
        &mut self,
        user: &str,
    ) -> Result<&mut Box<dyn Uploader>, UploadError> {
        if !self.uploaders.contains_key(user) {
            let mut uploader = self.uploader_factory.create(user)?;
            uploader.authenticate().await?;
            info!(user, "Created uploader session");
            self.uploaders.insert(user.to_string(), uploader);
        }
        Ok(self.uploaders.get_mut(user).unwrap())
    }

    /// Bounded failure: requeue below the attempt limit, otherwise terminal.
    fn fail_bounded(&self, entry: &LifecycleEntry, reason: &str) {
        match self
            .store
            .fail(&entry.fingerprint, reason, self.policy.max_attempts)
        {
            Ok(disposition) => {
                if disposition.is_terminal() {
                    self.relocate_failed(entry, reason);
                }
                if let FailureDisposition::Requeued { attempts } = disposition {
                    debug!(
                        fingerprint = %entry.fingerprint,
                        attempts,
                        max_attempts = self.policy.max_attempts,
                        "Requeued for retry"
                    );
                }
            }
            Err(err) => {
                error!(
                    fingerprint = %entry.fingerprint,
                    error = %err,
                    "Failed to record failure"
                );
            }
        }
    }

    /// Immediate terminal failure, bypassing the retry budget.
    fn fail_terminally(&self, entry: &LifecycleEntry, reason: &str) {
        warn!(fingerprint = %entry.fingerprint, reason, "Terminal failure");
        match self.store.fail_terminal(&entry.fingerprint, reason) {
            Ok(()) => self.relocate_failed(entry, reason),
            Err(err) => {
                error!(
                    fingerprint = %entry.fingerprint,
                    error = %err,
                    "Failed to record terminal failure"
                );
            }
        }
    }

    fn relocate_processed(&self, entry: &LifecycleEntry) {
        let Some(paths) = self.users.get(&entry.user) else {
            error!(user = %entry.user, "No registered paths, leaving file in place");
            return;
        };
        let dest_dir = match entry.kind {
            MediaKind::Video => &paths.processed_videos,
            _ => &paths.processed_images,
        };
        if let Err(err) = relocate(&entry.source_path, dest_dir) {
            error!(
                path = %entry.source_path.display(),
                error = %err,
                "Failed to move processed file"
            );
        }
    }

    fn relocate_failed(&self, entry: &LifecycleEntry, reason: &str) {
        let Some(paths) = self.users.get(&entry.user) else {
            error!(user = %entry.user, "No registered paths, leaving file in place");
            return;
        };
        match relocate(&entry.source_path, &paths.failed) {
            Ok(dest) => {
                if let Err(err) = write_sidecar(&dest, entry, reason) {
                    error!(
                        path = %dest.display(),
                        error = %err,
                        "Failed to write failure sidecar"
                    );
                }
            }
            Err(err) => {
                error!(
                    path = %entry.source_path.display(),
                    error = %err,
                    "Failed to move failed file"
                );
            }
        }
    }
}

/// Move a file into `dest_dir` under a timestamped name and return the
/// destination. Falls back to copy+remove for cross-device moves.
fn relocate(source: &Path, dest_dir: &Path) -> io::Result<PathBuf> {
    fs::create_dir_all(dest_dir)?;

    let name = source
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "source has no file name"))?;
    let stamp = Utc::now().format("%Y%m%d_%H%M%S");
    let dest = dest_dir.join(format!("{}_{}", stamp, name.to_string_lossy()));

    match fs::rename(source, &dest) {
        Ok(()) => {}
        Err(_) => {
            fs::copy(source, &dest)?;
            fs::remove_file(source)?;
        }
    }

    debug!(from = %source.display(), to = %dest.display(), "Relocated file");
    Ok(dest)
}

fn write_sidecar(dest: &Path, entry: &LifecycleEntry, reason: &str) -> io::Result<()> {
    let original_path = entry.source_path.to_string_lossy();
    let record = SidecarRecord {
        original_path: &original_path,
        processed_time: Utc::now().to_rfc3339(),
        status: "failed",
        error: reason,
        username: &entry.user,
    };

    let mut sidecar = dest.as_os_str().to_owned();
    sidecar.push(".meta");
    fs::write(PathBuf::from(sidecar), serde_json::to_vec_pretty(&record)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CaptionConfig;
    use crate::discovery::DiscoveryEngine;
    use crate::ledger::{DiscoveredFile, LifecycleState};
    use crate::pipeline::analyzer::{Analysis, AnalyzeError};
    use crate::pipeline::caption::TemplateCaptioner;
    use crate::pipeline::uploader::UploadReceipt;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    struct StubAnalyzer {
        fail: bool,
    }

    #[async_trait]
    impl ContentAnalyzer for StubAnalyzer {
        async fn analyze(&self, _path: &Path, _kind: MediaKind) -> Result<Analysis, AnalyzeError> {
            if self.fail {
                Err(AnalyzeError::RequestFailed("model unavailable".to_string()))
            } else {
                Ok(Analysis {
                    category: "nature".to_string(),
                    caption_seed: "a quiet forest".to_string(),
                    confidence: 0.9,
                    visual_features: vec![],
                })
            }
        }
    }

    #[derive(Clone, Copy)]
    enum UploadBehavior {
        Succeed,
        Transient,
        Rejected,
        RateLimited,
    }

    struct StubUploader {
        behavior: UploadBehavior,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Uploader for StubUploader {
        async fn authenticate(&mut self) -> Result<bool, UploadError> {
            Ok(true)
        }

        async fn upload_photo(
            &mut self,
            _path: &Path,
            _caption: &str,
        ) -> Result<UploadReceipt, UploadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                UploadBehavior::Succeed => Ok(UploadReceipt {
                    media_id: "media-1".to_string(),
                }),
                UploadBehavior::Transient => {
                    Err(UploadError::Transient("connection reset".to_string()))
                }
                UploadBehavior::Rejected => {
                    Err(UploadError::ContentRejected("policy violation".to_string()))
                }
                UploadBehavior::RateLimited => Err(UploadError::RateLimited {
                    retry_after: Some(Duration::from_secs(900)),
                }),
            }
        }

        async fn upload_video(
            &mut self,
            path: &Path,
            caption: &str,
        ) -> Result<UploadReceipt, UploadError> {
            self.upload_photo(path, caption).await
        }

        async fn logout(&mut self) {}
    }

    struct StubFactory {
        behavior: Mutex<UploadBehavior>,
        calls: Arc<AtomicU32>,
    }

    impl UploaderFactory for StubFactory {
        fn create(&self, _username: &str) -> Result<Box<dyn Uploader>, UploadError> {
            Ok(Box::new(StubUploader {
                behavior: *self.behavior.lock().unwrap(),
                calls: self.calls.clone(),
            }))
        }
    }

    struct Harness {
        processor: ContentProcessor,
        store: Arc<LifecycleStore>,
        user: ManagedUser,
        upload_calls: Arc<AtomicU32>,
        _temp: TempDir,
    }

    fn harness(behavior: UploadBehavior, policy: PipelinePolicy, analyzer_fails: bool) -> Harness {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(LifecycleStore::open(temp.path().join("ledger")).unwrap());
        let engine = DiscoveryEngine::new(
            store.clone(),
            temp.path().join("input"),
            temp.path().join("output"),
        );
        let user = engine.register_user("alice").unwrap();

        let upload_calls = Arc::new(AtomicU32::new(0));
        let mut processor = ContentProcessor::new(
            store.clone(),
            Arc::new(StubAnalyzer {
                fail: analyzer_fails,
            }),
            Arc::new(TemplateCaptioner::new(CaptionConfig::default())),
            Arc::new(StubFactory {
                behavior: Mutex::new(behavior),
                calls: upload_calls.clone(),
            }),
            Arc::new(Monitor::new()),
            policy,
            "engaging".to_string(),
        );
        processor.add_user(&user);

        Harness {
            processor,
            store,
            user,
            upload_calls,
            _temp: temp,
        }
    }

    fn default_policy() -> PipelinePolicy {
        PipelinePolicy {
            max_attempts: 3,
            rate_limit_counts_attempt: false,
        }
    }

    /// Drop a jpeg in the user's images dir, record it, and acquire it
    fn stage_item(harness: &Harness, name: &str, content: &[u8]) -> LifecycleEntry {
        let path = harness.user.paths.images.join(name);
        let mut data = vec![0xFF, 0xD8, 0xFF, 0xE0];
        data.extend_from_slice(content);
        fs::write(&path, data).unwrap();

        let file = DiscoveredFile {
            path,
            kind: MediaKind::Image,
            fingerprint: crate::discovery::fingerprint_file(
                &harness.user.paths.images.join(name),
            )
            .unwrap(),
            user: "alice".to_string(),
            discovered_at: Utc::now(),
        };
        harness.store.record_if_new(&file).unwrap();
        harness.store.next_discovered().unwrap().unwrap()
    }

    fn dir_entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_success_path_relocates_and_completes() {
        let mut h = harness(UploadBehavior::Succeed, default_policy(), false);
        let entry = stage_item(&h, "pic.jpg", b"payload");

        assert!(h.processor.process(&entry).await);

        let stored = h.store.get(&entry.fingerprint).unwrap().unwrap();
        assert_eq!(stored.state, LifecycleState::Completed);

        // Source gone, destination stamped with the original name preserved
        assert!(!entry.source_path.exists());
        let moved = dir_entries(&h.user.paths.processed_images);
        assert_eq!(moved.len(), 1);
        assert!(moved[0].ends_with("_pic.jpg"));
    }

    #[tokio::test]
    async fn test_transient_failures_exhaust_into_failed_dir() {
        let mut h = harness(UploadBehavior::Transient, default_policy(), false);
        let entry = stage_item(&h, "pic.jpg", b"payload");

        // Attempts 1 and 2: requeued, file stays in the drop folder
        for _ in 0..2 {
            assert!(!h.processor.process(&entry).await);
            assert!(entry.source_path.exists());
            let entry = h.store.next_discovered().unwrap().unwrap();
            assert_eq!(entry.state, LifecycleState::Processing);
        }

        // Attempt 3: terminal, relocated with a sidecar
        assert!(!h.processor.process(&entry).await);

        let stored = h.store.get(&entry.fingerprint).unwrap().unwrap();
        assert_eq!(stored.state, LifecycleState::Failed);
        assert_eq!(stored.attempts, 3);
        assert!(!entry.source_path.exists());

        let failed = dir_entries(&h.user.paths.failed);
        assert_eq!(failed.len(), 2); // file + sidecar
        let sidecar_name = failed.iter().find(|n| n.ends_with(".meta")).unwrap();
        let sidecar: serde_json::Value = serde_json::from_slice(
            &fs::read(h.user.paths.failed.join(sidecar_name)).unwrap(),
        )
        .unwrap();
        assert_eq!(sidecar["status"], "failed");
        assert_eq!(sidecar["username"], "alice");
        assert!(sidecar["error"].as_str().unwrap().contains("upload failed"));
    }

    #[tokio::test]
    async fn test_analysis_failure_consumes_attempt_without_upload() {
        let mut h = harness(UploadBehavior::Succeed, default_policy(), true);
        let entry = stage_item(&h, "pic.jpg", b"payload");

        assert!(!h.processor.process(&entry).await);

        let stored = h.store.get(&entry.fingerprint).unwrap().unwrap();
        assert_eq!(stored.state, LifecycleState::Discovered);
        assert_eq!(stored.attempts, 1);
        assert!(stored.last_error.as_deref().unwrap().contains("analysis failed"));
        assert_eq!(h.upload_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_content_rejected_is_terminal_on_first_attempt() {
        let mut h = harness(UploadBehavior::Rejected, default_policy(), false);
        let entry = stage_item(&h, "pic.jpg", b"payload");

        assert!(!h.processor.process(&entry).await);

        let stored = h.store.get(&entry.fingerprint).unwrap().unwrap();
        assert_eq!(stored.state, LifecycleState::Failed);
        assert_eq!(stored.attempts, 1);
        assert!(!dir_entries(&h.user.paths.failed).is_empty());
    }

    #[tokio::test]
    async fn test_rate_limit_releases_without_penalty() {
        let mut h = harness(UploadBehavior::RateLimited, default_policy(), false);
        let entry = stage_item(&h, "pic.jpg", b"payload");

        assert!(!h.processor.process(&entry).await);

        let stored = h.store.get(&entry.fingerprint).unwrap().unwrap();
        assert_eq!(stored.state, LifecycleState::Discovered);
        assert_eq!(stored.attempts, 0);
        assert!(entry.source_path.exists());
    }

    #[tokio::test]
    async fn test_rate_limit_counts_when_policy_says_so() {
        let policy = PipelinePolicy {
            max_attempts: 3,
            rate_limit_counts_attempt: true,
        };
        let mut h = harness(UploadBehavior::RateLimited, policy, false);
        let entry = stage_item(&h, "pic.jpg", b"payload");

        assert!(!h.processor.process(&entry).await);

        let stored = h.store.get(&entry.fingerprint).unwrap().unwrap();
        assert_eq!(stored.state, LifecycleState::Discovered);
        assert_eq!(stored.attempts, 1);
    }

    #[tokio::test]
    async fn test_unsupported_kind_never_reaches_uploader() {
        let mut h = harness(UploadBehavior::Succeed, default_policy(), false);
        let mut entry = stage_item(&h, "pic.jpg", b"payload");
        entry.kind = MediaKind::Unsupported;

        assert!(!h.processor.process(&entry).await);

        let stored = h.store.get(&entry.fingerprint).unwrap().unwrap();
        assert_eq!(stored.state, LifecycleState::Failed);
        assert_eq!(h.upload_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_uploader_is_cached_per_user() {
        let mut h = harness(UploadBehavior::Succeed, default_policy(), false);

        let first = stage_item(&h, "one.jpg", b"one");
        assert!(h.processor.process(&first).await);
        let second = stage_item(&h, "two.jpg", b"two");
        assert!(h.processor.process(&second).await);

        assert_eq!(h.processor.uploaders.len(), 1);
        assert_eq!(h.upload_calls.load(Ordering::SeqCst), 2);
    }
}
