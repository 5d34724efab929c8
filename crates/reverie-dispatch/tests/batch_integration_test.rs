//! Integration tests driving the batch orchestrator end to end against
//! in-memory implementations of the submission boundary, the result store,
//! and the playlist backend.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use reverie_client::types::{Clip, CreatePlaylistRequest, Playlist, PlaylistItem, PlaylistItemsPage};
use reverie_client::PlaylistApi;
use reverie_core::{BatchConfig, CompletionPayload, Error, Fingerprint, JobDescriptor, Result};
use reverie_dispatch::{BatchOrchestrator, OrchestratorConfig, ResultStore, Submitter};

/// Submitter handing out sequential handles, with failure injection.
struct MockSubmitter {
    next_handle: AtomicU64,
    /// Fail submissions whose prompt contains this marker.
    fail_marker: Option<String>,
    /// Accept every submission but never produce a handle.
    drop_handles: bool,
}

impl MockSubmitter {
    fn new() -> Self {
        Self {
            next_handle: AtomicU64::new(1),
            fail_marker: None,
            drop_handles: false,
        }
    }

    fn failing_on(marker: &str) -> Self {
        Self {
            fail_marker: Some(marker.to_string()),
            ..Self::new()
        }
    }

    fn dropping_handles() -> Self {
        Self {
            drop_handles: true,
            ..Self::new()
        }
    }

    fn submissions(&self) -> u64 {
        self.next_handle.load(Ordering::SeqCst) - 1
    }
}

#[async_trait]
impl Submitter for MockSubmitter {
    async fn submit(&self, descriptor: &JobDescriptor) -> Result<String> {
        if let (Some(marker), Some(prompt)) = (
            &self.fail_marker,
            descriptor.param("prompt").and_then(|v| v.as_str()),
        ) {
            if prompt.contains(marker.as_str()) {
                return Err(Error::Submission {
                    code: Some(1),
                    stderr: "queue rejected job".to_string(),
                });
            }
        }

        let handle = self.next_handle.fetch_add(1, Ordering::SeqCst);
        if self.drop_handles {
            return Err(Error::HandleMissing);
        }
        Ok(handle.to_string())
    }
}

/// Result store completing every handle with a fixed payload, or nothing.
struct MockResultStore {
    payload: Option<String>,
}

impl MockResultStore {
    fn completing_with(raw: &str) -> Self {
        Self {
            payload: Some(raw.to_string()),
        }
    }

    fn never_completing() -> Self {
        Self { payload: None }
    }
}

#[async_trait]
impl ResultStore for MockResultStore {
    async fn fetch(&self, _queue: &str, _handle: &str) -> Result<Option<CompletionPayload>> {
        Ok(self
            .payload
            .as_deref()
            .and_then(CompletionPayload::from_field))
    }
}

/// In-memory playlist backend recording uploads and metadata writes.
struct MockPlaylistApi {
    playlists: Mutex<HashMap<String, Playlist>>,
    items: Mutex<Vec<PlaylistItem>>,
    clips: Mutex<HashMap<String, Clip>>,
    next_clip: AtomicU64,
    downloads: AtomicU64,
    /// Fail the first N downloads before succeeding.
    download_failures: AtomicU64,
    /// Fail all item listings, simulating an unreadable ledger.
    fail_listing: bool,
}

impl MockPlaylistApi {
    fn new() -> Self {
        Self {
            playlists: Mutex::new(HashMap::new()),
            items: Mutex::new(Vec::new()),
            clips: Mutex::new(HashMap::new()),
            next_clip: AtomicU64::new(1),
            downloads: AtomicU64::new(0),
            download_failures: AtomicU64::new(0),
            fail_listing: false,
        }
    }

    fn with_playlist(self, uuid: &str, name: &str) -> Self {
        self.playlists.lock().unwrap().insert(
            uuid.to_string(),
            Playlist {
                uuid: uuid.to_string(),
                name: name.to_string(),
                description: None,
                nsfw: false,
            },
        );
        self
    }

    fn with_failing_listing(mut self) -> Self {
        self.fail_listing = true;
        self
    }

    fn with_download_failures(self, count: u64) -> Self {
        self.download_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Seed a clip whose description already carries a fingerprint tag.
    fn seed_ledger_entry(&self, fingerprint: &Fingerprint) {
        let uuid = format!("seeded-{}", fingerprint);
        let clip = Clip {
            uuid: uuid.clone(),
            name: None,
            description: Some(format!("earlier run {}", fingerprint.tag())),
            video: None,
        };
        let mut items = self.items.lock().unwrap();
        let id = items.len() as i64 + 1;
        items.push(PlaylistItem {
            id,
            item_type: "clip".to_string(),
            clip_item: Some(clip.clone()),
        });
        self.clips.lock().unwrap().insert(uuid, clip);
    }

    fn uploaded_descriptions(&self) -> Vec<String> {
        self.clips
            .lock()
            .unwrap()
            .values()
            .filter(|c| !c.uuid.starts_with("seeded-"))
            .filter_map(|c| c.description.clone())
            .collect()
    }
}

#[async_trait]
impl PlaylistApi for MockPlaylistApi {
    async fn create_playlist(&self, req: &CreatePlaylistRequest) -> Result<Playlist> {
        let playlist = Playlist {
            uuid: "created-playlist".to_string(),
            name: req.name.clone(),
            description: req.description.clone(),
            nsfw: req.nsfw,
        };
        self.playlists
            .lock()
            .unwrap()
            .insert(playlist.uuid.clone(), playlist.clone());
        Ok(playlist)
    }

    async fn get_playlist(&self, uuid: &str) -> Result<Playlist> {
        self.playlists
            .lock()
            .unwrap()
            .get(uuid)
            .cloned()
            .ok_or_else(|| Error::Request(format!("playlist {} not found", uuid)))
    }

    async fn playlist_items(&self, _uuid: &str, take: i64, skip: i64) -> Result<PlaylistItemsPage> {
        if self.fail_listing {
            return Err(Error::Request("listing unavailable".to_string()));
        }
        let items = self.items.lock().unwrap();
        let page: Vec<PlaylistItem> = items
            .iter()
            .skip(skip as usize)
            .take(take as usize)
            .cloned()
            .collect();
        Ok(PlaylistItemsPage {
            items: page,
            total_count: items.len() as i64,
        })
    }

    async fn add_file_to_playlist(
        &self,
        _uuid: &str,
        _path: &Path,
        name: Option<&str>,
    ) -> Result<Clip> {
        let clip = Clip {
            uuid: format!("clip-{}", self.next_clip.fetch_add(1, Ordering::SeqCst)),
            name: name.map(String::from),
            description: None,
            video: None,
        };
        let mut items = self.items.lock().unwrap();
        let id = items.len() as i64 + 1;
        items.push(PlaylistItem {
            id,
            item_type: "clip".to_string(),
            clip_item: Some(clip.clone()),
        });
        self.clips
            .lock()
            .unwrap()
            .insert(clip.uuid.clone(), clip.clone());
        Ok(clip)
    }

    async fn get_clip(&self, uuid: &str) -> Result<Clip> {
        self.clips
            .lock()
            .unwrap()
            .get(uuid)
            .cloned()
            .ok_or_else(|| Error::Request(format!("clip {} not found", uuid)))
    }

    async fn update_clip_description(&self, uuid: &str, description: &str) -> Result<()> {
        let mut clips = self.clips.lock().unwrap();
        let clip = clips
            .get_mut(uuid)
            .ok_or_else(|| Error::Request(format!("clip {} not found", uuid)))?;
        clip.description = Some(description.to_string());
        Ok(())
    }

    async fn set_clip_keyframe(&self, _clip_uuid: &str, _path: &Path) -> Result<()> {
        Ok(())
    }

    async fn reorder_playlist(&self, _uuid: &str, _item_ids: &[i64]) -> Result<()> {
        Ok(())
    }

    async fn download_file(&self, _url: &str, dest: &Path) -> Result<()> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        if self.download_failures.load(Ordering::SeqCst) > 0 {
            self.download_failures.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::Request("download interrupted".to_string()));
        }
        std::fs::write(dest, b"artifact-bytes")?;
        Ok(())
    }
}

fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig::default()
        .with_poll_interval(Duration::from_millis(10))
        .with_deadline(Duration::from_secs(5))
}

fn asset_dir(names: &[&str]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for name in names {
        std::fs::write(dir.path().join(name), b"png").unwrap();
    }
    dir
}

fn i2v_batch(dir: &Path) -> BatchConfig {
    BatchConfig::parse(&format!(
        r#"{{
            "algorithm": "image-to-video",
            "prompt": "a quiet harbor",
            "image_path": "{}",
            "combos": ["at dawn", "at dusk"],
            "playlist": {{"existing_uuid": "pl-1"}}
        }}"#,
        dir.display()
    ))
    .unwrap()
}

fn orchestrator(
    submitter: MockSubmitter,
    store: MockResultStore,
    api: Arc<MockPlaylistApi>,
    config: OrchestratorConfig,
) -> BatchOrchestrator {
    BatchOrchestrator::new(Arc::new(submitter), Arc::new(store), api, config)
}

#[tokio::test]
async fn test_full_batch_materializes_into_playlist() {
    let dir = asset_dir(&["a.png", "b.png", "c.png"]);
    let api = Arc::new(MockPlaylistApi::new().with_playlist("pl-1", "Harbors"));
    let engine = orchestrator(
        MockSubmitter::new(),
        MockResultStore::completing_with(r#"{"r2_url": "https://cdn/x.mp4"}"#),
        api.clone(),
        fast_config(),
    );

    let (_tx, mut rx) = mpsc::channel(1);
    let report = engine.run(&i2v_batch(dir.path()), &mut rx).await.unwrap();

    assert_eq!(report.planned, 6); // 3 assets x 2 combos
    assert_eq!(report.skipped_duplicate, 0);
    assert_eq!(report.submitted, 6);
    assert_eq!(report.materialized, 6);
    assert_eq!(report.timed_out, 0);
    assert!(report.outstanding.is_empty());
    assert!(report.success());

    // Every upload got a fingerprint tag stamped into its description.
    let descriptions = api.uploaded_descriptions();
    assert_eq!(descriptions.len(), 6);
    assert!(descriptions.iter().all(|d| d.contains("[bfp:")));
}

#[tokio::test]
async fn test_ledger_entries_skip_resubmission() {
    let dir = asset_dir(&["a.png", "b.png", "c.png"]);
    let api = Arc::new(MockPlaylistApi::new().with_playlist("pl-1", "Harbors"));
    api.seed_ledger_entry(&Fingerprint::derive("a.png", "at dawn"));
    api.seed_ledger_entry(&Fingerprint::derive("c.png", "at dusk"));

    let engine = orchestrator(
        MockSubmitter::new(),
        MockResultStore::completing_with(r#"{"r2_url": "https://cdn/x.mp4"}"#),
        api.clone(),
        fast_config(),
    );

    let (_tx, mut rx) = mpsc::channel(1);
    let report = engine.run(&i2v_batch(dir.path()), &mut rx).await.unwrap();

    assert_eq!(report.planned, 6);
    assert_eq!(report.skipped_duplicate, 2);
    assert_eq!(report.submitted, 4);
    assert_eq!(report.materialized, 4);
}

#[tokio::test]
async fn test_unreadable_ledger_disables_dedup_only() {
    let dir = asset_dir(&["a.png"]);
    let api = Arc::new(
        MockPlaylistApi::new()
            .with_playlist("pl-1", "Harbors")
            .with_failing_listing(),
    );

    let engine = orchestrator(
        MockSubmitter::new(),
        MockResultStore::completing_with("https://cdn/raw.mp4"),
        api.clone(),
        fast_config(),
    );

    let (_tx, mut rx) = mpsc::channel(1);
    let report = engine.run(&i2v_batch(dir.path()), &mut rx).await.unwrap();

    // Nothing skipped, everything proceeds.
    assert_eq!(report.skipped_duplicate, 0);
    assert_eq!(report.submitted, 2);
    assert_eq!(report.materialized, 2);
}

#[tokio::test]
async fn test_transient_materialization_failure_retries() {
    let dir = asset_dir(&["a.png"]);
    let mut batch = i2v_batch(dir.path());
    batch.combos = vec!["at dawn".to_string()];

    let api = Arc::new(
        MockPlaylistApi::new()
            .with_playlist("pl-1", "Harbors")
            .with_download_failures(1),
    );
    let engine = orchestrator(
        MockSubmitter::new(),
        MockResultStore::completing_with(r#"{"r2_url": "https://cdn/x.mp4"}"#),
        api.clone(),
        fast_config(),
    );

    let (_tx, mut rx) = mpsc::channel(1);
    let report = engine.run(&batch, &mut rx).await.unwrap();

    // First attempt fails at download, the handle is re-queued, and the
    // next cycle succeeds. Exactly one materialization despite two tries.
    assert_eq!(report.materialized, 1);
    assert!(api.downloads.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn test_deadline_reports_timed_out_jobs() {
    let dir = asset_dir(&["a.png"]);
    let api = Arc::new(MockPlaylistApi::new().with_playlist("pl-1", "Harbors"));
    let config = fast_config().with_deadline(Duration::from_millis(50));

    let engine = orchestrator(
        MockSubmitter::new(),
        MockResultStore::never_completing(),
        api,
        config,
    );

    let (_tx, mut rx) = mpsc::channel(1);
    let start = std::time::Instant::now();
    let report = engine.run(&i2v_batch(dir.path()), &mut rx).await.unwrap();

    assert_eq!(report.submitted, 2);
    assert_eq!(report.materialized, 0);
    assert_eq!(report.timed_out, 2);
    assert_eq!(report.outstanding.len(), 2);
    // Timed-out jobs remain recoverable; the run itself is not a failure.
    assert!(report.success());
    // Terminates within deadline plus one poll interval (plus slack).
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_failed_submissions_counted_and_fail_the_run() {
    let dir = asset_dir(&["a.png", "b.png"]);
    let mut batch = i2v_batch(dir.path());
    // One combo rejected by the queue, one accepted.
    batch.combos = vec!["at dawn".to_string(), "REJECT me".to_string()];

    let api = Arc::new(MockPlaylistApi::new().with_playlist("pl-1", "Harbors"));
    let engine = orchestrator(
        MockSubmitter::failing_on("REJECT"),
        MockResultStore::completing_with(r#"{"r2_url": "https://cdn/x.mp4"}"#),
        api,
        fast_config(),
    );

    let (_tx, mut rx) = mpsc::channel(1);
    let report = engine.run(&batch, &mut rx).await.unwrap();

    assert_eq!(report.planned, 4);
    assert_eq!(report.submitted, 2);
    assert_eq!(report.failed_to_submit, 2);
    assert_eq!(report.materialized, 2);
    assert!(!report.success());
}

#[tokio::test]
async fn test_missing_handles_are_untracked_not_failed() {
    let dir = asset_dir(&["a.png"]);
    let mut batch = i2v_batch(dir.path());
    batch.combos = vec!["at dawn".to_string()];

    let api = Arc::new(MockPlaylistApi::new().with_playlist("pl-1", "Harbors"));
    let engine = orchestrator(
        MockSubmitter::dropping_handles(),
        MockResultStore::completing_with(r#"{"r2_url": "https://cdn/x.mp4"}"#),
        api,
        fast_config(),
    );

    let (_tx, mut rx) = mpsc::channel(1);
    let report = engine.run(&batch, &mut rx).await.unwrap();

    assert_eq!(report.submitted, 1);
    assert_eq!(report.untracked, 1);
    assert_eq!(report.failed_to_submit, 0);
    // Nothing trackable, so nothing materialized.
    assert_eq!(report.materialized, 0);
    assert!(report.success());
}

#[tokio::test]
async fn test_folder_destination_writes_artifacts_locally() {
    let out = tempfile::tempdir().unwrap();
    let batch = BatchConfig::parse(&format!(
        r#"{{
            "algorithm": "text-to-image",
            "prompt": "a red door",
            "num_generations": 2,
            "output_folder": "{}"
        }}"#,
        out.path().display()
    ))
    .unwrap();

    let api = Arc::new(MockPlaylistApi::new());
    let engine = orchestrator(
        MockSubmitter::new(),
        MockResultStore::completing_with(r#"{"result": "https://cdn/img.png"}"#),
        api,
        fast_config(),
    );

    let (_tx, mut rx) = mpsc::channel(1);
    let report = engine.run(&batch, &mut rx).await.unwrap();

    assert_eq!(report.materialized, 2);
    assert!(out.path().join("image_0001.png").is_file());
    assert!(out.path().join("image_0002.png").is_file());
}

#[tokio::test]
async fn test_no_destination_skips_polling() {
    let dir = asset_dir(&["a.png"]);
    let batch = BatchConfig::parse(&format!(
        r#"{{
            "algorithm": "image-to-video",
            "prompt": "p",
            "image_path": "{}"
        }}"#,
        dir.path().display()
    ))
    .unwrap();

    let api = Arc::new(MockPlaylistApi::new());
    let engine = orchestrator(
        MockSubmitter::new(),
        MockResultStore::never_completing(),
        api,
        fast_config().with_deadline(Duration::from_secs(3600)),
    );

    // Would hang for the full deadline if polling ran without a destination.
    let (_tx, mut rx) = mpsc::channel(1);
    let report = tokio::time::timeout(
        Duration::from_secs(2),
        engine.run(&batch, &mut rx),
    )
    .await
    .expect("run should return without polling")
    .unwrap();

    assert_eq!(report.submitted, 1);
    assert_eq!(report.outstanding.len(), 1);
    assert_eq!(report.timed_out, 0);
}

#[tokio::test]
async fn test_dry_run_submits_nothing() {
    let dir = asset_dir(&["a.png", "b.png"]);
    let api = Arc::new(MockPlaylistApi::new().with_playlist("pl-1", "Harbors"));
    let submitter = Arc::new(MockSubmitter::new());
    let engine = BatchOrchestrator::new(
        submitter.clone(),
        Arc::new(MockResultStore::never_completing()),
        api,
        fast_config().with_dry_run(true),
    );

    let (_tx, mut rx) = mpsc::channel(1);
    let report = engine.run(&i2v_batch(dir.path()), &mut rx).await.unwrap();

    assert_eq!(report.planned, 4);
    assert_eq!(report.submitted, 0);
    assert_eq!(submitter.submissions(), 0);
}

#[tokio::test]
async fn test_shutdown_signal_reports_partial_progress() {
    let dir = asset_dir(&["a.png"]);
    let api = Arc::new(MockPlaylistApi::new().with_playlist("pl-1", "Harbors"));
    let engine = orchestrator(
        MockSubmitter::new(),
        MockResultStore::never_completing(),
        api,
        fast_config().with_deadline(Duration::from_secs(3600)),
    );

    let (tx, mut rx) = mpsc::channel(1);
    tx.send(()).await.unwrap();

    let report = tokio::time::timeout(
        Duration::from_secs(2),
        engine.run(&i2v_batch(dir.path()), &mut rx),
    )
    .await
    .expect("shutdown should end the run promptly")
    .unwrap();

    assert_eq!(report.submitted, 2);
    // Interrupted, not timed out.
    assert_eq!(report.timed_out, 0);
    assert_eq!(report.outstanding.len(), 2);
}
