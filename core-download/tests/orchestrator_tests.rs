//! End-to-end download scenarios with a scripted HTTP client

use async_trait::async_trait;
use bridge_desktop::TokioStorageGateway;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::http::{HttpClient, HttpRequest, HttpStreamResponse};
use bridge_traits::storage::{MediaFile, StorageGateway};
use bridge_traits::time::SystemClock;
use bytes::Bytes;
use core_download::{DownloadError, DownloadOrchestrator, DownloadRequest, ResolvedStream, StreamResolver};
use core_library::documents::{decode, TrackDocument, TRACKS_DOCUMENT};
use core_library::{CatalogStore, LibraryError, StateBus, TrackStatus, UNKNOWN_ARTIST};
use core_runtime::config::DownloadSettings;
use core_runtime::events::{CoreEvent, DownloadEvent};
use core_runtime::{EventBus, WriterContext};
use futures::StreamExt;
use mockall::mock;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;

const MB: u64 = 1024 * 1024;

// ============================================================================
// Fakes
// ============================================================================

enum Script {
    Fail(BridgeError),
    Respond {
        status: u16,
        content_length: Option<u64>,
        chunks: Vec<BridgeResult<Bytes>>,
        delay: Duration,
    },
}

impl Script {
    fn ok(body: &[u8]) -> Self {
        Script::Respond {
            status: 200,
            content_length: Some(body.len() as u64),
            chunks: body
                .chunks(3)
                .map(|c| Ok(Bytes::copy_from_slice(c)))
                .collect(),
            delay: Duration::ZERO,
        }
    }
}

#[derive(Default)]
struct ScriptedHttpClient {
    scripts: Mutex<VecDeque<Script>>,
    calls: AtomicUsize,
}

impl ScriptedHttpClient {
    fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpClient for ScriptedHttpClient {
    async fn open_stream(&self, _request: HttpRequest) -> BridgeResult<HttpStreamResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let script = self
            .scripts
            .lock()
            .pop_front()
            .unwrap_or_else(|| Script::Fail(BridgeError::Network("no script left".into())));

        match script {
            Script::Fail(err) => Err(err),
            Script::Respond {
                status,
                content_length,
                chunks,
                delay,
            } => {
                let body = futures::stream::iter(chunks)
                    .then(move |chunk| async move {
                        tokio::time::sleep(delay).await;
                        chunk
                    })
                    .boxed();
                Ok(HttpStreamResponse {
                    status,
                    content_length,
                    content_type: Some("audio/mpeg".to_string()),
                    body,
                })
            }
        }
    }
}

/// Real filesystem with a fixed free-space figure.
struct LimitedStorage {
    inner: TokioStorageGateway,
    available: u64,
}

#[async_trait]
impl StorageGateway for LimitedStorage {
    async fn media_directory(&self) -> BridgeResult<PathBuf> {
        self.inner.media_directory().await
    }

    async fn available_bytes(&self) -> BridgeResult<u64> {
        Ok(self.available)
    }

    async fn write_document(&self, name: &str, data: Bytes) -> BridgeResult<()> {
        self.inner.write_document(name, data).await
    }

    async fn read_document(&self, name: &str) -> BridgeResult<Option<Bytes>> {
        self.inner.read_document(name).await
    }

    async fn create_media_file(&self, file_name: &str) -> BridgeResult<MediaFile> {
        self.inner.create_media_file(file_name).await
    }

    async fn file_exists(&self, path: &Path) -> BridgeResult<bool> {
        self.inner.file_exists(path).await
    }

    async fn file_size(&self, path: &Path) -> BridgeResult<Option<u64>> {
        self.inner.file_size(path).await
    }

    async fn delete_file(&self, path: &Path) -> BridgeResult<()> {
        self.inner.delete_file(path).await
    }
}

mock! {
    Resolver {}

    #[async_trait]
    impl StreamResolver for Resolver {
        async fn resolve_audio_url(&self, source_ref: &str) -> Option<ResolvedStream>;
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    dir: TempDir,
    http: Arc<ScriptedHttpClient>,
    storage: Arc<LimitedStorage>,
    state: StateBus,
    catalog: CatalogStore,
    orchestrator: DownloadOrchestrator,
    events: broadcast::Receiver<CoreEvent>,
}

fn harness(scripts: Vec<Script>, available: u64) -> Harness {
    let dir = TempDir::new().unwrap();
    let http = ScriptedHttpClient::new(scripts);
    let storage = Arc::new(LimitedStorage {
        inner: TokioStorageGateway::with_data_dir(dir.path().to_path_buf()),
        available,
    });
    let state = StateBus::new();
    let bus = EventBus::new(256);
    let events = bus.subscribe();

    let catalog = CatalogStore::new(
        storage.clone(),
        Arc::new(SystemClock),
        WriterContext::spawn(),
        state.clone(),
        bus.clone(),
    );
    let settings = DownloadSettings {
        progress_interval: Duration::from_millis(10),
        ..DownloadSettings::default()
    };
    let orchestrator = DownloadOrchestrator::new(
        http.clone(),
        storage.clone(),
        Arc::new(SystemClock),
        catalog.clone(),
        state.clone(),
        bus,
        settings,
    );

    Harness {
        dir,
        http,
        storage,
        state,
        catalog,
        orchestrator,
        events,
    }
}

impl Harness {
    /// Every event of `job_id` up to and including its terminal one.
    async fn job_events(&mut self, job_id: &str) -> Vec<DownloadEvent> {
        let mut seen = Vec::new();
        loop {
            let event = tokio::time::timeout(Duration::from_secs(10), self.events.recv())
                .await
                .expect("job did not finish in time")
                .unwrap();
            let CoreEvent::Download(event) = event else {
                continue;
            };
            if event.job_id() != job_id {
                continue;
            }
            let terminal = matches!(
                event,
                DownloadEvent::Completed { .. }
                    | DownloadEvent::Failed { .. }
                    | DownloadEvent::Cancelled { .. }
            );
            seen.push(event);
            if terminal {
                return seen;
            }
        }
    }

    async fn wait_for_start(&mut self, job_id: &str) {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(10), self.events.recv())
                .await
                .unwrap()
                .unwrap();
            if let CoreEvent::Download(DownloadEvent::Started { job_id: id, .. }) = event {
                if id == job_id {
                    return;
                }
            }
        }
    }

    fn media_files(&self) -> Vec<String> {
        let media = self.dir.path().join("media");
        match std::fs::read_dir(media) {
            Ok(entries) => entries
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    async fn persisted_ids(&self) -> Vec<String> {
        match self.storage.read_document(TRACKS_DOCUMENT).await.unwrap() {
            Some(data) => decode::<TrackDocument>(TRACKS_DOCUMENT, &data)
                .unwrap()
                .into_iter()
                .map(|d| d.id)
                .collect(),
            None => Vec::new(),
        }
    }
}

fn terminal(events: &[DownloadEvent]) -> &DownloadEvent {
    events.last().unwrap()
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_insufficient_space_fails_before_writing() {
    let script = Script::Respond {
        status: 200,
        content_length: Some(10 * MB),
        chunks: vec![Ok(Bytes::from_static(b"never read"))],
        delay: Duration::ZERO,
    };
    let mut h = harness(vec![script], 5 * MB);
    let progress = h.state.progress.subscribe();

    let job_id = h.orchestrator.submit(DownloadRequest::new("https://cdn.example.com/big.mp3"));
    let events = h.job_events(&job_id).await;

    let DownloadEvent::Failed { message, .. } = terminal(&events) else {
        panic!("expected failure, got {events:?}");
    };
    assert!(message.contains("10"), "{message}");
    assert!(message.contains('5'), "{message}");

    // Not retried, nothing written, no progress published
    assert_eq!(h.http.calls(), 1);
    assert!(h.media_files().is_empty());
    assert!(!progress.has_changed().unwrap());

    let track = h.catalog.get(&job_id).unwrap();
    assert_eq!(track.status, TrackStatus::Failed);
    assert_eq!(track.error_message.as_deref(), Some(message.as_str()));
    assert_eq!(h.state.last_error.get().as_deref(), Some(message.as_str()));
    assert!(h.persisted_ids().await.is_empty());
}

#[tokio::test]
async fn test_transient_failure_is_retried_once() {
    let body = b"0123456789abcdef";
    let scripts = vec![
        Script::Fail(BridgeError::Network("connection reset".into())),
        Script::ok(body),
    ];
    let mut h = harness(scripts, 100 * MB);

    let job_id = h.orchestrator.submit(DownloadRequest::new("https://cdn.example.com/music/song.mp3"));
    let events = h.job_events(&job_id).await;

    assert!(matches!(terminal(&events), DownloadEvent::Completed { bytes: 16, .. }));
    let retries = events
        .iter()
        .filter(|e| matches!(e, DownloadEvent::Retrying { .. }))
        .count();
    assert_eq!(retries, 1);
    assert_eq!(h.http.calls(), 2);

    // Exactly one record for the job, Completed and persisted
    let tracks = h.catalog.tracks();
    assert_eq!(tracks.len(), 1);
    let track = &tracks[0];
    assert_eq!(track.id, job_id);
    assert_eq!(track.status, TrackStatus::Completed);
    assert_eq!(track.title, "song");
    assert_eq!(track.artist, UNKNOWN_ARTIST);
    assert_eq!(track.file_size_bytes, 16);
    assert_eq!(h.persisted_ids().await, vec![job_id.clone()]);

    let path = track.local_path.clone().unwrap();
    assert_eq!(std::fs::read(path).unwrap(), body);
    assert!(h.state.progress.get().is_empty());
    assert!(h.orchestrator.active_jobs().is_empty());
    assert!(!h.orchestrator.cancel(&job_id));
}

#[tokio::test]
async fn test_second_transient_failure_is_final() {
    let scripts = vec![
        Script::Fail(BridgeError::Timeout("read timed out".into())),
        Script::Fail(BridgeError::Network("connection refused".into())),
    ];
    let mut h = harness(scripts, 100 * MB);

    let job_id = h.orchestrator.submit(DownloadRequest::new("https://cdn.example.com/a.mp3"));
    let events = h.job_events(&job_id).await;

    let DownloadEvent::Failed { message, .. } = terminal(&events) else {
        panic!("expected failure, got {events:?}");
    };
    assert!(message.contains("connection refused"));
    assert_eq!(h.http.calls(), 2);
    assert_eq!(h.catalog.get(&job_id).unwrap().status, TrackStatus::Failed);
}

#[tokio::test]
async fn test_http_error_is_not_retried() {
    let script = Script::Respond {
        status: 404,
        content_length: None,
        chunks: Vec::new(),
        delay: Duration::ZERO,
    };
    let mut h = harness(vec![script], 100 * MB);

    let job_id = h.orchestrator.submit(DownloadRequest::new("https://cdn.example.com/missing.mp3"));
    let events = h.job_events(&job_id).await;

    assert!(matches!(
        terminal(&events),
        DownloadEvent::Failed { message, .. } if message == "HTTP 404"
    ));
    assert_eq!(h.http.calls(), 1);
    assert!(h.media_files().is_empty());
}

#[tokio::test]
async fn test_mid_stream_error_removes_partial_file() {
    let broken = Script::Respond {
        status: 200,
        content_length: Some(8),
        chunks: vec![
            Ok(Bytes::from_static(b"1234")),
            Err(BridgeError::Network("stream reset".into())),
        ],
        delay: Duration::ZERO,
    };
    let mut h = harness(vec![broken, Script::ok(b"12345678")], 100 * MB);

    let job_id = h
        .orchestrator
        .submit(DownloadRequest::new("https://cdn.example.com/clip.mp3").with_title("Clip"));
    let events = h.job_events(&job_id).await;

    assert!(matches!(terminal(&events), DownloadEvent::Completed { .. }));
    // The partial file of the first attempt is gone, so the name is reused
    assert_eq!(h.media_files(), vec!["clip.mp3".to_string()]);
    assert_eq!(h.catalog.get(&job_id).unwrap().title, "Clip");
}

#[tokio::test]
async fn test_cancel_mid_stream_leaves_no_record() {
    let slow = Script::Respond {
        status: 200,
        content_length: Some(400),
        chunks: (0..100).map(|_| Ok(Bytes::from_static(b"abcd"))).collect(),
        delay: Duration::from_millis(20),
    };
    let mut h = harness(vec![slow], 100 * MB);

    let job_id = h.orchestrator.submit(DownloadRequest::new("https://cdn.example.com/long.mp3"));
    h.wait_for_start(&job_id).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(h.orchestrator.cancel(&job_id));
    let events = h.job_events(&job_id).await;

    assert!(matches!(terminal(&events), DownloadEvent::Cancelled { .. }));
    assert!(!events
        .iter()
        .any(|e| matches!(e, DownloadEvent::Completed { .. } | DownloadEvent::Failed { .. })));

    assert!(h.catalog.get(&job_id).is_none());
    assert!(h.persisted_ids().await.is_empty());
    assert!(h.media_files().is_empty());
    assert!(h.state.progress.get().is_empty());
    assert!(h.orchestrator.active_jobs().is_empty());
    assert_eq!(h.http.calls(), 1);
}

#[tokio::test]
async fn test_submit_records_pending_track_at_once() {
    let mut h = harness(vec![Script::ok(b"pending first")], 100 * MB);

    let job_id = h.orchestrator.submit(
        DownloadRequest::new("https://cdn.example.com/music/track.mp3").with_artist("Band"),
    );

    let track = h.catalog.get(&job_id).expect("no record right after submit");
    assert_eq!(track.status, TrackStatus::Pending);
    assert_eq!(track.title, "track");
    assert_eq!(track.artist, "Band");
    assert!(track.local_path.is_none());
    assert!(h.persisted_ids().await.is_empty());

    let events = h.job_events(&job_id).await;
    assert!(matches!(terminal(&events), DownloadEvent::Completed { .. }));
    assert_eq!(h.catalog.tracks().len(), 1);
}

#[tokio::test]
async fn test_progress_is_published_while_streaming() {
    let slow = Script::Respond {
        status: 200,
        content_length: Some(400),
        chunks: (0..40).map(|_| Ok(Bytes::from_static(b"0123456789"))).collect(),
        delay: Duration::from_millis(10),
    };
    let mut h = harness(vec![slow], 100 * MB);

    let job_id = h.orchestrator.submit(DownloadRequest::new("https://cdn.example.com/slow.mp3"));
    let mut progress = h.state.progress.subscribe();
    let catalog = h.catalog.clone();
    let id = job_id.clone();
    let watcher = tokio::spawn(async move {
        let mut percents = Vec::new();
        let mut record_percents = Vec::new();
        while progress.changed().await.is_ok() {
            let sample = progress.borrow_and_update().get(&id).map(|p| p.percent);
            match sample {
                Some(percent) => {
                    percents.push(percent);
                    if let Some(track) = catalog.get(&id) {
                        if track.status == TrackStatus::Downloading {
                            record_percents.push(track.progress_percent);
                        }
                    }
                }
                // Cleared once the job ends
                None if !percents.is_empty() => break,
                None => {}
            }
        }
        (percents, record_percents)
    });

    let events = h.job_events(&job_id).await;
    assert!(matches!(terminal(&events), DownloadEvent::Completed { bytes: 400, .. }));
    let (percents, record_percents) = tokio::time::timeout(Duration::from_secs(5), watcher)
        .await
        .unwrap()
        .unwrap();

    assert!(percents.len() >= 2, "{percents:?}");
    assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{percents:?}");
    assert!(percents.iter().all(|p| *p <= 100));
    assert!(percents.iter().any(|p| *p > 0 && *p < 100), "{percents:?}");

    assert!(!record_percents.is_empty());
    assert!(record_percents.windows(2).all(|w| w[0] <= w[1]), "{record_percents:?}");
    assert!(record_percents.iter().any(|p| *p > 0), "{record_percents:?}");
    assert!(h.state.progress.get().is_empty());
}

#[tokio::test]
async fn test_running_download_cannot_be_deleted() {
    let slow = Script::Respond {
        status: 200,
        content_length: Some(200),
        chunks: (0..50).map(|_| Ok(Bytes::from_static(b"abcd"))).collect(),
        delay: Duration::from_millis(20),
    };
    let mut h = harness(vec![slow], 100 * MB);

    let job_id = h.orchestrator.submit(DownloadRequest::new("https://cdn.example.com/keep.mp3"));
    h.wait_for_start(&job_id).await;

    assert!(matches!(
        h.catalog.delete(&job_id).await,
        Err(LibraryError::InvalidInput { .. })
    ));
    assert!(h.orchestrator.is_active(&job_id));

    assert!(h.orchestrator.cancel(&job_id));
    let events = h.job_events(&job_id).await;
    assert!(matches!(terminal(&events), DownloadEvent::Cancelled { .. }));
    assert!(h.catalog.get(&job_id).is_none());
    assert!(h.persisted_ids().await.is_empty());
}

#[tokio::test]
async fn test_shutdown_cancels_everything() {
    let slow = || Script::Respond {
        status: 200,
        content_length: None,
        chunks: (0..100).map(|_| Ok(Bytes::from_static(b"x"))).collect(),
        delay: Duration::from_millis(20),
    };
    let mut h = harness(vec![slow(), slow()], 100 * MB);

    let first = h.orchestrator.submit(DownloadRequest::new("https://cdn.example.com/1.mp3"));
    let second = h.orchestrator.submit(DownloadRequest::new("https://cdn.example.com/2.mp3"));
    assert_eq!(h.orchestrator.active_jobs().len(), 2);

    h.orchestrator.shutdown();
    tokio::time::timeout(Duration::from_secs(10), async {
        while !h.orchestrator.active_jobs().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert!(h.catalog.get(&first).is_none());
    assert!(h.catalog.get(&second).is_none());

    // Jobs submitted after shutdown never start
    let late = h.orchestrator.submit(DownloadRequest::new("https://cdn.example.com/3.mp3"));
    let events = h.job_events(&late).await;
    assert!(matches!(terminal(&events), DownloadEvent::Cancelled { .. }));
    assert!(h.catalog.tracks().is_empty());
}

#[tokio::test]
async fn test_same_url_twice_gets_unique_files() {
    let mut h = harness(vec![Script::ok(b"first"), Script::ok(b"second")], 100 * MB);

    let url = "https://cdn.example.com/music/song.mp3";
    let a = h.orchestrator.submit(DownloadRequest::new(url).with_artist("Band"));
    h.job_events(&a).await;
    let b = h.orchestrator.submit(DownloadRequest::new(url).with_artist("Band"));
    h.job_events(&b).await;

    let mut files = h.media_files();
    files.sort();
    assert_eq!(files, vec!["song-1.mp3".to_string(), "song.mp3".to_string()]);
    assert_eq!(h.catalog.completed().len(), 2);
    assert!(h.catalog.completed().iter().all(|t| t.artist == "Band"));
}

#[tokio::test]
async fn test_submit_resolved() {
    let mut h = harness(vec![Script::ok(b"resolved audio")], 100 * MB);

    let mut resolver = MockResolver::new();
    resolver
        .expect_resolve_audio_url()
        .withf(|source_ref| source_ref == "video-123")
        .returning(|_| {
            Some(ResolvedStream {
                stream_url: "https://rr1.example.com/videoplayback?sig=abc".to_string(),
                title: Some("Resolved Title".to_string()),
                uploader: Some("Uploader".to_string()),
            })
        });
    resolver.expect_resolve_audio_url().returning(|_| None);
    h.orchestrator.set_resolver(Arc::new(resolver));

    let job_id = h.orchestrator.submit_resolved("video-123").await.unwrap();
    h.job_events(&job_id).await;

    let track = h.catalog.get(&job_id).unwrap();
    assert_eq!(track.title, "Resolved Title");
    assert_eq!(track.artist, "Uploader");

    let err = h.orchestrator.submit_resolved("unknown").await.unwrap_err();
    assert!(matches!(err, DownloadError::Resolve(_)));
    assert!(h.state.last_error.get().unwrap().contains("unknown"));
}

#[tokio::test]
async fn test_submit_resolved_without_resolver() {
    let h = harness(Vec::new(), 100 * MB);
    assert!(matches!(
        h.orchestrator.submit_resolved("video-1").await,
        Err(DownloadError::Resolve(_))
    ));
    assert_eq!(h.http.calls(), 0);
}
