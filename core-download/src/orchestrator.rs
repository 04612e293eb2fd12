//! # Download Orchestrator
//!
//! Runs every accepted download as its own cancellable Tokio task.
//!
//! ## Job lifecycle
//!
//! 1. `submit` records a Pending track and returns the job id at once.
//! 2. Each attempt opens a stream, checks the status and the free space,
//!    then copies the body into a new file in the media directory while
//!    publishing throttled progress.
//! 3. Transient failures (network, I/O) are retried up to
//!    `DownloadSettings::max_attempts` in total, without backoff. A bad
//!    status or a lack of space fails at once.
//! 4. The result is committed to the catalog as Completed or Failed. A
//!    completed file is committed before its handle is closed.
//!
//! ## Cancellation
//!
//! Every job owns a [`CancellationToken`] (a child of the orchestrator's
//! shutdown token). Reads and connects race against it, so a cancelled job
//! stops within one `chunk_size` piece. Before committing, a job claims itself by
//! removing its token from the registry under the lock that `cancel` also
//! takes: either the cancel lands first and nothing is committed, or the
//! commit wins and the cancel is a no-op.

use bridge_traits::http::{ByteStream, HttpClient, HttpRequest};
use bridge_traits::storage::{MediaFile, StorageGateway};
use bridge_traits::time::Clock;
use core_library::{CatalogStore, StateBus, Track, UNKNOWN_ARTIST};
use core_runtime::config::DownloadSettings;
use core_runtime::events::{CoreEvent, DownloadEvent, EventBus};
use core_runtime::logging::{redact_url, strip_path};
use bridge_traits::error::Result as BridgeResult;
use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};
use uuid::Uuid;

use crate::error::{DownloadError, Result};
use crate::filename::{file_name_for, title_from_file_name};
use crate::progress::ProgressSampler;
use crate::resolver::StreamResolver;

/// A request to download one URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadRequest {
    pub url: String,
    /// Defaults to the file name without its extension
    pub title: Option<String>,
    /// Defaults to [`UNKNOWN_ARTIST`]
    pub artist: Option<String>,
    pub thumbnail_url: Option<String>,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = Some(artist.into());
        self
    }

    pub fn with_thumbnail(mut self, url: impl Into<String>) -> Self {
        self.thumbnail_url = Some(url.into());
        self
    }
}

/// Everything a job needs to know about itself.
#[derive(Debug, Clone)]
struct Job {
    id: String,
    url: String,
    title: Option<String>,
    artist: String,
    thumbnail_url: Option<String>,
    submitted_at: i64,
}

impl Job {
    fn from_request(request: DownloadRequest, submitted_at: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            url: request.url,
            title: non_blank(request.title),
            artist: non_blank(request.artist).unwrap_or_else(|| UNKNOWN_ARTIST.to_string()),
            thumbnail_url: non_blank(request.thumbnail_url),
            submitted_at,
        }
    }

    /// The transient record for this job. `file_name` feeds the default title.
    fn track(&self, file_name: &str) -> Track {
        let title = self
            .title
            .clone()
            .unwrap_or_else(|| title_from_file_name(file_name));
        Track::pending(
            self.id.clone(),
            self.url.clone(),
            title,
            self.artist.clone(),
            self.thumbnail_url.clone(),
            self.submitted_at,
        )
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// A fully written file whose handle is still open.
struct WrittenFile {
    path: PathBuf,
    file_name: String,
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    bytes: u64,
}

/// Accepts download requests and runs them concurrently.
///
/// Cloning is cheap; clones drive the same set of jobs.
#[derive(Clone)]
pub struct DownloadOrchestrator {
    inner: Arc<OrchestratorInner>,
}

struct OrchestratorInner {
    http: Arc<dyn HttpClient>,
    storage: Arc<dyn StorageGateway>,
    clock: Arc<dyn Clock>,
    catalog: CatalogStore,
    state: StateBus,
    events: EventBus,
    settings: DownloadSettings,
    resolver: RwLock<Option<Arc<dyn StreamResolver>>>,
    /// Tokens of jobs that have not committed a result yet
    jobs: Mutex<HashMap<String, CancellationToken>>,
    shutdown: CancellationToken,
}

impl DownloadOrchestrator {
    pub fn new(
        http: Arc<dyn HttpClient>,
        storage: Arc<dyn StorageGateway>,
        clock: Arc<dyn Clock>,
        catalog: CatalogStore,
        state: StateBus,
        events: EventBus,
        settings: DownloadSettings,
    ) -> Self {
        Self {
            inner: Arc::new(OrchestratorInner {
                http,
                storage,
                clock,
                catalog,
                state,
                events,
                settings,
                resolver: RwLock::new(None),
                jobs: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Install the collaborator used by [`submit_resolved`](Self::submit_resolved).
    pub fn set_resolver(&self, resolver: Arc<dyn StreamResolver>) {
        *self.inner.resolver.write() = Some(resolver);
    }

    /// Start downloading `request.url` and return the new job's id.
    ///
    /// Nothing about the URL is validated here; problems surface as a
    /// Failed track.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn submit(&self, request: DownloadRequest) -> String {
        let job = Job::from_request(request, self.inner.clock.unix_timestamp_millis());
        let job_id = job.id.clone();
        let token = self.inner.shutdown.child_token();
        self.inner.jobs.lock().insert(job_id.clone(), token.clone());

        let pending = job.track(&file_name_for(&job.url, None, job.submitted_at));
        if let Err(e) = self.inner.catalog.record_pending(pending) {
            warn!(job_id = %job_id, error = %e, "Could not record pending track");
        }

        info!(job_id = %job_id, url = redact_url(&job.url), "Download queued");
        self.inner.emit(DownloadEvent::Queued {
            job_id: job_id.clone(),
            url: redact_url(&job.url).to_string(),
        });

        let span = info_span!("download", job_id = %job_id);
        tokio::spawn(Arc::clone(&self.inner).run(job, token).instrument(span));
        job_id
    }

    /// Resolve `source_ref` through the [`StreamResolver`] and submit the
    /// resulting stream URL.
    #[instrument(skip(self))]
    pub async fn submit_resolved(&self, source_ref: &str) -> Result<String> {
        let resolver = self.inner.resolver.read().clone();
        let Some(resolver) = resolver else {
            return Err(DownloadError::Resolve("No stream resolver configured".to_string()));
        };

        match resolver.resolve_audio_url(source_ref).await {
            Some(stream) => {
                let request = DownloadRequest {
                    url: stream.stream_url,
                    title: stream.title,
                    artist: stream.uploader,
                    thumbnail_url: None,
                };
                Ok(self.submit(request))
            }
            None => {
                let message = format!("Could not resolve an audio stream for {source_ref}");
                warn!(source_ref, "Stream resolution failed");
                self.inner.state.set_error(message.clone());
                Err(DownloadError::Resolve(message))
            }
        }
    }

    /// Cancel a job. Returns `false` if it already finished or never existed.
    pub fn cancel(&self, job_id: &str) -> bool {
        match self.inner.jobs.lock().get(job_id) {
            Some(token) => {
                token.cancel();
                debug!(job_id, "Cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Cancel every running job.
    pub fn cancel_all(&self) -> usize {
        let jobs = self.inner.jobs.lock();
        for token in jobs.values() {
            token.cancel();
        }
        jobs.len()
    }

    /// Cancel every running job and every job submitted from now on.
    pub fn shutdown(&self) {
        info!("Download orchestrator shutting down");
        self.inner.shutdown.cancel();
    }

    /// Ids of jobs that have not reached a terminal state.
    pub fn active_jobs(&self) -> Vec<String> {
        self.inner.jobs.lock().keys().cloned().collect()
    }

    pub fn is_active(&self, job_id: &str) -> bool {
        self.inner.jobs.lock().contains_key(job_id)
    }
}

impl std::fmt::Debug for DownloadOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadOrchestrator")
            .field("active_jobs", &self.inner.jobs.lock().len())
            .field("shut_down", &self.inner.shutdown.is_cancelled())
            .finish()
    }
}

impl OrchestratorInner {
    async fn run(self: Arc<Self>, job: Job, token: CancellationToken) {
        if token.is_cancelled() {
            self.finish_cancelled(&job).await;
            return;
        }

        let max_attempts = self.settings.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.attempt(&job, attempt, &token).await {
                Ok(written) => {
                    self.finish_completed(&job, written).await;
                    return;
                }
                Err(DownloadError::Cancelled) => {
                    self.finish_cancelled(&job).await;
                    return;
                }
                Err(e) if e.is_retryable() && attempt < max_attempts && !token.is_cancelled() => {
                    warn!(attempt, error = %e, "Download attempt failed, retrying");
                    self.emit(DownloadEvent::Retrying {
                        job_id: job.id.clone(),
                        attempt,
                        message: e.to_string(),
                    });
                }
                Err(e) => {
                    self.finish_failed(&job, e).await;
                    return;
                }
            }
        }
    }

    /// One connect-check-stream pass. On error no file is left behind.
    async fn attempt(&self, job: &Job, attempt: u32, token: &CancellationToken) -> Result<WrittenFile> {
        if token.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }
        if let Err(e) = self.catalog.mark_downloading(&job.id).await {
            warn!(error = %e, "Could not mark track as downloading");
        }
        self.emit(DownloadEvent::Started {
            job_id: job.id.clone(),
            attempt,
        });
        debug!(attempt, url = redact_url(&job.url), "Opening stream");

        let request = HttpRequest::get(job.url.clone())
            .header("User-Agent", self.settings.user_agent.clone());
        let response = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(DownloadError::Cancelled),
            response = self.http.open_stream(request) => response?,
        };

        if !response.is_success() {
            return Err(DownloadError::Http {
                status: response.status,
            });
        }

        let total = response.known_length();
        if let Some(required_bytes) = total {
            let available_bytes = self.storage.available_bytes().await?;
            if required_bytes > available_bytes {
                return Err(DownloadError::InsufficientSpace {
                    required_bytes,
                    available_bytes,
                });
            }
        }

        let file_name = file_name_for(
            &job.url,
            response.content_type.as_deref(),
            self.clock.unix_timestamp_millis(),
        );
        let MediaFile { path, mut writer } = self.storage.create_media_file(&file_name).await?;

        match self
            .copy_body(job, response.body, &mut writer, total.unwrap_or(0), token)
            .await
        {
            Ok(bytes) => Ok(WrittenFile {
                path,
                file_name,
                writer,
                bytes,
            }),
            Err(e) => {
                drop(writer);
                self.remove_partial(&path).await;
                Err(e)
            }
        }
    }

    /// Stream the body into `writer`, returning the number of bytes written.
    ///
    /// The body is consumed in pieces of at most `chunk_size` bytes; each
    /// piece is one cancellation check and one progress sample.
    async fn copy_body(
        &self,
        job: &Job,
        body: ByteStream,
        writer: &mut Box<dyn AsyncWrite + Send + Unpin>,
        total_bytes: u64,
        token: &CancellationToken,
    ) -> Result<u64> {
        let mut body = rechunk(body, self.settings.chunk_size);
        let mut sampler = ProgressSampler::new(total_bytes, self.settings.progress_interval);
        let mut bytes_read = 0u64;

        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(DownloadError::Cancelled),
                next = body.next() => next,
            };
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk?;

            writer.write_all(&chunk).await?;
            bytes_read += chunk.len() as u64;

            if let Some(progress) = sampler.record(bytes_read) {
                self.state.set_progress(&job.id, progress);
                self.catalog.note_progress(&job.id, progress.percent);
            }
        }

        writer.flush().await?;
        Ok(bytes_read)
    }

    /// Take the job out of the registry. Returns `false` if it was cancelled
    /// first, in which case nothing may be committed.
    fn claim(&self, job_id: &str) -> bool {
        match self.jobs.lock().remove(job_id) {
            Some(token) => !token.is_cancelled(),
            None => false,
        }
    }

    async fn finish_completed(&self, job: &Job, written: WrittenFile) {
        let WrittenFile {
            path,
            file_name,
            mut writer,
            bytes,
        } = written;

        if !self.claim(&job.id) {
            drop(writer);
            self.remove_partial(&path).await;
            self.finish_cancelled(job).await;
            return;
        }

        let track = job.track(&file_name).completed(
            path.clone(),
            i64::try_from(bytes).unwrap_or(i64::MAX),
            self.clock.unix_timestamp_millis(),
        );
        if let Err(e) = self.catalog.record_completion(track).await {
            let message = e.to_string();
            error!(error = %message, "Could not commit downloaded track");
            drop(writer);
            self.remove_partial(&path).await;

            let failed = job.track(&file_name).failed(message.clone());
            if let Err(e) = self.catalog.record_failure(failed).await {
                warn!(error = %e, "Could not record failed track");
            }
            self.state.clear_progress(&job.id);
            self.state.set_error(message.clone());
            self.emit(DownloadEvent::Failed {
                job_id: job.id.clone(),
                message,
            });
            return;
        }

        // The record is committed; a failing close only loses the handle.
        if let Err(e) = writer.shutdown().await {
            warn!(error = %e, "Failed to close downloaded file");
        }

        self.state.clear_progress(&job.id);
        info!(bytes, "Download completed");
        self.emit(DownloadEvent::Completed {
            job_id: job.id.clone(),
            file_name,
            bytes,
        });
    }

    async fn finish_failed(&self, job: &Job, err: DownloadError) {
        if !self.claim(&job.id) {
            self.finish_cancelled(job).await;
            return;
        }

        let message = err.to_string();
        error!(error = %message, "Download failed");

        let track = job
            .track(&file_name_for(&job.url, None, job.submitted_at))
            .failed(message.clone());
        if let Err(e) = self.catalog.record_failure(track).await {
            warn!(error = %e, "Could not record failed track");
        }

        self.state.clear_progress(&job.id);
        self.state.set_error(message.clone());
        self.emit(DownloadEvent::Failed {
            job_id: job.id.clone(),
            message,
        });
    }

    async fn finish_cancelled(&self, job: &Job) {
        if let Err(e) = self.catalog.discard(&job.id).await {
            warn!(error = %e, "Could not discard cancelled track");
        }
        self.state.clear_progress(&job.id);
        self.jobs.lock().remove(&job.id);
        info!("Download cancelled");
        self.emit(DownloadEvent::Cancelled {
            job_id: job.id.clone(),
        });
    }

    async fn remove_partial(&self, path: &Path) {
        if let Err(e) = self.storage.delete_file(path).await {
            let name = path.to_string_lossy();
            warn!(file = strip_path(&name), error = %e, "Failed to remove partial file");
        }
    }

    fn emit(&self, event: DownloadEvent) {
        let _ = self.events.emit(CoreEvent::Download(event));
    }
}

/// Split every chunk of `body` into pieces of at most `chunk_size` bytes.
///
/// The pieces share the chunk's buffer.
fn rechunk(body: ByteStream, chunk_size: usize) -> impl Stream<Item = BridgeResult<Bytes>> + Unpin {
    let chunk_size = chunk_size.max(1);
    body.flat_map(move |chunk| stream::iter(split_chunk(chunk, chunk_size)))
}

fn split_chunk(chunk: BridgeResult<Bytes>, chunk_size: usize) -> Vec<BridgeResult<Bytes>> {
    let mut bytes = match chunk {
        Ok(bytes) => bytes,
        Err(e) => return vec![Err(e)],
    };
    let mut pieces = Vec::with_capacity(bytes.len().div_ceil(chunk_size));
    while bytes.len() > chunk_size {
        pieces.push(Ok(bytes.split_to(chunk_size)));
    }
    if !bytes.is_empty() {
        pieces.push(Ok(bytes));
    }
    pieces
}
