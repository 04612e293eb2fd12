//! # Catalog Store
//!
//! In-memory list of [`Track`] records backed by the `tracks.json` document.
//!
//! The live list (published on [`StateBus::tracks`]) also holds transient
//! Pending, Downloading and Failed records; only Completed records are ever
//! written to disk. Every mutation runs on the shared [`WriterContext`], so
//! concurrent completions cannot lose each other's updates, and every
//! mutation rewrites the whole document. Write failures are logged and
//! swallowed: the in-memory list stays authoritative and the next mutation
//! writes again.
//!
//! Deletions are reported to registered [`CatalogListener`]s (the playlist
//! store strips memberships this way) without the catalog depending on them.

use async_trait::async_trait;
use bridge_traits::storage::StorageGateway;
use bridge_traits::time::Clock;
use core_runtime::events::{CoreEvent, EventBus, LibraryEvent};
use core_runtime::logging::strip_path;
use core_runtime::state::StateReceiver;
use core_runtime::WriterContext;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::documents::{decode, encode, TrackDocument, TRACKS_DOCUMENT};
use crate::error::{LibraryError, Result};
use crate::models::{ChapterSpec, Track, TrackStatus};
use crate::state::StateBus;

/// Observer of catalog deletions.
///
/// Callbacks run on the writer context after the catalog has persisted the
/// deletion. They must not submit-and-wait on the same writer.
#[async_trait]
pub trait CatalogListener: Send + Sync {
    async fn on_track_deleted(&self, track_id: &str);

    /// Every id in `track_ids` was removed by a bulk clear.
    async fn on_catalog_cleared(&self, track_ids: &[String]);
}

/// Handle to the catalog. Clones share the same store.
#[derive(Clone)]
pub struct CatalogStore {
    inner: Arc<CatalogInner>,
}

struct CatalogInner {
    storage: Arc<dyn StorageGateway>,
    clock: Arc<dyn Clock>,
    writer: WriterContext,
    state: StateBus,
    events: EventBus,
    listeners: RwLock<Vec<Arc<dyn CatalogListener>>>,
}

impl CatalogStore {
    pub fn new(
        storage: Arc<dyn StorageGateway>,
        clock: Arc<dyn Clock>,
        writer: WriterContext,
        state: StateBus,
        events: EventBus,
    ) -> Self {
        Self {
            inner: Arc::new(CatalogInner {
                storage,
                clock,
                writer,
                state,
                events,
                listeners: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Register an observer of deletions.
    pub fn add_listener(&self, listener: Arc<dyn CatalogListener>) {
        self.inner.listeners.write().push(listener);
    }

    async fn on_writer<F, Fut, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce(Arc<CatalogInner>) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        self.inner.writer.run(job(inner)).await?
    }

    // ------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------

    /// Read the persisted catalog.
    ///
    /// Records whose backing file no longer exists are dropped, and the
    /// healed list is written back. Transient records already in the live
    /// list are kept.
    #[instrument(skip(self))]
    pub async fn load(&self) -> Result<Vec<Track>> {
        self.on_writer(|inner| async move { inner.load().await }).await
    }

    // ------------------------------------------------------------------
    // Download lifecycle
    // ------------------------------------------------------------------

    /// Add a freshly accepted download to the live list.
    ///
    /// Applied directly rather than through the writer, so the record is
    /// visible as soon as the caller returns. The id is new and nothing else
    /// can refer to it yet.
    pub fn record_pending(&self, track: Track) -> Result<()> {
        if track.status != TrackStatus::Pending {
            return Err(LibraryError::invalid("status", "expected a Pending track"));
        }
        self.inner.upsert(track);
        Ok(())
    }

    /// Move a Pending record to Downloading.
    ///
    /// Returns `false` when the record is absent or already terminal.
    pub async fn mark_downloading(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.on_writer(|inner| async move {
            Ok(inner.state.tracks.update_if(|tracks| {
                match tracks.iter_mut().find(|t| t.id == id) {
                    Some(track) if !track.status.is_terminal() => {
                        track.status = TrackStatus::Downloading;
                        track.progress_percent = 0;
                        true
                    }
                    _ => false,
                }
            }))
        })
        .await
    }

    /// Reflect job progress on a Downloading record.
    ///
    /// Called from the sampling task directly, not through the writer: it
    /// only touches one field of one transient record.
    pub fn note_progress(&self, id: &str, percent: u8) {
        self.inner.state.tracks.update_if(|tracks| {
            match tracks.iter_mut().find(|t| t.id == id) {
                Some(track)
                    if track.status == TrackStatus::Downloading
                        && track.progress_percent != percent =>
                {
                    track.progress_percent = percent;
                    true
                }
                _ => false,
            }
        });
    }

    /// Commit a Completed track, replacing the transient record with the
    /// same id.
    #[instrument(skip(self, track), fields(track_id = %track.id))]
    pub async fn record_completion(&self, track: Track) -> Result<()> {
        if track.status != TrackStatus::Completed {
            return Err(LibraryError::invalid("status", "expected a Completed track"));
        }
        track
            .validate()
            .map_err(|message| LibraryError::invalid("track", message))?;

        self.on_writer(|inner| async move {
            let event = LibraryEvent::TrackAdded {
                track_id: track.id.clone(),
                title: track.title.clone(),
            };
            info!(track_id = %track.id, bytes = track.file_size_bytes, "Track added to catalog");
            inner.upsert(track);
            inner.persist().await;
            inner.emit(event);
            Ok(())
        })
        .await
    }

    /// Commit a Failed track, replacing the transient record with the same id.
    #[instrument(skip(self, track), fields(track_id = %track.id))]
    pub async fn record_failure(&self, track: Track) -> Result<()> {
        if track.status != TrackStatus::Failed {
            return Err(LibraryError::invalid("status", "expected a Failed track"));
        }

        self.on_writer(|inner| async move {
            inner.upsert(track);
            inner.persist().await;
            Ok(())
        })
        .await
    }

    /// Drop a non-terminal record, e.g. after its job was cancelled.
    pub async fn discard(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.on_writer(|inner| async move {
            Ok(inner.remove_where(|t| t.id == id && !t.status.is_terminal()) > 0)
        })
        .await
    }

    /// Dismiss one Failed record.
    pub async fn remove_failed(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.on_writer(|inner| async move {
            Ok(inner.remove_where(|t| t.id == id && t.status == TrackStatus::Failed) > 0)
        })
        .await
    }

    /// Dismiss every Failed record.
    pub async fn clear_failed(&self) -> Result<usize> {
        self.on_writer(|inner| async move {
            Ok(inner.remove_where(|t| t.status == TrackStatus::Failed))
        })
        .await
    }

    // ------------------------------------------------------------------
    // Record edits
    // ------------------------------------------------------------------

    /// Set or clear the favorite flag. No-op (returns `false`) if `id` is
    /// unknown.
    pub async fn set_favorite(&self, id: &str, favorite: bool) -> Result<bool> {
        let id = id.to_string();
        self.on_writer(move |inner| async move { Ok(inner.set_favorite(&id, favorite).await) })
            .await
    }

    /// Count one more play and stamp the play time. No-op (returns `false`)
    /// if `id` is unknown.
    pub async fn increment_play_count(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.on_writer(|inner| async move { Ok(inner.increment_play_count(&id).await) })
            .await
    }

    /// Queue [`set_favorite`](Self::set_favorite) and return immediately.
    pub fn set_favorite_later(&self, id: &str, favorite: bool) {
        let inner = Arc::clone(&self.inner);
        let id = id.to_string();
        let queued = self.inner.writer.enqueue(async move {
            inner.set_favorite(&id, favorite).await;
        });
        if let Err(e) = queued {
            warn!(error = %e, "Dropped favorite update");
        }
    }

    /// Queue [`increment_play_count`](Self::increment_play_count) and return
    /// immediately.
    pub fn increment_play_count_later(&self, id: &str) {
        let inner = Arc::clone(&self.inner);
        let id = id.to_string();
        let queued = self.inner.writer.enqueue(async move {
            inner.increment_play_count(&id).await;
        });
        if let Err(e) = queued {
            warn!(error = %e, "Dropped play count update");
        }
    }

    /// Edit the title and/or artist of a Completed track.
    #[instrument(skip(self))]
    pub async fn update_metadata(
        &self,
        id: &str,
        title: Option<String>,
        artist: Option<String>,
    ) -> Result<()> {
        if title.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(LibraryError::invalid("title", "Track title cannot be empty"));
        }

        let id = id.to_string();
        self.on_writer(|inner| async move {
            let mut updated_fields = Vec::new();
            let found = inner.state.tracks.update_if(|tracks| {
                let Some(track) = tracks.iter_mut().find(|t| t.id == id && t.is_completed())
                else {
                    return false;
                };
                if let Some(title) = title {
                    track.title = title.trim().to_string();
                    updated_fields.push("title".to_string());
                }
                if let Some(artist) = artist {
                    track.artist = artist.trim().to_string();
                    updated_fields.push("artist".to_string());
                }
                true
            });
            if !found {
                return Err(LibraryError::not_found("Track", &id));
            }

            inner.persist().await;
            inner.emit(LibraryEvent::TrackUpdated {
                track_id: id,
                updated_fields,
            });
            Ok(())
        })
        .await
    }

    /// Carve chapter records out of a Completed track.
    ///
    /// Each chapter is a Completed record sharing the parent's file, with
    /// `start_ms`/`end_ms` set. The parent stays in the catalog.
    #[instrument(skip(self, chapters), fields(count = chapters.len()))]
    pub async fn add_chapters(&self, parent_id: &str, chapters: Vec<ChapterSpec>) -> Result<Vec<Track>> {
        for chapter in &chapters {
            if chapter.title.trim().is_empty() {
                return Err(LibraryError::invalid("title", "Chapter title cannot be empty"));
            }
            if chapter.start_ms < 0 || chapter.end_ms <= chapter.start_ms {
                return Err(LibraryError::invalid(
                    "range",
                    format!("Invalid chapter range {}..{}", chapter.start_ms, chapter.end_ms),
                ));
            }
        }

        let parent_id = parent_id.to_string();
        self.on_writer(|inner| async move {
            let parent = inner
                .find(|t| t.id == parent_id && t.is_completed())
                .ok_or_else(|| LibraryError::not_found("Track", &parent_id))?;
            let now = inner.clock.unix_timestamp_millis();

            let created: Vec<Track> = chapters
                .into_iter()
                .map(|chapter| Track {
                    id: Uuid::new_v4().to_string(),
                    title: chapter.title.trim().to_string(),
                    duration_ms: chapter.end_ms - chapter.start_ms,
                    download_timestamp: now,
                    play_count: 0,
                    last_played_timestamp: 0,
                    is_favorite: false,
                    start_ms: Some(chapter.start_ms),
                    end_ms: Some(chapter.end_ms),
                    ..parent.clone()
                })
                .collect();

            inner.state.tracks.update(|tracks| tracks.extend(created.iter().cloned()));
            inner.persist().await;
            for chapter in &created {
                inner.emit(LibraryEvent::TrackAdded {
                    track_id: chapter.id.clone(),
                    title: chapter.title.clone(),
                });
            }
            debug!(parent_id = %parent.id, "Chapters added");
            Ok(created)
        })
        .await
    }

    // ------------------------------------------------------------------
    // Deletion
    // ------------------------------------------------------------------

    /// Remove a track and its backing file.
    ///
    /// The file is deleted best-effort, and only when no other Completed
    /// record (a chapter, say) still points at it. Listeners are notified
    /// after the removal is persisted. Returns `false` if `id` is unknown.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::InvalidInput`] for the Pending or Downloading
    /// record of a running job; its job would commit it again. Cancel the job
    /// instead.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.on_writer(|inner| async move {
            let mut removed = None;
            let mut running = false;
            inner.state.tracks.update_if(|tracks| {
                match tracks.iter().position(|t| t.id == id) {
                    Some(index) if !tracks[index].status.is_terminal() => {
                        running = true;
                        false
                    }
                    Some(index) => {
                        removed = Some(tracks.remove(index));
                        true
                    }
                    None => false,
                }
            });
            if running {
                return Err(LibraryError::invalid(
                    "status",
                    format!("Track {id} is still downloading"),
                ));
            }
            let Some(track) = removed else {
                return Ok(false);
            };

            if let Some(path) = &track.local_path {
                if !inner.path_in_use(path) {
                    inner.delete_file(path).await;
                }
            }
            inner.persist().await;
            inner.emit(LibraryEvent::TrackDeleted {
                track_id: track.id.clone(),
            });
            info!(track_id = %track.id, "Track deleted");

            for listener in inner.listeners() {
                listener.on_track_deleted(&track.id).await;
            }
            Ok(true)
        })
        .await
    }

    /// Delete every Completed file and empty the catalog.
    ///
    /// Failed records are dismissed too; records of running jobs stay.
    /// Returns the number of Completed records removed.
    #[instrument(skip(self))]
    pub async fn clear_all(&self) -> Result<usize> {
        self.on_writer(|inner| async move {
            let mut completed = Vec::new();
            inner.state.tracks.update(|tracks| {
                let (done, rest): (Vec<Track>, Vec<Track>) =
                    std::mem::take(tracks).into_iter().partition(|t| t.is_completed());
                *tracks = rest
                    .into_iter()
                    .filter(|t| t.status != TrackStatus::Failed)
                    .collect();
                completed = done;
            });

            let paths: HashSet<PathBuf> = completed
                .iter()
                .filter_map(|t| t.local_path.clone())
                .collect();
            for path in &paths {
                inner.delete_file(path).await;
            }
            inner.persist().await;

            let ids: Vec<String> = completed.into_iter().map(|t| t.id).collect();
            inner.emit(LibraryEvent::CatalogCleared {
                removed: ids.len() as u64,
            });
            info!(removed = ids.len(), "Catalog cleared");

            for listener in inner.listeners() {
                listener.on_catalog_cleared(&ids).await;
            }
            Ok(ids.len())
        })
        .await
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn get(&self, id: &str) -> Option<Track> {
        self.inner.find(|t| t.id == id)
    }

    /// Snapshot of the live list, transient records included.
    pub fn tracks(&self) -> Vec<Track> {
        self.inner.state.tracks.get()
    }

    pub fn completed(&self) -> Vec<Track> {
        self.filtered(|t| t.is_completed())
    }

    pub fn favorites(&self) -> Vec<Track> {
        self.filtered(|t| t.is_completed() && t.is_favorite)
    }

    /// Most recently played first.
    pub fn recently_played(&self, limit: usize) -> Vec<Track> {
        let mut tracks = self.filtered(|t| t.is_completed() && t.last_played_timestamp > 0);
        tracks.sort_by(|a, b| b.last_played_timestamp.cmp(&a.last_played_timestamp));
        tracks.truncate(limit);
        tracks
    }

    /// Highest play count first, ties broken by title.
    pub fn most_played(&self, limit: usize) -> Vec<Track> {
        let mut tracks = self.filtered(|t| t.is_completed() && t.play_count > 0);
        tracks.sort_by(|a, b| {
            b.play_count
                .cmp(&a.play_count)
                .then_with(|| a.title.cmp(&b.title))
        });
        tracks.truncate(limit);
        tracks
    }

    pub fn subscribe(&self) -> StateReceiver<Vec<Track>> {
        self.inner.state.tracks.subscribe()
    }

    /// Bytes used by Completed tracks.
    ///
    /// Each backing file counts once even when chapters share it. A stored
    /// size of zero or less falls back to the size on disk; a missing file
    /// counts as zero.
    pub async fn total_storage_used(&self) -> u64 {
        let mut seen = HashSet::new();
        let mut total = 0u64;

        for track in self.completed() {
            let Some(path) = track.local_path else {
                continue;
            };
            if !seen.insert(path.clone()) {
                continue;
            }

            if track.file_size_bytes > 0 {
                total += track.file_size_bytes as u64;
                continue;
            }
            match self.inner.storage.file_size(&path).await {
                Ok(size) => total += size.unwrap_or(0),
                Err(e) => warn!(track_id = %track.id, error = %e, "Could not stat track file"),
            }
        }
        total
    }

    fn filtered(&self, predicate: impl Fn(&Track) -> bool) -> Vec<Track> {
        self.inner
            .state
            .tracks
            .read(|tracks| tracks.iter().filter(|t| predicate(t)).cloned().collect())
    }
}

impl std::fmt::Debug for CatalogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogStore")
            .field("tracks", &self.inner.state.tracks.read(Vec::len))
            .field("listeners", &self.inner.listeners.read().len())
            .finish()
    }
}

impl CatalogInner {
    async fn load(&self) -> Result<Vec<Track>> {
        let documents: Vec<TrackDocument> = match self.storage.read_document(TRACKS_DOCUMENT).await {
            Ok(Some(data)) => decode(TRACKS_DOCUMENT, &data).unwrap_or_else(|e| {
                warn!(error = %e, "Catalog document is unreadable, starting empty");
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(error = %e, "Failed to read catalog document, starting empty");
                Vec::new()
            }
        };

        let stored = documents.len();
        let mut seen = HashSet::new();
        let mut loaded = Vec::with_capacity(stored);
        for document in documents {
            if !seen.insert(document.id.clone()) {
                continue;
            }
            let track = document.into_track();
            if self.backing_file_exists(&track).await {
                loaded.push(track);
            } else {
                debug!(track_id = %track.id, "Dropping track whose file is gone");
            }
        }

        let restored = loaded.clone();
        self.state.tracks.update(|tracks| {
            let transient: Vec<Track> = std::mem::take(tracks)
                .into_iter()
                .filter(|t| !t.is_completed())
                .collect();
            *tracks = restored;
            tracks.extend(transient);
        });

        if loaded.len() < stored {
            info!(dropped = stored - loaded.len(), "Removed stale catalog records");
            self.persist().await;
        }
        info!(tracks = loaded.len(), "Catalog loaded");
        Ok(loaded)
    }

    async fn backing_file_exists(&self, track: &Track) -> bool {
        let Some(path) = &track.local_path else {
            return false;
        };
        match self.storage.file_exists(path).await {
            Ok(exists) => exists,
            Err(e) => {
                // Keep the record; it is dropped on a later load if the file is really gone.
                warn!(track_id = %track.id, error = %e, "Could not check track file");
                true
            }
        }
    }

    /// Rewrite the document with the Completed subset of the live list.
    async fn persist(&self) {
        let documents: Vec<TrackDocument> = self
            .state
            .tracks
            .read(|tracks| tracks.iter().filter_map(TrackDocument::from_track).collect());

        let written = match encode(&documents) {
            Ok(data) => self
                .storage
                .write_document(TRACKS_DOCUMENT, data)
                .await
                .map_err(LibraryError::from),
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            warn!(error = %e, "Failed to persist catalog");
        }
    }

    fn upsert(&self, track: Track) {
        self.state.tracks.update(|tracks| {
            match tracks.iter_mut().find(|t| t.id == track.id) {
                Some(existing) => *existing = track,
                None => tracks.push(track),
            }
        });
    }

    fn remove_where(&self, predicate: impl Fn(&Track) -> bool) -> usize {
        let mut removed = 0;
        self.state.tracks.update_if(|tracks| {
            let before = tracks.len();
            tracks.retain(|t| !predicate(t));
            removed = before - tracks.len();
            removed > 0
        });
        removed
    }

    fn find(&self, predicate: impl Fn(&Track) -> bool) -> Option<Track> {
        self.state
            .tracks
            .read(|tracks| tracks.iter().find(|t| predicate(t)).cloned())
    }

    fn path_in_use(&self, path: &Path) -> bool {
        self.state.tracks.read(|tracks| {
            tracks
                .iter()
                .any(|t| t.is_completed() && t.local_path.as_deref() == Some(path))
        })
    }

    async fn set_favorite(&self, id: &str, favorite: bool) -> bool {
        let mut found = false;
        let changed = self.state.tracks.update_if(|tracks| {
            let Some(track) = tracks.iter_mut().find(|t| t.id == id) else {
                return false;
            };
            found = true;
            let changed = track.is_favorite != favorite;
            track.is_favorite = favorite;
            changed
        });

        if changed {
            self.persist().await;
            self.emit(LibraryEvent::TrackUpdated {
                track_id: id.to_string(),
                updated_fields: vec!["is_favorite".to_string()],
            });
        }
        found
    }

    async fn increment_play_count(&self, id: &str) -> bool {
        let now = self.clock.unix_timestamp_millis();
        let found = self.state.tracks.update_if(|tracks| {
            let Some(track) = tracks.iter_mut().find(|t| t.id == id) else {
                return false;
            };
            track.play_count += 1;
            track.last_played_timestamp = now;
            true
        });

        if found {
            self.persist().await;
            self.emit(LibraryEvent::TrackUpdated {
                track_id: id.to_string(),
                updated_fields: vec!["play_count".to_string(), "last_played_timestamp".to_string()],
            });
        }
        found
    }

    async fn delete_file(&self, path: &Path) {
        if let Err(e) = self.storage.delete_file(path).await {
            let name = path.to_string_lossy();
            warn!(file = strip_path(&name), error = %e, "Failed to delete track file");
        }
    }

    fn listeners(&self) -> Vec<Arc<dyn CatalogListener>> {
        self.listeners.read().clone()
    }

    fn emit(&self, event: LibraryEvent) {
        let _ = self.events.emit(CoreEvent::Library(event));
    }
}
