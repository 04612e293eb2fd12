//! # Playlist Store
//!
//! Playlists and their ordered memberships, backed by `playlists.json` and
//! `playlist_entries.json`. Both documents are rewritten on every mutation.
//!
//! Positions of one playlist's entries are kept dense (`0..N`) after every
//! mutating call. Nothing enforces that an entry's track still exists, so
//! reads and reorders filter entries against the catalog.
//!
//! The store follows catalog deletions through [`PlaylistStore::cascade`],
//! a [`CatalogListener`] to register on the catalog.

use async_trait::async_trait;
use bridge_traits::storage::StorageGateway;
use core_runtime::events::{CoreEvent, EventBus, LibraryEvent};
use core_runtime::logging::strip_path;
use core_runtime::state::StateReceiver;
use core_runtime::WriterContext;
use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::catalog::{CatalogListener, CatalogStore};
use crate::documents::{
    decode, encode, EntryDocument, PlaylistDocument, ENTRIES_DOCUMENT, PLAYLISTS_DOCUMENT,
};
use crate::error::{LibraryError, Result};
use crate::models::{Playlist, PlaylistEntry, Track};
use crate::state::StateBus;

/// Handle to the playlist store. Clones share the same store.
#[derive(Clone)]
pub struct PlaylistStore {
    inner: Arc<PlaylistInner>,
}

struct PlaylistInner {
    storage: Arc<dyn StorageGateway>,
    writer: WriterContext,
    state: StateBus,
    events: EventBus,
    catalog: CatalogStore,
}

impl PlaylistStore {
    pub fn new(
        storage: Arc<dyn StorageGateway>,
        writer: WriterContext,
        state: StateBus,
        events: EventBus,
        catalog: CatalogStore,
    ) -> Self {
        Self {
            inner: Arc::new(PlaylistInner {
                storage,
                writer,
                state,
                events,
                catalog,
            }),
        }
    }

    /// Listener that strips deleted tracks from every playlist.
    pub fn cascade(&self) -> Arc<dyn CatalogListener> {
        Arc::new(PlaylistCascade {
            inner: Arc::clone(&self.inner),
        })
    }

    async fn on_writer<F, Fut, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce(Arc<PlaylistInner>) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        self.inner.writer.run(job(inner)).await?
    }

    /// Read both documents.
    ///
    /// Entries of unknown playlists or unknown tracks are dropped and every
    /// playlist is re-densified. Load the catalog first.
    #[instrument(skip(self))]
    pub async fn load(&self) -> Result<Vec<Playlist>> {
        self.on_writer(|inner| async move { inner.load().await }).await
    }

    // ------------------------------------------------------------------
    // Playlists
    // ------------------------------------------------------------------

    #[instrument(skip(self, description, cover_image_path))]
    pub async fn create(
        &self,
        name: &str,
        description: Option<String>,
        cover_image_path: Option<PathBuf>,
    ) -> Result<Playlist> {
        let playlist = Playlist::new(name.trim(), description, cover_image_path);
        playlist
            .validate()
            .map_err(|message| LibraryError::invalid("name", message))?;

        self.on_writer(|inner| async move {
            let mut playlists = inner.state.playlists.get();
            playlists.push(playlist.clone());
            inner.state.playlists.publish(playlists);
            inner.persist().await;

            inner.emit(LibraryEvent::PlaylistCreated {
                playlist_id: playlist.id.clone(),
                name: playlist.name.clone(),
            });
            info!(playlist_id = %playlist.id, "Playlist created");
            Ok(playlist)
        })
        .await
    }

    /// Replace the name, description and cover of an existing playlist.
    ///
    /// A cover file that is no longer referenced is deleted best-effort.
    #[instrument(skip(self, playlist), fields(playlist_id = %playlist.id))]
    pub async fn update(&self, mut playlist: Playlist) -> Result<()> {
        playlist.name = playlist.name.trim().to_string();
        playlist
            .validate()
            .map_err(|message| LibraryError::invalid("name", message))?;

        self.on_writer(|inner| async move {
            let mut playlists = inner.state.playlists.get();
            let existing = playlists
                .iter_mut()
                .find(|p| p.id == playlist.id)
                .ok_or_else(|| LibraryError::not_found("Playlist", &playlist.id))?;
            let old_cover = std::mem::replace(existing, playlist.clone()).cover_image_path;
            inner.state.playlists.publish(playlists);

            if let Some(cover) = old_cover.filter(|c| playlist.cover_image_path.as_ref() != Some(c)) {
                inner.delete_cover(&playlist.id, &cover).await;
            }
            inner.persist().await;

            inner.emit(LibraryEvent::PlaylistUpdated {
                playlist_id: playlist.id,
                change_type: "edited".to_string(),
            });
            Ok(())
        })
        .await
    }

    /// Remove a playlist, all its entries and its cover file.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.on_writer(|inner| async move {
            let mut playlists = inner.state.playlists.get();
            let index = playlists
                .iter()
                .position(|p| p.id == id)
                .ok_or_else(|| LibraryError::not_found("Playlist", &id))?;
            let removed = playlists.remove(index);
            inner.state.playlists.publish(playlists);

            let mut entries = inner.state.entries.get();
            entries.retain(|e| e.playlist_id != id);
            inner.state.entries.publish(entries);

            if let Some(cover) = &removed.cover_image_path {
                inner.delete_cover(&id, cover).await;
            }
            inner.persist().await;

            inner.emit(LibraryEvent::PlaylistDeleted { playlist_id: id.clone() });
            info!(playlist_id = %id, "Playlist deleted");
            Ok(())
        })
        .await
    }

    // ------------------------------------------------------------------
    // Membership
    // ------------------------------------------------------------------

    /// Append a Completed track to a playlist.
    ///
    /// Returns `false` if the track was already a member.
    #[instrument(skip(self))]
    pub async fn add_track(&self, playlist_id: &str, track_id: &str) -> Result<bool> {
        let playlist_id = playlist_id.to_string();
        let track_id = track_id.to_string();
        self.on_writer(|inner| async move {
            inner.require_playlist(&playlist_id)?;
            if !inner.catalog.get(&track_id).is_some_and(|t| t.is_completed()) {
                return Err(LibraryError::not_found("Track", &track_id));
            }

            let mut entries = inner.state.entries.get();
            let members = entries.iter().filter(|e| e.playlist_id == playlist_id);
            if members.clone().any(|e| e.track_id == track_id) {
                return Ok(false);
            }
            let position = members.map(|e| e.position + 1).max().unwrap_or(0);
            entries.push(PlaylistEntry {
                playlist_id: playlist_id.clone(),
                track_id,
                position,
            });
            densify(&mut entries, &playlist_id);
            inner.state.entries.publish(entries);
            inner.persist().await;

            inner.emit(LibraryEvent::PlaylistUpdated {
                playlist_id,
                change_type: "track_added".to_string(),
            });
            Ok(true)
        })
        .await
    }

    /// Remove a track from a playlist. Returns `false` if it was not a member.
    #[instrument(skip(self))]
    pub async fn remove_track(&self, playlist_id: &str, track_id: &str) -> Result<bool> {
        let playlist_id = playlist_id.to_string();
        let track_id = track_id.to_string();
        self.on_writer(|inner| async move {
            inner.require_playlist(&playlist_id)?;

            let mut entries = inner.state.entries.get();
            let before = entries.len();
            entries.retain(|e| !(e.playlist_id == playlist_id && e.track_id == track_id));
            if entries.len() == before {
                return Ok(false);
            }
            densify(&mut entries, &playlist_id);
            inner.state.entries.publish(entries);
            inner.persist().await;

            inner.emit(LibraryEvent::PlaylistUpdated {
                playlist_id,
                change_type: "track_removed".to_string(),
            });
            Ok(true)
        })
        .await
    }

    /// Move a member to `new_position`, clamped to the playlist's length.
    ///
    /// Entries whose track is gone from the catalog are dropped first.
    #[instrument(skip(self))]
    pub async fn reorder(&self, playlist_id: &str, track_id: &str, new_position: usize) -> Result<()> {
        let playlist_id = playlist_id.to_string();
        let track_id = track_id.to_string();
        self.on_writer(|inner| async move {
            inner.require_playlist(&playlist_id)?;
            let known = inner.known_track_ids();

            let mut entries = inner.state.entries.get();
            let mut members: Vec<PlaylistEntry> = Vec::new();
            entries.retain(|e| {
                if e.playlist_id == playlist_id {
                    members.push(e.clone());
                    false
                } else {
                    true
                }
            });
            members.sort_by_key(|e| e.position);
            members.retain(|e| known.contains(&e.track_id));

            let from = members
                .iter()
                .position(|e| e.track_id == track_id)
                .ok_or_else(|| LibraryError::not_found("PlaylistEntry", &track_id))?;
            let moved = members.remove(from);
            let to = new_position.min(members.len());
            members.insert(to, moved);

            for (position, entry) in members.iter_mut().enumerate() {
                entry.position = position as u32;
            }
            entries.extend(members);
            inner.state.entries.publish(entries);
            inner.persist().await;

            inner.emit(LibraryEvent::PlaylistUpdated {
                playlist_id,
                change_type: "reordered".to_string(),
            });
            Ok(())
        })
        .await
    }

    /// Strip a track from every playlist. Returns the number of entries removed.
    #[instrument(skip(self))]
    pub async fn remove_track_from_all(&self, track_id: &str) -> Result<usize> {
        let ids = vec![track_id.to_string()];
        self.on_writer(|inner| async move { Ok(inner.strip_tracks(&ids).await) })
            .await
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn get(&self, id: &str) -> Option<Playlist> {
        self.inner
            .state
            .playlists
            .read(|playlists| playlists.iter().find(|p| p.id == id).cloned())
    }

    pub fn playlists(&self) -> Vec<Playlist> {
        self.inner.state.playlists.get()
    }

    /// Ordered tracks of a playlist, skipping entries whose track is gone.
    pub fn tracks_for(&self, playlist_id: &str) -> Vec<Track> {
        self.ordered_track_ids(playlist_id)
            .into_iter()
            .filter_map(|id| self.inner.catalog.get(&id))
            .filter(|t| t.is_completed())
            .collect()
    }

    pub fn track_count(&self, playlist_id: &str) -> usize {
        self.tracks_for(playlist_id).len()
    }

    pub fn contains(&self, playlist_id: &str, track_id: &str) -> bool {
        self.inner.state.entries.read(|entries| {
            entries
                .iter()
                .any(|e| e.playlist_id == playlist_id && e.track_id == track_id)
        })
    }

    /// Playlists that have `track_id` as a member.
    pub fn playlists_containing(&self, track_id: &str) -> Vec<Playlist> {
        let ids: HashSet<String> = self.inner.state.entries.read(|entries| {
            entries
                .iter()
                .filter(|e| e.track_id == track_id)
                .map(|e| e.playlist_id.clone())
                .collect()
        });
        self.inner
            .state
            .playlists
            .read(|playlists| playlists.iter().filter(|p| ids.contains(&p.id)).cloned().collect())
    }

    pub fn subscribe(&self) -> StateReceiver<Vec<Playlist>> {
        self.inner.state.playlists.subscribe()
    }

    fn ordered_track_ids(&self, playlist_id: &str) -> Vec<String> {
        let mut members: Vec<PlaylistEntry> = self.inner.state.entries.read(|entries| {
            entries
                .iter()
                .filter(|e| e.playlist_id == playlist_id)
                .cloned()
                .collect()
        });
        members.sort_by_key(|e| e.position);
        members.into_iter().map(|e| e.track_id).collect()
    }
}

impl std::fmt::Debug for PlaylistStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaylistStore")
            .field("playlists", &self.inner.state.playlists.read(Vec::len))
            .field("entries", &self.inner.state.entries.read(Vec::len))
            .finish()
    }
}

impl PlaylistInner {
    async fn load(&self) -> Result<Vec<Playlist>> {
        let playlists: Vec<Playlist> = self
            .read_records::<PlaylistDocument>(PLAYLISTS_DOCUMENT)
            .await
            .into_iter()
            .map(Playlist::from)
            .collect();
        let stored: Vec<PlaylistEntry> = self
            .read_records::<EntryDocument>(ENTRIES_DOCUMENT)
            .await
            .into_iter()
            .map(PlaylistEntry::from)
            .collect();

        let playlist_ids: HashSet<&str> = playlists.iter().map(|p| p.id.as_str()).collect();
        let known = self.known_track_ids();
        let mut seen = HashSet::new();
        let mut entries: Vec<PlaylistEntry> = stored
            .iter()
            .filter(|e| playlist_ids.contains(e.playlist_id.as_str()) && known.contains(&e.track_id))
            .filter(|e| seen.insert((e.playlist_id.clone(), e.track_id.clone())))
            .cloned()
            .collect();
        for playlist in &playlists {
            densify(&mut entries, &playlist.id);
        }

        let healed = entries.len() != stored.len() || entries.iter().zip(&stored).any(|(a, b)| a != b);
        self.state.playlists.publish(playlists.clone());
        self.state.entries.publish(entries);
        if healed {
            debug!("Playlist entries repaired on load");
            self.persist().await;
        }

        info!(playlists = playlists.len(), "Playlists loaded");
        Ok(playlists)
    }

    async fn read_records<T: serde::de::DeserializeOwned>(&self, document: &str) -> Vec<T> {
        match self.storage.read_document(document).await {
            Ok(Some(data)) => decode(document, &data).unwrap_or_else(|e| {
                warn!(document, error = %e, "Document is unreadable, starting empty");
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(document, error = %e, "Failed to read document, starting empty");
                Vec::new()
            }
        }
    }

    /// Rewrite both documents from the live state.
    async fn persist(&self) {
        let playlists: Vec<PlaylistDocument> = self
            .state
            .playlists
            .read(|playlists| playlists.iter().map(PlaylistDocument::from).collect());
        let entries: Vec<EntryDocument> = self
            .state
            .entries
            .read(|entries| entries.iter().map(EntryDocument::from).collect());

        if let Err(e) = self.write(PLAYLISTS_DOCUMENT, &playlists).await {
            warn!(error = %e, "Failed to persist playlists");
        }
        if let Err(e) = self.write(ENTRIES_DOCUMENT, &entries).await {
            warn!(error = %e, "Failed to persist playlist entries");
        }
    }

    async fn write<T: serde::Serialize>(&self, document: &str, records: &[T]) -> Result<()> {
        let data = encode(records)?;
        self.storage.write_document(document, data).await?;
        Ok(())
    }

    fn require_playlist(&self, id: &str) -> Result<()> {
        let exists = self
            .state
            .playlists
            .read(|playlists| playlists.iter().any(|p| p.id == id));
        if exists {
            Ok(())
        } else {
            Err(LibraryError::not_found("Playlist", id))
        }
    }

    fn known_track_ids(&self) -> HashSet<String> {
        self.catalog.completed().into_iter().map(|t| t.id).collect()
    }

    /// Remove every entry referencing one of `track_ids`.
    async fn strip_tracks(&self, track_ids: &[String]) -> usize {
        let doomed: HashSet<&str> = track_ids.iter().map(String::as_str).collect();

        let mut entries = self.state.entries.get();
        let mut touched = HashSet::new();
        entries.retain(|e| {
            if doomed.contains(e.track_id.as_str()) {
                touched.insert(e.playlist_id.clone());
                false
            } else {
                true
            }
        });
        if touched.is_empty() {
            return 0;
        }

        let removed = self.state.entries.read(Vec::len) - entries.len();
        for playlist_id in &touched {
            densify(&mut entries, playlist_id);
        }
        self.state.entries.publish(entries);
        self.persist().await;

        for playlist_id in touched {
            self.emit(LibraryEvent::PlaylistUpdated {
                playlist_id,
                change_type: "track_removed".to_string(),
            });
        }
        debug!(removed, "Stripped deleted tracks from playlists");
        removed
    }

    async fn delete_cover(&self, playlist_id: &str, cover: &Path) {
        if let Err(e) = self.storage.delete_file(cover).await {
            let name = cover.to_string_lossy();
            warn!(playlist_id, file = strip_path(&name), error = %e, "Failed to delete playlist cover");
        }
    }

    fn emit(&self, event: LibraryEvent) {
        let _ = self.events.emit(CoreEvent::Library(event));
    }
}

/// Reassign positions `0..N` to one playlist's entries, keeping their order.
pub(crate) fn densify(entries: &mut [PlaylistEntry], playlist_id: &str) {
    let mut members: Vec<&mut PlaylistEntry> = entries
        .iter_mut()
        .filter(|e| e.playlist_id == playlist_id)
        .collect();
    members.sort_by_key(|e| e.position);
    for (position, entry) in members.into_iter().enumerate() {
        entry.position = position as u32;
    }
}

/// Runs on the catalog's writer job, so it works on the state directly.
struct PlaylistCascade {
    inner: Arc<PlaylistInner>,
}

#[async_trait]
impl CatalogListener for PlaylistCascade {
    async fn on_track_deleted(&self, track_id: &str) {
        self.inner.strip_tracks(&[track_id.to_string()]).await;
    }

    async fn on_catalog_cleared(&self, track_ids: &[String]) {
        self.inner.strip_tracks(track_ids).await;
    }
}
