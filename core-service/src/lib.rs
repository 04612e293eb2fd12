//! Core service façade.
//!
//! Builds every store from a [`CoreConfig`] and hands host applications one
//! handle to the catalog, the playlists, the download orchestrator and the
//! observable state. Desktop apps typically enable the `desktop-shims`
//! feature, which lets `CoreConfig::builder()` fill in the `bridge-desktop`
//! implementations for any bridge the host does not inject.
//!
//! ```no_run
//! # async fn example() -> core_service::Result<()> {
//! use core_runtime::config::CoreConfig;
//! use core_service::{CoreService, DownloadRequest};
//!
//! let config = CoreConfig::builder().data_dir("/path/to/app-data").build()?;
//! let core = CoreService::start(config).await?;
//!
//! let job_id = core.download(DownloadRequest::new("https://cdn.example.com/song.mp3"));
//! let mut state = core.state().tracks.subscribe();
//! state.changed().await.ok();
//! # let _ = job_id;
//! # Ok(())
//! # }
//! ```

pub mod error;

pub use error::{CoreError, Result};

pub use core_download::{DownloadOrchestrator, DownloadRequest, ResolvedStream, StreamResolver};
pub use core_library::{CatalogStore, PlaylistStore, StateBus};
pub use core_runtime::config::CoreConfig;

use std::sync::Arc;

use core_runtime::events::{CoreEvent, EventBus, EventStream};
use core_runtime::WriterContext;
use tracing::{debug, info, instrument};

/// Settings key for deleting non-favorite tracks once they finish playing.
pub const AUTO_DELETE_AFTER_PLAYBACK: &str = "auto_delete_after_playback";

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct CoreService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    config: CoreConfig,
    writer: WriterContext,
    state: StateBus,
    events: EventBus,
    catalog: CatalogStore,
    playlists: PlaylistStore,
    downloads: DownloadOrchestrator,
}

impl CoreService {
    /// Build the stores, load persisted state and return the running service.
    ///
    /// The catalog loads first so playlist entries are checked against the
    /// healed catalog.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[instrument(skip(config), fields(data_dir = %config.data_dir.display()))]
    pub async fn start(config: CoreConfig) -> Result<Self> {
        config.validate()?;

        let writer = WriterContext::spawn();
        let state = StateBus::new();
        let events = EventBus::new(config.event_buffer_size);

        let catalog = CatalogStore::new(
            config.storage.clone(),
            config.clock.clone(),
            writer.clone(),
            state.clone(),
            events.clone(),
        );
        let playlists = PlaylistStore::new(
            config.storage.clone(),
            writer.clone(),
            state.clone(),
            events.clone(),
            catalog.clone(),
        );

        let tracks = catalog.load().await?;
        let lists = playlists.load().await?;
        catalog.add_listener(playlists.cascade());

        let downloads = DownloadOrchestrator::new(
            config.http_client.clone(),
            config.storage.clone(),
            config.clock.clone(),
            catalog.clone(),
            state.clone(),
            events.clone(),
            config.download.clone(),
        );

        info!(
            tracks = tracks.len(),
            playlists = lists.len(),
            "Core service started"
        );

        Ok(Self {
            inner: Arc::new(ServiceInner {
                config,
                writer,
                state,
                events,
                catalog,
                playlists,
                downloads,
            }),
        })
    }

    pub fn config(&self) -> &CoreConfig {
        &self.inner.config
    }

    pub fn catalog(&self) -> &CatalogStore {
        &self.inner.catalog
    }

    pub fn playlists(&self) -> &PlaylistStore {
        &self.inner.playlists
    }

    pub fn downloads(&self) -> &DownloadOrchestrator {
        &self.inner.downloads
    }

    /// Observable tracks, progress, last error, playlists and entries.
    pub fn state(&self) -> &StateBus {
        &self.inner.state
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Subscribe to every event published from now on.
    pub fn subscribe_events(&self) -> EventStream {
        EventStream::new(self.inner.events.subscribe())
    }

    /// Subscribe to download events only.
    pub fn subscribe_downloads(&self) -> EventStream {
        self.subscribe_events()
            .filter(|event| matches!(event, CoreEvent::Download(_)))
    }

    /// Start a download. See [`DownloadOrchestrator::submit`].
    pub fn download(&self, request: DownloadRequest) -> String {
        self.inner.downloads.submit(request)
    }

    pub fn cancel_download(&self, job_id: &str) -> bool {
        self.inner.downloads.cancel(job_id)
    }

    /// Remove a track the user no longer wants, whatever its state.
    ///
    /// A running download is cancelled, which discards its record. Anything
    /// else goes through [`CatalogStore::delete`]. Returns `false` if
    /// `track_id` is unknown.
    #[instrument(skip(self))]
    pub async fn delete_track(&self, track_id: &str) -> Result<bool> {
        if self.inner.downloads.cancel(track_id) {
            info!("Cancelled download of deleted track");
            return Ok(true);
        }
        Ok(self.inner.catalog.delete(track_id).await?)
    }

    /// Called by the player once `track_id` has played to the end.
    ///
    /// Deletes the track if auto-delete is enabled and the track is not a
    /// favorite. Returns whether it was deleted.
    #[instrument(skip(self))]
    pub async fn on_playback_finished(&self, track_id: &str) -> Result<bool> {
        if !self.auto_delete_after_playback().await? {
            return Ok(false);
        }

        let catalog = &self.inner.catalog;
        match catalog.get(track_id) {
            Some(track) if track.is_completed() && !track.is_favorite => {
                let deleted = catalog.delete(track_id).await?;
                if deleted {
                    info!("Deleted track after playback");
                }
                Ok(deleted)
            }
            Some(_) => Ok(false),
            None => {
                debug!("Finished track is not in the catalog");
                Ok(false)
            }
        }
    }

    /// Defaults to `false` when the setting was never written.
    pub async fn auto_delete_after_playback(&self) -> Result<bool> {
        let value = self
            .inner
            .config
            .settings_store
            .get_bool(AUTO_DELETE_AFTER_PLAYBACK)
            .await?;
        Ok(value.unwrap_or(false))
    }

    pub async fn set_auto_delete_after_playback(&self, enabled: bool) -> Result<()> {
        self.inner
            .config
            .settings_store
            .set_bool(AUTO_DELETE_AFTER_PLAYBACK, enabled)
            .await?;
        Ok(())
    }

    /// Bytes used by completed downloads.
    pub async fn total_storage_used(&self) -> u64 {
        self.inner.catalog.total_storage_used().await
    }

    /// Free space on the volume holding the media directory.
    pub async fn available_bytes(&self) -> Result<u64> {
        Ok(self.inner.config.storage.available_bytes().await?)
    }

    /// Cancel every running download and wait for queued writes to land.
    pub async fn shutdown(&self) -> Result<()> {
        self.inner.downloads.shutdown();
        self.inner.writer.flush().await?;
        info!("Core service stopped");
        Ok(())
    }
}

impl std::fmt::Debug for CoreService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreService")
            .field("config", &self.inner.config)
            .field("active_jobs", &self.inner.downloads.active_jobs().len())
            .finish()
    }
}
