//! Observable state shared by the stores and the download orchestrator

use core_runtime::StateCell;
use std::collections::HashMap;

use crate::models::{DownloadProgress, Playlist, PlaylistEntry, Track};

/// Every observable container the core publishes.
///
/// Cloning is cheap and clones observe the same cells.
#[derive(Clone, Debug, Default)]
pub struct StateBus {
    /// Live catalog list, transient records included
    pub tracks: StateCell<Vec<Track>>,
    /// Progress of running jobs, keyed by job id
    pub progress: StateCell<HashMap<String, DownloadProgress>>,
    pub last_error: StateCell<Option<String>>,
    pub playlists: StateCell<Vec<Playlist>>,
    /// Entries of every playlist
    pub entries: StateCell<Vec<PlaylistEntry>>,
}

impl StateBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_error(&self, message: impl Into<String>) {
        self.last_error.publish(Some(message.into()));
    }

    pub fn clear_error(&self) {
        self.last_error.update_if(|err| err.take().is_some());
    }

    pub fn set_progress(&self, job_id: &str, progress: DownloadProgress) {
        self.progress.update(|map| {
            map.insert(job_id.to_string(), progress);
        });
    }

    pub fn clear_progress(&self, job_id: &str) {
        self.progress.update_if(|map| map.remove(job_id).is_some());
    }
}
