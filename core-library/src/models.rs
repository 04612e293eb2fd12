//! Domain models for the offline catalog
//!
//! A [`Track`] is one downloaded (or downloading) audio resource. Only
//! Completed tracks are durable; the other statuses exist in the live list
//! while a job is running or after it failed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Artist recorded when neither the caller nor the source provides one.
pub const UNKNOWN_ARTIST: &str = "Unknown Artist";

// =============================================================================
// Track
// =============================================================================

/// Download lifecycle of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackStatus {
    Pending,
    Downloading,
    Completed,
    Failed,
}

impl TrackStatus {
    /// Completed and Failed are terminal: no further transition happens.
    pub fn is_terminal(self) -> bool {
        matches!(self, TrackStatus::Completed | TrackStatus::Failed)
    }
}

impl fmt::Display for TrackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TrackStatus::Pending => "pending",
            TrackStatus::Downloading => "downloading",
            TrackStatus::Completed => "completed",
            TrackStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Downloaded audio track
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    /// Unique identifier, equal to the id of the job that produced it
    pub id: String,
    pub title: String,
    pub artist: String,
    /// Backing file. `None` until the download completes.
    pub local_path: Option<PathBuf>,
    pub source_url: String,
    pub duration_ms: i64,
    pub file_size_bytes: i64,
    /// Unix epoch milliseconds
    pub download_timestamp: i64,
    pub play_count: u64,
    /// Unix epoch milliseconds, 0 when never played
    pub last_played_timestamp: i64,
    pub is_favorite: bool,
    pub thumbnail_url: Option<String>,
    pub status: TrackStatus,
    pub progress_percent: u8,
    /// Set only when `status` is Failed
    pub error_message: Option<String>,
    /// Chapter start inside a shared file, in milliseconds
    pub start_ms: Option<i64>,
    /// Chapter end inside a shared file, in milliseconds
    pub end_ms: Option<i64>,
}

impl Track {
    /// A freshly accepted download request.
    pub fn pending(
        id: impl Into<String>,
        source_url: impl Into<String>,
        title: impl Into<String>,
        artist: impl Into<String>,
        thumbnail_url: Option<String>,
        now_ms: i64,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artist: artist.into(),
            local_path: None,
            source_url: source_url.into(),
            duration_ms: 0,
            file_size_bytes: 0,
            download_timestamp: now_ms,
            play_count: 0,
            last_played_timestamp: 0,
            is_favorite: false,
            thumbnail_url,
            status: TrackStatus::Pending,
            progress_percent: 0,
            error_message: None,
            start_ms: None,
            end_ms: None,
        }
    }

    /// This record finished downloading into `path`.
    pub fn completed(mut self, path: PathBuf, file_size_bytes: i64, now_ms: i64) -> Self {
        self.local_path = Some(path);
        self.file_size_bytes = file_size_bytes;
        self.download_timestamp = now_ms;
        self.status = TrackStatus::Completed;
        self.progress_percent = 100;
        self.error_message = None;
        self
    }

    /// This record gave up with `message`.
    pub fn failed(mut self, message: impl Into<String>) -> Self {
        self.local_path = None;
        self.status = TrackStatus::Failed;
        self.error_message = Some(message.into());
        self
    }

    pub fn is_completed(&self) -> bool {
        self.status == TrackStatus::Completed
    }

    /// Validate track data
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("Track id cannot be empty".to_string());
        }

        if self.title.trim().is_empty() {
            return Err("Track title cannot be empty".to_string());
        }

        if self.status == TrackStatus::Completed && self.local_path.is_none() {
            return Err("Completed track must have a local path".to_string());
        }

        if self.status == TrackStatus::Failed && self.error_message.is_none() {
            return Err("Failed track must carry an error message".to_string());
        }

        if let (Some(start), Some(end)) = (self.start_ms, self.end_ms) {
            if start < 0 || end <= start {
                return Err(format!("Invalid chapter range {}..{}", start, end));
            }
        }

        Ok(())
    }
}

/// One chapter to carve out of a completed track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterSpec {
    pub title: String,
    pub start_ms: i64,
    pub end_ms: i64,
}

// =============================================================================
// Playlists
// =============================================================================

/// User-curated playlist
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Playlist {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub cover_image_path: Option<PathBuf>,
}

impl Playlist {
    /// Create a new playlist with a generated id
    pub fn new(name: impl Into<String>, description: Option<String>, cover_image_path: Option<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            description,
            cover_image_path,
        }
    }

    /// Validate playlist data
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Playlist name cannot be empty".to_string());
        }

        if self.id.trim().is_empty() {
            return Err("Playlist id cannot be empty".to_string());
        }

        Ok(())
    }
}

/// Membership of a track in a playlist.
///
/// Positions of one playlist's entries are always exactly `0..N`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlaylistEntry {
    pub playlist_id: String,
    pub track_id: String,
    pub position: u32,
}

// =============================================================================
// Download progress
// =============================================================================

/// Live progress of one download job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DownloadProgress {
    pub bytes_downloaded: u64,
    /// 0 when the server did not advertise a length
    pub total_bytes: u64,
    /// 0-100
    pub percent: u8,
    pub bytes_per_second: u64,
}

impl DownloadProgress {
    /// Progress for `bytes_downloaded` out of `total_bytes` (0 = unknown).
    pub fn new(bytes_downloaded: u64, total_bytes: u64, bytes_per_second: u64) -> Self {
        Self {
            bytes_downloaded,
            total_bytes,
            percent: percent_of(bytes_downloaded, total_bytes),
            bytes_per_second,
        }
    }
}

/// `floor(read * 100 / total)` clamped to 0..=100, or 0 when `total` is unknown.
pub fn percent_of(read: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let percent = (u128::from(read) * 100) / u128::from(total);
    percent.min(100) as u8
}
