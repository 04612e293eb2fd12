//! Persisted document schemas
//!
//! The catalog and playlists are stored as three JSON documents, each an
//! array of flat objects with camelCase keys. Whole documents are rewritten
//! on every mutation through [`StorageGateway::write_document`].
//!
//! Decoding is lenient per record: a malformed object is skipped with a
//! warning instead of discarding the whole document.
//!
//! [`StorageGateway::write_document`]: bridge_traits::storage::StorageGateway::write_document

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

use crate::error::Result;
use crate::models::{Playlist, PlaylistEntry, Track, TrackStatus, UNKNOWN_ARTIST};

pub const TRACKS_DOCUMENT: &str = "tracks.json";
pub const PLAYLISTS_DOCUMENT: &str = "playlists.json";
pub const ENTRIES_DOCUMENT: &str = "playlist_entries.json";

/// One Completed track as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackDocument {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub artist: String,
    pub file_path: String,
    #[serde(default)]
    pub source_url: String,
    #[serde(default)]
    pub duration_ms: i64,
    #[serde(default)]
    pub file_size_bytes: i64,
    #[serde(default)]
    pub download_date_ms: i64,
    #[serde(default)]
    pub play_count: u64,
    #[serde(default)]
    pub last_played_ms: i64,
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_ms: Option<i64>,
}

impl TrackDocument {
    /// Document form of `track`, or `None` if the track must not be persisted.
    pub fn from_track(track: &Track) -> Option<Self> {
        if track.status != TrackStatus::Completed {
            return None;
        }
        let path = track.local_path.as_ref()?;
        let file_path = path.to_string_lossy().into_owned();
        if file_path.is_empty() {
            return None;
        }

        Some(Self {
            id: track.id.clone(),
            title: track.title.clone(),
            artist: track.artist.clone(),
            file_path,
            source_url: track.source_url.clone(),
            duration_ms: track.duration_ms,
            file_size_bytes: track.file_size_bytes,
            download_date_ms: track.download_timestamp,
            play_count: track.play_count,
            last_played_ms: track.last_played_timestamp,
            is_favorite: track.is_favorite,
            thumbnail_url: track.thumbnail_url.clone(),
            start_ms: track.start_ms,
            end_ms: track.end_ms,
        })
    }

    pub fn into_track(self) -> Track {
        let artist = if self.artist.trim().is_empty() {
            UNKNOWN_ARTIST.to_string()
        } else {
            self.artist
        };

        Track {
            id: self.id,
            title: self.title,
            artist,
            local_path: Some(PathBuf::from(self.file_path)),
            source_url: self.source_url,
            duration_ms: self.duration_ms,
            file_size_bytes: self.file_size_bytes,
            download_timestamp: self.download_date_ms,
            play_count: self.play_count,
            last_played_timestamp: self.last_played_ms,
            is_favorite: self.is_favorite,
            thumbnail_url: self.thumbnail_url,
            status: TrackStatus::Completed,
            progress_percent: 100,
            error_message: None,
            start_ms: self.start_ms,
            end_ms: self.end_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistDocument {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub cover_path: Option<String>,
}

impl From<&Playlist> for PlaylistDocument {
    fn from(playlist: &Playlist) -> Self {
        Self {
            id: playlist.id.clone(),
            name: playlist.name.clone(),
            description: playlist.description.clone(),
            cover_path: playlist
                .cover_image_path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
        }
    }
}

impl From<PlaylistDocument> for Playlist {
    fn from(doc: PlaylistDocument) -> Self {
        Self {
            id: doc.id,
            name: doc.name,
            description: doc.description,
            cover_image_path: doc.cover_path.filter(|p| !p.is_empty()).map(PathBuf::from),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryDocument {
    pub playlist_id: String,
    pub track_id: String,
    pub position: u32,
}

impl From<&PlaylistEntry> for EntryDocument {
    fn from(entry: &PlaylistEntry) -> Self {
        Self {
            playlist_id: entry.playlist_id.clone(),
            track_id: entry.track_id.clone(),
            position: entry.position,
        }
    }
}

impl From<EntryDocument> for PlaylistEntry {
    fn from(doc: EntryDocument) -> Self {
        Self {
            playlist_id: doc.playlist_id,
            track_id: doc.track_id,
            position: doc.position,
        }
    }
}

/// Serialize `records` as a JSON array.
pub fn encode<T: Serialize>(records: &[T]) -> Result<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(records)?))
}

/// Parse a JSON array, skipping records that do not match `T`.
///
/// Fails only when `data` is not a JSON array at all.
pub fn decode<T: DeserializeOwned>(document: &str, data: &[u8]) -> Result<Vec<T>> {
    let values: Vec<serde_json::Value> = serde_json::from_slice(data)?;

    let mut records = Vec::with_capacity(values.len());
    for (index, value) in values.into_iter().enumerate() {
        match serde_json::from_value(value) {
            Ok(record) => records.push(record),
            Err(e) => warn!(document, index, error = %e, "Skipping malformed record"),
        }
    }
    Ok(records)
}
