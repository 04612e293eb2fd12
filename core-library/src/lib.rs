//! # Library Management Module
//!
//! Owns the offline catalog and the user's playlists.
//!
//! ## Overview
//!
//! This module manages:
//! - Track, playlist and progress models
//! - The persisted JSON document schemas
//! - The [`StateBus`] of observable containers
//! - [`CatalogStore`]: downloaded tracks, play statistics and favorites
//! - [`PlaylistStore`]: ordered memberships, kept consistent with the catalog
//!
//! Both stores serialize their mutations on one shared
//! [`WriterContext`](core_runtime::WriterContext).

pub mod catalog;
pub mod documents;
pub mod error;
pub mod models;
pub mod playlists;
pub mod state;

pub use catalog::{CatalogListener, CatalogStore};
pub use error::{LibraryError, Result};
pub use models::{
    ChapterSpec, DownloadProgress, Playlist, PlaylistEntry, Track, TrackStatus, UNKNOWN_ARTIST,
};
pub use playlists::PlaylistStore;
pub use state::StateBus;
