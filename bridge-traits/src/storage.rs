//! Storage Abstractions
//!
//! Provides platform-agnostic traits for the media directory, small persisted
//! documents and key-value settings storage.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWrite;

use crate::error::Result;

/// A freshly created media file opened for writing.
///
/// `path` is the final location of the file; the name may differ from the
/// requested one when a file with that name already existed.
pub struct MediaFile {
    pub path: PathBuf,
    pub writer: Box<dyn AsyncWrite + Send + Unpin>,
}

impl fmt::Debug for MediaFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaFile")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Storage gateway trait
///
/// Abstracts where downloaded media and persisted documents live:
/// - Desktop: a data directory under the user's local data folder
/// - iOS/Android: the app sandbox
///
/// Documents are small serialized blobs addressed by name. Writes must be
/// atomic: a reader either sees the previous content or the new content,
/// never a truncated mix.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::StorageGateway;
///
/// async fn save(storage: &dyn StorageGateway, json: Vec<u8>) -> Result<()> {
///     storage.write_document("tracks.json", json.into()).await?;
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait StorageGateway: Send + Sync {
    /// Directory that holds downloaded media. Created on demand.
    async fn media_directory(&self) -> Result<PathBuf>;

    /// Free space, in bytes, on the volume backing the media directory.
    async fn available_bytes(&self) -> Result<u64>;

    /// Atomically replace the document called `name`.
    async fn write_document(&self, name: &str, data: Bytes) -> Result<()>;

    /// Read the document called `name`.
    ///
    /// # Returns
    ///
    /// Returns `Ok(None)` if the document has never been written.
    async fn read_document(&self, name: &str) -> Result<Option<Bytes>>;

    /// Exclusively create a new file in the media directory.
    ///
    /// When `file_name` is taken, a numeric suffix is inserted before the
    /// extension (`song.mp3`, `song-1.mp3`, `song-2.mp3`, ...).
    async fn create_media_file(&self, file_name: &str) -> Result<MediaFile>;

    /// Check if a file exists
    async fn file_exists(&self, path: &Path) -> Result<bool>;

    /// Size of a file on disk, or `None` if it does not exist.
    async fn file_size(&self, path: &Path) -> Result<Option<u64>>;

    /// Delete a file. Deleting a missing file is not an error.
    async fn delete_file(&self, path: &Path) -> Result<()>;
}

/// Key-value settings storage trait
///
/// Abstracts platform-specific preferences/settings storage:
/// - iOS: UserDefaults
/// - Android: SharedPreferences / DataStore
/// - Desktop: Config files or OS-specific preferences
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::SettingsStore;
///
/// async fn save_preference(store: &dyn SettingsStore) -> Result<()> {
///     store.set_bool("auto_delete_after_playback", true).await?;
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Store a string value
    async fn set_string(&self, key: &str, value: &str) -> Result<()>;

    /// Retrieve a string value
    async fn get_string(&self, key: &str) -> Result<Option<String>>;

    /// Store a boolean value
    async fn set_bool(&self, key: &str, value: bool) -> Result<()>;

    /// Retrieve a boolean value
    async fn get_bool(&self, key: &str) -> Result<Option<bool>>;

    /// Store an integer value
    async fn set_i64(&self, key: &str, value: i64) -> Result<()>;

    /// Retrieve an integer value
    async fn get_i64(&self, key: &str) -> Result<Option<i64>>;

    /// Delete a setting
    async fn delete(&self, key: &str) -> Result<()>;

    /// Check if a setting exists
    async fn has_key(&self, key: &str) -> Result<bool>;

    /// List all setting keys
    async fn list_keys(&self) -> Result<Vec<String>>;
}
