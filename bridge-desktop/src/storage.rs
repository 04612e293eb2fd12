//! Storage Gateway Implementation using Tokio

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::{MediaFile, StorageGateway},
};
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

const APP_DIR_NAME: &str = "offline-audio-core";
const MEDIA_DIR_NAME: &str = "media";
/// Upper bound on `-N` suffixes tried before giving up on a file name.
const MAX_NAME_SUFFIX: u32 = 10_000;

/// Tokio-based storage gateway
///
/// Documents live directly under the data directory; media files live under
/// the media directory, which defaults to `<data_dir>/media`.
#[derive(Debug, Clone)]
pub struct TokioStorageGateway {
    data_dir: PathBuf,
    media_dir: PathBuf,
}

impl TokioStorageGateway {
    /// Create a gateway rooted at the platform's local data directory
    pub fn new() -> Self {
        let data_dir = dirs::data_local_dir()
            .or_else(dirs::data_dir)
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".local")
                    .join("share")
            })
            .join(APP_DIR_NAME);

        Self::with_data_dir(data_dir)
    }

    /// Create a gateway rooted at `data_dir`, with media under `data_dir/media`
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        let media_dir = data_dir.join(MEDIA_DIR_NAME);
        Self { data_dir, media_dir }
    }

    /// Create a gateway with custom directories
    pub fn with_directories(data_dir: PathBuf, media_dir: PathBuf) -> Self {
        Self { data_dir, media_dir }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn map_io_error(e: std::io::Error) -> BridgeError {
        BridgeError::Io(e)
    }

    async fn ensure_dir(path: &Path) -> Result<()> {
        if !fs::try_exists(path).await.map_err(Self::map_io_error)? {
            fs::create_dir_all(path).await.map_err(Self::map_io_error)?;
            debug!(dir = ?path.file_name(), "Created directory");
        }
        Ok(())
    }

    fn document_path(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(BridgeError::OperationFailed(format!(
                "Invalid document name: {:?}",
                name
            )));
        }
        Ok(self.data_dir.join(name))
    }
}

impl Default for TokioStorageGateway {
    fn default() -> Self {
        Self::new()
    }
}

/// Candidate file name for the `n`-th collision: `song.mp3`, `song-1.mp3`, ...
pub(crate) fn numbered_name(file_name: &str, n: u32) -> String {
    if n == 0 {
        return file_name.to_string();
    }
    match file_name.rfind('.') {
        Some(dot) if dot > 0 => format!("{}-{}{}", &file_name[..dot], n, &file_name[dot..]),
        _ => format!("{}-{}", file_name, n),
    }
}

#[async_trait]
impl StorageGateway for TokioStorageGateway {
    async fn media_directory(&self) -> Result<PathBuf> {
        Self::ensure_dir(&self.media_dir).await?;
        Ok(self.media_dir.clone())
    }

    async fn available_bytes(&self) -> Result<u64> {
        let dir = self.media_directory().await?;
        let available = tokio::task::spawn_blocking(move || fs2::available_space(&dir))
            .await
            .map_err(|e| BridgeError::OperationFailed(format!("Space query aborted: {}", e)))?
            .map_err(Self::map_io_error)?;

        debug!(available, "Queried free space");
        Ok(available)
    }

    async fn write_document(&self, name: &str, data: Bytes) -> Result<()> {
        let path = self.document_path(name)?;
        Self::ensure_dir(&self.data_dir).await?;

        // Write next to the target and rename so readers never see a torn file.
        let tmp_path = self.data_dir.join(format!("{}.tmp", name));
        let mut file = fs::File::create(&tmp_path)
            .await
            .map_err(Self::map_io_error)?;
        file.write_all(data.as_ref())
            .await
            .map_err(Self::map_io_error)?;
        file.sync_all().await.map_err(Self::map_io_error)?;
        drop(file);

        fs::rename(&tmp_path, &path)
            .await
            .map_err(Self::map_io_error)?;
        debug!(document = name, size = data.len(), "Wrote document");
        Ok(())
    }

    async fn read_document(&self, name: &str) -> Result<Option<Bytes>> {
        let path = self.document_path(name)?;
        match fs::read(&path).await {
            Ok(data) => {
                debug!(document = name, size = data.len(), "Read document");
                Ok(Some(Bytes::from(data)))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Self::map_io_error(e)),
        }
    }

    async fn create_media_file(&self, file_name: &str) -> Result<MediaFile> {
        let dir = self.media_directory().await?;

        for n in 0..MAX_NAME_SUFFIX {
            let path = dir.join(numbered_name(file_name, n));
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => {
                    debug!(file = ?path.file_name(), "Created media file");
                    return Ok(MediaFile {
                        path,
                        writer: Box::new(file),
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(Self::map_io_error(e)),
            }
        }

        Err(BridgeError::OperationFailed(format!(
            "No free file name for {}",
            file_name
        )))
    }

    async fn file_exists(&self, path: &Path) -> Result<bool> {
        fs::try_exists(path).await.map_err(Self::map_io_error)
    }

    async fn file_size(&self, path: &Path) -> Result<Option<u64>> {
        match fs::metadata(path).await {
            Ok(metadata) => Ok(Some(metadata.len())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Self::map_io_error(e)),
        }
    }

    async fn delete_file(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path).await {
            Ok(()) => {
                debug!(file = ?path.file_name(), "Deleted file");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::map_io_error(e)),
        }
    }
}
