use bridge_traits::error::BridgeError;
use core_download::DownloadError;
use core_library::LibraryError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    #[error(transparent)]
    Runtime(#[from] core_runtime::Error),

    #[error("Library error: {0}")]
    Library(#[from] LibraryError),

    #[error("Download error: {0}")]
    Download(#[from] DownloadError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),
}

pub type Result<T> = std::result::Result<T, CoreError>;
