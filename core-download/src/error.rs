use bridge_traits::error::BridgeError;
use core_library::LibraryError;
use thiserror::Error;

const MEGABYTE: f64 = 1024.0 * 1024.0;

fn megabytes(bytes: &u64) -> f64 {
    *bytes as f64 / MEGABYTE
}

/// Why a download attempt did not produce a file.
#[derive(Error, Debug)]
pub enum DownloadError {
    /// The server answered with a non-success status.
    #[error("HTTP {status}")]
    Http { status: u16 },

    #[error(
        "Insufficient space: {:.1} MB required, {:.1} MB available",
        megabytes(.required_bytes),
        megabytes(.available_bytes)
    )]
    InsufficientSpace {
        required_bytes: u64,
        available_bytes: u64,
    },

    /// Connection failure, timeout or a reset mid-stream.
    #[error("Network error: {0}")]
    Network(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Download cancelled")]
    Cancelled,

    /// The stream resolver could not turn a source reference into a URL.
    #[error("Resolve error: {0}")]
    Resolve(String),

    #[error("Library error: {0}")]
    Library(#[from] LibraryError),
}

impl DownloadError {
    /// Whether another attempt could succeed.
    ///
    /// Admission failures (bad status, no space) and cancellation are final.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DownloadError::Network(_) | DownloadError::Io(_) | DownloadError::Storage(_)
        )
    }
}

impl From<BridgeError> for DownloadError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Network(message) => DownloadError::Network(message),
            BridgeError::Timeout(message) => DownloadError::Network(format!("timed out: {message}")),
            BridgeError::Io(e) => DownloadError::Io(e.to_string()),
            other => DownloadError::Storage(other.to_string()),
        }
    }
}

impl From<std::io::Error> for DownloadError {
    fn from(err: std::io::Error) -> Self {
        DownloadError::Io(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DownloadError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_space_message() {
        let err = DownloadError::InsufficientSpace {
            required_bytes: 10 * 1024 * 1024,
            available_bytes: 5 * 1024 * 1024,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient space: 10.0 MB required, 5.0 MB available"
        );
    }

    #[test]
    fn test_retry_classification() {
        assert!(DownloadError::Network("reset".into()).is_retryable());
        assert!(DownloadError::Io("disk".into()).is_retryable());
        assert!(!DownloadError::Http { status: 503 }.is_retryable());
        assert!(!DownloadError::Cancelled.is_retryable());
        assert!(!DownloadError::InsufficientSpace {
            required_bytes: 2,
            available_bytes: 1
        }
        .is_retryable());
    }

    #[test]
    fn test_bridge_errors_map_to_transient_kinds() {
        let timeout: DownloadError = BridgeError::Timeout("read".into()).into();
        assert!(matches!(timeout, DownloadError::Network(_)));

        let io: DownloadError = BridgeError::Io(std::io::Error::other("full")).into();
        assert!(matches!(io, DownloadError::Io(_)));
        assert_eq!(DownloadError::Http { status: 404 }.to_string(), "HTTP 404");
    }
}
