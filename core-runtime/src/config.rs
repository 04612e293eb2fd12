//! # Core Configuration Module
//!
//! Provides configuration management for the offline audio core.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `CoreConfig`
//! instance that holds all bridges and settings the core needs. It enforces
//! fail-fast validation so a misconfigured host finds out at startup rather
//! than on the first download.
//!
//! ## Dependencies
//!
//! - `StorageGateway` - Media directory, free space, persisted documents
//! - `HttpClient` - Streaming downloads
//! - `SettingsStore` - User preferences
//! - `Clock` - Timestamps (defaults to the system clock everywhere)
//!
//! When the `desktop-shims` feature is enabled, desktop-ready defaults for the
//! first three are injected automatically if not provided. Without it a
//! missing bridge yields [`Error::CapabilityMissing`].
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{CoreConfig, DownloadSettings};
//! use std::time::Duration;
//!
//! let config = CoreConfig::builder()
//!     .data_dir("/path/to/app-data")
//!     .download_settings(DownloadSettings {
//!         read_timeout: Duration::from_secs(60),
//!         ..DownloadSettings::default()
//!     })
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use bridge_traits::{Clock, HttpClient, SettingsStore, StorageGateway, SystemClock};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Name of the media directory inside the data directory.
pub const MEDIA_DIR_NAME: &str = "media";

/// Tuning for the download engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSettings {
    /// Time allowed to establish a connection.
    pub connect_timeout: Duration,
    /// Time allowed between two reads of the response body.
    pub read_timeout: Duration,
    /// User agent presented on every request.
    pub user_agent: String,
    /// Bytes written to disk per write call.
    pub chunk_size: usize,
    /// Minimum time between two progress samples.
    pub progress_interval: Duration,
    /// Attempts per job, including the first one.
    pub max_attempts: u32,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            read_timeout: Duration::from_secs(120),
            user_agent: concat!("offline-audio-core/", env!("CARGO_PKG_VERSION")).to_string(),
            chunk_size: 8 * 1024,
            progress_interval: Duration::from_millis(500),
            max_attempts: 2,
        }
    }
}

impl DownloadSettings {
    /// Validates the settings
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout.is_zero() || self.read_timeout.is_zero() {
            return Err(Error::Config(
                "Download timeouts must be greater than zero".to_string(),
            ));
        }

        if self.user_agent.trim().is_empty() {
            return Err(Error::Config("User agent cannot be empty".to_string()));
        }

        if self.chunk_size == 0 {
            return Err(Error::Config(
                "Download chunk size must be greater than 0 bytes".to_string(),
            ));
        }

        if self.progress_interval.is_zero() {
            return Err(Error::Config(
                "Progress interval must be greater than zero".to_string(),
            ));
        }

        if self.max_attempts == 0 {
            return Err(Error::Config(
                "Downloads need at least one attempt".to_string(),
            ));
        }

        Ok(())
    }
}

/// Core configuration for the offline audio core.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Directory for persisted documents
    pub data_dir: PathBuf,

    /// Directory for downloaded media
    pub media_dir: PathBuf,

    pub storage: Arc<dyn StorageGateway>,

    /// HTTP client for downloads. When injected by the host, its own timeouts
    /// apply instead of those in `download`.
    pub http_client: Arc<dyn HttpClient>,

    pub settings_store: Arc<dyn SettingsStore>,

    pub clock: Arc<dyn Clock>,

    /// Event bus channel capacity
    pub event_buffer_size: usize,

    pub download: DownloadSettings,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("data_dir", &self.data_dir)
            .field("media_dir", &self.media_dir)
            .field("storage", &"StorageGateway { ... }")
            .field("http_client", &"HttpClient { ... }")
            .field("settings_store", &"SettingsStore { ... }")
            .field("clock", &"Clock { ... }")
            .field("event_buffer_size", &self.event_buffer_size)
            .field("download", &self.download)
            .finish()
    }
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(Error::Config("Data directory cannot be empty".to_string()));
        }

        if self.media_dir.as_os_str().is_empty() {
            return Err(Error::Config("Media directory cannot be empty".to_string()));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        self.download.validate()
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn missing(capability: &str, purpose: &str, mobile: &str) -> Error {
    Error::CapabilityMissing {
        capability: capability.to_string(),
        message: format!(
            "{} implementation is required for {}. \
             Desktop: ensure the 'desktop-shims' feature is enabled. \
             Mobile: inject {}.",
            capability, purpose, mobile
        ),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_storage(data_dir: &Path, media_dir: &Path) -> Result<Arc<dyn StorageGateway>> {
    use bridge_desktop::TokioStorageGateway;

    let storage: Arc<dyn StorageGateway> = Arc::new(TokioStorageGateway::with_directories(
        data_dir.to_path_buf(),
        media_dir.to_path_buf(),
    ));
    Ok(storage)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_storage(_data_dir: &Path, _media_dir: &Path) -> Result<Arc<dyn StorageGateway>> {
    Err(missing(
        "StorageGateway",
        "media and document storage",
        "an app-sandbox storage gateway",
    ))
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client(settings: &DownloadSettings) -> Result<Arc<dyn HttpClient>> {
    use bridge_desktop::ReqwestHttpClient;

    let client = ReqwestHttpClient::with_settings(
        settings.connect_timeout,
        settings.read_timeout,
        &settings.user_agent,
    )
    .map_err(|e| Error::Internal(format!("Failed to initialize default HttpClient: {}", e)))?;
    let client: Arc<dyn HttpClient> = Arc::new(client);
    Ok(client)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client(_settings: &DownloadSettings) -> Result<Arc<dyn HttpClient>> {
    Err(missing(
        "HttpClient",
        "downloads",
        "a platform-native streaming HTTP client",
    ))
}

#[cfg(feature = "desktop-shims")]
fn provide_default_settings_store(storage: &Arc<dyn StorageGateway>) -> Result<Arc<dyn SettingsStore>> {
    use bridge_desktop::JsonSettingsStore;

    let store: Arc<dyn SettingsStore> = Arc::new(JsonSettingsStore::new(Arc::clone(storage)));
    Ok(store)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_settings_store(_storage: &Arc<dyn StorageGateway>) -> Result<Arc<dyn SettingsStore>> {
    Err(missing(
        "SettingsStore",
        "user preferences",
        "platform-native settings (UserDefaults/DataStore)",
    ))
}

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    data_dir: Option<PathBuf>,
    media_dir: Option<PathBuf>,
    storage: Option<Arc<dyn StorageGateway>>,
    http_client: Option<Arc<dyn HttpClient>>,
    settings_store: Option<Arc<dyn SettingsStore>>,
    clock: Option<Arc<dyn Clock>>,
    event_buffer_size: Option<usize>,
    download: Option<DownloadSettings>,
}

impl CoreConfigBuilder {
    /// Sets the data directory (required).
    ///
    /// # Examples
    ///
    /// ```
    /// use core_runtime::config::CoreConfig;
    ///
    /// let builder = CoreConfig::builder()
    ///     .data_dir("/path/to/app-data");
    /// ```
    pub fn data_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.data_dir = Some(path.into());
        self
    }

    /// Sets the media directory.
    ///
    /// Default: `<data_dir>/media`
    pub fn media_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.media_dir = Some(path.into());
        self
    }

    /// Sets the storage gateway implementation.
    ///
    /// If not provided, the desktop default (tokio fs-based) will be used when
    /// the `desktop-shims` feature is enabled.
    pub fn storage(mut self, storage: Arc<dyn StorageGateway>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Sets the HTTP client implementation.
    ///
    /// If not provided, the desktop default (reqwest-based) will be used when
    /// the `desktop-shims` feature is enabled, configured from the download
    /// settings.
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Sets the settings store implementation.
    pub fn settings_store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.settings_store = Some(store);
        self
    }

    /// Sets the clock. Default: [`SystemClock`].
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sets the event bus capacity.
    ///
    /// Default: [`DEFAULT_EVENT_BUFFER_SIZE`](crate::events::DEFAULT_EVENT_BUFFER_SIZE)
    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// Sets the download engine tuning.
    pub fn download_settings(mut self, settings: DownloadSettings) -> Self {
        self.download = Some(settings);
        self
    }

    /// Builds the final `CoreConfig` instance.
    ///
    /// # Returns
    ///
    /// Returns `Ok(CoreConfig)` on success, or an error if:
    /// - The data directory is missing
    /// - A bridge is missing and no desktop default is available
    /// - Configuration values are invalid
    pub fn build(self) -> Result<CoreConfig> {
        let data_dir = self.data_dir.ok_or_else(|| {
            Error::Config("Data directory is required. Use .data_dir() to set it.".to_string())
        })?;

        let media_dir = self
            .media_dir
            .unwrap_or_else(|| data_dir.join(MEDIA_DIR_NAME));

        let download = self.download.unwrap_or_default();
        download.validate()?;

        let storage = match self.storage {
            Some(storage) => storage,
            None => provide_default_storage(&data_dir, &media_dir)?,
        };

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client(&download)?,
        };

        let settings_store = match self.settings_store {
            Some(store) => store,
            None => provide_default_settings_store(&storage)?,
        };

        let config = CoreConfig {
            data_dir,
            media_dir,
            storage,
            http_client,
            settings_store,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            event_buffer_size: self
                .event_buffer_size
                .unwrap_or(crate::events::DEFAULT_EVENT_BUFFER_SIZE),
            download,
        };

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::{HttpRequest, HttpStreamResponse, MediaFile};
    use bytes::Bytes;

    // Mock implementations for testing
    struct MockStorage;

    #[async_trait]
    impl StorageGateway for MockStorage {
        async fn media_directory(&self) -> BridgeResult<PathBuf> {
            Ok(PathBuf::from("/tmp/media"))
        }

        async fn available_bytes(&self) -> BridgeResult<u64> {
            Ok(u64::MAX)
        }

        async fn write_document(&self, _name: &str, _data: Bytes) -> BridgeResult<()> {
            Ok(())
        }

        async fn read_document(&self, _name: &str) -> BridgeResult<Option<Bytes>> {
            Ok(None)
        }

        async fn create_media_file(&self, file_name: &str) -> BridgeResult<MediaFile> {
            Ok(MediaFile {
                path: PathBuf::from("/tmp/media").join(file_name),
                writer: Box::new(tokio::io::sink()),
            })
        }

        async fn file_exists(&self, _path: &Path) -> BridgeResult<bool> {
            Ok(false)
        }

        async fn file_size(&self, _path: &Path) -> BridgeResult<Option<u64>> {
            Ok(None)
        }

        async fn delete_file(&self, _path: &Path) -> BridgeResult<()> {
            Ok(())
        }
    }

    struct MockHttpClient;

    #[async_trait]
    impl HttpClient for MockHttpClient {
        async fn open_stream(&self, _request: HttpRequest) -> BridgeResult<HttpStreamResponse> {
            Err(bridge_traits::BridgeError::NotAvailable("offline".to_string()))
        }
    }

    struct MockSettingsStore;

    #[async_trait]
    impl SettingsStore for MockSettingsStore {
        async fn set_string(&self, _key: &str, _value: &str) -> BridgeResult<()> {
            Ok(())
        }

        async fn get_string(&self, _key: &str) -> BridgeResult<Option<String>> {
            Ok(None)
        }

        async fn set_bool(&self, _key: &str, _value: bool) -> BridgeResult<()> {
            Ok(())
        }

        async fn get_bool(&self, _key: &str) -> BridgeResult<Option<bool>> {
            Ok(None)
        }

        async fn set_i64(&self, _key: &str, _value: i64) -> BridgeResult<()> {
            Ok(())
        }

        async fn get_i64(&self, _key: &str) -> BridgeResult<Option<i64>> {
            Ok(None)
        }

        async fn delete(&self, _key: &str) -> BridgeResult<()> {
            Ok(())
        }

        async fn has_key(&self, _key: &str) -> BridgeResult<bool> {
            Ok(false)
        }

        async fn list_keys(&self) -> BridgeResult<Vec<String>> {
            Ok(Vec::new())
        }
    }

    fn fully_injected() -> CoreConfigBuilder {
        CoreConfig::builder()
            .data_dir("/tmp/app-data")
            .storage(Arc::new(MockStorage))
            .http_client(Arc::new(MockHttpClient))
            .settings_store(Arc::new(MockSettingsStore))
    }

    #[test]
    fn test_builder_with_all_bridges() {
        let config = fully_injected().build().unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/tmp/app-data"));
        assert_eq!(config.media_dir, PathBuf::from("/tmp/app-data/media"));
        assert_eq!(
            config.event_buffer_size,
            crate::events::DEFAULT_EVENT_BUFFER_SIZE
        );
        assert_eq!(config.download, DownloadSettings::default());
    }

    #[test]
    fn test_builder_missing_data_dir() {
        let result = CoreConfig::builder()
            .storage(Arc::new(MockStorage))
            .http_client(Arc::new(MockHttpClient))
            .settings_store(Arc::new(MockSettingsStore))
            .build();

        match result {
            Err(Error::Config(message)) => assert!(message.contains("Data directory")),
            other => panic!("expected config error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_custom_media_dir() {
        let config = fully_injected().media_dir("/mnt/music").build().unwrap();
        assert_eq!(config.media_dir, PathBuf::from("/mnt/music"));
    }

    #[test]
    fn test_download_defaults() {
        let settings = DownloadSettings::default();
        assert_eq!(settings.connect_timeout, Duration::from_secs(15));
        assert_eq!(settings.read_timeout, Duration::from_secs(120));
        assert_eq!(settings.progress_interval, Duration::from_millis(500));
        assert_eq!(settings.max_attempts, 2);
        assert!(settings.user_agent.starts_with("offline-audio-core/"));
    }

    #[test]
    fn test_invalid_download_settings() {
        let zero_attempts = DownloadSettings {
            max_attempts: 0,
            ..DownloadSettings::default()
        };
        assert!(fully_injected()
            .download_settings(zero_attempts)
            .build()
            .is_err());

        let zero_chunk = DownloadSettings {
            chunk_size: 0,
            ..DownloadSettings::default()
        };
        assert!(zero_chunk.validate().is_err());

        let blank_agent = DownloadSettings {
            user_agent: "  ".to_string(),
            ..DownloadSettings::default()
        };
        assert!(blank_agent.validate().is_err());
    }

    #[test]
    fn test_zero_event_buffer_rejected() {
        assert!(fully_injected().event_buffer_size(0).build().is_err());
    }

    #[test]
    fn test_debug_hides_bridges() {
        let config = fully_injected().build().unwrap();
        let rendered = format!("{:?}", config);
        assert!(rendered.contains("StorageGateway { ... }"));
        assert!(rendered.contains("app-data"));
    }

    #[cfg(feature = "desktop-shims")]
    #[test]
    fn test_desktop_defaults_fill_missing_bridges() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = CoreConfig::builder().data_dir(dir.path()).build();
        assert!(config.is_ok());
    }

    #[cfg(not(feature = "desktop-shims"))]
    #[test]
    fn test_missing_bridge_is_reported() {
        let result = CoreConfig::builder().data_dir("/tmp/app-data").build();
        match result {
            Err(Error::CapabilityMissing { capability, message }) => {
                assert_eq!(capability, "StorageGateway");
                assert!(message.contains("desktop-shims"));
            }
            other => panic!("expected capability error, got {:?}", other.map(|_| ())),
        }
    }
}
