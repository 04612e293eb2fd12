//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! This crate provides production-ready implementations of the bridge traits
//! using desktop-appropriate libraries:
//! - `HttpClient` using `reqwest` (streaming, connect + read timeouts)
//! - `StorageGateway` using `tokio::fs`, with free space from `fs2`
//! - `SettingsStore` as a JSON document stored through the gateway
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{JsonSettingsStore, ReqwestHttpClient, TokioStorageGateway};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> bridge_traits::Result<()> {
//!     let http_client = Arc::new(ReqwestHttpClient::new()?);
//!     let storage = Arc::new(TokioStorageGateway::new());
//!     let settings = Arc::new(JsonSettingsStore::new(storage.clone()));
//!
//!     // Use in core configuration
//!     Ok(())
//! }
//! ```

mod http;
mod settings;
mod storage;

pub use http::{
    ReqwestHttpClient, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT, DEFAULT_USER_AGENT,
};
pub use settings::{JsonSettingsStore, SETTINGS_DOCUMENT};
pub use storage::TokioStorageGateway;
