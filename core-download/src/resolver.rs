//! Stream resolution collaborator
//!
//! Search and stream extraction live outside the core. The orchestrator only
//! needs to turn an opaque source reference (a video id, a share link) into a
//! plain downloadable URL.

use async_trait::async_trait;

/// A resolved audio stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStream {
    /// Directly downloadable URL. Often signed and short-lived.
    pub stream_url: String,
    pub title: Option<String>,
    pub uploader: Option<String>,
}

/// Resolves source references to downloadable audio URLs.
#[async_trait]
pub trait StreamResolver: Send + Sync {
    /// Returns `None` when the reference cannot be resolved.
    async fn resolve_audio_url(&self, source_ref: &str) -> Option<ResolvedStream>;
}
