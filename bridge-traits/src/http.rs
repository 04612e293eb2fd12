//! HTTP Client Abstraction
//!
//! Provides streaming HTTP downloads. Implementations own connection pooling,
//! TLS, the connect/read timeouts and the user-agent header; callers only see
//! a status line, a few headers and a body stream.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::fmt;

use crate::error::Result;

/// A `GET` request for a media stream.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: String,
    pub headers: HashMap<String, String>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: HashMap::new(),
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// Body of a streaming response. Each item is one chunk as received.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Streaming HTTP response.
///
/// The body has not been read yet when this is returned; dropping the value
/// closes the connection.
pub struct HttpStreamResponse {
    pub status: u16,
    /// Advertised `Content-Length`, if any.
    pub content_length: Option<u64>,
    /// Advertised `Content-Type` without parameters, if any.
    pub content_type: Option<String>,
    pub body: ByteStream,
}

impl HttpStreamResponse {
    /// Check if response status is successful (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Content length, treating an advertised zero as unknown.
    pub fn known_length(&self) -> Option<u64> {
        self.content_length.filter(|len| *len > 0)
    }
}

impl fmt::Debug for HttpStreamResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpStreamResponse")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// Async HTTP client trait
///
/// This trait abstracts HTTP operations to allow platform-specific implementations.
/// Implementations should map transport failures (connect errors, read timeouts,
/// mid-stream resets) to [`BridgeError::Network`](crate::BridgeError::Network) or
/// [`BridgeError::Timeout`](crate::BridgeError::Timeout) so callers can tell them
/// apart from permanent failures.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::http::{HttpClient, HttpRequest};
/// use futures::StreamExt;
///
/// async fn count_bytes(client: &dyn HttpClient) -> Result<u64> {
///     let mut response = client.open_stream(HttpRequest::get("https://example.com/a.mp3")).await?;
///     let mut total = 0;
///     while let Some(chunk) = response.body.next().await {
///         total += chunk?.len() as u64;
///     }
///     Ok(total)
/// }
/// ```
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Send the request and return as soon as the response headers arrive.
    ///
    /// Non-success statuses are returned as a normal response; only transport
    /// failures produce an error.
    async fn open_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse>;
}
