//! HTTP Client Abstraction
//!
//! Provides async streaming GET operations with byte-range support for
//! resumable media transfers.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::error::Result;

/// HTTP method types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Head,
}

/// HTTP request builder
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HashMap::new(),
            timeout: None,
        }
    }

    /// Shorthand for a GET request.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Request every byte starting at `offset` (`Range: bytes={offset}-`).
    pub fn range_from(self, offset: u64) -> Self {
        self.header("Range", format!("bytes={}-", offset))
    }

    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Value of the `Range` header, if one was set.
    pub fn range(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("range"))
            .map(|(_, v)| v.as_str())
    }
}

/// Chunked response body.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Streaming HTTP response.
///
/// The body is yielded chunk by chunk as it arrives from the network so
/// callers can persist partial progress and abandon the read at any chunk
/// boundary.
pub struct HttpStream {
    pub status: u16,
    pub headers: HashMap<String, String>,
    /// Declared length of this response body (not of the whole resource).
    pub content_length: Option<u64>,
    pub body: ByteStream,
}

impl HttpStream {
    /// Check if response status is successful (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// True for `206 Partial Content`.
    pub fn is_partial(&self) -> bool {
        self.status == 206
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Debug for HttpStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpStream")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Async HTTP client trait
///
/// This trait abstracts HTTP operations to allow platform-specific implementations.
/// Implementations should handle:
/// - TLS certificate validation
/// - Connection pooling and keep-alive
/// - Forwarding request headers verbatim (notably `Range`)
///
/// Non-2xx statuses are returned as a normal [`HttpStream`]; only transport
/// failures surface as errors.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::http::{HttpClient, HttpRequest};
/// use futures::StreamExt;
///
/// async fn fetch_tail(client: &dyn HttpClient, url: &str, offset: u64) -> Result<u64> {
///     let mut response = client.open_stream(HttpRequest::get(url).range_from(offset)).await?;
///     let mut received = 0;
///     while let Some(chunk) = response.body.next().await {
///         received += chunk?.len() as u64;
///     }
///     Ok(received)
/// }
/// ```
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Send the request and return once the response headers are available.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Network connection fails
    /// - TLS validation fails
    /// - Request times out before headers arrive
    async fn open_stream(&self, request: HttpRequest) -> Result<HttpStream>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[test]
    fn test_http_request_builder() {
        let request = HttpRequest::get("https://example.com/video.mp4")
            .header("User-Agent", "test")
            .range_from(400)
            .timeout(Duration::from_secs(30));

        assert_eq!(request.method, HttpMethod::Get);
        assert_eq!(request.url, "https://example.com/video.mp4");
        assert_eq!(request.headers.get("User-Agent"), Some(&"test".to_string()));
        assert_eq!(request.range(), Some("bytes=400-"));
        assert_eq!(request.timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_request_without_range() {
        let request = HttpRequest::get("https://example.com");
        assert!(request.range().is_none());
    }

    #[test]
    fn test_http_stream_status_checks() {
        let mut headers = HashMap::new();
        headers.insert("Content-Range".to_string(), "bytes 400-999/1000".to_string());
        let response = HttpStream {
            status: 206,
            headers,
            content_length: Some(600),
            body: Box::pin(stream::empty()),
        };

        assert!(response.is_success());
        assert!(response.is_partial());
        assert_eq!(response.header("content-range"), Some("bytes 400-999/1000"));
    }
}
