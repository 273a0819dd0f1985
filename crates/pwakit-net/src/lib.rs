//! # PwaKit Net
//!
//! Request and response types shared by the offline worker, and the
//! [`Fetcher`] seam through which every network access goes.
//!
//! ## Design Goals
//!
//! 1. **Snapshots**: a [`Response`] is fully buffered; cloning it yields an
//!    independent copy that can be stored while the original is returned.
//! 2. **Single read**: body accessors take `self`, so a body is consumed at
//!    most once.
//! 3. **Pluggable transport**: the worker only sees [`Fetcher`]; the
//!    reqwest-backed [`ResourceLoader`] is the production implementation.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use mime::Mime;
use thiserror::Error;

pub use url::Url;

pub mod loader;

pub use loader::{LoaderConfig, ResourceLoader};

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Body decode failed: {0}")]
    Decode(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Unique identifier for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// An intercepted outgoing request.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl Request {
    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self {
            id: RequestId::new(),
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Parse a URL and create a GET request for it.
    pub fn parse(url: &str) -> Result<Self, NetError> {
        let url = Url::parse(url).map_err(|e| NetError::InvalidUrl(e.to_string()))?;
        Ok(Self::get(url))
    }

    /// Create a POST request.
    pub fn post(url: Url, body: Bytes) -> Self {
        Self {
            method: Method::POST,
            body: Some(body),
            ..Self::get(url)
        }
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set the Accept header.
    pub fn accept(self, value: &'static str) -> Self {
        self.header(header::ACCEPT, HeaderValue::from_static(value))
    }

    /// Raw Accept header, if present and valid UTF-8.
    pub fn accept_header(&self) -> Option<&str> {
        self.headers
            .get(header::ACCEPT)
            .and_then(|v| v.to_str().ok())
    }

    /// Whether the caller asked for an HTML document.
    ///
    /// A request without an Accept header is not a document request.
    pub fn accepts_html(&self) -> bool {
        self.accept_header()
            .map(|accept| accept.contains("text/html"))
            .unwrap_or(false)
    }

    /// Whether this is a GET request.
    pub fn is_get(&self) -> bool {
        self.method == Method::GET
    }
}

/// A fully-buffered HTTP response.
///
/// The body can be read once (the accessors consume the response). Use
/// `clone()` to obtain an independent snapshot before reading.
#[derive(Debug, Clone)]
pub struct Response {
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// Whether this snapshot was served from a cache.
    pub from_cache: bool,
    body: Bytes,
}

impl Response {
    /// Build a network response.
    pub fn new(url: Url, status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            url,
            status,
            headers,
            from_cache: false,
            body,
        }
    }

    /// A 200 response with the given content type.
    pub fn ok_with(url: Url, content_type: &'static str, body: impl Into<Bytes>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        Self::new(url, StatusCode::OK, headers, body.into())
    }

    /// Copy of this response marked as served from cache.
    pub fn cached_copy(&self) -> Self {
        Self {
            from_cache: true,
            ..self.clone()
        }
    }

    /// Check if request was successful (2xx).
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Get a header value as a string.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Parsed Content-Type.
    pub fn content_type(&self) -> Option<Mime> {
        self.header("content-type")
            .and_then(|s| s.parse::<Mime>().ok())
    }

    /// Body length in bytes.
    pub fn body_len(&self) -> usize {
        self.body.len()
    }

    /// Get the body as bytes.
    pub fn bytes(self) -> Bytes {
        self.body
    }

    /// Get the body as text.
    pub fn text(self) -> Result<String, NetError> {
        String::from_utf8(self.body.to_vec()).map_err(|e| NetError::Decode(e.to_string()))
    }

    /// Get the body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(self) -> Result<T, NetError> {
        serde_json::from_slice(&self.body).map_err(|e| NetError::Decode(e.to_string()))
    }
}

/// Transport used by the worker for every network access.
///
/// Any HTTP status counts as a successful fetch; only transport failures
/// are errors.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: Request) -> Result<Response, NetError>;
}
