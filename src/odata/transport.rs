//! HTTP transport
//!
//! The client never talks to reqwest directly. Every request goes through a
//! [`Transport`], which returns the status code untouched so the caller can
//! tell an authorization failure (401/403) apart from other failures.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use thiserror::Error;

/// Transport-level failures (no response was received)
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Other(String),
}

/// A fully buffered response
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TransportResponse {
    /// Response with an empty header map
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// True for 401 and 403
    pub fn is_auth_failure(&self) -> bool {
        is_auth_failure(self.status)
    }

    /// Body as lossy UTF-8, for error messages
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// A response whose body is read incrementally
pub struct StreamingResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: BoxStream<'static, Result<Bytes, TransportError>>,
}

impl StreamingResponse {
    pub fn is_auth_failure(&self) -> bool {
        is_auth_failure(self.status)
    }

    /// Drain the body into one buffer
    pub async fn into_buffered(self) -> Result<TransportResponse, TransportError> {
        let parts: Vec<Bytes> = self.body.try_collect().await?;
        Ok(TransportResponse {
            status: self.status,
            headers: self.headers,
            body: Bytes::from(parts.concat()),
        })
    }
}

impl std::fmt::Debug for StreamingResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

pub(crate) fn is_auth_failure(status: StatusCode) -> bool {
    status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN
}

/// GET transport used by the client
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str, headers: HeaderMap) -> Result<TransportResponse, TransportError>;

    /// Streaming GET; the default buffers through [`Transport::get`]
    async fn get_stream(
        &self,
        url: &str,
        headers: HeaderMap,
    ) -> Result<StreamingResponse, TransportError> {
        let response = self.get(url, headers).await?;
        Ok(StreamingResponse {
            status: response.status,
            headers: response.headers,
            body: stream::once(async move { Ok(response.body) }).boxed(),
        })
    }
}

/// reqwest-backed transport
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http_client: Client,
}

impl HttpTransport {
    /// Transport with the given request timeout
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let http_client = Client::builder().timeout(timeout).build()?;
        Ok(Self { http_client })
    }

    /// Wrap an existing client (shared pools, custom TLS)
    pub fn with_client(http_client: Client) -> Self {
        Self { http_client }
    }

    pub fn client(&self) -> &Client {
        &self.http_client
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(
        &self,
        url: &str,
        headers: HeaderMap,
    ) -> Result<TransportResponse, TransportError> {
        tracing::debug!("GET {}", url);
        let response = self.http_client.get(url).headers(headers).send().await?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;
        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }

    async fn get_stream(
        &self,
        url: &str,
        headers: HeaderMap,
    ) -> Result<StreamingResponse, TransportError> {
        tracing::debug!("GET (stream) {}", url);
        let response = self.http_client.get(url).headers(headers).send().await?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes_stream().map_err(TransportError::from).boxed();
        Ok(StreamingResponse {
            status,
            headers,
            body,
        })
    }
}
