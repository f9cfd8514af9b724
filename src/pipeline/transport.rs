//! HTTP boundary of the pipeline.
//!
//! Both suspension points that touch the network (attachment download and
//! the provider call) go through [`HttpTransport`]. The production
//! implementation wraps a `reqwest::Client`; tests inject scripted fakes so the
//! retry and cancellation logic can be exercised without sockets.
//!
//! The transport reports *transport* outcomes only: any HTTP status comes back
//! as `Ok(HttpResponse)`. Classifying statuses is the caller's job.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Largest provider response body accepted.
pub const MAX_RESPONSE_BYTES: usize = 16 * 1024 * 1024;

/// A JSON POST to a provider endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Value,
    pub timeout: Duration,
}

impl HttpRequest {
    /// Look up a header by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Failure below the HTTP status layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// DNS, connect, TLS, reset, or body-read failure.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The request did not complete within its timeout.
    #[error("request timed out")]
    Timeout,

    /// The response body exceeded the caller's size limit.
    #[error("response body exceeds {limit} bytes")]
    TooLarge { limit: usize },

    /// The request could not be built (bad URL, bad header value).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Asynchronous HTTP capability used by the pipeline.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// GET `url`, reading at most `max_bytes` of body.
    async fn get(
        &self,
        url: &str,
        timeout: Duration,
        max_bytes: usize,
    ) -> Result<HttpResponse, TransportError>;

    /// POST a JSON body.
    async fn post_json(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// [`HttpTransport`] over a shared `reqwest::Client`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

/// Read the body chunk by chunk so a lying or absent Content-Length can't
/// blow memory.
async fn read_capped(
    mut response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, TransportError> {
    if let Some(len) = response.content_length() {
        if len > limit as u64 {
            return Err(TransportError::TooLarge { limit });
        }
    }
    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(map_reqwest_error)? {
        append_capped(&mut body, &chunk, limit)?;
    }
    Ok(body)
}

fn append_capped(body: &mut Vec<u8>, chunk: &[u8], limit: usize) -> Result<(), TransportError> {
    if body.len() + chunk.len() > limit {
        return Err(TransportError::TooLarge { limit });
    }
    body.extend_from_slice(chunk);
    Ok(())
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_builder() {
        TransportError::InvalidRequest(e.to_string())
    } else {
        TransportError::Connect(e.to_string())
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(
        &self,
        url: &str,
        timeout: Duration,
        max_bytes: usize,
    ) -> Result<HttpResponse, TransportError> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status().as_u16();
        let body = read_capped(response, max_bytes).await?;
        debug!("GET {} → HTTP {} ({} bytes)", url, status, body.len());

        Ok(HttpResponse { status, body })
    }

    async fn post_json(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let payload = serde_json::to_vec(&request.body)
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;

        let mut builder = self
            .client
            .post(&request.url)
            .timeout(request.timeout)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.body(payload).send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let body = read_capped(response, MAX_RESPONSE_BYTES).await?;
        debug!("POST → HTTP {} ({} bytes)", status, body.len());

        Ok(HttpResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_is_case_insensitive() {
        let req = HttpRequest {
            url: "https://example.com".into(),
            headers: vec![("x-api-key".into(), "k".into())],
            body: Value::Null,
            timeout: Duration::from_secs(1),
        };
        assert_eq!(req.header("X-API-KEY"), Some("k"));
        assert_eq!(req.header("authorization"), None);
    }

    #[test]
    fn body_reads_stop_at_the_cap() {
        let mut body = Vec::new();
        append_capped(&mut body, b"abcd", 6).unwrap();
        append_capped(&mut body, b"ef", 6).unwrap();
        assert_eq!(body, b"abcdef");
        assert_eq!(
            append_capped(&mut body, b"g", 6),
            Err(TransportError::TooLarge { limit: 6 })
        );
        assert_eq!(body.len(), 6);
    }

    #[test]
    fn response_helpers() {
        let ok = HttpResponse::new(204, Vec::new());
        assert!(ok.is_success());
        let err = HttpResponse::new(503, "busy");
        assert!(!err.is_success());
        assert_eq!(err.text(), "busy");
    }
}
