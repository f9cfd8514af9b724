//! Attachment download.
//!
//! The parsers work on in-memory buffers, so the attachment is read straight
//! into memory (bounded by `max_document_bytes`) rather than spooled to disk.
//! Every failure here is a network-class [`DocumentError`], distinct from the
//! parse failures the decoders report.

use crate::error::{DocumentError, Stage};
use crate::pipeline::transport::{HttpTransport, TransportError};
use std::time::Duration;
use tracing::{debug, info};

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Download `url` and return its body.
///
/// Non-2xx statuses, connection failures, and oversized bodies all surface as
/// [`DocumentError::Network`]; an expired timeout as [`DocumentError::Timeout`].
pub async fn fetch_attachment(
    transport: &dyn HttpTransport,
    url: &str,
    timeout_secs: u64,
    max_bytes: usize,
) -> Result<Vec<u8>, DocumentError> {
    if !is_url(url) {
        return Err(DocumentError::Network {
            url: url.to_string(),
            reason: "not an HTTP/HTTPS URL".into(),
        });
    }

    info!("Fetching attachment: {}", url);
    let timeout = Duration::from_secs(timeout_secs);

    // The transport applies the timeout too; this outer bound also covers
    // slow body reads on transports that ignore it.
    let response = match tokio::time::timeout(timeout, transport.get(url, timeout, max_bytes)).await
    {
        Err(_) | Ok(Err(TransportError::Timeout)) => {
            return Err(DocumentError::Timeout {
                stage: Stage::Fetch,
                secs: timeout_secs,
            })
        }
        Ok(Err(e)) => {
            return Err(DocumentError::Network {
                url: url.to_string(),
                reason: e.to_string(),
            })
        }
        Ok(Ok(r)) => r,
    };

    if !response.is_success() {
        return Err(DocumentError::Network {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status),
        });
    }

    debug!("Fetched {} bytes from {}", response.body.len(), url);
    Ok(response.body)
}
