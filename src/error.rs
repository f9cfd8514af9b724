//! Error types for the edgequake-threatmodel library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`AnalysisError`] — **Fatal**: the analysis cannot produce a result
//!   (provider rejected the call, payload failed validation, call cancelled).
//!   Returned as `Err(AnalysisError)` from the orchestrator entry points.
//!
//! * [`DocumentError`] — **Non-fatal**: the attachment could not be fetched or
//!   decoded. It never propagates past the source selector; its message is
//!   stored inside a failed [`crate::document::DocumentModel`] so the caller
//!   can substitute other content or report the failure.
//!
//! Both map onto the same [`ErrorKind`] taxonomy so callers can branch on the
//! class of failure without matching on message text.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification shared by every failure path in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Missing or malformed attachment / URL / request.
    InvalidInput,
    /// Corrupt, empty, or over-budget binary document.
    Parse,
    /// Fetch or connection failure.
    Network,
    /// Non-2xx from the LLM endpoint, or unusable credentials.
    Provider,
    /// A stage exceeded its time budget.
    Timeout,
    /// Provider payload does not match the analysis schema.
    Validation,
    /// The caller aborted the request.
    Cancelled,
    /// Invalid configuration.
    Config,
    /// Unexpected internal error.
    Internal,
}

/// Pipeline stage that ran out of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Fetch,
    Parse,
    Provider,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Fetch => "fetch",
            Stage::Parse => "parse",
            Stage::Provider => "provider call",
        };
        f.write_str(s)
    }
}

/// All fatal errors returned by the analysis orchestrator.
#[derive(Debug, Clone, Error)]
pub enum AnalysisError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The request or attachment is unusable.
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    // ── Transport errors ──────────────────────────────────────────────────
    /// Connection-level failure (DNS, refused, reset, non-2xx on fetch).
    #[error("Network error contacting '{target}': {reason}")]
    Network { target: String, reason: String },

    /// A stage exceeded its budget.
    #[error("{stage} timed out after {secs}s")]
    Timeout { stage: Stage, secs: u64 },

    // ── Provider errors ───────────────────────────────────────────────────
    /// The LLM endpoint answered with a non-2xx status.
    ///
    /// `retryable` is true for 429 and 5xx; every other status is terminal.
    #[error("Provider '{provider}' returned HTTP {status}: {detail}")]
    Provider {
        provider: String,
        status: u16,
        retryable: bool,
        detail: String,
    },

    /// Credentials are missing or malformed; no request was sent.
    #[error("Invalid credentials for provider '{provider}': {detail}")]
    Credentials { provider: String, detail: String },

    // ── Payload errors ────────────────────────────────────────────────────
    /// The provider payload could not be read as an analysis result.
    #[error("Invalid analysis payload: {detail}")]
    Validation { detail: String },

    /// The source document was not usable, so no provider call was made.
    #[error("Document unavailable: {message}")]
    Document { kind: ErrorKind, message: String },

    // ── Control flow ──────────────────────────────────────────────────────
    /// The caller aborted the request before it completed.
    #[error("Analysis request {request_id} was cancelled")]
    Cancelled { request_id: u64 },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder or settings validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AnalysisError {
    /// Coarse classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AnalysisError::InvalidInput { .. } => ErrorKind::InvalidInput,
            AnalysisError::Network { .. } => ErrorKind::Network,
            AnalysisError::Timeout { .. } => ErrorKind::Timeout,
            AnalysisError::Provider { .. } | AnalysisError::Credentials { .. } => {
                ErrorKind::Provider
            }
            AnalysisError::Validation { .. } => ErrorKind::Validation,
            AnalysisError::Document { kind, .. } => *kind,
            AnalysisError::Cancelled { .. } => ErrorKind::Cancelled,
            AnalysisError::InvalidConfig(_) => ErrorKind::Config,
            AnalysisError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether another attempt with the same request might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            AnalysisError::Network { .. } | AnalysisError::Timeout { .. } => true,
            AnalysisError::Provider { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Build a provider error from an HTTP status, classifying retryability.
    pub fn from_status(provider: impl Into<String>, status: u16, detail: impl Into<String>) -> Self {
        AnalysisError::Provider {
            provider: provider.into(),
            status,
            retryable: status == 429 || (500..600).contains(&status),
            detail: detail.into(),
        }
    }
}

/// A non-fatal document acquisition error.
///
/// The `Display` text is what ends up in `DocumentModel.error`, so the wording
/// of each variant is part of the external contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DocumentError {
    /// Attachment descriptor missing or incomplete.
    #[error("Invalid attachment: {0}")]
    InvalidAttachment(String),

    /// Attachment type is not one the parsers handle.
    #[error("Unsupported document type: {0}")]
    UnsupportedType(String),

    /// The buffer could not be decoded (or blew the step budget).
    #[error("{format} parsing failed: {detail}")]
    Parse { format: &'static str, detail: String },

    /// The attachment could not be downloaded.
    #[error("Network error fetching '{url}': {reason}")]
    Network { url: String, reason: String },

    /// Fetch or decode exceeded its time budget.
    #[error("{stage} timed out after {secs}s")]
    Timeout { stage: Stage, secs: u64 },
}

impl DocumentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DocumentError::InvalidAttachment(_) | DocumentError::UnsupportedType(_) => {
                ErrorKind::InvalidInput
            }
            DocumentError::Parse { .. } => ErrorKind::Parse,
            DocumentError::Network { .. } => ErrorKind::Network,
            DocumentError::Timeout { .. } => ErrorKind::Timeout,
        }
    }

    pub(crate) fn parse(format: &'static str, detail: impl Into<String>) -> Self {
        DocumentError::Parse {
            format,
            detail: detail.into(),
        }
    }
}
