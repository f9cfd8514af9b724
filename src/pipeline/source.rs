//! Source selection: decide what to parse and how.
//!
//! ```text
//! attachment? ──none──▶ fallback content? ──yes──▶ WEBPAGE model (+warning)
//!      │                        └──no───▶ InvalidAttachment
//!      ▼
//!   url empty? ──▶ InvalidAttachment
//!      ▼
//!   type (declared, else inferred from URL) ──other──▶ UnsupportedType
//!      ▼
//!   fetch ──▶ decode (spawn_blocking, bounded) ──▶ DocumentModel
//! ```
//!
//! Nothing here retries. A failed fetch or decode is returned as a failed
//! model unless `fallback_on_failure` is set and fallback content exists.

use crate::config::ParseOptions;
use crate::document::{AttachmentDescriptor, DocumentModel, DocumentType, SourceType};
use crate::error::{DocumentError, ErrorKind, Stage};
use crate::pipeline::fetch::fetch_attachment;
use crate::pipeline::transport::HttpTransport;
use crate::pipeline::{docx, pdf};
use std::time::Duration;
use tracing::{info, warn};

pub const NO_ATTACHMENT_WARNING: &str = "Using webpage content as no attachments were found";

/// Binary attachment decoders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Pdf,
    Docx,
}

impl Codec {
    pub fn source_type(self) -> SourceType {
        match self {
            Codec::Pdf => SourceType::AttachmentPdf,
            Codec::Docx => SourceType::AttachmentDocx,
        }
    }

    pub fn format_name(self) -> &'static str {
        match self {
            Codec::Pdf => "PDF",
            Codec::Docx => "DOCX",
        }
    }

    fn decoder(self) -> fn(&[u8]) -> DocumentModel {
        match self {
            Codec::Pdf => pdf::parse_pdf,
            Codec::Docx => docx::parse_docx,
        }
    }
}

/// Build a [`DocumentModel`] from an optional attachment and optional page text.
///
/// Always returns a well-formed model; failures are reported through
/// `success`, `error` and `error_kind`.
pub async fn parse_document(
    transport: &dyn HttpTransport,
    attachment: Option<&AttachmentDescriptor>,
    options: &ParseOptions,
) -> DocumentModel {
    let Some(attachment) = attachment else {
        return match options.fallback_content.as_deref() {
            Some(text) => {
                info!("No attachment; using {} chars of webpage content", text.len());
                DocumentModel::webpage(text, NO_ATTACHMENT_WARNING)
            }
            None => DocumentModel::failed(
                &DocumentError::InvalidAttachment("Attachment object is required".into()),
                None,
            ),
        };
    };

    if attachment.url.trim().is_empty() {
        return DocumentModel::failed(
            &DocumentError::InvalidAttachment("URL is required".into()),
            None,
        );
    }

    let kind = effective_type(attachment);
    let codec = match kind {
        DocumentType::Pdf => Codec::Pdf,
        DocumentType::Docx => Codec::Docx,
        ref other => {
            return DocumentModel::failed(
                &DocumentError::UnsupportedType(other.as_str().to_string()),
                None,
            )
        }
    };

    info!(
        "Parsing {} attachment '{}' from {}",
        kind.as_str(),
        attachment.name,
        attachment.url
    );

    let model = match fetch_attachment(
        transport,
        &attachment.url,
        options.download_timeout_secs,
        options.max_document_bytes,
    )
    .await
    {
        Ok(bytes) => decode_buffer(bytes, codec, options.parse_timeout_secs).await,
        Err(e) => {
            warn!("Attachment fetch failed: {}", e);
            DocumentModel::failed(&e, Some(codec.source_type()))
        }
    };

    apply_failure_fallback(model, options)
}

/// Decode an in-memory attachment on the blocking pool, bounded by
/// `timeout_secs`.
pub async fn decode_buffer(bytes: Vec<u8>, codec: Codec, timeout_secs: u64) -> DocumentModel {
    run_decoder(
        bytes,
        codec,
        codec.decoder(),
        Duration::from_secs(timeout_secs),
    )
    .await
}

async fn run_decoder(
    bytes: Vec<u8>,
    codec: Codec,
    decoder: fn(&[u8]) -> DocumentModel,
    budget: Duration,
) -> DocumentModel {
    let source = Some(codec.source_type());
    let task = tokio::task::spawn_blocking(move || decoder(&bytes));
    match tokio::time::timeout(budget, task).await {
        Ok(Ok(model)) => model,
        Ok(Err(join_err)) => {
            warn!("Decoder task failed: {}", join_err);
            DocumentModel::failed(
                &DocumentError::Parse {
                    format: codec.format_name(),
                    detail: "decoder aborted".into(),
                },
                source,
            )
        }
        Err(_) => {
            warn!("Decoding exceeded {:?}", budget);
            DocumentModel::failed(
                &DocumentError::Timeout {
                    stage: Stage::Parse,
                    secs: budget.as_secs(),
                },
                source,
            )
        }
    }
}

/// Declared type wins; an absent type is inferred from the URL extension.
fn effective_type(attachment: &AttachmentDescriptor) -> DocumentType {
    match attachment.kind {
        DocumentType::Unknown => DocumentType::from_url(&attachment.url),
        ref declared => declared.clone(),
    }
}

/// Substitute the fallback page text for a failed attachment when the
/// options allow it.
pub fn apply_failure_fallback(model: DocumentModel, options: &ParseOptions) -> DocumentModel {
    if model.success || !options.fallback_on_failure {
        return model;
    }
    // Invalid input is the caller's bug, not a flaky attachment.
    if model.error_kind == Some(ErrorKind::InvalidInput) {
        return model;
    }
    match options.fallback_content.as_deref() {
        Some(text) => {
            let reason = model.error.as_deref().unwrap_or("unknown error");
            warn!("Attachment unusable, substituting webpage content: {}", reason);
            DocumentModel::webpage(
                text,
                format!(
                    "Attachment could not be processed ({reason}); using webpage content instead"
                ),
            )
        }
        None => model,
    }
}
