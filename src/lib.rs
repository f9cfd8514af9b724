//! # edgequake-threatmodel
//!
//! Turn design documents (PDF/DOCX attachments or scraped page text) into a
//! structured security analysis using a large language model.
//!
//! ## Why this crate?
//!
//! Threat-modelling input arrives in whatever form the author used: a PDF
//! exported from a wiki, a Word document, or just the text of a web page.
//! Model output is just as uneven. This crate puts a typed boundary on both
//! sides: every input becomes a [`DocumentModel`] (or a classified failure)
//! and every provider answer becomes an [`AnalysisResult`] (or a classified
//! error), with bounded retries and cooperative cancellation in between.
//!
//! ## Pipeline Overview
//!
//! ```text
//! attachment / page text
//!  │
//!  ├─ 1. Select   attachment, inferred type, or webpage fallback
//!  ├─ 2. Fetch    download the attachment (bounded size and time)
//!  ├─ 3. Decode   PDF (lopdf) or DOCX (zip + quick-xml) → DocumentModel
//!  ├─ 4. Enrich   optional knowledge-base guidance for security keywords
//!  ├─ 5. Call     OpenAI / Azure OpenAI / Anthropic / custom, with retry
//!  └─ 6. Validate normalise the JSON into an AnalysisResult
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_threatmodel::{
//!     Analyzer, AttachmentDescriptor, DocumentType, ParseOptions, Provider, ProviderConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ProviderConfig::builder(Provider::Openai)
//!         .api_key(std::env::var("OPENAI_API_KEY")?)
//!         .build()?;
//!     let attachment = AttachmentDescriptor::new(
//!         "https://example.com/design.pdf",
//!         DocumentType::Pdf,
//!         "design.pdf",
//!     );
//!
//!     let result = Analyzer::new()
//!         .analyze_attachment(Some(&attachment), &ParseOptions::default(), "", &config)
//!         .await?;
//!     println!("{}", serde_json::to_string_pretty(&result)?);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `threatmodel` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! edgequake-threatmodel = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod analyze;
pub mod config;
pub mod document;
pub mod error;
pub mod knowledge;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use analyze::{analyze, analyze_sync, parse_document, test_connection, AnalysisSlot, Analyzer, SlotTicket};
pub use config::{ParseOptions, Provider, ProviderConfig, ProviderConfigBuilder, ThreatPlatformConfig};
pub use document::{
    word_count, AttachmentDescriptor, DocumentMetadata, DocumentModel, DocumentSource, DocumentStructure, DocumentType,
    ImageRecord, Section, SourceType, TableRecord,
};
pub use error::{AnalysisError, DocumentError, ErrorKind, Stage};
pub use knowledge::{InMemoryKnowledgeBase, KnowledgeBase, KnowledgeEntry, KnowledgeError};
pub use output::{AnalysisRequest, AnalysisResult, ConnectionStatus, TestScenario, Threat, ThreatLevel};
pub use pipeline::docx::parse_docx;
pub use pipeline::normalize::{normalize, normalize_text};
pub use pipeline::pdf::parse_pdf;
pub use pipeline::retry::RequestState;
pub use pipeline::transport::{HttpTransport, ReqwestTransport};
pub use progress::{AnalysisProgressCallback, NoopProgressCallback, ProgressCallback};
pub use tokio_util::sync::CancellationToken;
