//! Analysis entry points.
//!
//! [`Analyzer`] holds the collaborators (HTTP transport, optional knowledge
//! base, progress observer); everything request-specific, including the
//! provider configuration, is passed per call. The free functions at the
//! bottom use a default analyzer for the common case.
//!
//! ## Ordering
//!
//! A request's [`DocumentModel`] is fully built before any provider call
//! reads it, and a failed model never reaches a provider.

use crate::config::{ParseOptions, ProviderConfig};
use crate::document::{AttachmentDescriptor, DocumentModel};
use crate::error::{AnalysisError, ErrorKind};
use crate::knowledge::{gather_guidance, KnowledgeBase};
use crate::output::{AnalysisRequest, AnalysisResult, ConnectionStatus};
use crate::pipeline::llm::{execute, CallContext};
use crate::pipeline::normalize::normalize_payload;
use crate::pipeline::provider::is_vision_model;
use crate::pipeline::source;
use crate::pipeline::transport::{HttpTransport, ReqwestTransport};
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::prompts::{build_prompt, ChatPrompt, CONNECTION_TEST_PROMPT};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Runs documents through the analysis pipeline.
pub struct Analyzer {
    transport: Arc<dyn HttpTransport>,
    knowledge: Option<Arc<dyn KnowledgeBase>>,
    progress: ProgressCallback,
    next_id: AtomicU64,
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl Analyzer {
    /// An analyzer using `reqwest` and no knowledge base.
    pub fn new() -> Self {
        Self::with_transport(Arc::new(ReqwestTransport::new()))
    }

    pub fn with_transport(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            knowledge: None,
            progress: Arc::new(NoopProgressCallback),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_knowledge_base(mut self, kb: Arc<dyn KnowledgeBase>) -> Self {
        self.knowledge = Some(kb);
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    /// Select and parse the source document. See [`source::parse_document`].
    pub async fn parse_document(
        &self,
        attachment: Option<&AttachmentDescriptor>,
        options: &ParseOptions,
    ) -> DocumentModel {
        let model = source::parse_document(self.transport.as_ref(), attachment, options).await;
        self.progress.on_document_parsed(&model);
        model
    }

    /// Analyse a parsed document.
    pub async fn analyze(
        &self,
        request: &AnalysisRequest,
        config: &ProviderConfig,
    ) -> Result<AnalysisResult, AnalysisError> {
        self.analyze_with_cancel(request, config, &CancellationToken::new())
            .await
    }

    /// Like [`analyze`](Self::analyze), aborting when `cancel` fires.
    pub async fn analyze_with_cancel(
        &self,
        request: &AnalysisRequest,
        config: &ProviderConfig,
        cancel: &CancellationToken,
    ) -> Result<AnalysisResult, AnalysisError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.run(request, config, id, cancel).await
    }

    /// Analyse within `slot`: starting this request cancels the slot's
    /// previous one, and if a newer request starts before this one finishes,
    /// this one's result is discarded as [`AnalysisError::Cancelled`].
    pub async fn analyze_in_slot(
        &self,
        slot: &AnalysisSlot,
        request: &AnalysisRequest,
        config: &ProviderConfig,
    ) -> Result<AnalysisResult, AnalysisError> {
        let ticket = slot.begin();
        let outcome = self.run(request, config, ticket.id, &ticket.token).await;
        slot.accept(&ticket, outcome)
            .unwrap_or(Err(AnalysisError::Cancelled {
                request_id: ticket.id,
            }))
    }

    /// Parse the attachment (or fallback text) and analyse it.
    ///
    /// A document that failed to parse is returned as
    /// [`AnalysisError::Document`] with the document's error kind; no
    /// provider call is made.
    pub async fn analyze_attachment(
        &self,
        attachment: Option<&AttachmentDescriptor>,
        options: &ParseOptions,
        prompt: &str,
        config: &ProviderConfig,
    ) -> Result<AnalysisResult, AnalysisError> {
        let document = self.parse_document(attachment, options).await;
        if let Some(warning) = document.warning.as_deref() {
            info!("{}", warning);
        }
        self.analyze(&AnalysisRequest::new(document, prompt), config)
            .await
    }

    /// One-shot reachability check. Never returns an error; failures are in
    /// the returned status.
    pub async fn test_connection(&self, config: &ProviderConfig) -> ConnectionStatus {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let ctx = CallContext {
            transport: self.transport.as_ref(),
            progress: self.progress.as_ref(),
            cancel: &cancel,
            request_id: id,
        };
        let prompt = ChatPrompt {
            system: CONNECTION_TEST_PROMPT.to_string(),
            user: "ping".to_string(),
            prompt: "ping".to_string(),
            document: String::new(),
        };

        match execute(&ctx, config, &prompt, 1, |_| Ok(())).await {
            Ok(()) => ConnectionStatus {
                success: true,
                detail: format!("Connected to {} (model {})", config.provider, config.model_name()),
            },
            Err(e) => {
                warn!("Connection test failed: {}", e);
                ConnectionStatus {
                    success: false,
                    detail: e.to_string(),
                }
            }
        }
    }

    async fn run(
        &self,
        request: &AnalysisRequest,
        config: &ProviderConfig,
        request_id: u64,
        cancel: &CancellationToken,
    ) -> Result<AnalysisResult, AnalysisError> {
        let document = &request.content;
        if !document.success {
            return Err(AnalysisError::Document {
                kind: document.error_kind.unwrap_or(ErrorKind::InvalidInput),
                message: document
                    .error
                    .clone()
                    .unwrap_or_else(|| "document was not parsed".into()),
            });
        }
        if document.text.trim().is_empty() {
            return Err(AnalysisError::InvalidInput {
                message: "document contains no text to analyse".into(),
            });
        }

        let guidance = match self.knowledge.as_deref() {
            Some(kb) => tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AnalysisError::Cancelled { request_id }),
                g = gather_guidance(kb, &document.text) => g,
            },
            None => Vec::new(),
        };

        let vision = is_vision_model(config.model_name());
        let prompt = build_prompt(document, &request.prompt, &guidance, config, vision);
        debug!(
            "Request {}: {} words, {} guidance entries, structure hints: {}",
            request_id,
            document.metadata.word_count,
            guidance.len(),
            vision
        );

        let ctx = CallContext {
            transport: self.transport.as_ref(),
            progress: self.progress.as_ref(),
            cancel,
            request_id,
        };
        execute(&ctx, config, &prompt, config.max_attempts, normalize_payload).await
    }
}

/// A logical slot (one panel, one tab) in which only the latest request's
/// result may land.
#[derive(Debug, Default)]
pub struct AnalysisSlot {
    state: Mutex<SlotState>,
}

#[derive(Debug, Default)]
struct SlotState {
    last_id: u64,
    current: Option<CancellationToken>,
}

/// Handle for one request in an [`AnalysisSlot`].
#[derive(Debug, Clone)]
pub struct SlotTicket {
    pub id: u64,
    pub token: CancellationToken,
}

impl AnalysisSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a request: cancel the current one and issue the next id.
    pub fn begin(&self) -> SlotTicket {
        let mut state = self.lock();
        if let Some(previous) = state.current.take() {
            previous.cancel();
        }
        state.last_id += 1;
        let token = CancellationToken::new();
        state.current = Some(token.clone());
        SlotTicket {
            id: state.last_id,
            token,
        }
    }

    /// Whether `ticket` is still the slot's latest request.
    pub fn is_current(&self, ticket: &SlotTicket) -> bool {
        self.lock().last_id == ticket.id
    }

    /// Pass `value` through only if `ticket` is still current.
    pub fn accept<T>(&self, ticket: &SlotTicket, value: T) -> Option<T> {
        if self.is_current(ticket) {
            Some(value)
        } else {
            debug!("Dropping late result for superseded request {}", ticket.id);
            None
        }
    }

    /// Cancel whatever is in flight without starting anything new.
    pub fn cancel(&self) {
        if let Some(token) = self.lock().current.take() {
            token.cancel();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SlotState> {
        // The state is two plain fields; a poisoned lock still holds valid data.
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

// ── Convenience functions ────────────────────────────────────────────────────

/// Analyse a parsed document with a default [`Analyzer`].
pub async fn analyze(
    request: &AnalysisRequest,
    config: &ProviderConfig,
) -> Result<AnalysisResult, AnalysisError> {
    Analyzer::new().analyze(request, config).await
}

/// Synchronous wrapper around [`analyze`].
///
/// Creates a temporary tokio runtime internally; do not call from inside an
/// async context.
pub fn analyze_sync(
    request: &AnalysisRequest,
    config: &ProviderConfig,
) -> Result<AnalysisResult, AnalysisError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| AnalysisError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(analyze(request, config))
}

/// Check that `config` can reach its provider.
pub async fn test_connection(config: &ProviderConfig) -> ConnectionStatus {
    Analyzer::new().test_connection(config).await
}

/// Select and parse a source document with the default HTTP transport.
pub async fn parse_document(
    attachment: Option<&AttachmentDescriptor>,
    options: &ParseOptions,
) -> DocumentModel {
    Analyzer::new().parse_document(attachment, options).await
}
