//! Progress-callback trait for analysis lifecycle events.
//!
//! Inject an [`Arc<dyn AnalysisProgressCallback>`] via
//! [`crate::analyze::Analyzer::with_progress`] to observe each request as it
//! moves through the retry state machine.
//!
//! # Example
//!
//! ```rust
//! use edgequake_threatmodel::{AnalysisProgressCallback, RequestState};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct RetryCounter {
//!     retries: Arc<AtomicUsize>,
//! }
//!
//! impl AnalysisProgressCallback for RetryCounter {
//!     fn on_state_change(&self, _request_id: u64, state: &RequestState) {
//!         if matches!(state, RequestState::Retrying { .. }) {
//!             self.retries.fetch_add(1, Ordering::SeqCst);
//!         }
//!     }
//! }
//! ```

use crate::document::DocumentModel;
use crate::error::AnalysisError;
use crate::pipeline::retry::RequestState;
use std::sync::Arc;

/// Called by the orchestrator as a request progresses.
///
/// Implementations must be `Send + Sync`: several requests may be in flight
/// on different tasks. All methods default to no-ops.
pub trait AnalysisProgressCallback: Send + Sync {
    /// A source document finished parsing (successfully or not).
    fn on_document_parsed(&self, document: &DocumentModel) {
        let _ = document;
    }

    /// The request entered `state`.
    fn on_state_change(&self, request_id: u64, state: &RequestState) {
        let _ = (request_id, state);
    }

    /// Attempt `attempt` (1-based) failed with `error`.
    fn on_attempt_failed(&self, request_id: u64, attempt: u32, error: &AnalysisError) {
        let _ = (request_id, attempt, error);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl AnalysisProgressCallback for NoopProgressCallback {}

/// Convenience alias for the type held by [`crate::analyze::Analyzer`].
pub type ProgressCallback = Arc<dyn AnalysisProgressCallback>;
