//! Pipeline stages for document-to-threat-model analysis.
//!
//! Each submodule implements exactly one step, so each can be tested on its
//! own and the HTTP layer can be replaced by a fake.
//!
//! ## Data Flow
//!
//! ```text
//! source ──▶ fetch ──▶ pdf / docx ──▶ llm ──▶ provider ──▶ normalize
//! (select)   (GET)     (decode)      (retry)  (wire shape)  (schema)
//! ```
//!
//! 1. [`source`]    — pick attachment or page text; never retries
//! 2. [`fetch`]     — download the attachment through [`transport`]
//! 3. [`pdf`], [`docx`] — pure decoders over in-memory buffers, run in
//!    `spawn_blocking` under a time budget
//! 4. [`llm`]       — drive the provider call through the [`retry`] state
//!    machine; the only stage that POSTs
//! 5. [`provider`]  — per-provider request body, auth headers, response envelope
//! 6. [`normalize`] — coerce the model's JSON into an `AnalysisResult`

pub mod docx;
pub mod fetch;
pub mod llm;
pub mod normalize;
pub mod pdf;
pub mod provider;
pub mod retry;
pub mod source;
pub mod transport;
