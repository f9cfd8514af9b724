//! Keyword knowledge base used to enrich the analysis prompt.
//!
//! The store itself is external and read-only; the pipeline only needs
//! `query(keyword) -> [{topic, guidance}]`. A missing or failing store never
//! blocks an analysis: errors are logged and the prompt goes out without
//! guidance.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::{debug, warn};

/// Keywords scanned for in the document text, in priority order.
pub const SECURITY_KEYWORDS: &[&str] = &[
    "authentication",
    "authorization",
    "password",
    "token",
    "session",
    "encryption",
    "payment",
    "upload",
    "api",
    "pii",
    "oauth",
    "sql",
    "cookie",
    "admin",
    "webhook",
    "secret",
    "logging",
    "rate limit",
];

/// Most distinct keywords queried per analysis.
pub const MAX_KEYWORDS: usize = 8;
/// Most guidance entries appended to one prompt.
pub const MAX_ENTRIES: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub topic: String,
    pub guidance: String,
}

impl KnowledgeEntry {
    pub fn new(topic: impl Into<String>, guidance: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            guidance: guidance.into(),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum KnowledgeError {
    #[error("knowledge base unavailable: {0}")]
    Unavailable(String),

    #[error("invalid knowledge base data: {0}")]
    InvalidData(String),
}

/// Read-only keyword lookup.
#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    async fn query(&self, keyword: &str) -> Result<Vec<KnowledgeEntry>, KnowledgeError>;
}

/// Knowledge base held in memory, keyed by lowercase keyword.
#[derive(Debug, Clone, Default)]
pub struct InMemoryKnowledgeBase {
    entries: HashMap<String, Vec<KnowledgeEntry>>,
}

impl InMemoryKnowledgeBase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `{ "keyword": [ { "topic": …, "guidance": … } ] }`.
    pub fn from_json(json: &str) -> Result<Self, KnowledgeError> {
        let raw: HashMap<String, Vec<KnowledgeEntry>> =
            serde_json::from_str(json).map_err(|e| KnowledgeError::InvalidData(e.to_string()))?;
        Ok(raw
            .into_iter()
            .fold(Self::new(), |kb, (k, v)| kb.with_entries(k, v)))
    }

    pub fn with_entries(mut self, keyword: impl Into<String>, entries: Vec<KnowledgeEntry>) -> Self {
        self.entries
            .entry(keyword.into().to_lowercase())
            .or_default()
            .extend(entries);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl KnowledgeBase for InMemoryKnowledgeBase {
    async fn query(&self, keyword: &str) -> Result<Vec<KnowledgeEntry>, KnowledgeError> {
        Ok(self
            .entries
            .get(&keyword.to_lowercase())
            .cloned()
            .unwrap_or_default())
    }
}

/// Security keywords present in `text`, matched on word boundaries.
pub fn find_keywords(text: &str) -> Vec<&'static str> {
    let lower = text.to_lowercase();
    SECURITY_KEYWORDS
        .iter()
        .copied()
        .filter(|kw| contains_word(&lower, kw))
        .take(MAX_KEYWORDS)
        .collect()
}

fn contains_word(haystack: &str, needle: &str) -> bool {
    haystack.match_indices(needle).any(|(i, _)| {
        let before = haystack[..i].chars().next_back();
        let after = haystack[i + needle.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

/// Query `kb` for every keyword found in `text`.
///
/// Entries are de-duplicated by topic and capped at [`MAX_ENTRIES`]. A failing
/// query is skipped.
pub async fn gather_guidance(kb: &dyn KnowledgeBase, text: &str) -> Vec<KnowledgeEntry> {
    let keywords = find_keywords(text);
    debug!("Knowledge lookup for {} keywords: {:?}", keywords.len(), keywords);

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for keyword in keywords {
        let entries = match kb.query(keyword).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Knowledge base query for '{}' failed: {}", keyword, e);
                continue;
            }
        };
        for entry in entries {
            if out.len() >= MAX_ENTRIES {
                return out;
            }
            if seen.insert(entry.topic.to_lowercase()) {
                out.push(entry);
            }
        }
    }
    out
}
