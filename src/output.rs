//! Analysis output types.
//!
//! [`AnalysisResult`] is the contract consumed by the presentation layer, so
//! its JSON field names (`testScenarios`, `expectedResult`, …) are fixed.
//! Values are only ever constructed by [`crate::pipeline::normalize`].

use crate::document::{DocumentModel, DocumentSource, SourceType};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity classification of a threat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ThreatLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ThreatLevel::Low => "LOW",
            ThreatLevel::Medium => "MEDIUM",
            ThreatLevel::High => "HIGH",
            ThreatLevel::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Threat {
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    pub level: ThreatLevel,
    pub impact: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestScenario {
    pub category: String,
    pub description: String,
    pub steps: Vec<String>,
    pub expected_result: String,
}

/// Validated result of one analysis run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub summary: String,
    pub assets: Vec<String>,
    pub threats: Vec<Threat>,
    pub test_scenarios: Vec<TestScenario>,
    pub recommendations: Vec<String>,
}

impl AnalysisResult {
    /// Highest threat level present, if any threats were reported.
    pub fn max_level(&self) -> Option<ThreatLevel> {
        self.threats.iter().map(|t| t.level).max()
    }
}

/// One analysis invocation: the parsed document plus the caller's instructions.
///
/// Transient; built per call and owned by the caller.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisRequest {
    pub content: DocumentModel,
    pub prompt: String,
    /// Where `content` came from; `None` when the document failed before a
    /// source was chosen.
    pub source: Option<DocumentSource>,
}

impl AnalysisRequest {
    pub fn new(content: DocumentModel, prompt: impl Into<String>) -> Self {
        let source = content.source;
        Self {
            content,
            prompt: prompt.into(),
            source,
        }
    }

    pub fn source_type(&self) -> Option<SourceType> {
        self.source.map(|s| s.kind)
    }
}

/// Outcome of a connectivity check. Never an error: failures land in `detail`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub success: bool,
    pub detail: String,
}
