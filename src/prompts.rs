//! Prompts for LLM-based security analysis.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth**: the JSON shape the model is asked for lives
//!    next to the code that assembles the request, in one place.
//!
//! 2. **Testability**: unit tests can inspect the assembled prompt directly
//!    without calling a provider.
//!
//! Callers can override the system prompt via
//! [`crate::config::ProviderConfig::system_prompt`]; the constant here is used
//! only when no override is provided.

use crate::config::ProviderConfig;
use crate::document::DocumentModel;
use crate::knowledge::KnowledgeEntry;

/// Default system prompt for threat-model analysis.
///
/// The schema below must stay in sync with [`crate::output::AnalysisResult`].
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are an application security engineer performing a threat model of a software design document.

Analyse the document supplied by the user and respond with a single JSON object, and nothing else, of this exact shape:

{
  "summary": "2-4 sentence overview of the system and its security posture",
  "assets": ["data, components, or capabilities worth protecting"],
  "threats": [
    {
      "type": "threat category, e.g. Spoofing, Tampering, Repudiation, Information Disclosure, Denial of Service, Elevation of Privilege",
      "description": "what could go wrong and how",
      "level": "LOW | MEDIUM | HIGH | CRITICAL",
      "impact": "consequence if exploited"
    }
  ],
  "testScenarios": [
    {
      "category": "area under test",
      "description": "what the test verifies",
      "steps": ["step 1", "step 2"],
      "expectedResult": "secure behaviour that should be observed"
    }
  ],
  "recommendations": ["concrete mitigation"]
}

Rules:
- Base every threat on something the document actually describes.
- Use only the four level values shown.
- Do NOT wrap the JSON in Markdown fences.
- Do NOT add commentary before or after the JSON."#;

/// Prompt used by the connection test. Any 2xx answer counts as success.
pub const CONNECTION_TEST_PROMPT: &str =
    r#"Reply with the JSON object {"status":"ok"} and nothing else."#;

/// User request when the caller supplies none.
pub const DEFAULT_USER_PROMPT: &str = "Produce a threat model for the following document.";

/// Heading of the knowledge-base section appended to the prompt.
pub const GUIDANCE_HEADING: &str = "Relevant security guidance";

/// A provider-neutral prompt, ready for a provider handler to wrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatPrompt {
    /// System instructions.
    pub system: String,
    /// The full user turn: request, document, hints and guidance.
    pub user: String,
    /// The caller's request on its own.
    pub prompt: String,
    /// The (possibly truncated) document text on its own.
    pub document: String,
}

/// Assemble the prompt for one analysis.
///
/// `vision` adds the document-structure block for models that make use of it.
pub fn build_prompt(
    document: &DocumentModel,
    prompt: &str,
    guidance: &[KnowledgeEntry],
    config: &ProviderConfig,
    vision: bool,
) -> ChatPrompt {
    let system = config
        .system_prompt
        .clone()
        .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());
    let request = if prompt.trim().is_empty() {
        DEFAULT_USER_PROMPT
    } else {
        prompt.trim()
    };
    let text = truncate_document(&document.text, config.max_document_chars);

    let mut user = String::with_capacity(text.len() + 512);
    user.push_str(request);
    user.push_str("\n\n");
    if let Some(title) = document.metadata.title.as_deref() {
        user.push_str(&format!("Document title: {title}\n"));
    }
    user.push_str("Document:\n\"\"\"\n");
    user.push_str(&text);
    user.push_str("\n\"\"\"");

    if vision {
        if let Some(hints) = structure_hints(document) {
            user.push_str("\n\n");
            user.push_str(&hints);
        }
    }

    if !guidance.is_empty() {
        user.push_str(&format!("\n\n{GUIDANCE_HEADING}:\n"));
        for entry in guidance {
            user.push_str(&format!("- {}: {}\n", entry.topic, entry.guidance));
        }
    }

    ChatPrompt {
        system,
        user,
        prompt: request.to_string(),
        document: text,
    }
}

/// Outline of sections, tables and images, or `None` when there is no
/// structure to describe.
pub fn structure_hints(document: &DocumentModel) -> Option<String> {
    let s = &document.structure;
    if s.is_empty() {
        return None;
    }

    let mut out = String::from("Document structure:\n");
    for section in s.sections.iter().take(50) {
        let indent = "  ".repeat(section.level.saturating_sub(1).min(5) as usize);
        out.push_str(&format!("{indent}- {}\n", section.title));
    }
    if s.sections.len() > 50 {
        out.push_str(&format!("  ({} more sections)\n", s.sections.len() - 50));
    }
    out.push_str(&format!("Tables: {}\n", s.tables.len()));
    out.push_str(&format!("Images: {}", s.images.len()));
    Some(out)
}

/// Cut `text` to at most `max_chars` characters, marking the cut.
fn truncate_document(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!(
            "{}\n[... document truncated at {} characters ...]",
            &text[..cut],
            max_chars
        ),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Provider;
    use crate::document::{DocumentMetadata, DocumentStructure, Section, SourceType, TableRecord};

    fn config() -> ProviderConfig {
        ProviderConfig::builder(Provider::Openai)
            .api_key("sk-test")
            .max_document_chars(20)
            .build()
            .unwrap()
    }

    fn structured() -> DocumentModel {
        DocumentModel::extracted(
            "Login uses passwords.".into(),
            DocumentMetadata {
                title: Some("Auth Design".into()),
                ..Default::default()
            },
            DocumentStructure {
                sections: vec![
                    Section {
                        title: "Overview".into(),
                        content: String::new(),
                        level: 1,
                    },
                    Section {
                        title: "Sessions".into(),
                        content: String::new(),
                        level: 2,
                    },
                ],
                tables: vec![TableRecord {
                    index: 0,
                    position: 1,
                    rows: 2,
                    columns: 2,
                }],
                images: Vec::new(),
            },
            SourceType::AttachmentDocx,
        )
    }

    #[test]
    fn default_prompt_names_every_field() {
        for field in ["summary", "assets", "threats", "testScenarios", "expectedResult", "recommendations"] {
            assert!(DEFAULT_SYSTEM_PROMPT.contains(field), "missing {field}");
        }
    }

    #[test]
    fn prompt_embeds_document_and_title() {
        let p = build_prompt(&structured(), "Review auth", &[], &config(), false);
        assert_eq!(p.system, DEFAULT_SYSTEM_PROMPT);
        assert!(p.user.starts_with("Review auth"));
        assert!(p.user.contains("Document title: Auth Design"));
        assert!(p.user.contains("Login uses passwords."));
        assert!(!p.user.contains("Document structure"));
        assert_eq!(p.prompt, "Review auth");
    }

    #[test]
    fn vision_adds_structure_block() {
        let p = build_prompt(&structured(), "", &[], &config(), true);
        assert!(p.user.starts_with(DEFAULT_USER_PROMPT));
        assert!(p.user.contains("- Overview\n  - Sessions"));
        assert!(p.user.contains("Tables: 1"));
    }

    #[test]
    fn guidance_section() {
        let g = vec![KnowledgeEntry::new("Password storage", "Hash with argon2id.")];
        let p = build_prompt(&structured(), "x", &g, &config(), false);
        assert!(p.user.contains("Relevant security guidance:\n- Password storage: Hash with argon2id."));
    }

    #[test]
    fn long_documents_are_truncated() {
        let doc = DocumentModel::webpage("ü".repeat(30), "w");
        let p = build_prompt(&doc, "x", &[], &config(), false);
        assert!(p.document.starts_with(&"ü".repeat(20)));
        assert!(p.document.contains("truncated at 20 characters"));
        assert_eq!(truncate_document("short", 20), "short");
    }

    #[test]
    fn system_prompt_override() {
        let mut c = config();
        c.system_prompt = Some("custom".into());
        assert_eq!(build_prompt(&structured(), "x", &[], &c, false).system, "custom");
    }
}
