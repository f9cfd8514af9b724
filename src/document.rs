//! The normalised document model shared by every parser and the fallback path.
//!
//! A [`DocumentModel`] is a value object: it is built once per request, never
//! mutated after the source selector returns it, and serialises with camelCase
//! field names so it can cross the boundary to a presentation layer as-is.
//!
//! The constructors on `DocumentModel` are the only way the crate builds one,
//! which is what keeps the failure invariant (empty text, zero words, empty
//! structure, error present) and the word-count invariant in one place.

use crate::error::{DocumentError, ErrorKind};
use serde::{Deserialize, Serialize};

/// Count whitespace-delimited words, discarding empty tokens.
///
/// Every word count in the crate goes through this function.
///
/// ```rust
/// use edgequake_threatmodel::document::word_count;
///
/// assert_eq!(word_count("  This   has   extra   spaces  "), 4);
/// assert_eq!(word_count("Line one\nLine two\tTabbed text"), 5);
/// ```
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Where the document text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceType {
    AttachmentPdf,
    AttachmentDocx,
    Webpage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSource {
    #[serde(rename = "type")]
    pub kind: SourceType,
}

/// Document metadata. `word_count` always matches `DocumentModel::text`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pages: Option<u32>,
    /// Paragraph count (DOCX only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paragraphs: Option<u32>,
    pub word_count: usize,
}

/// One heading (DOCX) or page (PDF) boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub title: String,
    pub content: String,
    /// Heading depth for DOCX, 1-based page index for PDF. Always ≥ 1.
    pub level: u32,
}

/// Presence and position of a table. Cell content is not extracted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRecord {
    /// Zero-based order of appearance.
    pub index: usize,
    /// Page number (PDF) or zero-based paragraph index (DOCX).
    pub position: usize,
    pub rows: usize,
    pub columns: usize,
}

/// Presence and position of an embedded image. Pixel data is not extracted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub index: usize,
    /// Page number (PDF) or zero-based paragraph index (DOCX).
    pub position: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentStructure {
    pub sections: Vec<Section>,
    pub tables: Vec<TableRecord>,
    pub images: Vec<ImageRecord>,
}

impl DocumentStructure {
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty() && self.tables.is_empty() && self.images.is_empty()
    }
}

/// The normalised output of every parser and of the webpage fallback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentModel {
    pub text: String,
    pub metadata: DocumentMetadata,
    pub structure: DocumentStructure,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Classification of `error`; present iff `error` is.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<DocumentSource>,
}

impl DocumentModel {
    /// A successful model. The word count is derived from `text` here and
    /// nowhere else.
    pub fn extracted(
        text: String,
        mut metadata: DocumentMetadata,
        structure: DocumentStructure,
        source: SourceType,
    ) -> Self {
        metadata.word_count = word_count(&text);
        Self {
            text,
            metadata,
            structure,
            success: true,
            error: None,
            error_kind: None,
            warning: None,
            source: Some(DocumentSource { kind: source }),
        }
    }

    /// A text-only model built from scraped page content.
    pub fn webpage(text: impl Into<String>, warning: impl Into<String>) -> Self {
        let mut model = Self::extracted(
            text.into(),
            DocumentMetadata::default(),
            DocumentStructure::default(),
            SourceType::Webpage,
        );
        model.warning = Some(warning.into());
        model
    }

    /// A failed model: empty text, zero words, empty structure, error set.
    pub fn failed(err: &DocumentError, source: Option<SourceType>) -> Self {
        Self {
            text: String::new(),
            metadata: DocumentMetadata::default(),
            structure: DocumentStructure::default(),
            success: false,
            error: Some(err.to_string()),
            error_kind: Some(err.kind()),
            warning: None,
            source: source.map(|kind| DocumentSource { kind }),
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warning = Some(warning.into());
        self
    }

    pub fn source_type(&self) -> Option<SourceType> {
        self.source.map(|s| s.kind)
    }
}

/// Declared format of an attachment.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DocumentType {
    Pdf,
    Docx,
    Doc,
    /// No type given.
    #[default]
    Unknown,
    /// Anything else, kept verbatim for error reporting.
    Other(String),
}

impl DocumentType {
    /// Parse a declared type, case-insensitively.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.to_ascii_uppercase().as_str() {
            "" => DocumentType::Unknown,
            "PDF" | "APPLICATION/PDF" => DocumentType::Pdf,
            "DOCX" => DocumentType::Docx,
            "DOC" => DocumentType::Doc,
            _ => DocumentType::Other(trimmed.to_string()),
        }
    }

    /// Guess the type from a URL's path extension.
    pub fn from_url(url: &str) -> Self {
        let path = url.split(['?', '#']).next().unwrap_or("");
        let last = path.rsplit('/').next().unwrap_or("");
        match last.rsplit_once('.') {
            Some((_, ext)) => match ext.to_ascii_lowercase().as_str() {
                "pdf" => DocumentType::Pdf,
                "docx" => DocumentType::Docx,
                "doc" => DocumentType::Doc,
                _ => DocumentType::Unknown,
            },
            None => DocumentType::Unknown,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            DocumentType::Pdf => "PDF",
            DocumentType::Docx => "DOCX",
            DocumentType::Doc => "DOC",
            DocumentType::Unknown => "UNKNOWN",
            DocumentType::Other(s) => s,
        }
    }
}

impl Serialize for DocumentType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            DocumentType::Unknown => serializer.serialize_str(""),
            other => serializer.serialize_str(other.as_str()),
        }
    }
}

impl<'de> Deserialize<'de> for DocumentType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.map(|s| DocumentType::parse(&s)).unwrap_or_default())
    }
}

/// An attachment located by the content-detection collaborator.
///
/// Every field defaults so that partially-filled descriptors still
/// deserialise; the source selector validates them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentDescriptor {
    #[serde(default)]
    pub url: String,
    #[serde(rename = "type", default)]
    pub kind: DocumentType,
    #[serde(default)]
    pub name: String,
}

impl AttachmentDescriptor {
    pub fn new(url: impl Into<String>, kind: DocumentType, name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            kind,
            name: name.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_count_rules() {
        assert_eq!(word_count(""), 0);
        assert_eq!(word_count("   \n\t "), 0);
        assert_eq!(word_count("  This   has   extra   spaces  "), 4);
        assert_eq!(word_count("Line one\nLine two\tTabbed text"), 5);
        let t = "repeatable count";
        assert_eq!(word_count(t), word_count(t));
    }

    #[test]
    fn failed_model_upholds_invariant() {
        let m = DocumentModel::failed(&DocumentError::parse("PDF", "Empty or invalid buffer"), None);
        assert!(!m.success);
        assert!(m.text.is_empty());
        assert_eq!(m.metadata.word_count, 0);
        assert!(m.structure.is_empty());
        assert_eq!(m.error.as_deref(), Some("PDF parsing failed: Empty or invalid buffer"));
        assert_eq!(m.error_kind, Some(ErrorKind::Parse));
    }

    #[test]
    fn extracted_model_counts_words() {
        let m = DocumentModel::extracted(
            "one two three".into(),
            DocumentMetadata {
                word_count: 99,
                ..Default::default()
            },
            DocumentStructure::default(),
            SourceType::AttachmentPdf,
        );
        assert!(m.success);
        assert!(m.error.is_none());
        assert_eq!(m.metadata.word_count, 3);
    }

    #[test]
    fn document_type_parsing() {
        assert_eq!(DocumentType::parse("pdf"), DocumentType::Pdf);
        assert_eq!(DocumentType::parse(" DOCX "), DocumentType::Docx);
        assert_eq!(DocumentType::parse(""), DocumentType::Unknown);
        assert_eq!(DocumentType::parse("TXT"), DocumentType::Other("TXT".into()));
        assert_eq!(DocumentType::from_url("https://x/a/spec.PDF?dl=1"), DocumentType::Pdf);
        assert_eq!(DocumentType::from_url("https://x/y.docx#frag"), DocumentType::Docx);
        assert_eq!(DocumentType::from_url("https://x/download"), DocumentType::Unknown);
    }

    #[test]
    fn descriptor_deserialises_from_empty_object() {
        let d: AttachmentDescriptor = serde_json::from_str("{}").unwrap();
        assert!(d.url.is_empty());
        assert_eq!(d.kind, DocumentType::Unknown);

        let d: AttachmentDescriptor =
            serde_json::from_str(r#"{"url":"https://x/y.txt","type":"TXT"}"#).unwrap();
        assert_eq!(d.kind, DocumentType::Other("TXT".into()));
    }

    #[test]
    fn model_serialises_camel_case() {
        let m = DocumentModel::webpage("a b c", "Using webpage content as no attachments were found");
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(v["metadata"]["wordCount"], 3);
        assert_eq!(v["source"]["type"], "WEBPAGE");
        assert!(v.get("error").is_none());
    }
}
