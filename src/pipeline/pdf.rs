//! PDF decoding: text, page outline, metadata, and image positions.
//!
//! Decoding works directly on the byte buffer via `lopdf`; no rendering
//! engine is involved. Text comes from each page's content stream, one page
//! at a time, so a single unreadable page degrades to an empty section
//! instead of failing the whole document.
//!
//! ## Step budget
//!
//! Hostile inputs (object bombs, absurd page trees) are rejected up front by
//! the size/object/page caps below, and text accumulation stops at
//! [`MAX_TEXT_CHARS`]. The decoder can panic on malformed fonts or streams,
//! so the whole decode runs under `catch_unwind` and a panic becomes an
//! ordinary parse failure.

use crate::document::{
    DocumentMetadata, DocumentModel, DocumentStructure, ImageRecord, Section, SourceType,
};
use crate::error::DocumentError;
use lopdf::{Dictionary, Document, Object, ObjectId};
use tracing::{debug, info, warn};

const FORMAT: &str = "PDF";

/// Smallest buffer that can hold a header plus an EOF marker.
const MIN_PDF_BYTES: usize = 16;
/// `%PDF-` must appear within this many leading bytes.
const HEADER_SEARCH_WINDOW: usize = 1024;
pub const MAX_PDF_BYTES: usize = 50 * 1024 * 1024;
const MAX_OBJECTS: usize = 500_000;
const MAX_PAGES: usize = 10_000;
pub const MAX_TEXT_CHARS: usize = 5_000_000;
/// Parent-chain hops followed when resolving inherited resources.
const MAX_INHERITANCE_DEPTH: usize = 32;

/// Step budget for one decode.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PdfLimits {
    pub max_bytes: usize,
    pub max_objects: usize,
    pub max_pages: usize,
    pub max_text_chars: usize,
}

impl PdfLimits {
    pub(crate) const DEFAULT: Self = Self {
        max_bytes: MAX_PDF_BYTES,
        max_objects: MAX_OBJECTS,
        max_pages: MAX_PAGES,
        max_text_chars: MAX_TEXT_CHARS,
    };
}

/// Decode a PDF buffer into a [`DocumentModel`].
///
/// Never panics and never returns an error: every failure is a model with
/// `success = false`.
pub fn parse_pdf(buffer: &[u8]) -> DocumentModel {
    parse_pdf_with(buffer, &PdfLimits::DEFAULT)
}

pub(crate) fn parse_pdf_with(buffer: &[u8], limits: &PdfLimits) -> DocumentModel {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| decode(buffer, limits))) {
        Ok(Ok(model)) => model,
        Ok(Err(e)) => {
            warn!("PDF decode failed: {}", e);
            DocumentModel::failed(&e, Some(SourceType::AttachmentPdf))
        }
        Err(_panic) => {
            warn!("PDF decoder panicked on malformed input");
            DocumentModel::failed(
                &DocumentError::parse(FORMAT, "Malformed document (decoder aborted)"),
                Some(SourceType::AttachmentPdf),
            )
        }
    }
}

fn decode(buffer: &[u8], limits: &PdfLimits) -> Result<DocumentModel, DocumentError> {
    check_container(buffer, limits.max_bytes)?;

    let doc = Document::load_mem(buffer)
        .map_err(|e| DocumentError::parse(FORMAT, format!("Corrupt document: {e}")))?;

    if doc.trailer.get(b"Encrypt").is_ok() {
        return Err(DocumentError::parse(FORMAT, "Document is encrypted"));
    }
    if doc.objects.len() > limits.max_objects {
        return Err(DocumentError::parse(
            FORMAT,
            format!("Document too complex ({} objects)", doc.objects.len()),
        ));
    }

    let pages = doc.get_pages();
    if pages.len() > limits.max_pages {
        return Err(DocumentError::parse(
            FORMAT,
            format!("Too many pages ({})", pages.len()),
        ));
    }
    info!("PDF loaded: {} pages, {} objects", pages.len(), doc.objects.len());

    let mut text = String::new();
    let mut structure = DocumentStructure::default();
    let mut unreadable = 0usize;

    for (&page_num, &page_id) in &pages {
        let page_text = match doc.extract_text(&[page_num]) {
            Ok(t) => normalise_page_text(&t),
            Err(e) => {
                debug!("Page {}: text extraction failed: {}", page_num, e);
                unreadable += 1;
                String::new()
            }
        };

        if text.len() + page_text.len() > limits.max_text_chars {
            return Err(DocumentError::parse(
                FORMAT,
                format!("Extracted text exceeds {} characters", limits.max_text_chars),
            ));
        }
        if !page_text.is_empty() {
            if !text.is_empty() {
                text.push_str("\n\n");
            }
            text.push_str(&page_text);
        }

        for (name, width, height) in page_images(&doc, page_id) {
            structure.images.push(ImageRecord {
                index: structure.images.len(),
                position: page_num as usize,
                name: Some(name),
                width,
                height,
            });
        }

        structure.sections.push(Section {
            title: format!("Page {page_num}"),
            content: page_text,
            level: page_num.max(1),
        });
    }

    let info = info_dictionary(&doc);
    let metadata = DocumentMetadata {
        title: info.and_then(|d| info_string(&doc, d, b"Title")),
        author: info.and_then(|d| info_string(&doc, d, b"Author")),
        subject: info.and_then(|d| info_string(&doc, d, b"Subject")),
        pages: Some(pages.len() as u32),
        ..Default::default()
    };

    debug!(
        "PDF extracted {} chars, {} images, {} unreadable pages",
        text.len(),
        structure.images.len(),
        unreadable
    );

    let mut model = DocumentModel::extracted(text, metadata, structure, SourceType::AttachmentPdf);
    if model.text.trim().is_empty() && !pages.is_empty() {
        model.warning = Some("No extractable text found; the PDF may be scanned images".into());
    } else if unreadable > 0 {
        model.warning = Some(format!("Text could not be extracted from {unreadable} page(s)"));
    }
    Ok(model)
}

/// Cheap structural checks before handing the buffer to the decoder.
fn check_container(buffer: &[u8], max_bytes: usize) -> Result<(), DocumentError> {
    if buffer.is_empty() {
        return Err(DocumentError::parse(FORMAT, "Empty or invalid buffer"));
    }
    if buffer.len() < MIN_PDF_BYTES {
        return Err(DocumentError::parse(
            FORMAT,
            format!("Buffer too small to be a PDF ({} bytes)", buffer.len()),
        ));
    }
    if buffer.len() > max_bytes {
        return Err(DocumentError::parse(
            FORMAT,
            format!("Document too large ({} bytes)", buffer.len()),
        ));
    }
    let window = &buffer[..buffer.len().min(HEADER_SEARCH_WINDOW)];
    if !window.windows(5).any(|w| w == b"%PDF-") {
        return Err(DocumentError::parse(FORMAT, "Missing %PDF header"));
    }
    Ok(())
}

/// Collapse the decoder's per-glyph line noise: trim lines, drop blank runs.
fn normalise_page_text(raw: &str) -> String {
    raw.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Object> {
    match obj {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

fn resolve_dict<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Dictionary> {
    match resolve(doc, obj)? {
        Object::Dictionary(d) => Some(d),
        Object::Stream(s) => Some(&s.dict),
        _ => None,
    }
}

fn info_dictionary(doc: &Document) -> Option<&Dictionary> {
    let info = doc.trailer.get(b"Info").ok()?;
    resolve_dict(doc, info)
}

fn info_string(doc: &Document, info: &Dictionary, key: &[u8]) -> Option<String> {
    let obj = resolve(doc, info.get(key).ok()?)?;
    match obj {
        Object::String(bytes, _) => {
            let s = decode_text_string(bytes);
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        _ => None,
    }
}

/// Decode a PDF text string: UTF-16BE with BOM, UTF-8 with BOM, else
/// byte-per-char (PDFDocEncoding agrees with Latin-1 on printable ASCII).
pub(crate) fn decode_text_string(bytes: &[u8]) -> String {
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = rest
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else if let Some(rest) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        String::from_utf8_lossy(rest).into_owned()
    } else {
        bytes.iter().map(|&b| b as char).collect()
    }
}

/// Resources dictionary of a page, following `/Parent` inheritance.
fn page_resources(doc: &Document, page_id: ObjectId) -> Option<&Dictionary> {
    let mut node = doc.get_dictionary(page_id).ok()?;
    for _ in 0..MAX_INHERITANCE_DEPTH {
        if let Ok(res) = node.get(b"Resources") {
            return resolve_dict(doc, res);
        }
        let parent = node.get(b"Parent").ok()?.as_reference().ok()?;
        node = doc.get_dictionary(parent).ok()?;
    }
    None
}

/// `(name, width, height)` for every image XObject on the page.
fn page_images(doc: &Document, page_id: ObjectId) -> Vec<(String, Option<u32>, Option<u32>)> {
    let Some(resources) = page_resources(doc, page_id) else {
        return Vec::new();
    };
    let Some(xobjects) = resources
        .get(b"XObject")
        .ok()
        .and_then(|o| resolve_dict(doc, o))
    else {
        return Vec::new();
    };

    let dimension = |d: &Dictionary, key: &[u8]| {
        d.get(key)
            .ok()
            .and_then(|o| o.as_i64().ok())
            .and_then(|v| u32::try_from(v).ok())
    };

    xobjects
        .iter()
        .filter_map(|(name, obj)| {
            let dict = resolve_dict(doc, obj)?;
            let subtype = dict.get(b"Subtype").ok()?.as_name().ok()?;
            (subtype == b"Image").then(|| {
                (
                    String::from_utf8_lossy(name).into_owned(),
                    dimension(dict, b"Width"),
                    dimension(dict, b"Height"),
                )
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Stream};

    /// Build a small PDF with one text line per page and an Info dictionary.
    fn sample_pdf(pages: &[&str], with_image: bool) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
            "Encoding" => "WinAnsiEncoding",
        });

        let mut xobjects = Dictionary::new();
        if with_image {
            let image_id = doc.add_object(Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => 2,
                    "Height" => 1,
                    "ColorSpace" => "DeviceGray",
                    "BitsPerComponent" => 8,
                },
                vec![0u8, 255u8],
            ));
            xobjects.set("Im1", image_id);
        }
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
            "XObject" => xobjects,
        });

        let mut kids = Vec::new();
        for line in pages {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 12.into()]),
                    Operation::new("Td", vec![72.into(), 720.into()]),
                    Operation::new("Tj", vec![Object::string_literal(*line)]),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id =
                doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        let info_id = doc.add_object(dictionary! {
            "Title" => Object::string_literal("Payment Service Design"),
            "Author" => Object::string_literal("Platform Team"),
        });
        doc.trailer.set("Root", catalog_id);
        doc.trailer.set("Info", info_id);

        let mut buf = Vec::new();
        doc.save_to(&mut buf).unwrap();
        buf
    }

    #[test]
    fn empty_buffer_fails() {
        let m = parse_pdf(&[]);
        assert!(!m.success);
        assert_eq!(m.metadata.word_count, 0);
        assert_eq!(m.error.as_deref(), Some("PDF parsing failed: Empty or invalid buffer"));
        assert_eq!(m.error_kind, Some(ErrorKind::Parse));
    }

    #[test]
    fn tiny_buffer_is_corrupt() {
        let m = parse_pdf(b"%PDF-1.");
        assert!(!m.success);
        assert!(m.text.is_empty());
        assert!(m.structure.is_empty());
    }

    #[test]
    fn missing_header_is_rejected() {
        let m = parse_pdf(&[b'A'; 64]);
        assert!(!m.success);
        assert!(m.error.unwrap().contains("Missing %PDF header"));
    }

    #[test]
    fn truncated_document_yields_well_formed_model() {
        let full = sample_pdf(&["Hello"], false);
        let m = parse_pdf(&full[..40]);
        if m.success {
            assert_eq!(m.metadata.word_count, crate::document::word_count(&m.text));
        } else {
            assert!(m.text.is_empty());
            assert_eq!(m.metadata.word_count, 0);
            assert!(m.error.is_some());
        }
    }

    #[test]
    fn extracts_pages_metadata_and_images() {
        let bytes = sample_pdf(&["Login uses OAuth tokens", "Payments stored encrypted"], true);
        let m = parse_pdf(&bytes);
        assert!(m.success, "error: {:?}", m.error);
        assert!(m.error.is_none());
        assert_eq!(m.metadata.pages, Some(2));
        assert_eq!(m.metadata.title.as_deref(), Some("Payment Service Design"));
        assert_eq!(m.metadata.author.as_deref(), Some("Platform Team"));
        assert!(m.text.contains("OAuth"));
        assert!(m.text.contains("encrypted"));
        assert_eq!(m.metadata.word_count, crate::document::word_count(&m.text));

        assert_eq!(m.structure.sections.len(), 2);
        assert_eq!(m.structure.sections[0].title, "Page 1");
        assert_eq!(m.structure.sections[1].level, 2);

        assert_eq!(m.structure.images.len(), 2);
        assert_eq!(m.structure.images[0].position, 1);
        assert_eq!(m.structure.images[1].position, 2);
        assert_eq!(m.structure.images[0].width, Some(2));
        assert!(m.structure.tables.is_empty());
        assert_eq!(m.source_type(), Some(SourceType::AttachmentPdf));
    }

    fn tight(f: impl FnOnce(&mut PdfLimits)) -> PdfLimits {
        let mut limits = PdfLimits::DEFAULT;
        f(&mut limits);
        limits
    }

    #[test]
    fn buffer_size_budget_is_enforced() {
        let bytes = sample_pdf(&["Hello"], false);
        let m = parse_pdf_with(&bytes, &tight(|l| l.max_bytes = 64));
        assert!(!m.success);
        assert_eq!(m.error_kind, Some(ErrorKind::Parse));
        assert!(m.error.unwrap().contains("too large"));
    }

    #[test]
    fn object_budget_is_enforced() {
        let bytes = sample_pdf(&["Hello"], false);
        let m = parse_pdf_with(&bytes, &tight(|l| l.max_objects = 2));
        assert!(!m.success);
        assert!(m.error.unwrap().contains("too complex"));
    }

    #[test]
    fn page_budget_is_enforced() {
        let bytes = sample_pdf(&["one", "two", "three"], false);
        let m = parse_pdf_with(&bytes, &tight(|l| l.max_pages = 2));
        assert!(!m.success);
        assert_eq!(m.error_kind, Some(ErrorKind::Parse));
        assert!(m.error.unwrap().contains("Too many pages (3)"));
    }

    #[test]
    fn text_budget_is_enforced() {
        let bytes = sample_pdf(&["Login uses OAuth tokens", "Payments stored encrypted"], false);
        let m = parse_pdf_with(&bytes, &tight(|l| l.max_text_chars = 30));
        assert!(!m.success);
        assert_eq!(m.error_kind, Some(ErrorKind::Parse));
        assert!(m.text.is_empty());
        assert!(m.error.unwrap().contains("exceeds 30 characters"));
    }

    #[test]
    fn decode_text_string_variants() {
        assert_eq!(decode_text_string(b"Plain"), "Plain");
        assert_eq!(decode_text_string(&[0xFE, 0xFF, 0x00, 0x48, 0x00, 0x69]), "Hi");
        assert_eq!(decode_text_string(&[0xEF, 0xBB, 0xBF, b'o', b'k']), "ok");
    }

    #[test]
    fn parse_is_deterministic() {
        let bytes = sample_pdf(&["Same input same output"], false);
        assert_eq!(parse_pdf(&bytes), parse_pdf(&bytes));
    }
}
