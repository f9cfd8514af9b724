//! DOCX decoding: paragraphs, heading outline, tables, images, core metadata.
//!
//! A DOCX file is a zip container; the body lives in `word/document.xml`,
//! title/author in `docProps/core.xml`, and the application's page count in
//! `docProps/app.xml`. The body is walked as a single pass of XML events:
//!
//! * `w:p` ends a paragraph; its `w:pStyle` (`Title`, `HeadingN`) or
//!   `w:outlineLvl` makes it a heading and opens a new section.
//! * `w:tbl` at any depth is recorded once (nested tables included) with its
//!   row count and the widest row's cell count; cell text still flows into
//!   the document text in reading order.
//! * `w:drawing` / `w:pict` record an image at the current paragraph index.
//! * Text-box paragraphs (`w:txbxContent`) nest inside the paragraph that
//!   anchors them; their text is kept as separate lines of that paragraph.
//! * `mc:AlternateContent` carries the same object twice; once an
//!   `mc:Choice` has been read, its `mc:Fallback` is skipped.
//!
//! ## Step budget
//!
//! Compressed size, the uncompressed size of each part read, and the number
//! of XML events are all capped; exceeding any of them is a parse failure.

use crate::document::{
    DocumentMetadata, DocumentModel, DocumentStructure, ImageRecord, Section, SourceType,
    TableRecord,
};
use crate::error::DocumentError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::io::{Cursor, Read};
use tracing::{debug, info, warn};

const FORMAT: &str = "DOCX";

/// Size of a zip end-of-central-directory record, the smallest valid archive.
const MIN_DOCX_BYTES: usize = 22;
pub const MAX_DOCX_BYTES: usize = 50 * 1024 * 1024;
const MAX_PART_BYTES: u64 = 64 * 1024 * 1024;
const MAX_XML_EVENTS: usize = 4_000_000;

/// Step budget for one decode.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DocxLimits {
    pub max_bytes: usize,
    pub max_part_bytes: u64,
    pub max_events: usize,
    pub max_text_chars: usize,
}

impl DocxLimits {
    pub(crate) const DEFAULT: Self = Self {
        max_bytes: MAX_DOCX_BYTES,
        max_part_bytes: MAX_PART_BYTES,
        max_events: MAX_XML_EVENTS,
        max_text_chars: super::pdf::MAX_TEXT_CHARS,
    };
}

const BODY_PART: &str = "word/document.xml";
const CORE_PART: &str = "docProps/core.xml";
const APP_PART: &str = "docProps/app.xml";

/// Decode a DOCX buffer into a [`DocumentModel`].
///
/// Never panics and never returns an error: every failure is a model with
/// `success = false`.
pub fn parse_docx(buffer: &[u8]) -> DocumentModel {
    parse_docx_with(buffer, &DocxLimits::DEFAULT)
}

pub(crate) fn parse_docx_with(buffer: &[u8], limits: &DocxLimits) -> DocumentModel {
    match decode(buffer, limits) {
        Ok(model) => model,
        Err(e) => {
            warn!("DOCX decode failed: {}", e);
            DocumentModel::failed(&e, Some(SourceType::AttachmentDocx))
        }
    }
}

fn decode(buffer: &[u8], limits: &DocxLimits) -> Result<DocumentModel, DocumentError> {
    if buffer.is_empty() {
        return Err(DocumentError::parse(FORMAT, "Empty or invalid buffer"));
    }
    if buffer.len() < MIN_DOCX_BYTES {
        return Err(DocumentError::parse(
            FORMAT,
            format!("Buffer too small to be a DOCX ({} bytes)", buffer.len()),
        ));
    }
    if buffer.len() > limits.max_bytes {
        return Err(DocumentError::parse(
            FORMAT,
            format!("Document too large ({} bytes)", buffer.len()),
        ));
    }

    let mut archive = zip::ZipArchive::new(Cursor::new(buffer))
        .map_err(|e| DocumentError::parse(FORMAT, format!("Not a valid zip container: {e}")))?;

    let body_xml = read_part(&mut archive, BODY_PART, limits.max_part_bytes)?.ok_or_else(|| {
        DocumentError::parse(FORMAT, format!("Missing {BODY_PART}; not a Word document"))
    })?;
    let body = walk_body(&body_xml, limits)?;
    info!(
        "DOCX body: {} paragraphs, {} headings, {} tables, {} images",
        body.paragraphs,
        body.structure.sections.len(),
        body.structure.tables.len(),
        body.structure.images.len()
    );

    let core = match read_part(&mut archive, CORE_PART, limits.max_part_bytes) {
        Ok(Some(xml)) => read_core_properties(&xml),
        Ok(None) => CoreProperties::default(),
        Err(e) => {
            debug!("Ignoring unreadable {}: {}", CORE_PART, e);
            CoreProperties::default()
        }
    };
    let app_pages = match read_part(&mut archive, APP_PART, limits.max_part_bytes) {
        Ok(Some(xml)) => read_app_pages(&xml),
        _ => None,
    };

    let metadata = DocumentMetadata {
        title: core.title,
        author: core.creator,
        subject: core.subject,
        pages: Some(app_pages.unwrap_or(body.page_breaks + 1)),
        paragraphs: Some(body.paragraphs),
        ..Default::default()
    };

    Ok(DocumentModel::extracted(
        body.text,
        metadata,
        body.structure,
        SourceType::AttachmentDocx,
    ))
}

/// Read a zip part as UTF-8, refusing parts whose declared or actual size
/// exceeds the budget. `Ok(None)` when the part is absent.
fn read_part(
    archive: &mut zip::ZipArchive<Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> Result<Option<String>, DocumentError> {
    let file = match archive.by_name(name) {
        Ok(f) => f,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(DocumentError::parse(FORMAT, format!("{name}: {e}"))),
    };
    if file.size() > max_bytes {
        return Err(DocumentError::parse(
            FORMAT,
            format!("{name} too large ({} bytes uncompressed)", file.size()),
        ));
    }

    // The declared size can lie; cap the actual read as well.
    let mut raw = Vec::new();
    file.take(max_bytes + 1)
        .read_to_end(&mut raw)
        .map_err(|e| DocumentError::parse(FORMAT, format!("{name}: {e}")))?;
    if raw.len() as u64 > max_bytes {
        return Err(DocumentError::parse(FORMAT, format!("{name} too large")));
    }

    String::from_utf8(raw)
        .map(Some)
        .map_err(|_| DocumentError::parse(FORMAT, format!("{name} is not valid UTF-8")))
}

/// Everything extracted from `word/document.xml`.
#[derive(Debug, Default)]
struct Body {
    text: String,
    structure: DocumentStructure,
    paragraphs: u32,
    page_breaks: u32,
}

/// An open `w:tbl` and the row/cell counts seen so far.
#[derive(Debug)]
struct OpenTable {
    record: usize,
    cells_in_row: usize,
}

#[derive(Debug, Default)]
struct ParagraphState {
    text: String,
    heading_level: Option<u32>,
    in_run: bool,
    in_text_run: bool,
}

fn walk_body(xml: &str, limits: &DocxLimits) -> Result<Body, DocumentError> {
    let mut reader = Reader::from_str(xml);
    let mut body = Body::default();
    // Innermost last; more than one entry only inside text boxes.
    let mut paras: Vec<ParagraphState> = Vec::new();
    let mut tables: Vec<OpenTable> = Vec::new();
    // One flag per open mc:AlternateContent: has a Choice been read?
    let mut alternates: Vec<bool> = Vec::new();
    let mut skip_depth = 0usize;
    let mut current_section: Option<Section> = None;
    let mut events = 0usize;

    loop {
        events += 1;
        if events > limits.max_events {
            return Err(DocumentError::parse(
                FORMAT,
                format!("Document too complex (more than {} XML events)", limits.max_events),
            ));
        }

        let event = reader
            .read_event()
            .map_err(|e| DocumentError::parse(FORMAT, format!("Malformed XML: {e}")))?;

        if skip_depth > 0 {
            match event {
                Event::Start(_) => skip_depth += 1,
                Event::End(_) => skip_depth -= 1,
                Event::Eof => break,
                _ => {}
            }
            continue;
        }

        match event {
            Event::Start(ref e) => match e.local_name().as_ref() {
                b"AlternateContent" => alternates.push(false),
                b"Choice" => {
                    if let Some(taken) = alternates.last_mut() {
                        *taken = true;
                    }
                }
                b"Fallback" if alternates.last() == Some(&true) => skip_depth = 1,
                b"p" => paras.push(ParagraphState::default()),
                name => {
                    on_open(e, &mut body, paras.last_mut(), &mut tables);
                    if let Some(para) = paras.last_mut() {
                        match name {
                            b"t" => para.in_text_run = true,
                            b"r" => para.in_run = true,
                            _ => {}
                        }
                    }
                }
            },
            Event::Empty(ref e) => on_open(e, &mut body, paras.last_mut(), &mut tables),
            Event::Text(ref t) => {
                if let Some(para) = paras.last_mut().filter(|p| p.in_text_run) {
                    let s = t.unescape().map_err(|e| {
                        DocumentError::parse(FORMAT, format!("Bad text escape: {e}"))
                    })?;
                    para.text.push_str(&s);
                }
            }
            Event::End(ref e) => match e.local_name().as_ref() {
                b"t" => {
                    if let Some(para) = paras.last_mut() {
                        para.in_text_run = false;
                    }
                }
                b"r" => {
                    if let Some(para) = paras.last_mut() {
                        para.in_run = false;
                    }
                }
                b"p" => {
                    let Some(finished) = paras.pop() else { continue };
                    match paras.last_mut() {
                        Some(outer) => merge_nested(outer, finished),
                        None => finish_paragraph(
                            &mut body,
                            finished,
                            &mut current_section,
                            limits.max_text_chars,
                        )?,
                    }
                }
                b"AlternateContent" => {
                    alternates.pop();
                }
                b"tr" => {
                    if let Some(open) = tables.last_mut() {
                        let rec = &mut body.structure.tables[open.record];
                        rec.columns = rec.columns.max(open.cells_in_row);
                        open.cells_in_row = 0;
                    }
                }
                b"tbl" => {
                    tables.pop();
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(section) = current_section.take() {
        body.structure.sections.push(section);
    }
    Ok(body)
}

/// Fold a text-box paragraph into its anchoring paragraph as its own line.
fn merge_nested(outer: &mut ParagraphState, inner: ParagraphState) {
    let line = inner.text.trim();
    if line.is_empty() {
        return;
    }
    if !outer.text.is_empty() && !outer.text.ends_with('\n') {
        outer.text.push('\n');
    }
    outer.text.push_str(line);
    outer.text.push('\n');
}

/// Handle a start or self-closing element.
fn on_open(
    e: &BytesStart<'_>,
    body: &mut Body,
    para: Option<&mut ParagraphState>,
    tables: &mut Vec<OpenTable>,
) {
    let mut scratch = ParagraphState::default();
    let para = para.unwrap_or(&mut scratch);
    match e.local_name().as_ref() {
        b"pStyle" => {
            if let Some(style) = attr(e, b"val") {
                if let Some(level) = heading_level_from_style(&style) {
                    para.heading_level = Some(level);
                }
            }
        }
        b"outlineLvl" => {
            if para.heading_level.is_none() {
                if let Some(lvl) = attr(e, b"val").and_then(|v| v.parse::<u32>().ok()) {
                    // Level 9 means "body text" in Word.
                    if lvl < 9 {
                        para.heading_level = Some(lvl + 1);
                    }
                }
            }
        }
        // w:tab also appears in paragraph tab-stop definitions; only runs count.
        b"tab" if para.in_run => para.text.push('\t'),
        b"br" if para.in_run => {
            if attr(e, b"type").as_deref() == Some("page") {
                body.page_breaks += 1;
            } else {
                para.text.push('\n');
            }
        }
        b"tbl" => {
            body.structure.tables.push(TableRecord {
                index: body.structure.tables.len(),
                position: body.paragraphs as usize,
                rows: 0,
                columns: 0,
            });
            tables.push(OpenTable {
                record: body.structure.tables.len() - 1,
                cells_in_row: 0,
            });
        }
        b"tr" => {
            if let Some(open) = tables.last() {
                body.structure.tables[open.record].rows += 1;
            }
        }
        b"tc" => {
            if let Some(open) = tables.last_mut() {
                open.cells_in_row += 1;
            }
        }
        b"drawing" | b"pict" => {
            body.structure.images.push(ImageRecord {
                index: body.structure.images.len(),
                position: body.paragraphs as usize,
                name: None,
                width: None,
                height: None,
            });
        }
        b"docPr" => {
            // Drawing properties follow the w:drawing start; name the image.
            if let Some(img) = body.structure.images.last_mut() {
                if img.name.is_none() {
                    img.name = attr(e, b"name");
                }
            }
        }
        _ => {}
    }
}

fn finish_paragraph(
    body: &mut Body,
    finished: ParagraphState,
    current_section: &mut Option<Section>,
    max_text_chars: usize,
) -> Result<(), DocumentError> {
    body.paragraphs += 1;
    let line = finished.text.trim_end().to_string();

    if body.text.len() + line.len() > max_text_chars {
        return Err(DocumentError::parse(
            FORMAT,
            format!("Extracted text exceeds {max_text_chars} characters"),
        ));
    }

    match finished.heading_level {
        Some(level) if !line.trim().is_empty() => {
            if let Some(done) = current_section.take() {
                body.structure.sections.push(done);
            }
            *current_section = Some(Section {
                title: line.trim().to_string(),
                content: String::new(),
                level: level.max(1),
            });
        }
        _ => {
            if let Some(section) = current_section.as_mut() {
                if !line.trim().is_empty() {
                    if !section.content.is_empty() {
                        section.content.push('\n');
                    }
                    section.content.push_str(&line);
                }
            }
        }
    }

    if !line.trim().is_empty() {
        if !body.text.is_empty() {
            body.text.push('\n');
        }
        body.text.push_str(&line);
    }
    Ok(())
}

/// `Title` → 1, `Heading1`…`Heading9` (also `heading 2`, `Heading2Char`) → N.
fn heading_level_from_style(style: &str) -> Option<u32> {
    let lower = style.to_ascii_lowercase().replace(' ', "");
    if lower == "title" {
        return Some(1);
    }
    let rest = lower.strip_prefix("heading")?;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse::<u32>().ok().filter(|n| (1..=9).contains(n))
}

fn attr(e: &BytesStart<'_>, local: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == local)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

#[derive(Debug, Default, PartialEq, Eq)]
struct CoreProperties {
    title: Option<String>,
    creator: Option<String>,
    subject: Option<String>,
}

/// Pull `dc:title`, `dc:creator`, `dc:subject` from `docProps/core.xml`.
fn read_core_properties(xml: &str) -> CoreProperties {
    let mut props = CoreProperties::default();
    for (field, value) in simple_elements(xml, &[&b"title"[..], &b"creator"[..], &b"subject"[..]]) {
        let slot = match field.as_slice() {
            b"title" => &mut props.title,
            b"creator" => &mut props.creator,
            _ => &mut props.subject,
        };
        if slot.is_none() {
            *slot = Some(value);
        }
    }
    props
}

/// `<Pages>` from `docProps/app.xml`.
fn read_app_pages(xml: &str) -> Option<u32> {
    simple_elements(xml, &[&b"Pages"[..]])
        .into_iter()
        .find_map(|(_, v)| v.parse().ok())
}

/// Collect the trimmed, non-empty text of leaf elements with the given
/// local names. Stops quietly on malformed XML; these parts are optional.
fn simple_elements(xml: &str, names: &[&[u8]]) -> Vec<(Vec<u8>, String)> {
    let mut reader = Reader::from_str(xml);
    let mut out = Vec::new();
    let mut current: Option<Vec<u8>> = None;
    let mut events = 0usize;

    loop {
        events += 1;
        if events > DocxLimits::DEFAULT.max_events {
            break;
        }
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.local_name().as_ref().to_vec();
                current = names.contains(&name.as_slice()).then_some(name);
            }
            Ok(Event::Text(t)) => {
                if let Some(ref name) = current {
                    if let Ok(text) = t.unescape() {
                        let text = text.trim();
                        if !text.is_empty() {
                            out.push((name.clone(), text.to_string()));
                        }
                    }
                }
            }
            Ok(Event::End(_)) => current = None,
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
    }
    out
}
