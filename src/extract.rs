//! Plain-text extraction for uploaded documents (PDF, TXT, DOCX).
//!
//! [`DocumentFormat::from_filename`] gatekeeps the closed set of supported
//! extensions. [`extract_text`] never fails on a supported format: parse
//! failures are logged and yield an empty string, which the ingest pipeline
//! turns into [`DocChatError::EmptyDocument`](crate::error::DocChatError).

use std::io::Read;
use std::path::Path;

use quick_xml::events::Event;
use tracing::{debug, warn};

use crate::error::{DocChatError, Result};

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Supported upload formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Txt,
    Docx,
}

impl DocumentFormat {
    /// Resolve the format from a file name's extension (case-insensitive).
    ///
    /// Fails with [`DocChatError::UnsupportedFormat`] for anything outside
    /// `.pdf`, `.txt`, `.docx`; no bytes are inspected.
    pub fn from_filename(name: &str) -> Result<Self> {
        let ext = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        match ext.as_str() {
            "pdf" => Ok(DocumentFormat::Pdf),
            "txt" => Ok(DocumentFormat::Txt),
            "docx" => Ok(DocumentFormat::Docx),
            "" => Err(DocChatError::UnsupportedFormat(name.to_string())),
            other => Err(DocChatError::UnsupportedFormat(format!(".{}", other))),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Txt => "txt",
            DocumentFormat::Docx => "docx",
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("DOCX extraction failed: {0}")]
    Ooxml(String),
}

/// Extract a best-effort plain-text rendition of `bytes`.
///
/// Returns `""` when the document cannot be parsed at all.
pub fn extract_text(format: DocumentFormat, bytes: &[u8]) -> String {
    let result = match format {
        DocumentFormat::Txt => Ok(String::from_utf8_lossy(bytes).into_owned()),
        DocumentFormat::Docx => extract_docx(bytes),
        DocumentFormat::Pdf => extract_pdf(bytes),
    };

    match result {
        Ok(text) => {
            debug!(format = format.extension(), chars = text.chars().count(), "extracted text");
            text
        }
        Err(e) => {
            warn!(format = format.extension(), error = %e, "extraction failed, no text recovered");
            String::new()
        }
    }
}

// ============ PDF ============

/// Per-page extraction with lopdf, skipping pages that yield nothing. Falls
/// back to pdf-extract's whole-document pass when no page produced text.
fn extract_pdf(bytes: &[u8]) -> std::result::Result<String, ExtractError> {
    extract_pdf_with_fallback(bytes, |bytes| {
        pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
    })
}

fn extract_pdf_with_fallback<F>(bytes: &[u8], fallback: F) -> std::result::Result<String, ExtractError>
where
    F: FnOnce(&[u8]) -> std::result::Result<String, ExtractError>,
{
    let paged = match lopdf::Document::load_mem(bytes) {
        Ok(doc) => extract_pdf_pages(&doc),
        Err(e) => {
            debug!(error = %e, "lopdf could not load document");
            String::new()
        }
    };
    if !paged.trim().is_empty() {
        return Ok(paged);
    }

    debug!("no page yielded text, trying whole-document extraction");
    fallback(bytes)
}

/// Text of each page with trailing whitespace trimmed, joined by `\n`.
fn extract_pdf_pages(doc: &lopdf::Document) -> String {
    let mut pages = Vec::new();
    for page_number in doc.get_pages().into_keys() {
        match doc.extract_text(&[page_number]) {
            Ok(text) if !text.trim().is_empty() => pages.push(text.trim_end().to_string()),
            Ok(_) => debug!(page = page_number, "skipping PDF page without text"),
            Err(e) => warn!(page = page_number, error = %e, "skipping unreadable PDF page"),
        }
    }
    pages.join("\n")
}

// ============ DOCX ============

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> std::result::Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> std::result::Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let doc_xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
    extract_docx_paragraphs(&doc_xml)
}

/// Collect the text of every `w:p`, one paragraph per line.
///
/// Paragraphs can nest (a text box inside a run holds its own `w:p`), so open
/// paragraphs are kept on a stack. A nested paragraph is emitted when it
/// closes, ahead of the paragraph that contains it.
fn extract_docx_paragraphs(xml: &[u8]) -> std::result::Result<String, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut paragraphs: Vec<String> = Vec::new();
    let mut open: Vec<String> = Vec::new();
    let mut run_depth = 0usize;
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"p" => open.push(String::new()),
                b"r" => run_depth += 1,
                b"t" => in_text = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"p" => paragraphs.push(String::new()),
                b"tab" if run_depth > 0 => push_text(&mut open, "\t"),
                b"br" | b"cr" if run_depth > 0 => push_text(&mut open, "\n"),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                push_text(&mut open, &text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"r" => run_depth = run_depth.saturating_sub(1),
                b"p" => {
                    if let Some(paragraph) = open.pop() {
                        paragraphs.push(paragraph);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(paragraphs.join("\n"))
}

/// Append to the innermost open paragraph; text outside any paragraph is dropped.
fn push_text(open: &mut [String], text: &str) {
    if let Some(current) = open.last_mut() {
        current.push_str(text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn docx_with_body(body: &str) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            let xml = format!(
                "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
                body
            );
            zip.write_all(xml.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn unsupported_extension_rejected_without_parsing() {
        let err = DocumentFormat::from_filename("contract.xlsx").unwrap_err();
        assert!(matches!(err, DocChatError::UnsupportedFormat(ref ext) if ext == ".xlsx"));
        assert!(DocumentFormat::from_filename("README").is_err());
    }

    #[test]
    fn extension_match_is_case_insensitive() {
        assert_eq!(
            DocumentFormat::from_filename("Notice.PDF").unwrap(),
            DocumentFormat::Pdf
        );
        assert_eq!(
            DocumentFormat::from_filename("a.b.Docx").unwrap(),
            DocumentFormat::Docx
        );
        assert_eq!(
            DocumentFormat::from_filename("notes.txt").unwrap(),
            DocumentFormat::Txt
        );
    }

    #[test]
    fn txt_decodes_lossily() {
        let text = extract_text(DocumentFormat::Txt, b"caf\xff rules");
        assert!(text.starts_with("caf"));
        assert!(text.ends_with(" rules"));
    }

    #[test]
    fn docx_paragraphs_joined_by_newline() {
        let bytes = docx_with_body(
            "<w:p><w:r><w:t>First </w:t></w:r><w:r><w:t>line</w:t></w:r></w:p>\
             <w:p/>\
             <w:p><w:r><w:t>Terms &amp; conditions</w:t><w:tab/><w:t>apply</w:t></w:r></w:p>",
        );
        let text = extract_text(DocumentFormat::Docx, &bytes);
        assert_eq!(text, "First line\n\nTerms & conditions\tapply");
    }

    #[test]
    fn docx_text_box_keeps_surrounding_paragraph_text() {
        let bytes = docx_with_body(
            "<w:p>\
               <w:r><w:t xml:space=\"preserve\">Alpha </w:t></w:r>\
               <w:r><w:pict><w:txbxContent>\
                 <w:p><w:r><w:t>Boxed</w:t></w:r></w:p>\
               </w:txbxContent></w:pict></w:r>\
               <w:r><w:t>Gamma</w:t></w:r>\
             </w:p>\
             <w:p><w:r><w:t>After</w:t></w:r></w:p>",
        );
        let text = extract_text(DocumentFormat::Docx, &bytes);
        assert_eq!(text, "Boxed\nAlpha Gamma\nAfter");
    }

    #[test]
    fn invalid_docx_yields_empty_text() {
        assert_eq!(extract_text(DocumentFormat::Docx, b"not a zip"), "");
    }

    #[test]
    fn docx_without_document_xml_yields_empty_text() {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            zip.start_file("other.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(b"<x/>").unwrap();
            zip.finish().unwrap();
        }
        assert_eq!(extract_text(DocumentFormat::Docx, &buf), "");
    }

    #[test]
    fn invalid_pdf_yields_empty_text() {
        assert_eq!(extract_text(DocumentFormat::Pdf, b"not a pdf"), "");
    }

    /// PDF with one page per content stream, all sharing a Helvetica font.
    fn pdf_with_pages(contents: &[&str]) -> Vec<u8> {
        let page_ids: Vec<usize> = (0..contents.len()).map(|i| 4 + 2 * i).collect();
        let kids = page_ids
            .iter()
            .map(|id| format!("{} 0 R", id))
            .collect::<Vec<_>>()
            .join(" ");

        let mut objects = vec![
            "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
            format!("<< /Type /Pages /Kids [{}] /Count {} >>", kids, contents.len()),
            "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string(),
        ];
        for (i, content) in contents.iter().enumerate() {
            objects.push(format!(
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents {} 0 R \
                 /Resources << /Font << /F1 3 0 R >> >> >>",
                5 + 2 * i
            ));
            objects.push(format!(
                "<< /Length {} >> stream\n{}\nendstream",
                content.len(),
                content
            ));
        }

        let mut out = b"%PDF-1.4\n".to_vec();
        let mut offsets = Vec::new();
        for (i, body) in objects.iter().enumerate() {
            offsets.push(out.len());
            out.extend_from_slice(format!("{} 0 obj {} endobj\n", i + 1, body).as_bytes());
        }
        let xref_start = out.len();
        out.extend_from_slice(format!("xref\n0 {}\n", objects.len() + 1).as_bytes());
        out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
        for offset in offsets {
            out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
        }
        out.extend_from_slice(
            format!(
                "trailer << /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
                objects.len() + 1,
                xref_start
            )
            .as_bytes(),
        );
        out
    }

    const DRAWING_ONLY: &str = "0 0 m 100 100 l S";

    fn unused_fallback(_: &[u8]) -> std::result::Result<String, ExtractError> {
        panic!("whole-document fallback should not run");
    }

    #[test]
    fn pdf_pages_without_text_are_skipped_and_rest_joined() {
        let bytes = pdf_with_pages(&[
            "BT /F1 12 Tf 72 700 Td (Notice to vacate) Tj ET",
            DRAWING_ONLY,
            "BT /F1 12 Tf 72 700 Td (Deposit returned) Tj ET",
        ]);
        let text = extract_pdf_with_fallback(&bytes, unused_fallback).unwrap();
        assert_eq!(text, "Notice to vacate\nDeposit returned");
    }

    #[test]
    fn pdf_without_page_text_uses_fallback() {
        let bytes = pdf_with_pages(&[DRAWING_ONLY, DRAWING_ONLY]);
        let mut called = false;
        let text = extract_pdf_with_fallback(&bytes, |_| {
            called = true;
            Ok("recovered by fallback".to_string())
        })
        .unwrap();
        assert!(called);
        assert_eq!(text, "recovered by fallback");
    }

    #[test]
    fn unloadable_pdf_uses_fallback_and_its_error_surfaces() {
        let err = extract_pdf_with_fallback(b"%PDF-1.4 truncated", |_| {
            Err(ExtractError::Pdf("no xref".to_string()))
        })
        .unwrap_err();
        assert!(err.to_string().contains("no xref"));
    }
}
