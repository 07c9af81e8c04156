//! Sectioned text extraction from source documents.
//!
//! Word documents are read directly from their OOXML package: the body in
//! `word/document.xml` is walked paragraph by paragraph, and any paragraph
//! styled `Heading*` or `Title` opens a new [`Section`]. Markdown and plain
//! text files are read as UTF-8, with `#` headings playing the same role.
//!
//! Extraction never panics on bad input; it returns an [`ExtractError`] and
//! the ingest pipeline records it against the offending document.

use quick_xml::events::{BytesStart, Event};
use std::io::Read;

use crate::models::Section;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("unsupported file type: {0}")]
    UnsupportedType(String),
    #[error("docx extraction failed: {0}")]
    Docx(String),
    #[error("file is not valid UTF-8")]
    Encoding,
}

/// Extract sections from a file, dispatching on its extension.
pub fn extract_sections(file_name: &str, bytes: &[u8]) -> Result<Vec<Section>, ExtractError> {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, e)| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "docx" => extract_docx(bytes),
        "md" | "markdown" | "txt" => {
            let text = std::str::from_utf8(bytes).map_err(|_| ExtractError::Encoding)?;
            Ok(extract_markdown(text))
        }
        _ => Err(ExtractError::UnsupportedType(file_name.to_string())),
    }
}

fn extract_docx(bytes: &[u8]) -> Result<Vec<Section>, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ExtractError::Docx("word/document.xml not found".to_string()))?;

    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Docx(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }

    let paragraphs = read_paragraphs(&doc_xml)?;
    let mut builder = SectionBuilder::default();
    for para in paragraphs {
        if para.is_heading {
            builder.heading(para.text);
        } else {
            builder.paragraph(para.text);
        }
    }
    Ok(builder.finish())
}

struct Paragraph {
    text: String,
    is_heading: bool,
}

/// Walk `w:p` elements, collecting run text and the paragraph style.
fn read_paragraphs(xml: &[u8]) -> Result<Vec<Paragraph>, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut paragraphs = Vec::new();

    let mut current: Option<Paragraph> = None;
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"p" => {
                    current = Some(Paragraph {
                        text: String::new(),
                        is_heading: false,
                    })
                }
                b"t" => in_text = true,
                b"pStyle" => mark_heading(&mut current, &e),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"pStyle" => mark_heading(&mut current, &e),
                b"tab" => push_text(&mut current, "\t"),
                b"br" | b"cr" => push_text(&mut current, "\n"),
                b"p" => paragraphs.push(Paragraph {
                    text: String::new(),
                    is_heading: false,
                }),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractError::Docx(e.to_string()))?;
                push_text(&mut current, &text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    if let Some(p) = current.take() {
                        paragraphs.push(p);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(paragraphs)
}

fn mark_heading(current: &mut Option<Paragraph>, e: &BytesStart<'_>) {
    let Some(p) = current.as_mut() else {
        return;
    };
    for attr in e.attributes().flatten() {
        if attr.key.local_name().as_ref() == b"val" {
            let style = String::from_utf8_lossy(&attr.value).to_ascii_lowercase();
            if style.starts_with("heading") || style == "title" {
                p.is_heading = true;
            }
        }
    }
}

fn push_text(current: &mut Option<Paragraph>, text: &str) {
    if let Some(p) = current.as_mut() {
        p.text.push_str(text);
    }
}

/// Split Markdown / plain text into sections at `#` headings.
pub fn extract_markdown(text: &str) -> Vec<Section> {
    let mut builder = SectionBuilder::default();
    let mut para = String::new();

    for line in text.lines() {
        let trimmed = line.trim();
        if let Some(title) = trimmed.strip_prefix('#') {
            builder.paragraph(std::mem::take(&mut para));
            builder.heading(title.trim_start_matches('#').trim().to_string());
        } else if trimmed.is_empty() {
            builder.paragraph(std::mem::take(&mut para));
        } else {
            if !para.is_empty() {
                para.push('\n');
            }
            para.push_str(trimmed);
        }
    }
    builder.paragraph(para);
    builder.finish()
}

/// Accumulates paragraphs under the most recent heading.
#[derive(Default)]
struct SectionBuilder {
    sections: Vec<Section>,
    title: Option<String>,
    body: String,
}

impl SectionBuilder {
    fn heading(&mut self, title: String) {
        self.flush();
        let title = title.trim();
        self.title = (!title.is_empty()).then(|| title.to_string());
    }

    fn paragraph(&mut self, text: String) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if !self.body.is_empty() {
            self.body.push_str("\n\n");
        }
        self.body.push_str(text);
    }

    fn flush(&mut self) {
        if !self.body.is_empty() {
            self.sections.push(Section {
                title: self.title.clone(),
                text: std::mem::take(&mut self.body),
            });
        }
    }

    fn finish(mut self) -> Vec<Section> {
        self.flush();
        self.sections
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn docx(body: &str) -> Vec<u8> {
        let mut buf = std::io::Cursor::new(Vec::new());
        let mut zip = zip::ZipWriter::new(&mut buf);
        zip.start_file("word/document.xml", SimpleFileOptions::default())
            .unwrap();
        write!(
            zip,
            r#"<?xml version="1.0" encoding="UTF-8"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{}</w:body></w:document>"#,
            body
        )
        .unwrap();
        zip.finish().unwrap();
        buf.into_inner()
    }

    #[test]
    fn docx_headings_start_sections() {
        let bytes = docx(concat!(
            r#"<w:p><w:pPr><w:pStyle w:val="Heading1"/></w:pPr><w:r><w:t>Login</w:t></w:r></w:p>"#,
            r#"<w:p><w:r><w:t xml:space="preserve">Users sign in </w:t></w:r><w:r><w:t>with email.</w:t></w:r></w:p>"#,
            r#"<w:p><w:r><w:t>Lockout after 5 attempts.</w:t></w:r></w:p>"#,
            r#"<w:p><w:pPr><w:pStyle w:val="Heading2"/></w:pPr><w:r><w:t>Logout</w:t></w:r></w:p>"#,
            r#"<w:p><w:r><w:t>Sessions end &amp; tokens expire.</w:t></w:r></w:p>"#,
        ));
        let sections = extract_sections("Login_PRD.docx", &bytes).unwrap();
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].title.as_deref(), Some("Login"));
        assert_eq!(
            sections[0].text,
            "Users sign in with email.\n\nLockout after 5 attempts."
        );
        assert_eq!(sections[1].title.as_deref(), Some("Logout"));
        assert_eq!(sections[1].text, "Sessions end & tokens expire.");
    }

    #[test]
    fn docx_text_before_first_heading_has_no_title() {
        let bytes = docx(r#"<w:p><w:r><w:t>Preamble</w:t></w:r></w:p>"#);
        let sections = extract_sections("notes.docx", &bytes).unwrap();
        assert_eq!(sections.len(), 1);
        assert!(sections[0].title.is_none());
    }

    #[test]
    fn invalid_zip_is_a_docx_error() {
        let err = extract_sections("broken.docx", b"not a zip").unwrap_err();
        assert!(matches!(err, ExtractError::Docx(_)));
    }

    #[test]
    fn missing_document_xml_is_reported() {
        let mut buf = std::io::Cursor::new(Vec::new());
        let mut zip = zip::ZipWriter::new(&mut buf);
        zip.start_file("other.xml", SimpleFileOptions::default())
            .unwrap();
        zip.write_all(b"<x/>").unwrap();
        zip.finish().unwrap();
        let err = extract_sections("empty.docx", &buf.into_inner()).unwrap_err();
        assert!(err.to_string().contains("word/document.xml not found"));
    }

    #[test]
    fn markdown_headings_start_sections() {
        let md = "# Overview\nThe API.\n\n## Errors\nReturns 401 on bad credentials.\nLogs the attempt.\n";
        let sections = extract_sections("api.md", md.as_bytes()).unwrap();
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].title.as_deref(), Some("Overview"));
        assert_eq!(sections[1].title.as_deref(), Some("Errors"));
        assert_eq!(
            sections[1].text,
            "Returns 401 on bad credentials.\nLogs the attempt."
        );
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let err = extract_sections("image.png", b"\x89PNG").unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedType(_)));
    }
}
