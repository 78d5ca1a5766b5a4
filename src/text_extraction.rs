use regex::Regex;
use std::io::{Cursor, Read};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::errors::GenerationError;
use crate::file_store::{DOCX_MIME_TYPE, FileStore};
use crate::llm_service::LLMService;
use crate::models::{ExtractedText, GenerationOptions};
use crate::prompts::{NO_TEXT_SENTINEL, extraction_prompt};
use crate::{log_performance, log_service_error, log_service_start};

const EXTRACTION_TEMPERATURE: f32 = 0.1;
const EXTRACTION_MAX_TOKENS: u32 = 4096;

/// How a document's text is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    WordDocument,
    PlainText,
    Image,
    Pdf,
}

impl DocumentKind {
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match mime.as_str() {
            DOCX_MIME_TYPE => Some(DocumentKind::WordDocument),
            "text/plain" => Some(DocumentKind::PlainText),
            "application/pdf" => Some(DocumentKind::Pdf),
            m if m.starts_with("image/") => Some(DocumentKind::Image),
            _ => None,
        }
    }
}

/// Turns an uploaded file into plain text: locally for word-processor and
/// text files, through the vision path for images and PDFs.
#[derive(Clone)]
pub struct DocumentExtractor {
    llm: Arc<LLMService>,
    store: Arc<dyn FileStore>,
}

impl DocumentExtractor {
    pub fn new(llm: Arc<LLMService>, store: Arc<dyn FileStore>) -> Self {
        Self { llm, store }
    }

    pub async fn extract_text(&self, file_id: &str) -> Result<ExtractedText, GenerationError> {
        log_service_start!("document_extractor", "extract_text", file_id = file_id);
        let start = Instant::now();

        let metadata = self.store.file_metadata(file_id).await?;
        let kind = DocumentKind::from_content_type(&metadata.content_type).ok_or_else(|| {
            GenerationError::UnsupportedContentType(metadata.content_type.clone())
        })?;

        let bytes = self.store.file_bytes(file_id).await?;
        debug!(
            file_id = %file_id,
            content_type = %metadata.content_type,
            size = bytes.len(),
            "Loaded document"
        );

        let result = self
            .extract_from_bytes(file_id, kind, &metadata.content_type, &bytes)
            .await;

        match &result {
            Ok(extracted) => {
                info!(
                    file_id = %file_id,
                    kind = ?kind,
                    text_length = extracted.text.len(),
                    "Text extracted"
                );
                log_performance!(
                    "extract_text",
                    duration_ms = start.elapsed().as_millis() as u64
                );
            }
            Err(err) => {
                log_service_error!("document_extractor", "extract_text", error = err);
            }
        }

        result
    }

    async fn extract_from_bytes(
        &self,
        file_id: &str,
        kind: DocumentKind,
        content_type: &str,
        bytes: &[u8],
    ) -> Result<ExtractedText, GenerationError> {
        let text = match kind {
            DocumentKind::WordDocument => extract_docx_text(bytes)?,
            DocumentKind::PlainText => String::from_utf8_lossy(bytes).into_owned(),
            DocumentKind::Image | DocumentKind::Pdf => {
                let prompt = extraction_prompt(kind == DocumentKind::Pdf);
                let options = GenerationOptions::default()
                    .with_temperature(EXTRACTION_TEMPERATURE)
                    .with_max_output_tokens(EXTRACTION_MAX_TOKENS);
                let reply = self
                    .llm
                    .generate_with_vision(&prompt, bytes, content_type, &options)
                    .await?
                    .text;
                if is_no_text_reply(&reply) {
                    return Err(GenerationError::NoTextExtracted(file_id.to_string()));
                }
                reply
            }
        };

        let text = text.trim();
        if text.is_empty() {
            return Err(GenerationError::NoTextExtracted(file_id.to_string()));
        }

        Ok(ExtractedText {
            file_id: file_id.to_string(),
            text: text.to_string(),
        })
    }
}

/// Pull the visible text out of a `.docx` package. Paragraph ends become
/// newlines, tabs and line breaks are preserved.
pub fn extract_docx_text(bytes: &[u8]) -> Result<String, GenerationError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| GenerationError::DocumentRead(format!("not a valid .docx archive: {}", e)))?;

    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| GenerationError::DocumentRead(format!("word/document.xml missing: {}", e)))?
        .read_to_string(&mut xml)
        .map_err(|e| GenerationError::DocumentRead(e.to_string()))?;

    let tokens = Regex::new(r"<w:t(?:\s[^>]*)?>([^<]*)</w:t>|<w:tab/>|<w:br\b[^>]*/>|</w:p>")
        .map_err(|e| GenerationError::DocumentRead(e.to_string()))?;

    let mut text = String::with_capacity(xml.len() / 4);
    for caps in tokens.captures_iter(&xml) {
        match caps.get(1) {
            Some(run) => text.push_str(&unescape_xml(run.as_str())),
            None => {
                let whole = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
                if whole.starts_with("<w:tab") {
                    text.push('\t');
                } else {
                    text.push('\n');
                }
            }
        }
    }

    Ok(text.trim().to_string())
}

/// The whole reply is the sentinel, optionally followed by "in the
/// document"/"in the image" and closing punctuation.
fn is_no_text_reply(reply: &str) -> bool {
    let normalized = reply
        .trim()
        .trim_end_matches(['.', '!'])
        .trim()
        .to_lowercase();
    let Some(rest) = normalized.strip_prefix(&NO_TEXT_SENTINEL.to_lowercase()) else {
        return false;
    };
    matches!(rest.trim(), "" | "in the document" | "in the image" | "in this document" | "in this image")
}

/// Decode the named XML entities plus decimal and hex character references.
/// Malformed references are kept as written.
fn unescape_xml(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }

    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let decoded = tail
            .find(';')
            .filter(|&end| end <= 12)
            .and_then(|end| decode_entity(&tail[1..end]).map(|c| (c, end)));
        match decoded {
            Some((c, end)) => {
                out.push(c);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "amp" => Some('&'),
        _ => {
            let code = match name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => name.strip_prefix('#')?.parse::<u32>().ok()?,
            };
            char::from_u32(code)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn docx_with_body(body: &str) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buffer);
            writer
                .start_file("word/document.xml", SimpleFileOptions::default())
                .unwrap();
            write!(
                writer,
                r#"<?xml version="1.0"?><w:document><w:body>{}</w:body></w:document>"#,
                body
            )
            .unwrap();
            writer.finish().unwrap();
        }
        buffer.into_inner()
    }

    #[test]
    fn test_content_type_classification() {
        assert_eq!(
            DocumentKind::from_content_type("application/pdf"),
            Some(DocumentKind::Pdf)
        );
        assert_eq!(
            DocumentKind::from_content_type("image/png"),
            Some(DocumentKind::Image)
        );
        assert_eq!(
            DocumentKind::from_content_type("text/plain; charset=utf-8"),
            Some(DocumentKind::PlainText)
        );
        assert_eq!(
            DocumentKind::from_content_type(DOCX_MIME_TYPE),
            Some(DocumentKind::WordDocument)
        );
        assert_eq!(DocumentKind::from_content_type("application/zip"), None);
    }

    #[test]
    fn test_docx_paragraphs_and_entities() {
        let bytes = docx_with_body(
            r#"<w:p><w:r><w:t>Photosynthesis</w:t></w:r></w:p><w:p><w:r><w:t xml:space="preserve">Light &amp; water</w:t><w:tab/><w:t>&lt;ATP&gt;</w:t></w:r></w:p>"#,
        );

        let text = extract_docx_text(&bytes).unwrap();
        assert_eq!(text, "Photosynthesis\nLight & water\t<ATP>");
    }

    #[test]
    fn test_docx_numeric_character_references() {
        let bytes = docx_with_body(
            r#"<w:p><w:r><w:t>Krebs&#8217;s cycle &#x2192; ATP &amp;&#38; &#xZZ; &bogus;</w:t></w:r></w:p>"#,
        );

        let text = extract_docx_text(&bytes).unwrap();
        assert_eq!(text, "Krebs\u{2019}s cycle \u{2192} ATP && &#xZZ; &bogus;");
    }

    #[test]
    fn test_no_text_reply_must_be_the_whole_output() {
        assert!(is_no_text_reply("No text found"));
        assert!(is_no_text_reply("  no text found.\n"));
        assert!(is_no_text_reply("No text found in the document."));
        assert!(is_no_text_reply("No text found in the image"));

        assert!(!is_no_text_reply("Chapter 1\nNo text found means the scan was blank."));
        assert!(!is_no_text_reply("The tool prints 'No text found' when a scan is blank."));
        assert!(!is_no_text_reply("Osmosis moves water"));
    }

    #[test]
    fn test_docx_without_text_is_empty() {
        let bytes = docx_with_body("<w:p></w:p>");
        assert_eq!(extract_docx_text(&bytes).unwrap(), "");
    }

    #[test]
    fn test_invalid_archive_is_a_read_error() {
        let err = extract_docx_text(b"definitely not a zip").unwrap_err();
        assert!(matches!(err, GenerationError::DocumentRead(_)));
    }
}
