mod common;

use serde_json::json;
use std::io::{Cursor, Write};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zip::write::SimpleFileOptions;

use common::*;
use flashcard_ai::{FlashcardFormat, GenerationError, ProviderId};

const DOCX: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

fn docx(paragraphs: &[&str]) -> Vec<u8> {
    let body: String = paragraphs
        .iter()
        .map(|p| format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", p))
        .collect();

    let mut buffer = Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut buffer);
        writer
            .start_file("[Content_Types].xml", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"<Types/>").unwrap();
        writer
            .start_file("word/document.xml", SimpleFileOptions::default())
            .unwrap();
        write!(
            writer,
            r#"<?xml version="1.0" encoding="UTF-8"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{}</w:body></w:document>"#,
            body
        )
        .unwrap();
        writer.finish().unwrap();
    }
    buffer.into_inner()
}

#[tokio::test]
async fn test_image_is_read_through_vision() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GEMINI_PATH))
        .and(body_string_contains("Extract all text from this image"))
        .and(body_partial_json(json!({
            "generationConfig": {"maxOutputTokens": 4096}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(gemini_body(
            "  Chapter 3: The Krebs cycle\nProduces NADH and FADH2.  ",
        )))
        .expect(1)
        .mount(&server)
        .await;

    let (pipeline, store) = pipeline(gemini_config(&server), None, fast_batching(25, 10));
    store.insert("scan-1", "image/png", vec![0x89u8, b'P', b'N', b'G']);

    let extracted = pipeline.extract_text("scan-1").await.unwrap();
    assert_eq!(extracted.file_id, "scan-1");
    assert_eq!(
        extracted.text,
        "Chapter 3: The Krebs cycle\nProduces NADH and FADH2."
    );
}

#[tokio::test]
async fn test_no_text_sentinel_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GEMINI_PATH))
        .and(body_string_contains("PDF document"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(gemini_body("No text found in the document.")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (pipeline, store) = pipeline(gemini_config(&server), None, fast_batching(25, 10));
    store.insert("blank.pdf", "application/pdf", b"%PDF-1.7".to_vec());

    let err = pipeline.extract_text("blank.pdf").await.unwrap_err();
    assert!(matches!(err, GenerationError::NoTextExtracted(ref id) if id == "blank.pdf"));
}

#[tokio::test]
async fn test_pdf_moves_to_vision_capable_fallback() {
    let primary = MockServer::start().await;
    let fallback = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(groq_body("unused")))
        .expect(0)
        .mount(&primary)
        .await;
    Mock::given(method("POST"))
        .and(path(GEMINI_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(gemini_body("Lecture notes")))
        .expect(1)
        .mount(&fallback)
        .await;

    let (pipeline, store) = pipeline(
        groq_config(&primary),
        Some(gemini_config(&fallback)),
        fast_batching(25, 10),
    );
    store.insert("notes.pdf", "application/pdf", b"%PDF-1.7".to_vec());

    let extracted = pipeline.extract_text("notes.pdf").await.unwrap();
    assert_eq!(extracted.text, "Lecture notes");

    let stats = pipeline.stats().counters;
    assert_eq!(stats.fallback_successes, 1);
    assert_eq!(stats.provider_usage[ProviderId::Gemini.as_str()], 1);
}

#[tokio::test]
async fn test_docx_is_extracted_locally() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(gemini_body("unused")))
        .expect(0)
        .mount(&server)
        .await;

    let (pipeline, store) = pipeline(gemini_config(&server), None, fast_batching(25, 10));
    store.insert(
        "essay",
        DOCX,
        docx(&["Enzymes lower activation energy.", "Temperature &amp; pH matter."]),
    );

    let extracted = pipeline.extract_text("essay").await.unwrap();
    assert_eq!(
        extracted.text,
        "Enzymes lower activation energy.\nTemperature & pH matter."
    );
    assert_eq!(pipeline.stats().counters.total_requests, 0);
}

#[tokio::test]
async fn test_empty_docx_fails_fast() {
    let server = MockServer::start().await;
    let (pipeline, store) = pipeline(gemini_config(&server), None, fast_batching(25, 10));
    store.insert("empty", DOCX, docx(&[]));

    let err = pipeline.extract_text("empty").await.unwrap_err();
    assert!(matches!(err, GenerationError::NoTextExtracted(_)));
}

#[tokio::test]
async fn test_unsupported_and_missing_files() {
    let server = MockServer::start().await;
    let (pipeline, store) = pipeline(gemini_config(&server), None, fast_batching(25, 10));
    store.insert("sheet", "application/vnd.ms-excel", vec![0u8; 8]);

    let err = pipeline.extract_text("sheet").await.unwrap_err();
    assert!(matches!(err, GenerationError::UnsupportedContentType(_)));

    let err = pipeline.extract_text("ghost").await.unwrap_err();
    assert!(matches!(err, GenerationError::FileAccess(_)));
}

#[tokio::test]
async fn test_deck_from_image_end_to_end() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GEMINI_PATH))
        .and(body_string_contains("Extract all text"))
        .respond_with(ResponseTemplate::new(200).set_body_json(gemini_body(
            "Photosynthesis converts light energy into chemical energy.",
        )))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(GEMINI_PATH))
        .and(body_string_contains("Photosynthesis converts light energy"))
        .and(body_string_contains("educational flashcards"))
        .respond_with(ResponseTemplate::new(200).set_body_json(gemini_body(
            &cards_reply("plant", 2, Some("Photosynthesis")),
        )))
        .expect(1)
        .mount(&server)
        .await;

    let (pipeline, store) = pipeline(gemini_config(&server), None, fast_batching(25, 10));
    store.insert("leaf.jpg", "image/jpeg", vec![0xFFu8, 0xD8, 0xFF]);

    let deck = pipeline
        .generate_deck_from_file("leaf.jpg", FlashcardFormat::Definition, 2, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(deck.deck_title, "Photosynthesis");
    assert_eq!(deck.cards.len(), 2);
    assert_eq!(pipeline.stats().counters.total_requests, 2);
}

#[tokio::test]
async fn test_local_document_mentioning_the_no_text_phrase_is_kept() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(gemini_body("unused")))
        .expect(0)
        .mount(&server)
        .await;

    let (pipeline, store) = pipeline(gemini_config(&server), None, fast_batching(25, 10));
    let notes = "Scanner manual: the tool prints 'No text found' when a scan is blank. Osmosis moves water.";
    store.insert("notes", "text/plain", notes.as_bytes().to_vec());
    store.insert("manual", DOCX, docx(&["Error codes", "No text found: the page was empty."]));

    let extracted = pipeline.extract_text("notes").await.unwrap();
    assert_eq!(extracted.text, notes);

    let extracted = pipeline.extract_text("manual").await.unwrap();
    assert_eq!(extracted.text, "Error codes\nNo text found: the page was empty.");
}

#[tokio::test]
async fn test_vision_text_that_merely_mentions_the_phrase_is_kept() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GEMINI_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(gemini_body(
            "Troubleshooting\nIf the display reads No text found, rescan the page.",
        )))
        .expect(1)
        .mount(&server)
        .await;

    let (pipeline, store) = pipeline(gemini_config(&server), None, fast_batching(25, 10));
    store.insert("page.png", "image/png", vec![0x89u8, b'P', b'N', b'G']);

    let extracted = pipeline.extract_text("page.png").await.unwrap();
    assert!(extracted.text.starts_with("Troubleshooting"));
}
