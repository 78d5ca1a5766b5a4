use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{AiConfig, BatchSettings};
use crate::errors::GenerationError;
use crate::file_store::FileStore;
use crate::flashcard_generator::FlashcardGenerator;
use crate::llm_service::{HealthReport, LLMService, ServiceStats};
use crate::models::{ExtractedText, FlashcardFormat, GeneratedDeck, QuizItem, SourceCard};
use crate::quiz_generator::QuizGenerator;
use crate::text_extraction::DocumentExtractor;

/// Entry points of the generation pipeline. Cheap to clone; every clone
/// shares the same orchestrator and counters.
#[derive(Clone)]
pub struct FlashcardPipeline {
    llm: Arc<LLMService>,
    extractor: DocumentExtractor,
    flashcards: FlashcardGenerator,
    quiz: QuizGenerator,
}

impl FlashcardPipeline {
    pub fn new(ai: &AiConfig, batching: BatchSettings, store: Arc<dyn FileStore>) -> Self {
        Self::with_service(Arc::new(LLMService::new(ai)), batching, store)
    }

    pub fn with_service(
        llm: Arc<LLMService>,
        batching: BatchSettings,
        store: Arc<dyn FileStore>,
    ) -> Self {
        Self {
            extractor: DocumentExtractor::new(Arc::clone(&llm), store),
            flashcards: FlashcardGenerator::new(Arc::clone(&llm), batching),
            quiz: QuizGenerator::new(Arc::clone(&llm), batching.quiz_cards_per_batch),
            llm,
        }
    }

    pub fn llm_service(&self) -> &LLMService {
        &self.llm
    }

    pub async fn extract_text(&self, file_id: &str) -> Result<ExtractedText, GenerationError> {
        self.extractor.extract_text(file_id).await
    }

    pub async fn generate_flashcards(
        &self,
        text: &str,
        format: FlashcardFormat,
        count: usize,
    ) -> Result<GeneratedDeck, GenerationError> {
        self.flashcards.generate(text, format, count).await
    }

    pub async fn generate_flashcards_with_cancel(
        &self,
        text: &str,
        format: FlashcardFormat,
        count: usize,
        cancel: &CancellationToken,
    ) -> Result<GeneratedDeck, GenerationError> {
        self.flashcards
            .generate_with_cancel(text, format, count, cancel)
            .await
    }

    pub async fn generate_quiz(&self, cards: &[SourceCard]) -> Result<Vec<QuizItem>, GenerationError> {
        self.quiz.generate(cards).await
    }

    pub async fn generate_quiz_with_cancel(
        &self,
        cards: &[SourceCard],
        cancel: &CancellationToken,
    ) -> Result<Vec<QuizItem>, GenerationError> {
        self.quiz.generate_with_cancel(cards, cancel).await
    }

    /// Extraction followed by generation. No extracted text ends the job.
    pub async fn generate_deck_from_file(
        &self,
        file_id: &str,
        format: FlashcardFormat,
        count: usize,
        cancel: &CancellationToken,
    ) -> Result<GeneratedDeck, GenerationError> {
        self.flashcards.check_count(count)?;

        let extracted = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
            extracted = self.extract_text(file_id) => extracted?,
        };

        info!(
            file_id = %file_id,
            text_length = extracted.text.len(),
            format = %format,
            count,
            "Generating deck from extracted text"
        );

        self.generate_flashcards_with_cancel(&extracted.text, format, count, cancel)
            .await
    }

    pub fn stats(&self) -> ServiceStats {
        self.llm.stats()
    }

    pub fn reset_stats(&self) {
        self.llm.reset_stats();
    }

    pub async fn check_health(&self) -> HealthReport {
        self.llm.check_health().await
    }
}
