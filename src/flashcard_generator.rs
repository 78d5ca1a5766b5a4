use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::BatchSettings;
use crate::errors::{GenerationError, Stage};
use crate::llm_service::LLMService;
use crate::models::{BatchPlan, FlashcardDraft, FlashcardFormat, GeneratedDeck, GenerationOptions};
use crate::prompts::{BatchPosition, flashcard_batch_prompt};
use crate::response_parser::{JsonResponseParser, JsonShape, ParseFailure};
use crate::{log_performance, log_service_error, log_service_start, log_service_success, log_service_warn};

pub const DEFAULT_DECK_TITLE: &str = "AI Generated Deck";

const MAX_SOURCE_CHARS: usize = 30_000;
const MAX_TITLE_CHARS: usize = 50;
const MAX_SIDE_CHARS: usize = 2_000;
const BATCH_MAX_TOKENS: u32 = 8192;
const BATCH_TEMPERATURE: f32 = 0.7;
const BATCH_TIMEOUT_MS: u64 = 60_000;

/// Generates a deck in rate-limit-safe batches.
///
/// Batches run one after another with a cooldown in between. A failed batch
/// aborts the whole job.
#[derive(Debug, Clone)]
pub struct FlashcardGenerator {
    llm: Arc<LLMService>,
    settings: BatchSettings,
    json_parser: JsonResponseParser,
}

/// Parsed contents of a single batch reply.
#[derive(Debug, Default)]
struct BatchOutput {
    title: Option<String>,
    cards: Vec<FlashcardDraft>,
}

impl FlashcardGenerator {
    pub fn new(llm: Arc<LLMService>, settings: BatchSettings) -> Self {
        Self {
            llm,
            settings,
            json_parser: JsonResponseParser,
        }
    }

    pub async fn generate(
        &self,
        text: &str,
        format: FlashcardFormat,
        count: usize,
    ) -> Result<GeneratedDeck, GenerationError> {
        self.generate_with_cancel(text, format, count, &CancellationToken::new())
            .await
    }

    pub async fn generate_with_cancel(
        &self,
        text: &str,
        format: FlashcardFormat,
        count: usize,
        cancel: &CancellationToken,
    ) -> Result<GeneratedDeck, GenerationError> {
        self.check_count(count)?;
        if text.trim().is_empty() {
            return Err(GenerationError::InvalidRequest(
                "Source text must not be empty".to_string(),
            ));
        }

        let job_id = Uuid::new_v4();
        let start = Instant::now();
        log_service_start!("flashcard_generator", "generate", job_id = job_id, card_count = count);

        let result = self.run_batches(job_id, text, format, count, cancel).await;

        match &result {
            Ok(deck) => {
                log_service_success!(
                    "flashcard_generator",
                    "generate",
                    job_id = job_id,
                    card_count = deck.cards.len(),
                    duration_ms = start.elapsed().as_millis() as u64
                );
            }
            Err(err) => {
                log_service_error!("flashcard_generator", "generate", job_id = job_id, error = err);
                if err.is_provider_failure() {
                    warn!(
                        job_id = %job_id,
                        failed_providers = ?err.failed_providers(),
                        "Flashcard job aborted by provider failure"
                    );
                }
            }
        }

        result
    }

    /// Reject counts outside `1..=max_cards_per_job`.
    pub fn check_count(&self, count: usize) -> Result<(), GenerationError> {
        if count == 0 {
            return Err(GenerationError::InvalidRequest(
                "Card count must be at least 1".to_string(),
            ));
        }
        if count > self.settings.max_cards_per_job {
            return Err(GenerationError::InvalidRequest(format!(
                "Card count {} exceeds the maximum of {} per job",
                count, self.settings.max_cards_per_job
            )));
        }
        Ok(())
    }

    async fn run_batches(
        &self,
        job_id: Uuid,
        text: &str,
        format: FlashcardFormat,
        count: usize,
        cancel: &CancellationToken,
    ) -> Result<GeneratedDeck, GenerationError> {
        let source = truncate_chars(text.trim(), MAX_SOURCE_CHARS);
        let plan = BatchPlan::new(count, self.settings.flashcards_per_batch);
        let cooldown = Duration::from_millis(self.settings.batch_cooldown_ms);
        let options = GenerationOptions::default()
            .with_max_output_tokens(BATCH_MAX_TOKENS)
            .with_temperature(BATCH_TEMPERATURE)
            .with_timeout_ms(BATCH_TIMEOUT_MS);

        info!(
            job_id = %job_id,
            batches = ?plan.sizes(),
            source_chars = source.chars().count(),
            "Planned flashcard batches"
        );

        let mut cards: Vec<FlashcardDraft> = Vec::new();
        let mut seen_fronts: HashSet<String> = HashSet::new();
        let mut deck_title: Option<String> = None;

        for (index, &batch_size) in plan.sizes().iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(GenerationError::Cancelled);
            }

            if index > 0 && !cooldown.is_zero() {
                debug!(job_id = %job_id, cooldown_ms = cooldown.as_millis() as u64, "Cooling down before next batch");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
                    _ = tokio::time::sleep(cooldown) => {}
                }
            }

            let position = BatchPosition {
                index: index + 1,
                total_batches: plan.len(),
                batch_size,
                total_requested: count,
            };
            let prompt = flashcard_batch_prompt(source, format, position);
            let batch_start = Instant::now();

            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
                result = self.llm.generate(&prompt, &options) => result?,
            };

            let output = self.parse_batch(&response.text, batch_size)?;
            log_performance!(
                "flashcard_batch",
                duration_ms = batch_start.elapsed().as_millis() as u64,
                batch = position.index
            );

            let parsed_count = output.cards.len();
            let mut duplicates = 0usize;
            for card in output.cards {
                if seen_fronts.insert(normalize_front(&card.front)) {
                    cards.push(card);
                } else {
                    duplicates += 1;
                }
            }

            if duplicates > 0 {
                log_service_warn!(
                    "flashcard_generator",
                    "generate",
                    job_id = job_id,
                    format!("dropped {} duplicate cards in batch {}", duplicates, position.index)
                );
            }

            if deck_title.is_none() {
                deck_title = output.title;
            }

            info!(
                job_id = %job_id,
                batch = position.index,
                total_batches = position.total_batches,
                requested = batch_size,
                received = parsed_count,
                provider = %response.provider,
                used_fallback = response.used_fallback,
                "Flashcard batch completed"
            );
        }

        cards.truncate(count);
        if cards.is_empty() {
            return Err(GenerationError::NoValidItems {
                stage: Stage::Flashcards,
            });
        }

        Ok(GeneratedDeck {
            deck_title: deck_title.unwrap_or_else(|| DEFAULT_DECK_TITLE.to_string()),
            cards,
        })
    }

    fn parse_batch(&self, raw: &str, batch_size: usize) -> Result<BatchOutput, GenerationError> {
        let parsed: Value = self
            .json_parser
            .parse_json_response(raw, JsonShape::Object)
            .map_err(|failure| GenerationError::ResponseParse {
                stage: Stage::Flashcards,
                message: match failure {
                    ParseFailure::StructureNotFound => "no JSON object found in response".to_string(),
                    ParseFailure::Invalid(message) => message,
                },
            })?;

        let entries = parsed
            .get("cards")
            .and_then(Value::as_array)
            .ok_or_else(|| GenerationError::InvalidResponseShape {
                stage: Stage::Flashcards,
                message: "\"cards\" array missing".to_string(),
            })?;

        let cards = entries
            .iter()
            .filter_map(card_from_value)
            .take(batch_size)
            .collect();

        let title = ["deckTitle", "deck_title", "title"]
            .iter()
            .filter_map(|key| parsed.get(*key).and_then(Value::as_str))
            .find_map(sanitize_title);

        Ok(BatchOutput { title, cards })
    }
}

fn card_from_value(value: &Value) -> Option<FlashcardDraft> {
    let front = value.get("front")?.as_str()?.trim();
    let back = value.get("back")?.as_str()?.trim();
    if front.is_empty() || back.is_empty() {
        return None;
    }
    Some(FlashcardDraft {
        front: truncate_chars(front, MAX_SIDE_CHARS).to_string(),
        back: truncate_chars(back, MAX_SIDE_CHARS).to_string(),
    })
}

/// Strip surrounding quotes, cap the length; `None` if nothing is left.
pub fn sanitize_title(raw: &str) -> Option<String> {
    let stripped = raw
        .trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .trim();
    let capped = truncate_chars(stripped, MAX_TITLE_CHARS).trim();
    (!capped.is_empty()).then(|| capped.to_string())
}

fn normalize_front(front: &str) -> String {
    front
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AiConfig, ProviderConfig};

    fn generator() -> FlashcardGenerator {
        let config = AiConfig::new(ProviderConfig::gemini("key"), None);
        FlashcardGenerator::new(Arc::new(LLMService::new(&config)), BatchSettings::default())
    }

    #[test]
    fn test_parse_batch_keeps_valid_cards_up_to_batch_size() {
        let raw = r#"```json
{"deckTitle": "\"Biology\"", "cards": [
  {"front": " Q1 ", "back": "A1"},
  {"front": "", "back": "A2"},
  {"front": "Q3"},
  {"front": "Q4", "back": "A4"},
  {"front": "Q5", "back": "A5"}
]}
```"#;
        let output = generator().parse_batch(raw, 2).unwrap();
        assert_eq!(output.title.as_deref(), Some("Biology"));
        assert_eq!(
            output.cards,
            vec![
                FlashcardDraft { front: "Q1".into(), back: "A1".into() },
                FlashcardDraft { front: "Q4".into(), back: "A4".into() },
            ]
        );
    }

    #[test]
    fn test_missing_cards_is_shape_error_not_parse_error() {
        let err = generator().parse_batch(r#"{"deckTitle": "x"}"#, 5).unwrap_err();
        assert!(matches!(err, GenerationError::InvalidResponseShape { .. }));

        let err = generator().parse_batch("no json here", 5).unwrap_err();
        assert!(matches!(err, GenerationError::ResponseParse { .. }));
    }

    #[test]
    fn test_sanitize_title() {
        assert_eq!(sanitize_title("  'Cell Biology'  ").as_deref(), Some("Cell Biology"));
        assert_eq!(sanitize_title("\"\""), None);
        assert_eq!(sanitize_title(&"x".repeat(80)).map(|t| t.len()), Some(50));
    }

    #[test]
    fn test_normalize_front_ignores_case_and_spacing() {
        assert_eq!(normalize_front("What  is\nATP?"), normalize_front("what is atp?"));
    }

    #[test]
    fn test_truncate_chars_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[tokio::test]
    async fn test_zero_count_is_rejected() {
        let err = generator()
            .generate("some text", FlashcardFormat::Question, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_count_above_job_limit_is_rejected() {
        for count in [51, 1_000_000_000, usize::MAX] {
            let err = generator()
                .generate("some text", FlashcardFormat::Question, count)
                .await
                .unwrap_err();
            assert!(
                matches!(&err, GenerationError::InvalidRequest(msg) if msg.contains("maximum of 50")),
                "{}: {:?}",
                count,
                err
            );
        }
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = generator()
            .generate_with_cancel("some text", FlashcardFormat::Question, 3, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Cancelled));
    }
}
