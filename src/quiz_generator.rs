use rand::seq::SliceRandom;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::{GenerationError, Stage};
use crate::llm_service::LLMService;
use crate::models::{GenerationOptions, QuizItem, SourceCard};
use crate::prompts::quiz_batch_prompt;
use crate::response_parser::{JsonResponseParser, JsonShape};
use crate::{log_performance, log_service_start, log_service_success, log_service_warn};

pub const DISTRACTORS_PER_ITEM: usize = 3;

const PLACEHOLDER_OPTIONS: [&str; 3] = [
    "None of the above",
    "All of the above",
    "Not enough information",
];
const QUIZ_TEMPERATURE: f32 = 0.7;
const QUIZ_MAX_TOKENS: u32 = 4096;

/// Distractors and explanation the model returned for one card.
#[derive(Debug, Clone, PartialEq)]
struct AiDistractors {
    distractors: Vec<String>,
    explanation: Option<String>,
}

/// Builds multiple-choice items from existing flashcards.
///
/// Batch failures are tolerated: any card without usable model output gets
/// locally sampled distractors instead.
#[derive(Debug, Clone)]
pub struct QuizGenerator {
    llm: Arc<LLMService>,
    cards_per_batch: usize,
    json_parser: JsonResponseParser,
}

impl QuizGenerator {
    pub fn new(llm: Arc<LLMService>, cards_per_batch: usize) -> Self {
        Self {
            llm,
            cards_per_batch: cards_per_batch.max(1),
            json_parser: JsonResponseParser,
        }
    }

    pub async fn generate(&self, cards: &[SourceCard]) -> Result<Vec<QuizItem>, GenerationError> {
        self.generate_with_cancel(cards, &CancellationToken::new())
            .await
    }

    pub async fn generate_with_cancel(
        &self,
        cards: &[SourceCard],
        cancel: &CancellationToken,
    ) -> Result<Vec<QuizItem>, GenerationError> {
        if cards.is_empty() {
            return Err(GenerationError::InvalidRequest(
                "At least one flashcard is required to build a quiz".to_string(),
            ));
        }

        let job_id = Uuid::new_v4();
        let start = Instant::now();
        log_service_start!("quiz_generator", "generate", job_id = job_id, card_count = cards.len());

        let usable: Vec<&SourceCard> = cards
            .iter()
            .filter(|card| {
                let keep = !card.back.trim().is_empty();
                if !keep {
                    log_service_warn!(
                        "quiz_generator",
                        "generate",
                        job_id = job_id,
                        format!("skipping card '{}' with an empty answer", card.id)
                    );
                }
                keep
            })
            .collect();

        if usable.is_empty() {
            return Err(GenerationError::NoValidItems { stage: Stage::Quiz });
        }

        let ai_results = self.collect_distractors(job_id, &usable, cancel).await?;
        let items = build_quiz_items(&usable, &ai_results);

        let ai_backed = items.iter().filter(|item| item.ai_generated).count();
        log_service_success!(
            "quiz_generator",
            "generate",
            job_id = job_id,
            card_count = items.len(),
            duration_ms = start.elapsed().as_millis() as u64
        );
        info!(
            job_id = %job_id,
            ai_backed,
            fallback_backed = items.len() - ai_backed,
            "Quiz reconciliation finished"
        );

        Ok(items)
    }

    /// Run every batch; failed batches simply contribute nothing.
    async fn collect_distractors(
        &self,
        job_id: Uuid,
        cards: &[&SourceCard],
        cancel: &CancellationToken,
    ) -> Result<HashMap<String, AiDistractors>, GenerationError> {
        let options = GenerationOptions::default()
            .with_temperature(QUIZ_TEMPERATURE)
            .with_max_output_tokens(QUIZ_MAX_TOKENS);
        let total_batches = cards.len().div_ceil(self.cards_per_batch);
        let mut results: HashMap<String, AiDistractors> = HashMap::new();

        for (index, batch) in cards.chunks(self.cards_per_batch).enumerate() {
            if cancel.is_cancelled() {
                return Err(GenerationError::Cancelled);
            }

            let batch_number = index + 1;
            let prompt = quiz_batch_prompt(batch);
            let batch_start = Instant::now();

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
                outcome = self.llm.generate(&prompt, &options) => outcome,
            };

            let response = match outcome {
                Ok(response) => response,
                Err(err) => {
                    log_service_warn!(
                        "quiz_generator",
                        "batch",
                        job_id = job_id,
                        format!("batch {}/{} failed: {}", batch_number, total_batches, err)
                    );
                    continue;
                }
            };

            let entries: Vec<Value> = match self
                .json_parser
                .parse_json_response(&response.text, JsonShape::Array)
            {
                Ok(entries) => entries,
                Err(failure) => {
                    log_service_warn!(
                        "quiz_generator",
                        "batch",
                        job_id = job_id,
                        format!(
                            "batch {}/{} response could not be parsed: {}",
                            batch_number, total_batches, failure
                        )
                    );
                    continue;
                }
            };

            if entries.is_empty() {
                log_service_warn!(
                    "quiz_generator",
                    "batch",
                    job_id = job_id,
                    format!("batch {}/{} returned an empty array", batch_number, total_batches)
                );
                continue;
            }

            let mut accepted = 0usize;
            for entry in &entries {
                match entry_from_value(entry) {
                    Some((id, distractors)) => {
                        results.entry(id).or_insert(distractors);
                        accepted += 1;
                    }
                    None => debug!(job_id = %job_id, batch = batch_number, "Dropping malformed quiz entry"),
                }
            }

            log_performance!(
                "quiz_batch",
                duration_ms = batch_start.elapsed().as_millis() as u64,
                batch = batch_number
            );
            debug!(
                job_id = %job_id,
                batch = batch_number,
                total_batches,
                accepted,
                received = entries.len(),
                "Quiz batch parsed"
            );
        }

        Ok(results)
    }
}

fn entry_from_value(value: &Value) -> Option<(String, AiDistractors)> {
    let id = match value.get("id")? {
        Value::String(id) => id.trim().to_string(),
        Value::Number(id) => id.to_string(),
        _ => return None,
    };
    if id.is_empty() {
        return None;
    }

    let distractors = value
        .get("distractors")?
        .as_array()?
        .iter()
        .filter_map(Value::as_str)
        .map(|d| d.trim().to_string())
        .collect();

    let explanation = value
        .get("explanation")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(str::to_string);

    Some((
        id,
        AiDistractors {
            distractors,
            explanation,
        },
    ))
}

/// Match by id (exact first, then case-insensitive) and fill the gaps locally.
fn build_quiz_items(
    cards: &[&SourceCard],
    ai_results: &HashMap<String, AiDistractors>,
) -> Vec<QuizItem> {
    let mut by_lowercase: HashMap<String, &AiDistractors> = HashMap::new();
    for (id, distractors) in ai_results {
        by_lowercase.entry(id.to_lowercase()).or_insert(distractors);
    }

    let mut rng = rand::rng();

    cards
        .iter()
        .map(|card| {
            let correct = card.back.trim().to_string();
            let matched = ai_results
                .get(card.id.trim())
                .or_else(|| by_lowercase.get(&card.id.trim().to_lowercase()).copied());

            let ai_choice = matched.and_then(|entry| {
                usable_distractors(&entry.distractors, &correct)
                    .map(|distractors| (distractors, entry.explanation.clone()))
            });
            let ai_generated = ai_choice.is_some();

            let (distractors, explanation) = match ai_choice {
                Some(choice) => choice,
                None => (fallback_distractors(card, cards, &mut rng), None),
            };

            let mut options = Vec::with_capacity(DISTRACTORS_PER_ITEM + 1);
            options.push(correct.clone());
            options.extend(distractors);
            options.shuffle(&mut rng);

            QuizItem {
                source_card_id: card.id.clone(),
                question: card.front.trim().to_string(),
                explanation: explanation.unwrap_or_else(|| default_explanation(&correct)),
                correct_answer: correct,
                options,
                ai_generated,
            }
        })
        .collect()
}

/// First three distinct, non-empty distractors that differ from the answer.
fn usable_distractors(candidates: &[String], correct: &str) -> Option<Vec<String>> {
    let mut seen: HashSet<String> = HashSet::from([correct.to_lowercase()]);
    let usable: Vec<String> = candidates
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty() && seen.insert(c.to_lowercase()))
        .take(DISTRACTORS_PER_ITEM)
        .map(str::to_string)
        .collect();

    (usable.len() == DISTRACTORS_PER_ITEM).then_some(usable)
}

/// Sample other cards' answers, padding with synthetic options when the set
/// is too small.
fn fallback_distractors(
    card: &SourceCard,
    all_cards: &[&SourceCard],
    rng: &mut impl rand::Rng,
) -> Vec<String> {
    let correct = card.back.trim();
    let mut seen: HashSet<String> = HashSet::from([correct.to_lowercase()]);

    let mut pool: Vec<String> = all_cards
        .iter()
        .filter(|other| other.id != card.id)
        .map(|other| other.back.trim())
        .filter(|answer| !answer.is_empty() && seen.insert(answer.to_lowercase()))
        .map(str::to_string)
        .collect();

    pool.shuffle(rng);
    pool.truncate(DISTRACTORS_PER_ITEM);

    let mut placeholders = PLACEHOLDER_OPTIONS
        .iter()
        .map(|p| p.to_string())
        .chain((1..).map(|n| format!("Option {}", n)));

    while pool.len() < DISTRACTORS_PER_ITEM {
        match placeholders.next() {
            Some(candidate) if seen.insert(candidate.to_lowercase()) => pool.push(candidate),
            Some(_) => continue,
            None => break,
        }
    }

    pool
}

fn default_explanation(correct: &str) -> String {
    format!("The correct answer is: {}", correct)
}
