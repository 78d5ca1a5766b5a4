use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::llm_providers::ProviderId;

/// Global default generation parameters, loaded once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub timeout_ms: u64,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_output_tokens: 4096,
            temperature: 0.7,
            top_p: 0.95,
            top_k: 40,
            timeout_ms: 20_000,
        }
    }
}

/// Per-call overrides. Unset fields fall back to the provider's configured
/// timeout and then to the global [`GenerationParams`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    pub max_output_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub timeout_ms: Option<u64>,
}

impl GenerationOptions {
    pub fn with_max_output_tokens(mut self, tokens: u32) -> Self {
        self.max_output_tokens = Some(tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Merge field-by-field: caller value, then provider timeout, then globals.
    pub fn resolve(
        &self,
        defaults: &GenerationParams,
        provider_timeout_ms: Option<u64>,
    ) -> ResolvedOptions {
        ResolvedOptions {
            max_output_tokens: self.max_output_tokens.unwrap_or(defaults.max_output_tokens),
            temperature: self.temperature.unwrap_or(defaults.temperature),
            top_p: self.top_p.unwrap_or(defaults.top_p),
            top_k: self.top_k.unwrap_or(defaults.top_k),
            timeout_ms: self
                .timeout_ms
                .or(provider_timeout_ms)
                .unwrap_or(defaults.timeout_ms),
        }
    }
}

/// Fully merged options handed to a provider client.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedOptions {
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Normalized output of a generation call, whichever provider produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub text: String,
    pub model: String,
    pub usage: TokenUsage,
    pub provider: ProviderId,
    pub used_fallback: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub content_type: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedText {
    pub file_id: String,
    pub text: String,
}

/// Shape of the generated cards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashcardFormat {
    /// Term on the front, definition on the back.
    Definition,
    /// Question on the front, answer on the back.
    Question,
}

impl FlashcardFormat {
    pub fn format_type(&self) -> &'static str {
        match self {
            FlashcardFormat::Definition => "definition/meaning",
            FlashcardFormat::Question => "question/answer",
        }
    }

    pub fn front_label(&self) -> &'static str {
        match self {
            FlashcardFormat::Definition => "term or concept",
            FlashcardFormat::Question => "question",
        }
    }

    pub fn back_label(&self) -> &'static str {
        match self {
            FlashcardFormat::Definition => "definition or meaning",
            FlashcardFormat::Question => "answer",
        }
    }
}

impl FromStr for FlashcardFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "definition" => Ok(FlashcardFormat::Definition),
            "question" => Ok(FlashcardFormat::Question),
            other => Err(format!(
                "Format must be either \"definition\" or \"question\", got '{}'",
                other
            )),
        }
    }
}

impl fmt::Display for FlashcardFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlashcardFormat::Definition => f.write_str("definition"),
            FlashcardFormat::Question => f.write_str("question"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashcardDraft {
    pub front: String,
    pub back: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedDeck {
    pub deck_title: String,
    pub cards: Vec<FlashcardDraft>,
}

/// Ordered batch sizes that sum to the requested card count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchPlan {
    sizes: Vec<usize>,
}

impl BatchPlan {
    /// Split `total` into batches of at most `cap` by repeated subtraction.
    pub fn new(total: usize, cap: usize) -> Self {
        let cap = cap.max(1);
        let mut sizes = Vec::new();
        let mut remaining = total;
        while remaining > 0 {
            let size = remaining.min(cap);
            sizes.push(size);
            remaining -= size;
        }
        Self { sizes }
    }

    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    pub fn len(&self) -> usize {
        self.sizes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }

    pub fn total(&self) -> usize {
        self.sizes.iter().sum()
    }
}

/// An existing, persisted flashcard used as quiz input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCard {
    pub id: String,
    pub front: String,
    pub back: String,
}

impl SourceCard {
    pub fn new(id: impl Into<String>, front: impl Into<String>, back: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            front: front.into(),
            back: back.into(),
        }
    }
}

/// A multiple-choice question. `options` always holds four unique entries,
/// one of which is `correct_answer`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizItem {
    pub source_card_id: String,
    pub question: String,
    pub correct_answer: String,
    pub options: Vec<String>,
    pub explanation: String,
    /// False when the distractors came from the local fallback.
    pub ai_generated: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_plan_splits_by_cap() {
        let plan = BatchPlan::new(60, 25);
        assert_eq!(plan.sizes(), &[25, 25, 10]);
        assert_eq!(plan.total(), 60);
        assert_eq!(plan.len(), 3);
    }

    #[test]
    fn test_batch_plan_properties_hold_for_many_counts() {
        for cap in [1, 7, 25] {
            for n in 1..=120 {
                let plan = BatchPlan::new(n, cap);
                assert_eq!(plan.total(), n, "sum for n={} cap={}", n, cap);
                assert!(plan.sizes().iter().all(|&s| s >= 1 && s <= cap));
                assert_eq!(plan.len(), n.div_ceil(cap));
            }
        }
    }

    #[test]
    fn test_batch_plan_empty_for_zero() {
        assert!(BatchPlan::new(0, 25).is_empty());
    }

    #[test]
    fn test_options_merge_field_by_field() {
        let defaults = GenerationParams::default();
        let options = GenerationOptions::default().with_temperature(0.1);

        let resolved = options.resolve(&defaults, Some(30_000));
        assert_eq!(resolved.temperature, 0.1);
        assert_eq!(resolved.max_output_tokens, 4096);
        assert_eq!(resolved.top_k, 40);
        assert_eq!(resolved.timeout_ms, 30_000);

        let resolved = options.with_timeout_ms(5_000).resolve(&defaults, Some(30_000));
        assert_eq!(resolved.timeout_ms, 5_000);

        let resolved = GenerationOptions::default().resolve(&defaults, None);
        assert_eq!(resolved.timeout_ms, 20_000);
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("definition".parse(), Ok(FlashcardFormat::Definition));
        assert_eq!(" Question ".parse(), Ok(FlashcardFormat::Question));
        assert!("cloze".parse::<FlashcardFormat>().is_err());
        assert_eq!(FlashcardFormat::Definition.format_type(), "definition/meaning");
    }
}
