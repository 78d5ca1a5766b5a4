#![allow(dead_code)]

use serde_json::{Value, json};
use std::sync::Arc;
use wiremock::MockServer;

use flashcard_ai::{
    AiConfig, BatchSettings, FlashcardPipeline, LLMService, MemoryFileStore, ProviderConfig,
};

pub const GEMINI_PATH: &str = "/models/gemini-test:generateContent";
pub const GROQ_PATH: &str = "/chat/completions";

pub fn gemini_config(server: &MockServer) -> ProviderConfig {
    ProviderConfig::gemini("gemini-key")
        .with_base_url(server.uri())
        .with_model("gemini-test")
}

pub fn groq_config(server: &MockServer) -> ProviderConfig {
    ProviderConfig::groq("groq-key")
        .with_base_url(server.uri())
        .with_model("llama-test")
}

pub fn gemini_body(text: &str) -> Value {
    json!({
        "candidates": [{
            "content": {"role": "model", "parts": [{"text": text}]},
            "finishReason": "STOP"
        }],
        "usageMetadata": {
            "promptTokenCount": 12,
            "candidatesTokenCount": 8,
            "totalTokenCount": 20
        },
        "modelVersion": "gemini-test"
    })
}

pub fn groq_body(text: &str) -> Value {
    json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "model": "llama-test",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": text},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 30, "completion_tokens": 10, "total_tokens": 40}
    })
}

pub fn rate_limit_body() -> Value {
    json!({
        "error": {
            "code": 429,
            "message": "Resource has been exhausted (e.g. check quota).",
            "status": "RESOURCE_EXHAUSTED"
        }
    })
}

pub fn invalid_argument_body() -> Value {
    json!({
        "error": {
            "code": 400,
            "message": "Invalid JSON payload received.",
            "status": "INVALID_ARGUMENT"
        }
    })
}

/// Flashcard batch reply with `count` cards whose fronts start with `prefix`.
pub fn cards_reply(prefix: &str, count: usize, title: Option<&str>) -> String {
    let cards: Vec<Value> = (1..=count)
        .map(|i| json!({"front": format!("{} question {}", prefix, i), "back": format!("{} answer {}", prefix, i)}))
        .collect();
    let mut reply = json!({ "cards": cards });
    if let Some(title) = title {
        reply["deckTitle"] = json!(title);
    }
    reply.to_string()
}

/// No cooldown so multi-batch tests stay fast.
pub fn fast_batching(flashcards_per_batch: usize, quiz_cards_per_batch: usize) -> BatchSettings {
    BatchSettings {
        flashcards_per_batch,
        batch_cooldown_ms: 0,
        quiz_cards_per_batch,
        ..BatchSettings::default()
    }
}

pub fn service(primary: ProviderConfig, fallback: Option<ProviderConfig>) -> Arc<LLMService> {
    Arc::new(LLMService::new(&AiConfig::new(primary, fallback)))
}

pub fn pipeline(
    primary: ProviderConfig,
    fallback: Option<ProviderConfig>,
    batching: BatchSettings,
) -> (FlashcardPipeline, Arc<MemoryFileStore>) {
    let store = Arc::new(MemoryFileStore::new());
    let pipeline =
        FlashcardPipeline::with_service(service(primary, fallback), batching, store.clone());
    (pipeline, store)
}
