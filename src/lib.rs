pub mod config;
pub mod errors;
pub mod file_store;
pub mod flashcard_generator;
pub mod llm_providers;
pub mod llm_service;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod prompts;
pub mod quiz_generator;
pub mod response_parser;
pub mod stats;
pub mod text_extraction;

pub use config::{AiConfig, BatchSettings, Config, LoggingConfig, ProviderConfig};
pub use errors::*;
pub use file_store::{FileStore, LocalFileStore, MemoryFileStore};
pub use flashcard_generator::FlashcardGenerator;
pub use llm_providers::{LLMProvider, LLMProviderFactory, ProviderId};
pub use llm_service::{HealthReport, LLMService, ServiceStats, should_fallback};
pub use logging::init_logging;
pub use models::*;
pub use pipeline::FlashcardPipeline;
pub use quiz_generator::QuizGenerator;
pub use response_parser::{JsonResponseParser, JsonShape};
pub use stats::{OrchestrationStats, StatsSnapshot};
pub use text_extraction::DocumentExtractor;
