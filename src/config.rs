use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use tracing::{info, warn};

use crate::llm_providers::ProviderId;
use crate::models::GenerationParams;

// Import logging macros
use crate::{log_system_event, log_validation};

/// Complete application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub ai: AiConfig,
    pub batching: BatchSettings,
    pub logging: LoggingConfig,
}

/// Requests-per-minute style hints published by a vendor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitHints {
    pub requests_per_minute: Option<u32>,
    pub tokens_per_minute: Option<u32>,
    pub requests_per_day: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetySetting {
    pub category: String,
    pub threshold: String,
}

/// Immutable settings for one provider client.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    pub provider: ProviderId,
    pub base_url: String,
    pub model: String,
    pub api_key: String,
    pub request_timeout_ms: Option<u64>,
    pub rate_limit: RateLimitHints,
    pub vision_capable: bool,
    pub safety_settings: Vec<SafetySetting>,
}

impl ProviderConfig {
    pub fn gemini(api_key: impl Into<String>) -> Self {
        let safety_settings = [
            "HARM_CATEGORY_HARASSMENT",
            "HARM_CATEGORY_HATE_SPEECH",
            "HARM_CATEGORY_SEXUALLY_EXPLICIT",
            "HARM_CATEGORY_DANGEROUS_CONTENT",
        ]
        .into_iter()
        .map(|category| SafetySetting {
            category: category.to_string(),
            threshold: "BLOCK_MEDIUM_AND_ABOVE".to_string(),
        })
        .collect();

        Self {
            provider: ProviderId::Gemini,
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-2.5-flash".to_string(),
            api_key: api_key.into(),
            request_timeout_ms: None,
            rate_limit: RateLimitHints {
                requests_per_minute: Some(15),
                tokens_per_minute: Some(1_000_000),
                requests_per_day: Some(1500),
            },
            vision_capable: true,
            safety_settings,
        }
    }

    pub fn groq(api_key: impl Into<String>) -> Self {
        Self {
            provider: ProviderId::Groq,
            base_url: "https://api.groq.com/openai/v1".to_string(),
            model: "llama-3.1-70b-versatile".to_string(),
            api_key: api_key.into(),
            request_timeout_ms: None,
            rate_limit: RateLimitHints {
                requests_per_minute: Some(30),
                tokens_per_minute: Some(14_400),
                requests_per_day: Some(14_400),
            },
            vision_capable: false,
            safety_settings: Vec::new(),
        }
    }

    pub fn for_provider(provider: ProviderId, api_key: impl Into<String>) -> Self {
        match provider {
            ProviderId::Gemini => Self::gemini(api_key),
            ProviderId::Groq => Self::groq(api_key),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_request_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.request_timeout_ms = Some(timeout_ms);
        self
    }

    /// Read `{PREFIX}_API_KEY`, `{PREFIX}_BASE_URL`, `{PREFIX}_MODEL`,
    /// `{PREFIX}_TIMEOUT` and `{PREFIX}_VISION`. Returns `None` without a key.
    fn from_env(provider: ProviderId) -> Result<Option<Self>> {
        let prefix = provider.as_str().to_uppercase();
        let api_key = match env::var(format!("{}_API_KEY", prefix)) {
            Ok(key) if !key.trim().is_empty() => key,
            _ => return Ok(None),
        };
        if api_key.len() < 20 {
            warn!("{}_API_KEY appears to be invalid (too short)", prefix);
        }

        let mut config = Self::for_provider(provider, api_key);
        if let Ok(base_url) = env::var(format!("{}_BASE_URL", prefix)) {
            config.base_url = base_url;
        }
        if let Ok(model) = env::var(format!("{}_MODEL", prefix)) {
            config.model = model;
        }
        if let Some(timeout) = parse_env::<u64>(&format!("{}_TIMEOUT", prefix))? {
            config.request_timeout_ms = Some(timeout);
        }
        if let Some(vision) = parse_env::<bool>(&format!("{}_VISION", prefix))? {
            config.vision_capable = vision;
        }

        Ok(Some(config))
    }
}

/// Which providers to use and the global generation defaults.
#[derive(Debug, Clone)]
pub struct AiConfig {
    pub primary: ProviderConfig,
    pub fallback: Option<ProviderConfig>,
    pub params: GenerationParams,
}

/// Batching behaviour of the flashcard and quiz generators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSettings {
    pub flashcards_per_batch: usize,
    pub batch_cooldown_ms: u64,
    pub quiz_cards_per_batch: usize,
    /// Upper bound on the cards a single generation job may request.
    pub max_cards_per_job: usize,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            flashcards_per_batch: 25,
            batch_cooldown_ms: 4_000,
            quiz_cards_per_batch: 10,
            max_cards_per_job: 50,
        }
    }
}

/// Logging system configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file_enabled: bool,
    pub console_enabled: bool,
    pub log_directory: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info,flashcard_ai=debug".to_string(),
            file_enabled: true,
            console_enabled: true,
            log_directory: "logs".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables with sensible defaults
    pub fn from_env() -> Result<Self> {
        log_system_event!(config, "Loading application configuration from environment variables");

        let config = Config {
            ai: AiConfig::from_env()?,
            batching: BatchSettings::from_env()?,
            logging: LoggingConfig::from_env()?,
        };

        log_system_event!(config, "Configuration loaded successfully");
        config.log_configuration_summary();

        Ok(config)
    }

    /// Log a summary of loaded configuration (without sensitive data)
    fn log_configuration_summary(&self) {
        info!(
            primary_provider = %self.ai.primary.provider,
            primary_model = %self.ai.primary.model,
            primary_key_masked = %mask_sensitive_data(&self.ai.primary.api_key),
            fallback_provider = ?self.ai.fallback.as_ref().map(|f| f.provider),
            fallback_model = ?self.ai.fallback.as_ref().map(|f| f.model.as_str()),
            flashcards_per_batch = self.batching.flashcards_per_batch,
            batch_cooldown_ms = self.batching.batch_cooldown_ms,
            log_level = %self.logging.level,
            "Configuration summary"
        );
    }

    pub fn validate(&self) -> Result<()> {
        self.ai.validate()?;
        self.batching.validate()?;

        if !["trace", "debug", "info", "warn", "error"]
            .iter()
            .any(|level| self.logging.level.to_lowercase().contains(level))
        {
            warn!("Invalid log level '{}', using 'info' as fallback", self.logging.level);
        }

        log_validation!(success, "configuration", "Configuration validation completed successfully");
        Ok(())
    }
}

impl AiConfig {
    pub fn new(primary: ProviderConfig, fallback: Option<ProviderConfig>) -> Self {
        Self {
            primary,
            fallback,
            params: GenerationParams::default(),
        }
    }

    fn from_env() -> Result<Self> {
        let primary_id = env::var("AI_PROVIDER")
            .unwrap_or_else(|_| "gemini".to_string())
            .parse::<ProviderId>()
            .map_err(|e| anyhow!("Invalid AI_PROVIDER: {}", e))?;

        let fallback_id = match env::var("AI_FALLBACK_PROVIDER") {
            Ok(value) if value.trim().is_empty() || value.eq_ignore_ascii_case("none") => None,
            Ok(value) => Some(
                value
                    .parse::<ProviderId>()
                    .map_err(|e| anyhow!("Invalid AI_FALLBACK_PROVIDER: {}", e))?,
            ),
            Err(_) => Some(ProviderId::Groq),
        };

        let primary = ProviderConfig::from_env(primary_id)?.ok_or_else(|| {
            anyhow!(
                "{}_API_KEY is required but not set in environment variables",
                primary_id.as_str().to_uppercase()
            )
        })?;

        let fallback = match fallback_id {
            Some(id) => {
                let config = ProviderConfig::from_env(id)?;
                if config.is_none() {
                    warn!("Fallback provider '{}' has no API key. Fallback disabled", id);
                }
                config
            }
            None => None,
        };

        let defaults = GenerationParams::default();
        let params = GenerationParams {
            max_output_tokens: parse_env("AI_MAX_TOKENS")?.unwrap_or(defaults.max_output_tokens),
            temperature: parse_env("AI_TEMPERATURE")?.unwrap_or(defaults.temperature),
            top_p: parse_env("AI_TOP_P")?.unwrap_or(defaults.top_p),
            top_k: parse_env("AI_TOP_K")?.unwrap_or(defaults.top_k),
            timeout_ms: parse_env("AI_TIMEOUT")?.unwrap_or(defaults.timeout_ms),
        };

        Ok(AiConfig {
            primary,
            fallback,
            params,
        })
    }

    /// Reject configurations the orchestrator cannot run safely. A fallback
    /// that names the primary provider is an error, not a silent no-op.
    pub fn validate(&self) -> Result<()> {
        if self.primary.api_key.trim().is_empty() {
            return Err(anyhow!("API key for primary provider '{}' is empty", self.primary.provider));
        }

        if let Some(fallback) = &self.fallback {
            if fallback.provider == self.primary.provider {
                return Err(anyhow!(
                    "Primary and fallback providers are both '{}'; configure a different fallback or disable it",
                    fallback.provider
                ));
            }
        }

        if !(0.0..=2.0).contains(&self.params.temperature) {
            return Err(anyhow!("AI_TEMPERATURE must be between 0 and 2"));
        }
        if !(0.0..=1.0).contains(&self.params.top_p) || self.params.top_p == 0.0 {
            return Err(anyhow!("AI_TOP_P must be in (0, 1]"));
        }
        if self.params.max_output_tokens == 0 || self.params.timeout_ms == 0 {
            return Err(anyhow!("AI_MAX_TOKENS and AI_TIMEOUT must be greater than 0"));
        }

        Ok(())
    }
}

impl BatchSettings {
    fn from_env() -> Result<Self> {
        let defaults = BatchSettings::default();
        Ok(BatchSettings {
            flashcards_per_batch: parse_env("FLASHCARD_BATCH_SIZE")?
                .unwrap_or(defaults.flashcards_per_batch),
            batch_cooldown_ms: parse_env("FLASHCARD_BATCH_COOLDOWN_MS")?
                .unwrap_or(defaults.batch_cooldown_ms),
            quiz_cards_per_batch: parse_env("QUIZ_BATCH_SIZE")?
                .unwrap_or(defaults.quiz_cards_per_batch),
            max_cards_per_job: parse_env("FLASHCARD_MAX_CARDS")?
                .unwrap_or(defaults.max_cards_per_job),
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.flashcards_per_batch == 0 {
            return Err(anyhow!("FLASHCARD_BATCH_SIZE must be greater than 0"));
        }
        if self.quiz_cards_per_batch == 0 {
            return Err(anyhow!("QUIZ_BATCH_SIZE must be greater than 0"));
        }
        if self.max_cards_per_job == 0 {
            return Err(anyhow!("FLASHCARD_MAX_CARDS must be greater than 0"));
        }
        Ok(())
    }
}

impl LoggingConfig {
    fn from_env() -> Result<Self> {
        let defaults = LoggingConfig::default();
        let level = env::var("RUST_LOG").unwrap_or(defaults.level);

        let file_enabled = env::var("LOG_FILE_ENABLED")
            .unwrap_or_else(|_| "true".to_string())
            .parse::<bool>()
            .unwrap_or(true);

        let console_enabled = env::var("LOG_CONSOLE_ENABLED")
            .unwrap_or_else(|_| "true".to_string())
            .parse::<bool>()
            .unwrap_or(true);

        let log_directory = env::var("LOG_DIRECTORY").unwrap_or(defaults.log_directory);

        Ok(LoggingConfig {
            level,
            file_enabled,
            console_enabled,
            log_directory,
        })
    }
}

/// Parse an optional environment variable, failing loudly on garbage.
fn parse_env<T: FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| anyhow!("Invalid {} value: '{}'", name, raw)),
        _ => Ok(None),
    }
}

/// Mask sensitive data in configuration for safe logging
pub fn mask_sensitive_data(data: &str) -> String {
    let chars: Vec<char> = data.chars().collect();
    if chars.len() <= 8 {
        "*".repeat(chars.len())
    } else {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}***{}", head, tail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_sensitive_data() {
        assert_eq!(mask_sensitive_data("short"), "*****");
        assert_eq!(mask_sensitive_data("sk-1234567890abcdef"), "sk-1***cdef");
    }

    #[test]
    fn test_provider_defaults() {
        let gemini = ProviderConfig::gemini("key");
        assert!(gemini.vision_capable);
        assert_eq!(gemini.rate_limit.requests_per_minute, Some(15));
        assert_eq!(gemini.safety_settings.len(), 4);

        let groq = ProviderConfig::groq("key");
        assert!(!groq.vision_capable);
        assert_eq!(groq.base_url, "https://api.groq.com/openai/v1");
    }

    #[test]
    fn test_identical_primary_and_fallback_is_rejected() {
        let config = AiConfig::new(ProviderConfig::gemini("key-a"), Some(ProviderConfig::gemini("key-b")));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("both 'gemini'"));

        let config = AiConfig::new(ProviderConfig::gemini("key-a"), Some(ProviderConfig::groq("key-b")));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parameter_ranges_are_validated() {
        let mut config = AiConfig::new(ProviderConfig::groq("key"), None);
        config.params.temperature = 3.0;
        assert!(config.validate().is_err());

        let mut config = AiConfig::new(ProviderConfig::groq("key"), None);
        config.params.timeout_ms = 0;
        assert!(config.validate().is_err());

        let config = AiConfig::new(ProviderConfig::groq(" "), None);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_batch_settings_validation() {
        assert!(BatchSettings::default().validate().is_ok());

        let settings = BatchSettings {
            flashcards_per_batch: 0,
            ..BatchSettings::default()
        };
        assert!(settings.validate().is_err());

        let settings = BatchSettings {
            max_cards_per_job: 0,
            ..BatchSettings::default()
        };
        assert!(settings.validate().is_err());
    }
}
