use regex::Regex;
use serde::Serialize;
use std::sync::{Arc, LazyLock};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::AiConfig;
use crate::errors::{GenerationError, ProviderError};
use crate::llm_providers::{LLMProvider, LLMProviderFactory, ProviderId};
use crate::models::{GenerationOptions, GenerationParams, GenerationResult};
use crate::stats::{OrchestrationStats, StatsSnapshot};
use crate::{log_llm_operation, log_system_event};

const HEALTH_PROBE_PROMPT: &str = "Say \"OK\"";

/// HTTP statuses treated as transient.
const TRANSIENT_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Transport codes treated as transient.
const TRANSIENT_CODES: [&str; 4] = ["ETIMEDOUT", "ECONNREFUSED", "ECONNRESET", "ENOTFOUND"];

/// Message fragments (lowercase) that mark an error as transient.
const TRANSIENT_KEYWORDS: [&str; 11] = [
    "rate_limit",
    "rate limit",
    "quota",
    "timeout",
    "timed out",
    "service_unavailable",
    "unavailable",
    "connection refused",
    "connection reset",
    "dns",
    "overloaded",
];

/// Keywords as whole words. Underscores count as separators so that
/// vendor codes like `rate_limit_exceeded` still match.
static TRANSIENT_KEYWORD_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    let alternatives = TRANSIENT_KEYWORDS
        .iter()
        .map(|k| regex::escape(k))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"(?:^|[^a-z0-9])(?:{})(?:$|[^a-z0-9])", alternatives))
        .map_err(|e| tracing::error!("Failed to compile transient keyword regex: {}", e))
        .ok()
});

/// Whether a failed primary call may be retried against the fallback.
///
/// Only transient failures qualify. Numeric indicators are matched against
/// the status and transport code, never against free-form message text.
pub fn should_fallback(error: &ProviderError) -> bool {
    if let Some(status) = error.status() {
        if TRANSIENT_STATUSES.contains(&status) {
            return true;
        }
    }

    let code = error.code();
    if TRANSIENT_CODES.iter().any(|c| code.eq_ignore_ascii_case(c)) {
        return true;
    }

    let message = error.to_string().to_lowercase();
    let eligible = match TRANSIENT_KEYWORD_PATTERN.as_ref() {
        Some(pattern) => pattern.is_match(&message),
        None => TRANSIENT_KEYWORDS.iter().any(|k| message.contains(k)),
    };

    debug!(code = %code, eligible, "Fallback eligibility evaluated");
    eligible
}

/// One unit of work dispatched to a provider.
#[derive(Debug, Clone, Copy)]
enum GenerationRequest<'a> {
    Text {
        prompt: &'a str,
    },
    Vision {
        prompt: &'a str,
        bytes: &'a [u8],
        mime_type: &'a str,
    },
}

impl GenerationRequest<'_> {
    fn prompt(&self) -> &str {
        match self {
            GenerationRequest::Text { prompt } | GenerationRequest::Vision { prompt, .. } => *prompt,
        }
    }

    fn operation(&self) -> &'static str {
        match self {
            GenerationRequest::Text { .. } => "generate",
            GenerationRequest::Vision { .. } => "generate_with_vision",
        }
    }

    /// Vision calls may also move to a fallback that can read the input when
    /// the primary cannot.
    fn is_fallback_eligible(&self, error: &ProviderError) -> bool {
        match (self, error) {
            (GenerationRequest::Vision { .. }, ProviderError::VisionNotSupported { .. }) => true,
            _ => should_fallback(error),
        }
    }
}

/// Counters plus the configured provider pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceStats {
    pub primary_provider: ProviderId,
    pub fallback_provider: Option<ProviderId>,
    #[serde(flatten)]
    pub counters: StatsSnapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderHealth {
    pub provider: ProviderId,
    pub model: String,
    pub available: bool,
    pub latency_ms: Option<u64>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub primary: ProviderHealth,
    pub fallback: Option<ProviderHealth>,
    pub fallback_enabled: bool,
    pub stats: ServiceStats,
}

/// Generation orchestrator: one primary provider, at most one fallback.
///
/// Attempts are strictly sequential. The fallback is only tried after the
/// primary has conclusively failed with a transient error.
#[derive(Debug, Clone)]
pub struct LLMService {
    primary: LLMProvider,
    fallback: Option<LLMProvider>,
    params: GenerationParams,
    stats: Arc<OrchestrationStats>,
}

impl LLMService {
    pub fn new(config: &AiConfig) -> Self {
        Self::with_stats(config, Arc::new(OrchestrationStats::new()))
    }

    /// Build from config, sharing an existing stats sink.
    pub fn with_stats(config: &AiConfig, stats: Arc<OrchestrationStats>) -> Self {
        let primary = LLMProviderFactory::create_provider(config.primary.clone());
        let fallback = config
            .fallback
            .clone()
            .map(LLMProviderFactory::create_provider);

        let service = Self::from_providers(primary, fallback, config.params, stats);

        log_system_event!(
            startup,
            component = "llm_service",
            format!(
                "LLM service ready (primary: {} / {}, fallback: {})",
                service.provider_name(),
                service.model_name(),
                service
                    .fallback
                    .as_ref()
                    .map(|p| format!("{} / {}", p.provider_name(), p.model_name()))
                    .unwrap_or_else(|| "none".to_string())
            )
        );
        debug!(
            provider = %config.primary.provider,
            requests_per_minute = ?config.primary.rate_limit.requests_per_minute,
            tokens_per_minute = ?config.primary.rate_limit.tokens_per_minute,
            requests_per_day = ?config.primary.rate_limit.requests_per_day,
            "Primary provider rate limits"
        );

        service
    }

    pub fn from_providers(
        primary: LLMProvider,
        fallback: Option<LLMProvider>,
        params: GenerationParams,
        stats: Arc<OrchestrationStats>,
    ) -> Self {
        if let Some(fallback) = &fallback {
            if fallback.provider_id() == primary.provider_id() {
                warn!(
                    provider = %primary.provider_id(),
                    "Primary and fallback providers are identical; fallback will repeat the same vendor"
                );
            }
        }

        Self {
            primary,
            fallback,
            params,
            stats,
        }
    }

    /// Get the primary provider name for logging and testing
    pub fn provider_name(&self) -> &'static str {
        self.primary.provider_name()
    }

    /// Get the primary model name being used
    pub fn model_name(&self) -> &str {
        self.primary.model_name()
    }

    pub fn primary_provider(&self) -> ProviderId {
        self.primary.provider_id()
    }

    pub fn fallback_provider(&self) -> Option<ProviderId> {
        self.fallback.as_ref().map(LLMProvider::provider_id)
    }

    pub fn params(&self) -> &GenerationParams {
        &self.params
    }

    pub async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<GenerationResult, GenerationError> {
        self.orchestrate(GenerationRequest::Text { prompt }, options)
            .await
    }

    pub async fn generate_with_vision(
        &self,
        prompt: &str,
        bytes: &[u8],
        mime_type: &str,
        options: &GenerationOptions,
    ) -> Result<GenerationResult, GenerationError> {
        self.orchestrate(
            GenerationRequest::Vision {
                prompt,
                bytes,
                mime_type,
            },
            options,
        )
        .await
    }

    async fn orchestrate(
        &self,
        request: GenerationRequest<'_>,
        options: &GenerationOptions,
    ) -> Result<GenerationResult, GenerationError> {
        if request.prompt().trim().is_empty() {
            return Err(GenerationError::InvalidRequest(
                "Prompt must not be empty".to_string(),
            ));
        }

        let operation = request.operation();
        self.stats.record_request();

        let primary_error = match self.attempt(&self.primary, request, options, "primary").await {
            Ok(result) => {
                self.stats.record_primary_success(result.provider);
                return Ok(result);
            }
            Err(err) => {
                self.stats.record_primary_failure();
                err
            }
        };

        let Some(fallback) = &self.fallback else {
            log_llm_operation!(warn, operation, "No fallback provider configured");
            return Err(primary_error.into());
        };

        if !request.is_fallback_eligible(&primary_error) {
            log_llm_operation!(
                warn,
                operation,
                format!("Error code {} is not eligible for fallback", primary_error.code())
            );
            return Err(primary_error.into());
        }

        self.stats.record_fallback_attempt();
        log_llm_operation!(
            fallback,
            operation,
            from = primary_error.provider(),
            to = fallback.provider_id()
        );

        match self.attempt(fallback, request, options, "fallback").await {
            Ok(mut result) => {
                self.stats.record_fallback_success(result.provider);
                result.used_fallback = true;
                info!(
                    provider = %result.provider,
                    model = %result.model,
                    "Fallback successful"
                );
                Ok(result)
            }
            Err(fallback_error) => {
                self.stats.record_fallback_failure();
                Err(GenerationError::BothProvidersFailed {
                    primary: Box::new(primary_error),
                    fallback: Box::new(fallback_error),
                })
            }
        }
    }

    async fn attempt(
        &self,
        provider: &LLMProvider,
        request: GenerationRequest<'_>,
        options: &GenerationOptions,
        role: &'static str,
    ) -> Result<GenerationResult, ProviderError> {
        let operation = request.operation();
        let resolved = options.resolve(&self.params, provider.config().request_timeout_ms);
        let start = Instant::now();

        log_llm_operation!(start, operation, provider = provider.provider_id(), role = role);

        let outcome = match request {
            GenerationRequest::Text { prompt } => provider.generate(prompt, &resolved).await,
            GenerationRequest::Vision {
                prompt,
                bytes,
                mime_type,
            } => {
                provider
                    .generate_with_vision(prompt, bytes, mime_type, &resolved)
                    .await
            }
        };

        match &outcome {
            Ok(result) => {
                log_llm_operation!(
                    success,
                    operation,
                    provider = result.provider,
                    duration_ms = start.elapsed().as_millis() as u64,
                    tokens = result.usage.total_tokens
                );
            }
            Err(err) => {
                log_llm_operation!(
                    error,
                    operation,
                    provider = err.provider(),
                    error = err,
                    code = err.code(),
                    kind = err.kind()
                );
            }
        }

        outcome
    }

    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            primary_provider: self.primary_provider(),
            fallback_provider: self.fallback_provider(),
            counters: self.stats.snapshot(),
        }
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
        info!("LLM service statistics reset");
    }

    /// Probe every configured provider with a tiny prompt. Probes bypass the
    /// orchestrator and leave the counters untouched.
    pub async fn check_health(&self) -> HealthReport {
        let primary = probe(&self.primary).await;
        let fallback = match &self.fallback {
            Some(provider) => Some(probe(provider).await),
            None => None,
        };

        HealthReport {
            primary,
            fallback,
            fallback_enabled: self.fallback.is_some(),
            stats: self.stats(),
        }
    }
}

async fn probe(provider: &LLMProvider) -> ProviderHealth {
    let options = GenerationOptions::default()
        .with_max_output_tokens(10)
        .with_temperature(0.0)
        .resolve(&GenerationParams::default(), provider.config().request_timeout_ms);
    let start = Instant::now();

    match provider.generate(HEALTH_PROBE_PROMPT, &options).await {
        Ok(result) => ProviderHealth {
            provider: provider.provider_id(),
            model: result.model,
            available: true,
            latency_ms: Some(start.elapsed().as_millis() as u64),
            reason: None,
        },
        Err(err) => {
            debug!(provider = %provider.provider_id(), error = %err, "Health check failed");
            ProviderHealth {
                provider: provider.provider_id(),
                model: provider.model_name().to_string(),
                available: false,
                latency_ms: None,
                reason: Some(err.to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;

    fn api_error(status: u16, message: &str) -> ProviderError {
        ProviderError::Api {
            provider: ProviderId::Gemini,
            status,
            message: message.to_string(),
            body: String::new(),
        }
    }

    #[test]
    fn test_transient_statuses_are_eligible() {
        for status in [429, 500, 502, 503, 504] {
            assert!(should_fallback(&api_error(status, "Gemini API Error")), "{}", status);
        }
    }

    #[test]
    fn test_client_errors_are_not_eligible() {
        assert!(!should_fallback(&api_error(400, "Invalid prompt")));
        assert!(!should_fallback(&api_error(401, "API key not valid")));
        assert!(!should_fallback(&api_error(404, "model not found")));
    }

    #[test]
    fn test_numbers_in_message_text_do_not_trigger_fallback() {
        assert!(!should_fallback(&api_error(400, "prompt exceeds 500 characters")));
    }

    #[test]
    fn test_message_keywords_are_eligible() {
        assert!(should_fallback(&api_error(403, "Quota exceeded for project")));
        assert!(should_fallback(&api_error(400, "Rate limit reached for model")));
        assert!(should_fallback(&ProviderError::Transport {
            provider: ProviderId::Groq,
            code: "ETRANSPORT".to_string(),
            message: "connection reset by peer".to_string(),
        }));
    }

    #[test]
    fn test_keywords_match_whole_words_only() {
        assert!(should_fallback(&api_error(400, "rate_limit_exceeded: slow down")));
        assert!(should_fallback(&api_error(400, "DNS lookup failed for host")));
        assert!(should_fallback(&api_error(403, "SERVICE_UNAVAILABLE")));

        assert!(!should_fallback(&api_error(400, "unknown field 'cmdnsrv' in request")));
        assert!(!should_fallback(&api_error(400, "invalid value for maxquotas")));
        assert!(!should_fallback(&api_error(404, "model gemini-timeouts-preview not found")));
    }

    #[test]
    fn test_transport_codes_are_eligible() {
        assert!(should_fallback(&ProviderError::Timeout {
            provider: ProviderId::Gemini,
            timeout_ms: 100,
        }));
        assert!(should_fallback(&ProviderError::Transport {
            provider: ProviderId::Gemini,
            code: "ECONNREFUSED".to_string(),
            message: "error sending request".to_string(),
        }));
        assert!(should_fallback(&ProviderError::Transport {
            provider: ProviderId::Gemini,
            code: "ENOTFOUND".to_string(),
            message: "error sending request".to_string(),
        }));
    }

    #[test]
    fn test_response_errors_are_not_eligible() {
        assert!(!should_fallback(&ProviderError::EmptyResponse {
            provider: ProviderId::Gemini,
            body: "{}".to_string(),
        }));
        assert!(!should_fallback(&ProviderError::MalformedResponse {
            provider: ProviderId::Groq,
            message: "expected value".to_string(),
            body: "<html>".to_string(),
        }));
    }

    #[test]
    fn test_vision_capability_gap_only_eligible_on_vision_path() {
        let err = ProviderError::VisionNotSupported {
            provider: ProviderId::Groq,
            mime_type: "application/pdf".to_string(),
        };
        assert!(!should_fallback(&err));

        let vision = GenerationRequest::Vision {
            prompt: "extract",
            bytes: &[1, 2, 3],
            mime_type: "application/pdf",
        };
        assert!(vision.is_fallback_eligible(&err));
        assert!(!GenerationRequest::Text { prompt: "hi" }.is_fallback_eligible(&err));
    }

    #[tokio::test]
    async fn test_empty_prompt_is_rejected_without_counting() {
        let config = AiConfig::new(ProviderConfig::gemini("key"), None);
        let service = LLMService::new(&config);

        let err = service
            .generate("   ", &GenerationOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::InvalidRequest(_)));
        assert_eq!(service.stats().counters.total_requests, 0);
    }

    #[test]
    fn test_service_exposes_primary_provider_details() {
        let config = AiConfig::new(
            ProviderConfig::gemini("key").with_model("gemini-test"),
            Some(ProviderConfig::groq("key")),
        );
        let service = LLMService::new(&config);

        assert_eq!(service.provider_name(), "Gemini");
        assert_eq!(service.model_name(), "gemini-test");
        assert_eq!(service.fallback_provider(), Some(ProviderId::Groq));
        assert_eq!(service.stats().primary_provider, ProviderId::Gemini);
    }
}
