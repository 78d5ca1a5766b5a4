use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::config::ProviderConfig;
use crate::errors::ProviderError;
use crate::models::{GenerationResult, ResolvedOptions, TokenUsage};

/// Closed set of supported vendors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    Gemini,
    Groq,
}

impl ProviderId {
    pub const ALL: [ProviderId; 2] = [ProviderId::Gemini, ProviderId::Groq];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::Gemini => "gemini",
            ProviderId::Groq => "groq",
        }
    }

    /// Stable slot used by per-provider counters.
    pub fn index(&self) -> usize {
        match self {
            ProviderId::Gemini => 0,
            ProviderId::Groq => 1,
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gemini" | "google" => Ok(ProviderId::Gemini),
            "groq" => Ok(ProviderId::Groq),
            other => Err(format!("Unknown AI provider '{}'. Use: gemini, groq", other)),
        }
    }
}

/// Enum-based provider dispatch. Each variant wraps a stateless client that is
/// safe to share between concurrent requests.
#[derive(Debug, Clone)]
pub enum LLMProvider {
    Gemini(GeminiProvider),
    Groq(GroqProvider),
}

impl LLMProvider {
    pub async fn generate(
        &self,
        prompt: &str,
        options: &ResolvedOptions,
    ) -> Result<GenerationResult, ProviderError> {
        match self {
            LLMProvider::Gemini(provider) => provider.generate(prompt, options).await,
            LLMProvider::Groq(provider) => provider.generate(prompt, options).await,
        }
    }

    pub async fn generate_with_vision(
        &self,
        prompt: &str,
        bytes: &[u8],
        mime_type: &str,
        options: &ResolvedOptions,
    ) -> Result<GenerationResult, ProviderError> {
        match self {
            LLMProvider::Gemini(provider) => {
                provider
                    .generate_with_vision(prompt, bytes, mime_type, options)
                    .await
            }
            LLMProvider::Groq(provider) => {
                provider
                    .generate_with_vision(prompt, bytes, mime_type, options)
                    .await
            }
        }
    }

    pub fn provider_id(&self) -> ProviderId {
        self.config().provider
    }

    /// Get the provider name for logging
    pub fn provider_name(&self) -> &'static str {
        match self {
            LLMProvider::Gemini(provider) => provider.provider_name(),
            LLMProvider::Groq(provider) => provider.provider_name(),
        }
    }

    /// Get the model name being used
    pub fn model_name(&self) -> &str {
        &self.config().model
    }

    pub fn config(&self) -> &ProviderConfig {
        match self {
            LLMProvider::Gemini(provider) => &provider.config,
            LLMProvider::Groq(provider) => &provider.config,
        }
    }

    pub fn supports_vision(&self, mime_type: &str) -> bool {
        match self {
            LLMProvider::Gemini(provider) => provider.supports_vision(mime_type),
            LLMProvider::Groq(provider) => provider.supports_vision(mime_type),
        }
    }
}

// ============================================================================
// Gemini
// ============================================================================

/// Gemini `generateContent` client. Supports images and PDFs as inline data.
#[derive(Debug, Clone)]
pub struct GeminiProvider {
    client: Client,
    config: ProviderConfig,
}

#[derive(Debug, Clone, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
    #[serde(rename = "safetySettings", skip_serializing_if = "Vec::is_empty")]
    safety_settings: Vec<GeminiSafetySetting>,
}

#[derive(Debug, Clone, Serialize)]
struct GeminiContent {
    role: &'static str,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Serialize)]
struct GeminiPart {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(rename = "inlineData", skip_serializing_if = "Option::is_none")]
    inline_data: Option<GeminiInlineData>,
}

#[derive(Debug, Clone, Serialize)]
struct GeminiInlineData {
    #[serde(rename = "mimeType")]
    mime_type: String,
    data: String,
}

#[derive(Debug, Clone, Serialize)]
struct GeminiGenerationConfig {
    temperature: f32,
    #[serde(rename = "topK")]
    top_k: u32,
    #[serde(rename = "topP")]
    top_p: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Clone, Serialize)]
struct GeminiSafetySetting {
    category: String,
    threshold: String,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(rename = "usageMetadata", default)]
    usage_metadata: Option<GeminiUsage>,
    #[serde(rename = "modelVersion", default)]
    model_version: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiResponseContent>,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiUsage {
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: Option<u64>,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: Option<u64>,
    #[serde(rename = "totalTokenCount", default)]
    total_token_count: Option<u64>,
}

impl GeminiProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    pub fn provider_name(&self) -> &'static str {
        "Gemini"
    }

    pub fn supports_vision(&self, mime_type: &str) -> bool {
        self.config.vision_capable
            && (mime_type.starts_with("image/") || mime_type == "application/pdf")
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        )
    }

    fn build_request(&self, parts: Vec<GeminiPart>, options: &ResolvedOptions) -> GeminiRequest {
        GeminiRequest {
            contents: vec![GeminiContent {
                role: "user",
                parts,
            }],
            generation_config: GeminiGenerationConfig {
                temperature: options.temperature,
                top_k: options.top_k,
                top_p: options.top_p,
                max_output_tokens: options.max_output_tokens,
            },
            safety_settings: self
                .config
                .safety_settings
                .iter()
                .map(|setting| GeminiSafetySetting {
                    category: setting.category.clone(),
                    threshold: setting.threshold.clone(),
                })
                .collect(),
        }
    }

    pub async fn generate(
        &self,
        prompt: &str,
        options: &ResolvedOptions,
    ) -> Result<GenerationResult, ProviderError> {
        let body = self.build_request(
            vec![GeminiPart {
                text: Some(prompt.to_string()),
                inline_data: None,
            }],
            options,
        );
        self.send(&body, prompt.len(), false, options).await
    }

    pub async fn generate_with_vision(
        &self,
        prompt: &str,
        bytes: &[u8],
        mime_type: &str,
        options: &ResolvedOptions,
    ) -> Result<GenerationResult, ProviderError> {
        if !self.supports_vision(mime_type) {
            return Err(ProviderError::VisionNotSupported {
                provider: self.config.provider,
                mime_type: mime_type.to_string(),
            });
        }

        let body = self.build_request(
            vec![
                GeminiPart {
                    text: Some(prompt.to_string()),
                    inline_data: None,
                },
                GeminiPart {
                    text: None,
                    inline_data: Some(GeminiInlineData {
                        mime_type: mime_type.to_string(),
                        data: BASE64.encode(bytes),
                    }),
                },
            ],
            options,
        );
        self.send(&body, prompt.len(), true, options).await
    }

    async fn send(
        &self,
        body: &GeminiRequest,
        prompt_length: usize,
        has_attachment: bool,
        options: &ResolvedOptions,
    ) -> Result<GenerationResult, ProviderError> {
        debug!(
            provider = self.provider_name(),
            model = %self.config.model,
            base_url = %self.config.base_url,
            prompt_length = prompt_length,
            has_attachment = has_attachment,
            timeout_ms = options.timeout_ms,
            "Making LLM request"
        );

        let request = self
            .client
            .post(self.endpoint())
            .query(&[("key", self.config.api_key.as_str())])
            .header("Content-Type", "application/json")
            .json(body);

        let raw = execute(self.config.provider, request, options.timeout_ms).await?;
        let result = self.parse_response(&raw)?;

        info!(
            provider = self.provider_name(),
            response_length = result.text.len(),
            total_tokens = result.usage.total_tokens,
            "Successfully received LLM response"
        );
        Ok(result)
    }

    fn parse_response(&self, raw: &str) -> Result<GenerationResult, ProviderError> {
        let response: GeminiResponse =
            serde_json::from_str(raw).map_err(|e| ProviderError::MalformedResponse {
                provider: self.config.provider,
                message: format!("response body is not valid JSON: {}", e),
                body: raw.to_string(),
            })?;

        let text = response
            .candidates
            .first()
            .and_then(|candidate| candidate.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|part| part.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(ProviderError::EmptyResponse {
                provider: self.config.provider,
                body: raw.to_string(),
            });
        }

        let usage = response
            .usage_metadata
            .map(|usage| TokenUsage {
                prompt_tokens: usage.prompt_token_count.unwrap_or(0),
                completion_tokens: usage.candidates_token_count.unwrap_or(0),
                total_tokens: usage.total_token_count.unwrap_or(0),
            })
            .unwrap_or_default();

        Ok(GenerationResult {
            text,
            model: response
                .model_version
                .unwrap_or_else(|| self.config.model.clone()),
            usage,
            provider: self.config.provider,
            used_fallback: false,
        })
    }
}

// ============================================================================
// Groq (OpenAI-compatible chat completions)
// ============================================================================

/// Groq chat-completions client. Vision is opt-in and limited to images.
#[derive(Debug, Clone)]
pub struct GroqProvider {
    client: Client,
    config: ProviderConfig,
}

#[derive(Debug, Clone, Serialize)]
struct GroqRequest {
    model: String,
    messages: Vec<GroqMessage>,
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
}

#[derive(Debug, Clone, Serialize)]
struct GroqMessage {
    role: &'static str,
    content: GroqContent,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
enum GroqContent {
    Text(String),
    Parts(Vec<GroqContentPart>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum GroqContentPart {
    Text { text: String },
    ImageUrl { image_url: GroqImageUrl },
}

#[derive(Debug, Clone, Serialize)]
struct GroqImageUrl {
    url: String,
}

#[derive(Debug, Clone, Deserialize)]
struct GroqResponse {
    #[serde(default)]
    choices: Vec<GroqChoice>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<GroqUsage>,
}

#[derive(Debug, Clone, Deserialize)]
struct GroqChoice {
    #[serde(default)]
    message: Option<GroqResponseMessage>,
}

#[derive(Debug, Clone, Deserialize)]
struct GroqResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct GroqUsage {
    #[serde(default)]
    prompt_tokens: Option<u64>,
    #[serde(default)]
    completion_tokens: Option<u64>,
    #[serde(default)]
    total_tokens: Option<u64>,
}

impl GroqProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    pub fn provider_name(&self) -> &'static str {
        "Groq"
    }

    pub fn supports_vision(&self, mime_type: &str) -> bool {
        self.config.vision_capable && mime_type.starts_with("image/")
    }

    pub async fn generate(
        &self,
        prompt: &str,
        options: &ResolvedOptions,
    ) -> Result<GenerationResult, ProviderError> {
        let body = self.build_request(GroqContent::Text(prompt.to_string()), options);
        self.send(&body, prompt.len(), false, options).await
    }

    pub async fn generate_with_vision(
        &self,
        prompt: &str,
        bytes: &[u8],
        mime_type: &str,
        options: &ResolvedOptions,
    ) -> Result<GenerationResult, ProviderError> {
        if !self.supports_vision(mime_type) {
            return Err(ProviderError::VisionNotSupported {
                provider: self.config.provider,
                mime_type: mime_type.to_string(),
            });
        }

        let data_url = format!("data:{};base64,{}", mime_type, BASE64.encode(bytes));
        let content = GroqContent::Parts(vec![
            GroqContentPart::Text {
                text: prompt.to_string(),
            },
            GroqContentPart::ImageUrl {
                image_url: GroqImageUrl { url: data_url },
            },
        ]);
        let body = self.build_request(content, options);
        self.send(&body, prompt.len(), true, options).await
    }

    fn build_request(&self, content: GroqContent, options: &ResolvedOptions) -> GroqRequest {
        GroqRequest {
            model: self.config.model.clone(),
            messages: vec![GroqMessage {
                role: "user",
                content,
            }],
            temperature: options.temperature,
            top_p: options.top_p,
            max_tokens: options.max_output_tokens,
        }
    }

    async fn send(
        &self,
        body: &GroqRequest,
        prompt_length: usize,
        has_attachment: bool,
        options: &ResolvedOptions,
    ) -> Result<GenerationResult, ProviderError> {
        debug!(
            provider = self.provider_name(),
            model = %self.config.model,
            base_url = %self.config.base_url,
            prompt_length = prompt_length,
            has_attachment = has_attachment,
            timeout_ms = options.timeout_ms,
            "Making LLM request"
        );

        let request = self
            .client
            .post(format!(
                "{}/chat/completions",
                self.config.base_url.trim_end_matches('/')
            ))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(body);

        let raw = execute(self.config.provider, request, options.timeout_ms).await?;
        let result = self.parse_response(&raw)?;

        info!(
            provider = self.provider_name(),
            response_length = result.text.len(),
            total_tokens = result.usage.total_tokens,
            "Successfully received LLM response"
        );
        Ok(result)
    }

    fn parse_response(&self, raw: &str) -> Result<GenerationResult, ProviderError> {
        let response: GroqResponse =
            serde_json::from_str(raw).map_err(|e| ProviderError::MalformedResponse {
                provider: self.config.provider,
                message: format!("response body is not valid JSON: {}", e),
                body: raw.to_string(),
            })?;

        let text = response
            .choices
            .first()
            .and_then(|choice| choice.message.as_ref())
            .and_then(|message| message.content.clone())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(ProviderError::EmptyResponse {
                provider: self.config.provider,
                body: raw.to_string(),
            });
        }

        let usage = response
            .usage
            .map(|usage| TokenUsage {
                prompt_tokens: usage.prompt_tokens.unwrap_or(0),
                completion_tokens: usage.completion_tokens.unwrap_or(0),
                total_tokens: usage.total_tokens.unwrap_or(0),
            })
            .unwrap_or_default();

        Ok(GenerationResult {
            text,
            model: response.model.unwrap_or_else(|| self.config.model.clone()),
            usage,
            provider: self.config.provider,
            used_fallback: false,
        })
    }
}

// ============================================================================
// Shared transport
// ============================================================================

/// Send a request with a hard deadline and return the raw body of a 2xx
/// response. The deadline covers connect, headers and body.
async fn execute(
    provider: ProviderId,
    request: RequestBuilder,
    timeout_ms: u64,
) -> Result<String, ProviderError> {
    let response = request
        .timeout(Duration::from_millis(timeout_ms))
        .send()
        .await
        .map_err(|e| classify_transport_error(provider, &e, timeout_ms))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| classify_transport_error(provider, &e, timeout_ms))?;

    if !status.is_success() {
        let message = api_error_message(&body)
            .unwrap_or_else(|| format!("{} API Error ({})", provider, status.as_u16()));
        error!(
            provider = %provider,
            status = %status,
            error = %message,
            "LLM API request failed"
        );
        return Err(ProviderError::Api {
            provider,
            status: status.as_u16(),
            message,
            body,
        });
    }

    Ok(body)
}

/// Pull `error.message` (or a top-level `message`) out of a vendor error body.
fn api_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .pointer("/error/message")
        .or_else(|| value.get("message"))
        .and_then(|message| message.as_str())
        .map(str::to_string)
}

fn classify_transport_error(
    provider: ProviderId,
    err: &reqwest::Error,
    timeout_ms: u64,
) -> ProviderError {
    if err.is_timeout() {
        error!(provider = %provider, timeout_ms = timeout_ms, "LLM request timed out");
        return ProviderError::Timeout {
            provider,
            timeout_ms,
        };
    }

    let message = error_chain(err);
    let lowered = message.to_lowercase();
    let code = if lowered.contains("dns error")
        || lowered.contains("failed to lookup")
        || lowered.contains("name or service not known")
    {
        "ENOTFOUND"
    } else if lowered.contains("connection refused") {
        "ECONNREFUSED"
    } else if lowered.contains("connection reset") {
        "ECONNRESET"
    } else if err.is_connect() {
        "ECONNREFUSED"
    } else {
        "ETRANSPORT"
    };

    error!(provider = %provider, code = code, error = %message, "LLM transport error");
    ProviderError::Transport {
        provider,
        code: code.to_string(),
        message,
    }
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut parts = vec![err.to_string()];
    let mut source = err.source();
    while let Some(inner) = source {
        parts.push(inner.to_string());
        source = inner.source();
    }
    parts.join(": ")
}

/// Factory for creating LLM providers from their configuration
pub struct LLMProviderFactory;

impl LLMProviderFactory {
    pub fn create_provider(config: ProviderConfig) -> LLMProvider {
        match config.provider {
            ProviderId::Gemini => LLMProvider::Gemini(GeminiProvider::new(config)),
            ProviderId::Groq => LLMProvider::Groq(GroqProvider::new(config)),
        }
    }
}
