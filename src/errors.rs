use std::fmt;

use crate::llm_providers::ProviderId;

/// Errors raised by a single provider client call.
///
/// Every variant carries the provider that produced it so that callers of the
/// orchestrator can tell which vendor failed and why.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("{provider} request timed out after {timeout_ms}ms")]
    Timeout { provider: ProviderId, timeout_ms: u64 },

    #[error("{provider} transport error ({code}): {message}")]
    Transport {
        provider: ProviderId,
        code: String,
        message: String,
    },

    #[error("{provider} API error (HTTP {status}): {message}")]
    Api {
        provider: ProviderId,
        status: u16,
        message: String,
        body: String,
    },

    #[error("{provider} returned a malformed response: {message}")]
    MalformedResponse {
        provider: ProviderId,
        message: String,
        body: String,
    },

    #[error("{provider} returned an empty response")]
    EmptyResponse { provider: ProviderId, body: String },

    #[error("{provider} does not support vision input for '{mime_type}'")]
    VisionNotSupported {
        provider: ProviderId,
        mime_type: String,
    },
}

/// Coarse classification used for diagnostics and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    Transport,
    Response,
    Capability,
}

impl ProviderError {
    pub fn provider(&self) -> ProviderId {
        match self {
            ProviderError::Timeout { provider, .. }
            | ProviderError::Transport { provider, .. }
            | ProviderError::Api { provider, .. }
            | ProviderError::MalformedResponse { provider, .. }
            | ProviderError::EmptyResponse { provider, .. }
            | ProviderError::VisionNotSupported { provider, .. } => *provider,
        }
    }

    pub fn kind(&self) -> ProviderErrorKind {
        match self {
            ProviderError::Timeout { .. } | ProviderError::Transport { .. } => {
                ProviderErrorKind::Transport
            }
            ProviderError::Api { .. }
            | ProviderError::MalformedResponse { .. }
            | ProviderError::EmptyResponse { .. } => ProviderErrorKind::Response,
            ProviderError::VisionNotSupported { .. } => ProviderErrorKind::Capability,
        }
    }

    /// HTTP status for API errors, `None` for everything else.
    pub fn status(&self) -> Option<u16> {
        match self {
            ProviderError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Machine-readable code: the HTTP status for API errors, otherwise a
    /// transport-style code.
    pub fn code(&self) -> String {
        match self {
            ProviderError::Timeout { .. } => "ETIMEDOUT".to_string(),
            ProviderError::Transport { code, .. } => code.clone(),
            ProviderError::Api { status, .. } => status.to_string(),
            ProviderError::MalformedResponse { .. } => "MALFORMED_RESPONSE".to_string(),
            ProviderError::EmptyResponse { .. } => "EMPTY_RESPONSE".to_string(),
            ProviderError::VisionNotSupported { .. } => "VISION_NOT_SUPPORTED".to_string(),
        }
    }

    /// Raw response body kept for diagnostics, if the provider sent one.
    pub fn body(&self) -> Option<&str> {
        match self {
            ProviderError::Api { body, .. }
            | ProviderError::MalformedResponse { body, .. }
            | ProviderError::EmptyResponse { body, .. } => Some(body.as_str()),
            _ => None,
        }
    }
}

/// Pipeline stage, used to label parse and validation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Extraction,
    Flashcards,
    Quiz,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Extraction => "text extraction",
            Stage::Flashcards => "flashcard generation",
            Stage::Quiz => "quiz generation",
        };
        f.write_str(name)
    }
}

/// Top-level error returned by every pipeline entry point.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("Unsupported content type: {0}")]
    UnsupportedContentType(String),

    #[error("No text could be extracted from file '{0}'")]
    NoTextExtracted(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Both AI providers failed. Primary: {primary}. Fallback: {fallback}")]
    BothProvidersFailed {
        primary: Box<ProviderError>,
        fallback: Box<ProviderError>,
    },

    #[error("Failed to parse AI response during {stage}: {message}")]
    ResponseParse { stage: Stage, message: String },

    #[error("AI response during {stage} had an unexpected shape: {message}")]
    InvalidResponseShape { stage: Stage, message: String },

    #[error("No valid items were generated during {stage}")]
    NoValidItems { stage: Stage },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("File access failed: {0}")]
    FileAccess(String),

    #[error("Failed to read document: {0}")]
    DocumentRead(String),

    #[error("Generation was cancelled")]
    Cancelled,
}

impl GenerationError {
    /// True for failures that originate at a provider boundary.
    pub fn is_provider_failure(&self) -> bool {
        matches!(
            self,
            GenerationError::Provider(_) | GenerationError::BothProvidersFailed { .. }
        )
    }

    /// Providers involved in the failure, primary first.
    pub fn failed_providers(&self) -> Vec<ProviderId> {
        match self {
            GenerationError::Provider(err) => vec![err.provider()],
            GenerationError::BothProvidersFailed { primary, fallback } => {
                vec![primary.provider(), fallback.provider()]
            }
            _ => Vec::new(),
        }
    }
}
