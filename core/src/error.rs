//! Error taxonomy for the decision loop.
//!
//! Each outbound boundary gets its own enum so the loop can decide, per kind,
//! whether to retry, record, or degrade the turn.

use thiserror::Error;

/// Why a piece of model output could not be turned into a decision.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("no JSON object or array found in model output")]
    NoStructuredValue,

    #[error("malformed JSON: {0}")]
    InvalidJson(String),

    #[error("unrecognized decision shape: {0}")]
    UnrecognizedShape(String),
}

/// Failure of a tool dispatch. Always recorded as an observation, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    #[error("Tool '{0}' not found")]
    Unknown(String),

    #[error("Tool '{tool}' failed: {message}")]
    Execution { tool: String, message: String },
}

/// Failure of a chat completion request.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("API error {status}: {body}")]
    Status { status: u16, body: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("empty response from model")]
    EmptyResponse,

    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl TransportError {
    /// True when the backend answered but refused the request.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Status { .. })
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

/// Startup configuration problems. These abort before the loop is built.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No API key for provider '{provider}'. Set one of: {vars}")]
    MissingCredential { provider: String, vars: String },

    #[error("Unknown provider: {0}. Available: groq, openai, openrouter, ollama")]
    UnknownProvider(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
