//! Error types for token-velocity.
//!
//! Epistemic taxonomy:
//! - B_i falsified: Expected failures (bad config, unparsable payloads)
//! - I^B materialized: Infrastructure failures (network, timeout, HTTP status)
//! - K_i violated: Internal invariant violations (bugs)

use std::time::Duration;
use thiserror::Error;

/// Top-level error type for token-velocity.
#[derive(Debug, Error)]
pub enum VelocityError {
    // ═══════════════════════════════════════════════════════════════════
    // B_i FALSIFIED — Belief proven wrong (expected failures)
    // ═══════════════════════════════════════════════════════════════════
    #[error("Configuration error: {0}")]
    Config(#[from] super::ConfigError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    // ═══════════════════════════════════════════════════════════════════
    // I^B MATERIALIZED — Bounded ignorance became known-bad
    // ═══════════════════════════════════════════════════════════════════
    #[error("Provider API error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // ═══════════════════════════════════════════════════════════════════
    // K_i VIOLATED — Invariant broken (bug, should not happen)
    // ═══════════════════════════════════════════════════════════════════
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors reported by a provider's chat-completions endpoint.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Authentication failed for {provider}: invalid or missing API key")]
    AuthenticationFailed { provider: String },

    #[error("Model not found on {provider}: {model}")]
    ModelNotFound { provider: String, model: String },

    #[error("API error from {provider} (status {status}): {message}")]
    ApiError {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("Invalid response from {provider}: {message}")]
    InvalidResponse { provider: String, message: String },
}

impl VelocityError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// HTTP status reported by the provider, if this error carries one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Provider(ProviderError::AuthenticationFailed { .. }) => Some(401),
            Self::Provider(ProviderError::ModelNotFound { .. }) => Some(404),
            Self::Provider(ProviderError::ApiError { status, .. }) => Some(*status),
            Self::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Result type alias for token-velocity.
pub type Result<T> = std::result::Result<T, VelocityError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_provider_errors() {
        let auth = VelocityError::from(ProviderError::AuthenticationFailed {
            provider: "Groq".to_string(),
        });
        assert_eq!(auth.status(), Some(401));

        let api = VelocityError::from(ProviderError::ApiError {
            provider: "SambaNova".to_string(),
            status: 503,
            message: "overloaded".to_string(),
        });
        assert_eq!(api.status(), Some(503));
        assert!(api.to_string().contains("status 503"));

        assert_eq!(VelocityError::Internal("x".to_string()).status(), None);
    }
}
