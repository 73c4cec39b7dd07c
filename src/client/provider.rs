//! Provider capability and its variants.
//!
//! K_i: A provider is anything that can answer a prompt, whole or streamed.
//! Variants differ only in how they shape the request; the HTTP plumbing is
//! shared through [`LLMClient`].

use crate::client::{ChatRequest, ChunkStream, LLMClient, Message};
use crate::models::{ProviderConfig, ProviderKind, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// The capability measured by the meter.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Display name used in logs and reports.
    fn name(&self) -> &str;

    /// Generate a complete response for `prompt`.
    async fn generate_response(&self, prompt: &str) -> Result<String>;

    /// Open a streamed response for `prompt` (server-sent events, raw bytes).
    async fn stream_response(&self, prompt: &str) -> Result<ChunkStream>;
}

/// OpenAI-compatible provider (SambaNova, NVIDIA NIM, Together, generic).
///
/// Sends the configured system prompt, when there is one, ahead of the user
/// prompt along with any configured sampling parameters.
pub struct OpenAiProvider {
    config: ProviderConfig,
    client: LLMClient,
}

impl OpenAiProvider {
    pub fn new(config: ProviderConfig, timeout_secs: u64) -> Result<Self> {
        let client = LLMClient::new(
            config.name.clone(),
            config.api_key.clone(),
            config.api_url.clone(),
            timeout_secs,
        )?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn build_request(&self, prompt: &str) -> ChatRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.config.system_prompt {
            messages.push(Message::system(system.clone()));
        }
        messages.push(Message::user(prompt));

        ChatRequest::new(self.config.model.clone(), messages).sampling(
            self.config.max_tokens,
            self.config.temperature,
            self.config.top_p,
        )
    }
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn generate_response(&self, prompt: &str) -> Result<String> {
        self.client.complete(&self.build_request(prompt)).await
    }

    async fn stream_response(&self, prompt: &str) -> Result<ChunkStream> {
        self.client.stream(&self.build_request(prompt)).await
    }
}

/// Groq-native provider.
///
/// Groq's own SDK sends a bare user message; the system prompt is ignored and
/// only explicitly configured sampling parameters are forwarded.
pub struct GroqProvider {
    config: ProviderConfig,
    client: LLMClient,
}

impl GroqProvider {
    pub fn new(config: ProviderConfig, timeout_secs: u64) -> Result<Self> {
        let client = LLMClient::new(
            config.name.clone(),
            config.api_key.clone(),
            config.api_url.clone(),
            timeout_secs,
        )?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn build_request(&self, prompt: &str) -> ChatRequest {
        ChatRequest::new(self.config.model.clone(), vec![Message::user(prompt)]).sampling(
            self.config.max_tokens,
            self.config.temperature,
            self.config.top_p,
        )
    }
}

#[async_trait]
impl ModelProvider for GroqProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn generate_response(&self, prompt: &str) -> Result<String> {
        self.client.complete(&self.build_request(prompt)).await
    }

    async fn stream_response(&self, prompt: &str) -> Result<ChunkStream> {
        self.client.stream(&self.build_request(prompt)).await
    }
}

/// Build the provider variant matching `config.kind`.
pub fn build_provider(config: ProviderConfig, timeout_secs: u64) -> Result<Arc<dyn ModelProvider>> {
    let provider: Arc<dyn ModelProvider> = match config.kind {
        ProviderKind::Groq => Arc::new(GroqProvider::new(config, timeout_secs)?),
        ProviderKind::SambaNova
        | ProviderKind::Nvidia
        | ProviderKind::Together
        | ProviderKind::OpenAi => Arc::new(OpenAiProvider::new(config, timeout_secs)?),
    };
    Ok(provider)
}
