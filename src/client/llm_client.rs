//! Generic LLM client for OpenAI-compatible chat-completions endpoints.
//!
//! Epistemic foundation:
//! - K_i: OpenAI API schema is the de facto standard (Groq, SambaNova and NIM all speak it)
//! - B_i: API will respond within timeout (might fail)
//! - B_i: Response will be valid JSON (might fail)
//! - K_i: No retries. A retried request would measure the retry, not the provider

use crate::models::{ProviderError, Result, VelocityError};
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Raw response body of a streaming request, in arrival order.
pub type ChunkStream = BoxStream<'static, Result<Bytes>>;

/// Message in a chat completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Chat completion request payload.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            stream: None,
            max_tokens: None,
            temperature: None,
            top_p: None,
        }
    }

    pub fn sampling(
        mut self,
        max_tokens: Option<u32>,
        temperature: Option<f64>,
        top_p: Option<f64>,
    ) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self.top_p = top_p;
        self
    }
}

/// Chat completion response.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

/// API error response (OpenAI-compatible).
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Client for one OpenAI-compatible endpoint.
///
/// Holds no mutable state; one instance per provider.
#[derive(Debug, Clone)]
pub struct LLMClient {
    client: reqwest::Client,
    /// Name of this endpoint (for logging and errors)
    name: String,
    /// API key (None sends no Authorization header)
    api_key: Option<String>,
    /// Full chat-completions URL
    api_url: String,
    /// Request timeout
    timeout: Duration,
}

impl LLMClient {
    /// Create a new LLM client.
    ///
    /// # Arguments
    /// - `name`: Provider name for logging (e.g., "Groq")
    /// - `api_key`: Optional API key
    /// - `api_url`: Full chat-completions URL
    /// - `timeout_secs`: Request timeout in seconds, covering the whole body
    pub fn new(
        name: impl Into<String>,
        api_key: Option<String>,
        api_url: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self> {
        let timeout = Duration::from_secs(timeout_secs);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(VelocityError::Network)?;

        Ok(Self {
            client,
            name: name.into(),
            api_key,
            api_url: api_url.into(),
            timeout,
        })
    }

    /// Get the endpoint name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the chat-completions URL.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Build headers for a request.
    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();

        if let Some(ref api_key) = self.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {api_key}")).map_err(|_| {
                VelocityError::InvalidInput(format!(
                    "API key for {} contains characters not allowed in a header",
                    self.name
                ))
            })?;
            headers.insert(AUTHORIZATION, value);
        }

        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    /// POST the request and return the response if its status is 2xx.
    async fn send(&self, request: &ChatRequest) -> Result<reqwest::Response> {
        debug!(
            endpoint = %self.name,
            model = %request.model,
            stream = request.stream.unwrap_or(false),
            "Sending chat completion request"
        );

        let response = self
            .client
            .post(&self.api_url)
            .headers(self.headers()?)
            .json(request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let error_body = response.text().await.unwrap_or_default();
        Err(self.status_error(status.as_u16(), &request.model, error_body).into())
    }

    fn transport_error(&self, e: reqwest::Error) -> VelocityError {
        if e.is_timeout() {
            VelocityError::Timeout(self.timeout)
        } else {
            VelocityError::Network(e)
        }
    }

    fn status_error(&self, status: u16, model: &str, body: String) -> ProviderError {
        match status {
            401 => ProviderError::AuthenticationFailed {
                provider: self.name.clone(),
            },
            404 => ProviderError::ModelNotFound {
                provider: self.name.clone(),
                model: model.to_string(),
            },
            _ => {
                let message = serde_json::from_str::<ApiErrorResponse>(&body)
                    .map(|e| e.error.message)
                    .unwrap_or(body);
                ProviderError::ApiError {
                    provider: self.name.clone(),
                    status,
                    message,
                }
            }
        }
    }

    /// Complete a chat request and return the first choice's text.
    ///
    /// B_i(API available) → Result
    /// B_i(valid response) → Result
    pub async fn complete(&self, request: &ChatRequest) -> Result<String> {
        let mut request = request.clone();
        request.stream = None;

        let response = self.send(&request).await?;
        let body: ChatCompletionResponse = response.json().await.map_err(|e| {
            if e.is_decode() {
                VelocityError::Provider(ProviderError::InvalidResponse {
                    provider: self.name.clone(),
                    message: format!("failed to parse response: {e}"),
                })
            } else {
                self.transport_error(e)
            }
        })?;

        let choice = body.choices.into_iter().next().ok_or_else(|| {
            VelocityError::Provider(ProviderError::InvalidResponse {
                provider: self.name.clone(),
                message: "no choices in response".to_string(),
            })
        })?;

        Ok(choice.message.content.unwrap_or_default())
    }

    /// Open a streaming chat request and return the raw body chunks.
    ///
    /// The status is checked before the stream is handed out; failures while
    /// reading the body surface as items of the stream.
    pub async fn stream(&self, request: &ChatRequest) -> Result<ChunkStream> {
        let mut request = request.clone();
        request.stream = Some(true);

        let response = self.send(&request).await?;
        let timeout = self.timeout;

        Ok(response
            .bytes_stream()
            .map(move |chunk| {
                chunk.map_err(|e| {
                    if e.is_timeout() {
                        VelocityError::Timeout(timeout)
                    } else {
                        VelocityError::Network(e)
                    }
                })
            })
            .boxed())
    }
}
