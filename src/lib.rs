//! token-velocity - Tokens-per-second comparison across hosted LLM providers.
//!
//! ## Architecture
//!
//! A single measuring path, built bottom-up:
//! - **Client**: OpenAI-compatible chat-completions over HTTP, one provider per endpoint
//! - **Meter**: Blocking (whole response) or streaming (server-sent events) token rates
//! - **Pipeline**: Sequential multi-provider comparison, N trials each
//! - **Store**: Dated JSON run reports and their history
//!
//! ## Measurement
//!
//! - A token is one whitespace-delimited word of generated text
//! - rate = tokens / elapsed seconds, 0 when no time elapsed
//! - One request in flight at a time, providers in configuration order
//!
//! ## Epistemic Design
//!
//! - K_i (Knowledge): Compile-time enforced invariants (types, enums)
//! - B_i (Beliefs): Runtime fallible operations (Result, Option)
//! - I^R (Resolvable): User-configurable parameters
//! - I^B (Bounded): Network/API uncertainties (timeouts, HTTP errors)

pub mod client;
pub mod meter;
pub mod models;
pub mod pipeline;
pub mod store;

// Re-exports for convenience
pub use client::{GroqProvider, LLMClient, ModelProvider, OpenAiProvider, ProviderRegistry};
pub use meter::{
    SseParser, StreamMeter, StreamState, measure_streaming, measure_tokens_per_second,
};
pub use models::{
    Config, MeasureMode, MeasurementSample, ProviderConfig, ProviderResult, Result, RunReport,
    VelocityError, word_count,
};
pub use pipeline::{ComparisonDriver, RunOutcome};
pub use store::ReportStore;
