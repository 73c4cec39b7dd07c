//! Token-rate measurement for a single request.
//!
//! Epistemic foundation:
//! - K_i: rate = words / elapsed seconds, and is 0 when nothing measurable elapsed
//! - B_i: the provider answers (might fail → error propagates, no retry)
//! - K_i: stream chunks are processed strictly in arrival order

use crate::client::ModelProvider;
use crate::meter::{SseEvent, SseParser};
use crate::models::{MeasurementSample, Result, average, tokens_per_second, word_count};
use futures::StreamExt;
use tokio::time::Instant;
use tracing::debug;

/// Measure one non-streamed completion.
///
/// The clock covers the whole request: connect, generation and body transfer.
pub async fn measure_tokens_per_second(
    prompt: &str,
    provider: &dyn ModelProvider,
) -> Result<MeasurementSample> {
    let start = Instant::now();
    let text = provider.generate_response(prompt).await?;
    let elapsed = start.elapsed();

    let sample = MeasurementSample::new(word_count(&text) as u64, elapsed);
    debug!(
        provider = %provider.name(),
        tokens = sample.token_count,
        elapsed_secs = sample.elapsed_secs,
        tokens_per_second = sample.tokens_per_second,
        "Measured completion"
    );
    Ok(sample)
}

/// Lifecycle of a streamed measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Connecting,
    Streaming,
    Done,
    /// Transport failure; the error was returned to the caller
    Failed,
}

/// Outcome of a streamed measurement.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamMeasurement {
    /// Final token count and elapsed time; the rate is the last instantaneous rate
    pub sample: MeasurementSample,
    /// Every instantaneous rate, in arrival order
    pub rates: Vec<f64>,
    /// Malformed data lines that were skipped
    pub skipped_lines: usize,
}

impl StreamMeasurement {
    /// Mean of the instantaneous rates.
    pub fn mean_rate(&self) -> f64 {
        average(&self.rates)
    }
}

/// Consumes one streamed response and tracks its token rate.
#[derive(Debug)]
pub struct StreamMeter {
    state: StreamState,
    parser: SseParser,
    token_count: u64,
    rates: Vec<f64>,
}

impl Default for StreamMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamMeter {
    pub fn new() -> Self {
        Self {
            state: StreamState::Idle,
            parser: SseParser::new(),
            token_count: 0,
            rates: Vec::new(),
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Stream `prompt` through `provider`, calling `on_rate` with each
    /// instantaneous rate as content arrives.
    ///
    /// The clock starts once the provider has accepted the request and the
    /// body starts flowing. The stream ends at `[DONE]` or when the
    /// connection closes, whichever comes first.
    pub async fn run<F>(
        &mut self,
        prompt: &str,
        provider: &dyn ModelProvider,
        mut on_rate: F,
    ) -> Result<StreamMeasurement>
    where
        F: FnMut(f64),
    {
        self.parser = SseParser::new();
        self.token_count = 0;
        self.rates.clear();

        self.state = StreamState::Connecting;
        let mut stream = match provider.stream_response(prompt).await {
            Ok(stream) => stream,
            Err(e) => {
                self.state = StreamState::Failed;
                return Err(e);
            }
        };

        self.state = StreamState::Streaming;
        let start = Instant::now();

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    self.state = StreamState::Failed;
                    return Err(e);
                }
            };

            let events = self.parser.push(&chunk);
            self.apply(events, start, &mut on_rate);
            if self.parser.is_done() {
                break;
            }
        }

        if !self.parser.is_done() {
            let events = self.parser.finish();
            self.apply(events, start, &mut on_rate);
        }

        self.state = StreamState::Done;
        let elapsed = start.elapsed();

        let sample = MeasurementSample {
            tokens_per_second: self.rates.last().copied().unwrap_or(0.0),
            token_count: self.token_count,
            elapsed_secs: elapsed.as_secs_f64(),
        };
        debug!(
            provider = %provider.name(),
            tokens = sample.token_count,
            elapsed_secs = sample.elapsed_secs,
            tokens_per_second = sample.tokens_per_second,
            skipped_lines = self.parser.skipped_lines(),
            "Stream complete"
        );

        Ok(StreamMeasurement {
            sample,
            rates: self.rates.clone(),
            skipped_lines: self.parser.skipped_lines(),
        })
    }

    fn apply<F: FnMut(f64)>(&mut self, events: Vec<SseEvent>, start: Instant, on_rate: &mut F) {
        for event in events {
            let SseEvent::Content(content) = event else {
                continue;
            };

            self.token_count += word_count(&content) as u64;
            let elapsed_secs = start.elapsed().as_secs_f64();
            if elapsed_secs > 0.0 {
                let rate = tokens_per_second(self.token_count, elapsed_secs);
                self.rates.push(rate);
                on_rate(rate);
            }
        }
    }
}

/// Measure one streamed completion with a fresh [`StreamMeter`].
pub async fn measure_streaming<F>(
    prompt: &str,
    provider: &dyn ModelProvider,
    on_rate: F,
) -> Result<StreamMeasurement>
where
    F: FnMut(f64),
{
    StreamMeter::new().run(prompt, provider, on_rate).await
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::client::ChunkStream;
    use crate::models::VelocityError;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::time::Duration;

    /// Provider double: fixed text after a fixed delay, streamed as timed chunks.
    pub(crate) struct ScriptedProvider {
        pub name: String,
        pub text: String,
        pub delay: Duration,
        pub chunks: Vec<&'static str>,
        pub fail: bool,
        /// Yield a timeout error after this many chunks
        pub drop_after: Option<usize>,
    }

    impl ScriptedProvider {
        pub(crate) fn new(name: &str, text: &str, delay: Duration) -> Self {
            Self {
                name: name.to_string(),
                text: text.to_string(),
                delay,
                chunks: Vec::new(),
                fail: false,
                drop_after: None,
            }
        }
    }

    #[async_trait]
    impl ModelProvider for ScriptedProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn generate_response(&self, _prompt: &str) -> Result<String> {
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(VelocityError::Internal(format!("{} unavailable", self.name)));
            }
            Ok(self.text.clone())
        }

        async fn stream_response(&self, _prompt: &str) -> Result<ChunkStream> {
            if self.fail {
                return Err(VelocityError::Internal(format!("{} unavailable", self.name)));
            }
            let delay = self.delay;
            let drop_after = self.drop_after;
            let chunks = self.chunks.clone();
            Ok(futures::stream::iter(chunks.into_iter().enumerate())
                .then(move |(index, chunk)| async move {
                    tokio::time::sleep(delay).await;
                    if drop_after.is_some_and(|limit| index >= limit) {
                        return Err(VelocityError::Timeout(delay));
                    }
                    Ok(Bytes::from_static(chunk.as_bytes()))
                })
                .boxed())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocking_rate_over_fixed_delay() {
        let provider = ScriptedProvider::new("A", "one two three four", Duration::from_secs(2));

        let sample = measure_tokens_per_second("prompt", &provider).await.unwrap();
        assert_eq!(sample.token_count, 4);
        assert_eq!(sample.elapsed_secs, 2.0);
        assert_eq!(sample.tokens_per_second, 2.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocking_error_propagates() {
        let mut provider = ScriptedProvider::new("A", "", Duration::from_millis(10));
        provider.fail = true;
        assert!(measure_tokens_per_second("prompt", &provider).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_streaming_rates() {
        let mut provider = ScriptedProvider::new("A", "", Duration::from_secs(1));
        provider.chunks = vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"one two\"}}]}\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\" three",
            " four\"}}]}\ndata: not-json\n",
            "data: [DONE]\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n",
        ];

        let mut live = Vec::new();
        let mut meter = StreamMeter::new();
        assert_eq!(meter.state(), StreamState::Idle);

        let result = meter
            .run("prompt", &provider, |rate| live.push(rate))
            .await
            .unwrap();

        assert_eq!(meter.state(), StreamState::Done);
        assert_eq!(live, vec![2.0, 4.0 / 3.0]);
        assert_eq!(result.rates, live);
        assert_eq!(result.sample.token_count, 4);
        assert_eq!(result.sample.tokens_per_second, 4.0 / 3.0);
        assert_eq!(result.sample.elapsed_secs, 4.0);
        assert_eq!(result.skipped_lines, 1);
        assert!((result.mean_rate() - (2.0 + 4.0 / 3.0) / 2.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_without_terminator() {
        let mut provider = ScriptedProvider::new("A", "", Duration::from_secs(2));
        provider.chunks = vec!["data: {\"choices\":[{\"delta\":{\"content\":\"a b c d\"}}]}"];

        let result = measure_streaming("prompt", &provider, |_| {}).await.unwrap();
        assert_eq!(result.sample.token_count, 4);
        assert_eq!(result.sample.tokens_per_second, 2.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_connect_failure() {
        let mut provider = ScriptedProvider::new("A", "", Duration::from_secs(1));
        provider.fail = true;

        let mut meter = StreamMeter::new();
        assert!(meter.run("prompt", &provider, |_| {}).await.is_err());
        assert_eq!(meter.state(), StreamState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_transport_failure_mid_stream() {
        let mut provider = ScriptedProvider::new("A", "", Duration::from_secs(1));
        provider.chunks = vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"one two\"}}]}\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"three\"}}]}\n",
        ];
        provider.drop_after = Some(1);

        let mut live = Vec::new();
        let mut meter = StreamMeter::new();
        let result = meter.run("prompt", &provider, |rate| live.push(rate)).await;

        assert!(matches!(result, Err(VelocityError::Timeout(_))));
        assert_eq!(meter.state(), StreamState::Failed);
        assert_eq!(live, vec![2.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_meter_reuse_starts_fresh() {
        let mut provider = ScriptedProvider::new("A", "", Duration::from_secs(1));
        provider.chunks = vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"one two\"}}]}\n",
            "data: [DONE]\n",
        ];

        let mut meter = StreamMeter::new();
        let first = meter.run("prompt", &provider, |_| {}).await.unwrap();
        let second = meter.run("prompt", &provider, |_| {}).await.unwrap();

        assert_eq!(first.sample.token_count, 2);
        assert_eq!(first.rates, vec![2.0]);
        assert_eq!(first.sample.elapsed_secs, 2.0);
        assert_eq!(second, first);
        assert_eq!(meter.state(), StreamState::Done);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_stream_has_zero_rate() {
        let mut provider = ScriptedProvider::new("A", "", Duration::from_secs(1));
        provider.chunks = vec!["data: [DONE]\n"];

        let result = measure_streaming("prompt", &provider, |_| {}).await.unwrap();
        assert_eq!(result.sample.tokens_per_second, 0.0);
        assert!(result.rates.is_empty());
        assert_eq!(result.mean_rate(), 0.0);
    }
}
