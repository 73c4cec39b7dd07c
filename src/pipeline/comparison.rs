//! Multi-provider comparison.
//!
//! Pipeline flow:
//! Providers (config order) → N trials each → mean rate → RunReport → JSON
//!
//! K_i: Strictly sequential. Only one request is in flight at a time so one
//! provider's traffic never skews another's timing.

use crate::client::{ModelProvider, ProviderRegistry};
use crate::meter::{measure_streaming, measure_tokens_per_second};
use crate::models::{
    MeasureMode, ProviderResult, Result, Rounding, RunConfig, RunReport, average,
};
use crate::store::ReportStore;
use chrono::{Local, NaiveDate};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Result of a comparison run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub report: RunReport,
    /// Where the report was written, when a store is configured
    pub saved_to: Option<PathBuf>,
    /// Providers skipped after an error (only with `continue_on_error`)
    pub failed: Vec<String>,
    pub runtime_secs: f64,
}

/// Runs every provider `repeat` times and averages the rates.
#[derive(Debug, Clone)]
pub struct ComparisonDriver {
    repeat: usize,
    mode: MeasureMode,
    rounding: Rounding,
    continue_on_error: bool,
    store: Option<ReportStore>,
    show_progress: bool,
}

impl ComparisonDriver {
    pub fn new(repeat: usize, mode: MeasureMode) -> Self {
        Self {
            repeat: repeat.max(1),
            mode,
            rounding: Rounding::default(),
            continue_on_error: false,
            store: None,
            show_progress: false,
        }
    }

    /// Driver configured from the `[run]` section.
    pub fn from_config(run: &RunConfig) -> Self {
        let mut driver = Self::new(run.repeat, run.mode)
            .with_rounding(run.rounding)
            .continue_on_error(run.continue_on_error);
        if let Some(dir) = &run.metrics_dir {
            driver = driver.with_store(ReportStore::new(dir));
        }
        driver
    }

    pub fn with_rounding(mut self, rounding: Rounding) -> Self {
        self.rounding = rounding;
        self
    }

    pub fn continue_on_error(mut self, enabled: bool) -> Self {
        self.continue_on_error = enabled;
        self
    }

    pub fn with_store(mut self, store: ReportStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn without_store(mut self) -> Self {
        self.store = None;
        self
    }

    pub fn with_progress(mut self, enabled: bool) -> Self {
        self.show_progress = enabled;
        self
    }

    pub fn mode(&self) -> MeasureMode {
        self.mode
    }

    pub fn repeat(&self) -> usize {
        self.repeat
    }

    /// Measure one trial with the configured mode.
    async fn measure_once(&self, provider: &dyn ModelProvider, prompt: &str) -> Result<f64> {
        match self.mode {
            MeasureMode::Blocking => Ok(measure_tokens_per_second(prompt, provider)
                .await?
                .tokens_per_second),
            MeasureMode::Streaming => {
                let name = provider.name();
                let measurement = measure_streaming(prompt, provider, |rate| {
                    debug!(provider = %name, tokens_per_second = rate, "Live rate");
                })
                .await?;
                Ok(measurement.sample.tokens_per_second)
            }
        }
    }

    /// Run all trials for one provider and average them.
    pub async fn measure_provider(
        &self,
        provider: &dyn ModelProvider,
        prompt: &str,
        progress: Option<&ProgressBar>,
    ) -> Result<ProviderResult> {
        let mut rates = Vec::with_capacity(self.repeat);

        for trial in 1..=self.repeat {
            if let Some(pb) = progress {
                pb.set_message(format!("{} trial {}/{}", provider.name(), trial, self.repeat));
            }

            let rate = self.measure_once(provider, prompt).await?;
            debug!(
                provider = %provider.name(),
                trial = trial,
                tokens_per_second = rate,
                "Trial complete"
            );
            rates.push(rate);

            if let Some(pb) = progress {
                pb.inc(1);
            }
        }

        let velocity = self.rounding.apply(average(&rates));
        info!(
            "Provider: {}, Average Tokens Per Second: {}",
            provider.name(),
            velocity
        );
        Ok(ProviderResult::new(provider.name(), velocity))
    }

    /// Run the comparison for today's date.
    pub async fn run(&self, registry: &ProviderRegistry, prompt: &str) -> Result<RunOutcome> {
        self.run_for_date(registry, prompt, Local::now().date_naive())
            .await
    }

    /// Run the comparison and date the report `date`.
    pub async fn run_for_date(
        &self,
        registry: &ProviderRegistry,
        prompt: &str,
        date: NaiveDate,
    ) -> Result<RunOutcome> {
        let start = Instant::now();
        let total = registry.len() * self.repeat;

        info!(
            providers = registry.len(),
            repeat = self.repeat,
            mode = %self.mode,
            "Starting comparison"
        );

        let pb = self.progress_bar(total as u64);
        let mut report = RunReport::new(date.format("%Y-%m-%d").to_string());
        let mut failed = Vec::new();

        for provider in registry.iter() {
            match self
                .measure_provider(provider.as_ref(), prompt, pb.as_ref())
                .await
            {
                Ok(result) => report.metrics.push(result),
                Err(e) if self.continue_on_error => {
                    warn!(provider = %provider.name(), error = %e, "Provider failed, skipping");
                    failed.push(provider.name().to_string());
                }
                Err(e) => {
                    if let Some(pb) = &pb {
                        pb.abandon_with_message(format!("{} failed", provider.name()));
                    }
                    return Err(e);
                }
            }
        }

        if let Some(pb) = &pb {
            pb.finish_with_message("done");
        }

        let saved_to = match &self.store {
            Some(store) => Some(store.save(&report)?),
            None => None,
        };

        Ok(RunOutcome {
            report,
            saved_to,
            failed,
            runtime_secs: start.elapsed().as_secs_f64(),
        })
    }

    fn progress_bar(&self, total: u64) -> Option<ProgressBar> {
        if !self.show_progress {
            return None;
        }

        let pb = ProgressBar::new(total);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("##-"));
        }
        Some(pb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meter::ScriptedProvider;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 8, 14).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_preserves_order_and_averages() {
        let providers: Vec<Arc<dyn ModelProvider>> = vec![
            Arc::new(ScriptedProvider::new("B", "a b c d e f", Duration::from_secs(2))),
            Arc::new(ScriptedProvider::new("A", "one two three four", Duration::from_secs(2))),
        ];
        let registry = ProviderRegistry::from_providers(providers);

        let outcome = ComparisonDriver::new(3, MeasureMode::Blocking)
            .run_for_date(&registry, "prompt", date())
            .await
            .unwrap();

        assert_eq!(outcome.report.metric_date, "2024-08-14");
        assert_eq!(
            outcome.report.metrics,
            vec![ProviderResult::new("B", 3.0), ProviderResult::new("A", 2.0)]
        );
        assert!(outcome.saved_to.is_none());
        assert!(outcome.failed.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_truncates_average() {
        let provider: Arc<dyn ModelProvider> = Arc::new(ScriptedProvider::new(
            "A",
            "one two three four five",
            Duration::from_secs(2),
        ));
        let registry = ProviderRegistry::from_providers(vec![provider]);

        let truncated = ComparisonDriver::new(1, MeasureMode::Blocking)
            .run_for_date(&registry, "prompt", date())
            .await
            .unwrap();
        assert_eq!(truncated.report.velocity_of("A"), Some(2.0));

        let raw = ComparisonDriver::new(1, MeasureMode::Blocking)
            .with_rounding(Rounding::None)
            .run_for_date(&registry, "prompt", date())
            .await
            .unwrap();
        assert_eq!(raw.report.velocity_of("A"), Some(2.5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_aborts_run_by_default() {
        let mut broken = ScriptedProvider::new("Broken", "", Duration::from_millis(1));
        broken.fail = true;
        let providers: Vec<Arc<dyn ModelProvider>> = vec![
            Arc::new(broken),
            Arc::new(ScriptedProvider::new("A", "one two", Duration::from_secs(1))),
        ];
        let registry = ProviderRegistry::from_providers(providers);

        let result = ComparisonDriver::new(2, MeasureMode::Blocking)
            .run_for_date(&registry, "prompt", date())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_continue_on_error_skips_provider() {
        let mut broken = ScriptedProvider::new("Broken", "", Duration::from_millis(1));
        broken.fail = true;
        let providers: Vec<Arc<dyn ModelProvider>> = vec![
            Arc::new(broken),
            Arc::new(ScriptedProvider::new("A", "one two", Duration::from_secs(1))),
        ];
        let registry = ProviderRegistry::from_providers(providers);

        let outcome = ComparisonDriver::new(2, MeasureMode::Blocking)
            .continue_on_error(true)
            .run_for_date(&registry, "prompt", date())
            .await
            .unwrap();
        assert_eq!(outcome.failed, vec!["Broken".to_string()]);
        assert_eq!(outcome.report.metrics, vec![ProviderResult::new("A", 2.0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_streaming_mode_and_persistence() {
        let mut provider = ScriptedProvider::new("A", "", Duration::from_secs(1));
        provider.chunks = vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"one two three\"}}]}\n",
            "data: [DONE]\n",
        ];
        let provider: Arc<dyn ModelProvider> = Arc::new(provider);
        let registry = ProviderRegistry::from_providers(vec![provider]);

        let temp_dir = TempDir::new().unwrap();
        let outcome = ComparisonDriver::new(2, MeasureMode::Streaming)
            .with_store(ReportStore::new(temp_dir.path()))
            .run_for_date(&registry, "prompt", date())
            .await
            .unwrap();

        assert_eq!(outcome.report.velocity_of("A"), Some(3.0));
        let path = outcome.saved_to.unwrap();
        assert_eq!(path, temp_dir.path().join("2024-08-14_run.json"));
        assert_eq!(
            std::fs::read_to_string(path).unwrap(),
            r#"{"metricDate":"2024-08-14","metrics":[{"provider":"A","tokenVelocity":3}]}"#
        );
    }

    #[test]
    fn test_from_config() {
        let mut run = RunConfig::default();
        run.repeat = 5;
        run.mode = MeasureMode::Streaming;
        run.metrics_dir = None;

        let driver = ComparisonDriver::from_config(&run);
        assert_eq!(driver.repeat(), 5);
        assert_eq!(driver.mode(), MeasureMode::Streaming);
        assert!(driver.store.is_none());
    }
}
