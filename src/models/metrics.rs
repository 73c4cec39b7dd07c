//! Measurement and report types for token-velocity.
//!
//! K_i: A "token" here is one whitespace-delimited word of generated text,
//! not a tokenizer unit. Every provider is counted the same way so rates stay
//! comparable across providers and across runs.

use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::time::Duration;

/// Count whitespace-delimited words in `text`.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Tokens per second, guarded against zero, negative and non-finite elapsed time.
pub fn tokens_per_second(token_count: u64, elapsed_secs: f64) -> f64 {
    if elapsed_secs > 0.0 && elapsed_secs.is_finite() {
        token_count as f64 / elapsed_secs
    } else {
        0.0
    }
}

/// Arithmetic mean of `rates`; 0 for an empty slice.
pub fn average(rates: &[f64]) -> f64 {
    if rates.is_empty() {
        return 0.0;
    }
    rates.iter().sum::<f64>() / rates.len() as f64
}

/// How an averaged rate is rounded before it is reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rounding {
    /// Drop the fractional part (integer velocities)
    #[default]
    Truncate,
    /// Report the raw mean
    None,
}

impl Rounding {
    pub fn apply(self, value: f64) -> f64 {
        match self {
            Rounding::Truncate => value.trunc(),
            Rounding::None => value,
        }
    }
}

/// A single request's measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeasurementSample {
    /// Computed rate (always >= 0)
    pub tokens_per_second: f64,
    /// Words counted in the generated text
    pub token_count: u64,
    /// Wall-clock seconds the measurement covered
    pub elapsed_secs: f64,
}

impl MeasurementSample {
    pub fn new(token_count: u64, elapsed: Duration) -> Self {
        let elapsed_secs = elapsed.as_secs_f64();
        Self {
            tokens_per_second: tokens_per_second(token_count, elapsed_secs),
            token_count,
            elapsed_secs,
        }
    }
}

/// Averaged rate for one provider within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResult {
    pub provider: String,
    #[serde(rename = "tokenVelocity", serialize_with = "serialize_velocity")]
    pub token_velocity: f64,
}

impl ProviderResult {
    pub fn new(provider: impl Into<String>, token_velocity: f64) -> Self {
        Self {
            provider: provider.into(),
            token_velocity,
        }
    }
}

/// Whole-number velocities are written as JSON integers (`15`, not `15.0`).
fn serialize_velocity<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        serializer.serialize_i64(*value as i64)
    } else {
        serializer.serialize_f64(*value)
    }
}

/// One run of the comparison driver, persisted as `<date>_run.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    /// `YYYY-MM-DD`
    pub metric_date: String,
    /// Results in provider configuration order
    pub metrics: Vec<ProviderResult>,
}

impl RunReport {
    pub fn new(metric_date: impl Into<String>) -> Self {
        Self {
            metric_date: metric_date.into(),
            metrics: Vec::new(),
        }
    }

    pub fn velocity_of(&self, provider: &str) -> Option<f64> {
        self.metrics
            .iter()
            .find(|m| m.provider == provider)
            .map(|m| m.token_velocity)
    }
}

/// The most recent stored reports, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentMetrics {
    pub recent_metrics: Vec<RunReport>,
}

/// A velocity tagged with the report date it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderMetric {
    pub metric_date: String,
    #[serde(serialize_with = "serialize_velocity")]
    pub metric_value: f64,
}

/// Historical view of one provider across stored reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSummary {
    /// Mean over all reports, dated with the latest report
    pub average_token_velocity: ProviderMetric,
    pub peak_token_velocity: ProviderMetric,
    pub lowest_token_velocity: ProviderMetric,
}

/// Build per-provider summaries from a set of reports.
///
/// Reports are visited in date order so ties on peak/lowest resolve to the
/// earliest date.
pub fn summarize(reports: &[RunReport]) -> BTreeMap<String, ProviderSummary> {
    let mut ordered: Vec<&RunReport> = reports.iter().collect();
    ordered.sort_by(|a, b| a.metric_date.cmp(&b.metric_date));

    let mut history: BTreeMap<String, Vec<(&str, f64)>> = BTreeMap::new();
    for report in ordered {
        for metric in &report.metrics {
            history
                .entry(metric.provider.clone())
                .or_default()
                .push((report.metric_date.as_str(), metric.token_velocity));
        }
    }

    history
        .into_iter()
        .filter_map(|(provider, points)| {
            let latest = points.last()?.0;
            let values: Vec<f64> = points.iter().map(|(_, v)| *v).collect();

            let mut peak = points[0];
            let mut lowest = points[0];
            for point in &points[1..] {
                if point.1 > peak.1 {
                    peak = *point;
                }
                if point.1 < lowest.1 {
                    lowest = *point;
                }
            }

            let summary = ProviderSummary {
                average_token_velocity: ProviderMetric {
                    metric_date: latest.to_string(),
                    metric_value: average(&values),
                },
                peak_token_velocity: ProviderMetric {
                    metric_date: peak.0.to_string(),
                    metric_value: peak.1,
                },
                lowest_token_velocity: ProviderMetric {
                    metric_date: lowest.0.to_string(),
                    metric_value: lowest.1,
                },
            };
            Some((provider, summary))
        })
        .collect()
}
