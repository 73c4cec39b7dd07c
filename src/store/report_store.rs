//! Dated run report storage.
//!
//! Epistemic foundation:
//! - K_i: One report per calendar day, `<dir>/<YYYY-MM-DD>_run.json`
//! - K_i: A same-day re-run overwrites; the write is atomic (write-then-rename)
//! - B_i: Files in the directory may be foreign or corrupt → skipped on read

use crate::models::{
    ProviderSummary, RecentMetrics, Result, RunReport, VelocityError, summarize,
};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Suffix of report file names.
pub const REPORT_SUFFIX: &str = "_run.json";

/// Reads and writes run reports in one directory.
#[derive(Debug, Clone)]
pub struct ReportStore {
    dir: PathBuf,
}

impl ReportStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the report for `date` (`YYYY-MM-DD`).
    pub fn path_for(&self, date: &str) -> PathBuf {
        self.dir.join(format!("{date}{REPORT_SUFFIX}"))
    }

    /// Persist `report`, replacing any report already stored for its date.
    pub fn save(&self, report: &RunReport) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| VelocityError::io("creating metrics directory", e))?;

        let path = self.path_for(&report.metric_date);
        let temp_path = self
            .dir
            .join(format!(".{}{REPORT_SUFFIX}.tmp", report.metric_date));

        let file =
            File::create(&temp_path).map_err(|e| VelocityError::io("creating temp report", e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, report)
            .map_err(|e| VelocityError::Internal(format!("Serializing report: {e}")))?;
        writer
            .flush()
            .map_err(|e| VelocityError::io("writing temp report", e))?;

        fs::rename(&temp_path, &path).map_err(|e| VelocityError::io("renaming report", e))?;

        info!("Successfully saved metrics to {}", path.display());
        Ok(path)
    }

    /// Load the report for `date`, if one exists.
    pub fn load(&self, date: &str) -> Result<Option<RunReport>> {
        let path = self.path_for(date);
        if !path.exists() {
            return Ok(None);
        }
        read_report(&path).map(Some)
    }

    /// All readable reports, oldest first.
    pub fn list(&self) -> Result<Vec<RunReport>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let pattern = self.dir.join(format!("*{REPORT_SUFFIX}"));
        let paths = glob::glob(&pattern.to_string_lossy())
            .map_err(|e| VelocityError::Internal(format!("Invalid report pattern: {e}")))?;

        let mut reports = Vec::new();
        for entry in paths {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    warn!(error = %e, "Unreadable entry in metrics directory");
                    continue;
                }
            };
            match read_report(&path) {
                Ok(report) => reports.push(report),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping invalid report"),
            }
        }

        reports.sort_by(|a, b| a.metric_date.cmp(&b.metric_date));
        debug!(count = reports.len(), dir = %self.dir.display(), "Loaded reports");
        Ok(reports)
    }

    /// The `limit` most recent reports, oldest first.
    pub fn recent(&self, limit: usize) -> Result<RecentMetrics> {
        let mut reports = self.list()?;
        let skip = reports.len().saturating_sub(limit);
        Ok(RecentMetrics {
            recent_metrics: reports.split_off(skip),
        })
    }

    /// The most recent report.
    pub fn latest(&self) -> Result<Option<RunReport>> {
        Ok(self.list()?.pop())
    }

    /// Average, peak and lowest velocity per provider over all reports.
    pub fn provider_summaries(&self) -> Result<BTreeMap<String, ProviderSummary>> {
        Ok(summarize(&self.list()?))
    }
}

fn read_report(path: &Path) -> Result<RunReport> {
    let file = File::open(path).map_err(|e| VelocityError::io("opening report", e))?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| {
        VelocityError::ParseError(format!("Invalid report {}: {e}", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProviderResult;
    use tempfile::TempDir;

    fn report(date: &str, groq: f64, samba: f64) -> RunReport {
        RunReport {
            metric_date: date.to_string(),
            metrics: vec![
                ProviderResult::new("Groq", groq),
                ProviderResult::new("SambaNova", samba),
            ],
        }
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let store = ReportStore::new(temp_dir.path().join("metrics"));

        let path = store.save(&report("2024-08-14", 15.0, 42.0)).unwrap();
        assert_eq!(path, temp_dir.path().join("metrics/2024-08-14_run.json"));

        let raw = fs::read_to_string(&path).unwrap();
        assert_eq!(
            raw,
            r#"{"metricDate":"2024-08-14","metrics":[{"provider":"Groq","tokenVelocity":15},{"provider":"SambaNova","tokenVelocity":42}]}"#
        );

        let loaded = store.load("2024-08-14").unwrap().unwrap();
        assert_eq!(loaded, report("2024-08-14", 15.0, 42.0));
        assert!(store.load("2024-08-15").unwrap().is_none());
    }

    #[test]
    fn test_same_day_overwrites() {
        let temp_dir = TempDir::new().unwrap();
        let store = ReportStore::new(temp_dir.path());

        store.save(&report("2024-08-14", 1.0, 2.0)).unwrap();
        store.save(&report("2024-08-14", 3.0, 4.0)).unwrap();

        let reports = store.list().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].velocity_of("Groq"), Some(3.0));

        let leftovers: Vec<_> = fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_list_recent_and_summaries() {
        let temp_dir = TempDir::new().unwrap();
        let store = ReportStore::new(temp_dir.path());

        store.save(&report("2024-08-16", 400.0, 350.0)).unwrap();
        store.save(&report("2024-08-14", 300.0, 300.0)).unwrap();
        store.save(&report("2024-08-15", 500.0, 325.0)).unwrap();
        fs::write(temp_dir.path().join("2024-08-13_run.json"), "not json").unwrap();
        fs::write(temp_dir.path().join("notes.txt"), "ignored").unwrap();

        let dates: Vec<String> = store
            .list()
            .unwrap()
            .into_iter()
            .map(|r| r.metric_date)
            .collect();
        assert_eq!(dates, vec!["2024-08-14", "2024-08-15", "2024-08-16"]);

        let recent = store.recent(2).unwrap();
        assert_eq!(recent.recent_metrics.len(), 2);
        assert_eq!(recent.recent_metrics[0].metric_date, "2024-08-15");
        assert_eq!(store.recent(10).unwrap().recent_metrics.len(), 3);

        assert_eq!(store.latest().unwrap().unwrap().metric_date, "2024-08-16");

        let summaries = store.provider_summaries().unwrap();
        assert_eq!(summaries["Groq"].average_token_velocity.metric_value, 400.0);
        assert_eq!(summaries["Groq"].peak_token_velocity.metric_date, "2024-08-15");
        assert_eq!(summaries["SambaNova"].lowest_token_velocity.metric_value, 300.0);
    }

    #[test]
    fn test_missing_dir_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = ReportStore::new(temp_dir.path().join("absent"));
        assert!(store.list().unwrap().is_empty());
        assert!(store.latest().unwrap().is_none());
        assert!(store.provider_summaries().unwrap().is_empty());
    }
}
