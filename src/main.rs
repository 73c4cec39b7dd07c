//! token-velocity CLI - Tokens-per-second comparison across hosted LLM providers.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use std::fs::OpenOptions;
use std::io::{IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use token_velocity::meter::StreamMeter;
use token_velocity::{ComparisonDriver, Config, MeasureMode, ProviderRegistry, ReportStore};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "token-velocity")]
#[command(author = "Vector Velocity <dev@vectorvelocity.dev>")]
#[command(version)]
#[command(about = "Compare tokens-per-second across hosted LLM providers")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Blocking,
    Streaming,
}

impl From<ModeArg> for MeasureMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Blocking => MeasureMode::Blocking,
            ModeArg::Streaming => MeasureMode::Streaming,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Measure every configured provider and write the daily report
    Run {
        /// Measurement mode (overrides run.mode)
        #[arg(short, long, value_enum)]
        mode: Option<ModeArg>,

        /// Trials per provider (overrides run.repeat)
        #[arg(short, long)]
        repeat: Option<usize>,

        /// Prompt to send (overrides run.prompt)
        #[arg(short, long)]
        prompt: Option<String>,

        /// Do not write the JSON report
        #[arg(long)]
        no_save: bool,
    },

    /// Stream one provider and print the rate live
    Stream {
        /// Provider name as configured
        #[arg(short = 'n', long)]
        provider: String,

        /// Prompt to send (overrides run.prompt)
        #[arg(short, long)]
        prompt: Option<String>,
    },

    /// Show stored reports
    Report {
        /// Number of recent reports to show
        #[arg(short, long, default_value = "5")]
        recent: usize,

        /// Show per-provider average, peak and lowest instead
        #[arg(short, long, conflicts_with = "latest")]
        summary: bool,

        /// Show only the most recent report
        #[arg(short, long)]
        latest: bool,

        /// Metrics directory (overrides run.metrics_dir)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// Validate configuration file
    Validate,

    /// Show example configuration
    Example,
}

fn setup_logging(verbose: bool, log_file: Option<&Path>) -> Result<()> {
    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };

    // RUST_LOG, when set, refines the console level
    let console_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let console = fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .with_filter(console_filter);

    let file = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {path:?}"))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file))
                    .with_filter(LevelFilter::INFO),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()
        .context("Failed to set subscriber")
}

fn print_example_config() {
    let example = r#"# token-velocity configuration file

[run]
prompt = "Talk about the significance of the milky way galaxy"
# system_prompt = "You are a helpful assistant"
repeat = 3
mode = "blocking"          # or "streaming"
rounding = "truncate"      # or "none"
continue_on_error = false
metrics_dir = "metrics"
log_file = "metrics_app.log"
timeout_secs = 180
# registry = "api_providers.json"

# Keys default to the kind's environment variable
# (GROQ_API_KEY, SAMBANOVA_API_KEY, NVIDIA_API_KEY, TOGETHERAI_API_KEY, OPENAI_API_KEY).
# api_key also accepts "process.env.VAR" or "${VAR}".

[[providers]]
name = "Groq"
kind = "groq"
model = "llama-3.1-8b-instant"

[[providers]]
name = "SambaNova"
kind = "sambanova"
model = "Meta-Llama-3.1-8B-Instruct"

[[providers]]
name = "NVIDIA"
kind = "nvidia"
model = "meta/llama-3.1-70b-instruct"
# api_url = "https://integrate.api.nvidia.com/v1/chat/completions"
# max_tokens = 1024
# temperature = 0.2
# top_p = 0.7
"#;
    println!("{example}");
}

/// Which stored reports `report` prints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReportView {
    Recent(usize),
    Latest,
    Summary,
}

fn report_json(store: &ReportStore, view: ReportView) -> Result<String> {
    let json = match view {
        ReportView::Recent(limit) => serde_json::to_string_pretty(&store.recent(limit)?)?,
        ReportView::Latest => match store.latest()? {
            Some(report) => serde_json::to_string_pretty(&report)?,
            None => bail!("No reports in {:?}", store.dir()),
        },
        ReportView::Summary => serde_json::to_string_pretty(&store.provider_summaries()?)?,
    };
    Ok(json)
}

fn load_config(path: &Path) -> Result<Config> {
    let config =
        Config::from_file(path).with_context(|| format!("Failed to load config from {path:?}"))?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenv::dotenv().ok();

    if let Commands::Example = cli.command {
        print_example_config();
        return Ok(());
    }

    let report_dir_override = match &cli.command {
        Commands::Report { dir: Some(dir), .. } => Some(dir.clone()),
        _ => None,
    };

    // `report --dir` works without a config file
    let config = if report_dir_override.is_some() && !cli.config.exists() {
        Config::default()
    } else {
        load_config(&cli.config)?
    };
    setup_logging(cli.verbose, config.run.log_file.as_deref())?;

    match cli.command {
        Commands::Example => unreachable!("handled above"),

        Commands::Validate => {
            let providers = config
                .resolve_providers()
                .context("Failed to resolve providers")?;

            info!("Configuration is valid");
            info!(
                "  Run: {} trial(s) per provider, {} mode",
                config.run.repeat, config.run.mode
            );
            for provider in &providers {
                info!(
                    "  {}: {} @ {} ({})",
                    provider.name,
                    provider.model,
                    provider.api_url,
                    if provider.api_key.is_some() {
                        "key resolved"
                    } else {
                        "NO KEY"
                    }
                );
            }
        }

        Commands::Run {
            mode,
            repeat,
            prompt,
            no_save,
        } => {
            let mut config = config;
            if let Some(mode) = mode {
                config.run.mode = mode.into();
            }
            if let Some(repeat) = repeat {
                config.run.repeat = repeat;
            }
            if let Some(prompt) = prompt {
                config.run.prompt = prompt;
            }
            config.validate().context("Invalid configuration")?;

            let registry =
                ProviderRegistry::from_config(&config).context("Failed to build providers")?;

            let mut driver = ComparisonDriver::from_config(&config.run)
                .with_progress(std::io::stdout().is_terminal());
            if no_save {
                driver = driver.without_store();
            }

            let outcome = driver.run(&registry, &config.run.prompt).await?;

            println!("\n=== Token Velocity ({}) ===", outcome.report.metric_date);
            for metric in &outcome.report.metrics {
                println!("{:<16} {:>10} tokens/s", metric.provider, metric.token_velocity);
            }
            for name in &outcome.failed {
                println!("{name:<16} {:>10}", "failed");
            }
            println!("Mode:        {}", config.run.mode);
            println!("Trials:      {}", config.run.repeat);
            println!("Runtime:     {:.1}s", outcome.runtime_secs);
            if let Some(path) = &outcome.saved_to {
                println!("Output:      {path:?}");
            }
        }

        Commands::Stream { provider, prompt } => {
            let registry =
                ProviderRegistry::from_config(&config).context("Failed to build providers")?;
            let provider = registry.require(&provider)?;
            let prompt = prompt.unwrap_or_else(|| config.run.prompt.clone());

            info!(provider = %provider.name(), "Starting stream");
            let mut stdout = std::io::stdout();
            let measurement = StreamMeter::new()
                .run(&prompt, provider.as_ref(), |rate| {
                    print!("\rTokens per second: {rate:.2}    ");
                    stdout.flush().ok();
                })
                .await?;
            println!();

            println!("\n=== {} ===", provider.name());
            println!("Tokens:      {}", measurement.sample.token_count);
            println!("Elapsed:     {:.2}s", measurement.sample.elapsed_secs);
            println!("Final rate:  {:.2} tokens/s", measurement.sample.tokens_per_second);
            println!("Mean rate:   {:.2} tokens/s", measurement.mean_rate());
            if measurement.skipped_lines > 0 {
                println!("Skipped:     {} malformed line(s)", measurement.skipped_lines);
            }
        }

        Commands::Report {
            recent,
            summary,
            latest,
            ..
        } => {
            let Some(dir) = report_dir_override.or(config.run.metrics_dir.clone()) else {
                bail!("No metrics directory: pass --dir or set run.metrics_dir");
            };
            let store = ReportStore::new(dir);

            let view = if summary {
                ReportView::Summary
            } else if latest {
                ReportView::Latest
            } else {
                ReportView::Recent(recent)
            };
            println!("{}", report_json(&store, view)?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use token_velocity::{ProviderResult, RunReport};

    fn store_with_two_days() -> (TempDir, ReportStore) {
        let temp_dir = TempDir::new().unwrap();
        let store = ReportStore::new(temp_dir.path());
        for (date, velocity) in [("2024-08-14", 10.0), ("2024-08-15", 30.0)] {
            let mut report = RunReport::new(date);
            report.metrics.push(ProviderResult::new("Groq", velocity));
            store.save(&report).unwrap();
        }
        (temp_dir, store)
    }

    #[test]
    fn test_report_latest() {
        let (_temp_dir, store) = store_with_two_days();

        let json: serde_json::Value =
            serde_json::from_str(&report_json(&store, ReportView::Latest).unwrap()).unwrap();
        assert_eq!(json["metricDate"], "2024-08-15");
        assert_eq!(json["metrics"][0]["tokenVelocity"], 30);
    }

    #[test]
    fn test_report_recent_and_summary() {
        let (_temp_dir, store) = store_with_two_days();

        let recent: serde_json::Value =
            serde_json::from_str(&report_json(&store, ReportView::Recent(1)).unwrap()).unwrap();
        assert_eq!(recent["recentMetrics"][0]["metricDate"], "2024-08-15");

        let summary = report_json(&store, ReportView::Summary).unwrap();
        assert!(summary.contains("Groq"));
    }

    #[test]
    fn test_report_latest_empty_dir() {
        let temp_dir = TempDir::new().unwrap();
        let store = ReportStore::new(temp_dir.path().join("missing"));
        assert!(report_json(&store, ReportView::Latest).is_err());
    }
}
