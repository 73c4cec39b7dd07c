//! Configuration models for token-velocity.
//!
//! All I^R (resolvable ignorance) is parameterized here.
//! Secrets are resolved into [`ProviderConfig`] values before any provider
//! is constructed, so nothing downstream reads the environment.

use crate::models::Rounding;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Prefix marking an API key as a reference to an environment variable.
///
/// K_i: Registry files written for the original browser tooling store keys as
/// `process.env.GROQ_API_KEY`; the format is kept so those files load as-is.
pub const ENV_PLACEHOLDER_PREFIX: &str = "process.env.";

/// Top-level configuration for token-velocity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Run settings
    #[serde(default)]
    pub run: RunConfig,

    /// Providers, measured in the order listed
    #[serde(default)]
    pub providers: Vec<ProviderSpec>,
}

/// How a single request is measured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasureMode {
    /// Wait for the whole completion, then divide words by wall time
    #[default]
    Blocking,
    /// Consume server-sent events and track the rate as content arrives
    Streaming,
}

impl std::fmt::Display for MeasureMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MeasureMode::Blocking => write!(f, "blocking"),
            MeasureMode::Streaming => write!(f, "streaming"),
        }
    }
}

/// Run settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Prompt sent to every provider
    #[serde(default = "default_prompt")]
    pub prompt: String,

    /// Default system prompt for OpenAI-compatible providers
    #[serde(default)]
    pub system_prompt: Option<String>,

    /// Trials per provider
    #[serde(default = "default_repeat")]
    pub repeat: usize,

    /// Measurement mode
    #[serde(default)]
    pub mode: MeasureMode,

    /// Rounding applied to each provider's average
    #[serde(default)]
    pub rounding: Rounding,

    /// Keep measuring remaining providers when one fails
    #[serde(default)]
    pub continue_on_error: bool,

    /// Directory for `<date>_run.json` reports (None disables persistence)
    #[serde(default = "default_metrics_dir")]
    pub metrics_dir: Option<PathBuf>,

    /// Append-only log file
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Optional JSON provider registry, appended after `[[providers]]`
    #[serde(default)]
    pub registry: Option<PathBuf>,
}

fn default_prompt() -> String {
    "Talk about the significance of the milky way galaxy".to_string()
}

fn default_repeat() -> usize {
    3
}

fn default_metrics_dir() -> Option<PathBuf> {
    Some(PathBuf::from("metrics"))
}

fn default_timeout() -> u64 {
    180
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            prompt: default_prompt(),
            system_prompt: None,
            repeat: default_repeat(),
            mode: MeasureMode::default(),
            rounding: Rounding::default(),
            continue_on_error: false,
            metrics_dir: default_metrics_dir(),
            log_file: None,
            timeout_secs: default_timeout(),
            registry: None,
        }
    }
}

/// Known provider families.
///
/// K_i: All of them speak the OpenAI chat-completions dialect; the kind only
/// picks defaults and which request variant is built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Groq,
    SambaNova,
    Nvidia,
    Together,
    /// Any other OpenAI-compatible endpoint
    #[default]
    OpenAi,
}

impl ProviderKind {
    /// Infer the kind from a provider name such as `GROQ` or `SambaNova`.
    pub fn from_name(name: &str) -> Self {
        let name = name.to_ascii_lowercase();
        if name.contains("groq") {
            ProviderKind::Groq
        } else if name.contains("sambanova") || name.contains("snova") {
            ProviderKind::SambaNova
        } else if name.contains("nvidia") || name.contains("nim") {
            ProviderKind::Nvidia
        } else if name.contains("together") {
            ProviderKind::Together
        } else {
            ProviderKind::OpenAi
        }
    }

    pub fn default_api_url(self) -> &'static str {
        match self {
            ProviderKind::Groq => "https://api.groq.com/openai/v1/chat/completions",
            ProviderKind::SambaNova => "https://api.sambanova.ai/v1/chat/completions",
            ProviderKind::Nvidia => "https://integrate.api.nvidia.com/v1/chat/completions",
            ProviderKind::Together => "https://api.together.xyz/v1/chat/completions",
            ProviderKind::OpenAi => "https://api.openai.com/v1/chat/completions",
        }
    }

    pub fn default_api_key_env(self) -> &'static str {
        match self {
            ProviderKind::Groq => "GROQ_API_KEY",
            ProviderKind::SambaNova => "SAMBANOVA_API_KEY",
            ProviderKind::Nvidia => "NVIDIA_API_KEY",
            ProviderKind::Together => "TOGETHERAI_API_KEY",
            ProviderKind::OpenAi => "OPENAI_API_KEY",
        }
    }

    /// Default `(max_tokens, temperature, top_p)` for this kind.
    pub fn default_sampling(self) -> (Option<u32>, Option<f64>, Option<f64>) {
        match self {
            ProviderKind::Nvidia => (Some(1024), Some(0.2), Some(0.7)),
            _ => (None, None, None),
        }
    }
}

/// A provider as written in configuration (secrets unresolved).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSpec {
    /// Display name, used in reports
    pub name: String,

    /// Provider family (default: inferred from name)
    #[serde(default)]
    pub kind: Option<ProviderKind>,

    /// Full chat-completions URL (default: the kind's endpoint)
    #[serde(default)]
    pub api_url: Option<String>,

    /// API key, `process.env.VAR` reference or `${VAR}` template
    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variable holding the key (default: the kind's variable)
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Model identifier
    pub model: String,

    /// System prompt override
    #[serde(default)]
    pub system_prompt: Option<String>,

    #[serde(default)]
    pub max_tokens: Option<u32>,

    #[serde(default)]
    pub temperature: Option<f64>,

    #[serde(default)]
    pub top_p: Option<f64>,
}

impl ProviderSpec {
    pub fn kind(&self) -> ProviderKind {
        self.kind.unwrap_or_else(|| ProviderKind::from_name(&self.name))
    }
}

/// A fully resolved provider. Immutable for the life of the run.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    pub name: String,
    pub kind: ProviderKind,
    pub api_url: String,
    /// None sends unauthenticated requests; the provider rejects them
    pub api_key: Option<String>,
    pub model: String,
    pub system_prompt: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
}

impl ProviderConfig {
    /// Minimal config for a provider of `kind` using its defaults.
    pub fn new(
        name: impl Into<String>,
        kind: ProviderKind,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Self {
        let (max_tokens, temperature, top_p) = kind.default_sampling();
        Self {
            name: name.into(),
            kind,
            api_url: kind.default_api_url().to_string(),
            api_key,
            model: model.into(),
            system_prompt: None,
            max_tokens,
            temperature,
            top_p,
        }
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }
}

/// Entry in a JSON provider registry file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistryEntry {
    #[serde(default)]
    name: Option<String>,
    api_url: String,
    #[serde(default)]
    api_key: Option<String>,
    #[serde(alias = "model")]
    selected_model: String,
    #[serde(default)]
    kind: Option<ProviderKind>,
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// B_i(file exists) → Result
    /// B_i(file is valid TOML) → Result
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_owned(),
            source: e,
        })
    }

    /// Check settings that would make a run meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.run.repeat == 0 {
            return Err(ConfigError::Invalid("run.repeat must be at least 1".to_string()));
        }
        if self.run.prompt.trim().is_empty() {
            return Err(ConfigError::Invalid("run.prompt must not be empty".to_string()));
        }
        if self.providers.is_empty() && self.run.registry.is_none() {
            return Err(ConfigError::Invalid(
                "no providers configured: add [[providers]] or set run.registry".to_string(),
            ));
        }
        for spec in &self.providers {
            if spec.model.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "provider '{}' has an empty model",
                    spec.name
                )));
            }
        }
        Ok(())
    }

    /// All provider specs: `[[providers]]` first, then registry entries.
    pub fn provider_specs(&self) -> Result<Vec<ProviderSpec>, ConfigError> {
        let mut specs = self.providers.clone();
        if let Some(registry) = &self.run.registry {
            specs.extend(load_registry_file(registry)?);
        }
        Ok(specs)
    }

    /// Resolve every provider's secrets from the process environment.
    pub fn resolve_providers(&self) -> Result<Vec<ProviderConfig>, ConfigError> {
        self.resolve_providers_with(|name| std::env::var(name).ok())
    }

    /// Resolve providers with an explicit variable lookup.
    pub fn resolve_providers_with(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Vec<ProviderConfig>, ConfigError> {
        let specs = self.provider_specs()?;
        if specs.is_empty() {
            return Err(ConfigError::Invalid("no providers configured".to_string()));
        }

        let mut resolved = Vec::with_capacity(specs.len());
        for spec in specs {
            if resolved.iter().any(|p: &ProviderConfig| p.name == spec.name) {
                return Err(ConfigError::DuplicateProvider(spec.name));
            }
            resolved.push(resolve_spec(&spec, self.run.system_prompt.as_deref(), &lookup));
        }
        Ok(resolved)
    }
}

fn resolve_spec(
    spec: &ProviderSpec,
    default_system_prompt: Option<&str>,
    lookup: &impl Fn(&str) -> Option<String>,
) -> ProviderConfig {
    let kind = spec.kind();
    let (max_tokens, temperature, top_p) = kind.default_sampling();

    let api_key = match &spec.api_key {
        Some(raw) => resolve_placeholder(raw, lookup),
        None => {
            let env_var = spec
                .api_key_env
                .as_deref()
                .unwrap_or_else(|| kind.default_api_key_env());
            lookup(env_var)
        }
    }
    .filter(|key| !key.is_empty());

    if api_key.is_none() {
        warn!(provider = %spec.name, "No API key resolved, requests will be unauthenticated");
    }

    ProviderConfig {
        name: spec.name.clone(),
        kind,
        api_url: spec
            .api_url
            .clone()
            .unwrap_or_else(|| kind.default_api_url().to_string()),
        api_key,
        model: spec.model.clone(),
        system_prompt: spec
            .system_prompt
            .clone()
            .or_else(|| default_system_prompt.map(str::to_string)),
        max_tokens: spec.max_tokens.or(max_tokens),
        temperature: spec.temperature.or(temperature),
        top_p: spec.top_p.or(top_p),
    }
}

/// Resolve a configured secret.
///
/// `process.env.NAME` becomes the value of `NAME` (None when unset); any other
/// string has `${VAR}` templates expanded and is returned as-is.
pub fn resolve_placeholder(
    raw: &str,
    lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    match raw.strip_prefix(ENV_PLACEHOLDER_PREFIX) {
        Some(var_name) => lookup(var_name.trim()),
        None => Some(expand_env_vars_with(raw, lookup)),
    }
}

/// Expand `${VAR_NAME}` references through `lookup`.
///
/// If the variable is not set, the placeholder is left unchanged.
fn expand_env_vars_with(s: &str, lookup: &impl Fn(&str) -> Option<String>) -> String {
    let re = match regex::Regex::new(r"\$\{([^}]+)\}") {
        Ok(re) => re,
        Err(_) => return s.to_string(),
    };

    re.replace_all(s, |caps: &regex::Captures<'_>| {
        lookup(&caps[1]).unwrap_or_else(|| caps[0].to_string())
    })
    .into_owned()
}

/// Load a JSON provider registry, preserving the file's key order.
///
/// Format: `{ "<KEY>": { "name"?, "apiUrl", "apiKey"?, "selectedModel", "kind"? } }`.
pub fn load_registry_file(path: &Path) -> Result<Vec<ProviderSpec>, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_owned(),
        source: e,
    })?;
    parse_registry(&content).map_err(|e| ConfigError::Registry {
        path: path.to_owned(),
        source: e,
    })
}

fn parse_registry(content: &str) -> Result<Vec<ProviderSpec>, serde_json::Error> {
    let map: serde_json::Map<String, serde_json::Value> = serde_json::from_str(content)?;

    map.into_iter()
        .map(|(key, value)| {
            let entry: RegistryEntry = serde_json::from_value(value)?;
            let kind = entry.kind.unwrap_or_else(|| ProviderKind::from_name(&key));
            Ok(ProviderSpec {
                name: entry.name.unwrap_or(key),
                kind: Some(kind),
                api_url: Some(entry.api_url),
                api_key: entry.api_key,
                api_key_env: None,
                model: entry.selected_model,
                system_prompt: None,
                max_tokens: None,
                temperature: None,
                top_p: None,
            })
        })
        .collect()
}

/// Configuration errors.
///
/// Epistemic origin:
/// - B_i falsified: File not found, parse error
/// - I^B materialized: Missing or contradictory values
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Failed to parse provider registry {path}: {source}")]
    Registry {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Provider '{0}' is configured more than once")]
    DuplicateProvider(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
