//! Model configuration loading.
//!
//! Two sources feed a [`ModelSettings`]:
//! - the process environment (`OPENAI_API_KEY`, `BASE_URL`, `MODEL`), read
//!   once into an immutable [`EnvConfig`] record;
//! - an optional YAML model registry with `${VAR}` interpolation and a
//!   fallback chain.
//!
//! Neither source validates endpoint or credential values. Absent values stay
//! `None` and surface at first use as authentication or connection failures.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use super::errors::InferenceError;

// ─── Constants ───────────────────────────────────────────────────────────────

pub const ENV_API_KEY: &str = "OPENAI_API_KEY";
pub const ENV_BASE_URL: &str = "BASE_URL";
pub const ENV_MODEL: &str = "MODEL";

/// Retry budget of the primary client, matching the OpenAI client default.
pub const DEFAULT_MAX_RETRIES: u32 = 6;

/// Sampling temperature of the primary client.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// First retry delay; doubles on each subsequent attempt.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Total request timeout for non-streaming calls.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

// ─── Environment Record ──────────────────────────────────────────────────────

/// The process-wide configuration record.
///
/// Fields are `None` when the variable is unset and `Some("")` when it is set
/// but empty. Nothing here throws.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model_name: Option<String>,
}

impl EnvConfig {
    /// Load `.env` (if any) and read the three variables from the process
    /// environment. Variables already set in the environment win over `.env`.
    pub fn from_env() -> Self {
        match dotenvy::dotenv() {
            Ok(path) => tracing::debug!(path = %path.display(), "loaded .env file"),
            Err(e) if e.not_found() => {}
            Err(e) => tracing::warn!(error = %e, "failed to load .env file"),
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the record from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Self {
            api_key: lookup(ENV_API_KEY),
            base_url: lookup(ENV_BASE_URL),
            model_name: lookup(ENV_MODEL),
        };

        let missing = config.missing_fields();
        if !missing.is_empty() {
            tracing::debug!(?missing, "environment configuration incomplete");
        }
        config
    }

    /// Names of the variables that are unset or empty.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let blank = |v: &Option<String>| v.as_deref().map_or(true, |s| s.trim().is_empty());
        let mut missing = Vec::new();
        if blank(&self.api_key) {
            missing.push(ENV_API_KEY);
        }
        if blank(&self.base_url) {
            missing.push(ENV_BASE_URL);
        }
        if blank(&self.model_name) {
            missing.push(ENV_MODEL);
        }
        missing
    }

    /// Opt-in strict check for callers that prefer failing at startup.
    pub fn require_complete(&self) -> Result<(), InferenceError> {
        let missing = self.missing_fields();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(InferenceError::ConfigError {
                reason: format!("missing environment variables: {}", missing.join(", ")),
            })
        }
    }
}

// ─── Client Settings ─────────────────────────────────────────────────────────

/// Everything a [`super::ChatModel`] needs to talk to one endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSettings {
    pub model: Option<String>,
    pub api_key: Option<String>,
    /// `None` means the OpenAI default endpoint; `Some("")` is invalid.
    pub base_url: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Additional attempts after the first one.
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub request_timeout: Duration,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model: None,
            api_key: None,
            base_url: None,
            temperature: None,
            max_tokens: None,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl ModelSettings {
    /// Settings carrying exactly the three environment values.
    pub fn from_env_config(env: &EnvConfig) -> Self {
        Self {
            model: env.model_name.clone(),
            api_key: env.api_key.clone(),
            base_url: env.base_url.clone(),
            ..Self::default()
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }
}

// ─── Registry ────────────────────────────────────────────────────────────────

/// A single model entry in the YAML registry.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelEntry {
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl ModelEntry {
    /// Convert to client settings. Empty interpolated strings become `None`.
    pub fn to_settings(&self) -> ModelSettings {
        let non_empty = |v: &Option<String>| v.clone().filter(|s| !s.is_empty());
        let defaults = ModelSettings::default();
        ModelSettings {
            model: non_empty(&self.model_name),
            api_key: non_empty(&self.api_key),
            base_url: non_empty(&self.base_url),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
            retry_backoff: defaults.retry_backoff,
            request_timeout: self
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
        }
    }
}

/// Top-level model registry.
///
/// ```yaml
/// active_model: primary
/// models:
///   primary:
///     model_name: ${MODEL}
///     base_url: ${BASE_URL:-https://api.openai.com/v1}
///     api_key: ${OPENAI_API_KEY}
///     temperature: 0.7
///   local:
///     model_name: llama3.2
///     base_url: http://localhost:11434/v1
/// fallback_chain: [primary, local]
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct ModelsConfig {
    pub active_model: String,
    pub models: HashMap<String, ModelEntry>,
    #[serde(default)]
    pub fallback_chain: Vec<String>,
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Load and parse a YAML model registry.
///
/// Performs environment-variable interpolation on string values matching
/// `${VAR_NAME}` or `${VAR_NAME:-default}`.
pub fn load_models_config(path: &Path) -> Result<ModelsConfig, InferenceError> {
    let raw = std::fs::read_to_string(path).map_err(|e| InferenceError::ConfigError {
        reason: format!("failed to read {}: {e}", path.display()),
    })?;
    parse_models_config(&raw)
}

/// Parse a YAML model registry from a string (interpolating first).
pub fn parse_models_config(raw: &str) -> Result<ModelsConfig, InferenceError> {
    let interpolated = interpolate_env_vars(raw);

    serde_yaml::from_str(&interpolated).map_err(|e| InferenceError::ConfigError {
        reason: format!("failed to parse config: {e}"),
    })
}

/// Resolve the active model, respecting the fallback chain.
///
/// Returns `(model_key, ModelEntry)` for the first model present in the
/// registry. Connectivity is only checked at first use.
pub fn resolve_active_model(config: &ModelsConfig) -> Result<(String, ModelEntry), InferenceError> {
    if let Some(model) = config.models.get(&config.active_model) {
        return Ok((config.active_model.clone(), model.clone()));
    }

    for key in &config.fallback_chain {
        if let Some(model) = config.models.get(key) {
            return Ok((key.clone(), model.clone()));
        }
    }

    Err(InferenceError::ConfigError {
        reason: format!(
            "active model '{}' not found in config and no fallback available",
            config.active_model
        ),
    })
}

/// The active model followed by the remaining fallback-chain models, in order,
/// skipping duplicates and keys absent from the registry.
pub fn ordered_model_keys(config: &ModelsConfig) -> Result<Vec<String>, InferenceError> {
    let (active, _) = resolve_active_model(config)?;
    let mut keys = vec![active];
    for key in &config.fallback_chain {
        if keys.contains(key) {
            continue;
        }
        if config.models.contains_key(key) {
            keys.push(key.clone());
        } else {
            tracing::warn!(model = %key, "fallback chain entry not in registry, skipping");
        }
    }
    Ok(keys)
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

/// Resolve a variable expression like `VAR` or `VAR:-default`.
fn resolve_var_expr(expr: &str) -> String {
    if let Some(idx) = expr.find(":-") {
        let var_name = &expr[..idx];
        let default = &expr[idx + 2..];
        std::env::var(var_name).unwrap_or_else(|_| expand_tilde(default))
    } else {
        std::env::var(expr).unwrap_or_default()
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
