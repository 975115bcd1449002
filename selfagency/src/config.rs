//! Process-wide configuration.
//!
//! The pipeline refuses to run until a configuration has been established
//! with [`configure`] (or [`configure_with`]). [`reset`] tears it down again.

use crate::error::{AgencyError, AgencyResult};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;

/// Which completion backend to talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Local Ollama server through its OpenAI-compatible endpoint
    Ollama,
    #[serde(rename = "openai")]
    OpenAI,
    /// Any other OpenAI-compatible server
    Local,
    /// Deterministic stub for testing
    Stub,
}

impl std::str::FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ollama" => Ok(ProviderKind::Ollama),
            "openai" | "openrouter" => Ok(ProviderKind::OpenAI),
            "local" => Ok(ProviderKind::Local),
            "stub" => Ok(ProviderKind::Stub),
            other => Err(ConfigError::Invalid(format!(
                "unknown provider '{}'. Use: ollama, openai, local or stub",
                other
            ))),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<ConfigError> for AgencyError {
    fn from(err: ConfigError) -> Self {
        AgencyError::Configuration(err.to_string())
    }
}

/// Settings for the completion service and the generation loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub provider: ProviderKind,
    pub model: String,
    pub api_base: String,
    pub api_key: Option<String>,
    /// Per-request timeout in seconds
    pub request_timeout: u64,
    /// Transport-level retries for one completion request
    pub max_retries: u32,
    /// Seconds between transport retries
    pub retry_interval: f64,
    /// Maximum generate/validate attempts for one pipeline run
    pub generation_retries: u32,
    /// Directory holding prompt template overrides
    pub template_directory: Option<PathBuf>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Ollama,
            model: "qwen3-coder:30b".to_string(),
            api_base: "http://localhost:11434/v1".to_string(),
            api_key: None,
            request_timeout: 30,
            max_retries: 1,
            retry_interval: 0.5,
            generation_retries: 3,
            template_directory: None,
        }
    }
}

impl Configuration {
    /// Create a configuration from TOML text. Missing keys take their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Configuration = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Create a configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Create a configuration from `SELF_AGENCY_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Configuration::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `SELF_AGENCY_*` overrides looked up through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(key: &str, raw: String) -> Result<T, ConfigError> {
            raw.trim()
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("{} has an invalid value '{}'", key, raw)))
        }

        if let Some(v) = lookup("SELF_AGENCY_PROVIDER") {
            self.provider = v.parse()?;
        }
        if let Some(v) = lookup("SELF_AGENCY_MODEL") {
            self.model = v;
        }
        if let Some(v) = lookup("SELF_AGENCY_API_BASE") {
            self.api_base = v;
        }
        if let Some(v) = lookup("SELF_AGENCY_API_KEY") {
            self.api_key = Some(v);
        }
        if let Some(v) = lookup("SELF_AGENCY_REQUEST_TIMEOUT") {
            self.request_timeout = parsed("SELF_AGENCY_REQUEST_TIMEOUT", v)?;
        }
        if let Some(v) = lookup("SELF_AGENCY_MAX_RETRIES") {
            self.max_retries = parsed("SELF_AGENCY_MAX_RETRIES", v)?;
        }
        if let Some(v) = lookup("SELF_AGENCY_RETRY_INTERVAL") {
            self.retry_interval = parsed("SELF_AGENCY_RETRY_INTERVAL", v)?;
        }
        if let Some(v) = lookup("SELF_AGENCY_GENERATION_RETRIES") {
            self.generation_retries = parsed("SELF_AGENCY_GENERATION_RETRIES", v)?;
        }
        if let Some(v) = lookup("SELF_AGENCY_TEMPLATE_DIRECTORY") {
            self.template_directory = Some(PathBuf::from(v));
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.generation_retries == 0 {
            return Err(ConfigError::Invalid(
                "generation_retries must be at least 1".to_string(),
            ));
        }
        if self.request_timeout == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout must be greater than zero".to_string(),
            ));
        }
        if Duration::try_from_secs_f64(self.retry_interval).is_err() {
            return Err(ConfigError::Invalid(
                "retry_interval must be a non-negative number of seconds".to_string(),
            ));
        }
        if self.model.trim().is_empty() {
            return Err(ConfigError::Invalid("model must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    /// Pause between transient completion failures. Zero when
    /// `retry_interval` is not a representable duration.
    pub fn retry_delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.retry_interval).unwrap_or_default()
    }
}

static GLOBAL_CONFIG: Lazy<Mutex<Option<Configuration>>> = Lazy::new(|| Mutex::new(None));

// The slot is only ever replaced wholesale, so a poisoned lock still holds a
// consistent value.
fn global() -> MutexGuard<'static, Option<Configuration>> {
    GLOBAL_CONFIG.lock().unwrap_or_else(|e| e.into_inner())
}

/// Establish or update the global configuration. The closure starts from the
/// current configuration, or the defaults when none is set.
pub fn configure<F>(update: F) -> AgencyResult<Configuration>
where
    F: FnOnce(&mut Configuration),
{
    let mut slot = global();
    let mut config = slot.clone().unwrap_or_default();
    update(&mut config);
    config.validate()?;
    log::debug!(
        "self-agency configured: provider={:?} model={} generation_retries={}",
        config.provider,
        config.model,
        config.generation_retries
    );
    *slot = Some(config.clone());
    Ok(config)
}

/// Replace the global configuration with `config`.
pub fn configure_with(config: Configuration) -> AgencyResult<()> {
    config.validate()?;
    *global() = Some(config);
    Ok(())
}

/// Drop the global configuration.
pub fn reset() {
    *global() = None;
}

pub fn is_configured() -> bool {
    global().is_some()
}

/// The current configuration, or a configuration error when none is set.
pub fn ensure_configured() -> AgencyResult<Configuration> {
    global().clone().ok_or_else(|| {
        AgencyError::Configuration(
            "self-agency is not configured; call selfagency::configure first".to_string(),
        )
    })
}
