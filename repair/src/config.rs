//! Repair configuration
//!
//! Values come from, in increasing precedence: built-in defaults, a TOML file,
//! `SIMF_REPAIR_*` environment variables, and finally command-line overrides
//! applied by the binary.

use crate::error::{RepairError, RepairResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Configuration for the repair loop, compile client and artifact store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairConfig {
    /// Maximum compile attempts per session, the unmodified original included
    pub max_iterations: u32,
    /// Extra compile calls allowed when the transport itself fails
    pub transport_retries: u32,
    /// Linear backoff step between transport retries
    pub retry_backoff_ms: u64,
    /// Per-call compiler timeout
    pub compile_timeout_secs: u64,
    /// Per-call model timeout
    pub model_timeout_secs: u64,
    /// Address every diagnostic of a failed compile in one iteration
    pub batch_diagnostics: bool,
    /// Keep trying a strategy's later candidates even after the category changed
    pub retry_candidates_on_category_change: bool,
    /// Ask every registered strategy instead of stopping at the first with candidates
    pub collect_all_strategies: bool,
    /// Concurrent sessions in a batch run
    pub workers: usize,
    /// Write the attempt history of solved sessions too
    pub write_history: bool,
    /// Directory for repaired files (None = next to the original)
    pub output_dir: Option<PathBuf>,
    /// Stem suffix marking a repaired file
    pub fixed_suffix: String,
    /// Local compiler command line; `{source}` and `{witness}` are substituted
    pub compiler_command: String,
    /// Remote compile service (takes precedence over `compiler_command`)
    pub compiler_url: Option<String>,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            transport_retries: 2,
            retry_backoff_ms: 250,
            compile_timeout_secs: 60,
            model_timeout_secs: 120,
            batch_diagnostics: false,
            retry_candidates_on_category_change: false,
            collect_all_strategies: false,
            workers: 4,
            write_history: true,
            output_dir: None,
            fixed_suffix: "_fixed".to_string(),
            compiler_command: "simc {source} {witness}".to_string(),
            compiler_url: None,
        }
    }
}

impl RepairConfig {
    /// Defaults with environment overrides applied
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Load a TOML file; missing keys keep their defaults
    pub fn from_file(path: &Path) -> RepairResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| RepairError::input(path, e))?;
        Self::from_toml(&text)
    }

    /// Parse TOML text
    pub fn from_toml(text: &str) -> RepairResult<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| RepairError::config(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `SIMF_REPAIR_*` environment overrides
    pub fn apply_env(&mut self) {
        if let Some(n) = env_parse("SIMF_REPAIR_MAX_ITERATIONS") {
            self.max_iterations = n;
        }
        if let Some(n) = env_parse("SIMF_REPAIR_TRANSPORT_RETRIES") {
            self.transport_retries = n;
        }
        if let Some(n) = env_parse("SIMF_REPAIR_RETRY_BACKOFF_MS") {
            self.retry_backoff_ms = n;
        }
        if let Some(n) = env_parse("SIMF_REPAIR_COMPILE_TIMEOUT_SECS") {
            self.compile_timeout_secs = n;
        }
        if let Some(n) = env_parse("SIMF_REPAIR_MODEL_TIMEOUT_SECS") {
            self.model_timeout_secs = n;
        }
        if let Some(val) = env_flag("SIMF_REPAIR_BATCH_DIAGNOSTICS") {
            self.batch_diagnostics = val;
        }
        if let Some(val) = env_flag("SIMF_REPAIR_RETRY_ON_CATEGORY_CHANGE") {
            self.retry_candidates_on_category_change = val;
        }
        if let Some(val) = env_flag("SIMF_REPAIR_COLLECT_ALL") {
            self.collect_all_strategies = val;
        }
        if let Some(n) = env_parse("SIMF_REPAIR_WORKERS") {
            self.workers = n;
        }
        if let Some(val) = env_flag("SIMF_REPAIR_WRITE_HISTORY") {
            self.write_history = val;
        }
        if let Ok(dir) = std::env::var("SIMF_REPAIR_OUTPUT_DIR") {
            self.output_dir = Some(PathBuf::from(dir));
        }
        if let Ok(cmd) = std::env::var("SIMF_REPAIR_COMPILER") {
            self.compiler_command = cmd;
        }
        if let Ok(url) = std::env::var("SIMF_REPAIR_COMPILER_URL") {
            self.compiler_url = Some(url);
        }
    }

    /// Reject values the loop cannot run with
    pub fn validate(&self) -> RepairResult<()> {
        if self.max_iterations == 0 {
            return Err(RepairError::config("max_iterations must be at least 1"));
        }
        if self.workers == 0 {
            return Err(RepairError::config("workers must be at least 1"));
        }
        if self.fixed_suffix.is_empty() {
            return Err(RepairError::config(
                "fixed_suffix must not be empty, it would overwrite the original",
            ));
        }
        Ok(())
    }

    pub fn compile_timeout(&self) -> Duration {
        Duration::from_secs(self.compile_timeout_secs)
    }

    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model_timeout_secs)
    }
}

/// Chat-completions endpoint for the model-driven strategy.
///
/// Only constructed when a credential is present; without one the strategy is
/// simply not registered.
#[derive(Clone)]
pub struct ModelEndpoint {
    pub url: String,
    pub model: String,
    pub api_key: String,
}

impl ModelEndpoint {
    /// Read `SIMF_MODEL_API_KEY`, `SIMF_MODEL_URL` and `SIMF_MODEL_NAME`
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("SIMF_MODEL_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())?;
        let url = std::env::var("SIMF_MODEL_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1/chat/completions".into());
        let model = std::env::var("SIMF_MODEL_NAME").unwrap_or_else(|_| "gpt-4o-mini".into());
        Some(Self {
            url,
            model,
            api_key,
        })
    }
}

impl std::fmt::Debug for ModelEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelEndpoint")
            .field("url", &self.url)
            .field("model", &self.model)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_flag(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| v.to_lowercase() == "true" || v == "1")
}
