use anyhow::{bail, Context, Result};
use simf_repair::{ModelEndpoint, RepairConfig};
use std::path::{Path, PathBuf};

/// Command-line values that take precedence over file and environment
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub compiler: Option<String>,
    pub compiler_url: Option<String>,
    pub max_attempts: Option<u32>,
    pub workers: Option<usize>,
    pub output_dir: Option<PathBuf>,
    pub no_history: bool,
}

impl Overrides {
    pub fn apply(&self, config: &mut RepairConfig) {
        if let Some(cmd) = &self.compiler {
            config.compiler_command = cmd.clone();
        }
        if let Some(url) = &self.compiler_url {
            config.compiler_url = Some(url.clone());
        }
        if let Some(n) = self.max_attempts {
            config.max_iterations = n;
        }
        if let Some(n) = self.workers {
            config.workers = n;
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = Some(dir.clone());
        }
        if self.no_history {
            config.write_history = false;
        }
    }
}

/// Defaults, then the TOML file, then `SIMF_REPAIR_*`, then the command line
pub fn load(path: Option<&Path>, overrides: &Overrides) -> Result<RepairConfig> {
    let mut config = match path {
        Some(path) => RepairConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => RepairConfig::default(),
    };
    config.apply_env();
    overrides.apply(&mut config);
    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// Model endpoint for `--llm`; asking for it without a credential is an error
pub fn model_endpoint(llm: bool) -> Result<Option<ModelEndpoint>> {
    if !llm {
        return Ok(None);
    }
    match ModelEndpoint::from_env() {
        Some(endpoint) => Ok(Some(endpoint)),
        None => bail!("--llm requires SIMF_MODEL_API_KEY to be set"),
    }
}
