//! Layered configuration.
//!
//! Sources, lowest to highest precedence: built-in defaults, a TOML file,
//! `BATCHGATE_*` environment variables (`__` separates nested keys, e.g.
//! `BATCHGATE_HTTP__BIND`), and command-line flags.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Args;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

use crate::engine::JobDefinition;

pub const DEFAULT_CONFIG_FILE: &str = "batchgate.toml";
const ENV_PREFIX: &str = "BATCHGATE_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub files: FilesConfig,
    pub publish: PublishConfig,
    pub simulation: SimulationConfig,
    /// Jobs registered with the in-memory engine.
    pub jobs: Vec<JobDefinition>,
    pub verbose: bool,
    pub json_logs: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: SocketAddr,
    /// Prefix for every route and every generated link, e.g. `/batch`.
    pub base_path: String,
    pub default_page_size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesConfig {
    pub staging_directory: PathBuf,
    /// Prefix stripped from `path` to build `shortPath`.
    pub short_path_root: String,
    /// When false, uploading or creating over an existing file is a conflict.
    pub allow_overwrite: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishChannelType {
    #[default]
    None,
    Log,
    Webhook,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    pub channel: PublishChannelType,
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Drive launched executions through their steps in the background.
    pub enabled: bool,
    pub step_duration_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
            base_path: String::new(),
            default_page_size: 20,
        }
    }
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            staging_directory: PathBuf::from("staging"),
            short_path_root: String::new(),
            allow_overwrite: true,
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            step_duration_ms: 5_000,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            files: FilesConfig::default(),
            publish: PublishConfig::default(),
            simulation: SimulationConfig::default(),
            jobs: Vec::new(),
            verbose: false,
            json_logs: false,
        }
    }
}

/// Command-line flags that override configuration values.
#[derive(Debug, Clone, Default, Args)]
pub struct Overrides {
    /// Address to listen on
    #[arg(long)]
    pub bind: Option<SocketAddr>,

    /// Route and link prefix, e.g. /batch
    #[arg(long)]
    pub base_path: Option<String>,

    /// Directory holding staged files
    #[arg(long)]
    pub staging_directory: Option<PathBuf>,

    /// Advance launched executions in the background
    #[arg(long)]
    pub simulation: Option<bool>,

    #[arg(long)]
    pub verbose: Option<bool>,

    /// Emit logs as JSON
    #[arg(long)]
    pub json_logs: Option<bool>,
}

impl Overrides {
    fn provider(&self) -> Figment {
        let mut figment = Figment::new();
        if let Some(bind) = self.bind {
            figment = figment.merge(Serialized::default("http.bind", bind));
        }
        if let Some(base_path) = &self.base_path {
            figment = figment.merge(Serialized::default("http.base_path", base_path));
        }
        if let Some(dir) = &self.staging_directory {
            figment = figment.merge(Serialized::default("files.staging_directory", dir));
        }
        if let Some(simulation) = self.simulation {
            figment = figment.merge(Serialized::default("simulation.enabled", simulation));
        }
        if let Some(verbose) = self.verbose {
            figment = figment.merge(Serialized::default("verbose", verbose));
        }
        if let Some(json_logs) = self.json_logs {
            figment = figment.merge(Serialized::default("json_logs", json_logs));
        }
        figment
    }
}

impl AppConfig {
    /// Load configuration. An explicit `config_file` must exist; otherwise
    /// `batchgate.toml` in the working directory is used if present.
    pub fn new(config_file: Option<&Path>, overrides: Option<&Overrides>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

        figment = match config_file {
            Some(path) => {
                if !path.is_file() {
                    bail!("Config file not found: {}", path.display());
                }
                figment.merge(Toml::file(path))
            }
            None => figment.merge(Toml::file(DEFAULT_CONFIG_FILE)),
        };

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        if let Some(overrides) = overrides {
            figment = figment.merge(overrides.provider());
        }

        let config: AppConfig = figment.extract().context("Failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.http.default_page_size == 0 {
            bail!("http.default_page_size must be greater than 0");
        }
        if !self.http.base_path.is_empty() && !self.http.base_path.starts_with('/') {
            bail!("http.base_path must start with '/'");
        }
        Ok(())
    }
}
