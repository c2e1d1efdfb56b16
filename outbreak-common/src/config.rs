//! Endpoint configuration loading and resolution
//!
//! Every setting is resolved independently in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! A missing or unreadable TOML file never stops resolution; it is logged and
//! the remaining tiers are used.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

pub const ENV_CONFIG_PATH: &str = "OUTBREAK_CONFIG";
pub const ENV_EPI_URL: &str = "OUTBREAK_EPI_URL";
pub const ENV_GENOMICS_URL: &str = "OUTBREAK_GENOMICS_URL";
pub const ENV_RESOURCES_URL: &str = "OUTBREAK_RESOURCES_URL";
pub const ENV_CURATED_URL: &str = "OUTBREAK_CURATED_URL";
pub const ENV_LOG_LEVEL: &str = "OUTBREAK_LOG_LEVEL";

/// Compiled-in defaults used when no other tier supplies a value
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub epi_url: String,
    pub genomics_url: String,
    pub resources_url: String,
    pub curated_url: String,
    pub timeout_secs: u64,
    pub log_level: String,
}

impl Default for CompiledDefaults {
    fn default() -> Self {
        Self {
            epi_url: "https://api.outbreak.info/covid19/".to_string(),
            genomics_url: "https://api.outbreak.info/genomics/".to_string(),
            resources_url: "https://api.outbreak.info/resources/".to_string(),
            curated_url:
                "https://raw.githubusercontent.com/andersen-lab/hCoV19-sitrep/master/curated_mutations.json"
                    .to_string(),
            timeout_secs: 30,
            log_level: "info".to_string(),
        }
    }
}

/// Logging section of the TOML file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    /// Default tracing level (`trace`, `debug`, `info`, `warn`, `error`)
    pub level: Option<String>,
}

/// On-disk TOML configuration; every field is optional
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    pub epi_url: Option<String>,
    pub genomics_url: Option<String>,
    pub resources_url: Option<String>,
    pub curated_url: Option<String>,
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl TomlConfig {
    /// Read and parse a TOML config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Parse TOML failed ({}): {}", path.display(), e)))
    }
}

/// Values supplied on the command line
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub epi_url: Option<String>,
    pub genomics_url: Option<String>,
    pub resources_url: Option<String>,
    pub curated_url: Option<String>,
    pub timeout_secs: Option<u64>,
    pub log_level: Option<String>,
}

/// Fully resolved endpoint configuration
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointConfig {
    pub epi_url: String,
    pub genomics_url: String,
    pub resources_url: String,
    pub curated_url: String,
    pub timeout: Duration,
    pub log_level: String,
}

/// Resolves [`EndpointConfig`] from CLI, environment, TOML and defaults
pub struct EndpointResolver {
    overrides: CliOverrides,
    defaults: CompiledDefaults,
}

impl EndpointResolver {
    pub fn new(overrides: CliOverrides) -> Self {
        Self {
            overrides,
            defaults: CompiledDefaults::default(),
        }
    }

    /// Resolve every setting; never fails
    pub fn resolve(&self) -> EndpointConfig {
        let toml = self.load_toml().unwrap_or_default();
        let cli = &self.overrides;
        let defaults = &self.defaults;

        let timeout_secs = cli
            .timeout_secs
            .or(toml.timeout_secs)
            .unwrap_or(defaults.timeout_secs);

        EndpointConfig {
            epi_url: normalize_base_url(&pick(
                cli.epi_url.as_deref(),
                ENV_EPI_URL,
                toml.epi_url.as_deref(),
                &defaults.epi_url,
            )),
            genomics_url: normalize_base_url(&pick(
                cli.genomics_url.as_deref(),
                ENV_GENOMICS_URL,
                toml.genomics_url.as_deref(),
                &defaults.genomics_url,
            )),
            resources_url: normalize_base_url(&pick(
                cli.resources_url.as_deref(),
                ENV_RESOURCES_URL,
                toml.resources_url.as_deref(),
                &defaults.resources_url,
            )),
            // A file URL, not a base URL: no trailing slash
            curated_url: pick(
                cli.curated_url.as_deref(),
                ENV_CURATED_URL,
                toml.curated_url.as_deref(),
                &defaults.curated_url,
            ),
            timeout: Duration::from_secs(timeout_secs),
            log_level: pick(
                cli.log_level.as_deref(),
                ENV_LOG_LEVEL,
                toml.logging.level.as_deref(),
                &defaults.log_level,
            ),
        }
    }

    fn load_toml(&self) -> Option<TomlConfig> {
        let path = self.config_path()?;
        match TomlConfig::load(&path) {
            Ok(config) => {
                debug!(path = %path.display(), "Loaded TOML config");
                Some(config)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable config file, using defaults");
                None
            }
        }
    }

    /// Config file location: CLI → `OUTBREAK_CONFIG` → `<config_dir>/outbreak/config.toml`
    fn config_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.overrides.config_path {
            return Some(path.clone());
        }
        if let Some(path) = non_empty_env(ENV_CONFIG_PATH) {
            return Some(PathBuf::from(path));
        }
        dirs::config_dir()
            .map(|d| d.join("outbreak").join("config.toml"))
            .filter(|p| p.exists())
    }
}

fn pick(cli: Option<&str>, env_var: &str, toml: Option<&str>, default: &str) -> String {
    if let Some(value) = cli.filter(|v| !v.trim().is_empty()) {
        return value.to_string();
    }
    if let Some(value) = non_empty_env(env_var) {
        return value;
    }
    if let Some(value) = toml.filter(|v| !v.trim().is_empty()) {
        return value.to_string();
    }
    default.to_string()
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Ensure a base URL ends with exactly one `/` so paths can be appended
pub fn normalize_base_url(url: &str) -> String {
    format!("{}/", url.trim().trim_end_matches('/'))
}
