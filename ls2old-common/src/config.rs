//! Bootstrap configuration loading and work directory resolution
//!
//! Settings are resolved in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`LS2OLD_*`)
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! A missing config file is never fatal: the migrator logs a warning and
//! continues with defaults.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable naming the work directory
pub const WORK_DIR_ENV: &str = "LS2OLD_WORK_DIR";

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "LS2OLD_CONFIG";

/// Bootstrap configuration loaded from TOML
///
/// Every section is optional so that a partially filled file (or none at all)
/// still parses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Directory holding caches, journals, media and reports
    #[serde(default)]
    pub work_dir: Option<PathBuf>,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// LingSync / CouchDB connection
    #[serde(default)]
    pub source: EndpointSection,

    /// OLD connection
    #[serde(default)]
    pub destination: EndpointSection,

    #[serde(default)]
    pub conversion: ConversionSection,

    #[serde(default)]
    pub upload: UploadSection,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Connection settings for one side of the migration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointSection {
    pub url: Option<String>,
    /// LingSync corpus (CouchDB database) name; unused for the destination
    pub corpus: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Conversion options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversionSection {
    /// Empty-field fallback rules in `entity.target=source` form
    #[serde(default)]
    pub fill_empty: Vec<String>,

    /// Attach a "Migrated from LingSync corpus ..." tag (default: true)
    #[serde(default)]
    pub migration_tag: Option<bool>,
}

/// Upload options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadSection {
    /// Largest media payload sent to the destination, in bytes
    pub max_file_bytes: Option<u64>,

    /// Documents requested per source page
    pub page_size: Option<usize>,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Resolve the config file path: explicit argument, then `LS2OLD_CONFIG`,
/// then `<config_dir>/ls2old/config.toml`
pub fn config_file_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }
    dirs::config_dir().map(|d| d.join("ls2old").join("config.toml"))
}

/// Load TOML configuration from `path`
///
/// A missing file yields defaults. A file that exists but does not parse is
/// an error, since silently ignoring it would run against the wrong corpus.
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    if !path.exists() {
        warn!(
            "Config file {} not found, continuing with defaults",
            path.display()
        );
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config: TomlConfig = toml::from_str(&content)?;
    debug!("Loaded config from {}", path.display());
    Ok(config)
}

/// Work directory resolution
///
/// **Priority:** CLI → ENV → TOML → OS default
pub fn resolve_work_dir(cli_arg: Option<&Path>, toml_config: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(WORK_DIR_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &toml_config.work_dir {
        return path.clone();
    }

    default_work_dir()
}

/// OS-dependent default work directory
pub fn default_work_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("ls2old"))
        .unwrap_or_else(|| PathBuf::from("./ls2old_data"))
}

/// Pick the first present value: CLI, then environment variable, then TOML
pub fn resolve_setting(
    cli_value: Option<String>,
    env_var_name: &str,
    toml_value: Option<&String>,
) -> Option<String> {
    if let Some(value) = cli_value.filter(|v| !v.trim().is_empty()) {
        return Some(value);
    }
    if let Ok(value) = std::env::var(env_var_name) {
        if !value.trim().is_empty() {
            return Some(value);
        }
    }
    toml_value.filter(|v| !v.trim().is_empty()).cloned()
}
