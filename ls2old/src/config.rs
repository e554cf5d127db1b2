//! Migration configuration resolution
//!
//! Every setting resolves with CLI → ENV → TOML → default priority. The
//! orchestrator only ever sees the resolved [`MigrationConfig`].

use crate::error::{MigrationError, MigrationResult};
use crate::models::{EntityType, Stage};
use ls2old_common::config::{resolve_setting, resolve_work_dir, TomlConfig};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{debug, info};

pub const DEFAULT_SOURCE_URL: &str = "https://corpus.lingsync.org";

/// Documents requested per source page
pub const DEFAULT_PAGE_SIZE: usize = 500;

/// Largest media payload uploaded (20 MiB)
pub const DEFAULT_MAX_FILE_BYTES: u64 = 20_971_520;

pub const ENV_LS_URL: &str = "LS2OLD_LS_URL";
pub const ENV_LS_CORPUS: &str = "LS2OLD_LS_CORPUS";
pub const ENV_LS_USERNAME: &str = "LS2OLD_LS_USERNAME";
pub const ENV_LS_PASSWORD: &str = "LS2OLD_LS_PASSWORD";
pub const ENV_OLD_URL: &str = "LS2OLD_OLD_URL";
pub const ENV_OLD_USERNAME: &str = "LS2OLD_OLD_USERNAME";
pub const ENV_OLD_PASSWORD: &str = "LS2OLD_OLD_PASSWORD";
pub const ENV_FILL_EMPTY: &str = "LS2OLD_FILL_EMPTY";
pub const ENV_MAX_FILE_BYTES: &str = "LS2OLD_MAX_FILE_BYTES";
pub const ENV_PAGE_SIZE: &str = "LS2OLD_PAGE_SIZE";

/// URL plus optional login
#[derive(Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Empty-field fallback rule, written `entity.target=source`
///
/// When the converted `target` attribute is empty, copy the converted value
/// of `source` into it. Example: `datums.morpheme_break=transcription`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackRule {
    pub entity_type: EntityType,
    pub target: String,
    pub source: String,
}

impl FromStr for FallbackRule {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            MigrationError::Config(format!(
                "invalid fill-empty rule '{}' (expected entity.target=source)",
                s
            ))
        };

        let (lhs, source) = s.split_once('=').ok_or_else(invalid)?;
        let (entity, target) = lhs.split_once('.').ok_or_else(invalid)?;
        let (entity, target, source) = (entity.trim(), target.trim(), source.trim());
        if target.is_empty() || source.is_empty() {
            return Err(invalid());
        }

        let entity_type = entity
            .parse::<EntityType>()
            .map_err(MigrationError::Config)?;

        Ok(Self {
            entity_type,
            target: target.to_string(),
            source: source.to_string(),
        })
    }
}

impl fmt::Display for FallbackRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}={}", self.entity_type, self.target, self.source)
    }
}

/// Options that shape converted output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionOptions {
    pub corpus: String,
    pub fill_empty: Vec<FallbackRule>,
    pub migration_tag: bool,
}

impl ConversionOptions {
    pub fn new(corpus: impl Into<String>) -> Self {
        Self {
            corpus: corpus.into(),
            fill_empty: Vec::new(),
            migration_tag: true,
        }
    }

    pub fn fallbacks_for(&self, entity_type: EntityType) -> impl Iterator<Item = &FallbackRule> {
        self.fill_empty
            .iter()
            .filter(move |r| r.entity_type == entity_type)
    }
}

/// Run-control flags, consulted only by the orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub force_download: bool,
    pub force_convert: bool,
    pub force_file_download: bool,
    pub force_upload: bool,
    pub stop_after: Option<Stage>,
    pub page_size: usize,
    pub max_file_bytes: u64,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            force_download: false,
            force_convert: false,
            force_file_download: false,
            force_upload: false,
            stop_after: None,
            page_size: DEFAULT_PAGE_SIZE,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
        }
    }
}

impl RunOptions {
    /// Whether `stage` runs under `stop_after`
    pub fn runs(&self, stage: Stage) -> bool {
        self.stop_after.map_or(true, |last| stage <= last)
    }
}

/// Fully resolved configuration for one run
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    pub work_dir: PathBuf,
    pub corpus: String,
    pub source: Endpoint,
    /// Absent when the run stops before upload
    pub destination: Option<Endpoint>,
    pub conversion: ConversionOptions,
    pub run: RunOptions,
}

/// Values given on the command line
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub work_dir: Option<PathBuf>,
    pub ls_url: Option<String>,
    pub ls_corpus: Option<String>,
    pub ls_username: Option<String>,
    pub ls_password: Option<String>,
    pub old_url: Option<String>,
    pub old_username: Option<String>,
    pub old_password: Option<String>,
    pub fill_empty: Vec<String>,
    pub no_migration_tag: bool,
    pub max_file_bytes: Option<u64>,
    pub page_size: Option<usize>,
    pub force_download: bool,
    pub force_convert: bool,
    pub force_file_download: bool,
    pub force_upload: bool,
    pub stop_after: Option<Stage>,
}

impl MigrationConfig {
    /// Resolve every setting against the environment and TOML config
    pub fn resolve(overrides: ConfigOverrides, toml_config: &TomlConfig) -> MigrationResult<Self> {
        let work_dir = resolve_work_dir(overrides.work_dir.as_deref(), toml_config);

        let source_url = resolve_setting(overrides.ls_url, ENV_LS_URL, toml_config.source.url.as_ref())
            .unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string());
        let corpus = resolve_setting(
            overrides.ls_corpus,
            ENV_LS_CORPUS,
            toml_config.source.corpus.as_ref(),
        )
        .ok_or_else(|| {
            MigrationError::Config(format!(
                "LingSync corpus not configured (use --ls-corpus, {} or [source] corpus)",
                ENV_LS_CORPUS
            ))
        })?;
        validate_corpus_name(&corpus)?;

        let source = Endpoint {
            url: trim_url(&source_url),
            username: resolve_setting(
                overrides.ls_username,
                ENV_LS_USERNAME,
                toml_config.source.username.as_ref(),
            ),
            password: resolve_setting(
                overrides.ls_password,
                ENV_LS_PASSWORD,
                toml_config.source.password.as_ref(),
            ),
        };

        let run = RunOptions {
            force_download: overrides.force_download,
            force_convert: overrides.force_convert,
            force_file_download: overrides.force_file_download,
            force_upload: overrides.force_upload,
            stop_after: overrides.stop_after,
            page_size: resolve_number(
                overrides.page_size,
                ENV_PAGE_SIZE,
                toml_config.upload.page_size,
                DEFAULT_PAGE_SIZE,
            )?,
            max_file_bytes: resolve_number(
                overrides.max_file_bytes,
                ENV_MAX_FILE_BYTES,
                toml_config.upload.max_file_bytes,
                DEFAULT_MAX_FILE_BYTES,
            )?,
        };
        if run.page_size == 0 {
            return Err(MigrationError::Config("page size must be at least 1".into()));
        }

        let destination_url = resolve_setting(
            overrides.old_url,
            ENV_OLD_URL,
            toml_config.destination.url.as_ref(),
        );
        let destination = match destination_url {
            Some(url) => Some(Endpoint {
                url: trim_url(&url),
                username: resolve_setting(
                    overrides.old_username,
                    ENV_OLD_USERNAME,
                    toml_config.destination.username.as_ref(),
                ),
                password: resolve_setting(
                    overrides.old_password,
                    ENV_OLD_PASSWORD,
                    toml_config.destination.password.as_ref(),
                ),
            }),
            None if run.runs(Stage::Upload) => {
                return Err(MigrationError::Config(format!(
                    "OLD URL not configured (use --old-url, {} or [destination] url)",
                    ENV_OLD_URL
                )));
            }
            None => None,
        };

        let conversion = ConversionOptions {
            corpus: corpus.clone(),
            fill_empty: resolve_fallback_rules(overrides.fill_empty, toml_config)?,
            migration_tag: !overrides.no_migration_tag
                && toml_config.conversion.migration_tag.unwrap_or(true),
        };

        info!(
            corpus = %corpus,
            work_dir = %work_dir.display(),
            source = %source.url,
            destination = destination.as_ref().map(|d| d.url.as_str()).unwrap_or("-"),
            "Configuration resolved"
        );
        debug!(?run, fallbacks = conversion.fill_empty.len(), "Run options");

        Ok(Self {
            work_dir,
            corpus,
            source,
            destination,
            conversion,
            run,
        })
    }

    /// `<work_dir>/<corpus>`
    pub fn corpus_dir(&self) -> PathBuf {
        self.work_dir.join(&self.corpus)
    }
}

fn resolve_fallback_rules(
    cli_rules: Vec<String>,
    toml_config: &TomlConfig,
) -> MigrationResult<Vec<FallbackRule>> {
    let raw: Vec<String> = if !cli_rules.is_empty() {
        cli_rules
    } else if let Some(env_rules) = resolve_setting(None, ENV_FILL_EMPTY, None) {
        env_rules.split(',').map(str::to_string).collect()
    } else {
        toml_config.conversion.fill_empty.clone()
    };

    raw.iter()
        .map(|r| r.trim())
        .filter(|r| !r.is_empty())
        .map(str::parse)
        .collect()
}

fn resolve_number<T>(cli: Option<T>, env_var: &str, toml: Option<T>, default: T) -> MigrationResult<T>
where
    T: FromStr + Copy,
{
    if let Some(value) = cli {
        return Ok(value);
    }
    if let Some(raw) = resolve_setting(None, env_var, None) {
        return raw
            .trim()
            .parse()
            .map_err(|_| MigrationError::Config(format!("{} is not a valid number: '{}'", env_var, raw)));
    }
    Ok(toml.unwrap_or(default))
}

/// Corpus names become a directory under the work dir
fn validate_corpus_name(corpus: &str) -> MigrationResult<()> {
    let valid = !corpus.is_empty()
        && corpus != "."
        && corpus != ".."
        && !corpus.contains(['/', '\\']);
    if valid {
        Ok(())
    } else {
        Err(MigrationError::Config(format!("invalid corpus name '{}'", corpus)))
    }
}

fn trim_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}
