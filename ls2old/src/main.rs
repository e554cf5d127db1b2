//! ls2old - LingSync to OLD migrator
//!
//! Downloads a LingSync corpus, converts its documents into Online
//! Linguistic Database resources and uploads them in dependency order.
//! Every stage caches its output under `<work_dir>/<corpus>/`, so an
//! interrupted run resumes where it stopped.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use ls2old::config::{ConfigOverrides, MigrationConfig};
use ls2old::error::MigrationError;
use ls2old::models::Stage;
use ls2old::services::{FieldDbClient, OldClient, WorkflowOrchestrator};
use ls2old::types::{DestinationApi, SourceApi};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// Migrate a LingSync corpus into an Online Linguistic Database
#[derive(Debug, Parser)]
#[command(name = "ls2old", version)]
struct Cli {
    /// TOML config file (default: <config_dir>/ls2old/config.toml)
    #[arg(long, env = "LS2OLD_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding caches, journals, media and reports
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// LingSync (CouchDB) URL
    #[arg(long)]
    ls_url: Option<String>,

    /// LingSync corpus name
    #[arg(long)]
    ls_corpus: Option<String>,

    #[arg(long)]
    ls_username: Option<String>,

    #[arg(long)]
    ls_password: Option<String>,

    /// OLD URL
    #[arg(long)]
    old_url: Option<String>,

    #[arg(long)]
    old_username: Option<String>,

    #[arg(long)]
    old_password: Option<String>,

    /// Empty-field fallback rule `entity.target=source` (repeatable)
    #[arg(long = "fill-empty", value_name = "RULE")]
    fill_empty: Vec<String>,

    /// Do not tag migrated resources with the migration tag
    #[arg(long)]
    no_migration_tag: bool,

    /// Largest media payload uploaded, in bytes
    #[arg(long)]
    max_file_bytes: Option<u64>,

    /// Documents requested per LingSync page
    #[arg(long)]
    page_size: Option<usize>,

    /// Download again even when a cached raw set exists
    #[arg(long)]
    force_download: bool,

    /// Convert again even when a cached converted set exists
    #[arg(long)]
    force_convert: bool,

    /// Download media again even when cached
    #[arg(long)]
    force_file_download: bool,

    /// Create resources again even when already uploaded
    #[arg(long)]
    force_upload: bool,

    /// Last stage to run: download, convert or upload
    #[arg(long, value_name = "STAGE")]
    stop_after: Option<Stage>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            work_dir: self.work_dir.clone(),
            ls_url: self.ls_url.clone(),
            ls_corpus: self.ls_corpus.clone(),
            ls_username: self.ls_username.clone(),
            ls_password: self.ls_password.clone(),
            old_url: self.old_url.clone(),
            old_username: self.old_username.clone(),
            old_password: self.old_password.clone(),
            fill_empty: self.fill_empty.clone(),
            no_migration_tag: self.no_migration_tag,
            max_file_bytes: self.max_file_bytes,
            page_size: self.page_size,
            force_download: self.force_download,
            force_convert: self.force_convert,
            force_file_download: self.force_file_download,
            force_upload: self.force_upload,
            stop_after: self.stop_after,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let toml_config = match ls2old_common::config::config_file_path(cli.config.as_deref()) {
        Some(path) => ls2old_common::config::load_toml_config(&path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Default::default(),
    };
    ls2old_common::logging::init_tracing(&toml_config.logging, cli.verbose)?;

    info!(
        "Starting ls2old {} (git {}, built {}, {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let config = MigrationConfig::resolve(cli.overrides(), &toml_config)?;

    // Logs in lazily: a run served from the cache never contacts LingSync
    let source: Arc<dyn SourceApi> = Arc::new(
        FieldDbClient::from_endpoint(&config.source)
            .map_err(|e| MigrationError::SourceUnavailable(e.to_string()))?,
    );

    let destination: Option<Arc<dyn DestinationApi>> = match &config.destination {
        Some(endpoint) if config.run.runs(Stage::Upload) => Some(Arc::new(
            OldClient::connect(endpoint)
                .await
                .map_err(|e| MigrationError::DestinationUnavailable(e.to_string()))?,
        )),
        _ => None,
    };

    let orchestrator = WorkflowOrchestrator::new(config, source, destination);
    let summary = orchestrator.run().await?;
    let reports = orchestrator.cache().reports_dir();

    if summary.succeeded {
        info!(reports = %reports.display(), "Migration succeeded");
        Ok(())
    } else {
        error!(reports = %reports.display(), "Migration finished with failures");
        Err(anyhow!(
            "migration of corpus {} did not complete; see {}",
            summary.corpus,
            reports.join("summary.txt").display()
        ))
    }
}
