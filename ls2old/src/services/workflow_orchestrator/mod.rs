//! Migration workflow orchestrator
//!
//! # State Progression
//! Per entity type: PENDING → DOWNLOADED → CONVERTED → UPLOADED, with the
//! terminal outcomes FAILED (at a named stage) and BLOCKED.
//!
//! # Architecture
//! Each stage is handled by a dedicated `phase_*` method:
//!
//! - **DOWNLOAD**: every type's raw set, before anything is converted
//!   (derived users, speakers and files read other types' documents)
//! - **SETTINGS**: the OLD application settings the corpus needs (object
//!   language, grammaticalities), applied before the first upload
//! - **CONVERT**: one type at a time, in dependency order
//! - **UPLOAD**: right after the type's conversion; refused while a
//!   prerequisite type has not reached UPLOADED
//!
//! The run holds `migration.lock` for its whole duration and always writes
//! `reports/summary.txt` and `reports/report.json` before releasing it.

use crate::config::MigrationConfig;
use crate::error::{MigrationError, MigrationResult};
use crate::models::{EntityState, EntityType, MigrationSession, Stage};
use crate::services::cache_store::{write_bytes_atomic, write_json_atomic, CacheStore};
use crate::services::downloader::Downloader;
use crate::services::identifier_map::IdentifierMap;
use crate::services::uploader::Uploader;
use crate::types::{DestinationApi, SourceApi};
use std::sync::Arc;

mod phase_convert;
mod phase_download;
mod phase_settings;
mod phase_upload;
pub mod statistics;

pub use statistics::{MediaStats, MigrationSummary, TypeStatistics};

/// Workflow orchestrator service
pub struct WorkflowOrchestrator {
    config: MigrationConfig,
    cache: CacheStore,
    downloader: Downloader,
    uploader: Option<Uploader>,
}

impl WorkflowOrchestrator {
    /// Create new workflow orchestrator
    ///
    /// `destination` may be `None` only when the run stops before upload.
    pub fn new(
        config: MigrationConfig,
        source: Arc<dyn SourceApi>,
        destination: Option<Arc<dyn DestinationApi>>,
    ) -> Self {
        let cache = CacheStore::new(&config.work_dir, &config.corpus);
        let downloader = Downloader::new(
            source,
            cache.clone(),
            config.run.page_size,
            config.run.max_file_bytes,
        );
        let uploader = destination
            .map(|api| Uploader::new(api, cache.clone(), config.run.force_upload));

        Self {
            config,
            cache,
            downloader,
            uploader,
        }
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Execute one complete run
    ///
    /// Per-type failures end up in the returned summary (`succeeded` is
    /// false); only problems that prevent the run from being recorded at all
    /// (lock held, identifier journal unreadable, report not writable) are
    /// returned as errors.
    pub async fn run(&self) -> MigrationResult<MigrationSummary> {
        if self.config.run.runs(Stage::Upload) && self.uploader.is_none() {
            return Err(MigrationError::Config(
                "OLD destination not configured (use --old-url or stop after convert)".into(),
            ));
        }

        let mut session = MigrationSession::new(&self.config.corpus);
        let destination_url = self
            .config
            .destination
            .as_ref()
            .map(|d| d.url.as_str())
            .unwrap_or_default();
        let lock = self.cache.acquire_lock(session.run_id, destination_url)?;

        tracing::info!(
            run_id = %session.run_id,
            corpus = %self.config.corpus,
            source = %self.config.source.url,
            destination = %destination_url,
            stop_after = ?self.config.run.stop_after,
            "Migration run started"
        );

        let mut summary = MigrationSummary::new(&session);
        let result = self.run_locked(&mut session, &mut summary).await;

        session.finish();
        summary.finish(&session);
        let written = self.write_reports(&summary);
        lock.release()?;
        result?;
        written?;

        tracing::info!(
            run_id = %session.run_id,
            corpus = %self.config.corpus,
            succeeded = summary.succeeded,
            "Migration run finished"
        );
        Ok(summary)
    }

    async fn run_locked(
        &self,
        session: &mut MigrationSession,
        summary: &mut MigrationSummary,
    ) -> MigrationResult<()> {
        let mut ids = IdentifierMap::load(&self.cache.identifiers_path())?;

        let Some(raw) = self.phase_download(session, summary).await? else {
            return Ok(());
        };
        if !self.config.run.runs(Stage::Convert) {
            tracing::info!(corpus = %self.config.corpus, "Stopping after download");
            return Ok(());
        }

        let mut destination_down: Option<String> = None;
        self.phase_settings(&raw, summary, &mut destination_down).await;

        for entity_type in EntityType::ALL {
            let Some(set) = self.phase_convert(entity_type, &raw, &mut ids, session, summary)? else {
                continue;
            };
            if !self.config.run.runs(Stage::Upload) {
                continue;
            }
            self.phase_upload(&set, &mut ids, session, summary, &mut destination_down)
                .await?;
        }

        if !self.config.run.runs(Stage::Upload) {
            tracing::info!(corpus = %self.config.corpus, "Stopping after convert");
        }
        Ok(())
    }

    fn transition(session: &mut MigrationSession, entity_type: EntityType, state: EntityState) {
        let transition = session.transition_to(entity_type, state);
        if transition.new_state.is_problem() {
            tracing::warn!(
                run_id = %transition.run_id,
                entity = %entity_type,
                "{} → {}",
                transition.old_state,
                transition.new_state
            );
        } else {
            tracing::debug!(
                run_id = %transition.run_id,
                entity = %entity_type,
                "{} → {}",
                transition.old_state,
                transition.new_state
            );
        }
    }

    fn write_reports(&self, summary: &MigrationSummary) -> MigrationResult<()> {
        let dir = self.cache.reports_dir();
        write_json_atomic(&dir.join("report.json"), summary)?;
        write_bytes_atomic(&dir.join("summary.txt"), summary.render_text().as_bytes())?;
        tracing::info!(reports = %dir.display(), "Reports written");
        Ok(())
    }
}
