//! Phase 1: DOWNLOAD
//!
//! Every type's raw set comes from the cache unless `force_download`.
//! A download failure is fatal for the run.

use super::WorkflowOrchestrator;
use crate::error::MigrationResult;
use crate::models::{EntityState, EntityType, MigrationSession, RawCorpus, Stage};
use crate::services::workflow_orchestrator::MigrationSummary;

impl WorkflowOrchestrator {
    /// Phase 1: DOWNLOAD - raw sets of all types
    ///
    /// # Returns
    /// `None` when a type could not be downloaded; that type is FAILED and
    /// nothing further runs.
    pub(super) async fn phase_download(
        &self,
        session: &mut MigrationSession,
        summary: &mut MigrationSummary,
    ) -> MigrationResult<Option<RawCorpus>> {
        let corpus = self.config.corpus.as_str();
        tracing::info!(corpus = %corpus, force = self.config.run.force_download, "Phase 1: DOWNLOAD");

        let mut raw = RawCorpus::new();
        for entity_type in EntityType::ALL {
            match self
                .downloader
                .cached_or_fetch(corpus, entity_type, self.config.run.force_download)
                .await
            {
                Ok(set) => {
                    summary.entry(entity_type).downloaded = set.len();
                    raw.insert(set);
                    Self::transition(session, entity_type, EntityState::Downloaded);
                }
                Err(e) => {
                    tracing::error!(corpus = %corpus, entity = %entity_type, "Download failed: {}", e);
                    Self::transition(
                        session,
                        entity_type,
                        EntityState::Failed {
                            stage: Stage::Download,
                            reason: e.to_string(),
                        },
                    );
                    return Ok(None);
                }
            }
        }
        Ok(Some(raw))
    }
}
