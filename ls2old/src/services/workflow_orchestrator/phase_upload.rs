//! Phase 3: UPLOAD
//!
//! Prerequisite types must have reached UPLOADED. Once the destination has
//! become unavailable no further type is attempted.

use super::WorkflowOrchestrator;
use crate::error::MigrationResult;
use crate::models::{ConvertedResourceSet, EntityState, EntityType, MigrationSession, Stage};
use crate::services::downloader::MediaManifest;
use crate::services::identifier_map::IdentifierMap;
use crate::services::workflow_orchestrator::{MediaStats, MigrationSummary};

impl WorkflowOrchestrator {
    /// Phase 3: UPLOAD - one converted set
    ///
    /// `destination_down` carries the reason once the destination stopped
    /// answering; it is set here and consulted by the following types.
    pub(super) async fn phase_upload(
        &self,
        set: &ConvertedResourceSet,
        ids: &mut IdentifierMap,
        session: &mut MigrationSession,
        summary: &mut MigrationSummary,
        destination_down: &mut Option<String>,
    ) -> MigrationResult<()> {
        let entity_type = set.entity_type;
        let corpus = self.config.corpus.as_str();

        let unmet = session.unmet_prerequisites(entity_type);
        if !unmet.is_empty() {
            Self::transition(session, entity_type, EntityState::Blocked { by: unmet });
            return Ok(());
        }

        let fail = |session: &mut MigrationSession, reason: String| {
            Self::transition(
                session,
                entity_type,
                EntityState::Failed {
                    stage: Stage::Upload,
                    reason,
                },
            );
        };

        if let Some(reason) = destination_down.as_ref() {
            fail(session, format!("upload stage aborted: {}", reason));
            return Ok(());
        }
        let Some(uploader) = &self.uploader else {
            fail(session, "no destination configured".to_string());
            return Ok(());
        };

        let media = if entity_type == EntityType::Files {
            match self
                .downloader
                .fetch_media(corpus, set, self.config.run.force_file_download)
                .await
            {
                Ok(media) => {
                    summary.entry(entity_type).media = Some(MediaStats::from_manifest(&media));
                    media
                }
                Err(e) => {
                    tracing::error!(corpus = %corpus, "Media download failed: {}", e);
                    fail(session, e.to_string());
                    return Ok(());
                }
            }
        } else {
            MediaManifest::new()
        };

        tracing::info!(
            corpus = %corpus,
            entity = %entity_type,
            resources = set.resources.len(),
            "Phase 3: UPLOAD"
        );
        match uploader.upload(set, ids, &media).await {
            Ok(report) => {
                summary.entry(entity_type).upload = Some(report);
                Self::transition(session, entity_type, EntityState::Uploaded);
            }
            Err(e) => {
                tracing::error!(corpus = %corpus, entity = %entity_type, "Upload failed: {}", e);
                if e.is_fatal_transport() {
                    *destination_down = Some(e.to_string());
                }
                fail(session, e.to_string());
            }
        }
        Ok(())
    }
}
