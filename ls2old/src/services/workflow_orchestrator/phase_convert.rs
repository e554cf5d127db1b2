//! Phase 2: CONVERT
//!
//! A cached converted set is reused unless `force_convert`; its keys are
//! registered exactly as a fresh conversion would register them, so later
//! types resolve against the same provisional keys either way.

use super::WorkflowOrchestrator;
use crate::error::MigrationResult;
use crate::mapper;
use crate::models::{ConvertedResourceSet, EntityState, EntityType, MigrationSession, RawCorpus, Stage};
use crate::services::identifier_map::IdentifierMap;
use crate::services::workflow_orchestrator::MigrationSummary;

impl WorkflowOrchestrator {
    /// Phase 2: CONVERT - one entity type
    ///
    /// # Returns
    /// `None` when the type failed conversion (its cache could not be read
    /// or written).
    pub(super) fn phase_convert(
        &self,
        entity_type: EntityType,
        raw: &RawCorpus,
        ids: &mut IdentifierMap,
        session: &mut MigrationSession,
        summary: &mut MigrationSummary,
    ) -> MigrationResult<Option<ConvertedResourceSet>> {
        let corpus = self.config.corpus.as_str();

        match self.converted_set(entity_type, raw, ids) {
            Ok(set) => {
                let stats = summary.entry(entity_type);
                stats.converted = set.resources.len();
                stats.skipped_documents = set.skipped_documents.clone();
                stats.warnings = set.warnings.clone();
                Self::transition(session, entity_type, EntityState::Converted);
                Ok(Some(set))
            }
            Err(e) => {
                tracing::error!(corpus = %corpus, entity = %entity_type, "Conversion failed: {}", e);
                Self::transition(
                    session,
                    entity_type,
                    EntityState::Failed {
                        stage: Stage::Convert,
                        reason: e.to_string(),
                    },
                );
                Ok(None)
            }
        }
    }

    fn converted_set(
        &self,
        entity_type: EntityType,
        raw: &RawCorpus,
        ids: &mut IdentifierMap,
    ) -> MigrationResult<ConvertedResourceSet> {
        if !self.config.run.force_convert {
            if let Some(set) = self.cache.load_converted(entity_type)? {
                mapper::register(&set, ids);
                tracing::debug!(
                    corpus = %self.config.corpus,
                    entity = %entity_type,
                    resources = set.resources.len(),
                    "Using cached converted set"
                );
                return Ok(set);
            }
        }

        let set = mapper::convert(entity_type, raw, ids, &self.config.conversion);
        self.cache.store_converted(&set)?;
        Ok(set)
    }
}
