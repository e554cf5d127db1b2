//! Application settings, applied before the first UPLOAD
//!
//! A rejected settings record leaves the OLD unable to accept the corpus's
//! forms, so it stops the upload stage the same way a lost destination does.

use super::WorkflowOrchestrator;
use crate::mapper::settings::application_settings;
use crate::models::{RawCorpus, SettingsOutcome, SettingsReport, Stage};
use crate::services::workflow_orchestrator::MigrationSummary;

impl WorkflowOrchestrator {
    pub(super) async fn phase_settings(
        &self,
        raw: &RawCorpus,
        summary: &mut MigrationSummary,
        destination_down: &mut Option<String>,
    ) {
        let settings = application_settings(raw);
        for warning in &settings.warnings {
            tracing::warn!(corpus = %self.config.corpus, "{}", warning);
        }

        let mut outcome = None;
        let uploader = self
            .uploader
            .as_ref()
            .filter(|_| self.config.run.runs(Stage::Upload));
        if let Some(uploader) = uploader {
            tracing::info!(
                corpus = %self.config.corpus,
                language = ?settings.object_language_name,
                grammaticalities = settings.grammaticalities.len(),
                "Applying application settings"
            );
            match uploader.apply_settings(&settings).await {
                Ok(applied) => {
                    if let SettingsOutcome::Rejected { error } = &applied {
                        *destination_down = Some(format!("application settings rejected: {}", error));
                    }
                    outcome = Some(applied);
                }
                Err(e) => {
                    tracing::error!(corpus = %self.config.corpus, "Application settings failed: {}", e);
                    *destination_down = Some(e.to_string());
                }
            }
        }

        summary.settings = Some(SettingsReport { settings, outcome });
    }
}
