//! Run statistics and the final report
//!
//! The report is written twice: `reports/report.json` for tooling and
//! `reports/summary.txt` for the operator, who is expected to check the
//! listed problems by hand.

use crate::models::{
    EntityState, EntityType, MigrationSession, SettingsOutcome, SettingsReport, SkippedDocument,
    Warning, WarningKind,
};
use crate::services::downloader::{MediaManifest, MediaStatus};
use crate::services::uploader::UploadReport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use uuid::Uuid;

/// Media counts of the files stage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaStats {
    pub local: usize,
    pub too_large: usize,
    pub unavailable: usize,
}

impl MediaStats {
    pub fn from_manifest(manifest: &MediaManifest) -> Self {
        let mut stats = Self::default();
        for status in manifest.values() {
            match status {
                MediaStatus::Local { .. } => stats.local += 1,
                MediaStatus::TooLarge { .. } => stats.too_large += 1,
                MediaStatus::Unavailable { .. } => stats.unavailable += 1,
            }
        }
        stats
    }
}

/// Everything recorded for one entity type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeStatistics {
    pub state: EntityState,
    pub downloaded: usize,
    pub converted: usize,
    pub skipped_documents: Vec<SkippedDocument>,
    pub warnings: Vec<Warning>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload: Option<UploadReport>,
}

impl Default for TypeStatistics {
    fn default() -> Self {
        Self {
            state: EntityState::Pending,
            downloaded: 0,
            converted: 0,
            skipped_documents: Vec::new(),
            warnings: Vec::new(),
            media: None,
            upload: None,
        }
    }
}

impl TypeStatistics {
    fn count(&self, kind: WarningKind) -> usize {
        let converted = self.warnings.iter().filter(|w| w.kind == kind).count();
        let uploaded = match (&self.upload, kind) {
            (Some(report), WarningKind::DroppedReference) => report.dropped_references.len(),
            _ => 0,
        };
        converted + uploaded
    }
}

/// Final report of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationSummary {
    pub run_id: Uuid,
    pub corpus: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub succeeded: bool,
    pub types: BTreeMap<EntityType, TypeStatistics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<SettingsReport>,
}

impl MigrationSummary {
    pub fn new(session: &MigrationSession) -> Self {
        Self {
            run_id: session.run_id,
            corpus: session.corpus.clone(),
            started_at: session.started_at,
            ended_at: session.ended_at,
            succeeded: session.succeeded(),
            types: EntityType::ALL
                .iter()
                .map(|t| (*t, TypeStatistics::default()))
                .collect(),
            settings: None,
        }
    }

    pub fn entry(&mut self, entity_type: EntityType) -> &mut TypeStatistics {
        self.types.entry(entity_type).or_default()
    }

    /// Copy the final session state into the summary
    pub fn finish(&mut self, session: &MigrationSession) {
        for (entity_type, state) in &session.states {
            self.entry(*entity_type).state = state.clone();
        }
        self.ended_at = session.ended_at;
        self.succeeded = session.succeeded();
    }

    /// Operator-facing text report
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "LingSync → OLD migration of corpus {}", self.corpus);
        let _ = writeln!(out, "Run {} started {}", self.run_id, self.started_at.to_rfc3339());
        if let Some(ended) = self.ended_at {
            let _ = writeln!(out, "Ended {}", ended.to_rfc3339());
        }
        let _ = writeln!(
            out,
            "Result: {}\n",
            if self.succeeded { "success" } else { "FAILED" }
        );

        let _ = writeln!(
            out,
            "{:<10} {:>10} {:>9} {:>7} {:>8} {:>8} {:>7} {:>7} {:>6}  state",
            "type", "downloaded", "converted", "skipped", "uploaded", "existing", "skipped", "failed", "warns"
        );
        for (entity_type, stats) in &self.types {
            let upload = stats.upload.clone().unwrap_or_default();
            let _ = writeln!(
                out,
                "{:<10} {:>10} {:>9} {:>7} {:>8} {:>8} {:>7} {:>7} {:>6}  {}",
                entity_type.as_str(),
                stats.downloaded,
                stats.converted,
                stats.skipped_documents.len(),
                upload.uploaded(),
                upload.already_uploaded,
                upload.skipped.len(),
                upload.failed.len(),
                stats.warnings.len() + upload.dropped_references.len(),
                stats.state
            );
        }

        for (title, kind) in [
            ("Dropped references", WarningKind::DroppedReference),
            ("Skipped fields", WarningKind::SkippedField),
            ("Notes", WarningKind::Note),
        ] {
            let total: usize = self.types.values().map(|s| s.count(kind)).sum();
            if total == 0 {
                continue;
            }
            let _ = writeln!(out, "\n{} ({})", title, total);
            for stats in self.types.values() {
                let upload_warnings = stats
                    .upload
                    .iter()
                    .flat_map(|u| u.dropped_references.iter());
                for warning in stats.warnings.iter().chain(upload_warnings) {
                    if warning.kind == kind {
                        let _ = writeln!(out, "  {}", warning);
                    }
                }
            }
        }

        if let Some(report) = &self.settings {
            let settings = &report.settings;
            let _ = writeln!(out, "\nApplication settings");
            let _ = writeln!(
                out,
                "  object language: {}",
                settings.object_language_name.as_deref().unwrap_or("(none found)")
            );
            let _ = writeln!(out, "  grammaticalities: {}", settings.grammaticalities.join(","));
            let outcome = match &report.outcome {
                None => "not uploaded".to_string(),
                Some(SettingsOutcome::AlreadyApplied) => "already applied".to_string(),
                Some(SettingsOutcome::Created { destination_id }) => {
                    format!("created as {}", destination_id)
                }
                Some(SettingsOutcome::Rejected { error }) => format!("REJECTED: {}", error),
            };
            let _ = writeln!(out, "  outcome: {}", outcome);
            for warning in &settings.warnings {
                let _ = writeln!(out, "  {}", warning);
            }
        }

        let skipped: Vec<&SkippedDocument> = self
            .types
            .values()
            .flat_map(|s| s.skipped_documents.iter())
            .collect();
        if !skipped.is_empty() {
            let _ = writeln!(out, "\nSkipped documents ({})", skipped.len());
            for doc in skipped {
                let _ = writeln!(out, "  {}", doc);
            }
        }

        for (entity_type, stats) in &self.types {
            let Some(upload) = &stats.upload else {
                continue;
            };
            for skipped in &upload.skipped {
                let _ = writeln!(
                    out,
                    "Upload skipped {}/{}: {}",
                    entity_type, skipped.source_id, skipped.reason
                );
            }
            for failed in &upload.failed {
                let _ = writeln!(
                    out,
                    "Upload FAILED {}/{}: {}",
                    entity_type, failed.source_id, failed.error
                );
            }
        }

        out
    }
}
