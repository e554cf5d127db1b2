//! Per-resource upload outcomes

use crate::models::DestinationId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What happened to one converted resource during upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UploadOutcome {
    /// Created on the destination
    Created { destination_id: DestinationId },
    /// Matched an existing destination resource by name
    Reused { destination_id: DestinationId },
    /// Created and then deleted (trashed source document)
    Deleted { destination_id: DestinationId },
    /// Recorded by an earlier run; nothing sent
    AlreadyUploaded,
    /// Destination rejected the create
    Failed { error: Value },
    /// Not sent (media too large or unavailable)
    Skipped { reason: String },
}

impl UploadOutcome {
    /// Outcomes that make a re-run skip the resource
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            UploadOutcome::Created { .. }
                | UploadOutcome::Reused { .. }
                | UploadOutcome::Deleted { .. }
        )
    }

    pub fn destination_id(&self) -> Option<&DestinationId> {
        match self {
            UploadOutcome::Created { destination_id }
            | UploadOutcome::Reused { destination_id }
            | UploadOutcome::Deleted { destination_id } => Some(destination_id),
            _ => None,
        }
    }
}

/// One line of `upload/<entity>.jsonl`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadRecord {
    pub source_id: String,
    pub outcome: UploadOutcome,
    pub recorded_at: DateTime<Utc>,
}

impl UploadRecord {
    pub fn new(source_id: impl Into<String>, outcome: UploadOutcome) -> Self {
        Self {
            source_id: source_id.into(),
            outcome,
            recorded_at: Utc::now(),
        }
    }
}
