//! Migration run state machine
//!
//! Each entity type progresses independently:
//! PENDING → DOWNLOADED → CONVERTED → UPLOADED
//!
//! with two terminal outcomes: FAILED (at a named stage) and BLOCKED (a
//! prerequisite type never reached UPLOADED).

use crate::models::EntityType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Download,
    Convert,
    Upload,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Download => "download",
            Stage::Convert => "convert",
            Stage::Upload => "upload",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "download" => Ok(Stage::Download),
            "convert" => Ok(Stage::Convert),
            "upload" => Ok(Stage::Upload),
            other => Err(format!(
                "unknown stage '{}' (expected download, convert or upload)",
                other
            )),
        }
    }
}

/// Per-type pipeline state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "UPPERCASE")]
pub enum EntityState {
    Pending,
    Downloaded,
    Converted,
    Uploaded,
    Failed { stage: Stage, reason: String },
    Blocked { by: Vec<EntityType> },
}

impl EntityState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EntityState::Uploaded | EntityState::Failed { .. } | EntityState::Blocked { .. }
        )
    }

    pub fn is_problem(&self) -> bool {
        matches!(self, EntityState::Failed { .. } | EntityState::Blocked { .. })
    }
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityState::Pending => f.write_str("pending"),
            EntityState::Downloaded => f.write_str("downloaded"),
            EntityState::Converted => f.write_str("converted"),
            EntityState::Uploaded => f.write_str("uploaded"),
            EntityState::Failed { stage, reason } => {
                write!(f, "failed during {}: {}", stage, reason)
            }
            EntityState::Blocked { by } => {
                let names: Vec<&str> = by.iter().map(|t| t.as_str()).collect();
                write!(f, "blocked by {}", names.join(", "))
            }
        }
    }
}

/// State transition event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub run_id: Uuid,
    pub entity_type: EntityType,
    pub old_state: EntityState,
    pub new_state: EntityState,
    pub transitioned_at: DateTime<Utc>,
}

/// One migration run (in-memory state)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationSession {
    /// Unique run identifier, also written into the lock file
    pub run_id: Uuid,

    pub corpus: String,

    /// Current state of each entity type
    pub states: BTreeMap<EntityType, EntityState>,

    pub started_at: DateTime<Utc>,

    /// Set once every type has reached a terminal state or the run stopped
    pub ended_at: Option<DateTime<Utc>>,
}

impl MigrationSession {
    pub fn new(corpus: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            corpus: corpus.into(),
            states: EntityType::ALL
                .iter()
                .map(|t| (*t, EntityState::Pending))
                .collect(),
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    pub fn state(&self, entity_type: EntityType) -> &EntityState {
        self.states
            .get(&entity_type)
            .unwrap_or(&EntityState::Pending)
    }

    /// Transition one type to a new state
    pub fn transition_to(
        &mut self,
        entity_type: EntityType,
        new_state: EntityState,
    ) -> StateTransition {
        let old_state = self
            .states
            .insert(entity_type, new_state.clone())
            .unwrap_or(EntityState::Pending);

        StateTransition {
            run_id: self.run_id,
            entity_type,
            old_state,
            new_state,
            transitioned_at: Utc::now(),
        }
    }

    /// Prerequisites of `entity_type` that have not reached UPLOADED
    pub fn unmet_prerequisites(&self, entity_type: EntityType) -> Vec<EntityType> {
        entity_type
            .prerequisites()
            .iter()
            .filter(|p| self.state(**p) != &EntityState::Uploaded)
            .copied()
            .collect()
    }

    pub fn finish(&mut self) {
        self.ended_at = Some(Utc::now());
    }

    /// True when no type failed or was blocked
    pub fn succeeded(&self) -> bool {
        !self.states.values().any(EntityState::is_problem)
    }
}
