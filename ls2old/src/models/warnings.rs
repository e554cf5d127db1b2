//! Conversion and upload warnings
//!
//! Warnings never stop a run; they are collected into the final report.

use crate::models::EntityType;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum WarningKind {
    /// A reference whose target could not be resolved was omitted
    DroppedReference,
    /// A source field with no OLD counterpart was not migrated
    SkippedField,
    /// Informational: truncation, placeholder values, consolidation
    Note,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub kind: WarningKind,
    pub entity_type: EntityType,
    pub source_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
}

impl Warning {
    pub fn dropped_reference(
        entity_type: EntityType,
        source_id: &str,
        field: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind: WarningKind::DroppedReference,
            entity_type,
            source_id: source_id.to_string(),
            field: Some(field.to_string()),
            message: message.into(),
        }
    }

    pub fn skipped_field(
        entity_type: EntityType,
        source_id: &str,
        field: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind: WarningKind::SkippedField,
            entity_type,
            source_id: source_id.to_string(),
            field: Some(field.to_string()),
            message: message.into(),
        }
    }

    pub fn note(entity_type: EntityType, source_id: &str, message: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::Note,
            entity_type,
            source_id: source_id.to_string(),
            field: None,
            message: message.into(),
        }
    }

    pub fn with_field(mut self, field: &str) -> Self {
        self.field = Some(field.to_string());
        self
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            WarningKind::DroppedReference => "dropped reference",
            WarningKind::SkippedField => "skipped field",
            WarningKind::Note => "note",
        };
        match &self.field {
            Some(field) => write!(
                f,
                "[{}] {}/{} {}: {}",
                kind, self.entity_type, self.source_id, field, self.message
            ),
            None => write!(
                f,
                "[{}] {}/{}: {}",
                kind, self.entity_type, self.source_id, self.message
            ),
        }
    }
}

/// A source document that produced no resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedDocument {
    pub entity_type: EntityType,
    pub source_id: String,
    pub reason: String,
}

impl fmt::Display for SkippedDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}: {}", self.entity_type, self.source_id, self.reason)
    }
}
