//! Error types for the migrator
//!
//! Run-level failures live in [`MigrationError`]. Document-level and
//! resource-level problems (dropped references, skipped fields, rejected
//! creates) are never errors: they are recorded in the report and the run
//! continues.

use crate::models::EntityType;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrationError {
    /// Source endpoint unreachable or refused our credentials
    #[error("LingSync source unavailable: {0}")]
    SourceUnavailable(String),

    /// A source page was not a well-formed document list
    #[error("Malformed {entity_type} page from LingSync: {reason}")]
    SourceFormat {
        entity_type: EntityType,
        reason: String,
    },

    /// Required source field missing; aborts conversion of one document only
    #[error("Cannot map {entity_type} document {source_id}: {reason}")]
    Mapping {
        entity_type: EntityType,
        source_id: String,
        reason: String,
    },

    /// Destination unreachable or refused our credentials
    #[error("OLD destination unavailable: {0}")]
    DestinationUnavailable(String),

    /// Another run holds the lock for this corpus
    #[error("A migration run is already in progress (lock file {}); remove it if the previous run crashed", .0.display())]
    RunInProgress(PathBuf),

    /// Local cache could not be read or written
    #[error("Cache error at {}: {source}", path.display())]
    Cache {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Cached artifact exists but does not decode
    #[error("Corrupt cache entry {}: {source}", path.display())]
    CorruptCache {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Invalid configuration or option value
    #[error("Configuration error: {0}")]
    Config(String),

    /// ls2old-common error
    #[error("Common error: {0}")]
    Common(#[from] ls2old_common::Error),
}

impl MigrationError {
    pub fn cache(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Cache {
            path: path.into(),
            source,
        }
    }

    /// Connectivity/authentication failures end the whole run
    pub fn is_fatal_transport(&self) -> bool {
        matches!(
            self,
            Self::SourceUnavailable(_) | Self::DestinationUnavailable(_)
        )
    }
}

/// Result type for migrator operations
pub type MigrationResult<T> = Result<T, MigrationError>;
