//! Data models for the migrator
//!
//! - Entity types, provisional keys and destination ids
//! - Raw and converted resource sets
//! - Warnings and skipped documents
//! - Per-type migration state machine
//! - Upload outcomes
//! - OLD application settings

pub mod entity;
pub mod migration_session;
pub mod resources;
pub mod settings;
pub mod upload;
pub mod warnings;

pub use entity::{DestinationId, EntityType, ProvisionalKey};
pub use migration_session::{EntityState, MigrationSession, Stage, StateTransition};
pub use resources::{
    ConvertedResource, ConvertedResourceSet, MediaSource, RawCorpus, RawDocumentSet, RefShape,
    Reference, ReferenceField,
};
pub use settings::{ApplicationSettings, SettingsOutcome, SettingsReport};
pub use upload::{UploadOutcome, UploadRecord};
pub use warnings::{SkippedDocument, Warning, WarningKind};
