//! ls2old library interface
//!
//! Migrates a LingSync (FieldDB) corpus into an Online Linguistic Database.
//! Exposes the stages individually for integration testing.

pub mod config;
pub mod error;
pub mod mapper;
pub mod models;
pub mod services;
pub mod types;

pub use crate::config::{ConfigOverrides, ConversionOptions, MigrationConfig, RunOptions};
pub use crate::error::{MigrationError, MigrationResult};
pub use crate::services::{MigrationSummary, WorkflowOrchestrator};
