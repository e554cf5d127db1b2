//! Service modules for the migration workflow
//!
//! - `fielddb_client` / `old_client`: HTTP transports for both ends
//! - `cache_store`: on-disk caches, journals and the run lock
//! - `downloader`, `uploader`: the network-facing stages
//! - `workflow_orchestrator`: sequences the stages per entity type

pub mod cache_store;
pub mod downloader;
pub mod fielddb_client;
pub mod identifier_map;
pub mod old_client;
pub mod uploader;
pub mod workflow_orchestrator;

pub use cache_store::{CacheStore, LockInfo, RunLock};
pub use downloader::{Downloader, MediaManifest, MediaStatus};
pub use fielddb_client::FieldDbClient;
pub use identifier_map::{IdentifierEntry, IdentifierMap};
pub use old_client::OldClient;
pub use uploader::{FailedUpload, SkippedUpload, UploadReport, Uploader};
pub use workflow_orchestrator::{MigrationSummary, TypeStatistics, WorkflowOrchestrator};
