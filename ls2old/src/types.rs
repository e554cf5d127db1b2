//! Transport seams
//!
//! The migrator core talks to both servers only through [`SourceApi`] and
//! [`DestinationApi`]. Production implementations live in
//! `services::fielddb_client` and `services::old_client`; tests substitute
//! in-memory fakes.
//!
//! # Example
//!
//! ```rust,ignore
//! use ls2old::types::{DestinationApi, CreateOutcome};
//!
//! async fn create_tag(api: &dyn DestinationApi) {
//!     let payload = serde_json::json!({"name": "noun", "description": ""});
//!     match api.create("tags", &payload).await {
//!         Ok(CreateOutcome::Created(id)) => println!("tag {}", id),
//!         Ok(CreateOutcome::Rejected(errors)) => println!("rejected: {}", errors),
//!         Err(e) => println!("transport failure: {}", e),
//!     }
//! }
//! ```

use crate::error::MigrationError;
use crate::models::{DestinationId, EntityType};
use serde_json::Value;
use thiserror::Error;

/// Failures below the level of a single resource
#[derive(Debug, Error)]
pub enum TransportError {
    /// Server unreachable, timeout, connection reset
    #[error("Network error: {0}")]
    Network(String),

    /// HTTP 401/403 or an explicit unauthorized body
    #[error("Authentication failed: {0}")]
    Unauthorized(String),

    /// Unexpected status
    #[error("API error {0}: {1}")]
    Api(u16, String),

    /// Body did not decode
    #[error("Parse error: {0}")]
    Parse(String),
}

impl TransportError {
    /// Map a source-side failure into the run-level taxonomy
    pub fn into_source_error(self, entity_type: EntityType) -> MigrationError {
        match self {
            TransportError::Parse(reason) => MigrationError::SourceFormat {
                entity_type,
                reason,
            },
            other => MigrationError::SourceUnavailable(other.to_string()),
        }
    }

    /// Map a destination-side failure into the run-level taxonomy
    pub fn into_destination_error(self) -> MigrationError {
        MigrationError::DestinationUnavailable(self.to_string())
    }
}

/// One page request against the source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: usize,
    /// Mango `_find` continuation token
    pub bookmark: Option<String>,
    /// `_all_docs` offset
    pub skip: usize,
}

impl PageRequest {
    pub fn first(limit: usize) -> Self {
        Self {
            limit,
            bookmark: None,
            skip: 0,
        }
    }
}

/// LingSync / CouchDB side
#[async_trait::async_trait]
pub trait SourceApi: Send + Sync {
    /// Fetch one page of documents of `entity_type` from `corpus`
    ///
    /// Returns the raw response body; page shapes are normalized by the
    /// downloader.
    async fn fetch_page(
        &self,
        corpus: &str,
        entity_type: EntityType,
        page: &PageRequest,
    ) -> Result<Value, TransportError>;

    /// Fetch a media payload by absolute URL
    async fn fetch_media(&self, url: &str) -> Result<Vec<u8>, TransportError>;
}

/// Result of a create request that reached the destination
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    Created(DestinationId),
    /// Validation failure; carries the destination's error payload
    Rejected(Value),
}

/// Binary payload attached to an existing file resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileData {
    pub filename: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// OLD side
#[async_trait::async_trait]
pub trait DestinationApi: Send + Sync {
    /// Create a resource under `resource` (e.g. `forms`)
    async fn create(&self, resource: &str, payload: &Value) -> Result<CreateOutcome, TransportError>;

    /// Delete a resource by id
    async fn delete(&self, resource: &str, id: &DestinationId) -> Result<(), TransportError>;

    /// List every resource of a collection
    async fn list(&self, resource: &str) -> Result<Vec<Value>, TransportError>;

    /// Attach file content to a created file resource
    async fn upload_file_data(
        &self,
        id: &DestinationId,
        data: &FileData,
    ) -> Result<CreateOutcome, TransportError>;
}
