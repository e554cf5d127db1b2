//! Dependency-ordered uploader
//!
//! Sends one converted set to the OLD. Every accepted create is appended to
//! the identifier journal before the next request goes out, and every outcome
//! to the per-type status journal, so an interrupted run resumes where it
//! stopped without creating duplicates.

use crate::error::MigrationResult;
use crate::models::{
    ApplicationSettings, ConvertedResource, ConvertedResourceSet, DestinationId, EntityType,
    Reference, SettingsOutcome, UploadOutcome, UploadRecord, Warning,
};
use crate::services::cache_store::CacheStore;
use crate::services::downloader::{MediaManifest, MediaStatus};
use crate::services::identifier_map::IdentifierMap;
use crate::types::{CreateOutcome, DestinationApi, FileData, TransportError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

const SETTINGS_RESOURCE: &str = "applicationsettings";

/// A resource the destination refused
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedUpload {
    pub source_id: String,
    pub error: Value,
}

/// A resource that was never sent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedUpload {
    pub source_id: String,
    pub reason: String,
}

/// Outcome counts and problem lists of one upload stage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadReport {
    pub created: usize,
    pub reused: usize,
    pub deleted: usize,
    pub already_uploaded: usize,
    pub skipped: Vec<SkippedUpload>,
    pub failed: Vec<FailedUpload>,
    pub dropped_references: Vec<Warning>,
}

impl UploadReport {
    fn tally(&mut self, source_id: &str, outcome: &UploadOutcome) {
        match outcome {
            UploadOutcome::Created { .. } => self.created += 1,
            UploadOutcome::Reused { .. } => self.reused += 1,
            UploadOutcome::Deleted { .. } => self.deleted += 1,
            UploadOutcome::AlreadyUploaded => self.already_uploaded += 1,
            UploadOutcome::Failed { error } => self.failed.push(FailedUpload {
                source_id: source_id.to_string(),
                error: error.clone(),
            }),
            UploadOutcome::Skipped { reason } => self.skipped.push(SkippedUpload {
                source_id: source_id.to_string(),
                reason: reason.clone(),
            }),
        }
    }

    /// Resources that exist on the destination after this stage
    pub fn uploaded(&self) -> usize {
        self.created + self.reused + self.deleted
    }
}

/// Transport failure during one resource: fatal for the stage, or recorded
/// as that resource's error payload
fn resource_error(error: TransportError) -> MigrationResult<Value> {
    match error {
        TransportError::Network(_) | TransportError::Unauthorized(_) => {
            Err(error.into_destination_error())
        }
        TransportError::Api(status, message) => Ok(json!({"status": status, "error": message})),
        TransportError::Parse(message) => Ok(json!({"error": message})),
    }
}

/// Name an existing destination resource is matched on
fn destination_natural_key(entity_type: EntityType, item: &Value) -> Option<String> {
    let text = |attr: &str| item.get(attr).and_then(Value::as_str).map(str::trim);
    match entity_type {
        EntityType::Tags => text("name").map(str::to_string),
        EntityType::Users => text("username").map(str::to_string),
        EntityType::Speakers => Some(format!("{} {}", text("first_name")?, text("last_name")?)),
        _ => None,
    }
}

/// Payload with every reference rendered to destination ids
///
/// References that still do not resolve are left out and reported.
pub fn render_payload(
    resource: &ConvertedResource,
    ids: &IdentifierMap,
    entity_type: EntityType,
    dropped: &mut Vec<Warning>,
) -> Value {
    let mut payload = resource.payload.clone();
    for (field, reference) in &resource.references {
        let mut resolved = Vec::with_capacity(reference.refs.len());
        for r in &reference.refs {
            match ids.resolve(r) {
                Some(id) => resolved.push(id),
                None => {
                    let target = match r {
                        Reference::Pending(key) => key.to_string(),
                        Reference::Resolved(id) => id.to_string(),
                    };
                    dropped.push(Warning::dropped_reference(
                        entity_type,
                        &resource.key.source_id,
                        field,
                        format!("{} has no destination id", target),
                    ));
                }
            }
        }
        payload.insert(field.clone(), reference.shape.render(&resolved));
    }
    Value::Object(payload)
}

pub struct Uploader {
    destination: Arc<dyn DestinationApi>,
    cache: CacheStore,
    force_upload: bool,
}

impl Uploader {
    pub fn new(destination: Arc<dyn DestinationApi>, cache: CacheStore, force_upload: bool) -> Self {
        Self {
            destination,
            cache,
            force_upload,
        }
    }

    /// Upload one converted set
    ///
    /// Returns `DestinationUnavailable` as soon as the destination stops
    /// answering; everything recorded up to that point stays recorded.
    pub async fn upload(
        &self,
        set: &ConvertedResourceSet,
        ids: &mut IdentifierMap,
        media: &MediaManifest,
    ) -> MigrationResult<UploadReport> {
        let entity_type = set.entity_type;
        let resource_path = entity_type.destination_resource();
        let mut report = UploadReport::default();

        // Latest settled outcome per source id
        let mut settled: BTreeMap<String, UploadOutcome> = BTreeMap::new();
        for record in self.cache.load_upload_records(entity_type)? {
            if record.outcome.is_settled() {
                settled.insert(record.source_id, record.outcome);
            }
        }

        let existing = self.existing_by_natural_key(set, ids).await?;

        for resource in &set.resources {
            let source_id = resource.key.source_id.as_str();
            let previous = settled.get(source_id);
            let outcome = if !self.force_upload
                && (ids.contains(&resource.key) || previous.is_some())
            {
                match previous {
                    // Created but the follow-up delete never happened
                    Some(UploadOutcome::Created { destination_id }) if resource.delete_after_create => {
                        self.delete_created(resource_path, destination_id.clone()).await?
                    }
                    _ => UploadOutcome::AlreadyUploaded,
                }
            } else if let Some(id) = resource
                .natural_key
                .as_ref()
                .and_then(|name| existing.get(name))
            {
                ids.record(&resource.key, id.clone())?;
                UploadOutcome::Reused {
                    destination_id: id.clone(),
                }
            } else {
                self.create(resource, entity_type, ids, media, &mut report).await?
            };

            match &outcome {
                UploadOutcome::Failed { error } => {
                    warn!(entity = %entity_type, source_id = %source_id, error = %error, "Upload rejected")
                }
                UploadOutcome::Skipped { reason } => {
                    warn!(entity = %entity_type, source_id = %source_id, "Upload skipped: {}", reason)
                }
                other => debug!(entity = %entity_type, source_id = %source_id, outcome = ?other, "Uploaded"),
            }
            self.cache
                .append_upload_record(entity_type, &UploadRecord::new(source_id, outcome.clone()))?;
            report.tally(source_id, &outcome);
        }

        info!(
            entity = %entity_type,
            created = report.created,
            reused = report.reused,
            deleted = report.deleted,
            already_uploaded = report.already_uploaded,
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Upload stage finished"
        );
        Ok(report)
    }

    /// Make the newest application settings cover `settings`
    ///
    /// A new record is created only when the newest one lacks the object
    /// language or a grammaticality; the OLD rejects forms whose
    /// grammaticality is not listed.
    pub async fn apply_settings(
        &self,
        settings: &ApplicationSettings,
    ) -> MigrationResult<SettingsOutcome> {
        let current = self
            .destination
            .list(SETTINGS_RESOURCE)
            .await
            .map_err(TransportError::into_destination_error)?;

        let Some(payload) = settings.merged_payload(current.last()) else {
            debug!("Application settings already cover the corpus");
            return Ok(SettingsOutcome::AlreadyApplied);
        };

        let outcome = match self.destination.create(SETTINGS_RESOURCE, &payload).await {
            Ok(CreateOutcome::Created(destination_id)) => SettingsOutcome::Created { destination_id },
            Ok(CreateOutcome::Rejected(error)) => SettingsOutcome::Rejected { error },
            Err(e) => SettingsOutcome::Rejected {
                error: resource_error(e)?,
            },
        };
        match &outcome {
            SettingsOutcome::Created { destination_id } => {
                info!(id = %destination_id, "Created application settings")
            }
            SettingsOutcome::Rejected { error } => {
                warn!(error = %error, "Application settings rejected")
            }
            SettingsOutcome::AlreadyApplied => {}
        }
        Ok(outcome)
    }

    /// Existing destination resources by name, for the types matched on names
    ///
    /// Only listed when something of this type still needs creating.
    async fn existing_by_natural_key(
        &self,
        set: &ConvertedResourceSet,
        ids: &IdentifierMap,
    ) -> MigrationResult<BTreeMap<String, DestinationId>> {
        let entity_type = set.entity_type;
        let mut existing = BTreeMap::new();
        if !matches!(
            entity_type,
            EntityType::Tags | EntityType::Users | EntityType::Speakers
        ) {
            return Ok(existing);
        }
        let pending = set
            .resources
            .iter()
            .any(|r| self.force_upload || !ids.contains(&r.key));
        if !pending {
            return Ok(existing);
        }

        let items = self
            .destination
            .list(entity_type.destination_resource())
            .await
            .map_err(TransportError::into_destination_error)?;
        for item in &items {
            if let (Some(name), Some(id)) = (
                destination_natural_key(entity_type, item),
                DestinationId::from_response(item),
            ) {
                existing.entry(name).or_insert(id);
            }
        }
        debug!(entity = %entity_type, existing = existing.len(), "Listed existing destination resources");
        Ok(existing)
    }

    async fn create(
        &self,
        resource: &ConvertedResource,
        entity_type: EntityType,
        ids: &mut IdentifierMap,
        media: &MediaManifest,
        report: &mut UploadReport,
    ) -> MigrationResult<UploadOutcome> {
        let source_id = resource.key.source_id.as_str();

        // Files need their bytes before anything is created
        let file_data = match &resource.media {
            Some(source) => match media.get(source_id) {
                Some(MediaStatus::Local { path, .. }) => match tokio::fs::read(path).await {
                    Ok(bytes) => Some(FileData {
                        filename: source.filename.clone(),
                        mime_type: source.mime_type.clone(),
                        bytes,
                    }),
                    Err(e) => {
                        return Ok(UploadOutcome::Skipped {
                            reason: format!("cached media {} unreadable: {}", path.display(), e),
                        })
                    }
                },
                Some(MediaStatus::TooLarge { size }) => {
                    return Ok(UploadOutcome::Skipped {
                        reason: format!("too large ({} bytes)", size),
                    })
                }
                Some(MediaStatus::Unavailable { reason }) => {
                    return Ok(UploadOutcome::Skipped {
                        reason: format!("media unavailable: {}", reason),
                    })
                }
                None => {
                    return Ok(UploadOutcome::Skipped {
                        reason: "media was not downloaded".to_string(),
                    })
                }
            },
            None => None,
        };

        let payload = render_payload(resource, ids, entity_type, &mut report.dropped_references);
        let resource_path = entity_type.destination_resource();

        let destination_id = match self.destination.create(resource_path, &payload).await {
            Ok(CreateOutcome::Created(id)) => id,
            Ok(CreateOutcome::Rejected(error)) => return Ok(UploadOutcome::Failed { error }),
            Err(e) => {
                return Ok(UploadOutcome::Failed {
                    error: resource_error(e)?,
                })
            }
        };

        if let Some(data) = file_data {
            let rejection = match self.destination.upload_file_data(&destination_id, &data).await {
                Ok(CreateOutcome::Created(_)) => None,
                Ok(CreateOutcome::Rejected(error)) => Some(error),
                Err(e) => Some(resource_error(e)?),
            };
            if let Some(error) = rejection {
                // Drop the metadata record so a re-run starts clean
                if let Err(e) = self.destination.delete(resource_path, &destination_id).await {
                    warn!(source_id = %source_id, id = %destination_id, "Could not remove file without data: {}", e);
                }
                return Ok(UploadOutcome::Failed { error });
            }
        }

        if resource.delete_after_create {
            // Journaled before the delete so a crash never leads to a second create
            self.cache.append_upload_record(
                entity_type,
                &UploadRecord::new(
                    source_id,
                    UploadOutcome::Created {
                        destination_id: destination_id.clone(),
                    },
                ),
            )?;
            return self.delete_created(resource_path, destination_id).await;
        }

        ids.record(&resource.key, destination_id.clone())?;
        Ok(UploadOutcome::Created { destination_id })
    }

    /// Delete a form created from a trashed datum
    async fn delete_created(
        &self,
        resource_path: &str,
        destination_id: DestinationId,
    ) -> MigrationResult<UploadOutcome> {
        match self.destination.delete(resource_path, &destination_id).await {
            Ok(()) => Ok(UploadOutcome::Deleted { destination_id }),
            Err(e) => {
                let mut error = resource_error(e)?;
                error["destination_id"] = destination_id.to_json();
                Ok(UploadOutcome::Failed { error })
            }
        }
    }
}
