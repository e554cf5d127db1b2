//! Entity mapper
//!
//! Converts raw LingSync sets into OLD resource sets, one stage per entity
//! type in the fixed order. Each stage reads raw documents in stable input
//! order, maps fields, applies empty-field fallbacks and resolves references
//! through the identifier map. Destination ids are never assigned here; each
//! resource carries its provisional key.
//!
//! Conversion is a pure function of (raw sets, identifier map, options):
//! identical inputs yield byte-identical serialized output.

pub mod datalists;
pub mod datums;
pub mod fields;
pub mod files;
pub mod sessions;
pub mod settings;
pub mod speakers;
pub mod tags;
pub mod users;

use crate::config::ConversionOptions;
use crate::error::MigrationError;
use crate::models::{
    ConvertedResource, ConvertedResourceSet, EntityType, ProvisionalKey, RawCorpus, RefShape,
    ReferenceField, SkippedDocument, Warning,
};
use crate::services::identifier_map::IdentifierMap;
use serde_json::{Map, Value};
use tracing::{debug, info};

/// Source id of the tag attached to every migrated form, corpus and collection
pub const MIGRATION_TAG_ID: &str = "migration";

pub fn migration_tag_key() -> ProvisionalKey {
    ProvisionalKey::new(EntityType::Tags, MIGRATION_TAG_ID)
}

/// Result of converting one document
pub(crate) enum DocOutcome {
    Converted(ConvertedResource),
    /// Document intentionally produces no resource
    Skipped(String),
}

pub(crate) type DocResult = Result<DocOutcome, MigrationError>;

/// Mapping error for one document
pub(crate) fn mapping_error(entity_type: EntityType, source_id: &str, reason: &str) -> MigrationError {
    MigrationError::Mapping {
        entity_type,
        source_id: source_id.to_string(),
        reason: reason.to_string(),
    }
}

/// Shared state of one conversion stage
pub(crate) struct StageContext<'a> {
    pub raw: &'a RawCorpus,
    pub ids: &'a IdentifierMap,
    pub options: &'a ConversionOptions,
    pub entity_type: EntityType,
    pub set: ConvertedResourceSet,
}

impl<'a> StageContext<'a> {
    fn new(
        entity_type: EntityType,
        raw: &'a RawCorpus,
        ids: &'a IdentifierMap,
        options: &'a ConversionOptions,
    ) -> Self {
        Self {
            raw,
            ids,
            options,
            entity_type,
            set: ConvertedResourceSet::new(options.corpus.clone(), entity_type),
        }
    }

    pub fn warn(&mut self, warning: Warning) {
        self.set.warnings.push(warning);
    }

    pub fn note(&mut self, source_id: &str, message: impl Into<String>) {
        let warning = Warning::note(self.entity_type, source_id, message);
        self.warn(warning);
    }

    pub fn skipped_field(&mut self, source_id: &str, field: &str, message: impl Into<String>) {
        let warning = Warning::skipped_field(self.entity_type, source_id, field, message);
        self.warn(warning);
    }

    /// Record the outcome of one document
    pub fn push(&mut self, source_id: &str, result: DocResult) {
        match result {
            Ok(DocOutcome::Converted(resource)) => self.set.resources.push(resource),
            Ok(DocOutcome::Skipped(reason)) => self.skip_document(source_id, reason),
            Err(e) => {
                debug!(entity = %self.entity_type, source_id = %source_id, "Mapping error: {}", e);
                let reason = match e {
                    MigrationError::Mapping { reason, .. } => reason,
                    other => other.to_string(),
                };
                self.skip_document(source_id, reason);
            }
        }
    }

    fn skip_document(&mut self, source_id: &str, reason: String) {
        self.set.skipped_documents.push(SkippedDocument {
            entity_type: self.entity_type,
            source_id: source_id.to_string(),
            reason,
        });
    }

    /// Resolve `keys` into a reference field
    ///
    /// Each key becomes a resolved or pending reference; keys that resolve to
    /// neither are dropped with a `DroppedReference` warning. Duplicates
    /// collapse to their first occurrence.
    pub fn references(
        &mut self,
        source_id: &str,
        field: &str,
        target: EntityType,
        shape: RefShape,
        keys: Vec<ProvisionalKey>,
    ) -> ReferenceField {
        let mut refs = Vec::with_capacity(keys.len());
        for key in keys {
            match self.ids.reference(&key) {
                Some(reference) if !refs.contains(&reference) => refs.push(reference),
                Some(_) => {}
                None => {
                    let warning = Warning::dropped_reference(
                        self.entity_type,
                        source_id,
                        field,
                        format!("unknown {} '{}'", target, key.source_id),
                    );
                    self.warn(warning);
                }
            }
        }
        ReferenceField {
            target,
            shape,
            refs,
        }
    }

    /// Key of the resource registered under a natural key, or the derived key
    /// an implicit resource with that name would carry
    pub fn natural_key(&self, target: EntityType, prefix: &str, name: &str) -> ProvisionalKey {
        self.ids
            .by_natural_key(target, name)
            .cloned()
            .unwrap_or_else(|| ProvisionalKey::new(target, format!("{}:{}", prefix, name)))
    }

    /// Fill empty payload attributes from configured fallback rules
    pub fn apply_fallbacks(&mut self, source_id: &str, payload: &mut Map<String, Value>) {
        let rules: Vec<_> = self.options.fallbacks_for(self.entity_type).cloned().collect();
        for rule in rules {
            let target_empty = payload
                .get(&rule.target)
                .map_or(true, fields::is_empty_value);
            let Some(value) = payload.get(&rule.source).filter(|v| !fields::is_empty_value(v)).cloned()
            else {
                continue;
            };
            if target_empty {
                payload.insert(rule.target.clone(), value);
                self.note(
                    source_id,
                    format!("{} was empty and was filled from {}", rule.target, rule.source),
                );
            }
        }
    }

    fn finish(self) -> ConvertedResourceSet {
        self.set
    }
}

/// Convert one entity type
///
/// The keys of the produced resources are registered in `ids`, so later
/// stages can reference them.
pub fn convert(
    entity_type: EntityType,
    raw: &RawCorpus,
    ids: &mut IdentifierMap,
    options: &ConversionOptions,
) -> ConvertedResourceSet {
    let mut ctx = StageContext::new(entity_type, raw, ids, options);
    match entity_type {
        EntityType::Tags => tags::convert(&mut ctx),
        EntityType::Users => users::convert(&mut ctx),
        EntityType::Speakers => speakers::convert(&mut ctx),
        EntityType::Files => files::convert(&mut ctx),
        EntityType::Datums => datums::convert(&mut ctx),
        EntityType::DataLists => datalists::convert(&mut ctx),
        EntityType::Sessions => sessions::convert(&mut ctx),
    }
    let set = ctx.finish();

    register(&set, ids);

    info!(
        corpus = %options.corpus,
        entity = %entity_type,
        resources = set.resources.len(),
        skipped = set.skipped_documents.len(),
        warnings = set.warnings.len(),
        "Converted"
    );
    set
}

/// Register a set's resources as referenceable
///
/// Resources deleted right after creation (trashed datums) are never
/// referenceable.
pub fn register(set: &ConvertedResourceSet, ids: &mut IdentifierMap) {
    for resource in set.resources.iter().filter(|r| !r.delete_after_create) {
        ids.register_resource(resource);
    }
}

/// Convert every type in processing order
pub fn convert_all(
    raw: &RawCorpus,
    ids: &mut IdentifierMap,
    options: &ConversionOptions,
) -> Vec<ConvertedResourceSet> {
    EntityType::ALL
        .iter()
        .map(|entity_type| convert(*entity_type, raw, ids, options))
        .collect()
}

/// Attach the migration tag reference when enabled
pub(crate) fn migration_tag_keys(options: &ConversionOptions) -> Vec<ProvisionalKey> {
    if options.migration_tag {
        vec![migration_tag_key()]
    } else {
        Vec::new()
    }
}

/// Report top-level attributes outside `known`
pub(crate) fn report_unknown_attributes(
    ctx: &mut StageContext<'_>,
    doc: &Value,
    source_id: &str,
    known: &[&str],
) {
    let Some(map) = doc.as_object() else {
        return;
    };
    for key in map.keys() {
        if !known.contains(&key.as_str()) {
            ctx.skipped_field(source_id, key, "not a recognized attribute");
        }
    }
}

/// Report non-empty field-array labels outside `known`
pub(crate) fn report_unknown_labels(
    ctx: &mut StageContext<'_>,
    doc: &Value,
    source_id: &str,
    array_attrs: &[&str],
    known: &[&str],
) {
    for attr in array_attrs {
        let Some(entries) = doc.get(*attr).and_then(Value::as_array) else {
            continue;
        };
        for entry in entries {
            let Some(label) = entry.get("label").and_then(Value::as_str) else {
                continue;
            };
            let has_value = entry
                .get("value")
                .map_or(false, |v| !fields::is_empty_value(v));
            if has_value && !known.contains(&label) {
                ctx.skipped_field(source_id, label, "not a recognized field label");
            }
        }
    }
}

/// Consolidate resources sharing a natural key
///
/// The first resource wins; later ones become aliases of it and their
/// descriptions are appended to it. Each merge is noted.
pub(crate) fn consolidate(ctx: &mut StageContext<'_>) {
    let mut kept: Vec<ConvertedResource> = Vec::with_capacity(ctx.set.resources.len());
    let mut notes = Vec::new();

    for resource in std::mem::take(&mut ctx.set.resources) {
        let existing = resource
            .natural_key
            .as_ref()
            .and_then(|name| kept.iter_mut().find(|k| k.natural_key.as_ref() == Some(name)));
        match existing {
            Some(first) => {
                merge_descriptions(first, &resource);
                first
                    .merged_source_ids
                    .extend(resource.source_ids().map(str::to_string));
                notes.push((
                    resource.key.source_id.clone(),
                    format!(
                        "duplicate of {} ({}); consolidated",
                        first.key.source_id,
                        first.natural_key.as_deref().unwrap_or_default()
                    ),
                ));
            }
            None => kept.push(resource),
        }
    }

    ctx.set.resources = kept;
    for (source_id, message) in notes {
        ctx.note(&source_id, message);
    }
}

fn merge_descriptions(first: &mut ConvertedResource, other: &ConvertedResource) {
    for attr in ["description", "page_content"] {
        let Some(extra) = other.payload.get(attr).and_then(fields::as_text) else {
            continue;
        };
        let current = first.payload.get(attr).and_then(fields::as_text);
        let merged = match current {
            Some(current) if current.contains(&extra) => current,
            Some(current) => format!("{}\n\n{}", current, extra),
            None => extra,
        };
        first.payload.insert(attr.to_string(), Value::String(merged));
    }
}

/// Iterate documents of `entity_type` with their source ids
pub(crate) fn documents_with_ids(
    raw: &RawCorpus,
    entity_type: EntityType,
) -> impl Iterator<Item = (Option<String>, &Value)> {
    raw.documents(entity_type)
        .iter()
        .map(|doc| (fields::source_id(doc), doc))
}
