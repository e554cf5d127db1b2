//! Raw and converted resource sets

use crate::models::{DestinationId, EntityType, ProvisionalKey, SkippedDocument, Warning};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Every document of one type downloaded from one corpus, in source order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDocumentSet {
    pub corpus: String,
    pub entity_type: EntityType,
    pub documents: Vec<Value>,
}

impl RawDocumentSet {
    pub fn empty(corpus: impl Into<String>, entity_type: EntityType) -> Self {
        Self {
            corpus: corpus.into(),
            entity_type,
            documents: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// All raw sets of a corpus, keyed by type
///
/// Stages that derive implicit resources (tags named in datums, speakers
/// named in sessions) read other types' raw sets through this.
#[derive(Debug, Clone, Default)]
pub struct RawCorpus {
    sets: BTreeMap<EntityType, RawDocumentSet>,
}

impl RawCorpus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, set: RawDocumentSet) {
        self.sets.insert(set.entity_type, set);
    }

    /// Documents of one type; empty when the type was never downloaded
    pub fn documents(&self, entity_type: EntityType) -> &[Value] {
        self.sets
            .get(&entity_type)
            .map(|s| s.documents.as_slice())
            .unwrap_or(&[])
    }

    pub fn get(&self, entity_type: EntityType) -> Option<&RawDocumentSet> {
        self.sets.get(&entity_type)
    }
}

/// Reference to another converted resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reference {
    /// Destination id already known when conversion ran
    Resolved(DestinationId),
    /// Target converted but not uploaded yet; resolved by the uploader
    Pending(ProvisionalKey),
}

/// How a reference field is rendered into the destination payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefShape {
    /// Single id or null
    Single,
    /// JSON array of ids
    List,
    /// Comma separated ids (corpus `content`)
    CommaSeparated,
    /// One `form[<id>]` per line (collection `contents`)
    FormMarkup,
}

impl RefShape {
    /// Render resolved ids into a payload value
    pub fn render(&self, ids: &[DestinationId]) -> Value {
        match self {
            RefShape::Single => ids.first().map(DestinationId::to_json).unwrap_or(Value::Null),
            RefShape::List => Value::Array(ids.iter().map(DestinationId::to_json).collect()),
            RefShape::CommaSeparated => Value::String(
                ids.iter()
                    .map(DestinationId::as_str)
                    .collect::<Vec<_>>()
                    .join(","),
            ),
            RefShape::FormMarkup => Value::String(
                ids.iter()
                    .map(|id| format!("form[{}]", id))
                    .collect::<Vec<_>>()
                    .join("\n"),
            ),
        }
    }
}

/// A reference-valued payload field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceField {
    pub target: EntityType,
    pub shape: RefShape,
    pub refs: Vec<Reference>,
}

/// Where the bytes of a file resource come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaSource {
    pub url: String,
    pub filename: String,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declared_size: Option<u64>,
}

/// One OLD resource produced by conversion, not yet uploaded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvertedResource {
    pub key: ProvisionalKey,

    /// Name used for consolidation and destination reuse (tag name,
    /// username, speaker full name, file URL)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub natural_key: Option<String>,

    /// Source ids consolidated into this resource
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub merged_source_ids: Vec<String>,

    /// Non-reference OLD attributes
    pub payload: Map<String, Value>,

    /// Reference attributes, rendered at upload time
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub references: BTreeMap<String, ReferenceField>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaSource>,

    /// Trashed source document: create, then delete on the destination
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub delete_after_create: bool,
}

impl ConvertedResource {
    pub fn new(key: ProvisionalKey, payload: Map<String, Value>) -> Self {
        Self {
            key,
            natural_key: None,
            merged_source_ids: Vec::new(),
            payload,
            references: BTreeMap::new(),
            media: None,
            delete_after_create: false,
        }
    }

    pub fn with_natural_key(mut self, natural_key: impl Into<String>) -> Self {
        self.natural_key = Some(natural_key.into());
        self
    }

    /// Every source id that refers to this resource
    pub fn source_ids(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.key.source_id.as_str())
            .chain(self.merged_source_ids.iter().map(String::as_str))
    }
}

/// Output of one conversion stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvertedResourceSet {
    pub corpus: String,
    pub entity_type: EntityType,
    pub resources: Vec<ConvertedResource>,
    pub warnings: Vec<Warning>,
    pub skipped_documents: Vec<SkippedDocument>,
}

impl ConvertedResourceSet {
    pub fn new(corpus: impl Into<String>, entity_type: EntityType) -> Self {
        Self {
            corpus: corpus.into(),
            entity_type,
            resources: Vec::new(),
            warnings: Vec::new(),
            skipped_documents: Vec::new(),
        }
    }

    pub fn find(&self, source_id: &str) -> Option<&ConvertedResource> {
        self.resources.iter().find(|r| r.key.source_id == source_id)
    }
}
