//! Entity types, provisional keys and destination identifiers

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// LingSync document type, declared in dependency (processing) order
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Tags,
    Users,
    Speakers,
    Files,
    Datums,
    DataLists,
    Sessions,
}

impl EntityType {
    /// Every type, in the fixed conversion and upload order
    pub const ALL: [EntityType; 7] = [
        EntityType::Tags,
        EntityType::Users,
        EntityType::Speakers,
        EntityType::Files,
        EntityType::Datums,
        EntityType::DataLists,
        EntityType::Sessions,
    ];

    /// LingSync `collection` value
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Tags => "tags",
            EntityType::Users => "users",
            EntityType::Speakers => "speakers",
            EntityType::Files => "files",
            EntityType::Datums => "datums",
            EntityType::DataLists => "datalists",
            EntityType::Sessions => "sessions",
        }
    }

    /// OLD REST resource path
    pub fn destination_resource(&self) -> &'static str {
        match self {
            EntityType::Tags => "tags",
            EntityType::Users => "users",
            EntityType::Speakers => "speakers",
            EntityType::Files => "files",
            EntityType::Datums => "forms",
            EntityType::DataLists => "corpora",
            EntityType::Sessions => "collections",
        }
    }

    /// Capitalized singular `fieldDBtype` values that identify this type
    pub fn fielddb_types(&self) -> &'static [&'static str] {
        match self {
            EntityType::Tags => &["Tag"],
            EntityType::Users => &["User", "UserMask"],
            EntityType::Speakers => &["Speaker", "Consultant"],
            EntityType::Files => &["File", "AudioVideo"],
            EntityType::Datums => &["Datum"],
            EntityType::DataLists => &["DataList", "Datalist"],
            EntityType::Sessions => &["Session"],
        }
    }

    /// Types that must reach `Uploaded` before this one may upload
    pub fn prerequisites(&self) -> &'static [EntityType] {
        match self {
            EntityType::Tags | EntityType::Users | EntityType::Speakers | EntityType::Files => &[],
            EntityType::Datums => &[
                EntityType::Tags,
                EntityType::Users,
                EntityType::Speakers,
                EntityType::Files,
            ],
            EntityType::DataLists => &[EntityType::Tags, EntityType::Datums],
            EntityType::Sessions => &[
                EntityType::Tags,
                EntityType::Users,
                EntityType::Speakers,
                EntityType::Datums,
            ],
        }
    }

    /// Classify a LingSync document by `collection`, falling back to
    /// `fieldDBtype`. Design documents and logic documents yield `None`.
    pub fn classify(doc: &Value) -> Option<EntityType> {
        let id = doc
            .get("_id")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if id.starts_with("_design/") {
            return None;
        }

        if let Some(collection) = doc.get("collection").and_then(Value::as_str) {
            if let Some(entity_type) = Self::ALL.iter().find(|t| t.as_str() == collection) {
                return Some(*entity_type);
            }
        }

        let fielddb_type = doc.get("fieldDBtype").and_then(Value::as_str)?;
        Self::ALL
            .iter()
            .find(|t| t.fielddb_types().contains(&fielddb_type))
            .copied()
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    /// Accepts LingSync collection names and OLD resource names
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .find(|t| t.as_str() == lowered || t.destination_resource() == lowered)
            .copied()
            .ok_or_else(|| format!("unknown entity type '{}'", s))
    }
}

/// Stable key for a converted resource: `(entity_type, source_id)`
///
/// Used to reconnect a resource with the identifier the destination assigns
/// to it at upload time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProvisionalKey {
    pub entity_type: EntityType,
    pub source_id: String,
}

impl ProvisionalKey {
    pub fn new(entity_type: EntityType, source_id: impl Into<String>) -> Self {
        Self {
            entity_type,
            source_id: source_id.into(),
        }
    }
}

impl fmt::Display for ProvisionalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity_type, self.source_id)
    }
}

/// Identifier assigned by the OLD
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DestinationId(pub String);

impl DestinationId {
    /// Extract the `id` attribute of a destination response
    pub fn from_response(response: &Value) -> Option<Self> {
        match response.get("id")? {
            Value::Number(n) => Some(Self(n.to_string())),
            Value::String(s) if !s.is_empty() => Some(Self(s.clone())),
            _ => None,
        }
    }

    /// JSON form for payloads: numeric when the OLD gave us a number
    pub fn to_json(&self) -> Value {
        match self.0.parse::<i64>() {
            Ok(n) => Value::from(n),
            Err(_) => Value::String(self.0.clone()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DestinationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DestinationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_processing_order_matches_declaration() {
        let mut sorted = EntityType::ALL.to_vec();
        sorted.sort();
        assert_eq!(sorted, EntityType::ALL.to_vec());
    }

    #[test]
    fn test_prerequisites_precede_dependents() {
        for entity_type in EntityType::ALL {
            for prerequisite in entity_type.prerequisites() {
                assert!(prerequisite < &entity_type, "{} before {}", prerequisite, entity_type);
            }
        }
    }

    #[test]
    fn test_classify_by_collection_and_fielddb_type() {
        assert_eq!(
            EntityType::classify(&json!({"_id": "a", "collection": "datums"})),
            Some(EntityType::Datums)
        );
        assert_eq!(
            EntityType::classify(&json!({"_id": "b", "fieldDBtype": "Session"})),
            Some(EntityType::Sessions)
        );
        assert_eq!(
            EntityType::classify(&json!({"_id": "c", "fieldDBtype": "Datalist"})),
            Some(EntityType::DataLists)
        );
        assert_eq!(
            EntityType::classify(&json!({"_id": "_design/pages", "collection": "datums"})),
            None
        );
        assert_eq!(EntityType::classify(&json!({"_id": "d"})), None);
    }

    #[test]
    fn test_from_str_accepts_both_vocabularies() {
        assert_eq!("datums".parse::<EntityType>(), Ok(EntityType::Datums));
        assert_eq!("forms".parse::<EntityType>(), Ok(EntityType::Datums));
        assert_eq!("Corpora".parse::<EntityType>(), Ok(EntityType::DataLists));
        assert!("widgets".parse::<EntityType>().is_err());
    }

    #[test]
    fn test_destination_id_json_form() {
        assert_eq!(DestinationId::from("42").to_json(), json!(42));
        assert_eq!(DestinationId::from("OLD-42").to_json(), json!("OLD-42"));
        assert_eq!(
            DestinationId::from_response(&json!({"id": 7})),
            Some(DestinationId::from("7"))
        );
        assert_eq!(DestinationId::from_response(&json!({"errors": {}})), None);
    }
}
