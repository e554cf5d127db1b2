//! OLD application settings
//!
//! The OLD validates every form's grammaticality against its newest
//! application settings record, so the settings a corpus needs are derived
//! from it and applied before anything is uploaded.

use crate::models::{DestinationId, Warning};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Attributes the OLD sets itself
const SERVER_ATTRS: &[&str] = &["id", "datetime_modified"];

/// Settings a corpus needs on the destination
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationSettings {
    /// First session language, in input order
    pub object_language_name: Option<String>,
    /// Distinct non-empty form grammaticalities, in input order
    pub grammaticalities: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<Warning>,
}

impl ApplicationSettings {
    /// Payload of a new settings record based on `current`, the newest one
    /// on the destination
    ///
    /// `None` when `current` already names the object language and lists
    /// every grammaticality. Grammaticalities already on the destination are
    /// kept; missing ones are appended.
    pub fn merged_payload(&self, current: Option<&Value>) -> Option<Value> {
        let current_text = |attr: &str| {
            current
                .and_then(|c| c.get(attr))
                .and_then(Value::as_str)
                .unwrap_or_default()
        };

        let existing: Vec<String> = current_text("grammaticalities")
            .split(',')
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .map(str::to_string)
            .collect();
        let missing: Vec<&String> = self
            .grammaticalities
            .iter()
            .filter(|g| !existing.contains(g))
            .collect();
        let language = self
            .object_language_name
            .as_deref()
            .filter(|l| *l != current_text("object_language_name"));

        if missing.is_empty() && language.is_none() {
            return None;
        }

        let mut payload: Map<String, Value> = match current {
            Some(Value::Object(map)) => map
                .iter()
                .filter(|(attr, _)| !SERVER_ATTRS.contains(&attr.as_str()))
                .map(|(attr, value)| (attr.clone(), as_input(value)))
                .collect(),
            _ => Map::new(),
        };
        let merged: Vec<&str> = existing
            .iter()
            .map(String::as_str)
            .chain(missing.into_iter().map(String::as_str))
            .collect();
        payload.insert("grammaticalities".into(), json!(merged.join(",")));
        if let Some(language) = language {
            payload.insert("object_language_name".into(), json!(language));
        }
        Some(Value::Object(payload))
    }
}

/// Related resources come back as objects but are sent as ids
fn as_input(value: &Value) -> Value {
    let id_of = |v: &Value| v.as_object().and_then(|o| o.get("id")).cloned();
    match value {
        Value::Object(_) => id_of(value).unwrap_or_else(|| value.clone()),
        Value::Array(items) if !items.is_empty() && items.iter().all(|i| id_of(i).is_some()) => {
            Value::Array(items.iter().filter_map(id_of).collect())
        }
        other => other.clone(),
    }
}

/// What happened to the settings on the destination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SettingsOutcome {
    Created { destination_id: DestinationId },
    /// The newest settings already had everything
    AlreadyApplied,
    Rejected { error: Value },
}

/// Settings derived for the run and, when uploading, their outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsReport {
    pub settings: ApplicationSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<SettingsOutcome>,
}
