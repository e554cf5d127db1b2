//! Application settings a corpus needs on the OLD
//!
//! Derived from the raw sets rather than the converted ones, so they can be
//! applied before the first resource is uploaded.

use super::datums::grammaticality;
use super::{documents_with_ids, fields};
use crate::models::{ApplicationSettings, EntityType, RawCorpus, Warning};
use tracing::debug;

pub fn application_settings(raw: &RawCorpus) -> ApplicationSettings {
    let mut settings = ApplicationSettings::default();

    for doc in raw.documents(EntityType::Datums) {
        let (value, _) = grammaticality(doc);
        if !value.is_empty() && !settings.grammaticalities.contains(&value) {
            settings.grammaticalities.push(value);
        }
    }

    let mut others: Vec<(String, String)> = Vec::new();
    for (source_id, doc) in documents_with_ids(raw, EntityType::Sessions) {
        if fields::is_trashed(doc) {
            continue;
        }
        let Some(language) = fields::text_field(doc, &["language"]) else {
            continue;
        };
        let Some(chosen) = settings.object_language_name.as_ref() else {
            settings.object_language_name = Some(language);
            continue;
        };
        if *chosen != language && !others.iter().any(|(l, _)| *l == language) {
            others.push((language, source_id.unwrap_or_default()));
        }
    }

    if let Some(chosen) = &settings.object_language_name {
        for (language, source_id) in &others {
            settings.warnings.push(
                Warning::note(
                    EntityType::Sessions,
                    source_id,
                    format!(
                        "'{}' was chosen as the OLD object language; this session lists '{}'",
                        chosen, language
                    ),
                )
                .with_field("language"),
            );
        }
    }

    debug!(
        language = ?settings.object_language_name,
        grammaticalities = settings.grammaticalities.len(),
        "Derived application settings"
    );
    settings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RawDocumentSet, WarningKind};
    use serde_json::{json, Value};

    fn corpus(datums: Vec<Value>, sessions: Vec<Value>) -> RawCorpus {
        let mut raw = RawCorpus::new();
        for (entity_type, documents) in [(EntityType::Datums, datums), (EntityType::Sessions, sessions)] {
            raw.insert(RawDocumentSet {
                corpus: "c".into(),
                entity_type,
                documents,
            });
        }
        raw
    }

    fn datum(id: &str, judgement: &str) -> Value {
        json!({"_id": id, "datumFields": [{"label": "judgement", "value": judgement}]})
    }

    fn session(id: &str, language: &str) -> Value {
        json!({"_id": id, "sessionFields": [{"label": "language", "value": language}]})
    }

    #[test]
    fn test_grammaticalities_are_distinct_in_input_order() {
        let raw = corpus(
            vec![
                datum("d1", "?"),
                datum("d2", ""),
                datum("d3", "*"),
                datum("d4", "?"),
                json!({"_id": "d5", "datumFields": []}),
            ],
            vec![],
        );
        let settings = application_settings(&raw);
        assert_eq!(settings.grammaticalities, vec!["?", "*"]);
        assert_eq!(settings.object_language_name, None);
        assert!(settings.warnings.is_empty());
    }

    #[test]
    fn test_long_judgement_contributes_its_prefix() {
        let raw = corpus(
            vec![datum("d1", "#odd in this context"), datum("d2", "speaker hesitated")],
            vec![],
        );
        assert_eq!(application_settings(&raw).grammaticalities, vec!["#"]);
    }

    #[test]
    fn test_first_session_language_is_chosen() {
        let mut trashed = session("s0", "Cree");
        trashed["trashed"] = json!("deleted");
        let raw = corpus(
            vec![],
            vec![
                trashed,
                json!({"_id": "s1", "sessionFields": []}),
                session("s2", "Blackfoot"),
                session("s3", "Blackfoot"),
            ],
        );
        let settings = application_settings(&raw);
        assert_eq!(settings.object_language_name.as_deref(), Some("Blackfoot"));
        assert!(settings.warnings.is_empty());
    }

    #[test]
    fn test_other_languages_are_reported() {
        let raw = corpus(
            vec![],
            vec![
                session("s1", "Blackfoot"),
                session("s2", "Plains Cree"),
                session("s3", "Plains Cree"),
            ],
        );
        let settings = application_settings(&raw);
        assert_eq!(settings.object_language_name.as_deref(), Some("Blackfoot"));
        assert_eq!(settings.warnings.len(), 1);
        let warning = &settings.warnings[0];
        assert_eq!(warning.kind, WarningKind::Note);
        assert_eq!(warning.source_id, "s2");
        assert_eq!(warning.field.as_deref(), Some("language"));
        assert!(warning.message.contains("Plains Cree"));
    }
}
