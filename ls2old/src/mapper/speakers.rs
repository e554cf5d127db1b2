//! Speakers stage
//!
//! Explicit speaker (consultant) documents plus speakers parsed from the
//! `consultants` value of sessions and of the sessions embedded in datums.

use super::fields::{self, SpeakerName, MAX_SHORT};
use super::{
    consolidate, documents_with_ids, mapping_error, report_unknown_attributes,
    report_unknown_labels, DocOutcome, DocResult, StageContext,
};
use crate::models::{ConvertedResource, EntityType, ProvisionalKey};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;

const KNOWN_ATTRS: &[&str] = &[
    "_id", "_rev", "id", "api", "collection", "dateCreated", "dateModified", "dbname",
    "description", "dialect", "fieldDBtype", "fields", "first_name", "firstname", "last_name",
    "lastname", "pouchname", "timestamp", "version",
];

const KNOWN_LABELS: &[&str] = &[
    "firstname", "lastname", "first_name", "last_name", "dialect", "description", "username",
    "anonymousCode",
];

pub fn derived_speaker_id(name: &SpeakerName) -> String {
    format!("name:{}", name.full_name())
}

fn speaker_payload(name: &SpeakerName, dialect: &str, page_content: &str) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert("first_name".into(), json!(fields::truncate(&name.first_name, MAX_SHORT).0));
    payload.insert("last_name".into(), json!(fields::truncate(&name.last_name, MAX_SHORT).0));
    payload.insert("dialect".into(), json!(fields::truncate(dialect, MAX_SHORT).0));
    payload.insert("markup_language".into(), json!("reStructuredText"));
    payload.insert("page_content".into(), json!(page_content));
    payload
}

fn explicit_speaker(ctx: &mut StageContext<'_>, source_id: &str, doc: &Value) -> DocResult {
    report_unknown_attributes(ctx, doc, source_id, KNOWN_ATTRS);
    report_unknown_labels(ctx, doc, source_id, &["fields"], KNOWN_LABELS);

    let first = fields::text_field(doc, &["first_name", "firstname"]);
    let last = fields::text_field(doc, &["last_name", "lastname"]);
    let name = match (first, last) {
        (Some(first_name), Some(last_name)) => SpeakerName {
            first_name,
            last_name,
        },
        (Some(only), None) | (None, Some(only)) => {
            ctx.note(
                source_id,
                format!("speaker has a single name '{}'; used as first and last name", only),
            );
            SpeakerName {
                first_name: only.clone(),
                last_name: only,
            }
        }
        (None, None) => {
            return Err(mapping_error(
                EntityType::Speakers,
                source_id,
                "speaker has neither a first nor a last name",
            ))
        }
    };

    let dialect = fields::text_field(doc, &["dialect"]).unwrap_or_default();
    let page_content = fields::text_field(doc, &["description"]).unwrap_or_default();

    let resource = ConvertedResource::new(
        ProvisionalKey::new(EntityType::Speakers, source_id),
        speaker_payload(&name, &dialect, &page_content),
    )
    .with_natural_key(name.full_name());
    Ok(DocOutcome::Converted(resource))
}

pub(crate) fn convert(ctx: &mut StageContext<'_>) {
    let raw = ctx.raw;

    for (source_id, doc) in documents_with_ids(raw, EntityType::Speakers) {
        match source_id {
            Some(id) => {
                let result = explicit_speaker(ctx, &id, doc);
                ctx.push(&id, result);
            }
            None => ctx.push(
                "",
                Err(mapping_error(EntityType::Speakers, "", "document has no id")),
            ),
        }
    }
    consolidate(ctx);

    let mut known: BTreeSet<String> = ctx
        .set
        .resources
        .iter()
        .filter_map(|r| r.natural_key.clone())
        .collect();

    let sessions = raw.documents(EntityType::Sessions).iter().chain(
        raw.documents(EntityType::Datums)
            .iter()
            .filter_map(|datum| datum.get("session")),
    );

    for session in sessions {
        let (speakers, dialect) = fields::session_speakers(session);
        for name in speakers {
            if !known.insert(name.full_name()) {
                continue;
            }
            let resource = ConvertedResource::new(
                ProvisionalKey::new(EntityType::Speakers, derived_speaker_id(&name)),
                speaker_payload(&name, dialect.as_deref().unwrap_or_default(), ""),
            )
            .with_natural_key(name.full_name());
            ctx.set.resources.push(resource);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConversionOptions;
    use crate::mapper;
    use crate::models::{ConvertedResourceSet, RawCorpus, RawDocumentSet};
    use crate::services::identifier_map::IdentifierMap;

    fn convert_speakers(speakers: Vec<Value>, sessions: Vec<Value>, datums: Vec<Value>) -> ConvertedResourceSet {
        let mut raw = RawCorpus::new();
        for (entity_type, documents) in [
            (EntityType::Speakers, speakers),
            (EntityType::Sessions, sessions),
            (EntityType::Datums, datums),
        ] {
            raw.insert(RawDocumentSet {
                corpus: "c".into(),
                entity_type,
                documents,
            });
        }
        let mut ids = IdentifierMap::in_memory();
        mapper::convert(EntityType::Speakers, &raw, &mut ids, &ConversionOptions::new("c"))
    }

    #[test]
    fn test_explicit_speaker_from_fields() {
        let set = convert_speakers(
            vec![json!({
                "_id": "sp1",
                "fields": [
                    {"label": "firstname", "value": "Mary"},
                    {"label": "lastname", "value": "Smith"},
                    {"label": "dialect", "value": "Coastal"}
                ]
            })],
            vec![],
            vec![],
        );
        let speaker = &set.resources[0];
        assert_eq!(speaker.payload["first_name"], "Mary");
        assert_eq!(speaker.payload["last_name"], "Smith");
        assert_eq!(speaker.payload["dialect"], "Coastal");
        assert_eq!(speaker.natural_key.as_deref(), Some("Mary Smith"));
    }

    #[test]
    fn test_single_name_is_copied() {
        let set = convert_speakers(vec![json!({"_id": "sp1", "firstname": "Mary"})], vec![], vec![]);
        assert_eq!(set.resources[0].payload["last_name"], "Mary");

        let set = convert_speakers(vec![json!({"_id": "sp2"})], vec![], vec![]);
        assert!(set.resources.is_empty());
        assert_eq!(set.skipped_documents[0].source_id, "sp2");
    }

    #[test]
    fn test_derived_speakers_from_sessions_and_datums() {
        let set = convert_speakers(
            vec![json!({"_id": "sp1", "firstname": "Mary", "lastname": "Smith"})],
            vec![json!({
                "_id": "s1",
                "sessionFields": [
                    {"label": "consultants", "value": "Mary Smith"},
                    {"label": "dialect", "value": "Inland"}
                ]
            })],
            vec![json!({
                "_id": "d1",
                "session": {"_id": "s2", "sessionFields": [{"label": "consultants", "value": "DS"}]}
            })],
        );

        let keys: Vec<&str> = set.resources.iter().map(|r| r.key.source_id.as_str()).collect();
        assert_eq!(keys, vec!["sp1", "name:D S"]);
        assert_eq!(set.resources[1].payload["first_name"], "D");
        assert_eq!(set.resources[1].payload["dialect"], "");
    }
}
