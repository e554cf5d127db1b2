//! Sessions stage: LingSync sessions become OLD elicitation collections
//!
//! A collection's `contents` lists the session's forms in the order they
//! were entered in LingSync.

use super::datums::{date_entered, date_text};
use super::fields::{self, MAX_SHORT};
use super::users::session_user;
use super::{
    documents_with_ids, mapping_error, migration_tag_keys, report_unknown_attributes,
    report_unknown_labels, DocOutcome, DocResult, StageContext,
};
use crate::models::{ConvertedResource, EntityType, ProvisionalKey, RefShape};
use serde_json::{json, Map, Value};

const KNOWN_ATTRS: &[&str] = &[
    "_id", "_rev", "id", "collection", "comments", "dateCreated", "dateModified",
    "lastModifiedBy", "pouchname", "sessionFields", "title", "timestamp", "api", "dbname",
    "fieldDBtype", "fields", "modifiedByUser", "version", "dialect", "language", "trashed",
    "trashedReason",
];

const KNOWN_LABELS: &[&str] = &[
    "goal", "consultants", "dialect", "language", "dateElicited", "user", "dateSEntered",
    "participants", "DateSessionEntered", "dateSessionEntered",
];

/// Attributes a session may carry that the OLD collection cannot hold
const UNSUPPORTED_ATTRS: &[&str] = &["tags", "images", "audioVideo"];

fn has_field_array(doc: &Value) -> bool {
    ["sessionFields", "fields"].iter().any(|attr| {
        doc.get(*attr)
            .and_then(Value::as_array)
            .map_or(false, |a| !a.is_empty())
    })
}

/// Ids of a session's non-trashed datums, ordered by date entered
fn session_datum_ids(datums: &[Value], session_id: &str) -> Vec<String> {
    let mut members: Vec<(String, String)> = datums
        .iter()
        .filter(|d| !fields::is_trashed(d))
        .filter(|d| {
            d.get("session")
                .and_then(fields::source_id)
                .map_or(false, |id| id == session_id)
        })
        .filter_map(|d| fields::source_id(d).map(|id| (date_entered(d), id)))
        .collect();
    members.sort();
    members.into_iter().map(|(_, id)| id).collect()
}

fn convert_session(ctx: &mut StageContext<'_>, source_id: &str, doc: &Value) -> DocResult {
    if fields::is_trashed(doc) {
        return Ok(DocOutcome::Skipped("session is trashed".to_string()));
    }
    if !has_field_array(doc) {
        return Err(mapping_error(
            EntityType::Sessions,
            source_id,
            "session has neither sessionFields nor fields",
        ));
    }

    let unsupported: Vec<&str> = UNSUPPORTED_ATTRS
        .iter()
        .copied()
        .filter(|attr| doc.get(*attr).is_some())
        .collect();
    for attr in &unsupported {
        if doc.get(*attr).map_or(false, |v| !fields::is_empty_value(v)) {
            ctx.skipped_field(source_id, attr, "sessions do not carry this into collections");
        }
    }
    let known: Vec<&str> = KNOWN_ATTRS.iter().copied().chain(unsupported).collect();
    report_unknown_attributes(ctx, doc, source_id, &known);
    report_unknown_labels(ctx, doc, source_id, &["sessionFields", "fields"], KNOWN_LABELS);

    let goal = fields::text_field(doc, &["goal"]);
    let consultants = fields::text_field(doc, &["consultants"]);
    let raw_elicited = fields::text_field(doc, &["dateElicited"]);
    let user = session_user(doc);
    let dialect = fields::text_field(doc, &["dialect"]);
    let language = fields::text_field(doc, &["language"]);

    let title = match (&goal, &raw_elicited) {
        (Some(goal), _) => {
            let (title, truncated) = fields::truncate(goal, MAX_SHORT);
            if truncated {
                ctx.note(source_id, "goal longer than 255 characters was truncated in the title");
            }
            title
        }
        (None, Some(date)) => {
            ctx.note(source_id, "session has no goal; its elicitation date names the collection");
            fields::truncate(&format!("Elicitation Session on {}", date), MAX_SHORT).0
        }
        (None, None) => {
            ctx.note(source_id, "session has neither goal nor date; its id names the collection");
            fields::truncate(&format!("Elicitation Session {}", source_id), MAX_SHORT).0
        }
    };

    let mut description = vec![format!(
        "This collection was created from a LingSync session with id {}.",
        source_id
    )];
    for (label, value) in [
        ("Goal", &goal),
        ("Consultants", &consultants),
        ("Language", &language),
        ("Dialect", &dialect),
        ("Elicitation session date", &raw_elicited),
    ] {
        if let Some(value) = value {
            description.push(format!("{}: {}", label, fields::punctuate(value)));
        }
    }
    let mut metadata = Vec::new();
    if let (Some(user), Some(date)) = (&user, doc.get("dateCreated").and_then(date_text)) {
        metadata.push(format!("Session created in LingSync by {} on {}.", user, date));
    }
    if let (Some(by), Some(date)) = (
        fields::text_attr(doc, "lastModifiedBy"),
        doc.get("dateModified").and_then(date_text),
    ) {
        metadata.push(format!("Session last modified in LingSync by {} on {}.", by, date));
    }
    if !metadata.is_empty() {
        description.push(metadata.join(" "));
    }
    if let Some(comments) = doc.get("comments") {
        let (rendered, unusable) = fields::render_comments(comments);
        description.extend(rendered);
        for entry in unusable {
            ctx.note(source_id, format!("unusable comment {}", entry));
        }
    }

    let date_elicited = raw_elicited
        .as_deref()
        .and_then(fields::format_date_elicited)
        .unwrap_or_default();

    let mut payload = Map::new();
    payload.insert("title".into(), json!(title));
    payload.insert("type".into(), json!("elicitation"));
    payload.insert("description".into(), json!(description.join("\n\n")));
    payload.insert("date_elicited".into(), json!(date_elicited));
    payload.insert("markup_language".into(), json!("reStructuredText"));
    ctx.apply_fallbacks(source_id, &mut payload);

    let speakers = fields::session_speakers(doc).0;
    if speakers.len() > 1 {
        ctx.note(
            source_id,
            "more than one consultant; only the first becomes the collection's speaker",
        );
    }
    let speaker_keys: Vec<ProvisionalKey> = speakers
        .first()
        .map(|s| ctx.natural_key(EntityType::Speakers, "name", &s.full_name()))
        .into_iter()
        .collect();
    let speaker = ctx.references(source_id, "speaker", EntityType::Speakers, RefShape::Single, speaker_keys);

    let elicitor_keys: Vec<ProvisionalKey> = user
        .map(|u| ctx.natural_key(EntityType::Users, "username", &u))
        .into_iter()
        .collect();
    let elicitor = ctx.references(source_id, "elicitor", EntityType::Users, RefShape::Single, elicitor_keys);

    let form_keys: Vec<ProvisionalKey> = session_datum_ids(ctx.raw.documents(EntityType::Datums), source_id)
        .into_iter()
        .map(|id| ProvisionalKey::new(EntityType::Datums, id))
        .collect();
    let contents = ctx.references(source_id, "contents", EntityType::Datums, RefShape::FormMarkup, form_keys);

    let tags = ctx.references(
        source_id,
        "tags",
        EntityType::Tags,
        RefShape::List,
        migration_tag_keys(ctx.options),
    );

    let mut resource = ConvertedResource::new(ProvisionalKey::new(EntityType::Sessions, source_id), payload);
    resource.references.insert("speaker".into(), speaker);
    resource.references.insert("elicitor".into(), elicitor);
    resource.references.insert("contents".into(), contents);
    resource.references.insert("tags".into(), tags);
    Ok(DocOutcome::Converted(resource))
}

pub(crate) fn convert(ctx: &mut StageContext<'_>) {
    let raw = ctx.raw;

    for (source_id, doc) in documents_with_ids(raw, EntityType::Sessions) {
        match source_id {
            Some(id) => {
                let result = convert_session(ctx, &id, doc);
                ctx.push(&id, result);
            }
            None => ctx.push(
                "",
                Err(mapping_error(EntityType::Sessions, "", "document has no id")),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConversionOptions;
    use crate::mapper;
    use crate::models::{RawCorpus, RawDocumentSet, Reference, WarningKind};
    use crate::services::identifier_map::IdentifierMap;

    fn datum(id: &str, session: &str, entered: &str) -> Value {
        json!({
            "_id": id,
            "utterance": id,
            "dateEntered": entered,
            "session": {"_id": session, "sessionFields": []}
        })
    }

    #[test]
    fn test_session_datum_ids_are_ordered_by_date_entered() {
        let mut trashed = datum("d4", "s1", "2015-01-01");
        trashed["trashed"] = json!("deleted");
        let datums = vec![
            datum("d1", "s1", "2015-03-01"),
            datum("d2", "s1", "2015-01-01"),
            datum("d3", "s2", "2015-01-01"),
            trashed,
        ];
        assert_eq!(session_datum_ids(&datums, "s1"), vec!["d2", "d1"]);
    }

    #[test]
    fn test_session_becomes_collection() {
        let mut raw = RawCorpus::new();
        raw.insert(RawDocumentSet {
            corpus: "c".into(),
            entity_type: EntityType::Datums,
            documents: vec![datum("d1", "s1", "2015-03-01"), datum("d2", "s1", "2015-01-01")],
        });
        raw.insert(RawDocumentSet {
            corpus: "c".into(),
            entity_type: EntityType::Sessions,
            documents: vec![
                json!({
                    "_id": "s1",
                    "sessionFields": [
                        {"label": "goal", "value": "Nouns"},
                        {"label": "consultants", "value": "Mary Smith"},
                        {"label": "dateElicited", "value": "2015-03-30"},
                        {"label": "user", "value": "alice"}
                    ],
                    "dialect": "Coastal",
                    "images": [{"URL": "a.png"}]
                }),
                json!({"_id": "s2", "sessionFields": [{"label": "dateElicited", "value": "2015-04-01"}], "trashed": "deleted"}),
                json!({"_id": "s3", "sessionFields": [{"label": "dateElicited", "value": "April"}]}),
                json!({"_id": "s4"}),
            ],
        });

        let mut ids = IdentifierMap::in_memory();
        let mut options = ConversionOptions::new("c");
        options.migration_tag = false;
        mapper::convert(EntityType::Datums, &raw, &mut ids, &options);
        let set = mapper::convert(EntityType::Sessions, &raw, &mut ids, &options);

        assert_eq!(set.resources.len(), 2);
        let collection = &set.resources[0];
        assert_eq!(collection.payload["title"], "Nouns");
        assert_eq!(collection.payload["type"], "elicitation");
        assert_eq!(collection.payload["date_elicited"], "03/30/2015");
        assert_eq!(
            collection.payload["description"],
            "This collection was created from a LingSync session with id s1.\n\nGoal: Nouns.\n\nConsultants: Mary Smith.\n\nDialect: Coastal.\n\nElicitation session date: 2015-03-30."
        );
        assert_eq!(
            collection.references["contents"].refs,
            vec![
                Reference::Pending(ProvisionalKey::new(EntityType::Datums, "d2")),
                Reference::Pending(ProvisionalKey::new(EntityType::Datums, "d1")),
            ]
        );
        assert!(set
            .warnings
            .iter()
            .any(|w| w.kind == WarningKind::SkippedField && w.field.as_deref() == Some("images")));

        let undated = &set.resources[1];
        assert_eq!(undated.payload["title"], "Elicitation Session on April");
        assert_eq!(undated.payload["date_elicited"], "");

        let skipped: Vec<&str> = set.skipped_documents.iter().map(|s| s.source_id.as_str()).collect();
        assert_eq!(skipped, vec!["s2", "s4"]);
    }

    #[test]
    fn test_trashed_session_without_fields_is_skipped_as_trashed() {
        let mut raw = RawCorpus::new();
        raw.insert(RawDocumentSet {
            corpus: "c".into(),
            entity_type: EntityType::Sessions,
            documents: vec![json!({"_id": "s9", "trashed": "deleted"})],
        });

        let mut options = ConversionOptions::new("c");
        options.migration_tag = false;
        let set = mapper::convert(EntityType::Sessions, &raw, &mut IdentifierMap::in_memory(), &options);

        assert!(set.resources.is_empty());
        assert_eq!(set.skipped_documents.len(), 1);
        assert_eq!(set.skipped_documents[0].source_id, "s9");
        assert_eq!(set.skipped_documents[0].reason, "session is trashed");
    }
}
