//! Datums stage: LingSync datums become OLD forms
//!
//! Values the OLD has no column for (creation metadata, comment objects,
//! notes, untruncated originals) are collected into the form's `comments`.

use super::fields::{self, MAX_SHORT, MAX_SYNTAX, PLACEHOLDER};
use super::files::{datum_media, usable_media};
use super::tags::datum_tag_names;
use super::users::datum_enterer;
use super::{
    documents_with_ids, mapping_error, migration_tag_keys, report_unknown_attributes,
    report_unknown_labels, DocOutcome, DocResult, StageContext,
};
use crate::models::{ConvertedResource, EntityType, ProvisionalKey, RefShape};
use serde_json::{json, Map, Value};

const KNOWN_ATTRS: &[&str] = &[
    "_id", "_rev", "audioVideo", "collection", "comments", "dateEntered", "dateModified",
    "datumFields", "datumTags", "images", "jsonType", "pouchname", "session", "timestamp",
    "trashed", "api", "dateCreated", "dbname", "fieldDBtype", "version",
    // flat exports
    "id", "utterance", "transcription", "morphemes", "morpheme_break", "gloss",
    "morpheme_gloss", "translation", "judgement", "grammaticality", "tags", "phonetic",
    "syntacticTreeLatex", "syntax", "notes", "syntacticCategory", "validationStatus",
    "enteredByUser", "modifiedByUser", "trashedReason", "fields",
];

const KNOWN_LABELS: &[&str] = &[
    "judgement", "morphemes", "utterance", "gloss", "translation", "validationStatus", "tags",
    "syntacticCategory", "syntacticTreeLatex", "enteredByUser", "modifiedByUser", "comments",
    "markAsNeedsToBeSaved", "checked", "notes", "phonetic",
];

const TRANSCRIPTION_LABELS: &[&str] = &["utterance", "transcription"];

/// Characters that make up an OLD grammaticality value
const GRAMMATICALITY_CHARS: [char; 4] = ['*', '?', '#', '!'];

/// Grammaticality of a datum
///
/// Judgements longer than three characters are comments that start with a
/// grammaticality: only the leading grammaticality characters are kept, and
/// the whole judgement is returned for the comments.
pub(crate) fn grammaticality(doc: &Value) -> (String, Option<String>) {
    match fields::text_field(doc, &["judgement", "grammaticality"]) {
        Some(judgement) if judgement.chars().count() > 3 => {
            let prefix = judgement
                .chars()
                .take_while(|c| GRAMMATICALITY_CHARS.contains(c))
                .collect();
            (prefix, Some(judgement))
        }
        Some(judgement) => (judgement, None),
        None => (String::new(), None),
    }
}

/// `dateEntered` as stored by LingSync: an ISO string or epoch milliseconds
pub(crate) fn date_text(value: &Value) -> Option<String> {
    match value {
        Value::Number(_) => fields::timestamp_to_human(value),
        other => fields::as_text(other),
    }
}

/// Sort key of a datum inside its session
pub(crate) fn date_entered(doc: &Value) -> String {
    doc.get("dateEntered")
        .and_then(date_text)
        .unwrap_or_default()
}

fn modified_by(doc: &Value) -> Option<String> {
    fields::text_field(doc, &["modifiedByUser"]).or_else(|| {
        fields::field_entry(doc, "modifiedByUser")?
            .get("users")?
            .as_array()?
            .iter()
            .rev()
            .find_map(|u| u.get("username").and_then(fields::as_text))
    })
}

/// A truncated text column plus the comment that preserves the original
struct Column {
    value: String,
    untruncated: Option<String>,
}

fn column(ctx: &mut StageContext<'_>, source_id: &str, label: &str, raw: Option<String>, max: usize) -> Column {
    let Some(raw) = raw else {
        return Column {
            value: String::new(),
            untruncated: None,
        };
    };
    let (value, truncated) = fields::truncate(&raw, max);
    if truncated {
        ctx.note(
            source_id,
            format!("{} longer than {} characters was truncated", label, max),
        );
    }
    Column {
        value,
        untruncated: truncated.then_some(raw),
    }
}

fn convert_datum(ctx: &mut StageContext<'_>, source_id: &str, doc: &Value) -> DocResult {
    let transcription_fallback = ctx
        .options
        .fallbacks_for(EntityType::Datums)
        .any(|r| r.target == "transcription");
    if !fields::has_field(doc, TRANSCRIPTION_LABELS) && !transcription_fallback {
        return Err(mapping_error(
            EntityType::Datums,
            source_id,
            "datum has no utterance or transcription field",
        ));
    }

    report_unknown_attributes(ctx, doc, source_id, KNOWN_ATTRS);
    report_unknown_labels(ctx, doc, source_id, &["datumFields", "fields"], KNOWN_LABELS);

    let mut comments = Vec::new();

    let transcription = column(ctx, source_id, "utterance", fields::text_field(doc, TRANSCRIPTION_LABELS), MAX_SHORT);
    let morpheme_break = column(ctx, source_id, "morphemes", fields::text_field(doc, &["morphemes", "morpheme_break"]), MAX_SHORT);
    let morpheme_gloss = column(ctx, source_id, "gloss", fields::text_field(doc, &["gloss", "morpheme_gloss"]), MAX_SHORT);
    let phonetic = column(ctx, source_id, "phonetic", fields::text_field(doc, &["phonetic"]), MAX_SHORT);
    let syntax = column(ctx, source_id, "syntacticTreeLatex", fields::text_field(doc, &["syntacticTreeLatex", "syntax"]), MAX_SYNTAX);

    // Speaker: first consultant of the embedded session
    let session = doc.get("session");
    let speakers = session
        .map(|s| fields::session_speakers(s).0)
        .unwrap_or_default();
    if speakers.len() > 1 {
        let names: Vec<String> = speakers.iter().map(|s| s.full_name()).collect();
        comments.push(fields::punctuate(&format!("Consultants: {}", names.join(", "))));
        ctx.note(
            source_id,
            "more than one consultant; only the first becomes the form's speaker",
        );
    }

    let (grammaticality, judgement) = grammaticality(doc);
    if let Some(judgement) = judgement {
        comments.push(fields::punctuate(&format!(
            "Comment from LingSync judgement field: {}",
            judgement
        )));
    }

    let translation = fields::text_field(doc, &["translation"]).unwrap_or_else(|| PLACEHOLDER.to_string());

    // Creation metadata
    let enterer = datum_enterer(doc);
    let entered = doc.get("dateEntered").and_then(date_text);
    let mut metadata = Vec::new();
    if let (Some(user), Some(date)) = (&enterer, &entered) {
        metadata.push(format!(
            "This form was created from LingSync datum {} (in corpus {}), which was created by {} on {}.",
            source_id, ctx.options.corpus, user, date
        ));
    }
    if let (Some(user), Some(date)) = (modified_by(doc), doc.get("dateModified").and_then(date_text)) {
        metadata.push(format!(
            "The datum was last modified in LingSync by {} on {}.",
            user, date
        ));
    }

    let raw_elicited = session.and_then(|s| fields::text_field(s, &["dateElicited"]));
    let date_elicited = match raw_elicited.as_deref().map(|d| (d, fields::format_date_elicited(d))) {
        Some((_, Some(formatted))) => formatted,
        Some((raw, None)) => {
            ctx.note(
                source_id,
                format!("unable to parse elicitation date '{}' as MM/DD/YYYY", raw),
            );
            metadata.push(format!("The datum was elicited on {}.", raw));
            String::new()
        }
        None => String::new(),
    };
    if !metadata.is_empty() {
        comments.push(metadata.join(" "));
    }

    // `comments` can be both a datum field and a top-level attribute
    let comment_values = [
        fields::field_entry(doc, "comments").and_then(|e| e.get("value")),
        doc.get("comments"),
    ];
    for value in comment_values.into_iter().flatten() {
        let (rendered, unusable) = fields::render_comments(value);
        comments.extend(rendered);
        for entry in unusable {
            ctx.note(source_id, format!("unusable comment {}", entry));
        }
    }

    if let Some(notes) = fields::text_field(doc, &["notes"]) {
        comments.push(format!("LingSync notes: {}", fields::punctuate(&notes)));
    }

    let mut errored = Vec::new();
    for (label, column) in [
        ("LingSync datum utterance value", &transcription),
        ("LingSync morphemes value", &morpheme_break),
        ("LingSync phonetic value", &phonetic),
        ("LingSync datum gloss value", &morpheme_gloss),
    ] {
        if let Some(full) = &column.untruncated {
            errored.push(format!("{} without truncation: ‘{}’", label, fields::punctuate(full)));
        }
    }
    if let Some(category) = fields::text_field(doc, &["syntacticCategory"]) {
        errored.push(format!("LingSync syntacticCategory value: ‘{}’", category));
    }
    if let Some(full) = &syntax.untruncated {
        errored.push(format!(
            "LingSync datum syntacticTreeLatex value without truncation: ‘{}’",
            fields::punctuate(full)
        ));
    }
    if !errored.is_empty() {
        comments.push(errored.join(" "));
    }

    if doc.get("images").map_or(false, |v| !fields::is_empty_value(v)) {
        ctx.skipped_field(source_id, "images", "datum images are not migrated");
    }

    let mut payload = Map::new();
    payload.insert("transcription".into(), json!(transcription.value));
    payload.insert("phonetic_transcription".into(), json!(phonetic.value));
    payload.insert("morpheme_break".into(), json!(morpheme_break.value));
    payload.insert("morpheme_gloss".into(), json!(morpheme_gloss.value));
    payload.insert("grammaticality".into(), json!(grammaticality));
    payload.insert(
        "translations".into(),
        json!([{"transcription": translation, "grammaticality": ""}]),
    );
    payload.insert("syntax".into(), json!(syntax.value));
    payload.insert("comments".into(), json!(comments.join("\n\n")));
    payload.insert("status".into(), json!("tested"));
    payload.insert("date_elicited".into(), json!(date_elicited));

    ctx.apply_fallbacks(source_id, &mut payload);
    if payload
        .get("transcription")
        .map_or(true, fields::is_empty_value)
    {
        payload.insert("transcription".into(), json!(PLACEHOLDER));
    }

    let mut resource = ConvertedResource::new(ProvisionalKey::new(EntityType::Datums, source_id), payload);

    // Tags: explicit ids, then names, then the migration tag
    let mut tag_keys: Vec<ProvisionalKey> = doc
        .get("tags")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(|id| ProvisionalKey::new(EntityType::Tags, id))
        .collect();
    tag_keys.extend(
        datum_tag_names(doc)
            .iter()
            .map(|name| ctx.natural_key(EntityType::Tags, "name", name)),
    );
    tag_keys.extend(migration_tag_keys(ctx.options));
    let tags = ctx.references(source_id, "tags", EntityType::Tags, RefShape::List, tag_keys);

    let file_keys: Vec<ProvisionalKey> = datum_media(doc)
        .iter()
        .filter_map(|entry| usable_media(entry).ok())
        .map(|media| ctx.natural_key(EntityType::Files, "url", &media.url))
        .collect();
    let files = ctx.references(source_id, "files", EntityType::Files, RefShape::List, file_keys);

    let speaker_keys: Vec<ProvisionalKey> = speakers
        .first()
        .map(|s| ctx.natural_key(EntityType::Speakers, "name", &s.full_name()))
        .into_iter()
        .collect();
    let speaker = ctx.references(source_id, "speaker", EntityType::Speakers, RefShape::Single, speaker_keys);

    let elicitor_keys: Vec<ProvisionalKey> = enterer
        .map(|u| ctx.natural_key(EntityType::Users, "username", &u))
        .into_iter()
        .collect();
    let elicitor = ctx.references(source_id, "elicitor", EntityType::Users, RefShape::Single, elicitor_keys);

    resource.references.insert("tags".into(), tags);
    resource.references.insert("files".into(), files);
    resource.references.insert("speaker".into(), speaker);
    resource.references.insert("elicitor".into(), elicitor);

    if fields::is_trashed(doc) {
        resource.delete_after_create = true;
        ctx.note(source_id, "datum is trashed; the form will be deleted after creation");
    }

    Ok(DocOutcome::Converted(resource))
}

pub(crate) fn convert(ctx: &mut StageContext<'_>) {
    let raw = ctx.raw;

    for (source_id, doc) in documents_with_ids(raw, EntityType::Datums) {
        match source_id {
            Some(id) => {
                let result = convert_datum(ctx, &id, doc);
                ctx.push(&id, result);
            }
            None => ctx.push(
                "",
                Err(mapping_error(EntityType::Datums, "", "document has no id")),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConversionOptions, FallbackRule};
    use crate::mapper;
    use crate::models::{
        ConvertedResourceSet, DestinationId, RawCorpus, RawDocumentSet, Reference, WarningKind,
    };
    use crate::services::identifier_map::IdentifierMap;

    fn corpus(datums: Vec<Value>) -> RawCorpus {
        let mut raw = RawCorpus::new();
        raw.insert(RawDocumentSet {
            corpus: "c".into(),
            entity_type: EntityType::Datums,
            documents: datums,
        });
        raw
    }

    fn options() -> ConversionOptions {
        let mut options = ConversionOptions::new("c");
        options.migration_tag = false;
        options
    }

    fn convert_one(doc: Value, ids: &mut IdentifierMap, options: &ConversionOptions) -> ConvertedResourceSet {
        mapper::convert(EntityType::Datums, &corpus(vec![doc]), ids, options)
    }

    #[test]
    fn test_flat_datum_with_uploaded_tag() {
        let mut ids = IdentifierMap::in_memory();
        ids.record(&ProvisionalKey::new(EntityType::Tags, "t1"), DestinationId::from("OLD-42"))
            .unwrap();

        let doc = json!({"id": "d1", "transcription": "abc", "morpheme_break": "", "tags": ["t1"]});
        let set = convert_one(doc.clone(), &mut ids, &options());
        let form = &set.resources[0];
        assert_eq!(form.payload["transcription"], "abc");
        assert_eq!(form.payload["morpheme_break"], "");
        assert_eq!(
            form.references["tags"].refs,
            vec![Reference::Resolved(DestinationId::from("OLD-42"))]
        );
        assert!(set.warnings.is_empty());

        let mut with_fallback = options();
        with_fallback.fill_empty = vec!["datums.morpheme_break=transcription".parse::<FallbackRule>().unwrap()];
        let set = convert_one(doc, &mut ids, &with_fallback);
        assert_eq!(set.resources[0].payload["morpheme_break"], "abc");
    }

    #[test]
    fn test_unknown_tag_is_dropped() {
        let mut ids = IdentifierMap::in_memory();
        let set = convert_one(
            json!({"id": "d1", "transcription": "abc", "tags": ["t9"]}),
            &mut ids,
            &options(),
        );
        assert!(set.resources[0].references["tags"].refs.is_empty());
        let dropped: Vec<_> = set
            .warnings
            .iter()
            .filter(|w| w.kind == WarningKind::DroppedReference)
            .collect();
        assert_eq!(dropped.len(), 1);
    }

    #[test]
    fn test_missing_transcription_field_is_a_mapping_error() {
        let mut ids = IdentifierMap::in_memory();
        let set = convert_one(json!({"_id": "d1", "gloss": "x"}), &mut ids, &options());
        assert!(set.resources.is_empty());
        assert_eq!(set.skipped_documents[0].source_id, "d1");

        // Present but empty becomes the placeholder
        let set = convert_one(json!({"_id": "d2", "utterance": ""}), &mut ids, &options());
        assert_eq!(set.resources[0].payload["transcription"], PLACEHOLDER);
        assert_eq!(set.resources[0].payload["translations"][0]["transcription"], PLACEHOLDER);
    }

    #[test]
    fn test_datum_fields_mapping_and_comments() {
        let mut ids = IdentifierMap::in_memory();
        let long = "a".repeat(300);
        let doc = json!({
            "_id": "d1",
            "dateEntered": "2015-04-01T16:50:30.852Z",
            "datumFields": [
                {"label": "utterance", "value": long},
                {"label": "judgement", "value": "*? odd but ok"},
                {"label": "translation", "value": "dog"},
                {"label": "enteredByUser", "value": "alice"},
                {"label": "notes", "value": "check with speaker"},
                {"label": "syntacticCategory", "value": "N"}
            ],
            "session": {"_id": "s1", "sessionFields": [
                {"label": "consultants", "value": "AB CD"},
                {"label": "dateElicited", "value": "2015-03-30"}
            ]},
            "images": [{"URL": "x.png"}]
        });
        let set = convert_one(doc, &mut ids, &options());
        let form = &set.resources[0];

        assert_eq!(form.payload["transcription"].as_str().unwrap().chars().count(), 255);
        assert_eq!(form.payload["grammaticality"], "*?");
        assert_eq!(form.payload["translations"][0]["transcription"], "dog");
        assert_eq!(form.payload["date_elicited"], "03/30/2015");
        assert_eq!(form.payload["status"], "tested");

        let comments = form.payload["comments"].as_str().unwrap();
        assert!(comments.starts_with("Consultants: A B, C D."));
        assert!(comments.contains("Comment from LingSync judgement field: *? odd but ok."));
        assert!(comments.contains(
            "This form was created from LingSync datum d1 (in corpus c), which was created by alice on 2015-04-01T16:50:30.852Z."
        ));
        assert!(comments.contains("LingSync notes: check with speaker."));
        assert!(comments.contains("LingSync datum utterance value without truncation"));
        assert!(comments.contains("LingSync syntacticCategory value: ‘N’"));

        assert!(set
            .warnings
            .iter()
            .any(|w| w.kind == WarningKind::SkippedField && w.field.as_deref() == Some("images")));
    }

    #[test]
    fn test_references_to_earlier_stages() {
        let mut ids = IdentifierMap::in_memory();
        ids.register(ProvisionalKey::new(EntityType::Speakers, "sp1"), Some("Mary Smith"));
        ids.register(ProvisionalKey::new(EntityType::Users, "username:alice"), Some("alice"));
        ids.register(ProvisionalKey::new(EntityType::Files, "url:https://x.org/a.mp3"), Some("https://x.org/a.mp3"));

        let doc = json!({
            "_id": "d1",
            "utterance": "abc",
            "enteredByUser": "alice",
            "audioVideo": [{"URL": "https://x.org/a.mp3"}],
            "session": {"_id": "s1", "sessionFields": [{"label": "consultants", "value": "Mary Smith"}]}
        });
        let set = convert_one(doc, &mut ids, &options());
        let form = &set.resources[0];

        assert_eq!(
            form.references["speaker"].refs,
            vec![Reference::Pending(ProvisionalKey::new(EntityType::Speakers, "sp1"))]
        );
        assert_eq!(
            form.references["elicitor"].refs,
            vec![Reference::Pending(ProvisionalKey::new(EntityType::Users, "username:alice"))]
        );
        assert_eq!(form.references["files"].refs.len(), 1);
        assert!(set.warnings.is_empty());
    }

    #[test]
    fn test_trashed_datum_is_deleted_after_create() {
        let mut ids = IdentifierMap::in_memory();
        let set = convert_one(
            json!({"_id": "d1", "utterance": "abc", "trashed": "deleted"}),
            &mut ids,
            &options(),
        );
        assert!(set.resources[0].delete_after_create);
    }
}
