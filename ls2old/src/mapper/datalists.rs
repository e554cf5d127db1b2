//! DataLists stage: LingSync datalists become OLD corpora

use super::fields::{self, MAX_SHORT};
use super::{
    documents_with_ids, mapping_error, migration_tag_keys, report_unknown_attributes, DocOutcome,
    DocResult, StageContext,
};
use crate::models::{ConvertedResource, EntityType, ProvisionalKey, RefShape};
use serde_json::{json, Map, Value};

const KNOWN_ATTRS: &[&str] = &[
    "_id", "_rev", "id", "audioVideo", "collection", "comments", "dateCreated", "dateModified",
    "datumIds", "description", "pouchname", "timestamp", "title", "api", "dbname",
    "fieldDBtype", "version",
];

fn convert_datalist(ctx: &mut StageContext<'_>, source_id: &str, doc: &Value) -> DocResult {
    report_unknown_attributes(ctx, doc, source_id, KNOWN_ATTRS);

    let name = match fields::text_attr(doc, "title") {
        Some(title) => {
            let (name, truncated) = fields::truncate(&title, MAX_SHORT);
            if truncated {
                ctx.note(source_id, "title longer than 255 characters was truncated");
            }
            name
        }
        None => {
            let generated = format!("Corpus from LingSync datalist {}", source_id);
            ctx.note(
                source_id,
                format!("datalist has no title; the corpus is named '{}'", generated),
            );
            generated
        }
    };

    let mut description = Vec::new();
    if let Some(text) = fields::text_attr(doc, "description") {
        description.push(text);
    }
    let mut metadata = vec![format!(
        "This corpus was generated from LingSync datalist {}.",
        source_id
    )];
    if let Some(created) = fields::text_attr(doc, "dateCreated") {
        metadata.push(format!("It was created in LingSync on {}.", created));
    }
    if let Some(modified) = fields::text_attr(doc, "dateModified") {
        metadata.push(format!("It was last modified in LingSync on {}.", modified));
    }
    description.push(metadata.join(" "));
    if let Some(comments) = doc.get("comments") {
        let (rendered, unusable) = fields::render_comments(comments);
        description.extend(rendered);
        for entry in unusable {
            ctx.note(source_id, format!("unusable comment {}", entry));
        }
    }

    if doc.get("audioVideo").map_or(false, |v| !fields::is_empty_value(v)) {
        ctx.skipped_field(source_id, "audioVideo", "datalist media are not migrated");
    }

    let mut payload = Map::new();
    payload.insert("name".into(), json!(name));
    payload.insert("description".into(), json!(description.join("\n\n")));
    ctx.apply_fallbacks(source_id, &mut payload);

    let datum_keys: Vec<ProvisionalKey> = doc
        .get("datumIds")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(fields::as_text)
        .map(|id| ProvisionalKey::new(EntityType::Datums, id))
        .collect();
    let content = ctx.references(
        source_id,
        "content",
        EntityType::Datums,
        RefShape::CommaSeparated,
        datum_keys,
    );
    let tags = ctx.references(
        source_id,
        "tags",
        EntityType::Tags,
        RefShape::List,
        migration_tag_keys(ctx.options),
    );

    let mut resource = ConvertedResource::new(ProvisionalKey::new(EntityType::DataLists, source_id), payload);
    resource.references.insert("content".into(), content);
    resource.references.insert("tags".into(), tags);
    Ok(DocOutcome::Converted(resource))
}

pub(crate) fn convert(ctx: &mut StageContext<'_>) {
    let raw = ctx.raw;

    for (source_id, doc) in documents_with_ids(raw, EntityType::DataLists) {
        match source_id {
            Some(id) => {
                let result = convert_datalist(ctx, &id, doc);
                ctx.push(&id, result);
            }
            None => ctx.push(
                "",
                Err(mapping_error(EntityType::DataLists, "", "document has no id")),
            ),
        }
    }
}
