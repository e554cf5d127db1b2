//! Tags stage
//!
//! Explicit tag documents, tags named inside datums, and the migration tag.

use super::fields::{self, MAX_SHORT};
use super::{
    consolidate, documents_with_ids, mapping_error, migration_tag_key, report_unknown_attributes,
    DocOutcome, DocResult, StageContext,
};
use crate::models::{ConvertedResource, EntityType, ProvisionalKey};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;

const KNOWN_ATTRS: &[&str] = &[
    "_id", "_rev", "id", "api", "collection", "dateCreated", "dateModified", "dbname",
    "description", "fieldDBtype", "name", "pouchname", "tag", "timestamp", "version",
];

/// Name of the tag attached to migrated resources
pub fn migration_tag_name(corpus: &str) -> String {
    format!("Migrated from LingSync corpus {}", corpus)
}

/// Source id of a tag derived from a name
pub fn derived_tag_id(name: &str) -> String {
    format!("name:{}", name)
}

/// Tag names a datum carries: whitespace separated `tags` text, `datumTags`
/// objects and a non-`Checked` validation status
pub(crate) fn datum_tag_names(doc: &Value) -> Vec<String> {
    let mut names = Vec::new();

    if let Some(Value::String(text)) = fields::raw_field(doc, &["tags"]) {
        names.extend(text.split_whitespace().map(str::to_string));
    }
    if let Some(Value::Array(items)) = doc.get("tags") {
        names.extend(
            items
                .iter()
                .filter_map(|item| item.get("tag").and_then(fields::as_text)),
        );
    }
    if let Some(Value::Array(items)) = doc.get("datumTags") {
        names.extend(
            items
                .iter()
                .filter_map(|item| item.get("tag").and_then(fields::as_text)),
        );
    }
    if let Some(status) = fields::text_field(doc, &["validationStatus"]) {
        if status != "Checked" {
            names.push(format!("validation status: {}", status));
        }
    }

    names
        .into_iter()
        .map(|n| fields::truncate(n.trim(), MAX_SHORT).0)
        .filter(|n| !n.is_empty())
        .collect()
}

fn tag_payload(name: &str, description: &str) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert("name".into(), json!(name));
    payload.insert("description".into(), json!(description));
    payload
}

fn explicit_tag(ctx: &mut StageContext<'_>, source_id: &str, doc: &Value) -> DocResult {
    report_unknown_attributes(ctx, doc, source_id, KNOWN_ATTRS);

    let raw_name = fields::text_attr(doc, "name")
        .or_else(|| fields::text_attr(doc, "tag"))
        .ok_or_else(|| mapping_error(EntityType::Tags, source_id, "tag has no name"))?;

    let (name, truncated) = fields::truncate(&raw_name, MAX_SHORT);
    let mut description = fields::text_attr(doc, "description").unwrap_or_default();
    if truncated {
        ctx.note(source_id, "name longer than 255 characters was truncated");
        description = [description, format!("Full LingSync tag name: {}", raw_name)]
            .iter()
            .filter(|s| !s.is_empty())
            .cloned()
            .collect::<Vec<_>>()
            .join("\n\n");
    }

    let resource = ConvertedResource::new(
        ProvisionalKey::new(EntityType::Tags, source_id),
        tag_payload(&name, &description),
    )
    .with_natural_key(name);
    Ok(DocOutcome::Converted(resource))
}

pub(crate) fn convert(ctx: &mut StageContext<'_>) {
    let raw = ctx.raw;

    for (source_id, doc) in documents_with_ids(raw, EntityType::Tags) {
        match source_id {
            Some(id) => {
                let result = explicit_tag(ctx, &id, doc);
                ctx.push(&id, result);
            }
            None => ctx.push(
                "",
                Err(mapping_error(EntityType::Tags, "", "document has no id")),
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

    for doc in raw.documents(EntityType::Datums) {
        for name in datum_tag_names(doc) {
            if known.insert(name.clone()) {
                let resource = ConvertedResource::new(
                    ProvisionalKey::new(EntityType::Tags, derived_tag_id(&name)),
                    tag_payload(&name, ""),
                )
                .with_natural_key(name);
                ctx.set.resources.push(resource);
            }
        }
    }

    if ctx.options.migration_tag {
        let name = migration_tag_name(&ctx.options.corpus);
        let description = format!(
            "This tag was created by the migration of LingSync corpus {} to this OLD.",
            ctx.options.corpus
        );
        let resource = ConvertedResource::new(migration_tag_key(), tag_payload(&name, &description))
            .with_natural_key(name);
        ctx.set.resources.push(resource);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConversionOptions;
    use crate::mapper;
    use crate::models::{RawCorpus, RawDocumentSet};
    use crate::services::identifier_map::IdentifierMap;

    fn raw(tags: Vec<Value>, datums: Vec<Value>) -> RawCorpus {
        let mut raw = RawCorpus::new();
        raw.insert(RawDocumentSet {
            corpus: "c".into(),
            entity_type: EntityType::Tags,
            documents: tags,
        });
        raw.insert(RawDocumentSet {
            corpus: "c".into(),
            entity_type: EntityType::Datums,
            documents: datums,
        });
        raw
    }

    #[test]
    fn test_datum_tag_names() {
        let doc = json!({
            "_id": "d1",
            "datumFields": [
                {"label": "tags", "value": "noun  plural"},
                {"label": "validationStatus", "value": "ToBeChecked"}
            ],
            "datumTags": [{"tag": "elicited"}, {"nope": 1}]
        });
        assert_eq!(
            datum_tag_names(&doc),
            vec!["noun", "plural", "elicited", "validation status: ToBeChecked"]
        );

        let checked = json!({"_id": "d2", "validationStatus": "Checked"});
        assert!(datum_tag_names(&checked).is_empty());
    }

    #[test]
    fn test_explicit_tags_win_over_derived() {
        let raw = raw(
            vec![json!({"_id": "t1", "name": "noun", "description": "Nouns"})],
            vec![json!({"_id": "d1", "tags": "noun verb"})],
        );
        let mut ids = IdentifierMap::in_memory();
        let set = mapper::convert(EntityType::Tags, &raw, &mut ids, &ConversionOptions::new("c"));

        let keys: Vec<&str> = set.resources.iter().map(|r| r.key.source_id.as_str()).collect();
        assert_eq!(keys, vec!["t1", "name:verb", "migration"]);
        assert_eq!(
            ids.by_natural_key(EntityType::Tags, "noun"),
            Some(&ProvisionalKey::new(EntityType::Tags, "t1"))
        );
        assert_eq!(
            set.resources[2].payload["name"],
            "Migrated from LingSync corpus c"
        );
    }

    #[test]
    fn test_duplicate_explicit_tags_are_consolidated() {
        let raw = raw(
            vec![
                json!({"_id": "t1", "name": "noun", "description": "first"}),
                json!({"_id": "t2", "name": "noun", "description": "second"}),
                json!({"_id": "t3"}),
            ],
            vec![],
        );
        let mut ids = IdentifierMap::in_memory();
        let mut options = ConversionOptions::new("c");
        options.migration_tag = false;
        let set = mapper::convert(EntityType::Tags, &raw, &mut ids, &options);

        assert_eq!(set.resources.len(), 1);
        assert_eq!(set.resources[0].merged_source_ids, vec!["t2"]);
        assert_eq!(set.resources[0].payload["description"], "first\n\nsecond");
        assert!(ids.is_registered(&ProvisionalKey::new(EntityType::Tags, "t2")));
        assert_eq!(set.skipped_documents.len(), 1);
        assert_eq!(set.skipped_documents[0].source_id, "t3");
    }
}
