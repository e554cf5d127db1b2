//! Users stage
//!
//! Explicit user documents plus users named by datum `enteredByUser` and
//! session `user` values. Every user gets the administrator role and the
//! default password; missing emails get a placeholder.

use super::fields::{self, DEFAULT_PASSWORD, FAKE_EMAIL, MAX_SHORT};
use super::{
    consolidate, documents_with_ids, mapping_error, report_unknown_attributes, DocOutcome,
    DocResult, StageContext,
};
use crate::models::{ConvertedResource, EntityType, ProvisionalKey};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;

const KNOWN_ATTRS: &[&str] = &[
    "_id", "_rev", "id", "affiliation", "authUrl", "collection", "description", "email",
    "fieldDBtype", "firstname", "gravatar", "lastname", "markAsNeedsToBeSaved",
    "researchInterest", "subtitle", "username", "api", "dbname", "version",
];

pub fn derived_user_id(username: &str) -> String {
    format!("username:{}", username)
}

/// Username named by a datum's `enteredByUser` field
pub(crate) fn datum_enterer(doc: &Value) -> Option<String> {
    let raw = fields::text_field(doc, &["enteredByUser"]).or_else(|| {
        fields::field_entry(doc, "enteredByUser")
            .and_then(|e| e.get("user"))
            .and_then(|u| u.get("username"))
            .and_then(fields::as_text)
    })?;
    let cleaned = fields::clean_username(&raw);
    (!cleaned.is_empty()).then_some(cleaned)
}

/// Username named by a session's `user` field
pub(crate) fn session_user(doc: &Value) -> Option<String> {
    let cleaned = fields::clean_username(&fields::text_field(doc, &["user"])?);
    (!cleaned.is_empty()).then_some(cleaned)
}

fn user_payload(
    username: &str,
    first_name: &str,
    last_name: &str,
    email: &str,
    affiliation: &str,
    page_content: &str,
) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert("username".into(), json!(username));
    payload.insert("password".into(), json!(DEFAULT_PASSWORD));
    payload.insert("password_confirm".into(), json!(DEFAULT_PASSWORD));
    payload.insert("first_name".into(), json!(fields::truncate(first_name, MAX_SHORT).0));
    payload.insert("last_name".into(), json!(fields::truncate(last_name, MAX_SHORT).0));
    payload.insert("email".into(), json!(email));
    payload.insert("affiliation".into(), json!(fields::truncate(affiliation, MAX_SHORT).0));
    payload.insert("role".into(), json!("administrator"));
    payload.insert("markup_language".into(), json!("reStructuredText"));
    payload.insert("page_content".into(), json!(page_content));
    payload
}

fn explicit_user(ctx: &mut StageContext<'_>, source_id: &str, doc: &Value) -> DocResult {
    report_unknown_attributes(ctx, doc, source_id, KNOWN_ATTRS);

    let raw_username = fields::text_attr(doc, "username")
        .ok_or_else(|| mapping_error(EntityType::Users, source_id, "user has no username"))?;
    let username = fields::clean_username(&raw_username);
    if username.is_empty() {
        return Err(mapping_error(
            EntityType::Users,
            source_id,
            &format!("username '{}' has no word characters", raw_username),
        ));
    }
    if username != raw_username {
        ctx.note(
            source_id,
            format!("username '{}' was changed to '{}'", raw_username, username),
        );
    }

    let first_name = fields::text_attr(doc, "firstname").unwrap_or_else(|| username.clone());
    let last_name = fields::text_attr(doc, "lastname").unwrap_or_else(|| username.clone());
    let email = match fields::text_attr(doc, "email") {
        Some(email) => email,
        None => {
            ctx.note(
                source_id,
                format!("user {} has no email; using {}", username, FAKE_EMAIL),
            );
            FAKE_EMAIL.to_string()
        }
    };
    let affiliation = fields::text_attr(doc, "affiliation").unwrap_or_default();

    let mut page_content = Vec::new();
    if let Some(description) = fields::text_attr(doc, "description") {
        page_content.push(description);
    }
    if let Some(interest) = fields::text_attr(doc, "researchInterest") {
        page_content.push(format!("Research interest: {}", fields::punctuate(&interest)));
    }
    if !affiliation.is_empty() {
        page_content.push(format!("Affiliation: {}", fields::punctuate(&affiliation)));
    }

    let resource = ConvertedResource::new(
        ProvisionalKey::new(EntityType::Users, source_id),
        user_payload(
            &username,
            &first_name,
            &last_name,
            &email,
            &affiliation,
            &page_content.join("\n\n"),
        ),
    )
    .with_natural_key(username);
    Ok(DocOutcome::Converted(resource))
}

pub(crate) fn convert(ctx: &mut StageContext<'_>) {
    let raw = ctx.raw;

    for (source_id, doc) in documents_with_ids(raw, EntityType::Users) {
        match source_id {
            Some(id) => {
                let result = explicit_user(ctx, &id, doc);
                ctx.push(&id, result);
            }
            None => ctx.push(
                "",
                Err(mapping_error(EntityType::Users, "", "document has no id")),
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

    let named = raw
        .documents(EntityType::Datums)
        .iter()
        .filter_map(datum_enterer)
        .chain(raw.documents(EntityType::Sessions).iter().filter_map(session_user));

    for username in named {
        if !known.insert(username.clone()) {
            continue;
        }
        let source_id = derived_user_id(&username);
        ctx.note(
            &source_id,
            format!("user {} has no email; using {}", username, FAKE_EMAIL),
        );
        let resource = ConvertedResource::new(
            ProvisionalKey::new(EntityType::Users, source_id),
            user_payload(&username, &username, &username, FAKE_EMAIL, "", ""),
        )
        .with_natural_key(username);
        ctx.set.resources.push(resource);
    }
}
