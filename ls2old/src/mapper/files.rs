//! Files stage
//!
//! Explicit file documents and the `audioVideo` entries of datums. Only
//! metadata is produced here; the binary payload is fetched by the
//! downloader and sent by the uploader.

use super::fields::{self, MAX_SHORT};
use super::{
    consolidate, documents_with_ids, mapping_error, report_unknown_attributes, DocOutcome, DocResult,
    StageContext,
};
use crate::models::{ConvertedResource, EntityType, MediaSource, ProvisionalKey};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;

/// MIME types the OLD accepts
pub const OLD_ALLOWED_MIME_TYPES: &[&str] = &[
    "application/pdf",
    "image/gif",
    "image/jpeg",
    "image/png",
    "audio/mpeg",
    "audio/ogg",
    "audio/x-wav",
    "video/mpeg",
    "video/mp4",
    "video/ogg",
    "video/quicktime",
    "video/x-ms-wmv",
];

const KNOWN_ATTRS: &[&str] = &[
    "_id", "_rev", "id", "dateCreated", "URL", "url", "api", "checksum", "collection", "dbname",
    "description", "fieldDBtype", "fileBaseName", "filename", "mtime", "name", "pouchname",
    "praatAudioExtension", "resultInfo", "resultStatus", "script", "serviceVersion", "size",
    "syllablesAndUtterances", "textGridInfo", "textGridStatus", "textgrid", "timestamp",
    "trashed", "type", "version",
];

pub fn derived_file_id(url: &str) -> String {
    format!("url:{}", url)
}

/// Why a media entry cannot become an OLD file
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Unusable {
    NoUrl,
    Trashed,
    Image(String),
    Disallowed(Option<String>),
}

impl Unusable {
    fn describe(&self) -> String {
        match self {
            Unusable::NoUrl => "media entry has no URL".to_string(),
            Unusable::Trashed => "media entry is trashed".to_string(),
            Unusable::Image(mime) => format!("image files ({}) are not migrated", mime),
            Unusable::Disallowed(Some(mime)) => {
                format!("MIME type {} is not accepted by the OLD", mime)
            }
            Unusable::Disallowed(None) => "MIME type could not be determined".to_string(),
        }
    }
}

/// A media entry that can be migrated
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct UsableMedia {
    pub url: String,
    pub mime_type: String,
}

fn media_url(entry: &Value) -> Option<String> {
    fields::text_attr(entry, "URL").or_else(|| fields::text_attr(entry, "url"))
}

/// Spell a MIME type the way the OLD allow-list does
fn normalize_mime(mime: &str) -> String {
    match mime {
        "audio/wav" | "audio/wave" | "audio/vnd.wave" => "audio/x-wav".to_string(),
        "audio/mp3" => "audio/mpeg".to_string(),
        other => other.to_string(),
    }
}

/// MIME type declared by `type`, else guessed from the filename or URL
fn media_mime_type(entry: &Value, url: &str) -> Option<String> {
    if let Some(declared) = fields::text_attr(entry, "type").filter(|t| t.contains('/')) {
        return Some(normalize_mime(&declared.to_lowercase()));
    }
    let path = url.split(['?', '#']).next().unwrap_or(url);
    fields::text_attr(entry, "filename")
        .and_then(|f| mime_guess::from_path(f).first())
        .or_else(|| mime_guess::from_path(path).first())
        .map(|m| normalize_mime(m.essence_str()))
}

/// Classify a media entry (an explicit file document or a datum `audioVideo` item)
pub(crate) fn usable_media(entry: &Value) -> Result<UsableMedia, Unusable> {
    if fields::is_trashed(entry) {
        return Err(Unusable::Trashed);
    }
    let url = media_url(entry).ok_or(Unusable::NoUrl)?;
    let mime_type = media_mime_type(entry, &url);
    match mime_type {
        Some(mime) if mime.starts_with("image/") => Err(Unusable::Image(mime)),
        Some(mime) if OLD_ALLOWED_MIME_TYPES.contains(&mime.as_str()) => Ok(UsableMedia {
            url,
            mime_type: mime,
        }),
        other => Err(Unusable::Disallowed(other)),
    }
}

/// Media entries of a datum's `audioVideo` attribute
pub(crate) fn datum_media(doc: &Value) -> &[Value] {
    doc.get("audioVideo")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn file_name(entry: &Value, url: &str) -> String {
    let name = fields::text_attr(entry, "filename").unwrap_or_else(|| {
        url.split(['?', '#'])
            .next()
            .and_then(|path| path.rsplit('/').next())
            .filter(|segment| !segment.is_empty())
            .unwrap_or("file")
            .to_string()
    });
    fields::truncate(&name, MAX_SHORT).0
}

fn file_resource(key: ProvisionalKey, entry: &Value, media: UsableMedia) -> ConvertedResource {
    let filename = file_name(entry, &media.url);

    let mut description = vec![format!(
        "This file was generated from the LingSync audio/video file stored at {}.",
        media.url
    )];
    if let Some(text) = fields::text_attr(entry, "description") {
        description.push(text);
    }
    if let Some(created) = fields::text_attr(entry, "dateCreated") {
        description.push(format!("This file was created on LingSync at {}.", created));
    }

    let mut payload = Map::new();
    payload.insert("filename".into(), json!(filename));
    payload.insert("MIME_type".into(), json!(media.mime_type));
    payload.insert("description".into(), json!(description.join("\n\n")));

    let mut resource = ConvertedResource::new(key, payload).with_natural_key(media.url.clone());
    resource.media = Some(MediaSource {
        url: media.url,
        filename,
        mime_type: media.mime_type,
        declared_size: entry.get("size").and_then(Value::as_u64),
    });
    resource
}

fn explicit_file(ctx: &mut StageContext<'_>, source_id: &str, doc: &Value) -> DocResult {
    report_unknown_attributes(ctx, doc, source_id, KNOWN_ATTRS);

    match usable_media(doc) {
        Ok(media) => Ok(DocOutcome::Converted(file_resource(
            ProvisionalKey::new(EntityType::Files, source_id),
            doc,
            media,
        ))),
        Err(Unusable::NoUrl) => Err(mapping_error(EntityType::Files, source_id, "file has no URL")),
        Err(other) => Ok(DocOutcome::Skipped(other.describe())),
    }
}

pub(crate) fn convert(ctx: &mut StageContext<'_>) {
    let raw = ctx.raw;

    for (source_id, doc) in documents_with_ids(raw, EntityType::Files) {
        match source_id {
            Some(id) => {
                let result = explicit_file(ctx, &id, doc);
                ctx.push(&id, result);
            }
            None => ctx.push(
                "",
                Err(mapping_error(EntityType::Files, "", "document has no id")),
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
        if fields::is_trashed(doc) {
            continue;
        }
        let datum_id = fields::source_id(doc).unwrap_or_default();
        for entry in datum_media(doc) {
            match usable_media(entry) {
                Ok(media) => {
                    if !known.insert(media.url.clone()) {
                        continue;
                    }
                    let key = ProvisionalKey::new(EntityType::Files, derived_file_id(&media.url));
                    ctx.set.resources.push(file_resource(key, entry, media));
                }
                Err(Unusable::Trashed) => {}
                Err(reason) => ctx.skipped_field(&datum_id, "audioVideo", reason.describe()),
            }
        }
    }
}
