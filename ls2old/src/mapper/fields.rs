//! LingSync document accessors and value formatting shared by every stage

use chrono::{DateTime, NaiveDate};
use serde_json::Value;

/// Placeholder for values the OLD requires but LingSync left empty
pub const PLACEHOLDER: &str = "PLACEHOLDER";

/// Email given to users created without one
pub const FAKE_EMAIL: &str = "fakeemail@gmail.com";

/// Password given to every migrated user
pub const DEFAULT_PASSWORD: &str = "password9_B";

/// Default OLD string column width
pub const MAX_SHORT: usize = 255;

/// OLD `syntax` column width
pub const MAX_SYNTAX: usize = 1023;

/// Attributes that hold `[{label, value}]` field arrays
const FIELD_ARRAYS: [&str; 3] = ["datumFields", "sessionFields", "fields"];

/// CouchDB `_id`, falling back to `id`
pub fn source_id(doc: &Value) -> Option<String> {
    ["_id", "id"].iter().find_map(|k| match doc.get(*k)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// The `{label, value}` object for `label` in any of the document's field arrays
pub fn field_entry<'a>(doc: &'a Value, label: &str) -> Option<&'a Value> {
    FIELD_ARRAYS
        .iter()
        .filter_map(|attr| doc.get(*attr).and_then(Value::as_array))
        .flatten()
        .find(|f| f.get("label").and_then(Value::as_str) == Some(label))
}

/// Raw value of the first present label: field arrays first, then top-level
/// attributes
pub fn raw_field<'a>(doc: &'a Value, labels: &[&str]) -> Option<&'a Value> {
    for label in labels {
        if let Some(entry) = field_entry(doc, label) {
            match entry.get("value") {
                Some(Value::Null) | None => {}
                Some(value) => return Some(value),
            }
            if let Some(mask) = entry.get("mask") {
                return Some(mask);
            }
        }
    }
    labels
        .iter()
        .find_map(|label| doc.get(*label).filter(|v| !v.is_null()))
}

/// Trimmed, non-empty string value of the first present label
pub fn text_field(doc: &Value, labels: &[&str]) -> Option<String> {
    raw_field(doc, labels).and_then(as_text)
}

/// Whether any of `labels` is present at all (even empty)
pub fn has_field(doc: &Value, labels: &[&str]) -> bool {
    labels
        .iter()
        .any(|l| field_entry(doc, l).is_some() || doc.get(*l).is_some())
}

/// Trimmed top-level string attribute
pub fn text_attr(doc: &Value, attr: &str) -> Option<String> {
    doc.get(attr).and_then(as_text)
}

/// Non-empty trimmed string; numbers are rendered
pub fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Whether a JSON value carries content
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

/// `trashed: "deleted"`
pub fn is_trashed(doc: &Value) -> bool {
    doc.get("trashed").and_then(Value::as_str) == Some("deleted")
}

/// End with a period unless sentence-final punctuation is already present
pub fn punctuate(text: &str) -> String {
    match text.chars().last() {
        Some('.') | Some('?') | Some('!') | None => text.to_string(),
        Some(_) => format!("{}.", text),
    }
}

/// Truncate to `max` characters; the flag reports whether anything was cut
pub fn truncate(text: &str, max: usize) -> (String, bool) {
    match text.char_indices().nth(max) {
        Some((byte_index, _)) => (text[..byte_index].to_string(), true),
        None => (text.to_string(), false),
    }
}

/// `YYYY-MM-DD` or `MM/DD/YYYY` → `MM/DD/YYYY`
pub fn format_date_elicited(raw: &str) -> Option<String> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%m/%d/%Y"))
        .ok()
        .map(|d| d.format("%m/%d/%Y").to_string())
}

/// Millisecond epoch timestamp → `YYYY-MM-DD HH:MM` (UTC)
pub fn timestamp_to_human(value: &Value) -> Option<String> {
    let millis = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?,
        Value::String(s) => s.trim().parse::<i64>().ok()?,
        _ => return None,
    };
    DateTime::from_timestamp_millis(millis).map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
}

/// Render LingSync comments (an array of comment objects or a plain string)
///
/// Returns the rendered paragraphs plus descriptions of entries that could
/// not be used.
pub fn render_comments(value: &Value) -> (Vec<String>, Vec<String>) {
    let mut rendered = Vec::new();
    let mut unusable = Vec::new();

    match value {
        Value::Array(items) => {
            for item in items {
                let Some(text) = item.get("text").and_then(as_text) else {
                    unusable.push(item.to_string());
                    continue;
                };
                let author = item
                    .get("username")
                    .and_then(as_text)
                    .map(|u| format!(" by {}", u))
                    .unwrap_or_default();
                let created = item
                    .get("dateCreated")
                    .and_then(timestamp_to_human)
                    .map(|d| format!(" on {}", d))
                    .unwrap_or_default();
                let modified = item
                    .get("timestampModified")
                    .and_then(timestamp_to_human)
                    .map(|d| format!(" (last modified {})", d))
                    .unwrap_or_default();
                rendered.push(format!(
                    "Comment{}{}{}: {}",
                    author,
                    created,
                    modified,
                    punctuate(&text)
                ));
            }
        }
        Value::String(s) if !s.trim().is_empty() => {
            rendered.push(format!("Comment: {}", punctuate(s.trim())));
        }
        _ => {}
    }

    (rendered, unusable)
}

/// Strip everything but word characters from a username
pub fn clean_username(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .collect()
}

/// First and last name parsed from a free-form consultants value
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SpeakerName {
    pub first_name: String,
    pub last_name: String,
}

impl SpeakerName {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

fn is_capitalized_word(word: &str) -> bool {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.is_uppercase() && chars.all(|c| !c.is_uppercase()),
        None => false,
    }
}

/// Parse a consultants value
///
/// Two capitalized words are one speaker (first, last). Otherwise each
/// whitespace token is a speaker: an all-caps token is initials (first
/// character, remainder), any other token is both first and last name.
pub fn parse_consultants(raw: &str) -> Vec<SpeakerName> {
    let tokens: Vec<&str> = raw.split_whitespace().collect();

    if tokens.len() == 2 && tokens.iter().all(|t| is_capitalized_word(t)) {
        return vec![SpeakerName {
            first_name: tokens[0].to_string(),
            last_name: tokens[1].to_string(),
        }];
    }

    tokens
        .into_iter()
        .map(|token| {
            if token.to_uppercase() == token {
                let mut chars = token.chars();
                let first = chars.next().map(String::from).unwrap_or_default();
                SpeakerName {
                    first_name: first,
                    last_name: chars.collect(),
                }
            } else {
                SpeakerName {
                    first_name: token.to_string(),
                    last_name: token.to_string(),
                }
            }
        })
        .collect()
}

/// Consultants and dialect of a session document (or a datum's embedded
/// session)
pub fn session_speakers(session: &Value) -> (Vec<SpeakerName>, Option<String>) {
    let speakers = text_field(session, &["consultants"])
        .map(|c| parse_consultants(&c))
        .unwrap_or_default();
    let dialect = text_field(session, &["dialect"]);
    (speakers, dialect)
}
