//! Downloader
//!
//! Pulls every document of one entity type from the source, normalizes the
//! three page shapes CouchDB can answer with, and caches the result. Also
//! fetches media payloads for converted file resources.

use crate::error::{MigrationError, MigrationResult};
use crate::models::{ConvertedResourceSet, EntityType, RawDocumentSet};
use crate::services::cache_store::{write_bytes_atomic, CacheStore};
use crate::types::{PageRequest, SourceApi};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How the next page is requested
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Continuation {
    /// Bare array: the whole result in one page
    Done,
    /// Mango `_find`: `{docs, bookmark}`
    Bookmark(String),
    /// `_all_docs`: `{rows: [{doc}], offset}`
    Skip,
}

/// One normalized page
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub documents: Vec<Value>,
    /// Entries the server returned, kept or not
    pub received: usize,
    pub continuation: Continuation,
}

/// Normalize a raw page body
///
/// Returns `SourceUnavailable` for CouchDB authorization errors and
/// `SourceFormat` for anything that is not a document list.
pub fn normalize_page(entity_type: EntityType, body: Value) -> MigrationResult<Page> {
    let malformed = |reason: &str| MigrationError::SourceFormat {
        entity_type,
        reason: reason.to_string(),
    };

    match body {
        Value::Array(documents) => Ok(Page {
            received: documents.len(),
            documents,
            continuation: Continuation::Done,
        }),
        Value::Object(mut map) => {
            if let Some(error) = map.get("error").and_then(Value::as_str) {
                let reason = map
                    .get("reason")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                return match error {
                    "unauthorized" | "forbidden" => Err(MigrationError::SourceUnavailable(
                        format!("{}: {}", error, reason),
                    )),
                    _ => Err(malformed(&format!("server error '{}': {}", error, reason))),
                };
            }

            if let Some(docs) = map.remove("docs") {
                let Value::Array(documents) = docs else {
                    return Err(malformed("`docs` is not an array"));
                };
                let bookmark = map
                    .get("bookmark")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                return Ok(Page {
                    received: documents.len(),
                    documents,
                    continuation: if bookmark.is_empty() || bookmark == "nil" {
                        Continuation::Done
                    } else {
                        Continuation::Bookmark(bookmark)
                    },
                });
            }

            if let Some(rows) = map.remove("rows") {
                let Value::Array(rows) = rows else {
                    return Err(malformed("`rows` is not an array"));
                };
                let received = rows.len();
                let mut documents = Vec::with_capacity(received);
                for row in rows {
                    match row {
                        Value::Object(mut row) => match row.remove("doc") {
                            Some(doc @ Value::Object(_)) => documents.push(doc),
                            // Deleted documents come back with `doc: null`
                            Some(Value::Null) => {}
                            _ => return Err(malformed("row without `doc` (include_docs missing?)")),
                        },
                        _ => return Err(malformed("row is not an object")),
                    }
                }
                return Ok(Page {
                    documents,
                    received,
                    continuation: Continuation::Skip,
                });
            }

            Err(malformed("expected an array, {docs} or {rows}"))
        }
        _ => Err(malformed("page is not a JSON array or object")),
    }
}

/// Media availability for one converted file resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MediaStatus {
    Local { path: PathBuf, size: u64 },
    TooLarge { size: u64 },
    Unavailable { reason: String },
}

/// Media status per file source id
pub type MediaManifest = BTreeMap<String, MediaStatus>;

pub struct Downloader {
    source: Arc<dyn SourceApi>,
    cache: CacheStore,
    page_size: usize,
    max_file_bytes: u64,
}

impl Downloader {
    pub fn new(
        source: Arc<dyn SourceApi>,
        cache: CacheStore,
        page_size: usize,
        max_file_bytes: u64,
    ) -> Self {
        Self {
            source,
            cache,
            page_size: page_size.max(1),
            max_file_bytes,
        }
    }

    /// Return the cached set unless `force`, otherwise fetch and cache
    pub async fn cached_or_fetch(
        &self,
        corpus: &str,
        entity_type: EntityType,
        force: bool,
    ) -> MigrationResult<RawDocumentSet> {
        if !force {
            if let Some(set) = self.cache.load_raw(entity_type)? {
                debug!(
                    corpus = %corpus,
                    entity = %entity_type,
                    documents = set.len(),
                    "Using cached raw set"
                );
                return Ok(set);
            }
        }
        self.fetch(corpus, entity_type).await
    }

    /// Fetch every page, then replace the cached set
    pub async fn fetch(&self, corpus: &str, entity_type: EntityType) -> MigrationResult<RawDocumentSet> {
        let mut request = PageRequest::first(self.page_size);
        let mut documents = Vec::new();
        let mut discarded = 0usize;
        let mut pages = 0usize;

        loop {
            let body = self
                .source
                .fetch_page(corpus, entity_type, &request)
                .await
                .map_err(|e| e.into_source_error(entity_type))?;
            let page = normalize_page(entity_type, body)?;
            pages += 1;

            let received = page.received;
            for doc in page.documents {
                if EntityType::classify(&doc) == Some(entity_type) {
                    documents.push(doc);
                } else {
                    discarded += 1;
                }
            }
            debug!(
                corpus = %corpus,
                entity = %entity_type,
                page = pages,
                received,
                "Source page received"
            );

            let full_page = received >= request.limit;
            match page.continuation {
                Continuation::Done => break,
                Continuation::Bookmark(bookmark) => {
                    if !full_page || request.bookmark.as_deref() == Some(bookmark.as_str()) {
                        break;
                    }
                    request.bookmark = Some(bookmark);
                }
                Continuation::Skip => {
                    if !full_page {
                        break;
                    }
                    request.skip += received;
                }
            }
        }

        let set = RawDocumentSet {
            corpus: corpus.to_string(),
            entity_type,
            documents,
        };
        self.cache.store_raw(&set)?;

        info!(
            corpus = %corpus,
            entity = %entity_type,
            documents = set.len(),
            discarded,
            pages,
            "Downloaded raw set"
        );
        Ok(set)
    }

    /// Make the media of every converted file resource available locally
    ///
    /// Failures are recorded per file and never abort the run.
    pub async fn fetch_media(
        &self,
        corpus: &str,
        files: &ConvertedResourceSet,
        force_file_download: bool,
    ) -> MigrationResult<MediaManifest> {
        let media_dir = self.cache.media_dir();
        let mut manifest = MediaManifest::new();
        let mut claimed = BTreeSet::new();

        for resource in &files.resources {
            let Some(media) = &resource.media else {
                continue;
            };
            let source_id = resource.key.source_id.clone();

            if let Some(size) = media.declared_size.filter(|s| *s > self.max_file_bytes) {
                manifest.insert(source_id, MediaStatus::TooLarge { size });
                continue;
            }

            let file_name = unique_file_name(&media.filename, &mut claimed);
            let path = media_dir.join(&file_name);

            if !force_file_download {
                if let Ok(meta) = std::fs::metadata(&path) {
                    manifest.insert(source_id, self.local_status(path, meta.len()));
                    continue;
                }
            }

            let status = match self.source.fetch_media(&media.url).await {
                Ok(bytes) if bytes.len() as u64 > self.max_file_bytes => MediaStatus::TooLarge {
                    size: bytes.len() as u64,
                },
                Ok(bytes) => {
                    write_bytes_atomic(&path, &bytes)?;
                    debug!(url = %media.url, path = %path.display(), "Media cached");
                    MediaStatus::Local {
                        path,
                        size: bytes.len() as u64,
                    }
                }
                Err(e) => {
                    warn!(corpus = %corpus, url = %media.url, "Media unavailable: {}", e);
                    MediaStatus::Unavailable {
                        reason: e.to_string(),
                    }
                }
            };
            manifest.insert(source_id, status);
        }

        let local = manifest
            .values()
            .filter(|s| matches!(s, MediaStatus::Local { .. }))
            .count();
        info!(
            corpus = %corpus,
            files = manifest.len(),
            local,
            "Media fetched"
        );
        Ok(manifest)
    }

    fn local_status(&self, path: PathBuf, size: u64) -> MediaStatus {
        if size > self.max_file_bytes {
            MediaStatus::TooLarge { size }
        } else {
            MediaStatus::Local { path, size }
        }
    }
}

/// File-system-safe name, disambiguated against names already used
fn unique_file_name(filename: &str, claimed: &mut BTreeSet<String>) -> String {
    let mut safe: String = filename
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c => c,
        })
        .collect();
    if safe.trim_matches('.').is_empty() {
        safe = "file".to_string();
    }

    let mut candidate = safe.clone();
    let mut n = 1;
    while !claimed.insert(candidate.clone()) {
        n += 1;
        candidate = format!("{}_{}", n, safe);
    }
    candidate
}
