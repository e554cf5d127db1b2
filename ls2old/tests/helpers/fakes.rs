//! In-memory transports
//!
//! `FakeSource` pages through the whole corpus in `_all_docs` shape and
//! leaves classification to the downloader, or, in Mango mode, answers
//! `{docs, bookmark}` pages already filtered by entity type.
//! `FakeDestination` assigns sequential numeric ids and can be told to
//! reject certain payloads or to go offline after a number of creates. Like
//! the OLD, it refuses forms whose grammaticality is not listed in the newest
//! application settings.

use async_trait::async_trait;
use ls2old::models::{DestinationId, EntityType};
use ls2old::types::{CreateOutcome, DestinationApi, FileData, PageRequest, SourceApi, TransportError};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

pub struct FakeSource {
    documents: Vec<Value>,
    media: BTreeMap<String, Vec<u8>>,
    mango: bool,
    pub page_calls: AtomicUsize,
    pub media_calls: AtomicUsize,
    pub offline: AtomicBool,
    /// Fail every page request after this many have been answered
    fail_after_pages: Mutex<Option<usize>>,
}

impl FakeSource {
    pub fn new(documents: Vec<Value>) -> Self {
        Self {
            documents,
            media: BTreeMap::new(),
            mango: false,
            page_calls: AtomicUsize::new(0),
            media_calls: AtomicUsize::new(0),
            offline: AtomicBool::new(false),
            fail_after_pages: Mutex::new(None),
        }
    }

    /// Answer Mango `_find` pages instead of `_all_docs` rows
    pub fn with_mango(mut self) -> Self {
        self.mango = true;
        self
    }

    pub fn fail_after_pages(&self, pages: Option<usize>) {
        *self.fail_after_pages.lock().unwrap() = pages;
    }

    pub fn with_media(mut self, url: &str, bytes: Vec<u8>) -> Self {
        self.media.insert(url.to_string(), bytes);
        self
    }

    pub fn page_calls(&self) -> usize {
        self.page_calls.load(Ordering::SeqCst)
    }

    pub fn media_calls(&self) -> usize {
        self.media_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceApi for FakeSource {
    async fn fetch_page(
        &self,
        _corpus: &str,
        entity_type: EntityType,
        page: &PageRequest,
    ) -> Result<Value, TransportError> {
        let call = self.page_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.offline.load(Ordering::SeqCst) {
            return Err(TransportError::Network("connection refused".into()));
        }
        if matches!(*self.fail_after_pages.lock().unwrap(), Some(limit) if call > limit) {
            return Err(TransportError::Network("connection reset".into()));
        }

        if self.mango {
            let offset = match &page.bookmark {
                Some(bookmark) => bookmark.trim_start_matches('b').parse().unwrap(),
                None => page.skip,
            };
            let docs: Vec<Value> = self
                .documents
                .iter()
                .filter(|doc| EntityType::classify(doc) == Some(entity_type))
                .skip(offset)
                .take(page.limit)
                .cloned()
                .collect();
            let bookmark = format!("b{}", offset + docs.len());
            return Ok(json!({"docs": docs, "bookmark": bookmark}));
        }

        let rows: Vec<Value> = self
            .documents
            .iter()
            .skip(page.skip)
            .take(page.limit)
            .map(|doc| json!({"id": doc["_id"], "doc": doc}))
            .collect();
        Ok(json!({"total_rows": self.documents.len(), "offset": page.skip, "rows": rows}))
    }

    async fn fetch_media(&self, url: &str) -> Result<Vec<u8>, TransportError> {
        self.media_calls.fetch_add(1, Ordering::SeqCst);
        self.media
            .get(url)
            .cloned()
            .ok_or_else(|| TransportError::Api(404, format!("{} not found", url)))
    }
}

/// Rejects creates of `resource` whose payload has `field == value`
#[derive(Debug, Clone)]
pub struct Rejection {
    pub resource: String,
    pub field: String,
    pub value: Value,
}

#[derive(Debug, Default)]
struct DestinationState {
    next_id: u64,
    resources: BTreeMap<String, Vec<Value>>,
    deleted: Vec<(String, String)>,
    file_data: Vec<(String, FileData)>,
    creates: usize,
    lists: usize,
    /// Collection of every accepted create, in order
    created: Vec<String>,
}

#[derive(Default)]
pub struct FakeDestination {
    state: Mutex<DestinationState>,
    rejections: Mutex<Vec<Rejection>>,
    /// Go offline once this many creates have succeeded
    offline_after: Mutex<Option<usize>>,
}

impl FakeDestination {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-existing destination resource
    pub fn seed(&self, resource: &str, mut item: Value) -> DestinationId {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id;
        item["id"] = json!(id);
        state.resources.entry(resource.to_string()).or_default().push(item);
        DestinationId(id.to_string())
    }

    pub fn reject(&self, resource: &str, field: &str, value: Value) {
        self.rejections.lock().unwrap().push(Rejection {
            resource: resource.to_string(),
            field: field.to_string(),
            value,
        });
    }

    pub fn go_offline_after(&self, creates: Option<usize>) {
        *self.offline_after.lock().unwrap() = creates;
    }

    /// Live (not deleted) resources of a collection
    pub fn items(&self, resource: &str) -> Vec<Value> {
        let state = self.state.lock().unwrap();
        let deleted: Vec<&String> = state
            .deleted
            .iter()
            .filter(|(r, _)| r == resource)
            .map(|(_, id)| id)
            .collect();
        state
            .resources
            .get(resource)
            .into_iter()
            .flatten()
            .filter(|item| !deleted.contains(&&item["id"].to_string()))
            .cloned()
            .collect()
    }

    pub fn deleted(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().deleted.clone()
    }

    pub fn file_data(&self) -> Vec<(String, FileData)> {
        self.state.lock().unwrap().file_data.clone()
    }

    pub fn create_calls(&self) -> usize {
        self.state.lock().unwrap().creates
    }

    pub fn create_log(&self) -> Vec<String> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().unwrap().lists
    }

    fn check_online(&self, state: &DestinationState) -> Result<(), TransportError> {
        match *self.offline_after.lock().unwrap() {
            Some(limit) if state.creates >= limit => {
                Err(TransportError::Network("connection reset".into()))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl DestinationApi for FakeDestination {
    async fn create(&self, resource: &str, payload: &Value) -> Result<CreateOutcome, TransportError> {
        let mut state = self.state.lock().unwrap();
        self.check_online(&state)?;

        let rejected = self
            .rejections
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.resource == resource && payload.get(&r.field) == Some(&r.value))
            .map(|r| r.field.clone());
        if let Some(field) = rejected {
            return Ok(CreateOutcome::Rejected(
                json!({"errors": {field: "Please enter a value"}}),
            ));
        }

        let grammaticality = payload
            .get("grammaticality")
            .and_then(Value::as_str)
            .filter(|g| resource == "forms" && !g.is_empty());
        if let Some(grammaticality) = grammaticality {
            let allowed = state
                .resources
                .get("applicationsettings")
                .and_then(|all| all.last())
                .and_then(|settings| settings["grammaticalities"].as_str())
                .unwrap_or_default();
            if !allowed.split(',').any(|g| g.trim() == grammaticality) {
                return Ok(CreateOutcome::Rejected(json!({"errors": {
                    "grammaticality": "The grammaticality submitted does not match any of the available options."
                }})));
            }
        }

        state.creates += 1;
        state.created.push(resource.to_string());
        state.next_id += 1;
        let id = state.next_id;
        let mut item = payload.clone();
        item["id"] = json!(id);
        state.resources.entry(resource.to_string()).or_default().push(item);
        Ok(CreateOutcome::Created(DestinationId(id.to_string())))
    }

    async fn delete(&self, resource: &str, id: &DestinationId) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        self.check_online(&state)?;
        state.deleted.push((resource.to_string(), id.to_string()));
        Ok(())
    }

    async fn list(&self, resource: &str) -> Result<Vec<Value>, TransportError> {
        {
            let mut state = self.state.lock().unwrap();
            self.check_online(&state)?;
            state.lists += 1;
        }
        Ok(self.items(resource))
    }

    async fn upload_file_data(
        &self,
        id: &DestinationId,
        data: &FileData,
    ) -> Result<CreateOutcome, TransportError> {
        let mut state = self.state.lock().unwrap();
        self.check_online(&state)?;
        state.file_data.push((id.to_string(), data.clone()));
        Ok(CreateOutcome::Created(id.clone()))
    }
}
