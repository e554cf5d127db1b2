//! Test Helper Utilities
//!
//! In-memory LingSync and OLD fakes that count their calls, plus a small
//! sample corpus.

#![allow(dead_code)]

pub mod fakes;

pub use fakes::{FakeDestination, FakeSource};

use ls2old::config::{ConversionOptions, Endpoint, MigrationConfig, RunOptions};
use ls2old::models::{EntityType, RawCorpus, RawDocumentSet};
use ls2old::services::WorkflowOrchestrator;
use ls2old::types::DestinationApi;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;

pub const CORPUS: &str = "fieldwork";

/// Configuration pointing at a temporary work dir
pub fn test_config(work_dir: &Path) -> MigrationConfig {
    MigrationConfig {
        work_dir: work_dir.to_path_buf(),
        corpus: CORPUS.to_string(),
        source: Endpoint {
            url: "http://lingsync.test".to_string(),
            username: None,
            password: None,
        },
        destination: Some(Endpoint {
            url: "http://old.test".to_string(),
            username: None,
            password: None,
        }),
        conversion: ConversionOptions::new(CORPUS),
        run: RunOptions::default(),
    }
}

/// A small corpus touching every entity type
pub fn sample_documents() -> Vec<Value> {
    vec![
        json!({"_id": "_design/pages", "views": {}}),
        json!({"_id": "t1", "collection": "tags", "name": "noun", "description": "Nouns"}),
        json!({
            "_id": "u1",
            "collection": "users",
            "username": "alice",
            "firstname": "Alice",
            "lastname": "Doe",
            "email": "alice@example.org"
        }),
        json!({
            "_id": "sp1",
            "collection": "speakers",
            "firstname": "Mary",
            "lastname": "Smith",
            "dialect": "Coastal"
        }),
        json!({
            "_id": "d1",
            "collection": "datums",
            "datumFields": [
                {"label": "utterance", "value": "abc"},
                {"label": "morphemes", "value": "a-bc"},
                {"label": "gloss", "value": "DET-dog"},
                {"label": "translation", "value": "the dog"},
                {"label": "enteredByUser", "value": "alice"}
            ],
            "tags": ["t1"],
            "dateEntered": "2015-03-30T10:00:00.000Z",
            "session": {"_id": "s1", "sessionFields": [{"label": "consultants", "value": "Mary Smith"}]},
            "audioVideo": [{"URL": "http://media.test/d1.mp3", "filename": "d1.mp3", "type": "audio/mpeg"}]
        }),
        json!({
            "_id": "d2",
            "collection": "datums",
            "datumFields": [
                {"label": "utterance", "value": "xyz"},
                {"label": "translation", "value": "the cat"},
                {"label": "judgement", "value": "*"}
            ],
            "dateEntered": "2015-03-29T10:00:00.000Z",
            "session": {"_id": "s1", "sessionFields": []}
        }),
        json!({
            "_id": "l1",
            "collection": "datalists",
            "title": "Animals",
            "datumIds": ["d1", "d2"]
        }),
        json!({
            "_id": "s1",
            "collection": "sessions",
            "sessionFields": [
                {"label": "goal", "value": "Animal nouns"},
                {"label": "consultants", "value": "Mary Smith"},
                {"label": "dateElicited", "value": "2015-03-30"},
                {"label": "user", "value": "alice"},
                {"label": "language", "value": "Blackfoot"}
            ]
        }),
    ]
}

/// Sample source with the media of `d1` available
pub fn sample_source() -> FakeSource {
    FakeSource::new(sample_documents()).with_media("http://media.test/d1.mp3", b"ID3 fake mp3".to_vec())
}

/// Raw corpus built straight from documents, without a downloader
pub fn raw_corpus(documents: &[Value]) -> RawCorpus {
    let mut raw = RawCorpus::new();
    for entity_type in EntityType::ALL {
        raw.insert(RawDocumentSet {
            corpus: CORPUS.to_string(),
            entity_type,
            documents: documents
                .iter()
                .filter(|d| EntityType::classify(d) == Some(entity_type))
                .cloned()
                .collect(),
        });
    }
    raw
}

pub fn orchestrator(
    config: MigrationConfig,
    source: &Arc<FakeSource>,
    destination: Option<&Arc<FakeDestination>>,
) -> WorkflowOrchestrator {
    let destination = destination.map(|d| d.clone() as Arc<dyn DestinationApi>);
    WorkflowOrchestrator::new(config, source.clone(), destination)
}
