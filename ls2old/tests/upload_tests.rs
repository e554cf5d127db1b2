//! Upload integration tests
//!
//! Full runs against the in-memory OLD: dependency order, resolved
//! references, resumability, rejections, natural-key reuse and application
//! settings.

mod helpers;

use helpers::{orchestrator, sample_documents, sample_source, test_config, FakeDestination, FakeSource};
use ls2old::models::{EntityState, EntityType, SettingsOutcome, Stage};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

fn id_of(items: &[Value], field: &str, value: &str) -> Value {
    items
        .iter()
        .find(|item| item[field] == value)
        .map(|item| item["id"].clone())
        .unwrap_or_else(|| panic!("no item with {} = {}", field, value))
}

fn live_counts(destination: &FakeDestination) -> Vec<(&'static str, usize)> {
    ["tags", "users", "speakers", "files", "forms", "corpora", "collections"]
        .into_iter()
        .map(|r| (r, destination.items(r).len()))
        .collect()
}

#[tokio::test]
async fn test_full_run_resolves_every_reference() {
    let temp_dir = TempDir::new().unwrap();
    let source = Arc::new(sample_source());
    let destination = Arc::new(FakeDestination::new());

    let summary = orchestrator(test_config(temp_dir.path()), &source, Some(&destination))
        .run()
        .await
        .unwrap();
    assert!(summary.succeeded, "{}", summary.render_text());
    assert!(summary
        .types
        .values()
        .all(|stats| stats.state == EntityState::Uploaded));

    assert_eq!(
        live_counts(&destination),
        vec![
            ("tags", 2),
            ("users", 1),
            ("speakers", 1),
            ("files", 1),
            ("forms", 2),
            ("corpora", 1),
            ("collections", 1)
        ]
    );

    let tags = destination.items("tags");
    let noun = id_of(&tags, "name", "noun");
    let migration = id_of(&tags, "name", "Migrated from LingSync corpus fieldwork");
    let alice = id_of(&destination.items("users"), "username", "alice");
    let mary = id_of(&destination.items("speakers"), "first_name", "Mary");
    let file = id_of(&destination.items("files"), "filename", "d1.mp3");

    let forms = destination.items("forms");
    let d1 = forms.iter().find(|f| f["transcription"] == "abc").unwrap();
    assert_eq!(d1["tags"], json!([noun, migration]));
    assert_eq!(d1["speaker"], mary);
    assert_eq!(d1["elicitor"], alice);
    assert_eq!(d1["files"], json!([file]));
    let d2 = forms.iter().find(|f| f["transcription"] == "xyz").unwrap();

    let corpus = &destination.items("corpora")[0];
    assert_eq!(corpus["content"], format!("{},{}", d1["id"], d2["id"]));

    // Collection contents follow the order the datums were entered
    let collection = &destination.items("collections")[0];
    assert_eq!(collection["contents"], format!("form[{}]\nform[{}]", d2["id"], d1["id"]));
    assert_eq!(collection["speaker"], mary);
    assert_eq!(collection["elicitor"], alice);

    // Binary content followed the metadata record
    let data = destination.file_data();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0].0, file.to_string());
    assert_eq!(data[0].1.bytes, b"ID3 fake mp3".to_vec());
    assert_eq!(data[0].1.mime_type, "audio/mpeg");
}

#[tokio::test]
async fn test_interrupted_run_resumes_without_duplicates() {
    let clean_dir = TempDir::new().unwrap();
    let clean = Arc::new(FakeDestination::new());
    orchestrator(test_config(clean_dir.path()), &Arc::new(sample_source()), Some(&clean))
        .run()
        .await
        .unwrap();

    let temp_dir = TempDir::new().unwrap();
    let source = Arc::new(sample_source());
    let destination = Arc::new(FakeDestination::new());
    // Settings, two tags, the user and the speaker go through
    destination.go_offline_after(Some(5));

    let interrupted = orchestrator(test_config(temp_dir.path()), &source, Some(&destination))
        .run()
        .await
        .unwrap();
    assert!(!interrupted.succeeded);
    assert!(matches!(
        interrupted.types[&EntityType::Files].state,
        EntityState::Failed { .. }
    ));
    assert!(matches!(
        &interrupted.types[&EntityType::Datums].state,
        EntityState::Blocked { by } if by == &vec![EntityType::Files]
    ));

    destination.go_offline_after(None);
    let resumed = orchestrator(test_config(temp_dir.path()), &source, Some(&destination))
        .run()
        .await
        .unwrap();
    assert!(resumed.succeeded, "{}", resumed.render_text());

    assert_eq!(destination.create_calls(), clean.create_calls());
    assert_eq!(live_counts(&destination), live_counts(&clean));
    let tags = resumed.types[&EntityType::Tags].upload.as_ref().unwrap();
    assert_eq!(tags.already_uploaded, 2);
    assert_eq!(tags.created, 0);

    // A third run has nothing left to do
    let again = orchestrator(test_config(temp_dir.path()), &source, Some(&destination))
        .run()
        .await
        .unwrap();
    assert!(again.succeeded);
    assert_eq!(destination.create_calls(), clean.create_calls());
    assert_eq!(source.page_calls(), EntityType::ALL.len(), "raw sets come from the cache");
}

#[tokio::test]
async fn test_rejected_form_is_recorded_and_run_continues() {
    let temp_dir = TempDir::new().unwrap();
    let source = Arc::new(sample_source());
    let destination = Arc::new(FakeDestination::new());
    destination.reject("forms", "transcription", json!("xyz"));

    let summary = orchestrator(test_config(temp_dir.path()), &source, Some(&destination))
        .run()
        .await
        .unwrap();
    assert!(summary.succeeded);

    let datums = summary.types[&EntityType::Datums].upload.as_ref().unwrap();
    assert_eq!(datums.created, 1);
    assert_eq!(datums.failed.len(), 1);
    assert_eq!(datums.failed[0].source_id, "d2");
    assert_eq!(
        datums.failed[0].error,
        json!({"errors": {"transcription": "Please enter a value"}})
    );

    // The collection loses the rejected form and says so
    let d1 = destination.items("forms")[0]["id"].clone();
    assert_eq!(destination.items("collections")[0]["contents"], format!("form[{}]", d1));
    let sessions = summary.types[&EntityType::Sessions].upload.as_ref().unwrap();
    assert_eq!(sessions.dropped_references.len(), 1);
    assert!(summary.render_text().contains("Upload FAILED datums/d2"));
}

#[tokio::test]
async fn test_trashed_datum_is_created_then_deleted() {
    let temp_dir = TempDir::new().unwrap();
    let mut documents = sample_documents();
    documents.push(json!({
        "_id": "d3",
        "collection": "datums",
        "datumFields": [{"label": "utterance", "value": "gone"}],
        "trashed": "deleted"
    }));
    let source = Arc::new(FakeSource::new(documents));
    let destination = Arc::new(FakeDestination::new());

    let summary = orchestrator(test_config(temp_dir.path()), &source, Some(&destination))
        .run()
        .await
        .unwrap();
    let datums = summary.types[&EntityType::Datums].upload.as_ref().unwrap();
    assert_eq!(datums.deleted, 1);
    assert_eq!(destination.deleted().len(), 1);
    assert_eq!(destination.deleted()[0].0, "forms");
    assert!(!destination
        .items("forms")
        .iter()
        .any(|f| f["transcription"] == "gone"));

    // Journaled deletes are not repeated
    orchestrator(test_config(temp_dir.path()), &source, Some(&destination))
        .run()
        .await
        .unwrap();
    assert_eq!(destination.deleted().len(), 1);
}

#[tokio::test]
async fn test_oversized_media_is_skipped() {
    let temp_dir = TempDir::new().unwrap();
    let source = Arc::new(sample_source());
    let destination = Arc::new(FakeDestination::new());
    let mut config = test_config(temp_dir.path());
    config.run.max_file_bytes = 4;

    let summary = orchestrator(config, &source, Some(&destination))
        .run()
        .await
        .unwrap();
    assert!(summary.succeeded);

    let files = &summary.types[&EntityType::Files];
    assert_eq!(files.media.as_ref().unwrap().too_large, 1);
    let upload = files.upload.as_ref().unwrap();
    assert_eq!(upload.skipped.len(), 1);
    assert!(upload.skipped[0].reason.starts_with("too large"));
    assert!(destination.items("files").is_empty());

    // The form is still created, without its file
    let datums = summary.types[&EntityType::Datums].upload.as_ref().unwrap();
    assert_eq!(datums.dropped_references.len(), 1);
    let d1 = destination
        .items("forms")
        .into_iter()
        .find(|f| f["transcription"] == "abc")
        .unwrap();
    assert_eq!(d1["files"], json!([]));
}

#[tokio::test]
async fn test_existing_names_are_reused() {
    let temp_dir = TempDir::new().unwrap();
    let source = Arc::new(sample_source());
    let destination = Arc::new(FakeDestination::new());
    let noun = destination.seed("tags", json!({"name": "noun", "description": "already here"}));
    let alice = destination.seed("users", json!({"username": "alice"}));

    let summary = orchestrator(test_config(temp_dir.path()), &source, Some(&destination))
        .run()
        .await
        .unwrap();
    assert!(summary.succeeded);

    assert_eq!(summary.types[&EntityType::Tags].upload.as_ref().unwrap().reused, 1);
    assert_eq!(summary.types[&EntityType::Users].upload.as_ref().unwrap().reused, 1);
    assert_eq!(destination.items("tags").len(), 2);
    assert_eq!(destination.items("users").len(), 1);

    let d1 = destination
        .items("forms")
        .into_iter()
        .find(|f| f["transcription"] == "abc")
        .unwrap();
    assert_eq!(d1["tags"][0], noun.to_json());
    assert_eq!(d1["elicitor"], alice.to_json());
}

#[tokio::test]
async fn test_settings_are_applied_before_any_resource() {
    let temp_dir = TempDir::new().unwrap();
    let source = Arc::new(sample_source());
    let destination = Arc::new(FakeDestination::new());

    let summary = orchestrator(test_config(temp_dir.path()), &source, Some(&destination))
        .run()
        .await
        .unwrap();
    assert!(summary.succeeded, "{}", summary.render_text());

    assert_eq!(destination.create_log()[0], "applicationsettings");
    let settings = destination.items("applicationsettings");
    assert_eq!(settings.len(), 1);
    assert_eq!(settings[0]["object_language_name"], "Blackfoot");
    assert_eq!(settings[0]["grammaticalities"], "*");

    // The starred form is only accepted because the settings list it
    let d2 = destination
        .items("forms")
        .into_iter()
        .find(|f| f["transcription"] == "xyz")
        .unwrap();
    assert_eq!(d2["grammaticality"], "*");
    let report = summary.settings.as_ref().unwrap();
    assert!(matches!(report.outcome, Some(SettingsOutcome::Created { .. })));

    // Nothing new to say on a second run
    let again = orchestrator(test_config(temp_dir.path()), &source, Some(&destination))
        .run()
        .await
        .unwrap();
    assert_eq!(
        again.settings.unwrap().outcome,
        Some(SettingsOutcome::AlreadyApplied)
    );
    assert_eq!(destination.items("applicationsettings").len(), 1);
}

#[tokio::test]
async fn test_existing_grammaticalities_are_kept() {
    let temp_dir = TempDir::new().unwrap();
    let source = Arc::new(sample_source());
    let destination = Arc::new(FakeDestination::new());
    destination.seed(
        "applicationsettings",
        json!({
            "object_language_name": "Blackfoot",
            "grammaticalities": "?,#",
            "storage_orthography": {"id": 3, "name": "Standard"},
            "metalanguage_name": "English"
        }),
    );

    let summary = orchestrator(test_config(temp_dir.path()), &source, Some(&destination))
        .run()
        .await
        .unwrap();
    assert!(summary.succeeded, "{}", summary.render_text());

    let settings = destination.items("applicationsettings");
    assert_eq!(settings.len(), 2);
    let newest = &settings[1];
    assert_eq!(newest["grammaticalities"], "?,#,*");
    assert_eq!(newest["object_language_name"], "Blackfoot");
    assert_eq!(newest["metalanguage_name"], "English");
    assert_eq!(newest["storage_orthography"], 3);
}

#[tokio::test]
async fn test_rejected_settings_abort_the_upload() {
    let temp_dir = TempDir::new().unwrap();
    let source = Arc::new(sample_source());
    let destination = Arc::new(FakeDestination::new());
    destination.reject("applicationsettings", "object_language_name", json!("Blackfoot"));

    let summary = orchestrator(test_config(temp_dir.path()), &source, Some(&destination))
        .run()
        .await
        .unwrap();
    assert!(!summary.succeeded);

    match &summary.types[&EntityType::Tags].state {
        EntityState::Failed { stage, reason } => {
            assert_eq!(*stage, Stage::Upload);
            assert!(reason.contains("application settings rejected"), "{}", reason);
        }
        other => panic!("unexpected tags state {}", other),
    }
    assert!(matches!(
        summary.settings.as_ref().unwrap().outcome,
        Some(SettingsOutcome::Rejected { .. })
    ));
    assert_eq!(destination.create_calls(), 0);
    assert!(destination.items("forms").is_empty());
    assert!(summary.render_text().contains("outcome: REJECTED"));
}
