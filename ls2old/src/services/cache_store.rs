//! Local cache store
//!
//! Layout under `<work_dir>/<corpus>/`:
//!
//! ```text
//! raw/<entity>.json          downloaded documents
//! converted/<entity>.json    converted resource sets
//! upload/<entity>.jsonl      per-resource upload journal
//! identifiers.jsonl          provisional key → destination id journal
//! media/<file>               downloaded media payloads
//! reports/                   summary.txt, report.json
//! migration.lock             held while a run is active
//! ```
//!
//! Whole-file artifacts are replaced atomically (temp file + rename).
//! Journals are append-only JSON lines, flushed per entry.

use crate::error::{MigrationError, MigrationResult};
use crate::models::{ConvertedResourceSet, EntityType, RawDocumentSet, UploadRecord};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// File-backed cache for one corpus
#[derive(Debug, Clone)]
pub struct CacheStore {
    corpus_dir: PathBuf,
}

impl CacheStore {
    pub fn new(work_dir: &Path, corpus: &str) -> Self {
        Self {
            corpus_dir: work_dir.join(corpus),
        }
    }

    pub fn corpus_dir(&self) -> &Path {
        &self.corpus_dir
    }

    pub fn raw_path(&self, entity_type: EntityType) -> PathBuf {
        self.corpus_dir
            .join("raw")
            .join(format!("{}.json", entity_type))
    }

    pub fn converted_path(&self, entity_type: EntityType) -> PathBuf {
        self.corpus_dir
            .join("converted")
            .join(format!("{}.json", entity_type))
    }

    pub fn upload_journal_path(&self, entity_type: EntityType) -> PathBuf {
        self.corpus_dir
            .join("upload")
            .join(format!("{}.jsonl", entity_type))
    }

    pub fn identifiers_path(&self) -> PathBuf {
        self.corpus_dir.join("identifiers.jsonl")
    }

    pub fn media_dir(&self) -> PathBuf {
        self.corpus_dir.join("media")
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.corpus_dir.join("reports")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.corpus_dir.join("migration.lock")
    }

    pub fn load_raw(&self, entity_type: EntityType) -> MigrationResult<Option<RawDocumentSet>> {
        read_json(&self.raw_path(entity_type))
    }

    pub fn store_raw(&self, set: &RawDocumentSet) -> MigrationResult<()> {
        write_json_atomic(&self.raw_path(set.entity_type), set)
    }

    pub fn load_converted(
        &self,
        entity_type: EntityType,
    ) -> MigrationResult<Option<ConvertedResourceSet>> {
        read_json(&self.converted_path(entity_type))
    }

    pub fn store_converted(&self, set: &ConvertedResourceSet) -> MigrationResult<()> {
        write_json_atomic(&self.converted_path(set.entity_type), set)
    }

    pub fn append_upload_record(
        &self,
        entity_type: EntityType,
        record: &UploadRecord,
    ) -> MigrationResult<()> {
        append_json_line(&self.upload_journal_path(entity_type), record)
    }

    pub fn load_upload_records(&self, entity_type: EntityType) -> MigrationResult<Vec<UploadRecord>> {
        read_json_lines(&self.upload_journal_path(entity_type))
    }

    /// Create the lock file; fails with `RunInProgress` when it already exists
    pub fn acquire_lock(&self, run_id: Uuid, destination_url: &str) -> MigrationResult<RunLock> {
        RunLock::acquire(&self.lock_path(), run_id, destination_url)
    }
}

/// Contents of `migration.lock`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockInfo {
    pub run_id: Uuid,
    pub pid: u32,
    pub destination_url: String,
    pub started_at: DateTime<Utc>,
}

/// Run lock; removes its file when dropped
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    released: bool,
}

impl RunLock {
    fn acquire(path: &Path, run_id: Uuid, destination_url: &str) -> MigrationResult<Self> {
        ensure_parent(path)?;

        let mut file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(path)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    MigrationError::RunInProgress(path.to_path_buf())
                } else {
                    MigrationError::cache(path, e)
                }
            })?;

        let info = LockInfo {
            run_id,
            pid: std::process::id(),
            destination_url: destination_url.to_string(),
            started_at: Utc::now(),
        };
        let body = serde_json::to_vec_pretty(&info).map_err(|e| MigrationError::CorruptCache {
            path: path.to_path_buf(),
            source: e,
        })?;
        file.write_all(&body)
            .and_then(|_| file.sync_all())
            .map_err(|e| MigrationError::cache(path, e))?;

        debug!(lock = %path.display(), %run_id, "Run lock acquired");
        Ok(Self {
            path: path.to_path_buf(),
            released: false,
        })
    }

    /// Read the holder of an existing lock
    pub fn read_info(path: &Path) -> MigrationResult<Option<LockInfo>> {
        read_json(path)
    }

    pub fn release(mut self) -> MigrationResult<()> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> MigrationResult<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(MigrationError::cache(&self.path, e)),
        }
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = self.release_inner() {
            warn!("Failed to remove run lock: {}", e);
        }
    }
}

fn ensure_parent(path: &Path) -> MigrationResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| MigrationError::cache(parent, e))?;
    }
    Ok(())
}

/// Read a whole-file JSON artifact; `None` when absent
pub fn read_json<T: DeserializeOwned>(path: &Path) -> MigrationResult<Option<T>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(MigrationError::cache(path, e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| MigrationError::CorruptCache {
            path: path.to_path_buf(),
            source: e,
        })
}

/// Serialize `value` and replace `path` atomically
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> MigrationResult<()> {
    let mut bytes = serde_json::to_vec_pretty(value).map_err(|e| MigrationError::CorruptCache {
        path: path.to_path_buf(),
        source: e,
    })?;
    bytes.push(b'\n');
    write_bytes_atomic(path, &bytes)
}

/// Write to `<path>.tmp`, sync, then rename over `path`
pub fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> MigrationResult<()> {
    ensure_parent(path)?;

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);

    let write = || -> std::io::Result<()> {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.flush()?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    };

    write().map_err(|e| {
        let _ = fs::remove_file(&tmp);
        MigrationError::cache(path, e)
    })
}

/// Append one JSON line and flush it to disk
pub fn append_json_line<T: Serialize>(path: &Path, value: &T) -> MigrationResult<()> {
    ensure_parent(path)?;

    let mut line = serde_json::to_vec(value).map_err(|e| MigrationError::CorruptCache {
        path: path.to_path_buf(),
        source: e,
    })?;
    line.push(b'\n');

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| MigrationError::cache(path, e))?;
    file.write_all(&line)
        .and_then(|_| file.sync_data())
        .map_err(|e| MigrationError::cache(path, e))
}

/// Read every line of a JSON-lines journal
///
/// A malformed final line is what an interrupted append leaves behind; it is
/// ignored with a warning. A malformed line anywhere else is corruption.
pub fn read_json_lines<T: DeserializeOwned>(path: &Path) -> MigrationResult<Vec<T>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(MigrationError::cache(path, e)),
    };

    let lines: Vec<String> = BufReader::new(file)
        .lines()
        .collect::<std::io::Result<_>>()
        .map_err(|e| MigrationError::cache(path, e))?;

    let last = lines.iter().rposition(|l| !l.trim().is_empty());
    let mut entries = Vec::with_capacity(lines.len());
    for (index, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(entry) => entries.push(entry),
            Err(e) if Some(index) == last => {
                warn!(
                    journal = %path.display(),
                    "Ignoring truncated final journal line: {}",
                    e
                );
            }
            Err(e) => {
                return Err(MigrationError::CorruptCache {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        }
    }
    Ok(entries)
}
