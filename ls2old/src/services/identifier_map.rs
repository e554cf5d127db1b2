//! Identifier map
//!
//! Two kinds of knowledge, both keyed by provisional key:
//!
//! - destination ids assigned by the OLD, persisted in an append-only
//!   journal (`identifiers.jsonl`, last entry wins);
//! - registrations made during conversion: which keys exist in this run,
//!   which natural key (tag name, username, ...) each one carries, and
//!   which source ids were consolidated into another resource.
//!
//! The map is passed explicitly through conversion and upload; there is no
//! global instance.

use crate::error::MigrationResult;
use crate::models::{ConvertedResource, DestinationId, EntityType, ProvisionalKey, Reference};
use crate::services::cache_store::{append_json_line, read_json_lines};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::debug;

/// One line of `identifiers.jsonl`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifierEntry {
    pub entity_type: EntityType,
    pub source_id: String,
    pub destination_id: DestinationId,
}

#[derive(Debug, Clone, Default)]
pub struct IdentifierMap {
    journal: Option<PathBuf>,
    destination: BTreeMap<ProvisionalKey, DestinationId>,
    registered: BTreeSet<ProvisionalKey>,
    aliases: BTreeMap<ProvisionalKey, ProvisionalKey>,
    natural: BTreeMap<(EntityType, String), ProvisionalKey>,
}

impl IdentifierMap {
    /// Map with no backing journal
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Replay the journal at `path`; a missing journal yields an empty map
    pub fn load(path: &Path) -> MigrationResult<Self> {
        let entries: Vec<IdentifierEntry> = read_json_lines(path)?;
        let mut map = Self {
            journal: Some(path.to_path_buf()),
            ..Self::default()
        };
        for entry in entries {
            map.destination.insert(
                ProvisionalKey::new(entry.entity_type, entry.source_id),
                entry.destination_id,
            );
        }
        debug!(
            journal = %path.display(),
            entries = map.destination.len(),
            "Identifier map loaded"
        );
        Ok(map)
    }

    /// Record an accepted create, appending to the journal before returning
    pub fn record(&mut self, key: &ProvisionalKey, destination_id: DestinationId) -> MigrationResult<()> {
        if let Some(path) = &self.journal {
            append_json_line(
                path,
                &IdentifierEntry {
                    entity_type: key.entity_type,
                    source_id: key.source_id.clone(),
                    destination_id: destination_id.clone(),
                },
            )?;
        }
        self.destination.insert(key.clone(), destination_id);
        Ok(())
    }

    /// Destination id of `key`, following consolidation aliases
    pub fn destination_id(&self, key: &ProvisionalKey) -> Option<&DestinationId> {
        if let Some(id) = self.destination.get(key) {
            return Some(id);
        }
        self.aliases
            .get(key)
            .and_then(|target| self.destination.get(target))
    }

    pub fn contains(&self, key: &ProvisionalKey) -> bool {
        self.destination_id(key).is_some()
    }

    /// Number of journaled destination ids
    pub fn len(&self) -> usize {
        self.destination.len()
    }

    pub fn is_empty(&self) -> bool {
        self.destination.is_empty()
    }

    /// Register a key produced by conversion
    pub fn register(&mut self, key: ProvisionalKey, natural_key: Option<&str>) {
        if let Some(name) = natural_key {
            self.natural
                .entry((key.entity_type, name.to_string()))
                .or_insert_with(|| key.clone());
        }
        self.registered.insert(key);
    }

    /// Make `alias` resolve wherever `target` resolves
    pub fn register_alias(&mut self, alias: ProvisionalKey, target: ProvisionalKey) {
        if alias != target {
            self.aliases.insert(alias, target);
        }
    }

    /// Register a converted resource with its natural key and merged ids
    pub fn register_resource(&mut self, resource: &ConvertedResource) {
        self.register(resource.key.clone(), resource.natural_key.as_deref());
        for merged in &resource.merged_source_ids {
            self.register_alias(
                ProvisionalKey::new(resource.key.entity_type, merged.clone()),
                resource.key.clone(),
            );
        }
    }

    /// Whether conversion produced `key` (directly or as an alias)
    pub fn is_registered(&self, key: &ProvisionalKey) -> bool {
        self.registered.contains(key)
            || self
                .aliases
                .get(key)
                .map_or(false, |target| self.registered.contains(target))
    }

    /// Key registered under a natural key
    pub fn by_natural_key(&self, entity_type: EntityType, name: &str) -> Option<&ProvisionalKey> {
        self.natural.get(&(entity_type, name.to_string()))
    }

    /// Conversion-time resolution: resolved, pending, or `None` (dropped)
    pub fn reference(&self, key: &ProvisionalKey) -> Option<Reference> {
        if let Some(id) = self.destination_id(key) {
            return Some(Reference::Resolved(id.clone()));
        }
        if self.is_registered(key) {
            let canonical = self.aliases.get(key).unwrap_or(key);
            return Some(Reference::Pending(canonical.clone()));
        }
        None
    }

    /// Upload-time resolution of a stored reference
    pub fn resolve(&self, reference: &Reference) -> Option<DestinationId> {
        match reference {
            Reference::Resolved(id) => Some(id.clone()),
            Reference::Pending(key) => self.destination_id(key).cloned(),
        }
    }
}
