//! Flat-file persistence
//!
//! Two JSON documents live in the data directory:
//! - `blocklist.json`: sorted array of `{contact_id, name}`
//! - `group_topics.json`: contact ↔ forum topic map (topic mode only)
//!
//! Every write is a whole-file rewrite through a temp file and a rename, so a
//! crash mid-write never leaves a truncated document behind. Reads are
//! forgiving: records that do not parse are skipped, and an unreadable file
//! yields an empty collection.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

pub const BLOCKLIST_FILE: &str = "blocklist.json";
pub const TOPIC_MAP_FILE: &str = "group_topics.json";

/// Persistence errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A blocked contact as written to disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedContact {
    #[serde(alias = "user_id")]
    pub contact_id: i64,
    #[serde(default)]
    pub name: String,
}

impl BlockedContact {
    pub fn new(contact_id: i64, name: &str) -> Self {
        Self {
            contact_id,
            name: name.trim().to_string(),
        }
    }

    /// Label used on list buttons
    pub fn label(&self) -> String {
        if self.name.is_empty() {
            format!("Contact {}", self.contact_id)
        } else {
            self.name.clone()
        }
    }
}

/// Write `data` to `path` through a sibling temp file
fn write_atomic(path: &Path, data: &str) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let temp_path = path.with_extension("tmp");
    std::fs::write(&temp_path, data)?;
    std::fs::rename(&temp_path, path)?;

    Ok(())
}

// ============ Blocklist ============

/// Blocklist document on disk
#[derive(Debug, Clone)]
pub struct BlocklistStore {
    path: PathBuf,
}

impl BlocklistStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `<dir>/blocklist.json`
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(BLOCKLIST_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create an empty document if none exists yet
    pub fn ensure_exists(&self) -> Result<(), StoreError> {
        if !self.path.exists() {
            self.save(&[])?;
            debug!("Created blocklist file at {:?}", self.path);
        }
        Ok(())
    }

    /// Load all entries, tolerating legacy layouts and bad records
    pub fn load(&self) -> Vec<BlockedContact> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!("Failed to read blocklist {:?}: {}", self.path, e);
                return Vec::new();
            }
        };

        match serde_json::from_str::<Value>(&raw) {
            Ok(value) => parse_blocklist(value),
            Err(e) => {
                warn!("Blocklist {:?} is not valid JSON: {}", self.path, e);
                Vec::new()
            }
        }
    }

    /// Dedupe by id, sort ascending, trim names, then rewrite the whole file.
    /// Returns the normalized collection that was written.
    pub fn save(&self, entries: &[BlockedContact]) -> Result<Vec<BlockedContact>, StoreError> {
        let normalized = normalize(entries);
        let data = serde_json::to_string_pretty(&normalized)?;
        write_atomic(&self.path, &data)?;
        debug!("Saved blocklist: {} contacts", normalized.len());
        Ok(normalized)
    }
}

fn normalize(entries: &[BlockedContact]) -> Vec<BlockedContact> {
    let mut seen = HashSet::new();
    let mut unique: Vec<BlockedContact> = entries
        .iter()
        .filter(|e| seen.insert(e.contact_id))
        .map(|e| BlockedContact::new(e.contact_id, &e.name))
        .collect();
    unique.sort_by_key(|e| e.contact_id);
    unique
}

fn parse_blocklist(value: Value) -> Vec<BlockedContact> {
    let items = match value {
        Value::Array(items) => items,
        other => {
            warn!("Blocklist root is not an array ({}), ignoring", json_kind(&other));
            return Vec::new();
        }
    };

    // Legacy layout wrapped the list in a second array: [[...]]
    let items = match items.first() {
        Some(Value::Array(inner)) => inner.clone(),
        _ => items,
    };

    let total = items.len();
    let parsed: Vec<BlockedContact> = items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<BlockedContact>(item).ok())
        .collect();

    if parsed.len() != total {
        warn!("Skipped {} unrecognized blocklist records", total - parsed.len());
    }

    normalize(&parsed)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============ Topic map ============

/// Contact ↔ forum topic bijection, plus the last seen display name of each
/// mapped contact
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicMap {
    #[serde(default)]
    pub user_to_topic: BTreeMap<i64, i32>,
    #[serde(default)]
    pub topic_to_user: BTreeMap<i32, i64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub names: BTreeMap<i64, String>,
}

impl TopicMap {
    pub fn topic_for(&self, contact_id: i64) -> Option<i32> {
        self.user_to_topic.get(&contact_id).copied()
    }

    pub fn contact_for(&self, topic_id: i32) -> Option<i64> {
        self.topic_to_user.get(&topic_id).copied()
    }

    pub fn name_for(&self, contact_id: i64) -> Option<&str> {
        self.names.get(&contact_id).map(String::as_str)
    }

    /// Remember `name` for a mapped contact. Returns whether anything changed.
    pub fn set_name(&mut self, contact_id: i64, name: &str) -> bool {
        if self.topic_for(contact_id).is_none() || self.name_for(contact_id) == Some(name) {
            return false;
        }
        self.names.insert(contact_id, name.to_string());
        true
    }

    pub fn len(&self) -> usize {
        self.user_to_topic.len()
    }

    pub fn is_empty(&self) -> bool {
        self.user_to_topic.is_empty()
    }

    /// Record a pair in both directions. Refuses pairs that would break the
    /// bijection (either side already mapped elsewhere).
    pub fn insert(&mut self, contact_id: i64, topic_id: i32) -> bool {
        match (self.topic_for(contact_id), self.contact_for(topic_id)) {
            (None, None) => {
                self.user_to_topic.insert(contact_id, topic_id);
                self.topic_to_user.insert(topic_id, contact_id);
                true
            }
            (Some(t), Some(c)) => t == topic_id && c == contact_id,
            _ => false,
        }
    }

    /// Keep only pairs present and consistent in both directions
    fn into_consistent(self) -> Self {
        let mut clean = TopicMap::default();
        for (&contact_id, &topic_id) in &self.user_to_topic {
            if self.topic_to_user.get(&topic_id) == Some(&contact_id) {
                clean.insert(contact_id, topic_id);
                if let Some(name) = self.names.get(&contact_id) {
                    clean.set_name(contact_id, name);
                }
            }
        }
        let dropped = self.user_to_topic.len() + self.topic_to_user.len() - 2 * clean.len();
        if dropped > 0 {
            warn!("Dropped {} inconsistent topic mappings", dropped);
        }
        clean
    }
}

/// Topic map document on disk
#[derive(Debug, Clone)]
pub struct TopicMapStore {
    path: PathBuf,
}

impl TopicMapStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `<dir>/group_topics.json`
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(TOPIC_MAP_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> TopicMap {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return TopicMap::default(),
            Err(e) => {
                warn!("Failed to read topic map {:?}: {}", self.path, e);
                return TopicMap::default();
            }
        };

        match serde_json::from_str::<TopicMap>(&raw) {
            Ok(map) => map.into_consistent(),
            Err(e) => {
                warn!("Topic map {:?} is malformed: {}", self.path, e);
                TopicMap::default()
            }
        }
    }

    pub fn save(&self, map: &TopicMap) -> Result<(), StoreError> {
        let data = serde_json::to_string_pretty(map)?;
        write_atomic(&self.path, &data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_save_sorts_and_dedupes() {
        let dir = tempdir().unwrap();
        let store = BlocklistStore::in_dir(dir.path());

        let written = store
            .save(&[
                BlockedContact::new(30, " Carol "),
                BlockedContact::new(10, "Alice"),
                BlockedContact::new(30, "Duplicate"),
            ])
            .unwrap();

        assert_eq!(written.len(), 2);
        assert_eq!(written[0].contact_id, 10);
        assert_eq!(written[1].name, "Carol");
        assert_eq!(store.load(), written);
    }

    #[test]
    fn test_file_format_uses_contact_id_key() {
        let dir = tempdir().unwrap();
        let store = BlocklistStore::in_dir(dir.path());
        store.save(&[BlockedContact::new(5, "Eve")]).unwrap();

        let raw = std::fs::read_to_string(store.path()).unwrap();
        let value: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value[0]["contact_id"], 5);
        assert_eq!(value[0]["name"], "Eve");
        assert!(!store.path().with_extension("tmp").exists());
    }

    #[test]
    fn test_load_unwraps_legacy_nested_array() {
        let dir = tempdir().unwrap();
        let store = BlocklistStore::in_dir(dir.path());
        std::fs::write(store.path(), r#"[[{"user_id": 9, "name": "Old"}]]"#).unwrap();

        assert_eq!(store.load(), vec![BlockedContact::new(9, "Old")]);
    }

    #[test]
    fn test_load_skips_unrecognized_records() {
        let dir = tempdir().unwrap();
        let store = BlocklistStore::in_dir(dir.path());
        std::fs::write(
            store.path(),
            r#"[{"contact_id": 2}, "junk", {"name": "no id"}, {"contact_id": 1, "name": "A"}]"#,
        )
        .unwrap();

        let loaded = store.load();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0], BlockedContact::new(1, "A"));
        assert_eq!(loaded[1], BlockedContact::new(2, ""));
    }

    #[test]
    fn test_load_garbage_is_empty() {
        let dir = tempdir().unwrap();
        let store = BlocklistStore::in_dir(dir.path());
        std::fs::write(store.path(), "{not json").unwrap();
        assert!(store.load().is_empty());

        std::fs::write(store.path(), r#"{"contact_id": 1}"#).unwrap();
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_missing_file_is_empty_until_ensured() {
        let dir = tempdir().unwrap();
        let store = BlocklistStore::in_dir(&dir.path().join("nested"));
        assert!(store.load().is_empty());

        store.ensure_exists().unwrap();
        assert_eq!(std::fs::read_to_string(store.path()).unwrap().trim(), "[]");
    }

    #[test]
    fn test_topic_map_roundtrip_uses_string_keys() {
        let dir = tempdir().unwrap();
        let store = TopicMapStore::in_dir(dir.path());

        let mut map = TopicMap::default();
        assert!(map.insert(99, 5));
        store.save(&map).unwrap();

        let raw: Value = serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw["user_to_topic"]["99"], 5);
        assert_eq!(raw["topic_to_user"]["5"], 99);
        assert!(raw.get("names").is_none());
        assert_eq!(store.load(), map);

        assert!(map.set_name(99, "Zed"));
        assert!(!map.set_name(99, "Zed"));
        assert!(!map.set_name(100, "Nobody"));
        store.save(&map).unwrap();
        assert_eq!(store.load().name_for(99), Some("Zed"));
    }

    #[test]
    fn test_topic_map_refuses_broken_pairs() {
        let mut map = TopicMap::default();
        assert!(map.insert(1, 10));
        assert!(map.insert(1, 10));
        assert!(!map.insert(1, 11));
        assert!(!map.insert(2, 10));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_topic_map_load_drops_inconsistent_pairs() {
        let dir = tempdir().unwrap();
        let store = TopicMapStore::in_dir(dir.path());
        std::fs::write(
            store.path(),
            r#"{"user_to_topic": {"1": 10, "2": 20}, "topic_to_user": {"10": 1, "20": 3}}"#,
        )
        .unwrap();

        let map = store.load();
        assert_eq!(map.topic_for(1), Some(10));
        assert_eq!(map.topic_for(2), None);
        assert_eq!(map.contact_for(20), None);
    }
}
