// src/storage/mapping.rs
//! Durable stock code → organization id mapping.
//!
//! The file is a JSON object keyed by stock code. Values are written as
//! `{"orgId": "...", "resolvedAt": "...", "strategy": n}`; plain string values
//! and the older `{"orgId", "name", "timestamp"}` form are read as well.

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use crate::stock::{OrganizationId, StockCode};
use crate::utils::error::StorageError;

#[derive(Debug, Clone, PartialEq)]
pub struct MappingEntry {
    pub stock_code: StockCode,
    pub org_id: OrganizationId,
    /// `None` for entries imported from files that did not record it.
    pub resolved_at: Option<DateTime<Utc>>,
    /// 1-based position of the extraction strategy that produced the id;
    /// `None` when supplied externally.
    pub strategy: Option<u8>,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoredValue {
    Plain(String),
    Entry(StoredEntry),
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    #[serde(rename = "orgId")]
    org_id: String,
    #[serde(rename = "resolvedAt", default, skip_serializing_if = "Option::is_none")]
    resolved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    strategy: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    /// Seconds since the epoch, written by older tooling.
    #[serde(default, skip_serializing)]
    timestamp: Option<f64>,
}

impl MappingEntry {
    fn from_stored(code: &str, value: StoredValue) -> Option<Self> {
        let stock_code = StockCode::parse(code).ok()?;
        let entry = match value {
            StoredValue::Plain(org_id) => MappingEntry {
                stock_code,
                org_id: OrganizationId::parse(&org_id).ok()?,
                resolved_at: None,
                strategy: None,
                name: None,
            },
            StoredValue::Entry(stored) => MappingEntry {
                stock_code,
                org_id: OrganizationId::parse(&stored.org_id).ok()?,
                resolved_at: stored.resolved_at.or_else(|| {
                    stored
                        .timestamp
                        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs as i64, 0))
                }),
                strategy: stored.strategy,
                name: stored.name,
            },
        };
        Some(entry)
    }

    fn to_stored(&self) -> StoredEntry {
        StoredEntry {
            org_id: self.org_id.to_string(),
            resolved_at: self.resolved_at,
            strategy: self.strategy,
            name: self.name.clone(),
            timestamp: None,
        }
    }
}

/// In-memory snapshot of the mapping file plus the path it is flushed to.
#[derive(Debug, Clone)]
pub struct MappingStore {
    path: PathBuf,
    entries: BTreeMap<StockCode, MappingEntry>,
}

impl MappingStore {
    /// Loads the mapping file. A missing or unreadable file yields an empty store.
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let entries = match read_snapshot(&path) {
            Ok(entries) => {
                tracing::info!("Loaded {} mapping entries from {}", entries.len(), path.display());
                entries
            }
            Err(e) => {
                tracing::warn!("Ignoring mapping file {}: {}; starting empty", path.display(), e);
                BTreeMap::new()
            }
        };
        Self { path, entries }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, code: &StockCode) -> Option<&OrganizationId> {
        self.entries.get(code).map(|entry| &entry.org_id)
    }

    pub fn entry(&self, code: &StockCode) -> Option<&MappingEntry> {
        self.entries.get(code)
    }

    pub fn put(&mut self, code: StockCode, org_id: OrganizationId, strategy: Option<u8>) {
        let name = self.entries.get(&code).and_then(|e| e.name.clone());
        self.entries.insert(
            code.clone(),
            MappingEntry {
                stock_code: code,
                org_id,
                resolved_at: Some(Utc::now()),
                strategy,
                name,
            },
        );
    }

    /// Attaches a display name to an existing entry.
    pub fn set_name(&mut self, code: &StockCode, name: impl Into<String>) {
        if let Some(entry) = self.entries.get_mut(code) {
            entry.name = Some(name.into());
        }
    }

    /// Writes the full snapshot atomically.
    ///
    /// Holds an exclusive advisory lock on `<file>.lock` for the duration,
    /// merges entries another process flushed meanwhile (in-memory entries
    /// win), writes a temp file beside the target and renames it into place.
    pub fn flush(&mut self) -> Result<usize, StorageError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let lock_path = lock_path_for(&self.path);
        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)?;
        lock_file
            .lock_exclusive()
            .map_err(|e| StorageError::Locked(lock_path.display().to_string(), e))?;

        let result = self.write_locked(&dir);

        if let Err(e) = lock_file.unlock() {
            tracing::debug!("Failed to unlock {}: {}", lock_path.display(), e);
        }
        result
    }

    fn write_locked(&mut self, dir: &Path) -> Result<usize, StorageError> {
        match read_snapshot(&self.path) {
            Ok(on_disk) => {
                for (code, entry) in on_disk {
                    self.entries.entry(code).or_insert(entry);
                }
            }
            Err(e) => tracing::warn!("Overwriting unreadable mapping file {}: {}", self.path.display(), e),
        }

        let stored: BTreeMap<&str, StoredEntry> = self
            .entries
            .iter()
            .map(|(code, entry)| (code.as_str(), entry.to_stored()))
            .collect();
        let json = serde_json::to_string_pretty(&stored)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;

        let mut tmp = tempfile::Builder::new()
            .prefix(".mapping-")
            .suffix(".tmp")
            .tempfile_in(dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| StorageError::IoError(e.error))?;

        tracing::info!("Saved {} mapping entries to {}", self.entries.len(), self.path.display());
        Ok(self.entries.len())
    }
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "mapping".into());
    name.push(".lock");
    path.with_file_name(name)
}

fn read_snapshot(path: &Path) -> Result<BTreeMap<StockCode, MappingEntry>, StorageError> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let text = fs::read_to_string(path)?;
    if text.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    let raw: BTreeMap<String, StoredValue> = serde_json::from_str(&text)
        .map_err(|e| StorageError::SerializationError(e.to_string()))?;

    let mut entries = BTreeMap::new();
    for (code, value) in raw {
        match MappingEntry::from_stored(&code, value) {
            Some(entry) => {
                entries.insert(entry.stock_code.clone(), entry);
            }
            None => tracing::warn!("Skipping malformed mapping entry for {:?}", code),
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code(s: &str) -> StockCode {
        StockCode::parse(s).unwrap()
    }

    fn org(s: &str) -> OrganizationId {
        OrganizationId::parse(s).unwrap()
    }

    #[test]
    fn test_put_flush_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stock_orgid_mapping.json");

        let mut store = MappingStore::load(&path);
        assert!(store.is_empty());
        store.put(code("300010"), org("9900008267"), Some(1));
        store.flush().unwrap();

        let reloaded = MappingStore::load(&path);
        assert_eq!(reloaded.get(&code("300010")), Some(&org("9900008267")));
        let entry = reloaded.entry(&code("300010")).unwrap();
        assert_eq!(entry.strategy, Some(1));
        assert!(entry.resolved_at.is_some());

        // No temp files left behind, only the mapping and its lock
        let mut names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["stock_orgid_mapping.json", "stock_orgid_mapping.json.lock"]);
    }

    #[test]
    fn test_missing_and_malformed_files_load_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(MappingStore::load(dir.path().join("absent.json")).is_empty());

        let broken = dir.path().join("broken.json");
        fs::write(&broken, "{ \"300010\": ").unwrap();
        assert!(MappingStore::load(&broken).is_empty());
    }

    #[test]
    fn test_reads_legacy_forms() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.json");
        fs::write(
            &path,
            r#"{
                "300010": "9900008267",
                "600519": {"orgId": "9900010519", "name": "贵州茅台", "timestamp": 1747468800.5},
                "12345": "1",
                "000001": {"orgId": "not-a-number"}
            }"#,
        )
        .unwrap();

        let store = MappingStore::load(&path);
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(&code("300010")), Some(&org("9900008267")));
        let moutai = store.entry(&code("600519")).unwrap();
        assert_eq!(moutai.name.as_deref(), Some("贵州茅台"));
        assert_eq!(moutai.resolved_at.unwrap().timestamp(), 1747468800);
    }

    #[test]
    fn test_flush_merges_entries_written_by_another_instance() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.json");

        let mut first = MappingStore::load(&path);
        let mut second = MappingStore::load(&path);
        first.put(code("300010"), org("9900008267"), Some(1));
        first.flush().unwrap();
        second.put(code("600519"), org("9900010519"), Some(4));
        second.flush().unwrap();

        let merged = MappingStore::load(&path);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.entry(&code("600519")).unwrap().strategy, Some(4));
    }

    #[test]
    fn test_flushed_file_is_plain_json_object() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.json");
        let mut store = MappingStore::load(&path);
        store.put(code("300010"), org("9900008267"), Some(3));
        store.flush().unwrap();

        let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["300010"]["orgId"], "9900008267");
        assert_eq!(value["300010"]["strategy"], 3);
    }
}
