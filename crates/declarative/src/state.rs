//! State stores for last-applied resource records
//!
//! Only the executor writes state, and only after the provider confirmed
//! the change. Writes to the same resource name are serialized; writes to
//! different names proceed independently.

use crate::error::{StateError, StateResult};
use crate::types::StateRecord;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Persistence for [`StateRecord`]s keyed by logical resource name
pub trait StateStore: Send + Sync {
    /// Load every record
    fn load(&self) -> StateResult<BTreeMap<String, StateRecord>>;

    /// Insert or replace the record for `name`
    fn save(&self, name: &str, record: &StateRecord) -> StateResult<()>;

    /// Remove the record for `name`; removing a missing record is not an error
    fn remove(&self, name: &str) -> StateResult<()>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// In-memory state, for tests and previews
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    records: Mutex<BTreeMap<String, StateRecord>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing set of records
    pub fn with_records(records: BTreeMap<String, StateRecord>) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }

    /// Copy of the current records
    pub fn snapshot(&self) -> BTreeMap<String, StateRecord> {
        lock(&self.records).clone()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> StateResult<BTreeMap<String, StateRecord>> {
        Ok(self.snapshot())
    }

    fn save(&self, name: &str, record: &StateRecord) -> StateResult<()> {
        lock(&self.records).insert(name.to_string(), record.clone());
        Ok(())
    }

    fn remove(&self, name: &str) -> StateResult<()> {
        lock(&self.records).remove(name);
        Ok(())
    }
}

/// One JSON file per resource under a directory
///
/// Files are written to a temporary sibling and renamed into place, so a
/// crash mid-write never leaves a truncated record behind.
#[derive(Debug)]
pub struct FileStateStore {
    dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl FileStateStore {
    /// Use `dir` for record files; it is created on first write
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Directory holding the record files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> StateResult<PathBuf> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StateError::InvalidKey(name.to_string()));
        }
        Ok(self.dir.join(format!("{name}.json")))
    }

    /// Per-name lock; the table lock is held only long enough to fetch it
    fn name_lock(&self, name: &str) -> Arc<Mutex<()>> {
        Arc::clone(lock(&self.locks).entry(name.to_string()).or_default())
    }

    fn io_error(path: &Path, source: std::io::Error) -> StateError {
        StateError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> StateResult<BTreeMap<String, StateRecord>> {
        let mut records = BTreeMap::new();
        if !self.dir.exists() {
            log::debug!("State directory {} does not exist yet", self.dir.display());
            return Ok(records);
        }

        let entries = fs::read_dir(&self.dir).map_err(|e| Self::io_error(&self.dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| Self::io_error(&self.dir, e))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            let content = fs::read_to_string(&path).map_err(|e| Self::io_error(&path, e))?;
            let record: StateRecord =
                serde_json::from_str(&content).map_err(|source| StateError::Serde {
                    path: path.clone(),
                    source,
                })?;
            records.insert(name.to_string(), record);
        }

        log::debug!(
            "Loaded {} state records from {}",
            records.len(),
            self.dir.display()
        );
        Ok(records)
    }

    fn save(&self, name: &str, record: &StateRecord) -> StateResult<()> {
        let path = self.path_for(name)?;
        let name_lock = self.name_lock(name);
        let _guard = lock(&name_lock);

        fs::create_dir_all(&self.dir).map_err(|e| Self::io_error(&self.dir, e))?;
        let mut tmp =
            tempfile::NamedTempFile::new_in(&self.dir).map_err(|e| Self::io_error(&self.dir, e))?;
        serde_json::to_writer_pretty(&mut tmp, record).map_err(|source| StateError::Serde {
            path: path.clone(),
            source,
        })?;
        tmp.write_all(b"\n").map_err(|e| Self::io_error(&path, e))?;
        tmp.persist(&path)
            .map_err(|e| Self::io_error(&path, e.error))?;

        log::debug!("Saved state for '{}' to {}", name, path.display());
        Ok(())
    }

    fn remove(&self, name: &str) -> StateResult<()> {
        let path = self.path_for(name)?;
        let name_lock = self.name_lock(name);
        let _guard = lock(&name_lock);

        match fs::remove_file(&path) {
            Ok(()) => {
                log::debug!("Removed state for '{}'", name);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::io_error(&path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Attributes, ResourceKind};
    use chrono::Utc;
    use serde_json::json;

    fn record(id: &str) -> StateRecord {
        let mut outputs = Attributes::new();
        outputs.insert("arn".into(), json!(format!("arn:test:{id}")));
        StateRecord {
            kind: ResourceKind::Cluster,
            id: id.to_string(),
            inputs: Attributes::new(),
            outputs,
            dependencies: vec!["role".into()],
            applied_at: Utc::now(),
        }
    }

    #[test]
    fn test_file_store_save_load_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("resources"));

        assert!(store.load().unwrap().is_empty());

        store.save("cluster", &record("c-1")).unwrap();
        store.save("cluster", &record("c-2")).unwrap();
        store.save("other", &record("c-3")).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded["cluster"].id, "c-2");
        assert_eq!(loaded["cluster"].dependencies, ["role"]);

        store.remove("cluster").unwrap();
        store.remove("cluster").unwrap();
        assert_eq!(store.load().unwrap().keys().collect::<Vec<_>>(), ["other"]);
    }

    #[test]
    fn test_file_store_ignores_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("README.txt"), "not state").unwrap();
        let store = FileStateStore::new(dir.path());
        store.save("lb", &record("lb-1")).unwrap();
        assert_eq!(store.load().unwrap().len(), 1);
    }

    #[test]
    fn test_file_store_rejects_path_like_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path());
        assert!(matches!(
            store.save("../escape", &record("x")),
            Err(StateError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_file_store_reports_corrupt_record() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.json"), "{not json").unwrap();
        let store = FileStateStore::new(dir.path());
        assert!(matches!(store.load(), Err(StateError::Serde { .. })));
    }

    #[test]
    fn test_concurrent_writes_to_distinct_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileStateStore::new(dir.path()));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    store.save(&format!("node-{i}"), &record(&format!("id-{i}"))).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.load().unwrap().len(), 8);
    }

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryStateStore::new();
        store.save("a", &record("1")).unwrap();
        assert_eq!(store.snapshot().len(), 1);
        store.remove("a").unwrap();
        assert!(store.load().unwrap().is_empty());
    }
}
