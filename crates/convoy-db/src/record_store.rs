//! Generic id-keyed JSON record store with a write-through cache.

use crate::atomic::{read_json, remove_orphaned_tmp, write_json_atomic};
use crate::counter::IdAllocator;
use crate::locks::LockRegistry;
use anyhow::{Context, Result};
use convoy_core::id::{format_sequence, parse_sequence};
use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

/// An entity persisted as `<dir>/<PREFIX>-NNN.json`.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const PREFIX: &'static str;

    fn record_id(&self) -> &str;
}

/// One directory of records of a single type.
///
/// The cache only ever reflects what was read from or written to disk by
/// this process. Multi-process access to the same directory is unsupported.
pub struct RecordStore<R: Record> {
    dir: PathBuf,
    cache: DashMap<String, R>,
    locks: LockRegistry,
    ids: IdAllocator,
}

impl<R: Record> RecordStore<R> {
    /// Open the directory, clearing interrupted writes and recovering the
    /// id counter from the highest sequence present.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        remove_orphaned_tmp(&dir)?;

        let max_seq = scan_sequences::<R>(&dir)?.into_iter().max().unwrap_or(0);
        tracing::debug!(dir = %dir.display(), prefix = R::PREFIX, max_seq, "record store opened");

        Ok(Self {
            dir,
            cache: DashMap::new(),
            locks: LockRegistry::new(),
            ids: IdAllocator::recover(max_seq),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Allocate the next `<PREFIX>-NNN` id.
    pub fn next_id(&self) -> String {
        format_sequence(R::PREFIX, self.ids.allocate())
    }

    /// Load a record, from cache when present. Ids that are not
    /// `<PREFIX>-NNN` never resolve.
    pub fn load(&self, id: &str) -> Result<Option<R>> {
        if parse_sequence(id, R::PREFIX).is_none() {
            return Ok(None);
        }
        if let Some(cached) = self.cache.get(id) {
            return Ok(Some(cached.value().clone()));
        }

        let Some(record) = read_json::<R>(&self.path_for(id))? else {
            return Ok(None);
        };
        // A concurrent save may have landed while we were reading; keep it.
        let entry = self.cache.entry(id.to_string()).or_insert(record);
        Ok(Some(entry.value().clone()))
    }

    /// Persist a record, then refresh the cache.
    pub fn save(&self, record: &R) -> Result<()> {
        let id = record.record_id();
        write_json_atomic(&self.path_for(id), record)
            .with_context(|| format!("failed to save {id}"))?;
        self.cache.insert(id.to_string(), record.clone());
        tracing::debug!(id, "record saved");
        Ok(())
    }

    pub fn contains(&self, id: &str) -> Result<bool> {
        Ok(self.load(id)?.is_some())
    }

    /// Every record in the directory, ordered by sequence.
    pub fn list(&self) -> Result<Vec<R>> {
        let mut seqs = scan_sequences::<R>(&self.dir)?;
        seqs.sort_unstable();
        let mut records = Vec::with_capacity(seqs.len());
        for seq in seqs {
            if let Some(record) = self.load(&format_sequence(R::PREFIX, seq))? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Run `f` while holding the lock for `id`. Re-load inside `f`.
    pub fn with_lock<T>(&self, id: &str, f: impl FnOnce() -> T) -> T {
        self.locks.with_lock(id, f)
    }
}

fn scan_sequences<R: Record>(dir: &Path) -> Result<Vec<u64>> {
    let mut seqs = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("failed to scan {}", dir.display()))? {
        let path = entry?.path();
        if path.extension().is_none_or(|ext| ext != "json") {
            continue;
        }
        if let Some(seq) = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|stem| parse_sequence(stem, R::PREFIX))
        {
            seqs.push(seq);
        }
    }
    Ok(seqs)
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: String,
        body: String,
    }

    impl Record for Note {
        const PREFIX: &'static str = "note";

        fn record_id(&self) -> &str {
            &self.id
        }
    }

    fn note(store: &RecordStore<Note>, body: &str) -> Note {
        Note {
            id: store.next_id(),
            body: body.into(),
        }
    }

    #[test]
    fn save_load_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::<Note>::open(dir.path()).unwrap();
        let a = note(&store, "a");
        let b = note(&store, "b");
        assert_eq!(a.id, "note-001");
        assert_eq!(b.id, "note-002");
        store.save(&b).unwrap();
        store.save(&a).unwrap();

        assert_eq!(store.load("note-001").unwrap(), Some(a.clone()));
        let ids: Vec<_> = store.list().unwrap().into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec!["note-001", "note-002"]);
        assert!(dir.path().join("note-001.json").exists());
    }

    #[test]
    fn unknown_and_malformed_ids_resolve_to_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::<Note>::open(dir.path()).unwrap();
        assert!(store.load("note-404").unwrap().is_none());
        assert!(store.load("../note-001").unwrap().is_none());
        assert!(store.load("other-001").unwrap().is_none());
        assert!(!store.contains("note-001").unwrap());
    }

    #[test]
    fn reopen_recovers_counter_and_reads_disk() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = RecordStore::<Note>::open(dir.path()).unwrap();
            for body in ["a", "b", "c"] {
                let n = note(&store, body);
                store.save(&n).unwrap();
            }
        }
        let store = RecordStore::<Note>::open(dir.path()).unwrap();
        assert_eq!(store.next_id(), "note-004");
        assert_eq!(store.load("note-002").unwrap().unwrap().body, "b");
    }

    #[test]
    fn foreign_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("README.md"), "hi").unwrap();
        std::fs::write(dir.path().join("note-abc.json"), "{}").unwrap();
        let store = RecordStore::<Note>::open(dir.path()).unwrap();
        assert!(store.list().unwrap().is_empty());
        assert_eq!(store.next_id(), "note-001");
    }
}
