//! Durable store: one JSON document per record.
//!
//! # Layout
//! ```text
//! <directory>/
//!     00000000000000000042-<record id>.json   committed record
//!     .<name>.tmp                             in-progress write, removed at open
//! ```
//!
//! Files are written to a temporary name and renamed into place, so a reader
//! never observes a partially written record. The insertion index lives in
//! memory and is rebuilt from the directory on open.
//!
//! Inserts are serialized from sequence allocation to index push, so the
//! live order, the eviction order and the on-disk order are the same.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::StorageResult;
use crate::record::{Record, RecordId, RecordSummary};
use crate::storage::{InsertOutcome, RecordStorage, RetentionPolicy};

const RECORD_EXTENSION: &str = "json";
const TEMP_SUFFIX: &str = ".tmp";

#[derive(Debug, Clone)]
struct FileEntry {
    seq: u64,
    body_bytes: u64,
    path: PathBuf,
    summary: RecordSummary,
}

#[derive(Debug, Default)]
struct FileIndex {
    entries: VecDeque<FileEntry>,
    body_bytes: u64,
    next_seq: u64,
}

/// Record store persisted under a directory.
#[derive(Debug)]
pub struct FileStorage {
    directory: PathBuf,
    policy: RetentionPolicy,
    paths: DashMap<RecordId, PathBuf>,
    index: Mutex<FileIndex>,
    writer: tokio::sync::Mutex<()>,
}

impl FileStorage {
    /// Open (or create) the store and reload retained records.
    pub async fn open(directory: impl Into<PathBuf>, policy: RetentionPolicy) -> StorageResult<Self> {
        let directory = directory.into();
        tokio::fs::create_dir_all(&directory).await?;

        let mut found: Vec<(u64, PathBuf)> = Vec::new();
        let mut dir = tokio::fs::read_dir(&directory).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.starts_with('.') && name.ends_with(TEMP_SUFFIX) {
                remove_if_exists(&path).await?;
                continue;
            }
            if let Some(seq) = parse_seq(name) {
                found.push((seq, path));
            }
        }
        found.sort_by_key(|(seq, _)| *seq);

        let storage = Self {
            directory,
            policy,
            paths: DashMap::new(),
            index: Mutex::new(FileIndex::default()),
            writer: tokio::sync::Mutex::new(()),
        };

        let mut evicted_paths = Vec::new();
        for (seq, path) in found {
            let record = match read_record(&path).await {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(path = ?path, error = %e, "Skipping unreadable record file");
                    continue;
                }
            };
            let mut index = storage.lock();
            index.next_seq = index.next_seq.max(seq + 1);
            evicted_paths.extend(storage.push_entry(&mut index, seq, path, &record));
        }
        for (_, path) in evicted_paths {
            remove_if_exists(&path).await?;
        }

        tracing::info!(
            directory = ?storage.directory,
            records = storage.lock().entries.len(),
            "File record storage opened"
        );
        Ok(storage)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FileIndex> {
        self.index.lock().expect("file index mutex poisoned")
    }

    /// Register a committed file and evict past the policy. Returns evicted
    /// ids and the files to delete.
    fn push_entry(
        &self,
        index: &mut FileIndex,
        seq: u64,
        path: PathBuf,
        record: &Record,
    ) -> Vec<(RecordId, PathBuf)> {
        let body_bytes = record.body_size();
        index.body_bytes += body_bytes;
        self.paths.insert(record.id, path.clone());
        index.entries.push_back(FileEntry {
            seq,
            body_bytes,
            path,
            summary: record.summary(),
        });

        let mut evicted = Vec::new();
        while self.policy.must_evict(index.entries.len(), index.body_bytes) {
            let Some(oldest) = index.entries.pop_front() else {
                break;
            };
            index.body_bytes -= oldest.body_bytes;
            self.paths.remove(&oldest.summary.id);
            evicted.push((oldest.summary.id, oldest.path));
        }
        evicted
    }

    fn file_name(seq: u64, id: &RecordId) -> String {
        format!("{seq:020}-{id}.{RECORD_EXTENSION}")
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

fn parse_seq(name: &str) -> Option<u64> {
    let stem = name.strip_suffix(RECORD_EXTENSION)?.strip_suffix('.')?;
    let (seq, id) = stem.split_once('-')?;
    id.parse::<RecordId>().ok()?;
    seq.parse().ok()
}

async fn read_record(path: &Path) -> StorageResult<Option<Record>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_atomically(temp_path: &Path, final_path: &Path, bytes: &[u8]) -> StorageResult<()> {
    tokio::fs::write(temp_path, bytes).await?;
    tokio::fs::rename(temp_path, final_path).await?;
    Ok(())
}

async fn remove_if_exists(path: &Path) -> StorageResult<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl RecordStorage for FileStorage {
    async fn insert(&self, record: Arc<Record>) -> StorageResult<InsertOutcome> {
        let bytes = serde_json::to_vec(record.as_ref())?;

        let evicted = {
            let _writer = self.writer.lock().await;
            if self.paths.contains_key(&record.id) {
                return Ok(InsertOutcome::default());
            }
            let seq = self.lock().next_seq;

            let name = Self::file_name(seq, &record.id);
            let final_path = self.directory.join(&name);
            let temp_path = self.directory.join(format!(".{name}{TEMP_SUFFIX}"));
            if let Err(e) = write_atomically(&temp_path, &final_path, &bytes).await {
                if let Err(cleanup) = remove_if_exists(&temp_path).await {
                    tracing::warn!(path = ?temp_path, error = %cleanup, "Failed to remove temporary record file");
                }
                return Err(e);
            }

            let mut index = self.lock();
            index.next_seq = seq + 1;
            self.push_entry(&mut index, seq, final_path, &record)
        };

        let mut outcome = InsertOutcome::default();
        for (id, path) in evicted {
            if let Err(e) = remove_if_exists(&path).await {
                tracing::warn!(path = ?path, error = %e, "Failed to delete evicted record file");
            }
            outcome.evicted.push(id);
        }
        Ok(outcome)
    }

    async fn get(&self, id: &RecordId) -> StorageResult<Option<Arc<Record>>> {
        let Some(path) = self.paths.get(id).map(|p| p.value().clone()) else {
            return Ok(None);
        };
        Ok(read_record(&path).await?.map(Arc::new))
    }

    async fn list(&self) -> StorageResult<Vec<RecordSummary>> {
        let index = self.lock();
        Ok(index.entries.iter().rev().map(|e| e.summary.clone()).collect())
    }

    async fn len(&self) -> StorageResult<usize> {
        Ok(self.lock().entries.len())
    }

    async fn clear(&self) -> StorageResult<()> {
        let _writer = self.writer.lock().await;
        let drained: Vec<FileEntry> = {
            let mut index = self.lock();
            index.body_bytes = 0;
            index.entries.drain(..).collect()
        };
        self.paths.clear();
        for entry in drained {
            remove_if_exists(&entry.path).await?;
        }
        Ok(())
    }

    fn policy(&self) -> RetentionPolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_record, sample_record_with_body};

    #[tokio::test]
    async fn test_insert_get_and_evict() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStorage::open(dir.path(), RetentionPolicy::new(2)).await.unwrap();

        let a = Arc::new(sample_record_with_body("/a", b"alpha"));
        let b = Arc::new(sample_record("/b"));
        let c = Arc::new(sample_record("/c"));
        store.insert(a.clone()).await.unwrap();
        store.insert(b.clone()).await.unwrap();
        let outcome = store.insert(c.clone()).await.unwrap();
        assert_eq!(outcome.evicted, vec![a.id]);

        let listed: Vec<_> = store.list().await.unwrap().into_iter().map(|s| s.path).collect();
        assert_eq!(listed, vec!["/c", "/b"]);
        assert!(store.get(&a.id).await.unwrap().is_none());
        assert_eq!(store.get(&b.id).await.unwrap().unwrap().as_ref(), b.as_ref());

        let files = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(files, 2);
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let a = Arc::new(sample_record_with_body("/a", b"persisted"));
        let b = Arc::new(sample_record("/b"));
        {
            let store = FileStorage::open(dir.path(), RetentionPolicy::new(10)).await.unwrap();
            store.insert(a.clone()).await.unwrap();
            store.insert(b.clone()).await.unwrap();
        }

        let reopened = FileStorage::open(dir.path(), RetentionPolicy::new(10)).await.unwrap();
        let listed: Vec<_> = reopened.list().await.unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(listed, vec![b.id, a.id]);
        let restored = reopened.get(&a.id).await.unwrap().unwrap();
        assert_eq!(&restored.request_body.as_ref().unwrap().data[..], b"persisted");

        let c = Arc::new(sample_record("/c"));
        reopened.insert(c.clone()).await.unwrap();
        assert_eq!(reopened.list().await.unwrap()[0].id, c.id);
    }

    #[tokio::test]
    async fn test_reopen_applies_smaller_policy_and_cleans_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileStorage::open(dir.path(), RetentionPolicy::new(10)).await.unwrap();
            for i in 0..4 {
                store.insert(Arc::new(sample_record(&format!("/{i}")))).await.unwrap();
            }
        }
        std::fs::write(dir.path().join(".partial.json.tmp"), b"{").unwrap();

        let reopened = FileStorage::open(dir.path(), RetentionPolicy::new(2)).await.unwrap();
        let listed: Vec<_> = reopened.list().await.unwrap().into_iter().map(|s| s.path).collect();
        assert_eq!(listed, vec!["/3", "/2"]);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[tokio::test]
    async fn test_clear_removes_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStorage::open(dir.path(), RetentionPolicy::new(10)).await.unwrap();
        store.insert(Arc::new(sample_record("/a"))).await.unwrap();
        store.clear().await.unwrap();
        assert_eq!(store.len().await.unwrap(), 0);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_inserts_keep_order_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let large = vec![b'x'; 900 * 1024];
        for round in 0..10 {
            let store = Arc::new(FileStorage::open(dir.path(), RetentionPolicy::new(6)).await.unwrap());
            let big = Arc::new(sample_record_with_body(&format!("/big-{round}"), &large));
            let small = Arc::new(sample_record(&format!("/small-{round}")));
            let first = tokio::spawn({
                let store = store.clone();
                async move { store.insert(big).await.unwrap() }
            });
            let second = tokio::spawn({
                let store = store.clone();
                async move { store.insert(small).await.unwrap() }
            });
            first.await.unwrap();
            second.await.unwrap();

            let live: Vec<RecordId> = store.list().await.unwrap().into_iter().map(|s| s.id).collect();
            drop(store);
            let reopened = FileStorage::open(dir.path(), RetentionPolicy::new(6)).await.unwrap();
            let restored: Vec<RecordId> =
                reopened.list().await.unwrap().into_iter().map(|s| s.id).collect();
            assert_eq!(live, restored, "order changed across reopen in round {round}");
            assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), restored.len());
        }
    }

    #[tokio::test]
    async fn test_duplicate_id_is_stored_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileStorage::open(dir.path(), RetentionPolicy::new(10)).await.unwrap());
        let record = Arc::new(sample_record("/once"));

        let (a, b) = tokio::join!(store.insert(record.clone()), store.insert(record.clone()));
        a.unwrap();
        b.unwrap();

        assert_eq!(store.len().await.unwrap(), 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
        assert!(store.get(&record.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failed_rename_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStorage::open(dir.path(), RetentionPolicy::new(10)).await.unwrap();
        let record = Arc::new(sample_record("/blocked"));

        // A non-empty directory where the record file should land makes the rename fail.
        let blocker = dir.path().join(FileStorage::file_name(0, &record.id));
        std::fs::create_dir(&blocker).unwrap();
        std::fs::write(blocker.join("keep"), b"").unwrap();

        assert!(store.insert(record.clone()).await.is_err());
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(TEMP_SUFFIX))
            .collect();
        assert!(leftovers.is_empty(), "left behind: {leftovers:?}");
        assert_eq!(store.len().await.unwrap(), 0);
        assert!(store.get(&record.id).await.unwrap().is_none());
    }

    #[test]
    fn test_parse_seq() {
        let id = RecordId::new();
        assert_eq!(parse_seq(&FileStorage::file_name(42, &id)), Some(42));
        assert_eq!(parse_seq("notes.txt"), None);
        assert_eq!(parse_seq("12-not-an-id.json"), None);
    }
}
