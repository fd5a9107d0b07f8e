//! Default volatile store.
//!
//! Lookups go through a `DashMap` index and never touch the ordering lock.
//! Inserts and evictions update the index while holding the ordering lock, so
//! an entry leaves the index in one step and a concurrent `get` observes
//! either the whole record or a clean miss.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::error::StorageResult;
use crate::record::{Record, RecordId, RecordSummary};
use crate::storage::{InsertOutcome, RecordStorage, RetentionPolicy};

#[derive(Debug)]
struct StoredEntry {
    seq: u64,
    body_bytes: u64,
    record: Arc<Record>,
}

#[derive(Debug, Default)]
struct Ordered {
    entries: VecDeque<StoredEntry>,
    body_bytes: u64,
    next_seq: u64,
}

/// Insertion-ordered, bounded, in-memory record store.
#[derive(Debug)]
pub struct InMemoryStorage {
    policy: RetentionPolicy,
    index: DashMap<RecordId, Arc<Record>>,
    order: Mutex<Ordered>,
}

impl InMemoryStorage {
    pub fn new(policy: RetentionPolicy) -> Self {
        Self {
            policy,
            index: DashMap::new(),
            order: Mutex::new(Ordered::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Ordered> {
        self.order.lock().expect("record store mutex poisoned")
    }

    /// Append and evict. Duplicate identifiers are ignored.
    pub fn store(&self, record: Arc<Record>) -> InsertOutcome {
        let mut order = self.lock();
        if self.index.contains_key(&record.id) {
            return InsertOutcome::default();
        }

        let body_bytes = record.body_size();
        let seq = order.next_seq;
        order.next_seq += 1;
        order.body_bytes += body_bytes;
        self.index.insert(record.id, record.clone());
        order.entries.push_back(StoredEntry {
            seq,
            body_bytes,
            record,
        });

        let mut evicted = Vec::new();
        while self.policy.must_evict(order.entries.len(), order.body_bytes) {
            let Some(oldest) = order.entries.pop_front() else {
                break;
            };
            order.body_bytes -= oldest.body_bytes;
            self.index.remove(&oldest.record.id);
            tracing::trace!(id = %oldest.record.id, seq = oldest.seq, "Evicted record");
            evicted.push(oldest.record.id);
        }
        InsertOutcome { evicted }
    }

    pub fn lookup(&self, id: &RecordId) -> Option<Arc<Record>> {
        self.index.get(id).map(|r| r.value().clone())
    }

    /// Most recent first. Only handle clones happen under the lock.
    pub fn snapshot(&self) -> Vec<Arc<Record>> {
        let order = self.lock();
        order.entries.iter().rev().map(|e| e.record.clone()).collect()
    }

    pub fn count(&self) -> usize {
        self.lock().entries.len()
    }

    /// Captured body bytes currently retained.
    pub fn body_bytes(&self) -> u64 {
        self.lock().body_bytes
    }

    pub fn purge(&self) {
        let mut order = self.lock();
        order.entries.clear();
        order.body_bytes = 0;
        self.index.clear();
    }
}

#[async_trait]
impl RecordStorage for InMemoryStorage {
    async fn insert(&self, record: Arc<Record>) -> StorageResult<InsertOutcome> {
        Ok(self.store(record))
    }

    async fn get(&self, id: &RecordId) -> StorageResult<Option<Arc<Record>>> {
        Ok(self.lookup(id))
    }

    async fn list(&self) -> StorageResult<Vec<RecordSummary>> {
        Ok(self.snapshot().iter().map(|r| r.summary()).collect())
    }

    async fn len(&self) -> StorageResult<usize> {
        Ok(self.count())
    }

    async fn clear(&self) -> StorageResult<()> {
        self.purge();
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

    #[test]
    fn test_keeps_most_recent_in_order() {
        let store = InMemoryStorage::new(RetentionPolicy::new(2));
        let a = Arc::new(sample_record("/a"));
        let b = Arc::new(sample_record("/b"));
        let c = Arc::new(sample_record("/c"));

        assert!(store.store(a.clone()).evicted.is_empty());
        assert!(store.store(b.clone()).evicted.is_empty());
        let outcome = store.store(c.clone());
        assert_eq!(outcome.evicted, vec![a.id]);

        let paths: Vec<_> = store.snapshot().iter().map(|r| r.path.clone()).collect();
        assert_eq!(paths, vec!["/c", "/b"]);
        assert!(store.lookup(&a.id).is_none());
        assert_eq!(store.lookup(&b.id).unwrap().path, "/b");
    }

    #[test]
    fn test_duplicate_insert_is_ignored() {
        let store = InMemoryStorage::new(RetentionPolicy::new(5));
        let a = Arc::new(sample_record("/a"));
        store.store(a.clone());
        store.store(a);
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn test_body_budget_evicts_oldest() {
        let store = InMemoryStorage::new(RetentionPolicy {
            max_requests: 10,
            max_body_bytes: Some(10),
        });
        store.store(Arc::new(sample_record_with_body("/a", b"123456")));
        store.store(Arc::new(sample_record_with_body("/b", b"123456")));
        assert_eq!(store.count(), 1);
        assert_eq!(store.body_bytes(), 6);
        assert_eq!(store.snapshot()[0].path, "/b");
    }

    #[test]
    fn test_purge() {
        let store = InMemoryStorage::new(RetentionPolicy::new(5));
        let a = Arc::new(sample_record("/a"));
        store.store(a.clone());
        store.purge();
        assert_eq!(store.count(), 0);
        assert!(store.lookup(&a.id).is_none());
    }

    #[test]
    fn test_concurrent_inserts_respect_capacity() {
        let store = Arc::new(InMemoryStorage::new(RetentionPolicy::new(16)));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        store.store(Arc::new(sample_record(&format!("/{t}/{i}"))));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.count(), 16);
        assert_eq!(store.index.len(), 16);
    }

    #[test]
    fn test_get_during_eviction_sees_whole_record_or_nothing() {
        let store = Arc::new(InMemoryStorage::new(RetentionPolicy::new(1)));
        let first = Arc::new(sample_record_with_body("/first", b"payload"));
        let id = first.id;
        store.store(first.clone());

        let reader = {
            let store = store.clone();
            std::thread::spawn(move || {
                for _ in 0..10_000 {
                    if let Some(found) = store.lookup(&id) {
                        assert_eq!(found.path, "/first");
                        assert_eq!(&found.request_body.as_ref().unwrap().data[..], b"payload");
                    }
                }
            })
        };
        for i in 0..100 {
            store.store(Arc::new(sample_record(&format!("/next/{i}"))));
        }
        reader.join().unwrap();
        assert!(store.lookup(&id).is_none());
    }
}
