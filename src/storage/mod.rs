//! Retention storage for completed records.
//!
//! # Design Decisions
//! - One capability trait, several backends chosen at construction time
//! - Eviction runs inside `insert`, oldest first, until the policy holds
//! - Records are shared as `Arc<Record>` and never mutated once stored
//! - A reader racing an eviction sees the whole record or nothing

pub mod file;
pub mod memory;

use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::schema::{StorageBackend, StorageConfig};
use crate::error::StorageResult;
use crate::record::{Record, RecordId, RecordSummary};

pub use file::FileStorage;
pub use memory::InMemoryStorage;

/// Bounds on what a store retains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Maximum number of records kept.
    pub max_requests: usize,
    /// Optional budget for captured body bytes across all records.
    pub max_body_bytes: Option<u64>,
}

impl RetentionPolicy {
    pub fn new(max_requests: usize) -> Self {
        Self {
            max_requests,
            max_body_bytes: None,
        }
    }

    /// Whether the oldest record has to go. The newest record is never evicted
    /// for body pressure alone.
    pub fn must_evict(&self, count: usize, body_bytes: u64) -> bool {
        if count > self.max_requests {
            return true;
        }
        match self.max_body_bytes {
            Some(budget) => count > 1 && body_bytes > budget,
            None => false,
        }
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Result of a single insert.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InsertOutcome {
    /// Records evicted to make room, oldest first.
    pub evicted: Vec<RecordId>,
}

/// Storage capability used by the recorder and the query service.
#[async_trait]
pub trait RecordStorage: Send + Sync + fmt::Debug {
    /// Append a completed record at the most recent end, then evict.
    async fn insert(&self, record: Arc<Record>) -> StorageResult<InsertOutcome>;

    /// Fetch a record by identifier.
    async fn get(&self, id: &RecordId) -> StorageResult<Option<Arc<Record>>>;

    /// Summaries of all retained records, most recent first.
    async fn list(&self) -> StorageResult<Vec<RecordSummary>>;

    /// Number of retained records.
    async fn len(&self) -> StorageResult<usize>;

    /// Drop every record.
    async fn clear(&self) -> StorageResult<()>;

    fn policy(&self) -> RetentionPolicy;
}

/// Backend selector resolved when the recorder is built.
#[derive(Clone)]
pub enum StorageFactory {
    /// Volatile in-process store (default).
    Memory,
    /// One JSON file per record under `directory`, reloaded on startup.
    File { directory: PathBuf },
    /// Host-supplied backend.
    Custom(Arc<dyn RecordStorage>),
}

impl Default for StorageFactory {
    fn default() -> Self {
        StorageFactory::Memory
    }
}

impl fmt::Debug for StorageFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageFactory::Memory => f.write_str("Memory"),
            StorageFactory::File { directory } => {
                f.debug_struct("File").field("directory", directory).finish()
            }
            StorageFactory::Custom(storage) => f.debug_tuple("Custom").field(storage).finish(),
        }
    }
}

impl From<&StorageConfig> for StorageFactory {
    fn from(config: &StorageConfig) -> Self {
        match config.backend {
            StorageBackend::Memory => StorageFactory::Memory,
            StorageBackend::File => StorageFactory::File {
                directory: PathBuf::from(&config.directory),
            },
        }
    }
}

impl StorageFactory {
    /// Construct the selected backend.
    pub async fn build(self, policy: RetentionPolicy) -> StorageResult<Arc<dyn RecordStorage>> {
        match self {
            StorageFactory::Memory => Ok(Arc::new(InMemoryStorage::new(policy))),
            StorageFactory::File { directory } => {
                Ok(Arc::new(FileStorage::open(directory, policy).await?))
            }
            StorageFactory::Custom(storage) => Ok(storage),
        }
    }
}
