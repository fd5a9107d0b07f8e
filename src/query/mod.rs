//! Read side for viewers.
//!
//! Every read goes straight to the record store; the service holds no state
//! of its own. A missing id is `Ok(None)`, never an error.

use bytes::Bytes;
use std::sync::Arc;

use crate::error::StorageResult;
use crate::record::{CapturedBody, Record, RecordDetail, RecordId, RecordSummary};
use crate::storage::RecordStorage;

#[derive(Debug, Clone)]
pub struct QueryService {
    storage: Arc<dyn RecordStorage>,
}

impl QueryService {
    pub fn new(storage: Arc<dyn RecordStorage>) -> Self {
        Self { storage }
    }

    /// Summaries of retained records, most recent first.
    pub async fn list(&self) -> StorageResult<Vec<RecordSummary>> {
        self.storage.list().await
    }

    pub async fn get(&self, id: &RecordId) -> StorageResult<Option<Arc<Record>>> {
        self.storage.get(id).await
    }

    pub async fn get_detail(&self, id: &RecordId) -> StorageResult<Option<RecordDetail>> {
        Ok(self.storage.get(id).await?.map(|record| record.detail()))
    }

    /// Captured request body. Empty when the record exists without one.
    pub async fn get_request_body(&self, id: &RecordId) -> StorageResult<Option<Bytes>> {
        self.body(id, |record| record.request_body.as_ref()).await
    }

    /// Captured response body. Empty when the record exists without one.
    pub async fn get_response_body(&self, id: &RecordId) -> StorageResult<Option<Bytes>> {
        self.body(id, |record| record.response_body.as_ref()).await
    }

    async fn body<F>(&self, id: &RecordId, select: F) -> StorageResult<Option<Bytes>>
    where
        F: FnOnce(&Record) -> Option<&CapturedBody>,
    {
        Ok(self.storage.get(id).await?.map(|record| {
            select(&record)
                .map(|body| body.data.clone())
                .unwrap_or_default()
        }))
    }

    pub async fn clear(&self) -> StorageResult<()> {
        self.storage.clear().await
    }
}
