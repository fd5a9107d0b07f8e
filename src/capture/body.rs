//! Capped body capture.
//!
//! Bytes past the limit are counted but not kept, so a body of any size costs
//! at most `limit` bytes of memory.

use bytes::BytesMut;

use crate::record::CapturedBody;

#[derive(Debug, Default)]
pub struct BodyBuffer {
    limit: usize,
    data: BytesMut,
    total_len: u64,
    truncated: bool,
}

impl BodyBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            data: BytesMut::new(),
            total_len: 0,
            truncated: false,
        }
    }

    /// Observe one chunk of the body.
    pub fn push(&mut self, chunk: &[u8]) {
        self.total_len += chunk.len() as u64;
        let room = self.limit.saturating_sub(self.data.len());
        if chunk.len() > room {
            self.truncated = true;
        }
        let keep = chunk.len().min(room);
        if keep > 0 {
            self.data.extend_from_slice(&chunk[..keep]);
        }
    }

    pub fn total_len(&self) -> u64 {
        self.total_len
    }

    /// Take the captured body. `None` if no bytes were observed.
    pub fn take(&mut self) -> Option<CapturedBody> {
        if self.total_len == 0 {
            return None;
        }
        let body = CapturedBody {
            data: std::mem::take(&mut self.data).freeze(),
            total_len: self.total_len,
            truncated: self.truncated,
        };
        self.total_len = 0;
        self.truncated = false;
        Some(body)
    }
}
