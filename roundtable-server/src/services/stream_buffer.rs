//! Typed access to the buffer store key layout.
//!
//! | Key | Value | TTL |
//! | --- | --- | --- |
//! | `{prefix}:meta:{stream_id}` | [`StreamBufferRecord`] JSON | from creation |
//! | `{prefix}:chunks:{stream_id}` | list of [`BufferedChunk`] JSON | from creation |
//! | `thread:{thread_id}:active` | [`ActiveStreamPointer`] JSON | none |
//!
//! `prefix` is `presearch`, `stream` or `moderator` depending on the phase.

use std::{sync::Arc, time::Duration};

use chrono::TimeDelta;
use shared::{
    models::{ActiveStreamPointer, BufferedChunk, StreamBufferRecord, StreamPhase, Timestamp},
    streams::is_stale,
};
use thiserror::Error;
use tracing::{instrument, trace};

use super::buffer_store::BufferStore;

#[derive(Debug, Error)]
pub enum BufferError {
    #[error("buffer store failure: {0}")]
    Store(#[from] anyhow::Error),
    #[error("buffer value is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[must_use]
pub fn meta_key(phase: StreamPhase, stream_id: &str) -> String {
    format!("{}:meta:{stream_id}", phase.key_prefix())
}

#[must_use]
pub fn chunks_key(phase: StreamPhase, stream_id: &str) -> String {
    format!("{}:chunks:{stream_id}", phase.key_prefix())
}

#[must_use]
pub fn active_key(thread_id: &str) -> String {
    format!("thread:{thread_id}:active")
}

#[derive(Debug, Clone)]
pub struct StreamBufferService {
    store: Arc<dyn BufferStore>,
    ttl: Duration,
    stale_timeout: TimeDelta,
}

impl StreamBufferService {
    pub fn new(store: Arc<dyn BufferStore>, ttl: Duration, stale_timeout: TimeDelta) -> Self {
        Self {
            store,
            ttl,
            stale_timeout,
        }
    }

    pub fn store(&self) -> &Arc<dyn BufferStore> {
        &self.store
    }

    /// TTL left for keys of a stream created at `created_at`, never below one millisecond.
    fn remaining_ttl(&self, created_at: Timestamp) -> Duration {
        let age = created_at
            .elapsed_until(Timestamp::now())
            .to_std()
            .unwrap_or_default();
        self.ttl
            .checked_sub(age)
            .unwrap_or_default()
            .max(Duration::from_millis(1))
    }

    #[instrument(skip(self), level = "trace")]
    pub async fn meta(
        &self,
        phase: StreamPhase,
        stream_id: &str,
    ) -> Result<Option<StreamBufferRecord>, BufferError> {
        match self.store.get(&meta_key(phase, stream_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn put_meta(&self, record: &StreamBufferRecord) -> Result<(), BufferError> {
        let raw = serde_json::to_string(record)?;
        self.store
            .set(
                &meta_key(record.phase, &record.stream_id),
                raw,
                Some(self.remaining_ttl(record.created_at)),
            )
            .await?;
        trace!(stream_id = %record.stream_id, status = record.status.as_str(), "stream meta written");
        Ok(())
    }

    /// Appends one SSE frame to the stream's chunk log and returns the log length.
    pub async fn append_frame(
        &self,
        record: &StreamBufferRecord,
        frame: String,
        timestamp: Timestamp,
    ) -> Result<u64, BufferError> {
        let raw = serde_json::to_string(&BufferedChunk {
            data: frame,
            timestamp,
        })?;
        let len = self
            .store
            .append(
                &chunks_key(record.phase, &record.stream_id),
                raw,
                Some(self.remaining_ttl(record.created_at)),
            )
            .await?;
        trace!(stream_id = %record.stream_id, len, "chunk appended");
        Ok(len)
    }

    /// Buffered chunks from index `start` onward, in append order.
    pub async fn chunks(
        &self,
        phase: StreamPhase,
        stream_id: &str,
        start: usize,
    ) -> Result<Vec<BufferedChunk>, BufferError> {
        self.store
            .range(&chunks_key(phase, stream_id), start)
            .await?
            .iter()
            .map(|raw| serde_json::from_str(raw).map_err(BufferError::from))
            .collect()
    }

    pub async fn clear_chunks(&self, phase: StreamPhase, stream_id: &str) -> Result<(), BufferError> {
        self.store.delete(&chunks_key(phase, stream_id)).await?;
        Ok(())
    }

    pub async fn active_pointer(
        &self,
        thread_id: &str,
    ) -> Result<Option<ActiveStreamPointer>, BufferError> {
        match self.store.get(&active_key(thread_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn set_active_pointer(&self, pointer: &ActiveStreamPointer) -> Result<(), BufferError> {
        let raw = serde_json::to_string(pointer)?;
        self.store
            .set(&active_key(&pointer.thread_id), raw, None)
            .await?;
        Ok(())
    }

    /// Whether an active stream has gone quiet for longer than the configured window.
    pub fn is_stale(&self, record: &StreamBufferRecord) -> bool {
        is_stale(
            record.last_chunk_at,
            record.created_at,
            record.has_chunks(),
            self.stale_timeout,
        )
    }

    /// Active and still producing.
    pub fn is_live(&self, record: &StreamBufferRecord) -> bool {
        !record.status.is_terminal() && !self.is_stale(record)
    }
}
