use std::{sync::Arc, time::Duration};

use shared::{config::server::Config, streams::timeout_from_millis};

use crate::services::{
    buffer_store::{BufferStore, InMemoryBufferStore},
    recorder::StreamRecorder,
    resume_service::ResumeService,
    stream_buffer::StreamBufferService,
    stream_supervisor::{SharedStreamSupervisor, StreamSupervisor},
};

/// Shared across all routes.
#[derive(Debug, Clone)]
pub struct AppState {
    pub(crate) config: Arc<Config>,
    pub(crate) store: Arc<dyn BufferStore>,
    pub(crate) recorder: StreamRecorder,
    pub(crate) resume: ResumeService,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn BufferStore>,
        supervisor: SharedStreamSupervisor,
    ) -> Self {
        let streams = &config.streams;
        let buffers = StreamBufferService::new(
            Arc::clone(&store),
            Duration::from_secs(streams.buffer_ttl_seconds),
            timeout_from_millis(config.stale_timeout_ms()),
        );
        let recorder = StreamRecorder::new(buffers.clone(), supervisor);
        let resume = ResumeService::new(
            buffers,
            Duration::from_millis(streams.replay_poll_interval_ms),
        );

        Self {
            config,
            store,
            recorder,
            resume,
        }
    }

    /// State backed by a fresh process-local store.
    pub fn in_memory(config: Arc<Config>) -> Self {
        let supervisor = Arc::new(StreamSupervisor::new(config.streams.producer_timeout()));
        Self::new(config, Arc::new(InMemoryBufferStore::new()), supervisor)
    }
}
