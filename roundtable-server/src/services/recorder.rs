//! Single-producer write path into the stream buffers.

use std::{slice, sync::Arc};

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use metrics::counter;
use shared::{
    models::{
        ActiveStreamPointer, StreamBufferRecord, StreamChunk, StreamPhase, StreamStatus, Timestamp,
    },
    streams::{StreamId, encode_frame},
};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use super::{
    stream_buffer::{BufferError, StreamBufferService},
    stream_supervisor::{RecordingSession, SharedStreamSupervisor, StreamStopReason},
};

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("stream {0} has not been started")]
    UnknownStream(String),
    #[error("stream {0} has already finished")]
    Finished(String),
    #[error("finish status must be completed or failed, got {0}")]
    InvalidStatus(&'static str),
    #[error("participant stream {0} needs a participant total")]
    MissingParticipantTotal(String),
    #[error("participant index {index} is outside 0..{total}")]
    ParticipantOutOfRange { index: u32, total: u32 },
    #[error("stream {0} was restarted by another producer")]
    Superseded(String),
    #[error(transparent)]
    Buffer(#[from] BufferError),
}

impl From<serde_json::Error> for RecorderError {
    fn from(err: serde_json::Error) -> Self {
        Self::Buffer(BufferError::Serialization(err))
    }
}

/// Ordered chunk producer for one phase, e.g. a model's token stream.
#[async_trait]
pub trait TokenSource: Send {
    /// Next chunk, or `None` once the producer is exhausted.
    async fn next_chunk(&mut self) -> anyhow::Result<Option<StreamChunk>>;
}

/// Adapts any `futures` stream of chunks into a [`TokenSource`].
#[derive(Debug)]
pub struct StreamSource<S> {
    inner: S,
}

impl<S> StreamSource<S> {
    pub const fn new(inner: S) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<S> TokenSource for StreamSource<S>
where
    S: Stream<Item = anyhow::Result<StreamChunk>> + Send + Unpin,
{
    async fn next_chunk(&mut self) -> anyhow::Result<Option<StreamChunk>> {
        self.inner.next().await.transpose()
    }
}

enum Ending {
    Exhausted,
    Errored(String),
}

#[derive(Debug, Clone)]
pub struct StreamRecorder {
    buffers: StreamBufferService,
    supervisor: SharedStreamSupervisor,
}

impl StreamRecorder {
    pub fn new(buffers: StreamBufferService, supervisor: SharedStreamSupervisor) -> Self {
        Self {
            buffers,
            supervisor,
        }
    }

    pub fn buffers(&self) -> &StreamBufferService {
        &self.buffers
    }

    pub fn supervisor(&self) -> &SharedStreamSupervisor {
        &self.supervisor
    }

    /// Opens (or reopens) a stream with an empty chunk log and registers its
    /// producer with the supervisor.
    ///
    /// Participant streams also move the thread's active pointer, unless the
    /// pointer already belongs to a later round. If the session is cancelled or
    /// times out before the producer finishes, the stream is failed.
    #[instrument(skip(self), fields(stream_id = %id))]
    pub async fn start(
        &self,
        id: &StreamId,
        total_participants: Option<u32>,
    ) -> Result<StreamBufferRecord, RecorderError> {
        let (record, session) = self.open_session(id, total_participants).await?;
        self.watch_session(id.clone(), session);
        Ok(record)
    }

    /// Fails the stream once `session` stops without finishing, unless a
    /// restart has replaced it.
    fn watch_session(&self, id: StreamId, session: Arc<RecordingSession>) {
        let recorder = self.clone();
        tokio::spawn(async move {
            session.cancellation_token().cancelled().await;
            let reason = session.stop_reason();
            if !matches!(reason, StreamStopReason::Cancelled | StreamStopReason::TimedOut) {
                return;
            }
            if !recorder.supervisor.is_current(&session).await {
                debug!(stream_id = %id, "session replaced by a restart");
                return;
            }
            let message = format!("producer stopped: {}", reason.as_str());
            match recorder.fail(&id, message).await {
                Ok(_) => warn!(stream_id = %id, reason = reason.as_str(), "producer abandoned stream"),
                Err(RecorderError::Finished(_)) => {}
                Err(err) => warn!(stream_id = %id, error = %err, "could not fail abandoned stream"),
            }
        });
    }

    async fn open_session(
        &self,
        id: &StreamId,
        total_participants: Option<u32>,
    ) -> Result<(StreamBufferRecord, Arc<RecordingSession>), RecorderError> {
        let now = Timestamp::now();
        let record = StreamBufferRecord {
            stream_id: id.encode(),
            thread_id: id.thread_id().to_string(),
            round_number: id.round_number(),
            phase: id.phase(),
            participant_index: id.participant_index(),
            status: StreamStatus::Active,
            chunk_count: 0,
            created_at: now,
            last_chunk_at: None,
            completed_at: None,
            error_message: None,
        };

        if record.phase == StreamPhase::Participant {
            self.point_at(&record, total_participants, now).await?;
        }

        self.buffers
            .clear_chunks(record.phase, &record.stream_id)
            .await?;
        self.buffers.put_meta(&record).await?;

        let session = self.supervisor.begin(&record.stream_id).await;
        counter!("roundtable_streams_started_total", "phase" => record.phase.as_str())
            .increment(1);
        debug!(phase = record.phase.as_str(), "stream started");
        Ok((record, session))
    }

    async fn point_at(
        &self,
        record: &StreamBufferRecord,
        total_participants: Option<u32>,
        now: Timestamp,
    ) -> Result<(), RecorderError> {
        let index = record.participant_index.unwrap_or_default();
        let pointer = match self.buffers.active_pointer(&record.thread_id).await? {
            Some(pointer) if pointer.round_number > record.round_number => {
                warn!(
                    stream_id = %record.stream_id,
                    active_round = pointer.round_number,
                    "participant started for a superseded round"
                );
                return Ok(());
            }
            Some(mut pointer) if pointer.round_number == record.round_number => {
                if let Some(total) = total_participants {
                    pointer.total_participants = total;
                }
                pointer.stream_id.clone_from(&record.stream_id);
                pointer.participant_index = index;
                pointer.participant_statuses.insert(index, StreamStatus::Active);
                pointer.updated_at = now;
                pointer
            }
            _ => {
                let total = total_participants.ok_or_else(|| {
                    RecorderError::MissingParticipantTotal(record.stream_id.clone())
                })?;
                ActiveStreamPointer {
                    thread_id: record.thread_id.clone(),
                    round_number: record.round_number,
                    stream_id: record.stream_id.clone(),
                    participant_index: index,
                    total_participants: total,
                    participant_statuses: [(index, StreamStatus::Active)].into(),
                    created_at: now,
                    updated_at: now,
                }
            }
        };

        if index >= pointer.total_participants {
            return Err(RecorderError::ParticipantOutOfRange {
                index,
                total: pointer.total_participants,
            });
        }
        self.buffers.set_active_pointer(&pointer).await?;
        Ok(())
    }

    async fn open_record(&self, id: &StreamId) -> Result<StreamBufferRecord, RecorderError> {
        let stream_id = id.encode();
        let record = self
            .buffers
            .meta(id.phase(), &stream_id)
            .await?
            .ok_or_else(|| RecorderError::UnknownStream(stream_id.clone()))?;
        if record.status.is_terminal() {
            return Err(RecorderError::Finished(stream_id));
        }
        Ok(record)
    }

    /// Buffers one frame per chunk and refreshes `chunk_count` and `last_chunk_at`.
    #[instrument(skip(self, chunks), fields(stream_id = %id, chunks = chunks.len()))]
    pub async fn append(
        &self,
        id: &StreamId,
        chunks: &[StreamChunk],
    ) -> Result<StreamBufferRecord, RecorderError> {
        let mut record = self.open_record(id).await?;
        if chunks.is_empty() {
            return Ok(record);
        }

        for chunk in chunks {
            let frame = encode_frame(chunk)?;
            let now = Timestamp::now();
            record.chunk_count = self.buffers.append_frame(&record, frame, now).await?;
            record.last_chunk_at = Some(now);
        }
        self.buffers.put_meta(&record).await?;

        counter!("roundtable_chunks_appended_total", "phase" => record.phase.as_str())
            .increment(chunks.len() as u64);
        Ok(record)
    }

    pub async fn complete(&self, id: &StreamId) -> Result<StreamBufferRecord, RecorderError> {
        self.finish(id, StreamStatus::Completed, None).await
    }

    pub async fn fail(
        &self,
        id: &StreamId,
        error_message: impl Into<String>,
    ) -> Result<StreamBufferRecord, RecorderError> {
        self.finish(id, StreamStatus::Failed, Some(error_message.into()))
            .await
    }

    /// Moves a stream to a terminal status. Participant statuses are mirrored into the active pointer.
    #[instrument(skip(self, error_message), fields(stream_id = %id, status = status.as_str()))]
    pub async fn finish(
        &self,
        id: &StreamId,
        status: StreamStatus,
        error_message: Option<String>,
    ) -> Result<StreamBufferRecord, RecorderError> {
        if !status.is_terminal() {
            return Err(RecorderError::InvalidStatus(status.as_str()));
        }

        let mut record = self.open_record(id).await?;
        let now = Timestamp::now();
        record.status = status;
        record.completed_at = Some(now);
        record.error_message = error_message;
        self.buffers.put_meta(&record).await?;
        self.supervisor.finish(&record.stream_id).await;

        if let (StreamPhase::Participant, Some(index)) = (record.phase, record.participant_index) {
            match self.buffers.active_pointer(&record.thread_id).await? {
                Some(mut pointer) if pointer.round_number == record.round_number => {
                    pointer.participant_statuses.insert(index, status);
                    pointer.updated_at = now;
                    self.buffers.set_active_pointer(&pointer).await?;
                }
                _ => debug!("active pointer belongs to another round"),
            }
        }

        counter!(
            "roundtable_streams_finished_total",
            "phase" => record.phase.as_str(),
            "status" => status.as_str()
        )
        .increment(1);
        debug!("stream finished");
        Ok(record)
    }

    /// Drives `source` into the buffer until it ends, errors, emits a terminal
    /// chunk or the supervisor cancels the session.
    ///
    /// Producer failures are recorded as a failed stream, not returned as errors.
    /// A restart of the same stream id ends this call with [`RecorderError::Superseded`].
    #[instrument(skip(self, source), fields(stream_id = %id))]
    pub async fn record_from_source<S>(
        &self,
        id: &StreamId,
        total_participants: Option<u32>,
        source: &mut S,
    ) -> Result<StreamBufferRecord, RecorderError>
    where
        S: TokenSource + ?Sized,
    {
        let (record, session) = self.open_session(id, total_participants).await?;
        let token = session.cancellation_token();

        let ending = loop {
            let next = tokio::select! {
                biased;
                () = token.cancelled() => {
                    if !self.supervisor.is_current(&session).await {
                        return Err(RecorderError::Superseded(record.stream_id));
                    }
                    break Ending::Errored(format!(
                        "producer stopped: {}",
                        session.stop_reason().as_str()
                    ));
                }
                next = source.next_chunk() => next,
            };

            match next {
                Ok(Some(chunk)) => {
                    if let Err(err) = self.append(id, slice::from_ref(&chunk)).await {
                        self.supervisor.release(&session).await;
                        return Err(err);
                    }
                    match chunk {
                        StreamChunk::Error { error_text } => break Ending::Errored(error_text),
                        StreamChunk::Finish { .. } => break Ending::Exhausted,
                        _ => {}
                    }
                }
                Ok(None) => break Ending::Exhausted,
                Err(err) => {
                    warn!(error = %err, "token source failed");
                    break Ending::Errored(err.to_string());
                }
            }
        };

        self.supervisor.release(&session).await;
        match ending {
            Ending::Exhausted => self.complete(id).await,
            Ending::Errored(message) => self.fail(id, message).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::TimeDelta;
    use futures::stream;
    use shared::models::{FinishReason, Usage};

    use super::*;
    use crate::services::{
        buffer_store::InMemoryBufferStore, stream_supervisor::StreamSupervisor,
    };

    fn recorder() -> StreamRecorder {
        StreamRecorder::new(
            StreamBufferService::new(
                Arc::new(InMemoryBufferStore::new()),
                Duration::from_secs(3600),
                TimeDelta::milliseconds(30_000),
            ),
            Arc::new(StreamSupervisor::new(None)),
        )
    }

    fn finish_chunk() -> StreamChunk {
        StreamChunk::finish(FinishReason::Stop, Usage::default())
    }

    #[tokio::test]
    async fn append_tracks_count_and_last_chunk() {
        let recorder = recorder();
        let id = StreamId::pre_search("t", 0);
        recorder.start(&id, None).await.unwrap();

        let record = recorder
            .append(&id, &[StreamChunk::text("a"), StreamChunk::text("b")])
            .await
            .unwrap();
        assert_eq!(record.chunk_count, 2);
        assert!(record.last_chunk_at.is_some());

        let frames = recorder
            .buffers()
            .chunks(StreamPhase::PreSearch, &id.encode(), 0)
            .await
            .unwrap();
        assert_eq!(frames.len(), 2);
        assert!(frames[0].data.starts_with("data: "));
    }

    #[tokio::test]
    async fn writes_after_finish_are_rejected() {
        let recorder = recorder();
        let id = StreamId::moderator("t", 0);
        recorder.start(&id, None).await.unwrap();
        recorder.complete(&id).await.unwrap();

        assert!(matches!(
            recorder.append(&id, &[StreamChunk::text("late")]).await,
            Err(RecorderError::Finished(_))
        ));
        assert!(matches!(
            recorder.fail(&id, "late").await,
            Err(RecorderError::Finished(_))
        ));
    }

    #[tokio::test]
    async fn unknown_stream_and_bad_status() {
        let recorder = recorder();
        let id = StreamId::moderator("t", 4);
        assert!(matches!(
            recorder.append(&id, &[]).await,
            Err(RecorderError::UnknownStream(_))
        ));
        assert!(matches!(
            recorder.finish(&id, StreamStatus::Active, None).await,
            Err(RecorderError::InvalidStatus("active"))
        ));
    }

    #[tokio::test]
    async fn participants_maintain_active_pointer() {
        let recorder = recorder();
        let first = StreamId::participant("t", 0, 0);
        let second = StreamId::participant("t", 0, 1);

        assert!(matches!(
            recorder.start(&first, None).await,
            Err(RecorderError::MissingParticipantTotal(_))
        ));

        recorder.start(&first, Some(2)).await.unwrap();
        recorder.complete(&first).await.unwrap();
        recorder.start(&second, None).await.unwrap();

        let pointer = recorder.buffers().active_pointer("t").await.unwrap().unwrap();
        assert_eq!(pointer.stream_id, "t_r0_participant_1");
        assert_eq!(pointer.total_participants, 2);
        assert_eq!(
            pointer.participant_statuses,
            [(0, StreamStatus::Completed), (1, StreamStatus::Active)].into()
        );

        recorder.fail(&second, "provider error").await.unwrap();
        let pointer = recorder.buffers().active_pointer("t").await.unwrap().unwrap();
        assert_eq!(
            pointer.participant_statuses.get(&1),
            Some(&StreamStatus::Failed)
        );
    }

    #[tokio::test]
    async fn later_round_supersedes_pointer() {
        let recorder = recorder();
        recorder
            .start(&StreamId::participant("t", 0, 0), Some(1))
            .await
            .unwrap();
        recorder
            .start(&StreamId::participant("t", 1, 0), Some(3))
            .await
            .unwrap();
        recorder
            .start(&StreamId::participant("t", 0, 0), Some(1))
            .await
            .unwrap();

        let pointer = recorder.buffers().active_pointer("t").await.unwrap().unwrap();
        assert_eq!(pointer.round_number, 1);
        assert_eq!(pointer.total_participants, 3);
        assert_eq!(pointer.participant_statuses.len(), 1);
    }

    #[tokio::test]
    async fn out_of_range_participant_is_rejected() {
        let recorder = recorder();
        assert!(matches!(
            recorder.start(&StreamId::participant("t", 0, 2), Some(2)).await,
            Err(RecorderError::ParticipantOutOfRange { index: 2, total: 2 })
        ));
    }

    #[tokio::test]
    async fn restart_clears_previous_chunks() {
        let recorder = recorder();
        let id = StreamId::participant("t", 0, 0);
        recorder.start(&id, Some(1)).await.unwrap();
        recorder.append(&id, &[StreamChunk::text("old")]).await.unwrap();

        let record = recorder.start(&id, None).await.unwrap();
        assert_eq!(record.chunk_count, 0);
        assert!(
            recorder
                .buffers()
                .chunks(StreamPhase::Participant, &id.encode(), 0)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn record_from_source_completes_on_finish() {
        let recorder = recorder();
        let id = StreamId::participant("t", 0, 0);
        let mut source = StreamSource::new(stream::iter(vec![
            Ok(StreamChunk::text("Hello")),
            Ok(finish_chunk()),
            Ok(StreamChunk::text("ignored")),
        ]));

        let record = recorder
            .record_from_source(&id, Some(1), &mut source)
            .await
            .unwrap();
        assert_eq!(record.status, StreamStatus::Completed);
        assert_eq!(record.chunk_count, 2);
        assert!(!recorder.supervisor().is_recording(&id.encode()).await);
    }

    #[tokio::test]
    async fn record_from_source_fails_on_producer_error() {
        let recorder = recorder();
        let id = StreamId::participant("t", 0, 0);
        let mut source = StreamSource::new(stream::iter(vec![
            Ok(StreamChunk::text("partial")),
            Err(anyhow::anyhow!("rate limited")),
        ]));

        let record = recorder
            .record_from_source(&id, Some(1), &mut source)
            .await
            .unwrap();
        assert_eq!(record.status, StreamStatus::Failed);
        assert_eq!(record.error_message.as_deref(), Some("rate limited"));
        assert_eq!(record.chunk_count, 1);

        let pointer = recorder.buffers().active_pointer("t").await.unwrap().unwrap();
        assert_eq!(
            pointer.participant_statuses.get(&0),
            Some(&StreamStatus::Failed)
        );
    }

    #[tokio::test]
    async fn error_chunk_is_buffered_then_fails_stream() {
        let recorder = recorder();
        let id = StreamId::moderator("t", 0);
        let mut source = StreamSource::new(stream::iter(vec![Ok(StreamChunk::Error {
            error_text: "context too long".into(),
        })]));

        let record = recorder
            .record_from_source(&id, None, &mut source)
            .await
            .unwrap();
        assert_eq!(record.status, StreamStatus::Failed);
        assert_eq!(record.chunk_count, 1);
        assert_eq!(record.error_message.as_deref(), Some("context too long"));
    }

    fn recorder_with_timeout(limit: Duration) -> StreamRecorder {
        StreamRecorder::new(
            StreamBufferService::new(
                Arc::new(InMemoryBufferStore::new()),
                Duration::from_secs(3600),
                TimeDelta::milliseconds(30_000),
            ),
            Arc::new(StreamSupervisor::new(Some(limit))),
        )
    }

    #[tokio::test]
    async fn started_stream_is_supervised_until_finished() {
        let recorder = recorder();
        let id = StreamId::moderator("t", 0);
        recorder.start(&id, None).await.unwrap();
        assert!(recorder.supervisor().is_recording(&id.encode()).await);

        recorder.complete(&id).await.unwrap();
        assert!(!recorder.supervisor().is_recording(&id.encode()).await);
        assert_eq!(recorder.supervisor().cancel_all().await, 0);
    }

    #[tokio::test]
    async fn silent_ingest_producer_times_out() {
        let recorder = recorder_with_timeout(Duration::from_millis(20));
        let id = StreamId::participant("t", 0, 0);
        recorder.start(&id, Some(2)).await.unwrap();
        recorder.append(&id, &[StreamChunk::text("Hel")]).await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;

        let record = recorder
            .buffers()
            .meta(StreamPhase::Participant, &id.encode())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, StreamStatus::Failed);
        assert_eq!(
            record.error_message.as_deref(),
            Some("producer stopped: timed_out")
        );
        let pointer = recorder.buffers().active_pointer("t").await.unwrap().unwrap();
        assert_eq!(
            pointer.participant_statuses.get(&0),
            Some(&StreamStatus::Failed)
        );
        assert!(!recorder.supervisor().is_recording(&id.encode()).await);
    }

    #[tokio::test]
    async fn shutdown_cancel_fails_only_the_current_attempt() {
        let recorder = recorder();
        let id = StreamId::pre_search("t", 1);
        recorder.start(&id, None).await.unwrap();
        recorder.start(&id, None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let meta = recorder
            .buffers()
            .meta(StreamPhase::PreSearch, &id.encode())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(meta.status, StreamStatus::Active);

        assert_eq!(recorder.supervisor().cancel_all().await, 1);
        tokio::time::sleep(Duration::from_millis(20)).await;

        let meta = recorder
            .buffers()
            .meta(StreamPhase::PreSearch, &id.encode())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(meta.status, StreamStatus::Failed);
        assert_eq!(
            meta.error_message.as_deref(),
            Some("producer stopped: cancelled")
        );
    }

    #[tokio::test]
    async fn restarted_stream_supersedes_running_source() {
        let recorder = recorder();
        let id = StreamId::moderator("t", 2);
        let running = {
            let recorder = recorder.clone();
            let id = id.clone();
            tokio::spawn(async move {
                let mut source =
                    StreamSource::new(stream::pending::<anyhow::Result<StreamChunk>>());
                recorder.record_from_source(&id, None, &mut source).await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        recorder.start(&id, None).await.unwrap();
        assert!(matches!(
            running.await.unwrap(),
            Err(RecorderError::Superseded(_))
        ));

        let meta = recorder
            .buffers()
            .meta(StreamPhase::Moderator, &id.encode())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(meta.status, StreamStatus::Active);
        assert!(recorder.supervisor().is_recording(&id.encode()).await);
    }

    #[tokio::test]
    async fn timed_out_producer_is_failed() {
        let recorder = recorder_with_timeout(Duration::from_millis(20));
        let id = StreamId::pre_search("t", 0);
        let mut source = StreamSource::new(stream::pending::<anyhow::Result<StreamChunk>>());

        let record = recorder
            .record_from_source(&id, None, &mut source)
            .await
            .unwrap();
        assert_eq!(record.status, StreamStatus::Failed);
        assert_eq!(
            record.error_message.as_deref(),
            Some("producer stopped: timed_out")
        );
    }
}
