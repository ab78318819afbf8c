//! Answers "what is running for this round, and can I attach to it?".

use std::time::Duration;

use async_stream::try_stream;
use futures::Stream;
use metrics::counter;
use shared::{
    models::{MessageId, StreamBufferRecord, StreamPhase, Timestamp},
    streams::{ResumeOutcome, ResumeStatus, StreamId},
};
use tracing::{debug, instrument, warn};

use super::stream_buffer::{BufferError, StreamBufferService};

#[derive(Debug, Clone)]
pub struct ResumeService {
    buffers: StreamBufferService,
    poll_interval: Duration,
}

impl ResumeService {
    pub fn new(buffers: StreamBufferService, poll_interval: Duration) -> Self {
        Self {
            buffers,
            poll_interval,
        }
    }

    /// Resolves the resumable phase of `round_number`, checking pre-search,
    /// then the participant pointer, then the moderator.
    ///
    /// Only a live participant stream yields [`ResumeStatus::Live`]; every
    /// other answer is metadata for the client to act on.
    #[instrument(
        skip(self),
        fields(stream_id = tracing::field::Empty, phase = tracing::field::Empty)
    )]
    pub async fn resume(
        &self,
        thread_id: &str,
        round_number: u32,
    ) -> Result<ResumeOutcome, BufferError> {
        let outcome = self.resolve(thread_id, round_number).await?;

        let span = tracing::Span::current();
        if let Some(stream_id) = &outcome.stream_id {
            span.record("stream_id", stream_id.as_str());
        }
        if let Some(phase) = outcome.phase {
            span.record("phase", phase.as_str());
        }

        counter!(
            "roundtable_resume_outcomes_total",
            "phase" => outcome.phase.map_or("none", StreamPhase::as_str),
            "status" => if outcome.is_live() { "live" } else { "no_content" }
        )
        .increment(1);
        debug!(live = outcome.is_live(), "resume resolved");
        Ok(outcome)
    }

    async fn resolve(
        &self,
        thread_id: &str,
        round_number: u32,
    ) -> Result<ResumeOutcome, BufferError> {
        let pre_search_id = StreamId::pre_search(thread_id, round_number).encode();
        if let Some(record) = self
            .buffers
            .meta(StreamPhase::PreSearch, &pre_search_id)
            .await?
        {
            if self.still_running(&record) {
                return Ok(ResumeOutcome::pre_search(pre_search_id, round_number));
            }
        }

        if let Some(pointer) = self
            .buffers
            .active_pointer(thread_id)
            .await?
            .filter(|pointer| pointer.round_number == round_number)
        {
            let record = self
                .buffers
                .meta(StreamPhase::Participant, &pointer.stream_id)
                .await?;
            let outcome = ResumeOutcome::participant(ResumeStatus::NoContent, &pointer);

            match record {
                Some(record) if !record.status.is_terminal() => {
                    if self.still_running(&record) {
                        return Ok(ResumeOutcome {
                            status: ResumeStatus::Live,
                            ..outcome
                        });
                    }
                    return Ok(outcome);
                }
                _ if outcome.next_participant_index.is_some() => return Ok(outcome),
                _ => {}
            }
        }

        let moderator_id = StreamId::moderator(thread_id, round_number).encode();
        if let Some(record) = self
            .buffers
            .meta(StreamPhase::Moderator, &moderator_id)
            .await?
        {
            if self.still_running(&record) {
                return Ok(ResumeOutcome::moderator(
                    moderator_id,
                    round_number,
                    MessageId::moderator(thread_id, round_number).as_str(),
                ));
            }
        }

        Ok(ResumeOutcome::idle())
    }

    /// Active and fresh. Active but stale streams are logged as abandoned.
    fn still_running(&self, record: &StreamBufferRecord) -> bool {
        if record.status.is_terminal() {
            return false;
        }
        if self.buffers.is_stale(record) {
            warn!(
                stream_id = %record.stream_id,
                phase = record.phase.as_str(),
                chunk_count = record.chunk_count,
                "stream went stale, treating as abandoned"
            );
            counter!("roundtable_stale_streams_total", "phase" => record.phase.as_str())
                .increment(1);
            return false;
        }
        true
    }

    /// Replays buffered frames in order, then tails new ones until the stream
    /// finishes, goes stale or its metadata disappears.
    ///
    /// A restart under the same id (new `created_at`) replays the new attempt
    /// from its first frame.
    pub fn replay(
        &self,
        phase: StreamPhase,
        stream_id: String,
    ) -> impl Stream<Item = Result<String, BufferError>> + Send + 'static {
        let buffers = self.buffers.clone();
        let poll_interval = self.poll_interval;

        try_stream! {
            let mut cursor = 0usize;
            let mut attempt: Option<Timestamp> = None;
            loop {
                // Meta before chunks: frames written before a terminal status are drained in the same pass.
                let record = buffers.meta(phase, &stream_id).await?;
                if let Some(record) = &record {
                    if attempt.is_some_and(|started| started != record.created_at) {
                        debug!(stream_id = %stream_id, frames = cursor, "stream restarted, rewinding replay");
                        cursor = 0;
                    }
                    attempt = Some(record.created_at);
                }
                let chunks = buffers.chunks(phase, &stream_id, cursor).await?;
                cursor += chunks.len();
                for chunk in chunks {
                    yield chunk.data;
                }

                let keep_tailing = record
                    .as_ref()
                    .is_some_and(|record| buffers.is_live(record));
                if !keep_tailing {
                    debug!(stream_id = %stream_id, frames = cursor, "replay finished");
                    break;
                }
                tokio::time::sleep(poll_interval).await;
            }
        }
    }
}
