pub mod resume;
pub mod sse;
pub mod staleness;
pub mod stream_id;

pub use resume::{ResumeDecodeError, ResumeOutcome, ResumeStatus, find_next_participant};
pub use sse::{SseDecodeError, SseFrameDecoder, encode_frame};
pub use staleness::{DEFAULT_STALE_TIMEOUT_MS, is_stale, is_stale_at, timeout_from_millis};
pub use stream_id::StreamId;
