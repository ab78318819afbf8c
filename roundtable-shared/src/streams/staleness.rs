use chrono::TimeDelta;

use crate::models::Timestamp;

/// Default quiet window. Reasoning models can think for ~25s before the first token.
pub const DEFAULT_STALE_TIMEOUT_MS: i64 = 30_000;

/// Whether a stream has been quiet longer than `timeout`, measured against the wall clock.
#[must_use]
pub fn is_stale(
    last_chunk_at: Option<Timestamp>,
    created_at: Timestamp,
    has_chunks: bool,
    timeout: TimeDelta,
) -> bool {
    is_stale_at(Timestamp::now(), last_chunk_at, created_at, has_chunks, timeout)
}

/// Pure form of [`is_stale`] with an explicit `now`.
///
/// With chunks the reference is the last chunk, otherwise the creation time.
/// Exactly `timeout` is still alive.
#[must_use]
pub fn is_stale_at(
    now: Timestamp,
    last_chunk_at: Option<Timestamp>,
    created_at: Timestamp,
    has_chunks: bool,
    timeout: TimeDelta,
) -> bool {
    match (has_chunks, last_chunk_at) {
        (true, Some(last_chunk)) => last_chunk.elapsed_until(now) > timeout,
        (false, _) => created_at.elapsed_until(now) > timeout,
        (true, None) => false,
    }
}

#[must_use]
pub fn timeout_from_millis(timeout_ms: i64) -> TimeDelta {
    TimeDelta::milliseconds(timeout_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn at(millis: i64) -> Timestamp {
        Timestamp(Utc.timestamp_millis_opt(1_700_000_000_000 + millis).unwrap())
    }

    fn timeout() -> TimeDelta {
        timeout_from_millis(DEFAULT_STALE_TIMEOUT_MS)
    }

    #[test]
    fn chunked_stream_uses_last_chunk_time() {
        let created = at(0);
        let last_chunk = at(50_000);

        assert!(!is_stale_at(at(80_000), Some(last_chunk), created, true, timeout()));
        assert!(is_stale_at(at(80_001), Some(last_chunk), created, true, timeout()));
    }

    #[test]
    fn boundary_is_not_stale() {
        let created = at(0);
        assert!(!is_stale_at(at(30_000), None, created, false, timeout()));
        assert!(is_stale_at(at(30_001), None, created, false, timeout()));
    }

    #[test]
    fn empty_stream_uses_creation_time() {
        let created = at(0);
        assert!(!is_stale_at(at(25_000), None, created, false, timeout()));
        assert!(is_stale_at(at(65_000), None, created, false, timeout()));
    }

    #[test]
    fn chunks_without_timestamp_are_not_stale() {
        assert!(!is_stale_at(at(900_000), None, at(0), true, timeout()));
    }

    #[test]
    fn fresh_stream_is_alive_on_the_wall_clock() {
        let now = Timestamp::now();
        assert!(!is_stale(Some(now), now, true, timeout()));
    }

    #[test]
    fn sweep_of_elapsed_times_matches_threshold() {
        let created = at(0);
        for elapsed in (0..=60_000).step_by(2_500) {
            let expected = elapsed > DEFAULT_STALE_TIMEOUT_MS;
            assert_eq!(
                is_stale_at(at(elapsed), Some(created), created, true, timeout()),
                expected,
                "elapsed {elapsed}ms"
            );
            assert_eq!(
                is_stale_at(at(elapsed), None, created, false, timeout()),
                expected,
                "elapsed {elapsed}ms without chunks"
            );
        }
    }
}
