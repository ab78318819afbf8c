//! Deterministic stream identifiers.
//!
//! | Phase | Layout |
//! | --- | --- |
//! | pre-search | `{thread}_r{round}_presearch` |
//! | participant | `{thread}_r{round}_participant_{index}` |
//! | participant (legacy) | `{thread}_r{round}_p{index}` |
//! | moderator | `{thread}_r{round}_summarizer` |
//!
//! Parsing tries the layouts in the order above and the first match wins.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::StreamPhase;

static PRE_SEARCH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.+)_r(\d+)_presearch$").expect("pre-search pattern is valid"));
static PARTICIPANT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(.+)_r(\d+)_participant_(\d+)$").expect("participant pattern is valid")
});
static PARTICIPANT_LEGACY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.+)_r(\d+)_p(\d+)$").expect("legacy participant pattern is valid"));
static SUMMARIZER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.+)_r(\d+)_summarizer$").expect("summarizer pattern is valid"));

/// Phase slot of a stream. Only participants carry an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Slot {
    PreSearch,
    Participant(u32),
    Moderator,
}

/// Identifier of one phase stream. Built only through the phase constructors
/// or [`StreamId::parse`], so every value encodes and parses back to itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamId {
    thread_id: String,
    round_number: u32,
    slot: Slot,
}

impl StreamId {
    #[must_use]
    pub fn pre_search(thread_id: impl Into<String>, round_number: u32) -> Self {
        Self {
            thread_id: thread_id.into(),
            round_number,
            slot: Slot::PreSearch,
        }
    }

    #[must_use]
    pub fn participant(thread_id: impl Into<String>, round_number: u32, index: u32) -> Self {
        Self {
            thread_id: thread_id.into(),
            round_number,
            slot: Slot::Participant(index),
        }
    }

    #[must_use]
    pub fn moderator(thread_id: impl Into<String>, round_number: u32) -> Self {
        Self {
            thread_id: thread_id.into(),
            round_number,
            slot: Slot::Moderator,
        }
    }

    #[must_use]
    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    #[must_use]
    pub const fn round_number(&self) -> u32 {
        self.round_number
    }

    #[must_use]
    pub const fn phase(&self) -> StreamPhase {
        match self.slot {
            Slot::PreSearch => StreamPhase::PreSearch,
            Slot::Participant(_) => StreamPhase::Participant,
            Slot::Moderator => StreamPhase::Moderator,
        }
    }

    /// Set exactly when the phase is [`StreamPhase::Participant`].
    #[must_use]
    pub const fn participant_index(&self) -> Option<u32> {
        match self.slot {
            Slot::Participant(index) => Some(index),
            Slot::PreSearch | Slot::Moderator => None,
        }
    }

    /// Current encoding, used for every newly written buffer key.
    #[must_use]
    pub fn encode(&self) -> String {
        let Self {
            thread_id,
            round_number,
            slot,
        } = self;
        match slot {
            Slot::PreSearch => format!("{thread_id}_r{round_number}_presearch"),
            Slot::Participant(index) => {
                format!("{thread_id}_r{round_number}_participant_{index}")
            }
            Slot::Moderator => format!("{thread_id}_r{round_number}_summarizer"),
        }
    }

    /// Short participant form still accepted from older clients. Other phases encode as usual.
    #[must_use]
    pub fn encode_legacy(&self) -> String {
        match self.slot {
            Slot::Participant(index) => {
                format!("{}_r{}_p{index}", self.thread_id, self.round_number)
            }
            Slot::PreSearch | Slot::Moderator => self.encode(),
        }
    }

    /// Parses any known layout. Malformed input yields `None`.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        if let Some(caps) = PRE_SEARCH.captures(raw) {
            return Some(Self::pre_search(&caps[1], caps[2].parse().ok()?));
        }
        if let Some(caps) = PARTICIPANT.captures(raw) {
            return Some(Self::participant(
                &caps[1],
                caps[2].parse().ok()?,
                caps[3].parse().ok()?,
            ));
        }
        if let Some(caps) = PARTICIPANT_LEGACY.captures(raw) {
            return Some(Self::participant(
                &caps[1],
                caps[2].parse().ok()?,
                caps[3].parse().ok()?,
            ));
        }
        if let Some(caps) = SUMMARIZER.captures(raw) {
            return Some(Self::moderator(&caps[1], caps[2].parse().ok()?));
        }
        None
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_every_phase() {
        assert_eq!(StreamId::pre_search("t1", 0).encode(), "t1_r0_presearch");
        assert_eq!(
            StreamId::participant("t1", 2, 1).encode(),
            "t1_r2_participant_1"
        );
        assert_eq!(StreamId::participant("t1", 2, 1).encode_legacy(), "t1_r2_p1");
        assert_eq!(StreamId::moderator("t1", 3).encode(), "t1_r3_summarizer");
    }

    #[test]
    fn parse_round_trips_current_and_legacy_layouts() {
        let cases = [
            StreamId::pre_search("thread_abc", 0),
            StreamId::participant("thread_abc", 7, 0),
            StreamId::participant("thread_abc", 7, 12),
            StreamId::moderator("thread_abc", 41),
            StreamId::participant("x_r1_p2", 3, 4),
        ];

        for id in cases {
            assert_eq!(StreamId::parse(&id.encode()), Some(id.clone()));
            assert_eq!(StreamId::parse(&id.encode_legacy()), Some(id.clone()));
        }
    }

    #[test]
    fn legacy_and_long_participant_formats_agree() {
        assert_eq!(
            StreamId::parse("abc_r1_p2"),
            StreamId::parse("abc_r1_participant_2")
        );
    }

    #[test]
    fn thread_ids_containing_suffixes_resolve_by_first_matching_layout() {
        let parsed = StreamId::parse("a_r1_p2_r0_presearch").unwrap();
        assert_eq!(parsed.phase(), StreamPhase::PreSearch);
        assert_eq!(parsed.thread_id(), "a_r1_p2");
        assert_eq!(parsed.round_number(), 0);
    }

    #[test]
    fn participant_index_is_present_only_for_participants() {
        let participant = StreamId::participant("t", 1, 3);
        assert_eq!(participant.phase(), StreamPhase::Participant);
        assert_eq!(participant.participant_index(), Some(3));

        for id in [StreamId::pre_search("t", 1), StreamId::moderator("t", 1)] {
            assert_eq!(id.participant_index(), None);
            assert_eq!(StreamId::parse(&id.encode()), Some(id.clone()));
        }
        assert_eq!(StreamId::parse(&participant.encode()), Some(participant));
    }

    #[test]
    fn malformed_ids_do_not_match() {
        for raw in [
            "",
            "thread",
            "thread_r_presearch",
            "_r0_presearch",
            "thread_rX_p1",
            "thread_r1_participant_",
            "thread_r1_moderator",
            "thread_r99999999999_p1",
        ] {
            assert_eq!(StreamId::parse(raw), None, "{raw} should not parse");
        }
    }
}
