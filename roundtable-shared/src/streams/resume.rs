//! Resume query result shared by the server endpoint and its clients.
//!
//! A `204` response cannot carry a body, so every field travels in an
//! `x-roundtable-*` header. A `200` response carries the same headers plus the
//! replayed event stream.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{ActiveStreamPointer, StreamPhase, StreamStatus};

pub const HEADER_PHASE: &str = "x-roundtable-phase";
pub const HEADER_STREAM_ID: &str = "x-roundtable-stream-id";
pub const HEADER_ROUND_NUMBER: &str = "x-roundtable-round-number";
pub const HEADER_PARTICIPANT_INDEX: &str = "x-roundtable-participant-index";
pub const HEADER_TOTAL_PARTICIPANTS: &str = "x-roundtable-total-participants";
pub const HEADER_PARTICIPANT_STATUSES: &str = "x-roundtable-participant-statuses";
pub const HEADER_NEXT_PARTICIPANT_INDEX: &str = "x-roundtable-next-participant-index";
pub const HEADER_MODERATOR_ID: &str = "x-roundtable-moderator-id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeStatus {
    /// `200`: a replay stream is attached.
    Live,
    /// `204`: metadata only.
    NoContent,
}

impl ResumeStatus {
    #[must_use]
    pub const fn code(self) -> u16 {
        match self {
            Self::Live => 200,
            Self::NoContent => 204,
        }
    }

    #[must_use]
    pub const fn from_code(code: u16) -> Option<Self> {
        match code {
            200 => Some(Self::Live),
            204 => Some(Self::NoContent),
            _ => None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResumeDecodeError {
    #[error("unexpected resume status code {0}")]
    Status(u16),
    #[error("invalid value for header {header}: {value}")]
    Header { header: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeOutcome {
    pub status: ResumeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<StreamPhase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_participants: Option<u32>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub participant_statuses: BTreeMap<u32, StreamStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_participant_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moderator_id: Option<String>,
}

impl ResumeOutcome {
    /// Nothing to resume.
    #[must_use]
    pub const fn idle() -> Self {
        Self {
            status: ResumeStatus::NoContent,
            phase: None,
            stream_id: None,
            round_number: None,
            participant_index: None,
            total_participants: None,
            participant_statuses: BTreeMap::new(),
            next_participant_index: None,
            moderator_id: None,
        }
    }

    #[must_use]
    pub fn pre_search(stream_id: impl Into<String>, round_number: u32) -> Self {
        Self {
            phase: Some(StreamPhase::PreSearch),
            stream_id: Some(stream_id.into()),
            round_number: Some(round_number),
            ..Self::idle()
        }
    }

    #[must_use]
    pub fn moderator(
        stream_id: impl Into<String>,
        round_number: u32,
        moderator_id: impl Into<String>,
    ) -> Self {
        Self {
            phase: Some(StreamPhase::Moderator),
            stream_id: Some(stream_id.into()),
            round_number: Some(round_number),
            moderator_id: Some(moderator_id.into()),
            ..Self::idle()
        }
    }

    #[must_use]
    pub fn participant(status: ResumeStatus, pointer: &ActiveStreamPointer) -> Self {
        Self {
            status,
            phase: Some(StreamPhase::Participant),
            stream_id: Some(pointer.stream_id.clone()),
            round_number: Some(pointer.round_number),
            participant_index: Some(pointer.participant_index),
            total_participants: Some(pointer.total_participants),
            next_participant_index: find_next_participant(
                &pointer.participant_statuses,
                pointer.total_participants,
            ),
            participant_statuses: pointer.participant_statuses.clone(),
            moderator_id: None,
        }
    }

    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(self.status, ResumeStatus::Live)
    }

    /// Header name/value pairs describing this outcome.
    #[must_use]
    pub fn header_pairs(&self) -> Vec<(&'static str, String)> {
        let mut headers = Vec::new();
        if let Some(phase) = self.phase {
            headers.push((HEADER_PHASE, phase.as_str().to_string()));
        }
        if let Some(stream_id) = &self.stream_id {
            headers.push((HEADER_STREAM_ID, stream_id.clone()));
        }
        if let Some(round) = self.round_number {
            headers.push((HEADER_ROUND_NUMBER, round.to_string()));
        }
        if let Some(index) = self.participant_index {
            headers.push((HEADER_PARTICIPANT_INDEX, index.to_string()));
        }
        if let Some(total) = self.total_participants {
            headers.push((HEADER_TOTAL_PARTICIPANTS, total.to_string()));
        }
        if !self.participant_statuses.is_empty() {
            let encoded = self
                .participant_statuses
                .iter()
                .map(|(index, status)| format!("{index}={}", status.as_str()))
                .collect::<Vec<_>>()
                .join(",");
            headers.push((HEADER_PARTICIPANT_STATUSES, encoded));
        }
        if let Some(next) = self.next_participant_index {
            headers.push((HEADER_NEXT_PARTICIPANT_INDEX, next.to_string()));
        }
        if let Some(moderator_id) = &self.moderator_id {
            headers.push((HEADER_MODERATOR_ID, moderator_id.clone()));
        }
        headers
    }

    /// Rebuilds an outcome from a status code and a header lookup.
    ///
    /// # Errors
    /// Returns [`ResumeDecodeError`] for unknown status codes or malformed header values.
    pub fn from_headers<F>(status_code: u16, lookup: F) -> Result<Self, ResumeDecodeError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let status =
            ResumeStatus::from_code(status_code).ok_or(ResumeDecodeError::Status(status_code))?;

        let phase = lookup(HEADER_PHASE)
            .map(|value| {
                StreamPhase::try_from(value.as_str()).map_err(|_| ResumeDecodeError::Header {
                    header: HEADER_PHASE,
                    value,
                })
            })
            .transpose()?;

        let participant_statuses = lookup(HEADER_PARTICIPANT_STATUSES)
            .map(|value| parse_statuses(&value))
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            status,
            phase,
            stream_id: lookup(HEADER_STREAM_ID),
            round_number: parse_number(&lookup, HEADER_ROUND_NUMBER)?,
            participant_index: parse_number(&lookup, HEADER_PARTICIPANT_INDEX)?,
            total_participants: parse_number(&lookup, HEADER_TOTAL_PARTICIPANTS)?,
            participant_statuses,
            next_participant_index: parse_number(&lookup, HEADER_NEXT_PARTICIPANT_INDEX)?,
            moderator_id: lookup(HEADER_MODERATOR_ID),
        })
    }
}

fn parse_number<F>(lookup: &F, header: &'static str) -> Result<Option<u32>, ResumeDecodeError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(header)
        .map(|value| {
            value
                .trim()
                .parse::<u32>()
                .map_err(|_| ResumeDecodeError::Header { header, value })
        })
        .transpose()
}

fn parse_statuses(value: &str) -> Result<BTreeMap<u32, StreamStatus>, ResumeDecodeError> {
    let invalid = || ResumeDecodeError::Header {
        header: HEADER_PARTICIPANT_STATUSES,
        value: value.to_string(),
    };

    value
        .split(',')
        .filter(|entry| !entry.trim().is_empty())
        .map(|entry| {
            let (index, status) = entry.split_once('=').ok_or_else(invalid)?;
            let index = index.trim().parse::<u32>().map_err(|_| invalid())?;
            let status = StreamStatus::try_from(status.trim()).map_err(|_| invalid())?;
            Ok((index, status))
        })
        .collect()
}

/// First participant index in `0..total` that has not finished.
///
/// Missing and `active` entries count as unfinished; `None` means every
/// participant completed or failed and the round's participant phase is over.
#[must_use]
pub fn find_next_participant(
    statuses: &BTreeMap<u32, StreamStatus>,
    total_participants: u32,
) -> Option<u32> {
    (0..total_participants).find(|index| {
        matches!(statuses.get(index), None | Some(StreamStatus::Active))
    })
}
