use serde::{Deserialize, Serialize};

use super::{ThreadMode, Timestamp};

/// Lifecycle shared by pre-search and analysis records.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    #[default]
    Pending,
    Streaming,
    Complete,
    Failed,
}

impl PhaseStatus {
    /// `Complete` and `Failed` both end the phase; a failure never blocks the round.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Streaming => "streaming",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub snippet: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchQueryResult {
    pub query: String,
    #[serde(default)]
    pub results: Vec<SearchResult>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PreSearchResults {
    #[serde(default)]
    pub queries: Vec<SearchQueryResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl PreSearchResults {
    #[must_use]
    pub fn total_results(&self) -> usize {
        self.queries.iter().map(|query| query.results.len()).sum()
    }
}

/// Web search that precedes the participants of a round. One per `(thread, round)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PreSearch {
    pub id: String,
    pub thread_id: String,
    pub round_number: u32,
    #[serde(default)]
    pub status: PhaseStatus,
    pub user_query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<PreSearchResults>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
}

impl PreSearch {
    #[must_use]
    pub fn pending(thread_id: &str, round_number: u32, user_query: impl Into<String>) -> Self {
        Self {
            id: format!("{thread_id}_r{round_number}_presearch"),
            thread_id: thread_id.to_string(),
            round_number,
            status: PhaseStatus::Pending,
            user_query: user_query.into(),
            results: None,
            error_message: None,
            created_at: Some(Timestamp::now()),
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: PhaseStatus) -> Self {
        self.status = status;
        self
    }
}

/// Moderator summary of a round, created once every participant has responded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Analysis {
    pub id: String,
    pub thread_id: String,
    pub round_number: u32,
    #[serde(default)]
    pub mode: ThreadMode,
    #[serde(default)]
    pub status: PhaseStatus,
    #[serde(default)]
    pub user_question: String,
    #[serde(default)]
    pub participant_message_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Analysis {
    #[must_use]
    pub fn pending(thread_id: &str, round_number: u32, mode: ThreadMode) -> Self {
        Self {
            id: format!("{thread_id}_r{round_number}_moderator"),
            thread_id: thread_id.to_string(),
            round_number,
            mode,
            status: PhaseStatus::Pending,
            user_question: String::new(),
            participant_message_ids: Vec::new(),
            summary: None,
            error_message: None,
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: PhaseStatus) -> Self {
        self.status = status;
        self
    }
}
