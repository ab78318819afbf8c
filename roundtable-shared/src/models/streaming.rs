use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{FinishReason, MessageMetadata, Timestamp, Usage};

/// Which phase of a round a buffered stream belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StreamPhase {
    #[serde(rename = "presearch")]
    PreSearch,
    Participant,
    Moderator,
}

impl StreamPhase {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PreSearch => "presearch",
            Self::Participant => "participant",
            Self::Moderator => "moderator",
        }
    }

    /// Buffer store namespace for this phase's meta and chunk keys.
    #[must_use]
    pub const fn key_prefix(self) -> &'static str {
        match self {
            Self::PreSearch => "presearch",
            Self::Participant => "stream",
            Self::Moderator => "moderator",
        }
    }
}

impl TryFrom<&str> for StreamPhase {
    type Error = &'static str;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "presearch" => Ok(Self::PreSearch),
            "participant" => Ok(Self::Participant),
            "moderator" => Ok(Self::Moderator),
            _ => Err("invalid stream phase"),
        }
    }
}

/// Producer-side status of a buffered stream.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
    #[serde(alias = "streaming")]
    Active,
    Completed,
    Failed,
}

impl StreamStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Active)
    }
}

impl TryFrom<&str> for StreamStatus {
    type Error = &'static str;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "active" | "streaming" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err("invalid stream status"),
        }
    }
}

/// Metadata record kept next to each stream's chunk log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamBufferRecord {
    pub stream_id: String,
    pub thread_id: String,
    pub round_number: u32,
    pub phase: StreamPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant_index: Option<u32>,
    pub status: StreamStatus,
    #[serde(default)]
    pub chunk_count: u64,
    pub created_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_chunk_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl StreamBufferRecord {
    #[must_use]
    pub const fn has_chunks(&self) -> bool {
        self.chunk_count > 0
    }
}

/// One entry of a stream's append-only chunk log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BufferedChunk {
    pub data: String,
    pub timestamp: Timestamp,
}

/// Per-thread pointer at the participant stream currently open.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActiveStreamPointer {
    pub thread_id: String,
    pub round_number: u32,
    pub stream_id: String,
    pub participant_index: u32,
    pub total_participants: u32,
    #[serde(default)]
    pub participant_statuses: BTreeMap<u32, StreamStatus>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Typed chunk envelope emitted by every phase producer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamChunk {
    Start {
        message_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<MessageMetadata>,
    },
    StartStep,
    TextDelta {
        delta: String,
    },
    ReasoningDelta {
        delta: String,
    },
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        tool_call_id: String,
        #[serde(default)]
        output: Value,
    },
    File {
        media_type: String,
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
    Finish {
        #[serde(default)]
        finish_reason: FinishReason,
        #[serde(default)]
        usage: Usage,
    },
    Error {
        error_text: String,
    },
}

impl StreamChunk {
    #[must_use]
    pub fn text(delta: impl Into<String>) -> Self {
        Self::TextDelta {
            delta: delta.into(),
        }
    }

    #[must_use]
    pub const fn finish(finish_reason: FinishReason, usage: Usage) -> Self {
        Self::Finish {
            finish_reason,
            usage,
        }
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Finish { .. } | Self::Error { .. })
    }
}
