use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::Timestamp;

static PERSISTED_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"_r\d+_(?:p\d+|moderator|user)$").expect("persisted message id pattern is valid")
});

/// Message identity: either a client placeholder or the server's deterministic id.
///
/// Deserialization classifies raw strings: ids ending in `_r{round}_p{index}`,
/// `_r{round}_moderator` or `_r{round}_user` are persisted, everything else is
/// optimistic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageId {
    Optimistic(String),
    Persisted(String),
}

impl MessageId {
    #[must_use]
    pub fn classify(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        if PERSISTED_ID.is_match(&raw) {
            Self::Persisted(raw)
        } else {
            Self::Optimistic(raw)
        }
    }

    /// Fresh client-side placeholder id.
    #[must_use]
    pub fn optimistic() -> Self {
        Self::Optimistic(format!("optimistic-{}", Uuid::new_v4()))
    }

    #[must_use]
    pub fn participant(thread_id: &str, round_number: u32, participant_index: u32) -> Self {
        Self::Persisted(format!("{thread_id}_r{round_number}_p{participant_index}"))
    }

    #[must_use]
    pub fn moderator(thread_id: &str, round_number: u32) -> Self {
        Self::Persisted(format!("{thread_id}_r{round_number}_moderator"))
    }

    #[must_use]
    pub fn user(thread_id: &str, round_number: u32) -> Self {
        Self::Persisted(format!("{thread_id}_r{round_number}_user"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Optimistic(id) | Self::Persisted(id) => id,
        }
    }

    #[must_use]
    pub const fn is_persisted(&self) -> bool {
        matches!(self, Self::Persisted(_))
    }
}

impl From<String> for MessageId {
    fn from(value: String) -> Self {
        Self::classify(value)
    }
}

impl From<MessageId> for String {
    fn from(value: MessageId) -> Self {
        match value {
            MessageId::Optimistic(id) | MessageId::Persisted(id) => id,
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

/// Why a generation ended. `Unknown` means no terminal event was recorded.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    ToolCalls,
    Error,
    Other,
    #[default]
    Unknown,
}

impl FinishReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::Length => "length",
            Self::ContentFilter => "content-filter",
            Self::ToolCalls => "tool-calls",
            Self::Error => "error",
            Self::Other => "other",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

/// Transient accumulation flag carried by parts while a stream is open.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PartState {
    Streaming,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartKind {
    Text,
    Reasoning,
    ToolCall,
    StepStart,
    File,
}

impl PartKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Reasoning => "reasoning",
            Self::ToolCall => "tool-call",
            Self::StepStart => "step-start",
            Self::File => "file",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MessagePart {
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        state: Option<PartState>,
    },
    Reasoning {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        state: Option<PartState>,
    },
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        #[serde(default)]
        input: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        state: Option<PartState>,
    },
    StepStart,
    File {
        media_type: String,
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
}

impl MessagePart {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            state: None,
        }
    }

    #[must_use]
    pub fn text_done(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            state: Some(PartState::Done),
        }
    }

    #[must_use]
    pub fn reasoning(text: impl Into<String>) -> Self {
        Self::Reasoning {
            text: text.into(),
            state: None,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> PartKind {
        match self {
            Self::Text { .. } => PartKind::Text,
            Self::Reasoning { .. } => PartKind::Reasoning,
            Self::ToolCall { .. } => PartKind::ToolCall,
            Self::StepStart => PartKind::StepStart,
            Self::File { .. } => PartKind::File,
        }
    }

    #[must_use]
    pub const fn state(&self) -> Option<PartState> {
        match self {
            Self::Text { state, .. }
            | Self::Reasoning { state, .. }
            | Self::ToolCall { state, .. } => *state,
            Self::StepStart | Self::File { .. } => None,
        }
    }

    #[must_use]
    pub const fn is_streaming(&self) -> bool {
        matches!(self.state(), Some(PartState::Streaming))
    }

    #[must_use]
    pub const fn is_done(&self) -> bool {
        matches!(self.state(), Some(PartState::Done))
    }

    /// Text payload of text and reasoning parts.
    #[must_use]
    pub fn text_content(&self) -> Option<&str> {
        match self {
            Self::Text { text, .. } | Self::Reasoning { text, .. } => Some(text),
            _ => None,
        }
    }

    /// Flips a streaming part to done. Parts without a state flag are untouched.
    pub fn mark_done(&mut self) {
        match self {
            Self::Text { state, .. }
            | Self::Reasoning { state, .. }
            | Self::ToolCall { state, .. } => {
                if state.is_some() {
                    *state = Some(PartState::Done);
                }
            }
            Self::StepStart | Self::File { .. } => {}
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MessageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(default)]
    pub is_moderator: bool,
    #[serde(default)]
    pub finish_reason: FinishReason,
    #[serde(default)]
    pub usage: Usage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub role: MessageRole,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
    #[serde(default)]
    pub metadata: MessageMetadata,
}

impl Message {
    #[must_use]
    pub fn user(id: MessageId, round_number: u32, text: impl Into<String>) -> Self {
        Self {
            id,
            role: MessageRole::User,
            parts: vec![MessagePart::text(text)],
            metadata: MessageMetadata {
                round_number: Some(round_number),
                created_at: Some(Timestamp::now()),
                ..MessageMetadata::default()
            },
        }
    }

    /// Empty assistant message for a participant slot.
    #[must_use]
    pub fn participant(id: MessageId, round_number: u32, participant_index: u32) -> Self {
        Self {
            id,
            role: MessageRole::Assistant,
            parts: Vec::new(),
            metadata: MessageMetadata {
                round_number: Some(round_number),
                participant_index: Some(participant_index),
                created_at: Some(Timestamp::now()),
                ..MessageMetadata::default()
            },
        }
    }

    #[must_use]
    pub fn moderator(id: MessageId, round_number: u32) -> Self {
        Self {
            id,
            role: MessageRole::Assistant,
            parts: Vec::new(),
            metadata: MessageMetadata {
                round_number: Some(round_number),
                is_moderator: true,
                created_at: Some(Timestamp::now()),
                ..MessageMetadata::default()
            },
        }
    }

    #[must_use]
    pub fn with_parts(mut self, parts: Vec<MessagePart>) -> Self {
        self.parts = parts;
        self
    }

    #[must_use]
    pub fn with_participant_id(mut self, participant_id: impl Into<String>) -> Self {
        self.metadata.participant_id = Some(participant_id.into());
        self
    }

    #[must_use]
    pub fn with_finish(mut self, reason: FinishReason, usage: Usage) -> Self {
        self.metadata.finish_reason = reason;
        self.metadata.usage = usage;
        self
    }

    #[must_use]
    pub const fn round_number(&self) -> Option<u32> {
        self.metadata.round_number
    }

    #[must_use]
    pub const fn is_assistant(&self) -> bool {
        matches!(self.role, MessageRole::Assistant)
    }

    /// Participant response, as opposed to a moderator summary.
    #[must_use]
    pub const fn is_participant_response(&self) -> bool {
        self.is_assistant() && !self.metadata.is_moderator
    }

    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.parts.iter().any(MessagePart::is_streaming)
    }

    /// Concatenated text parts, reasoning excluded.
    #[must_use]
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                MessagePart::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn has_text_content(&self) -> bool {
        self.parts.iter().any(|part| match part {
            MessagePart::Text { text, .. } => !text.trim().is_empty(),
            _ => false,
        })
    }
}
