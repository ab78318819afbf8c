use tracing::debug;

use crate::models::{
    FinishReason, Message, MessageId, MessageMetadata, MessagePart, PartState, StreamChunk,
};

/// Folds a chunk stream into the message it describes.
#[derive(Debug, Clone)]
pub struct MessageAccumulator {
    message: Message,
    finished: bool,
}

impl MessageAccumulator {
    /// Starts from a placeholder, usually an empty participant or moderator message.
    #[must_use]
    pub const fn new(message: Message) -> Self {
        Self {
            message,
            finished: false,
        }
    }

    #[must_use]
    pub const fn message(&self) -> &Message {
        &self.message
    }

    /// True once a `finish` or `error` chunk was applied.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn apply_all<'a>(&mut self, chunks: impl IntoIterator<Item = &'a StreamChunk>) {
        for chunk in chunks {
            self.apply(chunk);
        }
    }

    pub fn apply(&mut self, chunk: &StreamChunk) {
        match chunk {
            StreamChunk::Start {
                message_id,
                metadata,
            } => {
                self.message.id = MessageId::classify(message_id.clone());
                if let Some(metadata) = metadata {
                    merge_metadata(&mut self.message.metadata, metadata);
                }
            }
            StreamChunk::StartStep => self.message.parts.push(MessagePart::StepStart),
            StreamChunk::TextDelta { delta } => self.append_text(delta, false),
            StreamChunk::ReasoningDelta { delta } => self.append_text(delta, true),
            StreamChunk::ToolCall {
                tool_call_id,
                tool_name,
                input,
            } => self.message.parts.push(MessagePart::ToolCall {
                tool_call_id: tool_call_id.clone(),
                tool_name: tool_name.clone(),
                input: input.clone(),
                output: None,
                state: Some(PartState::Streaming),
            }),
            StreamChunk::ToolResult {
                tool_call_id,
                output,
            } => self.attach_tool_result(tool_call_id, output),
            StreamChunk::File {
                media_type,
                url,
                filename,
            } => self.message.parts.push(MessagePart::File {
                media_type: media_type.clone(),
                url: url.clone(),
                filename: filename.clone(),
            }),
            StreamChunk::Finish {
                finish_reason,
                usage,
            } => {
                self.close(*finish_reason);
                self.message.metadata.usage = *usage;
            }
            StreamChunk::Error { error_text } => {
                self.close(FinishReason::Error);
                self.message.metadata.error_message = Some(error_text.clone());
            }
        }
    }

    /// Closes a stream that ended without a terminal chunk.
    pub fn finish_interrupted(&mut self) {
        if !self.finished {
            self.close(FinishReason::Unknown);
        }
    }

    #[must_use]
    pub fn into_message(self) -> Message {
        self.message
    }

    fn append_text(&mut self, delta: &str, reasoning: bool) {
        match self.message.parts.last_mut() {
            Some(MessagePart::Text {
                text,
                state: Some(PartState::Streaming),
            }) if !reasoning => text.push_str(delta),
            Some(MessagePart::Reasoning {
                text,
                state: Some(PartState::Streaming),
            }) if reasoning => text.push_str(delta),
            _ => {
                let text = delta.to_string();
                let state = Some(PartState::Streaming);
                self.message.parts.push(if reasoning {
                    MessagePart::Reasoning { text, state }
                } else {
                    MessagePart::Text { text, state }
                });
            }
        }
    }

    fn attach_tool_result(&mut self, id: &str, result: &serde_json::Value) {
        let call = self.message.parts.iter_mut().find(|part| {
            matches!(part, MessagePart::ToolCall { tool_call_id, .. } if tool_call_id == id)
        });

        match call {
            Some(MessagePart::ToolCall { output, state, .. }) => {
                *output = Some(result.clone());
                *state = Some(PartState::Done);
            }
            _ => debug!(tool_call_id = id, "tool result without matching call"),
        }
    }

    fn close(&mut self, reason: FinishReason) {
        for part in &mut self.message.parts {
            part.mark_done();
        }
        self.message.metadata.finish_reason = reason;
        self.finished = true;
    }
}

fn merge_metadata(target: &mut MessageMetadata, source: &MessageMetadata) {
    if source.round_number.is_some() {
        target.round_number = source.round_number;
    }
    if source.participant_index.is_some() {
        target.participant_index = source.participant_index;
    }
    if source.participant_id.is_some() {
        target.participant_id.clone_from(&source.participant_id);
    }
    if source.model_id.is_some() {
        target.model_id.clone_from(&source.model_id);
    }
    if source.created_at.is_some() {
        target.created_at = source.created_at;
    }
    target.is_moderator |= source.is_moderator;
}
