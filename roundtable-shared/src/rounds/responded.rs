use crate::models::{FinishReason, Message};

/// Whether a participant message counts as a finished answer.
///
/// A message with any streaming part is still in flight. A message that ended
/// without a finish reason, spent no tokens and carries no text was interrupted
/// before it produced anything and must be retried. An unknown finish reason
/// alongside real text still counts as responded.
#[must_use]
pub fn is_participant_responded(message: &Message) -> bool {
    if message.is_streaming() {
        return false;
    }
    !is_empty_interrupted(message)
}

fn is_empty_interrupted(message: &Message) -> bool {
    message.metadata.finish_reason == FinishReason::Unknown
        && message.metadata.usage.total_tokens == 0
        && !message.has_text_content()
}
