//! Reconciliation of messages arriving from several sources (hydrated history,
//! optimistic placeholders, live streams) into one ordered list.

use std::collections::{HashMap, HashSet};

use crate::models::{Message, MessagePart, PartKind};

/// Identity shared by every copy of the same assistant response, whatever its id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DedupeKey {
    Moderator { round: u32 },
    Participant { round: u32, participant_id: String },
    /// Placeholder that only knows its slot.
    Index { round: u32, index: u32 },
}

impl DedupeKey {
    #[must_use]
    pub const fn round(&self) -> u32 {
        match self {
            Self::Moderator { round }
            | Self::Participant { round, .. }
            | Self::Index { round, .. } => *round,
        }
    }
}

/// `None` for user messages and for assistant messages without a round.
#[must_use]
pub fn dedupe_key(message: &Message) -> Option<DedupeKey> {
    if !message.is_assistant() {
        return None;
    }
    let round = message.round_number()?;
    let metadata = &message.metadata;

    if metadata.is_moderator {
        return Some(DedupeKey::Moderator { round });
    }
    if let Some(participant_id) = &metadata.participant_id {
        return Some(DedupeKey::Participant {
            round,
            participant_id: participant_id.clone(),
        });
    }
    metadata
        .participant_index
        .map(|index| DedupeKey::Index { round, index })
}

/// Collapses duplicates while keeping first-seen order.
///
/// The first message with a given id wins and later copies are dropped,
/// regardless of round. Assistant messages sharing a [`dedupe_key`] are then
/// reconciled: a later optimistic copy is discarded, a later persisted copy
/// replaces the earlier entry at its original position. Parts of every kept
/// message go through [`deduplicate_parts`].
#[must_use]
pub fn deduplicate_messages(messages: &[Message]) -> Vec<Message> {
    let mut seen_ids: HashSet<&str> = HashSet::new();
    let mut positions: HashMap<DedupeKey, usize> = HashMap::new();
    let mut result: Vec<Message> = Vec::with_capacity(messages.len());

    for message in messages {
        if !seen_ids.insert(message.id.as_str()) {
            continue;
        }

        let Some(key) = dedupe_key(message) else {
            result.push(message.clone());
            continue;
        };

        match positions.get(&key) {
            Some(&position) if message.id.is_persisted() => {
                result[position] = message.clone();
            }
            Some(_) => {}
            None => {
                positions.insert(key, result.len());
                result.push(message.clone());
            }
        }
    }

    for message in &mut result {
        message.parts = deduplicate_parts(&message.parts);
    }
    result
}

#[derive(Debug, PartialEq, Eq, Hash)]
enum PartKey<'a> {
    Content(PartKind, &'a str),
    Marker(PartKind),
    Unique(usize),
}

fn part_key(index: usize, part: &MessagePart) -> PartKey<'_> {
    match part {
        MessagePart::Text { text, .. } | MessagePart::Reasoning { text, .. } => {
            PartKey::Content(part.kind(), text)
        }
        MessagePart::StepStart => PartKey::Marker(PartKind::StepStart),
        MessagePart::ToolCall { .. } | MessagePart::File { .. } => PartKey::Unique(index),
    }
}

/// Drops repeated parts.
///
/// Text and reasoning collide on identical content, step markers on type alone,
/// and every other part is unique. On a collision a `done` part replaces a
/// part that is not done, at the earlier part's position; otherwise the first
/// one stays.
#[must_use]
pub fn deduplicate_parts(parts: &[MessagePart]) -> Vec<MessagePart> {
    let mut positions: HashMap<PartKey<'_>, usize> = HashMap::new();
    let mut result: Vec<MessagePart> = Vec::with_capacity(parts.len());

    for (index, part) in parts.iter().enumerate() {
        match positions.get(&part_key(index, part)) {
            Some(&position) => {
                if part.is_done() && !result[position].is_done() {
                    result[position] = part.clone();
                }
            }
            None => {
                positions.insert(part_key(index, part), result.len());
                result.push(part.clone());
            }
        }
    }
    result
}

/// Upsert of a message whose id is already present.
///
/// `incoming` is the newer snapshot and supplies metadata and parts. An empty
/// snapshot keeps the existing parts, and an incoming part that matches a
/// `done` existing part inherits the `done` copy.
#[must_use]
pub fn merge_message_parts(existing: &Message, incoming: &Message) -> Message {
    let parts: Vec<MessagePart> = if incoming.parts.is_empty() {
        existing.parts.clone()
    } else {
        incoming
            .parts
            .iter()
            .map(|part| {
                existing
                    .parts
                    .iter()
                    .find(|old| old.is_done() && !part.is_done() && same_content(old, part))
                    .unwrap_or(part)
                    .clone()
            })
            .collect()
    };

    Message {
        parts: deduplicate_parts(&parts),
        ..incoming.clone()
    }
}

fn same_content(a: &MessagePart, b: &MessagePart) -> bool {
    match (a, b) {
        (MessagePart::StepStart, MessagePart::StepStart) => true,
        _ => {
            a.kind() == b.kind()
                && a.text_content().is_some()
                && a.text_content() == b.text_content()
        }
    }
}
