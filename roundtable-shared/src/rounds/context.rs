use serde::{Deserialize, Serialize};

use super::dedup::{deduplicate_messages, merge_message_parts};
use super::gate::should_wait_for_pre_search;
use crate::models::{
    Analysis, Message, Participant, PhaseStatus, PreSearch, Thread, ordered_participants,
};

/// Everything the round engine reads about one thread, passed in explicitly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoundContext {
    pub thread: Thread,
    pub participants: Vec<Participant>,
    pub round_number: u32,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub pre_searches: Vec<PreSearch>,
    #[serde(default)]
    pub analyses: Vec<Analysis>,
}

impl RoundContext {
    #[must_use]
    pub fn new(thread: Thread, participants: Vec<Participant>, round_number: u32) -> Self {
        Self {
            thread,
            participants,
            round_number,
            messages: Vec::new(),
            pre_searches: Vec::new(),
            analyses: Vec::new(),
        }
    }

    /// Enabled participants in response order.
    #[must_use]
    pub fn ordered_participants(&self) -> Vec<&Participant> {
        ordered_participants(&self.participants)
    }

    #[must_use]
    pub fn pre_search(&self) -> Option<&PreSearch> {
        self.pre_searches
            .iter()
            .find(|pre_search| pre_search.round_number == self.round_number)
    }

    #[must_use]
    pub fn analysis(&self) -> Option<&Analysis> {
        self.analyses
            .iter()
            .find(|analysis| analysis.round_number == self.round_number)
    }

    #[must_use]
    pub fn should_wait_for_pre_search(&self) -> bool {
        should_wait_for_pre_search(
            self.thread.enable_web_search,
            &self.pre_searches,
            self.round_number,
        )
    }

    /// Response of the participant at `index` in response order, for the current round.
    ///
    /// Messages carrying the participant's id are preferred over index-only placeholders.
    #[must_use]
    pub fn participant_message(&self, index: usize) -> Option<&Message> {
        let participants = self.ordered_participants();
        let participant = participants.get(index)?;
        let in_round = || {
            self.messages.iter().filter(|message| {
                message.round_number() == Some(self.round_number)
                    && message.is_participant_response()
            })
        };

        in_round()
            .find(|message| {
                message.metadata.participant_id.as_deref() == Some(participant.id.as_str())
            })
            .or_else(|| {
                in_round().find(|message| {
                    message.metadata.participant_id.is_none()
                        && message.metadata.participant_index.and_then(|i| usize::try_from(i).ok())
                            == Some(index)
                })
            })
    }

    #[must_use]
    pub fn moderator_message(&self) -> Option<&Message> {
        self.messages.iter().find(|message| {
            message.round_number() == Some(self.round_number) && message.metadata.is_moderator
        })
    }

    /// Inserts or updates a message, then re-runs deduplication over the whole list.
    pub fn upsert_message(&mut self, message: Message) {
        match self
            .messages
            .iter_mut()
            .find(|existing| existing.id == message.id)
        {
            Some(existing) => *existing = merge_message_parts(existing, &message),
            None => self.messages.push(message),
        }
        self.messages = deduplicate_messages(&self.messages);
    }

    pub fn upsert_pre_search(&mut self, pre_search: PreSearch) {
        match self
            .pre_searches
            .iter_mut()
            .find(|existing| existing.round_number == pre_search.round_number)
        {
            Some(existing) => *existing = pre_search,
            None => self.pre_searches.push(pre_search),
        }
    }

    pub fn upsert_analysis(&mut self, analysis: Analysis) {
        match self
            .analyses
            .iter_mut()
            .find(|existing| existing.round_number == analysis.round_number)
        {
            Some(existing) => *existing = analysis,
            None => self.analyses.push(analysis),
        }
    }

    /// Sets the status of the current round's pre-search, creating the record if needed.
    pub fn set_pre_search_status(&mut self, status: PhaseStatus, user_query: &str) {
        let record = self.pre_search().cloned().unwrap_or_else(|| {
            PreSearch::pending(&self.thread.id, self.round_number, user_query)
        });
        self.upsert_pre_search(record.with_status(status));
    }

    /// Sets the status of the current round's analysis, creating the record if needed.
    pub fn set_analysis_status(&mut self, status: PhaseStatus) {
        let record = self.analysis().cloned().unwrap_or_else(|| {
            Analysis::pending(&self.thread.id, self.round_number, self.thread.mode)
        });
        self.upsert_analysis(record.with_status(status));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MessageId, MessagePart};

    fn context() -> RoundContext {
        RoundContext::new(
            Thread::new("t"),
            vec![
                Participant::new("b", "model-b", 1),
                Participant::new("a", "model-a", 0),
            ],
            0,
        )
    }

    #[test]
    fn participant_lookup_follows_priority_order() {
        let mut ctx = context();
        ctx.upsert_message(
            Message::participant(MessageId::participant("t", 0, 0), 0, 0)
                .with_participant_id("a")
                .with_parts(vec![MessagePart::text("from a")]),
        );

        assert_eq!(ctx.participant_message(0).map(Message::text).as_deref(), Some("from a"));
        assert!(ctx.participant_message(1).is_none());
        assert!(ctx.participant_message(2).is_none());
    }

    #[test]
    fn lookup_ignores_other_rounds() {
        let mut ctx = context();
        ctx.upsert_message(
            Message::participant(MessageId::participant("t", 1, 0), 1, 0).with_participant_id("a"),
        );
        assert!(ctx.participant_message(0).is_none());
    }

    #[test]
    fn upsert_merges_same_id_parts() {
        let mut ctx = context();
        let id = MessageId::participant("t", 0, 0);
        ctx.upsert_message(
            Message::participant(id.clone(), 0, 0).with_parts(vec![MessagePart::text("Hi")]),
        );
        ctx.upsert_message(
            Message::participant(id, 0, 0).with_parts(vec![MessagePart::text_done("Hi")]),
        );

        assert_eq!(ctx.messages.len(), 1);
        assert_eq!(ctx.messages[0].parts, vec![MessagePart::text_done("Hi")]);
    }

    #[test]
    fn status_setters_create_and_update_records() {
        let mut ctx = context();
        ctx.set_pre_search_status(PhaseStatus::Streaming, "question");
        ctx.set_pre_search_status(PhaseStatus::Complete, "ignored");
        assert_eq!(ctx.pre_searches.len(), 1);
        assert_eq!(ctx.pre_search().map(|p| p.status), Some(PhaseStatus::Complete));
        assert_eq!(ctx.pre_searches[0].user_query, "question");

        ctx.set_analysis_status(PhaseStatus::Failed);
        assert_eq!(ctx.analysis().map(|a| a.id.as_str()), Some("t_r0_moderator"));
    }
}
