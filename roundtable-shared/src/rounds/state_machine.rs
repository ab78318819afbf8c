//! Pull-based round orchestration.
//!
//! The machine owns the single authoritative phase of one round. Callers feed it
//! a fresh [`RoundContext`] whenever records change and carry out the
//! [`RoundAction`]s it returns. Every start action is guarded by a
//! [`TriggerTracker`] flag, so re-evaluating the same context never starts a
//! phase twice.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::context::RoundContext;
use super::error::RoundError;
use super::responded::is_participant_responded;
use crate::models::{FinishReason, PhaseStatus, StreamPhase};
use crate::streams::ResumeOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum RoundPhase {
    Idle,
    PreSearch,
    Participants { cursor: usize },
    Moderator,
    Complete,
}

impl RoundPhase {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::PreSearch => "presearch",
            Self::Participants { .. } => "participants",
            Self::Moderator => "moderator",
            Self::Complete => "complete",
        }
    }
}

/// Side effect the caller must perform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RoundAction {
    StartPreSearch {
        round_number: u32,
    },
    StartParticipant {
        round_number: u32,
        participant_index: u32,
        participant_id: String,
    },
    StartModerator {
        round_number: u32,
    },
    RoundComplete {
        round_number: u32,
    },
}

/// Round-scoped "already started" flags, separate from phase status.
///
/// Clearing a flag is the only way to let a phase start again.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerTracker {
    round_number: Option<u32>,
    pre_search: bool,
    participants: BTreeSet<u32>,
    moderator: bool,
    pre_search_abandoned: bool,
    abandoned: BTreeSet<u32>,
}

impl TriggerTracker {
    fn ensure_round(&mut self, round_number: u32) {
        if self.round_number != Some(round_number) {
            *self = Self {
                round_number: Some(round_number),
                ..Self::default()
            };
        }
    }

    /// Returns `true` the first time it is called for `round_number`.
    pub fn try_mark_pre_search(&mut self, round_number: u32) -> bool {
        self.ensure_round(round_number);
        !std::mem::replace(&mut self.pre_search, true)
    }

    /// A successful mark also ends an earlier abandonment of the same slot.
    pub fn try_mark_participant(&mut self, round_number: u32, index: u32) -> bool {
        self.ensure_round(round_number);
        let marked = self.participants.insert(index);
        if marked {
            self.abandoned.remove(&index);
        }
        marked
    }

    pub fn try_mark_moderator(&mut self, round_number: u32) -> bool {
        self.ensure_round(round_number);
        !std::mem::replace(&mut self.moderator, true)
    }

    pub fn clear_pre_search(&mut self, round_number: u32) {
        if self.round_number == Some(round_number) {
            self.pre_search = false;
        }
    }

    pub fn clear_participant(&mut self, round_number: u32, index: u32) {
        if self.round_number == Some(round_number) {
            self.participants.remove(&index);
        }
    }

    pub fn clear_moderator(&mut self, round_number: u32) {
        if self.round_number == Some(round_number) {
            self.moderator = false;
        }
    }

    /// Clears the flag and records that the producer is gone, so a
    /// half-received local message no longer holds the slot.
    pub fn abandon_participant(&mut self, round_number: u32, index: u32) {
        self.ensure_round(round_number);
        self.participants.remove(&index);
        self.abandoned.insert(index);
    }

    #[must_use]
    pub fn participant_abandoned(&self, round_number: u32, index: u32) -> bool {
        self.round_number == Some(round_number) && self.abandoned.contains(&index)
    }

    pub fn abandon_pre_search(&mut self, round_number: u32) {
        self.ensure_round(round_number);
        self.pre_search_abandoned = true;
    }

    #[must_use]
    pub fn pre_search_abandoned(&self, round_number: u32) -> bool {
        self.round_number == Some(round_number) && self.pre_search_abandoned
    }

    #[must_use]
    pub fn participant_triggered(&self, round_number: u32, index: u32) -> bool {
        self.round_number == Some(round_number) && self.participants.contains(&index)
    }

    #[must_use]
    pub fn moderator_triggered(&self, round_number: u32) -> bool {
        self.round_number == Some(round_number) && self.moderator
    }
}

#[derive(Debug, Clone)]
pub struct RoundStateMachine {
    round_number: u32,
    phase: RoundPhase,
    triggers: TriggerTracker,
}

impl RoundStateMachine {
    #[must_use]
    pub fn new(round_number: u32) -> Self {
        Self {
            round_number,
            phase: RoundPhase::Idle,
            triggers: TriggerTracker::default(),
        }
    }

    #[must_use]
    pub const fn phase(&self) -> RoundPhase {
        self.phase
    }

    #[must_use]
    pub const fn round_number(&self) -> u32 {
        self.round_number
    }

    #[must_use]
    pub const fn triggers(&self) -> &TriggerTracker {
        &self.triggers
    }

    pub const fn triggers_mut(&mut self) -> &mut TriggerTracker {
        &mut self.triggers
    }

    /// Moves to a new round. Flags of the previous round no longer apply.
    pub fn start_round(&mut self, round_number: u32) {
        self.round_number = round_number;
        self.phase = RoundPhase::Idle;
        self.triggers = TriggerTracker::default();
    }

    /// Evaluates the context until the phase stops moving and returns the actions to run.
    ///
    /// # Errors
    /// Returns [`RoundError`] when the context contradicts the machine.
    pub fn poll(&mut self, ctx: &RoundContext) -> Result<Vec<RoundAction>, RoundError> {
        let mut actions = Vec::new();
        loop {
            let before = self.phase;
            let action = self.step(ctx)?;
            let moved = self.phase != before;
            if let Some(action) = action {
                actions.push(action);
            }
            if !moved {
                return Ok(actions);
            }
        }
    }

    /// Performs at most one transition.
    ///
    /// # Errors
    /// Returns [`RoundError`] when the context contradicts the machine.
    pub fn step(&mut self, ctx: &RoundContext) -> Result<Option<RoundAction>, RoundError> {
        if ctx.round_number != self.round_number {
            return Err(RoundError::RoundMismatch {
                machine: self.round_number,
                context: ctx.round_number,
            });
        }
        let round_number = self.round_number;

        match self.phase {
            RoundPhase::Idle => {
                if ctx.thread.enable_web_search {
                    self.transition(RoundPhase::PreSearch);
                } else {
                    self.transition(RoundPhase::Participants { cursor: 0 });
                }
                Ok(None)
            }
            RoundPhase::PreSearch => {
                if !ctx.should_wait_for_pre_search()
                    || self.triggers.pre_search_abandoned(round_number)
                {
                    self.transition(RoundPhase::Participants { cursor: 0 });
                    return Ok(None);
                }
                if ctx.pre_search().is_none() && self.triggers.try_mark_pre_search(round_number) {
                    return Ok(Some(RoundAction::StartPreSearch { round_number }));
                }
                Ok(None)
            }
            RoundPhase::Participants { cursor } => self.step_participants(ctx, cursor),
            RoundPhase::Moderator => {
                if moderator_finished(ctx) {
                    self.transition(RoundPhase::Complete);
                    return Ok(Some(RoundAction::RoundComplete { round_number }));
                }
                if self.triggers.try_mark_moderator(round_number) {
                    return Ok(Some(RoundAction::StartModerator { round_number }));
                }
                Ok(None)
            }
            RoundPhase::Complete => Ok(None),
        }
    }

    fn step_participants(
        &mut self,
        ctx: &RoundContext,
        cursor: usize,
    ) -> Result<Option<RoundAction>, RoundError> {
        let round_number = self.round_number;
        let participants = ctx.ordered_participants();
        if participants.is_empty() {
            return Err(RoundError::NoParticipants {
                round: round_number,
            });
        }
        if cursor > participants.len() {
            return Err(RoundError::CursorOverflow {
                cursor,
                total: participants.len(),
            });
        }
        let Some(participant) = participants.get(cursor) else {
            self.transition(RoundPhase::Moderator);
            return Ok(None);
        };
        let index = index_u32(cursor, participants.len())?;

        match ctx.participant_message(cursor) {
            Some(message) if is_participant_responded(message) => {
                self.transition(RoundPhase::Participants { cursor: cursor + 1 });
                Ok(None)
            }
            Some(message)
                if message.is_streaming()
                    && !self.triggers.participant_abandoned(round_number, index) =>
            {
                Ok(None)
            }
            _ if self.triggers.try_mark_participant(round_number, index) => {
                Ok(Some(RoundAction::StartParticipant {
                    round_number,
                    participant_index: index,
                    participant_id: participant.id.clone(),
                }))
            }
            _ => Ok(None),
        }
    }

    /// Aligns the machine with what the server reports after a reload or reconnect.
    ///
    /// A live phase is marked as triggered so it is not started again. A stale
    /// participant is abandoned: its flag is cleared and a half-received local
    /// message stops holding the slot, so the next poll restarts it. A pre-search
    /// the context still shows as streaming but the server no longer reports is
    /// abandoned the same way and participants are released.
    ///
    /// # Errors
    /// Returns [`RoundError::ParticipantCountMismatch`] when the server's
    /// participant total disagrees with the context.
    pub fn apply_resume(
        &mut self,
        ctx: &RoundContext,
        outcome: &ResumeOutcome,
    ) -> Result<(), RoundError> {
        if outcome.round_number.is_some_and(|round| round != self.round_number) {
            return Ok(());
        }
        let round_number = self.round_number;

        match outcome.phase {
            None => {
                let running_locally = ctx
                    .pre_search()
                    .is_some_and(|pre_search| pre_search.status == PhaseStatus::Streaming);
                if self.phase == RoundPhase::PreSearch && running_locally {
                    debug!(
                        round = round_number,
                        "pre-search no longer reported by the server, releasing participants"
                    );
                    self.triggers.abandon_pre_search(round_number);
                }
            }
            Some(StreamPhase::PreSearch) => {
                self.triggers.try_mark_pre_search(round_number);
                self.transition(RoundPhase::PreSearch);
            }
            Some(StreamPhase::Moderator) => {
                self.triggers.try_mark_moderator(round_number);
                self.transition(RoundPhase::Moderator);
            }
            Some(StreamPhase::Participant) => {
                let configured = ctx.ordered_participants().len();
                if let Some(reported) = outcome.total_participants {
                    if usize::try_from(reported).ok() != Some(configured) {
                        return Err(RoundError::ParticipantCountMismatch {
                            reported,
                            configured,
                        });
                    }
                }

                if let Some(current) = outcome.participant_index {
                    if outcome.is_live() {
                        self.triggers.try_mark_participant(round_number, current);
                    } else {
                        self.triggers.abandon_participant(round_number, current);
                    }
                }

                match outcome.next_participant_index {
                    Some(next) => {
                        let cursor = usize::try_from(next).map_err(|_| {
                            RoundError::CursorOverflow {
                                cursor: usize::MAX,
                                total: configured,
                            }
                        })?;
                        self.transition(RoundPhase::Participants { cursor });
                    }
                    None => self.transition(RoundPhase::Moderator),
                }
            }
        }
        Ok(())
    }

    fn transition(&mut self, next: RoundPhase) {
        debug!(
            round = self.round_number,
            from = self.phase.as_str(),
            to = next.as_str(),
            "round phase transition"
        );
        self.phase = next;
    }
}

fn moderator_finished(ctx: &RoundContext) -> bool {
    if ctx.analysis().is_some_and(|analysis| analysis.status.is_terminal()) {
        return true;
    }
    ctx.moderator_message().is_some_and(|message| {
        !message.is_streaming() && message.metadata.finish_reason != FinishReason::Unknown
    })
}

fn index_u32(cursor: usize, total: usize) -> Result<u32, RoundError> {
    u32::try_from(cursor).map_err(|_| RoundError::CursorOverflow { cursor, total })
}
