//! Mirrors a round from the server's resume answers into the round engine.
//!
//! The CLI never starts producers itself. It reports the actions a client
//! would take at each point, which makes it useful for watching a round
//! progress or checking where a stuck round would restart.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use shared::{
    models::{
        FinishReason, Message, MessageId, Participant, PhaseStatus, StreamPhase, StreamStatus,
        Thread, Usage,
    },
    rounds::{RoundAction, RoundContext, RoundError, RoundStateMachine},
    streams::ResumeOutcome,
};
use tracing::debug;

use super::client::{ResumeClient, read_live};
use super::resume::{describe_outcome, placeholder_for, print_delta};

#[derive(Args, Debug)]
#[command(about = "Follow a round phase by phase until it completes")]
pub struct FollowArgs {
    /// Thread identifier
    #[arg(long)]
    pub thread: String,

    /// Round number (0-based)
    #[arg(long, default_value_t = 0)]
    pub round: u32,

    /// Number of participants configured for the thread
    #[arg(long, default_value_t = 1)]
    pub participants: u32,

    /// The round starts with a web-search phase
    #[arg(long)]
    pub web_search: bool,

    /// Delay between resume requests while nothing is live
    #[arg(long, default_value_t = 500)]
    pub poll_interval_ms: u64,

    /// Give up after this many resume requests
    #[arg(long)]
    pub max_polls: Option<u32>,

    /// Roundtable server base URL
    #[arg(long, default_value = "http://localhost:8080")]
    pub server: String,
}

/// Local round state rebuilt from resume outcomes.
#[derive(Debug)]
pub struct Follower {
    ctx: RoundContext,
    machine: RoundStateMachine,
    last_phase: Option<StreamPhase>,
}

impl Follower {
    pub fn new(thread_id: &str, round_number: u32, participants: u32, web_search: bool) -> Self {
        let participants = (0..participants)
            .map(|index| {
                Participant::new(
                    format!("participant-{index}"),
                    "unknown",
                    i32::try_from(index).unwrap_or(i32::MAX),
                )
            })
            .collect();
        Self {
            ctx: RoundContext::new(
                Thread::new(thread_id).with_web_search(web_search),
                participants,
                round_number,
            ),
            machine: RoundStateMachine::new(round_number),
            last_phase: None,
        }
    }

    /// True once any phase of the round was reported by the server.
    pub const fn has_observed(&self) -> bool {
        self.last_phase.is_some()
    }

    pub const fn context(&self) -> &RoundContext {
        &self.ctx
    }

    /// Folds one resume outcome into the context and returns the actions due.
    ///
    /// # Errors
    /// Returns [`RoundError`] when the server disagrees with the local round shape.
    pub fn observe(&mut self, outcome: &ResumeOutcome) -> Result<Vec<RoundAction>, RoundError> {
        match outcome.phase {
            Some(StreamPhase::PreSearch) => {
                self.ctx.set_pre_search_status(PhaseStatus::Streaming, "");
            }
            Some(StreamPhase::Participant) => {
                self.settle_pre_search();
                for (&index, &status) in &outcome.participant_statuses {
                    if status.is_terminal() {
                        self.settle_participant(index, status);
                    }
                }
            }
            Some(StreamPhase::Moderator) => {
                self.settle_pre_search();
                self.settle_all_participants();
            }
            None => match self.last_phase {
                Some(StreamPhase::PreSearch) => self.settle_pre_search(),
                Some(StreamPhase::Moderator) => self.settle_moderator(),
                _ => {}
            },
        }
        if outcome.phase.is_some() {
            self.last_phase = outcome.phase;
        }

        self.machine.apply_resume(&self.ctx, outcome)?;
        self.machine.poll(&self.ctx)
    }

    /// Records a message read from a live replay.
    ///
    /// # Errors
    /// Returns [`RoundError`] when the context contradicts the machine.
    pub fn absorb(&mut self, mut message: Message) -> Result<Vec<RoundAction>, RoundError> {
        if let Some(index) = message.metadata.participant_index
            && message.metadata.participant_id.is_none()
        {
            message.metadata.participant_id = self.participant_id(index);
        }
        self.ctx.upsert_message(message);
        self.machine.poll(&self.ctx)
    }

    fn participant_id(&self, index: u32) -> Option<String> {
        let index = usize::try_from(index).ok()?;
        self.ctx
            .ordered_participants()
            .get(index)
            .map(|participant| participant.id.clone())
    }

    fn settle_pre_search(&mut self) {
        if self.ctx.thread.enable_web_search
            && !self
                .ctx
                .pre_search()
                .is_some_and(|pre_search| pre_search.status.is_terminal())
        {
            self.ctx.set_pre_search_status(PhaseStatus::Complete, "");
        }
    }

    fn settle_participant(&mut self, index: u32, status: StreamStatus) {
        let reason = match status {
            StreamStatus::Failed => FinishReason::Error,
            _ => FinishReason::Stop,
        };
        let round = self.ctx.round_number;
        let thread_id = self.ctx.thread.id.clone();
        let mut message = Message::participant(
            MessageId::participant(&thread_id, round, index),
            round,
            index,
        )
        .with_finish(reason, Usage::default());
        message.metadata.participant_id = self.participant_id(index);
        self.ctx.upsert_message(message);
    }

    fn settle_all_participants(&mut self) {
        let total = u32::try_from(self.ctx.ordered_participants().len()).unwrap_or(u32::MAX);
        for index in 0..total {
            let index_usize = usize::try_from(index).unwrap_or(usize::MAX);
            let answered = self
                .ctx
                .participant_message(index_usize)
                .is_some_and(|message| !message.is_streaming());
            if !answered {
                self.settle_participant(index, StreamStatus::Completed);
            }
        }
    }

    fn settle_moderator(&mut self) {
        if self.ctx.moderator_message().is_some() {
            return;
        }
        let round = self.ctx.round_number;
        let id = MessageId::moderator(&self.ctx.thread.id, round);
        self.ctx.upsert_message(
            Message::moderator(id, round).with_finish(FinishReason::Stop, Usage::default()),
        );
    }
}

/// Polls the resume endpoint and prints every action until the round completes.
///
/// # Errors
/// Returns an error if a request fails or the server contradicts the round shape.
pub async fn handle_follow(args: FollowArgs) -> Result<()> {
    let client = ResumeClient::new(&args.server)?;
    let mut follower = Follower::new(&args.thread, args.round, args.participants, args.web_search);
    let interval = Duration::from_millis(args.poll_interval_ms);
    let mut polls = 0_u32;

    loop {
        polls += 1;
        let response = client.resume(&args.thread, args.round).await?;
        println!("{}", describe_outcome(&response.outcome));

        let mut done = report(&follower.observe(&response.outcome).context("round out of sync")?);

        if let Some(body) = response.body {
            let placeholder = placeholder_for(&args.thread, args.round, &response.outcome);
            let message = read_live(body, placeholder, print_delta).await?;
            println!();
            done |= report(&follower.absorb(message).context("round out of sync")?);
        }

        if done {
            return Ok(());
        }
        if !follower.has_observed() && response.outcome.phase.is_none() {
            println!("nothing to follow for round {}", args.round);
            return Ok(());
        }
        if args.max_polls.is_some_and(|max| polls >= max) {
            println!("stopped after {polls} polls");
            return Ok(());
        }

        debug!(polls, "waiting for the next phase");
        tokio::time::sleep(interval).await;
    }
}

/// Prints actions; returns true once the round is complete.
fn report(actions: &[RoundAction]) -> bool {
    let mut complete = false;
    for action in actions {
        match action {
            RoundAction::StartPreSearch { round_number } => {
                println!("-> start pre-search (round {round_number})");
            }
            RoundAction::StartParticipant {
                participant_index,
                participant_id,
                ..
            } => println!("-> start participant {participant_index} ({participant_id})"),
            RoundAction::StartModerator { round_number } => {
                println!("-> start moderator (round {round_number})");
            }
            RoundAction::RoundComplete { round_number } => {
                println!("-> round {round_number} complete");
                complete = true;
            }
        }
    }
    complete
}
