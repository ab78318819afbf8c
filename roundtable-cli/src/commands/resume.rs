use std::io::Write as _;

use anyhow::Result;
use clap::Args;
use shared::{
    models::{Message, MessageId, StreamChunk, StreamPhase},
    streams::ResumeOutcome,
};

use super::client::{ResumeClient, read_live};

#[derive(Args, Debug)]
#[command(about = "Ask the server what can be resumed for a round")]
pub struct ResumeArgs {
    /// Thread identifier
    #[arg(long)]
    pub thread: String,

    /// Round number (0-based)
    #[arg(long, default_value_t = 0)]
    pub round: u32,

    /// Roundtable server base URL
    #[arg(long, default_value = "http://localhost:8080")]
    pub server: String,
}

/// Prints the resume outcome and, for a live stream, the replayed text.
///
/// # Errors
/// Returns an error if the request or the replay fails.
pub async fn handle_resume(args: ResumeArgs) -> Result<()> {
    let client = ResumeClient::new(&args.server)?;
    let response = client.resume(&args.thread, args.round).await?;
    println!("{}", describe_outcome(&response.outcome));

    let Some(body) = response.body else {
        return Ok(());
    };

    let placeholder = placeholder_for(&args.thread, args.round, &response.outcome);
    let message = read_live(body, placeholder, print_delta).await?;
    println!();
    println!("[finished: {}]", message.metadata.finish_reason.as_str());
    if let Some(error) = &message.metadata.error_message {
        println!("[error: {error}]");
    }
    Ok(())
}

pub(crate) fn print_delta(chunk: &StreamChunk) {
    if let StreamChunk::TextDelta { delta } = chunk {
        print!("{delta}");
        let _ = std::io::stdout().flush();
    }
}

/// Empty message the replayed chunks are folded into.
pub(crate) fn placeholder_for(thread_id: &str, round_number: u32, outcome: &ResumeOutcome) -> Message {
    let round_number = outcome.round_number.unwrap_or(round_number);
    match (outcome.phase, outcome.participant_index) {
        (Some(StreamPhase::Moderator), _) => {
            Message::moderator(MessageId::moderator(thread_id, round_number), round_number)
        }
        (_, Some(index)) => Message::participant(
            MessageId::participant(thread_id, round_number, index),
            round_number,
            index,
        ),
        _ => Message::participant(
            MessageId::participant(thread_id, round_number, 0),
            round_number,
            0,
        ),
    }
}

/// One-line summary of an outcome.
pub(crate) fn describe_outcome(outcome: &ResumeOutcome) -> String {
    let state = if outcome.is_live() { "live" } else { "no content" };
    let Some(phase) = outcome.phase else {
        return "idle: nothing to resume".to_string();
    };

    let mut line = format!("{state}: {}", phase.as_str());
    if let Some(stream_id) = &outcome.stream_id {
        line.push_str(&format!(" stream={stream_id}"));
    }
    if let Some(round) = outcome.round_number {
        line.push_str(&format!(" round={round}"));
    }
    if let (Some(index), Some(total)) = (outcome.participant_index, outcome.total_participants) {
        line.push_str(&format!(" participant={index}/{total}"));
    }
    if !outcome.participant_statuses.is_empty() {
        let statuses: Vec<String> = outcome
            .participant_statuses
            .iter()
            .map(|(index, status)| format!("{index}:{}", status.as_str()))
            .collect();
        line.push_str(&format!(" statuses=[{}]", statuses.join(",")));
    }
    match (phase, outcome.next_participant_index) {
        (StreamPhase::Participant, Some(next)) => line.push_str(&format!(" next={next}")),
        (StreamPhase::Participant, None) => line.push_str(" next=moderator"),
        _ => {}
    }
    if let Some(moderator_id) = &outcome.moderator_id {
        line.push_str(&format!(" moderator={moderator_id}"));
    }
    line
}
