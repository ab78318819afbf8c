//! Round engine: participant ordering, gating, response detection,
//! reconciliation of message sources, and the phase state machine.

pub mod accumulator;
pub mod context;
pub mod dedup;
pub mod error;
pub mod gate;
pub mod responded;
pub mod state_machine;

pub use accumulator::MessageAccumulator;
pub use context::RoundContext;
pub use dedup::{
    DedupeKey, dedupe_key, deduplicate_messages, deduplicate_parts, merge_message_parts,
};
pub use error::RoundError;
pub use gate::{PendingMessage, should_wait_for_pre_search};
pub use responded::is_participant_responded;
pub use state_machine::{RoundAction, RoundPhase, RoundStateMachine, TriggerTracker};
