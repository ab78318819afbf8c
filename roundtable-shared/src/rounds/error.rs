use thiserror::Error;

/// Invariant violations that stop the round engine. Phase failures are data, not errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoundError {
    #[error("round {round} has no enabled participants")]
    NoParticipants { round: u32 },

    #[error("participant cursor {cursor} is past the {total} enabled participants")]
    CursorOverflow { cursor: usize, total: usize },

    #[error("context belongs to round {context} but the state machine is on round {machine}")]
    RoundMismatch { machine: u32, context: u32 },

    #[error("server reported {reported} participants but {configured} are enabled")]
    ParticipantCountMismatch { reported: u32, configured: usize },
}
