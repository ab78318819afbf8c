pub mod message;
pub mod presearch;
pub mod streaming;
pub mod thread;
pub mod timestamp;

pub use message::{
    FinishReason, Message, MessageId, MessageMetadata, MessagePart, MessageRole, PartKind,
    PartState, Usage,
};
pub use presearch::{
    Analysis, PhaseStatus, PreSearch, PreSearchResults, SearchQueryResult, SearchResult,
};
pub use streaming::{
    ActiveStreamPointer, BufferedChunk, StreamBufferRecord, StreamChunk, StreamPhase,
    StreamStatus,
};
pub use thread::{Participant, Thread, ThreadMode, ThreadStatus, ordered_participants};
pub use timestamp::Timestamp;
