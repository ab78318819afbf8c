//! Stream buffering, recording and resume resolution.
pub mod buffer_store;
pub mod recorder;
pub mod resume_service;
pub mod stream_buffer;
pub mod stream_supervisor;

pub use buffer_store::{BufferStore, InMemoryBufferStore};
pub use recorder::{RecorderError, StreamRecorder, StreamSource, TokenSource};
pub use resume_service::ResumeService;
pub use stream_buffer::{BufferError, StreamBufferService};
pub use stream_supervisor::{SharedStreamSupervisor, StreamStopReason, StreamSupervisor};
