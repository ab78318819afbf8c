//! Server-sent event framing for buffered chunks.
//!
//! Each chunk is stored and replayed as one `data: {json}\n\n` frame, so a
//! replay is the stored frames concatenated unchanged.

use thiserror::Error;

use crate::models::StreamChunk;

const FRAME_DELIMITER: &[u8] = b"\n\n";
const DONE_MARKER: &str = "[DONE]";

#[derive(Debug, Error)]
pub enum SseDecodeError {
    #[error("frame is not valid UTF-8")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("malformed chunk payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Encodes a chunk as a single SSE frame.
///
/// # Errors
/// Returns an error if the chunk cannot be serialized.
pub fn encode_frame(chunk: &StreamChunk) -> Result<String, serde_json::Error> {
    Ok(format!("data: {}\n\n", serde_json::to_string(chunk)?))
}

/// Incremental decoder tolerant of frames split across reads.
#[derive(Debug, Default)]
pub struct SseFrameDecoder {
    buffer: Vec<u8>,
}

impl SseFrameDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds raw bytes and returns every chunk completed by them.
    ///
    /// # Errors
    /// Returns the first malformed frame. Frames before it in the same read are lost,
    /// the buffer is left positioned after the bad frame.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<StreamChunk>, SseDecodeError> {
        self.buffer.extend_from_slice(bytes);

        let mut chunks = Vec::new();
        while let Some(end) = find_delimiter(&self.buffer) {
            let frame: Vec<u8> = self.buffer.drain(..end + FRAME_DELIMITER.len()).collect();
            if let Some(chunk) = decode_frame(&frame[..end])? {
                chunks.push(chunk);
            }
        }
        Ok(chunks)
    }

    /// Bytes received that do not yet form a complete frame.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

fn find_delimiter(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(FRAME_DELIMITER.len())
        .position(|window| window == FRAME_DELIMITER)
}

fn decode_frame(frame: &[u8]) -> Result<Option<StreamChunk>, SseDecodeError> {
    let text = std::str::from_utf8(frame)?;
    let data = text
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|value| value.strip_prefix(' ').unwrap_or(value))
        .collect::<Vec<_>>()
        .join("\n");

    if data.is_empty() || data == DONE_MARKER {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(&data)?))
}
