//! Wire codec for the provider socket.
//!
//! Frames are newline-delimited JSON: one [`WireMessage`] object per line,
//! terminated by a single `\n`. The decoder handles TCP-style byte stream
//! reassembly: partial lines are buffered until the delimiter arrives, and
//! one read may yield several complete frames.
//!
//! Empty lines are ignored. A line that is not a well-formed message, or a
//! buffered line that exceeds the size ceiling, is a fatal decode error:
//! the owning connection must be closed (frames decoded earlier remain
//! valid).

use serde_json::Value;
use thiserror::Error;

use crate::constants::MAX_FRAME_SIZE;
use crate::protocol::WireMessage;

/// Fatal decode failure on a provider connection.
#[derive(Debug, Error)]
pub enum FrameError {
    /// A delimited chunk was not a well-formed protocol message.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// The accumulated line exceeded the frame size ceiling.
    #[error("frame too large: {size} bytes (max {limit})")]
    TooLarge {
        /// Observed buffered size.
        size: usize,
        /// Configured ceiling.
        limit: usize,
    },
}

/// Encode a message into wire bytes: JSON followed by exactly one newline.
pub fn encode(msg: &WireMessage) -> Vec<u8> {
    let mut buf = serde_json::to_vec(msg).expect("wire message serialization cannot fail");
    buf.push(b'\n');
    buf
}

/// Incremental frame decoder that handles partial reads.
///
/// Feed bytes via [`FrameDecoder::feed`] and extract complete frames.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    max_frame_size: usize,
}

impl FrameDecoder {
    /// Create a decoder with the default size ceiling.
    pub fn new() -> Self {
        Self::with_limit(MAX_FRAME_SIZE)
    }

    /// Create a decoder with a custom size ceiling.
    pub fn with_limit(max_frame_size: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_frame_size,
        }
    }

    /// Feed bytes into the decoder and extract all complete frames.
    ///
    /// Incomplete data is buffered for the next call.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Malformed`] if a complete line is not a valid
    /// protocol message, or [`FrameError::TooLarge`] once the pending line
    /// exceeds the ceiling. After an error the decoder state is
    /// unspecified; the connection must be dropped.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<WireMessage>, FrameError> {
        self.buf.extend_from_slice(bytes);
        let mut frames = Vec::new();

        loop {
            let Some(pos) = self.buf.iter().position(|b| *b == b'\n') else {
                // No delimiter yet. The pending line can only grow, so
                // enforce the ceiling on the partial buffer too.
                if self.buf.len() > self.max_frame_size {
                    return Err(FrameError::TooLarge {
                        size: self.buf.len(),
                        limit: self.max_frame_size,
                    });
                }
                break;
            };

            let line: Vec<u8> = self.buf.drain(..=pos).take(pos).collect();
            if line.len() > self.max_frame_size {
                return Err(FrameError::TooLarge {
                    size: line.len(),
                    limit: self.max_frame_size,
                });
            }

            // Empty frame (just "\n") is ignored, as is bare whitespace.
            if line.iter().all(|b| b.is_ascii_whitespace()) {
                continue;
            }

            frames.push(parse_line(&line)?);
        }

        Ok(frames)
    }

    /// Returns true if the decoder has buffered partial data.
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty()
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse one delimited line into a [`WireMessage`].
fn parse_line(line: &[u8]) -> Result<WireMessage, FrameError> {
    // Decode through Value first so "valid JSON, wrong shape" and "not
    // JSON at all" both report the offending payload.
    let value: Value = serde_json::from_slice(line)
        .map_err(|e| FrameError::Malformed(format!("invalid JSON: {e}")))?;
    if !value.is_object() {
        return Err(FrameError::Malformed(format!(
            "expected a JSON object, got: {value}"
        )));
    }
    serde_json::from_value(value).map_err(|e| FrameError::Malformed(e.to_string()))
}
