//! JSON encoding and decoding for socket frames.
//!
//! The socket carries one JSON object per text frame, so there is no
//! length-prefix framing here: a frame boundary is a WebSocket message
//! boundary.

use crate::message::{InboundFrame, OutboundFrame};

/// Maximum inbound frame size accepted for decoding (64 KB).
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Error type for frame encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload is not valid JSON or does not match any frame shape.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    /// The payload exceeds [`MAX_FRAME_SIZE`].
    #[error("frame too large: {size} bytes (max {max} bytes)")]
    TooLarge {
        /// Actual size in bytes.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },
}

/// Encodes an outbound frame as a JSON string.
///
/// # Errors
///
/// Returns [`FrameError::Malformed`] if serialization fails.
pub fn encode(frame: &OutboundFrame) -> Result<String, FrameError> {
    Ok(serde_json::to_string(frame)?)
}

/// Decodes an inbound frame from a JSON text payload.
///
/// # Errors
///
/// Returns [`FrameError::TooLarge`] for oversized payloads and
/// [`FrameError::Malformed`] for anything that is not a frame object.
pub fn decode(text: &str) -> Result<InboundFrame, FrameError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge {
            size: text.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    Ok(serde_json::from_str(text)?)
}
