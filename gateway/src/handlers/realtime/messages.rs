//! Session WebSocket message types
//!
//! Inbound frames are JSON objects tagged by `type`. Outbound frames are the
//! records produced by the event serializer, so only the inbound side lives
//! here.

use bytes::{BufMut, Bytes, BytesMut};
use serde::Deserialize;
use thiserror::Error;

/// Maximum allowed size for text messages (50 KB)
pub const MAX_TEXT_SIZE: usize = 50 * 1024;

/// Maximum samples in one audio frame (20 s of 24 kHz mono)
pub const MAX_AUDIO_SAMPLES: usize = 24_000 * 20;

// =============================================================================
// Incoming Messages (Client -> Server)
// =============================================================================

/// Incoming WebSocket text frames from a client
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum InboundFrame {
    /// PCM16 samples to feed the engine
    #[serde(rename = "audio")]
    Audio {
        /// Signed 16-bit samples; values outside the range reject the frame
        data: Vec<i16>,
    },

    /// Text to submit to the conversation
    #[serde(rename = "text")]
    Text {
        /// Text content
        text: String,
    },

    /// Any other `type`, ignored for forward compatibility
    #[serde(other)]
    Unknown,
}

impl InboundFrame {
    /// Parse a text frame.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Validates frame sizes to prevent resource exhaustion.
    pub fn validate_size(&self) -> Result<(), FrameError> {
        match self {
            InboundFrame::Audio { data } => {
                if data.len() > MAX_AUDIO_SAMPLES {
                    return Err(FrameError::AudioTooLarge {
                        samples: data.len(),
                        max: MAX_AUDIO_SAMPLES,
                    });
                }
            }
            InboundFrame::Text { text } => {
                let size = text.len();
                if size > MAX_TEXT_SIZE {
                    return Err(FrameError::TextTooLarge {
                        size,
                        max: MAX_TEXT_SIZE,
                    });
                }
            }
            InboundFrame::Unknown => {}
        }
        Ok(())
    }
}

/// Pack samples into raw little-endian PCM16 bytes.
pub fn pcm16_bytes(samples: &[i16]) -> Bytes {
    let mut buf = BytesMut::with_capacity(samples.len() * 2);
    for sample in samples {
        buf.put_i16_le(*sample);
    }
    buf.freeze()
}

// =============================================================================
// Validation
// =============================================================================

/// Inbound frame failures
#[derive(Debug, Error)]
pub enum FrameError {
    /// Not JSON, no `type`, or a payload of the wrong shape
    #[error("Invalid message format: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Text content exceeds maximum allowed size
    #[error("Text too large: {size} bytes (max: {max} bytes)")]
    TextTooLarge { size: usize, max: usize },

    /// Audio frame exceeds maximum allowed sample count
    #[error("Audio too large: {samples} samples (max: {max} samples)")]
    AudioTooLarge { samples: usize, max: usize },
}

impl FrameError {
    /// Whether the connection should be closed after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FrameError::Malformed(_))
    }
}
