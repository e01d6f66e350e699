//! Wind Station Wire Protocol
//!
//! Inbound, the station streams one JSON object per reading with no length
//! prefix and no escaping:
//!
//! ```text
//! ...noise...{"mph":5,"gust":10,"temp":"70F"}{"mph":6,...}
//!            ^ FRAME_START                  ^ FRAME_END
//! ```
//!
//! Outbound, commands are short printable tokens written verbatim.
//!
//! The framer only looks at the outermost braces by byte value. A `}` inside a
//! string value ends the frame early; the station firmware is not known to
//! send one.

use crate::domain::models::{OutboundCommand, TelemetryMessage};
use thiserror::Error;
use tracing::trace;

/// Start of a telemetry frame
pub const FRAME_START: u8 = b'{';

/// End of a telemetry frame
pub const FRAME_END: u8 = b'}';

/// Default cap on a single frame, delimiters included
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024;

/// Commands understood by the station firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCommand {
    /// Toggle the display backlight in the station box
    ToggleLights,
    /// Reset the stored highest gust
    ResetGust,
}

impl DeviceCommand {
    /// Get the raw bytes for this command
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            Self::ToggleLights => b"@L@",
            Self::ResetGust => b"@R@",
        }
    }
}

impl From<DeviceCommand> for OutboundCommand {
    fn from(command: DeviceCommand) -> Self {
        OutboundCommand::new(command.as_bytes())
    }
}

#[derive(Debug, Error)]
pub enum FramingError {
    #[error("invalid telemetry payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),
    #[error("frame exceeded {max} bytes without a closing delimiter")]
    FrameTooLong { max: usize },
}

/// Incremental decoder from a byte stream to telemetry messages.
///
/// Holds at most one partial frame. Bytes outside a frame are dropped.
#[derive(Debug)]
pub struct Framer {
    buffer: Vec<u8>,
    max_frame_len: usize,
}

impl Default for Framer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl Framer {
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(64),
            max_frame_len,
        }
    }

    /// Feed one byte.
    ///
    /// Returns `Ok(Some(_))` when the byte completes a valid frame, `Ok(None)`
    /// while scanning or accumulating, and an error when a completed or
    /// overlong frame is dropped. After an error the framer is scanning again;
    /// a `{` that overflowed a frame starts the next one.
    pub fn feed(&mut self, byte: u8) -> Result<Option<TelemetryMessage>, FramingError> {
        if self.buffer.is_empty() {
            if byte == FRAME_START {
                self.buffer.push(byte);
            }
            return Ok(None);
        }

        if self.buffer.len() >= self.max_frame_len {
            self.reset();
            // The overflowing byte is scanned like any byte outside a frame
            if byte == FRAME_START {
                self.buffer.push(byte);
            }
            return Err(FramingError::FrameTooLong {
                max: self.max_frame_len,
            });
        }

        self.buffer.push(byte);
        if byte != FRAME_END {
            return Ok(None);
        }

        let frame = std::mem::take(&mut self.buffer);
        trace!("Frame: {}", String::from_utf8_lossy(&frame));
        let message = serde_json::from_slice(&frame)?;
        Ok(Some(message))
    }

    /// Feed a chunk, collecting every outcome in arrival order.
    pub fn feed_all(&mut self, bytes: &[u8]) -> Vec<Result<TelemetryMessage, FramingError>> {
        bytes
            .iter()
            .filter_map(|&b| self.feed(b).transpose())
            .collect()
    }

    /// Drop any partial frame.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    pub fn is_idle(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}
