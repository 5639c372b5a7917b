//! Incremental decoder for `data: <json>\n\n` chat stream frames.
//!
//! The parser is pull-based: feed bytes with [`EventFrameParser::push`] and
//! drain decoded frames with [`EventFrameParser::next_frame`] until it returns
//! `None`. Malformed frames are logged and skipped. After the `[DONE]`
//! sentinel the parser is finished and ignores any further input.

use docent_types::StreamEvent;

use crate::sse_types::{PayloadError, RawFrame};

/// Literal data payload that closes a stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Upper bound on buffered bytes that do not yet form a complete frame.
pub const MAX_FRAME_BUFFER_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Event(StreamEvent),
    /// The `[DONE]` sentinel.
    Done,
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("SSE buffer exceeded maximum size ({limit} bytes) without a frame boundary")]
    BufferOverflow { limit: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Payload(#[from] PayloadError),
}

#[derive(Debug, Default)]
pub struct EventFrameParser {
    buffer: Vec<u8>,
    finished: bool,
    dropped: usize,
}

impl EventFrameParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes read from the response body.
    pub fn push(&mut self, chunk: &[u8]) -> Result<(), FrameError> {
        if self.finished {
            return Ok(());
        }
        self.buffer.extend_from_slice(chunk);
        if self.buffer.len() > MAX_FRAME_BUFFER_BYTES
            && find_sse_event_boundary(&self.buffer).is_none()
        {
            return Err(FrameError::BufferOverflow {
                limit: MAX_FRAME_BUFFER_BYTES,
            });
        }
        Ok(())
    }

    /// Next decoded frame, or `None` when more bytes are needed (or the stream is done).
    pub fn next_frame(&mut self) -> Option<Frame> {
        while !self.finished {
            let raw = drain_next_sse_event(&mut self.buffer)?;
            if raw.is_empty() {
                continue;
            }

            let Ok(raw) = std::str::from_utf8(&raw) else {
                self.drop_frame(&DecodeError::InvalidUtf8, raw.len());
                continue;
            };

            // Comment-only frames (keepalives) carry no data.
            let Some(data) = extract_sse_data(raw) else {
                continue;
            };

            match decode_frame(&data) {
                Ok(Frame::Done) => {
                    self.finished = true;
                    self.buffer.clear();
                    return Some(Frame::Done);
                }
                Ok(frame) => return Some(frame),
                Err(e) => self.drop_frame(&e, data.len()),
            }
        }
        None
    }

    /// Signal end of input. Returns the number of trailing bytes discarded
    /// because they never formed a complete frame.
    pub fn finish(&mut self) -> usize {
        let leftover = std::mem::take(&mut self.buffer);
        self.finished = true;
        let trailing = leftover.iter().filter(|b| !b.is_ascii_whitespace()).count();
        if trailing > 0 {
            self.dropped = self.dropped.saturating_add(1);
            tracing::warn!(
                payload_bytes = leftover.len(),
                "Dropping truncated SSE frame at end of stream"
            );
        }
        trailing
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Frames skipped so far because they could not be decoded.
    #[must_use]
    pub fn dropped_frames(&self) -> usize {
        self.dropped
    }

    fn drop_frame(&mut self, error: &DecodeError, payload_bytes: usize) {
        self.dropped = self.dropped.saturating_add(1);
        tracing::warn!(%error, payload_bytes, "Dropping malformed SSE frame");
    }
}

/// Decode the data payload of a single frame.
pub fn decode_frame(data: &str) -> Result<Frame, DecodeError> {
    if data.trim() == DONE_SENTINEL {
        return Ok(Frame::Done);
    }
    let raw: RawFrame = serde_json::from_str(data)?;
    Ok(Frame::Event(raw.into_event()?))
}

/// A frame ends at the first blank line, `\n\n` or `\r\n\r\n`, whichever
/// comes first. Returns the boundary offset and delimiter length.
fn find_sse_event_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n");
    let crlf = buffer.windows(4).position(|w| w == b"\r\n\r\n");
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a <= b { (a, 2) } else { (b, 4) }),
        (Some(a), None) => Some((a, 2)),
        (None, Some(b)) => Some((b, 4)),
        (None, None) => None,
    }
}

/// Split one complete frame off the front of `buffer`, delimiter discarded.
fn drain_next_sse_event(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let (pos, delim_len) = find_sse_event_boundary(buffer)?;
    let event = buffer[..pos].to_vec();
    buffer.drain(..pos + delim_len);
    Some(event)
}

/// Join the frame's `data:` lines with `\n`, dropping one leading space per
/// line. Other fields (`event:`, `id:`, comments) are ignored. `None` when the
/// frame carries no data line.
fn extract_sse_data(event: &str) -> Option<String> {
    let mut data = String::new();
    let mut found = false;

    for line in event.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if let Some(mut rest) = line.strip_prefix("data:") {
            if let Some(stripped) = rest.strip_prefix(' ') {
                rest = stripped;
            }

            if found {
                data.push('\n');
            }
            data.push_str(rest);
            found = true;
        }
    }

    if found { Some(data) } else { None }
}
