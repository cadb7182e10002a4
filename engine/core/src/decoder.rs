//! Frame Decoder
//!
//! Reassembles newline-delimited event-stream lines from arbitrarily split
//! chunks and yields a [`Frame`] for every complete `data:` line.
//!
//! # Wire Format
//!
//! ```text
//! data: {"type":"thought","content":"..."}\n
//! \n
//! data: [DONE]\n
//! ```
//!
//! Buffering is byte-based, so a chunk boundary may fall anywhere: inside the
//! prefix, inside the JSON, or between the bytes of one UTF-8 code point. A
//! line is only decoded once its terminating newline has arrived.
//!
//! Lines that do not start with `data:` (blank separators, `event:`, `id:`,
//! `:` comments) are dropped without a diagnostic.

use crate::error::Diagnostic;

/// Prefix marking a significant line
pub const DATA_PREFIX: &[u8] = b"data:";

/// Literal payload that terminates the stream
pub const DONE_SENTINEL: &str = "[DONE]";

/// Default upper bound for a single line (1 MiB)
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

/// One decoded `data:` line
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// The `[DONE]` sentinel
    Done,
    /// Any other payload, still undecoded JSON text
    Data(String),
}

/// Tail of the stream not yet terminated by a newline
#[derive(Debug, Default)]
struct LineBuffer {
    bytes: Vec<u8>,
    /// Set once the current line went past the size limit; the rest of the
    /// line is skipped until the next newline
    overflowed: bool,
}

/// Counters for one decoder
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DecoderStats {
    /// Bytes pushed so far
    pub bytes_received: u64,
    /// Complete lines seen (data or not)
    pub lines_seen: u64,
    /// Frames produced
    pub frames_emitted: u64,
}

/// Incremental line decoder for a single session
///
/// A decoder is never shared between sessions; create a fresh one per stream.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: LineBuffer,
    max_line_bytes: usize,
    finished: bool,
    stats: DecoderStats,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Create a decoder with the default line limit
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_line_bytes(DEFAULT_MAX_LINE_BYTES)
    }

    /// Create a decoder with a custom line limit
    #[must_use]
    pub fn with_max_line_bytes(max_line_bytes: usize) -> Self {
        Self {
            buffer: LineBuffer::default(),
            max_line_bytes: max_line_bytes.max(1),
            finished: false,
            stats: DecoderStats::default(),
        }
    }

    /// Decoder counters
    #[must_use]
    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    /// Bytes currently held for an unterminated line
    #[must_use]
    pub fn pending_bytes(&self) -> usize {
        self.buffer.bytes.len()
    }

    /// Feed one chunk and drain every line it completes
    ///
    /// Items come out in stream order. An `Err` is a non-fatal diagnostic for
    /// a line that could not be represented as a frame.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<Frame, Diagnostic>> {
        if self.finished {
            tracing::warn!(bytes = chunk.len(), "Chunk pushed after decoder finished");
            return Vec::new();
        }

        self.stats.bytes_received += chunk.len() as u64;
        let mut out = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|b| *b == b'\n') {
            self.append(&rest[..pos]);
            if let Some(item) = self.take_line() {
                out.push(item);
            }
            rest = &rest[pos + 1..];
        }
        self.append(rest);

        out
    }

    /// Flush a final line that was never newline-terminated
    ///
    /// Call once when the transport reports end of stream. The decoder accepts
    /// no more input afterwards.
    pub fn finish(&mut self) -> Option<Result<Frame, Diagnostic>> {
        if self.finished {
            return None;
        }
        self.finished = true;

        if self.buffer.bytes.is_empty() && !self.buffer.overflowed {
            return None;
        }
        self.take_line()
    }

    fn append(&mut self, bytes: &[u8]) {
        if self.buffer.overflowed {
            return;
        }
        if self.buffer.bytes.len() + bytes.len() > self.max_line_bytes {
            self.buffer.overflowed = true;
            self.buffer.bytes = Vec::new();
            return;
        }
        self.buffer.bytes.extend_from_slice(bytes);
    }

    fn take_line(&mut self) -> Option<Result<Frame, Diagnostic>> {
        self.stats.lines_seen += 1;

        if std::mem::take(&mut self.buffer.overflowed) {
            return Some(Err(Diagnostic::frame_parse(
                format!("line exceeds {} bytes", self.max_line_bytes),
                "",
            )));
        }

        let line = std::mem::take(&mut self.buffer.bytes);
        let frame = match parse_line(&line)? {
            Ok(frame) => frame,
            Err(diagnostic) => return Some(Err(diagnostic)),
        };
        self.stats.frames_emitted += 1;
        tracing::trace!(frame = ?frame, "Decoded frame");
        Some(Ok(frame))
    }
}

/// Turn one complete line into a frame, if it is a non-empty data line
///
/// A data line that is not valid UTF-8 yields a `frame_parse` diagnostic.
fn parse_line(line: &[u8]) -> Option<Result<Frame, Diagnostic>> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let rest = line.strip_prefix(DATA_PREFIX)?;
    let rest = rest.strip_prefix(b" ").unwrap_or(rest);

    let text = match std::str::from_utf8(rest) {
        Ok(text) => text,
        Err(e) => {
            return Some(Err(Diagnostic::frame_parse(
                format!("invalid UTF-8 at byte {}", e.valid_up_to()),
                &String::from_utf8_lossy(rest),
            )));
        }
    };
    let payload = text.trim();
    if payload.is_empty() {
        return None;
    }
    if payload == DONE_SENTINEL {
        return Some(Ok(Frame::Done));
    }
    Some(Ok(Frame::Data(payload.to_string())))
}
