//! Restartable request parse progress.
//!
//! [`ParseProgress`] tracks how far a request has been parsed out of an
//! externally owned accumulation buffer. The connection server appends raw
//! bytes to that buffer as they arrive and calls [`pump`](ParseProgress::pump)
//! after every append; progress survives any number of partial reads because
//! all state lives in offsets, never in borrowed positions.
//!
//! The blank-line scan resumes from a cursor that only ever moves forward.
//! The cursor trails the buffer end by up to three bytes so an end-of-headers
//! marker split across two reads is still found.

use crate::parser::{self, ParseError, ParseLimits};
use crate::request::Request;

/// Blank-line (end of headers) scan state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlankLine {
    /// Not yet located; scan resumes at this buffer offset.
    Scanned(usize),
    /// The end-of-headers marker has been located.
    Found,
}

/// What the parse needs next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpState {
    /// More bytes are required. The payload is the exact byte count still
    /// missing from the body, or zero when the amount is unknown (headers
    /// still incomplete).
    NeedMore(usize),
    /// A complete request has been parsed and can be taken.
    Complete,
}

/// Incremental parse state over an external accumulation buffer.
#[derive(Debug)]
pub struct ParseProgress {
    limits: ParseLimits,
    request: Option<Request>,
    blank_line: BlankLine,
    top_part_offset: usize,
    content_length: usize,
    body_done: bool,
}

impl Default for ParseProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ParseProgress {
    /// Fresh state with default size limits.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(ParseLimits::default())
    }

    /// Fresh state with explicit size limits.
    #[must_use]
    pub fn with_limits(limits: ParseLimits) -> Self {
        Self {
            limits,
            request: None,
            blank_line: BlankLine::Scanned(0),
            top_part_offset: 0,
            content_length: 0,
            body_done: false,
        }
    }

    /// Body length announced by the parsed headers (0 before the top part
    /// is parsed, or when absent).
    #[must_use]
    pub fn content_length(&self) -> usize {
        self.content_length
    }

    /// Offset of the first body byte in the buffer (0 until the top part
    /// is parsed).
    #[must_use]
    pub fn top_part_offset(&self) -> usize {
        self.top_part_offset
    }

    /// True once the top part has been parsed.
    #[must_use]
    pub fn has_request(&self) -> bool {
        self.request.is_some()
    }

    /// Locate the end-of-headers marker (CRLFCRLF or LFLF), resuming from
    /// the scan cursor. The cursor advances monotonically and never re-tests
    /// a position where a full marker comparison already completed.
    pub fn found_blank_line(&mut self, buf: &[u8]) -> bool {
        let start = match self.blank_line {
            BlankLine::Found => return true,
            BlankLine::Scanned(offset) => offset,
        };

        let mut p = start;
        while p < buf.len() {
            if p + 3 < buf.len()
                && buf[p] == b'\r'
                && buf[p + 1] == b'\n'
                && buf[p + 2] == b'\r'
                && buf[p + 3] == b'\n'
            {
                self.blank_line = BlankLine::Found;
                return true;
            }
            if p + 1 < buf.len() && buf[p] == b'\n' && buf[p + 1] == b'\n' {
                self.blank_line = BlankLine::Found;
                return true;
            }
            p += 1;
        }

        // keep a 3-byte tail so a marker straddling this read is still seen
        self.blank_line = BlankLine::Scanned(buf.len().saturating_sub(3).max(start));
        false
    }

    /// Whether the top part is ready to be parsed: nothing parsed yet, bytes
    /// buffered, and the blank line located.
    pub fn should_parse_top(&mut self, buf: &[u8]) -> bool {
        self.request.is_none() && !buf.is_empty() && self.found_blank_line(buf)
    }

    /// Whether the request still needs bytes: a known body not yet complete,
    /// or headers without an end-of-headers marker.
    pub fn should_read_more(&mut self, buf: &[u8]) -> bool {
        if self.content_length > 0 {
            let available = buf.len().saturating_sub(self.top_part_offset);
            return available < self.content_length;
        }
        !self.found_blank_line(buf)
    }

    /// Exact number of body bytes still missing; zero means "whatever is
    /// available" (amount unknown).
    #[must_use]
    pub fn bytes_to_read(&self, buf: &[u8]) -> usize {
        if self.content_length == 0 {
            return 0;
        }
        let available = buf.len().saturating_sub(self.top_part_offset);
        self.content_length.saturating_sub(available)
    }

    /// Advance the parse as far as the buffered bytes allow.
    ///
    /// # Errors
    ///
    /// Propagates top-part parse failures; the caller is expected to fail
    /// the request (empty parse, 400 downstream).
    pub fn pump(&mut self, buf: &[u8]) -> Result<PumpState, ParseError> {
        if self.should_parse_top(buf) {
            let (request, consumed) = parser::parse_top_part_with_limits(buf, &self.limits)?;
            self.content_length = request.content_length();
            self.top_part_offset = consumed;
            self.request = Some(request);
        }

        if self.request.is_none() {
            self.check_head_limits(buf)?;
            return Ok(PumpState::NeedMore(0));
        }

        if self.content_length > 0 {
            let available = buf.len().saturating_sub(self.top_part_offset);
            if available < self.content_length {
                return Ok(PumpState::NeedMore(self.content_length - available));
            }
            if !self.body_done {
                self.parse_bottom(buf);
            }
        }

        Ok(PumpState::Complete)
    }

    /// Enforce head size limits while the blank line is still missing: a
    /// request line with no terminator inside the line limit, or a header
    /// block outgrowing its cap, fails the request instead of buffering on.
    fn check_head_limits(&self, buf: &[u8]) -> Result<(), ParseError> {
        if buf.len() > self.limits.max_request_line_len
            && !buf[..self.limits.max_request_line_len]
                .iter()
                .any(|&b| b == b'\r' || b == b'\n')
        {
            return Err(ParseError::RequestLineTooLong);
        }
        if buf.len() > self.limits.max_headers_size {
            return Err(ParseError::HeadersTooLarge);
        }
        Ok(())
    }

    /// Decode the body bytes into the request view.
    fn parse_bottom(&mut self, buf: &[u8]) {
        let request = match self.request.as_mut() {
            Some(request) => request,
            None => return,
        };
        let end = (self.top_part_offset + self.content_length).min(buf.len());
        let raw = &buf[self.top_part_offset..end];
        let content_type = request.headers.get("content-type").map(str::to_string);
        let transport = parser::decode_body(raw, content_type.as_deref());
        request.body = transport.body;
        request.is_base64_encoded = transport.is_base64_encoded;
        request.multipart_boundary = transport.multipart_boundary;
        self.body_done = true;
    }

    /// Total bytes of the buffer consumed by the parsed request (head plus
    /// body), valid once `pump` returned `Complete`.
    #[must_use]
    pub fn consumed(&self) -> usize {
        self.top_part_offset + self.content_length
    }

    /// Discard any parsed request, leaving an empty parse. Downstream turns
    /// an empty parse into a 400.
    pub fn fail(&mut self) {
        self.request = None;
    }

    /// Take the completed request, leaving the progress empty.
    pub fn take_request(&mut self) -> Option<Request> {
        self.request.take()
    }

    /// Reset for the next request on a recycled connection. Limits are
    /// kept.
    pub fn reset(&mut self) {
        *self = Self::with_limits(self.limits);
    }
}
