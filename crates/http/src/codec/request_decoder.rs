//! Incremental HTTP request decoder
//!
//! The decoder is a small state machine driven by the connection's accumulated read buffer:
//!
//! ```text
//! Idle -> RequestLine -> Headers -> Body -> Idle
//! ```
//!
//! Each call to [`RequestDecoder::decode`] receives the full buffer and continues from the byte
//! offset reached by the previous call. Header lines are only consumed once their terminating
//! CRLF has arrived, which makes the result independent of how the input was fragmented.
//!
//! Once the header block is complete the decoder consumes the buffer: the caller clears it and
//! later calls only carry body bytes. Pipelined requests are not supported: bytes following a
//! request that expects no (more) body are dropped, while a delivery overrunning an outstanding
//! `Content-Length` is a framing error.
//!
//! # Example
//!
//! ```
//! use fly_http::codec::{Decoded, RequestDecoder};
//!
//! let mut decoder = RequestDecoder::new();
//! let mut buffer = b"POST /upload HTTP/1.1\r\nContent-Length: 5\r\n".to_vec();
//! assert!(matches!(decoder.decode(&buffer), Ok(Decoded::Incomplete)));
//!
//! buffer.extend_from_slice(b"\r\nhel");
//! assert!(matches!(decoder.decode(&buffer), Ok(Decoded::Consumed)));
//!
//! let Ok(Decoded::Complete(request)) = decoder.decode(b"lo") else { panic!() };
//! assert_eq!(request.body(), b"hello");
//! ```

use crate::ensure;
use crate::protocol::{ParseError, Request};
use crate::utils::find_crlf;
use http::header;
use std::mem;
use tracing::trace;

/// Where the decoder is within the current request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DecodeState {
    /// No request in progress; the next call starts a new one.
    #[default]
    Idle,
    RequestLine,
    Headers,
    Body,
}

/// Outcome of a single [`RequestDecoder::decode`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// More bytes are needed and the buffer must be kept as is.
    Incomplete,

    /// More body bytes are needed; everything received so far has been absorbed and the
    /// buffer must be cleared.
    Consumed,

    /// The header block carried an `Expect` header. The request is handed out without its body
    /// so the caller can answer the expectation. The decoder stays in [`DecodeState::Body`]
    /// with `Expect` removed from the request it keeps building.
    Expectation(Request),

    /// A full request. The decoder is idle again.
    Complete(Request),
}

impl Decoded {
    /// Whether the caller must clear the buffer it passed in.
    pub fn consumes_buffer(&self) -> bool {
        !matches!(self, Self::Incomplete)
    }
}

/// Incremental request parser. See the [module documentation](self) for the protocol.
#[derive(Debug, Default)]
pub struct RequestDecoder {
    state: DecodeState,
    offset: usize,
    request: Request,
}

impl RequestDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> DecodeState {
        self.state
    }

    /// Whether a request is in progress.
    pub fn is_parsing(&self) -> bool {
        self.state != DecodeState::Idle
    }

    /// Bytes of the current buffer already consumed.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The request being built.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Whether the body of the in-progress request has fully arrived.
    pub fn is_body_complete(&self) -> bool {
        self.state == DecodeState::Body && self.request.body().len() >= self.request.content_length()
    }

    /// Abandons the in-progress request.
    pub fn reset(&mut self) {
        self.state = DecodeState::Idle;
        self.offset = 0;
    }

    /// Continues decoding `data`, the whole buffer accumulated since it was last cleared.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] for a request line without exactly three space-separated tokens,
    /// a header line without `": "`, or more body bytes than `Content-Length` allows. The
    /// decoder is reset to [`DecodeState::Idle`] afterwards.
    pub fn decode(&mut self, data: &[u8]) -> Result<Decoded, ParseError> {
        let result = self.decode_inner(data);
        if result.is_err() {
            self.reset();
        }
        result
    }

    fn decode_inner(&mut self, data: &[u8]) -> Result<Decoded, ParseError> {
        if self.state == DecodeState::Idle {
            self.state = DecodeState::RequestLine;
            self.offset = 0;
            self.request = Request::default();
        }

        while matches!(self.state, DecodeState::RequestLine | DecodeState::Headers) {
            let pending = data.get(self.offset..).unwrap_or_default();
            let Some(eol) = find_crlf(pending) else {
                return Ok(Decoded::Incomplete);
            };
            let line = &pending[..eol];

            match self.state {
                DecodeState::RequestLine => self.parse_request_line(line)?,
                DecodeState::Headers if line.is_empty() => self.state = DecodeState::Body,
                _ => self.parse_header_line(line)?,
            }
            self.offset += eol + 2;
        }

        let pending = data.get(self.offset..).unwrap_or_default();
        self.offset = 0;

        if self.request.headers().contains(header::EXPECT.as_str()) {
            self.absorb_body(pending)?;
            let request = self.request.clone();
            self.request.headers_mut().remove(header::EXPECT.as_str());
            trace!(path = request.path(), "request carries an expectation");
            return Ok(Decoded::Expectation(request));
        }

        self.absorb_body(pending)?;
        if self.request.body().len() < self.request.content_length() {
            return Ok(Decoded::Consumed);
        }

        self.state = DecodeState::Idle;
        Ok(Decoded::Complete(mem::take(&mut self.request)))
    }

    fn absorb_body(&mut self, pending: &[u8]) -> Result<(), ParseError> {
        let remaining = self.request.content_length().saturating_sub(self.request.body().len());
        if remaining == 0 {
            if !pending.is_empty() {
                trace!(dropped = pending.len(), "dropping bytes past the request");
            }
            return Ok(());
        }

        ensure!(pending.len() <= remaining, ParseError::content_length_mismatch(remaining, pending.len()));
        self.request.append_body(pending);
        Ok(())
    }

    fn parse_request_line(&mut self, line: &[u8]) -> Result<(), ParseError> {
        let Ok(text) = std::str::from_utf8(line) else {
            return Err(ParseError::malformed_request_line(line));
        };
        let parts: Vec<&str> = text.split(' ').collect();
        let [method, path, version] = parts[..] else {
            return Err(ParseError::malformed_request_line(line));
        };

        self.request.set_method(method);
        self.request.set_path(path);
        self.request.set_version(version);
        self.state = DecodeState::Headers;
        Ok(())
    }

    fn parse_header_line(&mut self, line: &[u8]) -> Result<(), ParseError> {
        let Some((name, value)) = std::str::from_utf8(line).ok().and_then(|text| text.split_once(": ")) else {
            return Err(ParseError::malformed_header(line));
        };

        self.request.headers_mut().set(name, value);
        Ok(())
    }
}
