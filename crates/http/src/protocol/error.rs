use thiserror::Error;

/// Errors raised while decoding a request from the wire.
///
/// Every variant is answered with `400 Bad Request` and the connection is closed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed request line: {line:?}")]
    MalformedRequestLine { line: String },

    #[error("malformed header line: {line:?}")]
    MalformedHeader { line: String },

    #[error("content-length mismatch: {remaining} body bytes expected, received {received}")]
    ContentLengthMismatch { remaining: usize, received: usize },
}

impl ParseError {
    pub fn malformed_request_line(line: &[u8]) -> Self {
        Self::MalformedRequestLine { line: String::from_utf8_lossy(line).into_owned() }
    }

    pub fn malformed_header(line: &[u8]) -> Self {
        Self::MalformedHeader { line: String::from_utf8_lossy(line).into_owned() }
    }

    pub fn content_length_mismatch(remaining: usize, received: usize) -> Self {
        Self::ContentLengthMismatch { remaining, received }
    }
}

/// Errors raised while constructing a response.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResponseError {
    #[error("invalid http status code: {code}")]
    InvalidStatus { code: u16 },

    #[error("status code {code} is not an error status")]
    NotAnError { code: u16 },
}

impl ResponseError {
    pub fn invalid_status(code: u16) -> Self {
        Self::InvalidStatus { code }
    }

    pub fn not_an_error(code: u16) -> Self {
        Self::NotAnError { code }
    }
}
