//! HTTP message model
//!
//! This module provides the owned, mutable message types the server works with.
//! Requests are built up incrementally by the decoder while bytes arrive, responses are
//! assembled by the transaction handler and serialized right before they hit the wire.
//!
//! # Architecture
//!
//! - **Headers** ([`Headers`]): order-preserving header list with ASCII case-insensitive
//!   lookups where setting a key replaces any differently-cased copy
//! - **Requests** ([`Request`]): method, path, version token, headers and body bytes
//! - **Responses** ([`Response`]): status, message, headers and body, plus the header
//!   injection performed by [`Response::prepare`]
//! - **Errors** ([`error`]): [`ParseError`] for malformed input and [`ResponseError`] for
//!   invalid response construction

pub mod error;
mod headers;
mod request;
mod response;

pub use error::{ParseError, ResponseError};
pub use headers::Headers;
pub use request::Request;
pub use response::{Response, SERVER_NAME};

/// Line terminator of the HTTP/1.x wire format.
pub const CRLF: &[u8] = b"\r\n";
