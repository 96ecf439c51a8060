//! Response compression
//!
//! The [`CompressionNegotiator`] holds the methods enabled by configuration, in preference
//! order (gzip, then deflate), and picks the first one the client lists in `Accept-Encoding`.
//! The chosen [`Compressor`] rewrites the response body and sets `Content-Encoding`; it must
//! run before [`Response::prepare`](crate::protocol::Response::prepare) computes
//! `Content-Length` and before chunked framing.
//!
//! `deflate` is produced in the zlib container (RFC 1950), which is what HTTP clients expect
//! for that token.

mod compressor;
mod negotiator;

pub use compressor::Compressor;
pub use negotiator::{CompressionConfig, CompressionNegotiator};
