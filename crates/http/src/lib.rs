//! HTTP/1.x building blocks for the fly server
//!
//! This crate holds everything about HTTP that does not touch a socket: the message model,
//! the incremental request decoder, the chunked transfer encoder, content compression and the
//! byte buffers that sit between a connection and its peer. The event loop, connections and the
//! transaction state machine live in `fly-server` and drive these types.
//!
//! # Features
//!
//! - Case-insensitive, order-preserving header map
//! - Incremental request decoding that tolerates arbitrary fragmentation
//! - `Expect: 100-continue` detection
//! - Chunked transfer encoding with configurable chunk size
//! - gzip and deflate response compression negotiated from `Accept-Encoding`
//! - Write buffering that copes with non-blocking sinks
//!
//! # Example
//!
//! ```
//! use fly_http::codec::{Decoded, RequestDecoder};
//! use fly_http::protocol::Response;
//! use http::StatusCode;
//!
//! let mut decoder = RequestDecoder::new();
//! let decoded = decoder.decode(b"GET /index.html HTTP/1.1\r\nHost: localhost\r\n\r\n").unwrap();
//!
//! let Decoded::Complete(request) = decoded else { panic!("request should be complete") };
//! assert_eq!(request.path(), "/index.html");
//!
//! let mut response = Response::error_page(StatusCode::NOT_FOUND);
//! response.prepare();
//! assert!(response.serialize().starts_with(b"HTTP/1.1 404 Not Found\r\n"));
//! ```

pub mod buffer;
pub mod codec;
pub mod compression;
pub mod protocol;

mod utils;
pub(crate) use utils::ensure;
