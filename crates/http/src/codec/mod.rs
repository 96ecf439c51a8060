//! Wire codecs for HTTP/1.x messages
//!
//! # Components
//!
//! - [`RequestDecoder`]: incremental request parser. It is fed the *whole* accumulated read
//!   buffer on every call and resumes from the byte offset it reached last time, so arbitrary
//!   fragmentation of the input yields the same request.
//! - [`ChunkedEncoder`]: serializes a response using `Transfer-Encoding: chunked`.

mod chunked_encoder;
mod request_decoder;

pub use chunked_encoder::{ChunkedEncoder, DEFAULT_CHUNK_SIZE};
pub use request_decoder::{DecodeState, Decoded, RequestDecoder};
