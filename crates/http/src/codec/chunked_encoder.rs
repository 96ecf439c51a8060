//! Chunked transfer encoding for responses.
//!
//! A response body is split into segments of at most `chunk_size` bytes, each framed as
//! `<hex length>\r\n<data>\r\n`, followed by the `0\r\n\r\n` terminator. Chunked encoding is
//! only offered to HTTP/1.1 (or later) clients and runs after compression.

use crate::protocol::{CRLF, Request, Response};
use crate::utils::Writer;
use bytes::{BufMut, BytesMut};
use http::{Version, header};
use std::io::Write;

/// Default chunk size
pub const DEFAULT_CHUNK_SIZE: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkedEncoder {
    chunk_size: usize,
}

impl ChunkedEncoder {
    /// Creates an encoder emitting chunks of at most `chunk_size` bytes (at least one).
    pub fn new(chunk_size: usize) -> Self {
        Self { chunk_size: chunk_size.max(1) }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Whether `request` was made with a protocol version that understands chunked responses.
    pub fn is_supported(request: &Request) -> bool {
        request.http_version().is_some_and(|version| version >= Version::HTTP_11)
    }

    /// Frames a single chunk. An empty `data` writes the terminating chunk.
    pub fn encode_chunk(data: &[u8], dst: &mut BytesMut) {
        dst.reserve(data.len() + 12);
        // writing into memory cannot fail
        let _ = write!(Writer(dst), "{:x}\r\n", data.len());
        dst.put_slice(data);
        dst.put_slice(CRLF);
    }

    /// Frames `body` into chunks followed by the terminator.
    pub fn encode_body(&self, body: &[u8], dst: &mut BytesMut) {
        for chunk in body.chunks(self.chunk_size) {
            Self::encode_chunk(chunk, dst);
        }
        Self::encode_chunk(&[], dst);
    }

    /// Prepares and serializes `response` with a chunked body.
    ///
    /// `Content-Length` is replaced by `Transfer-Encoding: chunked`.
    pub fn encode_response(&self, response: &mut Response) -> BytesMut {
        response.prepare();
        response.headers_mut().remove(header::CONTENT_LENGTH.as_str());
        response.headers_mut().set("Transfer-Encoding", "chunked");

        let mut dst = response.serialize_head();
        dst.put_slice(CRLF);
        self.encode_body(response.body(), &mut dst);
        dst
    }
}

impl Default for ChunkedEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}
