use crate::protocol::Response;
use bytes::{BufMut, Bytes, BytesMut};
use flate2::Compression;
use flate2::write::{GzEncoder, ZlibEncoder};
use std::io::{self, Write};
use tracing::trace;

/// Highest level understood by flate2
const MAX_LEVEL: u32 = 9;

/// A content coding the server can apply to a response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compressor {
    Gzip { level: u32 },
    Deflate { level: u32 },
}

impl Compressor {
    /// The `Content-Encoding` token.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Gzip { .. } => "gzip",
            Self::Deflate { .. } => "deflate",
        }
    }

    pub fn level(&self) -> u32 {
        match *self {
            Self::Gzip { level } | Self::Deflate { level } => level,
        }
    }

    /// Compresses `data` in one go.
    ///
    /// # Errors
    ///
    /// Returns the encoder's I/O error; writing into memory does not fail in practice.
    pub fn encode(&self, data: &[u8]) -> io::Result<Bytes> {
        let level = Compression::new(self.level().min(MAX_LEVEL));
        let writer = BytesMut::with_capacity(data.len() / 2 + 64).writer();

        let output = match self {
            Self::Gzip { .. } => {
                let mut encoder = GzEncoder::new(writer, level);
                encoder.write_all(data)?;
                encoder.finish()?
            }
            Self::Deflate { .. } => {
                let mut encoder = ZlibEncoder::new(writer, level);
                encoder.write_all(data)?;
                encoder.finish()?
            }
        };

        Ok(output.into_inner().freeze())
    }

    /// Replaces the body of `response` with its compressed form and sets `Content-Encoding`.
    ///
    /// # Errors
    ///
    /// See [`encode`](Compressor::encode). The response is left untouched on error.
    pub fn compress(&self, response: &mut Response) -> io::Result<()> {
        let encoded = self.encode(response.body())?;
        trace!(encoding = self.name(), from = response.body().len(), to = encoded.len(), "compressed body");

        response.set_body(encoded);
        response.headers_mut().set("Content-Encoding", self.name());
        Ok(())
    }
}
