//! HTTP request model.
//!
//! A [`Request`] is filled in piece by piece by the
//! [`RequestDecoder`](crate::codec::RequestDecoder) and handed over by value once complete.
//! The method, path and version are kept as the raw tokens the client sent so a request can be
//! serialized back exactly.

use crate::protocol::{CRLF, Headers};
use bytes::{BufMut, Bytes, BytesMut};
use http::{Version, header};

/// An HTTP/1.x request as received from a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    method: String,
    path: String,
    version: String,
    headers: Headers,
    body: BytesMut,
}

impl Request {
    pub fn new(method: impl Into<String>, path: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            version: version.into(),
            headers: Headers::new(),
            body: BytesMut::new(),
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn set_method(&mut self, method: impl Into<String>) {
        self.method = method.into();
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn set_path(&mut self, path: impl Into<String>) {
        self.path = path.into();
    }

    /// The version token exactly as sent, e.g. `HTTP/1.1`.
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn set_version(&mut self, version: impl Into<String>) {
        self.version = version.into();
    }

    /// Parses the version token into an [`http::Version`], `None` when it is not recognized.
    pub fn http_version(&self) -> Option<Version> {
        match self.version.as_str() {
            "HTTP/0.9" => Some(Version::HTTP_09),
            "HTTP/1.0" => Some(Version::HTTP_10),
            "HTTP/1.1" => Some(Version::HTTP_11),
            "HTTP/2" | "HTTP/2.0" => Some(Version::HTTP_2),
            "HTTP/3" | "HTTP/3.0" => Some(Version::HTTP_3),
            _ => None,
        }
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn set_body(&mut self, body: &[u8]) {
        self.body.clear();
        self.body.extend_from_slice(body);
    }

    pub fn append_body(&mut self, data: &[u8]) {
        self.body.extend_from_slice(data);
    }

    pub fn clear_body(&mut self) {
        self.body.clear();
    }

    /// Declared body length. A missing or non-numeric `Content-Length` counts as zero.
    pub fn content_length(&self) -> usize {
        self.headers
            .get(header::CONTENT_LENGTH.as_str())
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(0)
    }

    /// Whether the client asked for `Connection: keep-alive`.
    pub fn wants_keep_alive(&self) -> bool {
        self.headers
            .get(header::CONNECTION.as_str())
            .is_some_and(|value| value.trim().eq_ignore_ascii_case("keep-alive"))
    }

    /// Serializes the request back to its wire form.
    pub fn serialize(&self) -> Bytes {
        let mut dst = BytesMut::with_capacity(
            self.method.len() + self.path.len() + self.version.len() + 64 + self.body.len(),
        );
        dst.put_slice(self.method.as_bytes());
        dst.put_u8(b' ');
        dst.put_slice(self.path.as_bytes());
        dst.put_u8(b' ');
        dst.put_slice(self.version.as_bytes());
        dst.put_slice(CRLF);
        self.headers.write_to(&mut dst);
        dst.put_slice(CRLF);
        dst.put_slice(&self.body);
        dst.freeze()
    }
}

impl Default for Request {
    fn default() -> Self {
        Self::new("GET", "/", "HTTP/1.0")
    }
}
