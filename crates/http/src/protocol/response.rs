//! HTTP response model and serialization.
//!
//! Responses always go out as `HTTP/1.1`. The status must be one [`http`] knows a canonical
//! reason phrase for; the message defaults to that phrase unless overridden.
//!
//! [`Response::prepare`] injects the ambient headers (`Date`, `Connection`, `Server`,
//! `Content-Type`, `Content-Length`) and must run right before serialization, after any body
//! transformation such as compression.

use crate::ensure;
use crate::protocol::{CRLF, Headers, ResponseError};
use crate::utils::Writer;
use bytes::{BufMut, Bytes, BytesMut};
use http::{StatusCode, header};
use std::io::Write;

/// Value of the `Server` header.
pub const SERVER_NAME: &str = concat!("fly/", env!("CARGO_PKG_VERSION"));

/// Initial buffer size allocated for head serialization
const INIT_HEAD_SIZE: usize = 256;

/// An HTTP response under construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    status: StatusCode,
    message: String,
    headers: Headers,
    body: Bytes,
}

impl Response {
    /// Creates an empty `200 OK` response.
    pub fn new() -> Self {
        Self::with_status(StatusCode::OK)
    }

    pub fn with_status(status: StatusCode) -> Self {
        Self {
            status,
            message: status.canonical_reason().unwrap_or_default().to_owned(),
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Builds the default error page for `status`: body `error <code> <reason>`.
    pub fn error_page(status: StatusCode) -> Self {
        let mut response = Self::with_status(status);
        response.body = Bytes::from(format!("error {} {}", status.as_u16(), response.message));
        response
    }

    /// Like [`error_page`](Response::error_page) for a numeric code.
    ///
    /// # Errors
    ///
    /// Returns [`ResponseError::InvalidStatus`] for an unrecognized code and
    /// [`ResponseError::NotAnError`] for codes below 400.
    pub fn error(code: u16) -> Result<Self, ResponseError> {
        let status = recognized_status(code)?;
        ensure!(status.is_client_error() || status.is_server_error(), ResponseError::not_an_error(code));
        Ok(Self::error_page(status))
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn status_message(&self) -> &str {
        &self.message
    }

    /// Sets the status code and message; `None` selects the canonical reason phrase.
    ///
    /// # Errors
    ///
    /// Returns [`ResponseError::InvalidStatus`] when `code` is not a recognized HTTP status.
    pub fn set_status(&mut self, code: u16, message: Option<&str>) -> Result<(), ResponseError> {
        let status = recognized_status(code)?;
        self.status = status;
        self.message = message.or(status.canonical_reason()).unwrap_or_default().to_owned();
        Ok(())
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

    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.body = body.into();
    }

    /// Whether the status permits a message body (not 1xx, 204 or 304).
    pub fn can_have_body(&self) -> bool {
        !(self.status.is_informational()
            || self.status == StatusCode::NO_CONTENT
            || self.status == StatusCode::NOT_MODIFIED)
    }

    /// Injects the ambient headers. `Connection` and `Content-Type` keep values set earlier.
    pub fn prepare(&mut self) {
        let mut date = faf_http_date::get_date_buff_no_key();
        faf_http_date::get_date_no_key(&mut date);
        self.headers.set("Date", String::from_utf8_lossy(&date[..]));

        if !self.headers.contains(header::CONNECTION.as_str()) {
            self.headers.set("Connection", "close");
        }
        self.headers.set("Server", SERVER_NAME);
        if !self.headers.contains(header::CONTENT_TYPE.as_str()) {
            self.headers.set("Content-Type", mime::TEXT_HTML.essence_str());
        }
        self.headers.set("Content-Length", self.body.len().to_string());
    }

    /// Serializes the status line and headers, without the terminating blank line.
    pub fn serialize_head(&self) -> BytesMut {
        let mut dst = BytesMut::with_capacity(INIT_HEAD_SIZE);
        // writing into memory cannot fail
        let _ = write!(Writer(&mut dst), "HTTP/1.1 {} {}\r\n", self.status.as_str(), self.message);
        self.headers.write_to(&mut dst);
        dst
    }

    /// Serializes the whole response. The body is only emitted when the status allows one.
    pub fn serialize(&self) -> Bytes {
        let mut dst = self.serialize_head();
        dst.put_slice(CRLF);
        if self.can_have_body() {
            dst.put_slice(&self.body);
        }
        dst.freeze()
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

fn recognized_status(code: u16) -> Result<StatusCode, ResponseError> {
    StatusCode::from_u16(code)
        .ok()
        .filter(|status| status.canonical_reason().is_some())
        .ok_or_else(|| ResponseError::invalid_status(code))
}
