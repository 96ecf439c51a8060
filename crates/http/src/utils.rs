//! Utility macros and helpers shared by the codec and protocol modules.

use bytes::{BufMut, BytesMut};
use std::io;

/// A macro for early returns with an error if a condition is not met.
///
/// This is similar to the `assert!` macro, but returns an error instead of panicking.
///
/// # Example
///
/// ```ignore
/// ensure!(parts.len() == 3, ParseError::malformed_request_line(line));
/// ```
macro_rules! ensure {
    ($predicate:expr, $error:expr) => {
        if !$predicate {
            return Err($error);
        }
    };
}

pub(crate) use ensure;

/// `io::Write` adapter that appends to a [`BytesMut`], used with `write!` for
/// numeric framing such as chunk sizes and status codes.
pub(crate) struct Writer<'a>(pub &'a mut BytesMut);

impl io::Write for Writer<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.put_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Position of the first `\r\n` in `data`.
pub(crate) fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|window| window == b"\r\n")
}
