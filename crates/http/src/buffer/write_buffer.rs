use bytes::{Buf, BytesMut};
use std::io::{self, ErrorKind, Write};
use tracing::trace;

/// Default flush threshold of a [`WriteBuffer`].
pub const DEFAULT_WRITE_BUFFER_SIZE: usize = 1024;

/// Outgoing byte accumulator with a flush threshold.
///
/// Bytes are fed in segments no larger than the free room left under `capacity`; whenever the
/// buffer becomes full it is flushed into the sink. Flushing writes as much as the sink accepts:
/// a sink returning [`ErrorKind::WouldBlock`] stops the flush and the unwritten tail stays queued
/// for the next attempt, so the buffer may temporarily hold more than `capacity` bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteBuffer {
    contents: BytesMut,
    capacity: usize,
}

impl WriteBuffer {
    /// Creates a buffer flushing every `capacity` bytes. A zero capacity is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { contents: BytesMut::with_capacity(capacity), capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Queues `data`, flushing into `sink` each time the buffer fills up.
    ///
    /// # Errors
    ///
    /// Returns any error of `sink` other than [`ErrorKind::WouldBlock`] and
    /// [`ErrorKind::Interrupted`].
    pub fn feed<W: Write + ?Sized>(&mut self, mut data: &[u8], sink: &mut W) -> io::Result<()> {
        while !data.is_empty() {
            let room = self.capacity.saturating_sub(self.contents.len());
            if room == 0 {
                // sink is applying backpressure, queue the rest as is
                self.contents.extend_from_slice(data);
                return Ok(());
            }

            let (segment, rest) = data.split_at(room.min(data.len()));
            self.contents.extend_from_slice(segment);
            data = rest;

            if self.contents.len() >= self.capacity {
                self.flush(sink)?;
            }
        }
        Ok(())
    }

    /// Writes the queued bytes into `sink` until it is empty or the sink would block.
    ///
    /// # Returns
    ///
    /// The number of bytes accepted by the sink.
    ///
    /// # Errors
    ///
    /// Returns any error of `sink` other than [`ErrorKind::WouldBlock`] and
    /// [`ErrorKind::Interrupted`], and [`ErrorKind::WriteZero`] when the sink stops accepting
    /// bytes without blocking.
    pub fn flush<W: Write + ?Sized>(&mut self, sink: &mut W) -> io::Result<usize> {
        let mut written = 0;
        while !self.contents.is_empty() {
            match sink.write(&self.contents) {
                Ok(0) => return Err(ErrorKind::WriteZero.into()),
                Ok(n) => {
                    self.contents.advance(n);
                    written += n;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    trace!(pending = self.contents.len(), "sink would block");
                    break;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(written)
    }

    pub fn contents(&self) -> &[u8] {
        &self.contents
    }

    pub fn len(&self) -> usize {
        self.contents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }

    /// Drops queued bytes without writing them.
    pub fn clear(&mut self) {
        self.contents.clear();
    }
}

impl Default for WriteBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_WRITE_BUFFER_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Sink recording each write call, accepting at most `limit` bytes in total.
    struct LimitedSink {
        writes: Vec<Vec<u8>>,
        limit: usize,
    }

    impl LimitedSink {
        fn new(limit: usize) -> Self {
            Self { writes: vec![], limit }
        }

        fn accepted(&self) -> Vec<u8> {
            self.writes.concat()
        }
    }

    impl Write for LimitedSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let accepted: usize = self.writes.iter().map(Vec::len).sum();
            let room = self.limit - accepted;
            if room == 0 {
                return Err(ErrorKind::WouldBlock.into());
            }
            let n = room.min(buf.len());
            self.writes.push(buf[..n].to_vec());
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_feed_below_capacity_does_not_flush() {
        let mut buffer = WriteBuffer::new(8);
        let mut sink = Vec::new();

        buffer.feed(b"abc", &mut sink).unwrap();

        assert!(sink.is_empty());
        assert_eq!(buffer.contents(), b"abc");
    }

    #[test]
    fn test_feed_flushes_at_capacity() {
        let mut buffer = WriteBuffer::new(4);
        let mut sink = LimitedSink::new(usize::MAX);

        buffer.feed(b"0123456789", &mut sink).unwrap();

        assert_eq!(sink.writes, vec![b"0123".to_vec(), b"4567".to_vec()]);
        assert_eq!(buffer.contents(), b"89");

        buffer.flush(&mut sink).unwrap();
        assert_eq!(sink.accepted(), b"0123456789");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_would_block_keeps_tail() {
        let mut buffer = WriteBuffer::new(4);
        let mut sink = LimitedSink::new(6);

        buffer.feed(b"0123456789", &mut sink).unwrap();
        buffer.flush(&mut sink).unwrap();

        assert_eq!(sink.accepted(), b"012345");
        assert_eq!(buffer.contents(), b"6789");

        sink.limit = usize::MAX;
        assert_eq!(buffer.flush(&mut sink).unwrap(), 4);
        assert_eq!(sink.accepted(), b"0123456789");
    }

    #[test]
    fn test_write_zero_is_an_error() {
        struct Closed;

        impl Write for Closed {
            fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
                Ok(0)
            }

            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let mut buffer = WriteBuffer::new(16);
        buffer.feed(b"data", &mut Closed).unwrap();

        let err = buffer.flush(&mut Closed).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WriteZero);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let buffer = WriteBuffer::new(0);
        assert_eq!(buffer.capacity(), 1);
    }
}
