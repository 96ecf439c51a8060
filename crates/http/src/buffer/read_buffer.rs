use bytes::BytesMut;

const INIT_READ_CAPACITY: usize = 4 * 1024;

/// Append-only accumulator for bytes received from a peer.
///
/// Observers of a connection are notified after each [`feed`](ReadBuffer::feed); they read the
/// whole [`contents`](ReadBuffer::contents) and decide when to [`clear`](ReadBuffer::clear).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadBuffer {
    contents: BytesMut,
}

impl ReadBuffer {
    pub fn new() -> Self {
        Self { contents: BytesMut::with_capacity(INIT_READ_CAPACITY) }
    }

    /// Appends `data` to the end of the buffer.
    pub fn feed(&mut self, data: &[u8]) {
        self.contents.extend_from_slice(data);
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

    pub fn clear(&mut self) {
        self.contents.clear();
    }
}
