//! Byte buffers sitting between a connection and its peer
//!
//! - [`ReadBuffer`] accumulates everything received on a connection until the consumer
//!   explicitly clears it.
//! - [`WriteBuffer`] accumulates outgoing bytes and pushes them into an [`std::io::Write`]
//!   sink once it reaches its capacity or when asked to flush. A sink that reports
//!   [`std::io::ErrorKind::WouldBlock`] simply leaves the unwritten tail queued.

mod read_buffer;
mod write_buffer;

pub use read_buffer::ReadBuffer;
pub use write_buffer::{DEFAULT_WRITE_BUFFER_SIZE, WriteBuffer};
