//! Sockets of the server
//!
//! - [`Listener`]: the bound listening socket. It accepts until the backlog is drained and hands
//!   each accepted socket over as a [`Connection`].
//! - [`Connection`]: one accepted socket with a read buffer, a write buffer and the observers
//!   notified whenever bytes arrive.
//! - [`Transport`]: the part of a connection the transaction layer relies on. Tests drive
//!   transactions through an in-memory implementation.

mod error;
mod listener;
mod tcp_connection;

pub use error::ListenerError;
pub use listener::Listener;
pub use tcp_connection::{Connection, ConnectionOptions, ConnectionState};

use fly_http::buffer::{ReadBuffer, WriteBuffer};
use std::cell::RefMut;
use std::net::SocketAddr;
use std::rc::Rc;

/// Observer notified after new bytes were appended to a connection's read buffer.
pub type Subscriber = Rc<dyn Fn()>;

/// Byte stream between the server and one client.
pub trait Transport {
    /// Queues `data` for the peer, pushing it out immediately when `flush` is set.
    /// Ignored once the transport is no longer writable.
    fn write(&self, data: &[u8], flush: bool);

    fn read_buffer(&self) -> RefMut<'_, ReadBuffer>;

    fn write_buffer(&self) -> RefMut<'_, WriteBuffer>;

    /// Registers an observer of incoming data. Observers run in registration order.
    fn subscribe(&self, subscriber: Subscriber);

    /// Closes the transport. Returns `false` when it was already closed.
    fn disconnect(&self) -> bool;

    fn is_readable(&self) -> bool;

    fn is_writable(&self) -> bool;

    fn remote_address(&self) -> Option<SocketAddr>;
}
