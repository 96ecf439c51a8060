use crate::connection::{Subscriber, Transport};
use crate::reactor::{Reactor, Timer};
use fly_http::buffer::{DEFAULT_WRITE_BUFFER_SIZE, ReadBuffer, WriteBuffer};
use mio::Token;
use mio::net::TcpStream;
use std::cell::{Cell, RefCell, RefMut};
use std::fmt;
use std::io::{self, ErrorKind, Read};
use std::net::{Shutdown, SocketAddr};
use std::rc::{Rc, Weak};
use std::time::Duration;
use tracing::{debug, trace};

/// Default number of bytes read from the socket per call
pub const DEFAULT_READ_CHUNK_SIZE: usize = 1024;

/// Default time a closing connection may spend flushing its remaining output
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionOptions {
    pub read_chunk_size: usize,
    pub write_buffer_size: usize,
    pub drain_timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            write_buffer_size: DEFAULT_WRITE_BUFFER_SIZE,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

/// Lifecycle of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    /// Disconnect was requested while output was still queued. Nothing is read or accepted for
    /// writing any more; the socket closes once the output is flushed, the peer fails, or the
    /// drain timeout expires.
    Draining,
    Closed,
}

/// A non-blocking client socket registered with the [`Reactor`].
///
/// On every readable event the socket is read in chunks until it would block; each chunk is
/// appended to the read buffer and the subscribers are notified. A zero-length read or a read
/// error disconnects. Writes go through the write buffer; output the socket does not accept
/// right away is flushed when it becomes writable again.
pub struct Connection {
    this: Weak<Connection>,
    token: Token,
    reactor: Rc<Reactor>,
    socket: RefCell<Option<TcpStream>>,
    remote_address: Option<SocketAddr>,
    options: ConnectionOptions,
    state: Cell<ConnectionState>,
    read_buffer: RefCell<ReadBuffer>,
    write_buffer: RefCell<WriteBuffer>,
    subscribers: RefCell<Vec<Subscriber>>,
    awaiting_writable: Cell<bool>,
    drain_timer: RefCell<Option<Rc<Timer>>>,
}

impl Connection {
    /// Wraps an accepted socket and starts watching it for incoming data.
    ///
    /// # Errors
    ///
    /// Returns the error raised while registering the socket with the reactor.
    pub fn open(
        reactor: &Rc<Reactor>,
        mut socket: TcpStream,
        remote_address: Option<SocketAddr>,
        options: ConnectionOptions,
    ) -> io::Result<Rc<Self>> {
        let token = reactor.next_token();
        let connection = Rc::new_cyclic(|this| Self {
            this: Weak::clone(this),
            token,
            reactor: Rc::clone(reactor),
            socket: RefCell::new(None),
            remote_address,
            options,
            state: Cell::new(ConnectionState::Open),
            read_buffer: RefCell::new(ReadBuffer::new()),
            write_buffer: RefCell::new(WriteBuffer::new(options.write_buffer_size)),
            subscribers: RefCell::new(Vec::new()),
            awaiting_writable: Cell::new(false),
            drain_timer: RefCell::new(None),
        });

        let this = Rc::downgrade(&connection);
        reactor.await_readable(
            &mut socket,
            token,
            Rc::new(move |_| {
                if let Some(connection) = this.upgrade() {
                    connection.on_readable();
                }
            }),
        )?;
        *connection.socket.borrow_mut() = Some(socket);

        trace!(token = token.0, remote = ?remote_address, "connection opened");
        Ok(connection)
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    pub fn options(&self) -> ConnectionOptions {
        self.options
    }

    fn on_readable(&self) {
        let mut chunk = vec![0; self.options.read_chunk_size.max(1)];

        while self.state.get() == ConnectionState::Open {
            let read = match self.socket.borrow_mut().as_mut() {
                Some(stream) => stream.read(&mut chunk),
                None => return,
            };

            match read {
                Ok(0) => {
                    trace!(token = self.token.0, "peer closed the connection");
                    self.disconnect();
                }
                Ok(n) => {
                    trace!(token = self.token.0, bytes = n, "received");
                    self.read_buffer.borrow_mut().feed(&chunk[..n]);
                    self.notify();
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    debug!(cause = %e, token = self.token.0, "read failed");
                    self.disconnect();
                }
            }
        }
    }

    fn on_writable(&self) {
        match self.flush_pending() {
            Err(e) => {
                debug!(cause = %e, token = self.token.0, "write failed");
                self.close();
            }
            Ok(()) if self.write_buffer.borrow().is_empty() => {
                if self.state.get() == ConnectionState::Draining {
                    self.close();
                } else {
                    self.stop_watching_writable();
                }
            }
            Ok(()) => {}
        }
    }

    fn notify(&self) {
        let subscribers = self.subscribers.borrow().clone();
        for subscriber in subscribers {
            subscriber();
        }
    }

    fn push(&self, data: &[u8], flush: bool) -> io::Result<()> {
        let mut socket = self.socket.borrow_mut();
        let Some(stream) = socket.as_mut() else {
            return Ok(());
        };

        let mut buffer = self.write_buffer.borrow_mut();
        buffer.feed(data, stream)?;
        if flush {
            buffer.flush(stream)?;
        }
        Ok(())
    }

    fn flush_pending(&self) -> io::Result<()> {
        self.push(&[], true)
    }

    fn has_backlog(&self, flush: bool) -> bool {
        let buffer = self.write_buffer.borrow();
        (flush && !buffer.is_empty()) || buffer.len() >= buffer.capacity()
    }

    fn watch_writable(&self) {
        if self.awaiting_writable.replace(true) {
            return;
        }

        let this = Weak::clone(&self.this);
        let callback = Rc::new(move |_: &Reactor| {
            if let Some(connection) = this.upgrade() {
                connection.on_writable();
            }
        });

        let registered = match self.socket.borrow_mut().as_mut() {
            Some(stream) => self.reactor.await_writable(stream, self.token, callback),
            None => Ok(()),
        };
        if let Err(e) = registered {
            debug!(cause = %e, token = self.token.0, "failed to watch for writability");
            self.close();
        }
    }

    fn stop_watching_writable(&self) {
        self.awaiting_writable.set(false);
        let cleared = match self.socket.borrow_mut().as_mut() {
            Some(stream) => self.reactor.clear_writable(stream, self.token),
            None => Ok(()),
        };
        if let Err(e) = cleared {
            trace!(cause = %e, token = self.token.0, "failed to stop watching for writability");
        }
    }

    fn start_draining(&self) {
        self.state.set(ConnectionState::Draining);
        if let Some(stream) = self.socket.borrow_mut().as_mut() {
            self.reactor.remove_stream(stream, self.token);
        }
        self.awaiting_writable.set(false);
        self.watch_writable();

        // the timer owns the connection until it is closed
        let this = self.this.upgrade();
        let timer = Timer::once(self.options.drain_timeout, move |_| {
            if let Some(connection) = &this {
                debug!(token = connection.token.0, "drain timed out");
                connection.close();
            }
        });
        self.reactor.add_timer(&timer);
        *self.drain_timer.borrow_mut() = Some(timer);

        debug!(token = self.token.0, pending = self.write_buffer.borrow().len(), "draining before close");
    }

    fn close(&self) {
        if self.state.replace(ConnectionState::Closed) == ConnectionState::Closed {
            return;
        }

        self.subscribers.borrow_mut().clear();
        self.awaiting_writable.set(false);
        self.write_buffer.borrow_mut().clear();

        let socket = self.socket.borrow_mut().take();
        if let Some(mut stream) = socket {
            self.reactor.remove_stream(&mut stream, self.token);
            if let Err(e) = stream.shutdown(Shutdown::Both) {
                trace!(cause = %e, token = self.token.0, "shutdown failed");
            }
        }

        let timer = self.drain_timer.borrow_mut().take();
        if let Some(timer) = timer {
            self.reactor.remove_timer(&timer);
        }

        debug!(token = self.token.0, "connection closed");
    }
}

impl Transport for Connection {
    fn write(&self, data: &[u8], flush: bool) {
        if !self.is_writable() {
            return;
        }

        match self.push(data, flush) {
            Ok(()) if self.has_backlog(flush) => self.watch_writable(),
            Ok(()) => {}
            Err(e) => {
                debug!(cause = %e, token = self.token.0, "write failed");
                self.close();
            }
        }
    }

    fn read_buffer(&self) -> RefMut<'_, ReadBuffer> {
        self.read_buffer.borrow_mut()
    }

    fn write_buffer(&self) -> RefMut<'_, WriteBuffer> {
        self.write_buffer.borrow_mut()
    }

    fn subscribe(&self, subscriber: Subscriber) {
        self.subscribers.borrow_mut().push(subscriber);
    }

    fn disconnect(&self) -> bool {
        if self.state.get() != ConnectionState::Open {
            return false;
        }

        self.subscribers.borrow_mut().clear();
        let flushed = self.flush_pending();
        if flushed.is_ok() && !self.write_buffer.borrow().is_empty() {
            self.start_draining();
        } else {
            self.close();
        }
        true
    }

    fn is_readable(&self) -> bool {
        self.state.get() == ConnectionState::Open && self.socket.borrow().is_some()
    }

    fn is_writable(&self) -> bool {
        self.is_readable()
    }

    fn remote_address(&self) -> Option<SocketAddr> {
        self.remote_address
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(mut stream) = self.socket.get_mut().take() {
            self.reactor.remove_stream(&mut stream, self.token);
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("token", &self.token)
            .field("remote_address", &self.remote_address)
            .field("state", &self.state.get())
            .field("pending_read", &self.read_buffer.borrow().len())
            .field("pending_write", &self.write_buffer.borrow().len())
            .finish_non_exhaustive()
    }
}
