use crate::connection::{Connection, ConnectionOptions, ListenerError};
use crate::reactor::Reactor;
use mio::Token;
use mio::net::TcpListener;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::cell::RefCell;
use std::fmt;
use std::io::{self, ErrorKind};
use std::net::{SocketAddr, ToSocketAddrs};
use std::rc::{Rc, Weak};
use tracing::{debug, info};

type AcceptHandler = Box<dyn Fn(Result<Rc<Connection>, ListenerError>)>;

/// The listening socket of the server.
pub struct Listener {
    socket: RefCell<Option<TcpListener>>,
    local_addr: SocketAddr,
    token: Token,
    reactor: Rc<Reactor>,
    options: ConnectionOptions,
    on_accept: AcceptHandler,
}

impl Listener {
    /// Binds a non-blocking listening socket on `address:port` with the given backlog.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError::Bind`] carrying the OS error when the address does not resolve
    /// or the socket cannot be created, bound or put into listening mode.
    pub fn bind(address: &str, port: u16, backlog: u32) -> Result<TcpListener, ListenerError> {
        let endpoint = format!("{address}:{port}");
        let socket_addr = (address, port)
            .to_socket_addrs()
            .and_then(|mut addrs| addrs.next().ok_or_else(|| io::Error::from(ErrorKind::AddrNotAvailable)))
            .map_err(|e| ListenerError::bind(&endpoint, e))?;

        let socket = Socket::new(Domain::for_address(socket_addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| ListenerError::bind(&endpoint, e))?;

        let backlog = i32::try_from(backlog).unwrap_or(i32::MAX);
        let prepared = socket
            .set_reuse_address(true)
            .and_then(|()| socket.set_nonblocking(true))
            .and_then(|()| socket.bind(&SockAddr::from(socket_addr)))
            .and_then(|()| socket.listen(backlog));
        prepared.map_err(|e| ListenerError::bind(&endpoint, e))?;

        Ok(TcpListener::from_std(socket.into()))
    }

    /// Starts accepting connections on `socket`.
    ///
    /// `on_accept` receives every accepted [`Connection`], or [`ListenerError::Accept`] when an
    /// accept fails; a failed accept does not stop the listener.
    ///
    /// # Errors
    ///
    /// Returns the error raised while registering the socket with the reactor.
    pub fn listen(
        reactor: &Rc<Reactor>,
        mut socket: TcpListener,
        options: ConnectionOptions,
        on_accept: impl Fn(Result<Rc<Connection>, ListenerError>) + 'static,
    ) -> io::Result<Rc<Self>> {
        let local_addr = socket.local_addr()?;
        let token = reactor.next_token();

        let listener = Rc::new(Self {
            socket: RefCell::new(None),
            local_addr,
            token,
            reactor: Rc::clone(reactor),
            options,
            on_accept: Box::new(on_accept),
        });

        let this: Weak<Self> = Rc::downgrade(&listener);
        reactor.await_readable(
            &mut socket,
            token,
            Rc::new(move |_| {
                if let Some(listener) = this.upgrade() {
                    listener.accept_pending();
                }
            }),
        )?;
        *listener.socket.borrow_mut() = Some(socket);

        info!(address = %local_addr, "listening");
        Ok(listener)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_listening(&self) -> bool {
        self.socket.borrow().is_some()
    }

    /// Stops accepting and releases the socket.
    pub fn close(&self) {
        let socket = self.socket.borrow_mut().take();
        if let Some(mut socket) = socket {
            self.reactor.remove_stream(&mut socket, self.token);
            debug!(address = %self.local_addr, "listener closed");
        }
    }

    fn accept_pending(&self) {
        loop {
            let accepted = match self.socket.borrow().as_ref() {
                Some(socket) => socket.accept(),
                None => return,
            };

            match accepted {
                Ok((stream, address)) => {
                    let connection = Connection::open(&self.reactor, stream, Some(address), self.options);
                    (self.on_accept)(connection.map_err(ListenerError::accept));
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    (self.on_accept)(Err(ListenerError::accept(e)));
                    return;
                }
            }
        }
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("local_addr", &self.local_addr)
            .field("token", &self.token)
            .field("listening", &self.is_listening())
            .finish_non_exhaustive()
    }
}
