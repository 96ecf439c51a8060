//! The HTTP server
//!
//! A [`Server`] ties the parts together on one reactor thread:
//!
//! - the [`Listener`] accepts connections and every accepted [`Connection`] gets its own
//!   [`TransactionHandler`], kept in the server's [`TransactionPool`];
//! - a ticker timer checks every live transaction once per second for dead connections and
//!   expired keep-alive;
//! - a poller timer reacts to [`ShutdownHandle`] requests and, when enabled, to `SIGINT` and
//!   `SIGTERM`;
//! - a statistics timer logs the reactor's bookkeeping at debug level.
//!
//! [`Server::start`] blocks until [`Server::stop`] is called.
//!
//! # Example
//!
//! ```no_run
//! use fly_server::config::ServerConfig;
//! use fly_server::{Server, ShutdownHandle};
//!
//! let shutdown = ShutdownHandle::new();
//! let server = Server::builder().shutdown_handle(shutdown.clone()).build().unwrap();
//!
//! // `shutdown.request()` from any thread ends the loop below
//! server.start(ServerConfig::default()).unwrap();
//! ```

mod error;
mod output;
mod shutdown;
mod signals;

pub use error::ServerError;
pub use output::{Output, TracingOutput};
pub use shutdown::ShutdownHandle;

use crate::config::ServerConfig;
use crate::connection::{Connection, Listener, ListenerError, Transport};
use crate::reactor::{DEFAULT_POLL_TIMEOUT, Reactor, Timer};
use crate::transaction::{TransactionHandler, TransactionHost, TransactionId, TransactionPool};
use fly_http::compression::CompressionNegotiator;
use signals::{SignalWatcher, is_shutdown_signal};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::mem;
use std::net::SocketAddr;
use std::rc::{Rc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

/// How often live transactions are checked for dead connections and keep-alive expiry.
pub const TRANSACTION_TICK_INTERVAL: Duration = Duration::from_secs(1);

pub const STATISTICS_INTERVAL: Duration = Duration::from_secs(3);

/// How often shutdown requests and pending signals are looked at.
pub const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(250);

pub struct ServerBuilder {
    output: Rc<dyn Output>,
    shutdown: ShutdownHandle,
    handle_signals: bool,
    poll_timeout: Duration,
}

impl ServerBuilder {
    fn new() -> Self {
        Self {
            output: Rc::new(TracingOutput),
            shutdown: ShutdownHandle::new(),
            handle_signals: false,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }

    /// Where progress lines go, [`TracingOutput`] by default.
    pub fn output(mut self, output: impl Output + 'static) -> Self {
        self.output = Rc::new(output);
        self
    }

    pub fn shutdown_handle(mut self, shutdown: ShutdownHandle) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Stop on `SIGINT` and `SIGTERM`. Off by default.
    pub fn handle_signals(mut self, handle_signals: bool) -> Self {
        self.handle_signals = handle_signals;
        self
    }

    pub fn poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    /// # Errors
    ///
    /// Returns [`ServerError::Io`] when the reactor cannot be created.
    pub fn build(self) -> Result<Rc<Server>, ServerError> {
        let reactor = Rc::new(Reactor::with_poll_timeout(self.poll_timeout)?);
        let config = ServerConfig::default();
        let negotiator = CompressionNegotiator::from_config(&config.compression());

        Ok(Rc::new_cyclic(|this| Server {
            this: Weak::clone(this),
            reactor,
            config: RefCell::new(config),
            negotiator: RefCell::new(Rc::new(negotiator)),
            transactions: RefCell::new(TransactionPool::new()),
            listener: RefCell::new(None),
            timers: RefCell::new(Vec::new()),
            signals: RefCell::new(None),
            output: self.output,
            shutdown: self.shutdown,
            handle_signals: self.handle_signals,
            next_id: Cell::new(1),
        }))
    }
}

impl fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("shutdown", &self.shutdown)
            .field("handle_signals", &self.handle_signals)
            .field("poll_timeout", &self.poll_timeout)
            .finish_non_exhaustive()
    }
}

pub struct Server {
    this: Weak<Server>,
    reactor: Rc<Reactor>,
    config: RefCell<ServerConfig>,
    negotiator: RefCell<Rc<CompressionNegotiator>>,
    transactions: RefCell<TransactionPool>,
    listener: RefCell<Option<Rc<Listener>>>,
    timers: RefCell<Vec<Rc<Timer>>>,
    signals: RefCell<Option<SignalWatcher>>,
    output: Rc<dyn Output>,
    shutdown: ShutdownHandle,
    handle_signals: bool,
    next_id: Cell<TransactionId>,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Binds the configured address and runs the event loop until [`stop`](Server::stop).
    ///
    /// The reactor and the transaction pool are emptied before returning, so the server can be
    /// started again.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Listen`] when the address cannot be bound,
    /// [`ServerError::AlreadyRunning`] when called from within a running server and
    /// [`ServerError::Io`] when the listening socket cannot be registered.
    pub fn start(&self, config: ServerConfig) -> Result<(), ServerError> {
        if self.listener.borrow().is_some() {
            return Err(ServerError::AlreadyRunning);
        }

        let (address, port, backlog, options) =
            (config.address.clone(), config.port, config.backlog, config.connection_options());
        self.reload_config(config);

        self.output.writeln(&format!("Starting server on {address}:{port}..."));
        let socket = Listener::bind(&address, port, backlog)?;

        let this = Weak::clone(&self.this);
        let listener = Listener::listen(&self.reactor, socket, options, move |accepted| {
            if let Some(server) = this.upgrade() {
                server.on_accept(accepted);
            }
        })?;
        self.output.writeln(&format!("Listening on {}", listener.local_addr()));
        *self.listener.borrow_mut() = Some(listener);

        self.install_signal_handlers();
        self.start_timers();

        self.reactor.run();

        self.output.writeln("Event loop stopped.");
        self.release();
        Ok(())
    }

    /// Stops the event loop and closes every live transaction.
    pub fn stop(&self) {
        info!(transactions = self.transaction_count(), "stopping server");
        self.reactor.stop();

        let transactions = self.transactions.borrow().snapshot();
        for transaction in transactions {
            let mut transaction = transaction.borrow_mut();
            transaction.connection().disconnect();
            transaction.tick();
        }
    }

    /// Applies `config` to transactions accepted from now on and rebuilds the compression
    /// negotiator. The listener keeps its address until the next start.
    pub fn reload_config(&self, config: ServerConfig) {
        let negotiator = CompressionNegotiator::from_config(&config.compression());
        debug!(methods = negotiator.methods().len(), "configuration loaded");

        *self.negotiator.borrow_mut() = Rc::new(negotiator);
        *self.config.borrow_mut() = config;
    }

    pub fn config(&self) -> ServerConfig {
        self.config.borrow().clone()
    }

    /// Reacts to a process signal: `SIGINT` and `SIGTERM` stop the server.
    pub fn handle_signal(&self, signal: i32) {
        if is_shutdown_signal(signal) {
            info!(signal, "shutdown signal received");
            self.stop();
        } else {
            debug!(signal, "ignoring signal");
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions.borrow().len()
    }

    /// The bound address while the server is running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.borrow().as_ref().map(|listener| listener.local_addr())
    }

    pub fn is_running(&self) -> bool {
        self.reactor.is_running()
    }

    pub fn reactor(&self) -> &Rc<Reactor> {
        &self.reactor
    }

    fn on_accept(&self, accepted: Result<Rc<Connection>, ListenerError>) {
        match accepted {
            Ok(connection) => self.begin_transaction(connection),
            Err(e) => warn!(cause = %e, "failed to accept"),
        }
    }

    fn begin_transaction(&self, connection: Rc<Connection>) {
        let id = self.next_id.get();
        self.next_id.set(id.wrapping_add(1));

        let remote = connection.remote_address();
        let host: Weak<Server> = Weak::clone(&self.this);
        let host: Weak<dyn TransactionHost> = host;
        let mut transaction = TransactionHandler::new(id, host, connection);
        {
            let config = self.config.borrow();
            let keep_alive = config.keep_alive();
            let chunked = config.chunked();
            transaction.set_keep_alive(keep_alive.enabled, keep_alive.timeout, keep_alive.limit);
            transaction.set_chunked_encoding(chunked.enabled, chunked.chunk_size);
        }

        let transaction = Rc::new(RefCell::new(transaction));
        self.transactions.borrow_mut().insert(id, Rc::clone(&transaction));
        debug!(id, remote = ?remote, "transaction opened");

        TransactionHandler::handle(&transaction);
    }

    fn tick_transactions(&self) {
        let transactions = self.transactions.borrow().snapshot();
        for transaction in transactions {
            transaction.borrow_mut().tick();
        }
    }

    fn poll_shutdown(&self) {
        if self.shutdown.take() {
            info!("shutdown requested");
            self.stop();
        }

        let pending = self.signals.borrow_mut().as_mut().map(SignalWatcher::pending).unwrap_or_default();
        for signal in pending {
            self.handle_signal(signal);
        }
    }

    fn install_signal_handlers(&self) {
        if !self.handle_signals {
            return;
        }

        match SignalWatcher::install() {
            Ok(watcher) => *self.signals.borrow_mut() = Some(watcher),
            Err(e) => warn!(cause = %e, "failed to install signal handlers"),
        }
    }

    fn start_timers(&self) {
        let this = Weak::clone(&self.this);
        let ticker = Timer::every(TRANSACTION_TICK_INTERVAL, move |_| {
            if let Some(server) = this.upgrade() {
                server.tick_transactions();
            }
        });

        let this = Weak::clone(&self.this);
        let statistics = Timer::every(STATISTICS_INTERVAL, move |reactor| {
            if let Some(server) = this.upgrade() {
                debug!(transactions = server.transaction_count(), "{}", reactor.statistics());
            }
        });

        let this = Weak::clone(&self.this);
        let poller = Timer::every(SHUTDOWN_POLL_INTERVAL, move |_| {
            if let Some(server) = this.upgrade() {
                server.poll_shutdown();
            }
        });

        let mut timers = self.timers.borrow_mut();
        for timer in [ticker, statistics, poller] {
            self.reactor.add_timer(&timer);
            timers.push(timer);
        }
    }

    fn release(&self) {
        if let Some(listener) = self.listener.borrow_mut().take() {
            listener.close();
        }

        let timers = self.timers.take();
        for timer in &timers {
            self.reactor.remove_timer(timer);
        }

        self.signals.take();
        let transactions = mem::take(&mut *self.transactions.borrow_mut());
        drop(transactions);

        self.reactor.clear();
        self.shutdown.take();
    }
}

impl TransactionHost for Server {
    fn compression_negotiator(&self) -> Rc<CompressionNegotiator> {
        Rc::clone(&self.negotiator.borrow())
    }

    fn end_transaction(&self, id: TransactionId) {
        let removed = self.transactions.borrow_mut().remove(id);
        if removed.is_some() {
            debug!(id, remaining = self.transaction_count(), "transaction removed");
        }
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.local_addr())
            .field("transactions", &self.transaction_count())
            .field("statistics", &self.reactor.statistics())
            .field("handle_signals", &self.handle_signals)
            .finish_non_exhaustive()
    }
}
