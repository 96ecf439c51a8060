//! A single-threaded reactor HTTP/1.x server.
//!
//! Every socket is non-blocking and multiplexed by one [`Reactor`](reactor::Reactor). Requests
//! are decoded incrementally as bytes arrive, whatever the fragmentation, and answered with the
//! error page of `404 Not Found`, honoring keep-alive, `Expect: 100-continue`, gzip/deflate
//! compression and chunked transfer encoding.
//!
//! - [`reactor`]: readiness polling and timers
//! - [`connection`]: the listening socket and buffered client connections
//! - [`transaction`]: the per-connection HTTP state machine
//! - [`config`]: the YAML configuration
//!
//! The HTTP types and codecs live in `fly-http`.

pub mod config;
pub mod connection;
pub mod reactor;
mod server;
pub mod transaction;

pub use server::{
    Output, SHUTDOWN_POLL_INTERVAL, STATISTICS_INTERVAL, Server, ServerBuilder, ServerError, ShutdownHandle,
    TRANSACTION_TICK_INTERVAL, TracingOutput,
};
