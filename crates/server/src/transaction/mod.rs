//! HTTP transactions
//!
//! A [`TransactionHandler`] owns the HTTP conversation on one connection: it decodes requests
//! as bytes arrive, negotiates keep-alive and `Expect: 100-continue`, builds and sends the
//! response, and ends the connection when the conversation is over or has been idle too long.
//! The live handlers of a server are kept in a [`TransactionPool`].
//!
//! Handlers talk back to their owner through the [`TransactionHost`] trait, held weakly so a
//! handler never keeps the server alive.

mod handler;
mod pool;
#[cfg(test)]
pub(crate) mod testing;

pub use handler::{ChunkedOptions, KeepAliveOptions, TransactionHandler};
pub use pool::{SharedTransaction, TransactionPool};

use fly_http::compression::CompressionNegotiator;
use std::rc::Rc;

/// Identifies a transaction within its pool.
pub type TransactionId = u64;

/// The owner of a set of transactions.
#[cfg_attr(test, mockall::automock)]
pub trait TransactionHost {
    /// The negotiator used to pick a response compression.
    fn compression_negotiator(&self) -> Rc<CompressionNegotiator>;

    /// Called by a handler that has ended; the host drops it from its pool.
    fn end_transaction(&self, id: TransactionId);
}
