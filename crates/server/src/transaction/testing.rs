//! In-memory transport and host for driving transactions in tests.

use crate::connection::{Subscriber, Transport};
use crate::transaction::{MockTransactionHost, TransactionId};
use fly_http::buffer::{ReadBuffer, WriteBuffer};
use fly_http::compression::{CompressionConfig, CompressionNegotiator};
use std::cell::{Cell, RefCell, RefMut};
use std::net::SocketAddr;
use std::rc::Rc;

/// Transport whose peer is the test: [`receive`](MockConnection::receive) plays incoming
/// bytes, everything flushed is collected as output.
pub(crate) struct MockConnection {
    read_buffer: RefCell<ReadBuffer>,
    write_buffer: RefCell<WriteBuffer>,
    subscribers: RefCell<Vec<Subscriber>>,
    flushed: RefCell<Vec<u8>>,
    disconnected: Cell<bool>,
}

impl MockConnection {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(Self {
            read_buffer: RefCell::new(ReadBuffer::new()),
            write_buffer: RefCell::new(WriteBuffer::default()),
            subscribers: RefCell::new(Vec::new()),
            flushed: RefCell::new(Vec::new()),
            disconnected: Cell::new(false),
        })
    }

    /// Appends `data` to the read buffer and notifies the subscribers.
    pub(crate) fn receive(&self, data: &[u8]) {
        self.read_buffer.borrow_mut().feed(data);
        let subscribers = self.subscribers.borrow().clone();
        for subscriber in subscribers {
            subscriber();
        }
    }

    /// Everything flushed since the last call.
    pub(crate) fn take_output(&self) -> String {
        let flushed = self.flushed.take();
        String::from_utf8_lossy(&flushed).into_owned()
    }

    pub(crate) fn take_raw_output(&self) -> Vec<u8> {
        self.flushed.take()
    }

    pub(crate) fn is_disconnected(&self) -> bool {
        self.disconnected.get()
    }
}

impl Transport for MockConnection {
    fn write(&self, data: &[u8], flush: bool) {
        if self.disconnected.get() {
            return;
        }

        let mut sink = self.flushed.borrow_mut();
        let mut buffer = self.write_buffer.borrow_mut();
        buffer.feed(data, &mut *sink).unwrap();
        if flush {
            buffer.flush(&mut *sink).unwrap();
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
        if self.disconnected.replace(true) {
            return false;
        }

        let mut sink = self.flushed.borrow_mut();
        self.write_buffer.borrow_mut().flush(&mut *sink).unwrap();
        self.subscribers.borrow_mut().clear();
        true
    }

    fn is_readable(&self) -> bool {
        !self.disconnected.get()
    }

    fn is_writable(&self) -> bool {
        !self.disconnected.get()
    }

    fn remote_address(&self) -> Option<SocketAddr> {
        None
    }
}

/// A host handing out `negotiator` and recording the ids of ended transactions.
pub(crate) fn recording_host(negotiator: CompressionNegotiator) -> (Rc<MockTransactionHost>, Rc<RefCell<Vec<TransactionId>>>) {
    let ended = Rc::new(RefCell::new(Vec::new()));
    let negotiator = Rc::new(negotiator);

    let mut host = MockTransactionHost::new();
    host.expect_compression_negotiator().returning_st(move || Rc::clone(&negotiator));
    let record = Rc::clone(&ended);
    host.expect_end_transaction().returning_st(move |id| record.borrow_mut().push(id));

    (Rc::new(host), ended)
}

/// A host without compression.
pub(crate) fn plain_host() -> (Rc<MockTransactionHost>, Rc<RefCell<Vec<TransactionId>>>) {
    recording_host(CompressionNegotiator::new())
}

/// A host with the default gzip/deflate configuration.
pub(crate) fn compressing_host() -> (Rc<MockTransactionHost>, Rc<RefCell<Vec<TransactionId>>>) {
    recording_host(CompressionNegotiator::from_config(&CompressionConfig::default()))
}
