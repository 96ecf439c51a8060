//! The per-connection HTTP state machine.
//!
//! # Lifecycle
//!
//! 1. [`TransactionHandler::handle`] records the start time and subscribes to the connection.
//! 2. Every notification re-decodes the accumulated read buffer (see
//!    [`RequestDecoder`](fly_http::codec::RequestDecoder)). A malformed request is answered with
//!    `400 Bad Request` and the connection is closed.
//! 3. A request carrying `Expect: 100-continue` gets the interim `HTTP/1.1 100 Continue` line
//!    once; any other expectation gets `417 Expectation Failed`.
//! 4. A complete request is answered with the `404 Not Found` error page, compressed when the
//!    client accepts a configured coding and chunked when enabled and understood by the client.
//! 5. Without keep-alive the transaction ends right after the response. With keep-alive the
//!    periodic [`tick`](TransactionHandler::tick) ends it once the keep-alive timeout has passed
//!    since the transaction started.
//!
//! Keep-alive is decided per request: it must be enabled and the request must ask for
//! `Connection: keep-alive`. When a limit is set, the request that reaches it is answered with
//! `Connection: close`.

use crate::connection::{Connection, Transport};
use crate::transaction::{TransactionHost, TransactionId};
use fly_http::codec::{ChunkedEncoder, DEFAULT_CHUNK_SIZE, Decoded, RequestDecoder};
use fly_http::protocol::{ParseError, Request, Response};
use http::{StatusCode, header};
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Interim response written for `Expect: 100-continue`.
const CONTINUE_LINE: &[u8] = b"HTTP/1.1 100 Continue\r\n";

const KEEP_ALIVE: &str = "keep-alive";
const CLOSE: &str = "close";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeepAliveOptions {
    pub enabled: bool,
    /// Lifetime of a kept-alive transaction, measured from its start. Zero never expires.
    pub timeout: Duration,
    /// Requests served before the connection is closed. Zero is unlimited.
    pub limit: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkedOptions {
    pub enabled: bool,
    pub chunk_size: usize,
}

impl Default for ChunkedOptions {
    fn default() -> Self {
        Self { enabled: false, chunk_size: DEFAULT_CHUNK_SIZE }
    }
}

pub struct TransactionHandler<C = Connection> {
    id: TransactionId,
    host: Weak<dyn TransactionHost>,
    connection: Rc<C>,
    decoder: RequestDecoder,
    last_request: Option<Request>,
    request_counter: usize,
    transaction_started: Instant,
    keep_alive: bool,
    handling_continue: bool,
    keep_alive_options: KeepAliveOptions,
    chunked_options: ChunkedOptions,
}

impl<C: Transport + 'static> TransactionHandler<C> {
    pub fn new(id: TransactionId, host: Weak<dyn TransactionHost>, connection: Rc<C>) -> Self {
        Self {
            id,
            host,
            connection,
            decoder: RequestDecoder::new(),
            last_request: None,
            request_counter: 0,
            transaction_started: Instant::now(),
            keep_alive: false,
            handling_continue: false,
            keep_alive_options: KeepAliveOptions::default(),
            chunked_options: ChunkedOptions::default(),
        }
    }

    pub fn set_keep_alive(&mut self, enabled: bool, timeout: Duration, limit: usize) {
        self.keep_alive_options = KeepAliveOptions { enabled, timeout, limit };
    }

    pub fn set_chunked_encoding(&mut self, enabled: bool, chunk_size: usize) {
        self.chunked_options = ChunkedOptions { enabled, chunk_size };
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn connection(&self) -> &Rc<C> {
        &self.connection
    }

    pub fn keep_alive_options(&self) -> KeepAliveOptions {
        self.keep_alive_options
    }

    pub fn chunked_options(&self) -> ChunkedOptions {
        self.chunked_options
    }

    /// Whether the last response kept the connection alive.
    pub fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Requests dispatched so far, the interim `100 Continue` step included.
    pub fn request_count(&self) -> usize {
        self.request_counter
    }

    /// The request most recently dispatched.
    pub fn last_request(&self) -> Option<&Request> {
        self.last_request.as_ref()
    }

    /// Starts the transaction: from now on incoming data on the connection is processed.
    pub fn handle(this: &Rc<RefCell<Self>>) {
        let weak = Rc::downgrade(this);
        let mut handler = this.borrow_mut();

        handler.transaction_started = Instant::now();
        handler.connection.subscribe(Rc::new(move || {
            if let Some(handler) = weak.upgrade() {
                handler.borrow_mut().on_data();
            }
        }));
        trace!(id = handler.id, "transaction started");
    }

    /// Processes the connection's read buffer.
    pub fn on_data(&mut self) {
        let data = self.connection.read_buffer().contents().to_vec();
        if let Err(e) = self.parse_http_request(&data) {
            debug!(id = self.id, cause = %e, "malformed request");
            self.send_error_response(StatusCode::BAD_REQUEST, true);
        }
    }

    /// Continues decoding with `data`, the whole read buffer, and dispatches what completes.
    ///
    /// # Errors
    ///
    /// Returns the [`ParseError`] of a malformed request; the caller answers it.
    pub fn parse_http_request(&mut self, data: &[u8]) -> Result<(), ParseError> {
        if !self.decoder.is_parsing() {
            self.handling_continue = false;
        }

        let decoded = self.decoder.decode(data)?;
        if decoded.consumes_buffer() {
            self.connection.read_buffer().clear();
        }

        match decoded {
            Decoded::Incomplete | Decoded::Consumed => Ok(()),
            Decoded::Expectation(request) => {
                self.handle_request(request);
                if self.handling_continue && self.decoder.is_body_complete() {
                    return self.parse_http_request(&[]);
                }
                Ok(())
            }
            Decoded::Complete(request) => {
                self.handle_request(request);
                Ok(())
            }
        }
    }

    /// Answers a request: the interim continue line, a failed expectation, or the final
    /// response.
    pub fn handle_request(&mut self, request: Request) {
        self.request_counter += 1;
        self.keep_alive = self.keep_alive_options.enabled && request.wants_keep_alive();
        let limit = self.keep_alive_options.limit;
        if self.keep_alive && limit > 0 && self.request_counter >= limit {
            debug!(id = self.id, limit, "keep-alive request limit reached");
            self.keep_alive = false;
        }

        let expectation = request.headers().get(header::EXPECT.as_str()).map(str::to_owned);
        if let Some(expectation) = &expectation
            && !self.handling_continue
            && expectation.eq_ignore_ascii_case("100-continue")
        {
            trace!(id = self.id, "sending 100 continue");
            self.handling_continue = true;
            self.connection.write(CONTINUE_LINE, true);
            self.last_request = Some(request);
            return;
        }

        let chunked = self.chunked_options.enabled
            && self.chunked_options.chunk_size > 0
            && ChunkedEncoder::is_supported(&request);
        let compressor = self.host.upgrade().and_then(|host| host.compression_negotiator().negotiate(&request));
        debug!(
            id = self.id,
            method = request.method(),
            path = request.path(),
            keep_alive = self.keep_alive,
            "dispatching request"
        );
        self.last_request = Some(request);

        if expectation.is_some() {
            self.send_error_response(StatusCode::EXPECTATION_FAILED, false);
            return;
        }

        let mut response = Response::error_page(StatusCode::NOT_FOUND);
        response.headers_mut().set("Connection", if self.keep_alive { KEEP_ALIVE } else { CLOSE });

        if let Some(compressor) = compressor
            && let Err(e) = compressor.compress(&mut response)
        {
            warn!(id = self.id, cause = %e, encoding = compressor.name(), "failed to compress response");
        }

        if chunked {
            let encoded = ChunkedEncoder::new(self.chunked_options.chunk_size).encode_response(&mut response);
            self.connection.write(&encoded, true);
        } else {
            self.send_response(&mut response);
        }

        if !self.keep_alive {
            self.end();
        }
    }

    /// Sends the error page for `status`. With `kill` the connection is closed afterwards,
    /// otherwise the current request is finished and keep-alive decides.
    pub fn send_error_response(&mut self, status: StatusCode, kill: bool) {
        let mut response = Response::error_page(status);
        if kill {
            self.keep_alive = false;
            response.headers_mut().set("Connection", CLOSE);
        } else if self.keep_alive {
            response.headers_mut().set("Connection", KEEP_ALIVE);
        }

        self.send_response(&mut response);

        if kill {
            self.end();
        } else {
            self.end_parse();
        }
    }

    /// Periodic check: ends the transaction when the connection died or keep-alive expired.
    pub fn tick(&mut self) {
        if !self.connection.is_readable() {
            self.end();
            return;
        }

        let timeout = self.keep_alive_options.timeout;
        if self.keep_alive && !timeout.is_zero() && self.transaction_started.elapsed() > timeout {
            debug!(id = self.id, "keep-alive timeout");
            self.end();
        }
    }

    /// Closes the connection and leaves the host's pool. Safe to call more than once.
    pub fn end(&mut self) {
        if self.connection.disconnect() {
            debug!(id = self.id, requests = self.request_counter, "transaction ended");
        }
        if let Some(host) = self.host.upgrade() {
            host.end_transaction(self.id);
        }
    }

    /// Abandons the request being parsed; ends the transaction unless kept alive.
    pub fn end_parse(&mut self) {
        self.decoder.reset();
        if !self.keep_alive {
            self.end();
        }
    }

    fn send_response(&mut self, response: &mut Response) {
        response.prepare();
        self.connection.write(&response.serialize(), true);
    }
}

impl<C> fmt::Debug for TransactionHandler<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionHandler")
            .field("id", &self.id)
            .field("decoder", &self.decoder.state())
            .field("request_counter", &self.request_counter)
            .field("keep_alive", &self.keep_alive)
            .field("handling_continue", &self.handling_continue)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::MockTransactionHost;
    use crate::transaction::testing::{MockConnection, compressing_host, plain_host};
    use flate2::read::GzDecoder;
    use indoc::indoc;
    use std::io::Read;
    use std::thread;

    type Handler = Rc<RefCell<TransactionHandler<MockConnection>>>;

    fn crlf(text: &str) -> Vec<u8> {
        text.replace('\n', "\r\n").into_bytes()
    }

    fn keep_alive_request() -> Vec<u8> {
        crlf(indoc! {r##"
        GET /index.html HTTP/1.1
        Host: localhost
        Connection: keep-alive

        "##})
    }

    fn start(host: &Rc<MockTransactionHost>, keep_alive: KeepAliveOptions, chunked: ChunkedOptions) -> (Handler, Rc<MockConnection>) {
        let connection = MockConnection::new();
        let host = Rc::downgrade(host);
        let host: Weak<dyn TransactionHost> = host;

        let mut handler = TransactionHandler::new(7, host, Rc::clone(&connection));
        handler.set_keep_alive(keep_alive.enabled, keep_alive.timeout, keep_alive.limit);
        handler.set_chunked_encoding(chunked.enabled, chunked.chunk_size);

        let handler = Rc::new(RefCell::new(handler));
        TransactionHandler::handle(&handler);
        (handler, connection)
    }

    fn keep_alive(timeout: Duration, limit: usize) -> KeepAliveOptions {
        KeepAliveOptions { enabled: true, timeout, limit }
    }

    #[test]
    fn test_keep_alive_timeout() {
        let (host, ended) = plain_host();
        let (handler, connection) =
            start(&host, keep_alive(Duration::from_millis(150), 100), ChunkedOptions::default());

        for _ in 0..5 {
            connection.receive(&keep_alive_request());
            let output = connection.take_output();
            assert!(output.starts_with("HTTP/1.1 404 Not Found\r\n"), "{output}");
            assert!(output.contains("Connection: keep-alive\r\n"), "{output}");
        }
        assert!(!connection.is_disconnected());

        handler.borrow_mut().tick();
        assert!(!connection.is_disconnected());

        thread::sleep(Duration::from_millis(200));
        handler.borrow_mut().tick();

        assert!(connection.take_output().is_empty());
        assert!(connection.is_disconnected());
        assert_eq!(*ended.borrow(), vec![7]);

        connection.receive(&keep_alive_request());
        assert!(connection.take_output().is_empty());
        assert_eq!(handler.borrow().request_count(), 5);
    }

    #[test]
    fn test_pipelined_request_is_dropped() {
        let (host, ended) = plain_host();
        let (handler, connection) =
            start(&host, keep_alive(Duration::from_secs(15), 100), ChunkedOptions::default());

        let mut delivery = keep_alive_request();
        delivery.extend_from_slice(&keep_alive_request());
        connection.receive(&delivery);

        let output = connection.take_output();
        assert_eq!(output.matches("HTTP/1.1 404 Not Found").count(), 1, "{output}");
        assert!(output.contains("Connection: keep-alive\r\n"), "{output}");
        assert!(!connection.is_disconnected());
        assert!(connection.read_buffer().is_empty());
        assert!(ended.borrow().is_empty());
        assert_eq!(handler.borrow().request_count(), 1);

        connection.receive(&keep_alive_request());
        assert!(connection.take_output().starts_with("HTTP/1.1 404 Not Found\r\n"));
    }

    #[test]
    fn test_keep_alive_ignored_without_header() {
        let (host, ended) = plain_host();
        let (_handler, connection) =
            start(&host, keep_alive(Duration::from_secs(15), 100), ChunkedOptions::default());

        connection.receive(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n");

        let output = connection.take_output();
        assert!(output.contains("Connection: close\r\n"), "{output}");
        assert!(connection.is_disconnected());
        assert_eq!(*ended.borrow(), vec![7]);
    }

    #[test]
    fn test_no_keep_alive() {
        let (host, _ended) = plain_host();
        let (handler, connection) = start(&host, KeepAliveOptions::default(), ChunkedOptions::default());

        connection.receive(&keep_alive_request());

        let output = connection.take_output();
        assert!(output.contains("Connection: close\r\n"), "{output}");
        assert!(connection.is_disconnected());
        assert!(!handler.borrow().is_keep_alive());
    }

    #[test]
    fn test_keep_alive_limit() {
        let (host, ended) = plain_host();
        let (handler, connection) =
            start(&host, keep_alive(Duration::from_secs(15), 6), ChunkedOptions::default());

        for _ in 0..5 {
            connection.receive(&keep_alive_request());
            assert!(connection.take_output().contains("Connection: keep-alive\r\n"));
            assert!(!connection.is_disconnected());
        }

        connection.receive(&keep_alive_request());
        let output = connection.take_output();
        assert!(output.contains("Connection: close\r\n"), "{output}");
        assert!(connection.is_disconnected());
        assert_eq!(handler.borrow().request_count(), 6);
        assert_eq!(*ended.borrow(), vec![7]);
    }

    #[test]
    fn test_continue() {
        let (host, _ended) = plain_host();
        let (handler, connection) =
            start(&host, keep_alive(Duration::from_secs(15), 100), ChunkedOptions::default());

        let head = crlf(indoc! {r##"
        POST /upload HTTP/1.1
        Host: localhost
        Expect: 100-continue
        Content-Length: 4

        "##});
        connection.receive(&head);
        assert_eq!(connection.take_output(), "HTTP/1.1 100 Continue\r\n");
        assert!(connection.read_buffer().is_empty());
        assert!(!connection.is_disconnected());

        connection.receive(b"data");
        let output = connection.take_output();
        assert!(output.starts_with("HTTP/1.1 404 Not Found\r\n"), "{output}");
        assert!(!output.contains("100 Continue"));

        let handler = handler.borrow();
        let request = handler.last_request().unwrap();
        assert_eq!(request.body(), b"data");
        assert!(!request.headers().contains("expect"));
        assert_eq!(handler.request_count(), 2);
    }

    #[test]
    fn test_continue_counts_toward_limit() {
        let (host, ended) = plain_host();
        let (handler, connection) =
            start(&host, keep_alive(Duration::from_secs(15), 2), ChunkedOptions::default());

        let head = crlf(indoc! {r##"
        POST /upload HTTP/1.1
        Connection: keep-alive
        Expect: 100-continue
        Content-Length: 4

        "##});
        connection.receive(&head);
        assert_eq!(connection.take_output(), "HTTP/1.1 100 Continue\r\n");
        assert_eq!(handler.borrow().request_count(), 1);

        connection.receive(b"data");
        let output = connection.take_output();
        assert!(output.starts_with("HTTP/1.1 404 Not Found\r\n"), "{output}");
        assert!(output.contains("Connection: close\r\n"), "{output}");
        assert!(connection.is_disconnected());
        assert_eq!(*ended.borrow(), vec![7]);
    }

    #[test]
    fn test_continue_with_body_already_sent() {
        let (host, _ended) = plain_host();
        let (_handler, connection) = start(&host, KeepAliveOptions::default(), ChunkedOptions::default());

        connection.receive(b"PUT / HTTP/1.1\r\nExpect: 100-continue\r\nContent-Length: 2\r\n\r\nok");

        let output = connection.take_output();
        assert!(output.starts_with("HTTP/1.1 100 Continue\r\nHTTP/1.1 404 Not Found\r\n"), "{output}");
        assert!(connection.is_disconnected());
    }

    #[test]
    fn test_expectation_failed() {
        let (host, _ended) = plain_host();
        let (handler, connection) =
            start(&host, keep_alive(Duration::from_secs(15), 100), ChunkedOptions::default());

        connection.receive(b"POST / HTTP/1.1\r\nConnection: keep-alive\r\nExpect: something-else\r\n\r\n");

        let output = connection.take_output();
        assert!(output.starts_with("HTTP/1.1 417 Expectation Failed\r\n"), "{output}");
        assert!(output.contains("Connection: keep-alive\r\n"), "{output}");
        assert!(output.ends_with("error 417 Expectation Failed"), "{output}");
        assert!(!connection.is_disconnected());

        connection.receive(&keep_alive_request());
        assert!(connection.take_output().starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert_eq!(handler.borrow().request_count(), 2);
    }

    #[test]
    fn test_malformed_request_line() {
        let (host, ended) = plain_host();
        let (_handler, connection) =
            start(&host, keep_alive(Duration::from_secs(15), 100), ChunkedOptions::default());

        connection.receive(b"GET /\r\nConnection: keep-alive\r\n\r\n");

        let output = connection.take_output();
        assert!(output.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{output}");
        assert!(output.contains("Connection: close\r\n"), "{output}");
        assert!(connection.is_disconnected());
        assert_eq!(*ended.borrow(), vec![7]);
    }

    #[test]
    fn test_content_length_mismatch() {
        let (host, _ended) = plain_host();
        let (_handler, connection) = start(&host, KeepAliveOptions::default(), ChunkedOptions::default());

        connection.receive(b"POST / HTTP/1.1\r\nContent-Length: 1\r\n\r\ntoo long");

        assert!(connection.take_output().starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(connection.is_disconnected());
    }

    #[test]
    fn test_fragmented_request() {
        let (host, _ended) = plain_host();
        let (handler, connection) =
            start(&host, keep_alive(Duration::from_secs(15), 100), ChunkedOptions::default());

        let request = crlf(indoc! {r##"
        POST /submit HTTP/1.1
        Host: localhost
        Connection: keep-alive
        Content-Length: 26
        X-Sample-Header: sample value

        abcdefghijklmnopqrstuvwxyz"##});

        for piece in request.chunks(10) {
            assert!(connection.take_output().is_empty());
            connection.receive(piece);
        }

        let output = connection.take_output();
        assert_eq!(output.matches("HTTP/1.1 404 Not Found").count(), 1, "{output}");
        assert_eq!(handler.borrow().last_request().unwrap().serialize(), &request[..]);
    }

    #[test]
    fn test_chunked_gzip_response() {
        let (host, _ended) = compressing_host();
        let (_handler, connection) =
            start(&host, KeepAliveOptions::default(), ChunkedOptions { enabled: true, chunk_size: 8 });

        connection.receive(b"GET / HTTP/1.1\r\nAccept-Encoding: gzip, deflate\r\n\r\n");

        let output = connection.take_raw_output();
        let split = output.windows(4).position(|window| window == b"\r\n\r\n").unwrap() + 4;
        let head = String::from_utf8_lossy(&output[..split]);
        assert!(head.contains("Transfer-Encoding: chunked\r\n"), "{head}");
        assert!(head.contains("Content-Encoding: gzip\r\n"), "{head}");
        assert!(!head.contains("Content-Length"), "{head}");

        let mut body = &output[split..];
        let mut compressed = Vec::new();
        loop {
            let eol = body.windows(2).position(|window| window == b"\r\n").unwrap();
            let size = usize::from_str_radix(std::str::from_utf8(&body[..eol]).unwrap(), 16).unwrap();
            assert!(size <= 8);
            compressed.extend_from_slice(&body[eol + 2..eol + 2 + size]);
            body = &body[eol + 2 + size + 2..];
            if size == 0 {
                break;
            }
        }
        assert!(body.is_empty());

        let mut decoded = String::new();
        GzDecoder::new(&compressed[..]).read_to_string(&mut decoded).unwrap();
        assert_eq!(decoded, "error 404 Not Found");
    }

    #[test]
    fn test_http_10_is_not_chunked() {
        let (host, _ended) = plain_host();
        let (_handler, connection) =
            start(&host, KeepAliveOptions::default(), ChunkedOptions { enabled: true, chunk_size: 8 });

        connection.receive(b"GET / HTTP/1.0\r\n\r\n");

        let output = connection.take_output();
        assert!(output.contains("Content-Length: 19\r\n"), "{output}");
        assert!(!output.contains("Transfer-Encoding"), "{output}");
        assert!(output.ends_with("\r\n\r\nerror 404 Not Found"), "{output}");
    }

    #[test]
    fn test_tick_ends_dead_connection() {
        let (host, ended) = plain_host();
        let (handler, connection) = start(&host, KeepAliveOptions::default(), ChunkedOptions::default());

        connection.disconnect();
        handler.borrow_mut().tick();

        assert_eq!(*ended.borrow(), vec![7]);
    }

    #[test]
    fn test_end_without_host() {
        let connection = MockConnection::new();
        let host = Weak::<MockTransactionHost>::new();
        let host: Weak<dyn TransactionHost> = host;
        let mut handler = TransactionHandler::new(1, host, Rc::clone(&connection));

        handler.end();
        handler.end();

        assert!(connection.is_disconnected());
    }
}
