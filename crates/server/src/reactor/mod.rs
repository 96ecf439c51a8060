//! Single-threaded readiness reactor
//!
//! The [`Reactor`] multiplexes every socket of the server over one [`mio::Poll`] and drives the
//! maintenance [`Timer`]s. All callbacks run on the reactor thread, one after another.
//!
//! # Cycle
//!
//! 1. Tick a snapshot of the registered timers in registration order.
//! 2. Poll once. The wait is bounded by the configured poll timeout and shortened to the
//!    earliest timer deadline. Poll failures (`EINTR` included) count as "nothing ready".
//! 3. For every ready token run its readable callbacks, then its writable callbacks, in
//!    registration order.
//!
//! Callbacks may register and remove streams or timers, including their own, while a cycle is
//! dispatching. A removal takes effect for the next callback lookup; callbacks already
//! collected for the current token still run, so they must tolerate a closed source.
//!
//! `mio` readiness is edge-triggered: a readable callback must drain its source until
//! [`io::ErrorKind::WouldBlock`].

mod timer;

pub use timer::Timer;

use mio::event::Source;
use mio::{Events, Interest, Poll, Registry, Token};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::rc::Rc;
use std::time::Duration;
use tracing::{trace, warn};

/// Upper bound of a single poll wait
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(200);

const EVENTS_CAPACITY: usize = 1024;

/// Callback run when a registered source becomes ready.
pub type StreamCallback = Rc<dyn Fn(&Reactor)>;

#[derive(Default)]
struct Interests {
    readable: Vec<StreamCallback>,
    writable: Vec<StreamCallback>,
}

impl Interests {
    fn interest(&self) -> Option<Interest> {
        match (self.readable.is_empty(), self.writable.is_empty()) {
            (false, false) => Some(Interest::READABLE | Interest::WRITABLE),
            (false, true) => Some(Interest::READABLE),
            (true, false) => Some(Interest::WRITABLE),
            (true, true) => None,
        }
    }
}

/// Snapshot of the reactor's bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Statistics {
    pub running: bool,
    pub timers: usize,
    pub read_streams: usize,
    pub write_streams: usize,
}

impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "running: {}, timers: {}, read streams: {}, write streams: {}",
            self.running, self.timers, self.read_streams, self.write_streams
        )
    }
}

pub struct Reactor {
    poll: RefCell<Poll>,
    events: RefCell<Events>,
    registry: Registry,
    streams: RefCell<HashMap<Token, Interests>>,
    timers: RefCell<Vec<Rc<Timer>>>,
    running: Cell<bool>,
    next_token: Cell<usize>,
    poll_timeout: Duration,
}

impl Reactor {
    /// Creates a reactor waiting at most [`DEFAULT_POLL_TIMEOUT`] per cycle.
    ///
    /// # Errors
    ///
    /// Returns the OS error when the poll instance cannot be created.
    pub fn new() -> io::Result<Self> {
        Self::with_poll_timeout(DEFAULT_POLL_TIMEOUT)
    }

    /// Creates a reactor waiting at most `poll_timeout` per cycle.
    ///
    /// # Errors
    ///
    /// Returns the OS error when the poll instance cannot be created.
    pub fn with_poll_timeout(poll_timeout: Duration) -> io::Result<Self> {
        let poll = Poll::new()?;
        let registry = poll.registry().try_clone()?;
        Ok(Self {
            poll: RefCell::new(poll),
            events: RefCell::new(Events::with_capacity(EVENTS_CAPACITY)),
            registry,
            streams: RefCell::new(HashMap::new()),
            timers: RefCell::new(Vec::new()),
            running: Cell::new(false),
            next_token: Cell::new(0),
            poll_timeout,
        })
    }

    /// Allocates a token identifying a new source.
    pub fn next_token(&self) -> Token {
        let token = self.next_token.get();
        self.next_token.set(token.wrapping_add(1));
        Token(token)
    }

    /// Runs `callback` whenever `source` becomes readable.
    ///
    /// # Errors
    ///
    /// Returns the registration error; the callback is not kept in that case.
    pub fn await_readable<S>(&self, source: &mut S, token: Token, callback: StreamCallback) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        self.update_interest(source, token, |interests| interests.readable.push(callback))
    }

    /// Runs `callback` whenever `source` becomes writable.
    ///
    /// # Errors
    ///
    /// Returns the registration error; the callback is not kept in that case.
    pub fn await_writable<S>(&self, source: &mut S, token: Token, callback: StreamCallback) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        self.update_interest(source, token, |interests| interests.writable.push(callback))
    }

    /// Drops the writable callbacks of `token`, keeping its readable ones.
    ///
    /// # Errors
    ///
    /// Returns the re-registration error.
    pub fn clear_writable<S>(&self, source: &mut S, token: Token) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        self.update_interest(source, token, |interests| interests.writable.clear())
    }

    /// Drops every callback of `token` and deregisters `source`.
    pub fn remove_stream<S>(&self, source: &mut S, token: Token)
    where
        S: Source + ?Sized,
    {
        let removed = self.streams.borrow_mut().remove(&token);
        if removed.is_some_and(|interests| interests.interest().is_some())
            && let Err(e) = self.registry.deregister(source)
        {
            trace!(cause = %e, token = token.0, "failed to deregister stream");
        }
    }

    /// Registers and arms `timer`. Adding a timer twice has no effect.
    pub fn add_timer(&self, timer: &Rc<Timer>) {
        let mut timers = self.timers.borrow_mut();
        if !timers.iter().any(|registered| Rc::ptr_eq(registered, timer)) {
            timer.arm();
            timers.push(Rc::clone(timer));
        }
    }

    /// Disarms and unregisters `timer`. Removing an unknown timer has no effect.
    pub fn remove_timer(&self, timer: &Rc<Timer>) {
        timer.disarm();
        self.timers.borrow_mut().retain(|registered| !Rc::ptr_eq(registered, timer));
    }

    /// Cycles until [`stop`](Reactor::stop) is called.
    ///
    /// # Returns
    ///
    /// `false` without doing anything when the reactor is already running.
    pub fn run(&self) -> bool {
        if self.running.replace(true) {
            return false;
        }

        while self.running.get() {
            self.cycle();
        }
        true
    }

    /// Makes [`run`](Reactor::run) return after the current cycle.
    pub fn stop(&self) {
        self.running.set(false);
    }

    pub fn is_running(&self) -> bool {
        self.running.get()
    }

    /// Performs a single cycle: timers, one bounded poll, callback dispatch.
    pub fn cycle(&self) {
        let timers: Vec<Rc<Timer>> = self.timers.borrow().clone();
        for timer in &timers {
            if !timer.tick(self) {
                self.remove_timer(timer);
            }
        }

        for (token, readable, writable) in self.poll_ready(self.next_timeout()) {
            if readable {
                let callbacks = self.callbacks(token, |interests| &interests.readable);
                callbacks.iter().for_each(|callback| callback(self));
            }
            if writable {
                let callbacks = self.callbacks(token, |interests| &interests.writable);
                callbacks.iter().for_each(|callback| callback(self));
            }
        }
    }

    pub fn statistics(&self) -> Statistics {
        let streams = self.streams.borrow();
        Statistics {
            running: self.running.get(),
            timers: self.timers.borrow().len(),
            read_streams: streams.values().filter(|interests| !interests.readable.is_empty()).count(),
            write_streams: streams.values().filter(|interests| !interests.writable.is_empty()).count(),
        }
    }

    /// Drops every stream callback and timer.
    ///
    /// Callbacks commonly own the objects that own the reactor; clearing breaks those cycles
    /// once the loop is over.
    pub fn clear(&self) {
        let streams = self.streams.take();
        let timers = self.timers.take();
        timers.iter().for_each(|timer| timer.disarm());
        drop(streams);
    }

    fn next_timeout(&self) -> Duration {
        self.timers.borrow().iter().filter_map(|timer| timer.remaining()).fold(self.poll_timeout, Duration::min)
    }

    fn poll_ready(&self, timeout: Duration) -> Vec<(Token, bool, bool)> {
        let mut poll = self.poll.borrow_mut();
        let mut events = self.events.borrow_mut();

        if let Err(e) = poll.poll(&mut events, Some(timeout)) {
            if e.kind() == io::ErrorKind::Interrupted {
                trace!("poll interrupted");
            } else {
                warn!(cause = %e, "poll failed");
            }
            return Vec::new();
        }

        events
            .iter()
            .map(|event| {
                let readable = event.is_readable() || event.is_read_closed() || event.is_error();
                let writable = event.is_writable() || event.is_write_closed() || event.is_error();
                (event.token(), readable, writable)
            })
            .collect()
    }

    fn callbacks(&self, token: Token, select: impl Fn(&Interests) -> &Vec<StreamCallback>) -> Vec<StreamCallback> {
        self.streams.borrow().get(&token).map(|interests| select(interests).clone()).unwrap_or_default()
    }

    fn update_interest<S>(&self, source: &mut S, token: Token, update: impl FnOnce(&mut Interests)) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        let mut streams = self.streams.borrow_mut();
        let interests = streams.entry(token).or_default();

        let before = interests.interest();
        update(interests);
        let after = interests.interest();

        let result = match (before, after) {
            (None, Some(interest)) => self.registry.register(source, token, interest),
            (Some(old), Some(new)) if old != new => self.registry.reregister(source, token, new),
            (Some(_), None) => self.registry.deregister(source),
            _ => Ok(()),
        };

        if after.is_none() || (result.is_err() && before.is_none()) {
            streams.remove(&token);
        }
        result
    }
}

impl fmt::Debug for Reactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactor")
            .field("statistics", &self.statistics())
            .field("poll_timeout", &self.poll_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::net::{TcpListener, TcpStream};
    use std::io::Write;
    use std::net::SocketAddr;
    use std::time::Instant;

    fn reactor() -> Reactor {
        Reactor::with_poll_timeout(Duration::from_millis(20)).unwrap()
    }

    fn loopback_pair() -> (TcpListener, std::net::TcpStream) {
        let address: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let listener = TcpListener::bind(address).unwrap();
        let client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        (listener, client)
    }

    fn accept(listener: &TcpListener) -> TcpStream {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match listener.accept() {
                Ok((stream, _)) => return stream,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock && Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(e) => panic!("accept failed: {e}"),
            }
        }
    }

    fn cycle_until(reactor: &Reactor, done: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            reactor.cycle();
        }
    }

    #[test]
    fn test_timers_are_idempotent() {
        let reactor = reactor();
        let timer = Timer::every(Duration::from_secs(1), |_| {});

        reactor.add_timer(&timer);
        reactor.add_timer(&timer);
        assert_eq!(reactor.statistics().timers, 1);
        assert!(timer.is_armed());

        reactor.remove_timer(&timer);
        reactor.remove_timer(&timer);
        assert_eq!(reactor.statistics().timers, 0);
        assert!(!timer.is_armed());
    }

    #[test]
    fn test_timers_fire_in_registration_order() {
        let reactor = reactor();
        let fired = Rc::new(RefCell::new(Vec::new()));

        for name in ["first", "second", "third"] {
            let fired = Rc::clone(&fired);
            reactor.add_timer(&Timer::once(Duration::ZERO, move |_| fired.borrow_mut().push(name)));
        }

        reactor.cycle();
        assert_eq!(*fired.borrow(), vec!["first", "second", "third"]);
        assert_eq!(reactor.statistics().timers, 0);
    }

    #[test]
    fn test_timer_can_remove_itself() {
        let reactor = reactor();
        let fired = Rc::new(Cell::new(0));
        let slot: Rc<RefCell<Option<Rc<Timer>>>> = Rc::new(RefCell::new(None));

        let counter = Rc::clone(&fired);
        let this = Rc::clone(&slot);
        let timer = Timer::every(Duration::ZERO, move |reactor| {
            counter.set(counter.get() + 1);
            if let Some(timer) = this.borrow_mut().take() {
                reactor.remove_timer(&timer);
            }
        });
        *slot.borrow_mut() = Some(Rc::clone(&timer));

        reactor.add_timer(&timer);
        reactor.cycle();
        reactor.cycle();

        assert_eq!(fired.get(), 1);
        assert_eq!(reactor.statistics().timers, 0);
    }

    #[test]
    fn test_run_and_stop() {
        let reactor = reactor();
        let ticks = Rc::new(Cell::new(0));

        let counter = Rc::clone(&ticks);
        reactor.add_timer(&Timer::every(Duration::from_millis(1), move |reactor| {
            counter.set(counter.get() + 1);
            assert!(reactor.is_running());
            if counter.get() == 3 {
                reactor.stop();
            }
        }));

        assert!(reactor.run());
        assert_eq!(ticks.get(), 3);
        assert!(!reactor.is_running());
    }

    #[test]
    fn test_run_while_running_is_rejected() {
        let reactor = reactor();
        let nested = Rc::new(Cell::new(None));

        let result = Rc::clone(&nested);
        reactor.add_timer(&Timer::once(Duration::ZERO, move |reactor| {
            result.set(Some(reactor.run()));
            reactor.stop();
        }));

        assert!(reactor.run());
        assert_eq!(nested.get(), Some(false));
    }

    #[test]
    fn test_readable_dispatch() {
        let reactor = reactor();
        let (listener, mut client) = loopback_pair();
        let mut server = accept(&listener);
        let token = reactor.next_token();

        let order = Rc::new(RefCell::new(Vec::new()));
        for name in ["a", "b"] {
            let order = Rc::clone(&order);
            reactor.await_readable(&mut server, token, Rc::new(move |_| order.borrow_mut().push(name))).unwrap();
        }
        assert_eq!(reactor.statistics().read_streams, 1);

        client.write_all(b"ping").unwrap();
        cycle_until(&reactor, || !order.borrow().is_empty());
        assert_eq!(*order.borrow(), vec!["a", "b"]);

        reactor.remove_stream(&mut server, token);
        assert_eq!(reactor.statistics(), Statistics { running: false, timers: 0, read_streams: 0, write_streams: 0 });
    }

    #[test]
    fn test_writable_and_clear() {
        let reactor = reactor();
        let (listener, _client) = loopback_pair();
        let mut server = accept(&listener);
        let token = reactor.next_token();

        let writable = Rc::new(Cell::new(false));
        let flag = Rc::clone(&writable);
        reactor.await_readable(&mut server, token, Rc::new(|_| {})).unwrap();
        reactor.await_writable(&mut server, token, Rc::new(move |_| flag.set(true))).unwrap();
        assert_eq!(reactor.statistics().write_streams, 1);

        cycle_until(&reactor, || writable.get());

        reactor.clear_writable(&mut server, token).unwrap();
        let statistics = reactor.statistics();
        assert_eq!((statistics.read_streams, statistics.write_streams), (1, 0));
    }

    #[test]
    fn test_callback_removing_its_stream() {
        let reactor = Rc::new(reactor());
        let (listener, mut client) = loopback_pair();
        let server = Rc::new(RefCell::new(accept(&listener)));
        let token = reactor.next_token();

        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        let stream = Rc::clone(&server);
        reactor
            .await_readable(
                &mut *server.borrow_mut(),
                token,
                Rc::new(move |reactor| {
                    counter.set(counter.get() + 1);
                    reactor.remove_stream(&mut *stream.borrow_mut(), token);
                }),
            )
            .unwrap();

        client.write_all(b"ping").unwrap();
        cycle_until(&reactor, || calls.get() > 0);
        client.write_all(b"again").unwrap();
        reactor.cycle();
        reactor.cycle();

        assert_eq!(calls.get(), 1);
        assert_eq!(reactor.statistics().read_streams, 0);
    }

    #[test]
    fn test_clear() {
        let reactor = reactor();
        let timer = Timer::every(Duration::from_secs(1), |_| {});
        reactor.add_timer(&timer);

        reactor.clear();

        assert_eq!(reactor.statistics().timers, 0);
        assert!(!timer.is_armed());
    }
}
