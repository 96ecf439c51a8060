use crate::reactor::Reactor;
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant};

type TimerCallback = Box<dyn Fn(&Reactor)>;

/// A closure fired by the [`Reactor`] once `interval` has elapsed.
///
/// A timer is armed by [`Reactor::add_timer`] and disarmed by [`Reactor::remove_timer`].
/// Repeating timers re-arm themselves after firing, carrying over how late they fired so the
/// period does not drift; one-shot timers disarm and are dropped by the reactor.
pub struct Timer {
    interval: Duration,
    repeating: bool,
    callback: TimerCallback,
    started_at: Cell<Option<Instant>>,
}

impl Timer {
    pub fn new(interval: Duration, repeating: bool, callback: impl Fn(&Reactor) + 'static) -> Rc<Self> {
        Rc::new(Self { interval, repeating, callback: Box::new(callback), started_at: Cell::new(None) })
    }

    pub fn once(interval: Duration, callback: impl Fn(&Reactor) + 'static) -> Rc<Self> {
        Self::new(interval, false, callback)
    }

    pub fn every(interval: Duration, callback: impl Fn(&Reactor) + 'static) -> Rc<Self> {
        Self::new(interval, true, callback)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_repeating(&self) -> bool {
        self.repeating
    }

    pub fn is_armed(&self) -> bool {
        self.started_at.get().is_some()
    }

    /// Time left until the timer is due, `None` when disarmed.
    pub fn remaining(&self) -> Option<Duration> {
        self.started_at.get().map(|started_at| self.interval.saturating_sub(started_at.elapsed()))
    }

    /// Runs the callback immediately, regardless of the schedule.
    pub fn trigger(&self, reactor: &Reactor) {
        (self.callback)(reactor);
    }

    pub(crate) fn arm(&self) {
        self.started_at.set(Some(Instant::now()));
    }

    pub(crate) fn disarm(&self) {
        self.started_at.set(None);
    }

    /// Fires the callback when due. Returns whether the timer is still armed afterwards.
    pub(crate) fn tick(&self, reactor: &Reactor) -> bool {
        let Some(started_at) = self.started_at.get() else {
            return false;
        };

        let elapsed = started_at.elapsed();
        if elapsed < self.interval {
            return true;
        }

        if self.repeating {
            let late = self.carried_lateness(elapsed);
            let now = Instant::now();
            self.started_at.set(Some(now.checked_sub(late).unwrap_or(now)));
        } else {
            self.disarm();
        }

        self.trigger(reactor);
        self.is_armed()
    }

    /// How late the timer fired, reduced below one interval so a stall is not caught up on.
    fn carried_lateness(&self, elapsed: Duration) -> Duration {
        let interval = self.interval.as_nanos();
        if interval == 0 {
            return Duration::ZERO;
        }

        let late = elapsed.saturating_sub(self.interval).as_nanos() % interval;
        u64::try_from(late).map_or(Duration::ZERO, Duration::from_nanos)
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("interval", &self.interval)
            .field("repeating", &self.repeating)
            .field("started_at", &self.started_at.get())
            .finish_non_exhaustive()
    }
}
