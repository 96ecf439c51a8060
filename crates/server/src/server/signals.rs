//! Delivery of process signals to the reactor thread.
//!
//! Signals are recorded by `signal-hook` and read by the server's poller timer, so they are
//! handled between two reactor callbacks rather than inside the OS signal handler.

pub(crate) use imp::{SignalWatcher, is_shutdown_signal};

#[cfg(unix)]
mod imp {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;
    use std::io;

    pub(crate) fn is_shutdown_signal(signal: i32) -> bool {
        matches!(signal, SIGINT | SIGTERM)
    }

    pub(crate) struct SignalWatcher {
        signals: Signals,
    }

    impl SignalWatcher {
        pub(crate) fn install() -> io::Result<Self> {
            Ok(Self { signals: Signals::new([SIGINT, SIGTERM])? })
        }

        /// Signals received since the last call.
        pub(crate) fn pending(&mut self) -> Vec<i32> {
            self.signals.pending().collect()
        }
    }

    impl Drop for SignalWatcher {
        fn drop(&mut self) {
            self.signals.handle().close();
        }
    }
}

#[cfg(not(unix))]
mod imp {
    use std::io;

    pub(crate) fn is_shutdown_signal(_signal: i32) -> bool {
        false
    }

    pub(crate) struct SignalWatcher;

    impl SignalWatcher {
        pub(crate) fn install() -> io::Result<Self> {
            Err(io::Error::new(io::ErrorKind::Unsupported, "signal handling is not supported on this platform"))
        }

        pub(crate) fn pending(&mut self) -> Vec<i32> {
            Vec::new()
        }
    }
}
