use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Asks a running server to stop, from any thread.
///
/// The server polls the handle from its reactor, so a request takes effect within one poll
/// interval.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    requested: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// Consumes a pending request, returning whether there was one.
    pub(crate) fn take(&self) -> bool {
        self.requested.swap(false, Ordering::AcqRel)
    }
}
