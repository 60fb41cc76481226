//! Cooperative cancellation for the streaming loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared running flag of a streaming session.
///
/// Clones observe the same flag. Stopping prevents new flushes from starting
/// but never interrupts a backend call already in flight.
#[derive(Debug, Clone)]
pub struct StreamingContext {
    running: Arc<AtomicBool>,
}

impl StreamingContext {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Signal every holder of this context to stop.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

impl Default for StreamingContext {
    fn default() -> Self {
        Self::new()
    }
}
