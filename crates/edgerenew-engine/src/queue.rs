//! In-process task queue
//!
//! A single shared broker channel drained by worker tasks. Enqueueing is
//! non-blocking; workers pull units one at a time, so suspension only
//! happens at unit boundaries.

use tokio::sync::mpsc;

use crate::pipeline::QueuedUnit;
use crate::EngineError;

/// Sending half of the queue, cloned into the scheduler and the driver.
#[derive(Clone)]
pub struct TaskQueue {
    tx: mpsc::UnboundedSender<QueuedUnit>,
}

impl TaskQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<QueuedUnit>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn enqueue(&self, unit: QueuedUnit) -> Result<(), EngineError> {
        self.tx.send(unit).map_err(|_| EngineError::QueueClosed)
    }
}
