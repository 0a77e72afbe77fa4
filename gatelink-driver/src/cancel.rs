//! Cooperative cancellation for in-flight transmissions.
//!
//! A transmission is a sequence of timed steps; cancellation is observed
//! between steps, never preemptively. The token pairs an atomic flag with a
//! wakeup channel so a pending wait unwinds as soon as the handle fires, and
//! a wait that begins after cancellation was requested never completes.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Distinguished control-flow outcome of a cancelled sequence.
///
/// Not a failure: the driver swallows it at the top level and only flips
/// back to idle.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("transmission interrupted")]
pub struct Interrupted;

/// Create a linked handle/token pair for one transmission.
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let flag = Arc::new(AtomicBool::new(false));
    let (wake_tx, wake_rx) = bounded(1);
    (
        CancelHandle {
            flag: Arc::clone(&flag),
            wake_tx,
        },
        CancelToken { flag, wake_rx },
    )
}

/// Raises cancellation. Held by whoever may abort the transmission.
#[derive(Clone)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
    wake_tx: Sender<()>,
}

impl CancelHandle {
    /// Request cancellation and wake any pending wait. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        let _ = self.wake_tx.try_send(());
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Observed by the running sequence between timed steps.
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    wake_rx: Receiver<()>,
}

impl CancelToken {
    /// Unwind if cancellation has been requested.
    pub fn check(&self) -> Result<(), Interrupted> {
        if self.flag.load(Ordering::SeqCst) {
            Err(Interrupted)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration`, unwinding immediately if cancellation was
    /// requested before the wait began or arrives while waiting.
    ///
    /// Every handle being dropped also counts as cancellation, so an
    /// orphaned sequence cannot keep driving side effects.
    pub fn wait(&self, duration: Duration) -> Result<(), Interrupted> {
        self.check()?;
        match self.wake_rx.recv_timeout(duration) {
            Ok(()) => Err(Interrupted),
            Err(RecvTimeoutError::Timeout) => self.check(),
            Err(RecvTimeoutError::Disconnected) => Err(Interrupted),
        }
    }
}
