//! The transmission pipeline: a cooperative, cancelable, time-sequenced
//! driver that walks an encoded message and fires indicator/audio side
//! effects at mode-specific cadences, plus the symmetric receive presenter
//! that replays an incoming transmission.
//!
//! The driver never touches a rendering surface directly — it calls through
//! the [`sink`] capability traits, which keeps the whole state machine
//! testable without a UI.

pub mod cancel;
pub mod presenter;
pub mod receiver;
pub mod sink;
pub mod transmitter;

pub use cancel::{cancel_pair, CancelHandle, CancelToken, Interrupted};
pub use presenter::{present, DEFAULT_CADENCE};
pub use receiver::{HistoryEntry, ReceiveLoop, ReceiveSettings, Reply};
pub use sink::{reset_indicators, AudioSink, IndicatorSink, NullAudio, NullIndicator, Waveshape};
pub use transmitter::{unit_for_speed, TransmitError, Transmitter};

use std::sync::{Mutex, MutexGuard};

/// Lock that shrugs off poisoning: a panic inside a sink only affects
/// cosmetics, never the pipeline's state machine.
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
