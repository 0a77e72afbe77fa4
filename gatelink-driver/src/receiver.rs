//! The receive loop: watches the broadcast channel and replays every
//! accepted transmission through the presenter.
//!
//! Change notifications can be delayed, coalesced or lost entirely, so the
//! loop also polls the slot on a fixed interval. De-duplication and
//! own-origin filtering are delegated to [`RecordFilter`].

use crate::cancel::CancelToken;
use crate::lock;
use crate::presenter::{present, DEFAULT_CADENCE};
use crate::sink::{reset_indicators, AudioSink, IndicatorSink};
use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use gatelink_channel::{Channel, Origin, RecordFilter, TransmissionRecord};
use gatelink_signal::Mode;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Tuning for the receive context.
#[derive(Debug, Clone)]
pub struct ReceiveSettings {
    /// How often to poll the slot when no notification arrives.
    pub poll_interval: Duration,
    /// Per-character replay delay.
    pub cadence: Duration,
    /// Capped history length, newest first.
    pub history_limit: usize,
}

/// Static burst announcing an incoming transmission.
const ARRIVAL_STATIC: Duration = Duration::from_millis(500);

/// Speed tag stamped on answers; the receive side has no speed control.
const REPLY_SPEED: u8 = 3;

/// A message this context sends back through the channel. The link is
/// two-way: either context may author a transmission.
#[derive(Debug, Clone)]
pub struct Reply {
    pub message: String,
    pub mode: Mode,
}

impl Default for ReceiveSettings {
    fn default() -> Self {
        ReceiveSettings {
            poll_interval: Duration::from_millis(500),
            cadence: DEFAULT_CADENCE,
            history_limit: 10,
        }
    }
}

/// One fully replayed transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub received_at: DateTime<Utc>,
    pub message: String,
}

/// Receiving context: owns a channel endpoint and drives the presenter.
pub struct ReceiveLoop {
    channel: Box<dyn Channel>,
    origin: Origin,
    filter: RecordFilter,
    settings: ReceiveSettings,
    indicators: Arc<Mutex<dyn IndicatorSink>>,
    audio: Arc<Mutex<dyn AudioSink>>,
    history: Vec<HistoryEntry>,
    reply_tx: Sender<Reply>,
    reply_rx: Receiver<Reply>,
}

impl ReceiveLoop {
    pub fn new(
        channel: Box<dyn Channel>,
        origin: Origin,
        settings: ReceiveSettings,
        indicators: Arc<Mutex<dyn IndicatorSink>>,
        audio: Arc<Mutex<dyn AudioSink>>,
    ) -> Self {
        let (reply_tx, reply_rx) = crossbeam_channel::unbounded();
        ReceiveLoop {
            channel,
            origin,
            filter: RecordFilter::new(origin),
            settings,
            indicators,
            audio,
            history: Vec::new(),
            reply_tx,
            reply_rx,
        }
    }

    /// Replayed transmissions, newest first.
    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    /// Handle for queueing answers from another thread; the loop publishes
    /// them with this context's own origin tag.
    pub fn reply_sender(&self) -> Sender<Reply> {
        self.reply_tx.clone()
    }

    /// Watch the channel until the token is cancelled. Indicators are left
    /// at rest on the way out.
    pub fn run(&mut self, token: &CancelToken) {
        while token.check().is_ok() {
            while let Ok(reply) = self.reply_rx.try_recv() {
                self.send_reply(reply);
            }

            let raw = match self
                .channel
                .notifications()
                .recv_timeout(self.settings.poll_interval)
            {
                Ok(raw) => Some(raw),
                Err(RecvTimeoutError::Timeout) => self.poll_slot(),
                Err(RecvTimeoutError::Disconnected) => {
                    // Poll-only transport: pace the loop ourselves.
                    let raw = self.poll_slot();
                    if token.wait(self.settings.poll_interval).is_err() {
                        break;
                    }
                    raw
                }
            };

            if let Some(raw) = raw {
                if let Some(record) = self.filter.accept(&raw) {
                    self.replay(record, token);
                }
            }
        }
        reset_indicators(&mut *lock(&self.indicators));
    }

    fn send_reply(&mut self, reply: Reply) {
        let record = TransmissionRecord::new(&reply.message, reply.mode, REPLY_SPEED, self.origin);
        if let Err(err) = self.channel.publish(&record) {
            log::warn!("answer broadcast failed: {}", err);
        }
    }

    fn poll_slot(&mut self) -> Option<String> {
        match self.channel.fetch() {
            Ok(value) => value,
            Err(err) => {
                log::debug!("slot poll failed: {}", err);
                None
            }
        }
    }

    fn replay(&mut self, record: TransmissionRecord, token: &CancelToken) {
        log::info!(
            "incoming transmission: {} chars, mode {}",
            record.message.chars().count(),
            record.mode.map(|m| m.name()).unwrap_or("unknown"),
        );
        lock(&self.audio).noise(ARRIVAL_STATIC);

        let outcome = {
            let mut indicators = lock(&self.indicators);
            present(
                &record.message,
                record.mode,
                self.settings.cadence,
                &mut *indicators,
                token,
            )
        };
        if outcome.is_err() {
            // Shutdown mid-replay; drop it without recording history.
            return;
        }

        self.history.insert(
            0,
            HistoryEntry {
                received_at: Utc::now(),
                message: record.message,
            },
        );
        self.history.truncate(self.settings.history_limit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::cancel_pair;
    use crate::sink::{NullAudio, NullIndicator};
    use gatelink_channel::{MemoryChannel, TransmissionRecord};
    use gatelink_signal::Mode;

    fn fast_settings() -> ReceiveSettings {
        ReceiveSettings {
            poll_interval: Duration::from_millis(20),
            cadence: Duration::from_millis(1),
            history_limit: 3,
        }
    }

    #[test]
    fn history_is_capped_and_newest_first() {
        let hub = MemoryChannel::new();
        let mut rx = ReceiveLoop::new(
            Box::new(hub.attach()),
            Origin::Receiver,
            fast_settings(),
            Arc::new(Mutex::new(NullIndicator)),
            Arc::new(Mutex::new(NullAudio)),
        );
        let (_handle, token) = cancel_pair();

        for msg in ["ONE", "TWO", "THREE", "FOUR"] {
            let record = TransmissionRecord::new(msg, Mode::Glyphs, 3, Origin::Sender);
            rx.replay(record, &token);
        }

        let messages: Vec<&str> = rx.history().iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["FOUR", "THREE", "TWO"]);
    }

    #[test]
    fn interrupted_replay_is_not_recorded() {
        let hub = MemoryChannel::new();
        let mut rx = ReceiveLoop::new(
            Box::new(hub.attach()),
            Origin::Receiver,
            fast_settings(),
            Arc::new(Mutex::new(NullIndicator)),
            Arc::new(Mutex::new(NullAudio)),
        );
        let (handle, token) = cancel_pair();
        handle.cancel();

        let record = TransmissionRecord::new("LOST", Mode::Binary, 3, Origin::Sender);
        rx.replay(record, &token);
        assert!(rx.history().is_empty());
    }
}
