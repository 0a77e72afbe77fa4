//! The sending half of the pipeline: a per-context state machine that turns
//! one message into a timed sequence of indicator/audio side effects.
//!
//! Lifecycle: idle → active on `transmit` → back to idle when the sequence
//! exhausts or cancellation unwinds it. Only one sequence may be in flight
//! per context; a re-entrant `transmit` aborts the current one and waits a
//! short grace period before starting over.

use crate::cancel::{cancel_pair, CancelHandle, CancelToken, Interrupted};
use crate::lock;
use crate::sink::{reset_indicators, AudioSink, IndicatorSink, Waveshape, BINARY_REST, GLYPH_REST};
use gatelink_channel::{Channel, Origin, RecordFilter, TransmissionRecord};
use gatelink_signal as signal;
use gatelink_signal::Mode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

/// Floor for the speed-derived timing unit.
pub const MIN_UNIT: Duration = Duration::from_millis(50);
/// Settling time between aborting an in-flight transmission and starting
/// the next one.
pub const RESTART_GRACE: Duration = Duration::from_millis(300);

const MORSE_TONE_HZ: f32 = 800.0;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TransmitError {
    /// Empty or whitespace-only input. Surfaced as a user warning by the
    /// caller; the driver state does not change.
    #[error("nothing to transmit")]
    EmptyMessage,
}

/// Base timing quantum: higher speed, smaller unit, faster playback.
/// Speed is clamped to 1..=5.
pub fn unit_for_speed(speed: u8) -> Duration {
    let speed = speed.clamp(1, 5) as u64;
    Duration::from_millis((6 - speed) * 100).max(MIN_UNIT)
}

struct Active {
    handle: CancelHandle,
    worker: JoinHandle<()>,
}

/// Per-context transmission driver.
pub struct Transmitter {
    origin: Origin,
    speed: u8,
    indicators: Arc<Mutex<dyn IndicatorSink>>,
    audio: Arc<Mutex<dyn AudioSink>>,
    channel: Box<dyn Channel>,
    active: Option<Active>,
    transmitting: Arc<AtomicBool>,
}

impl Transmitter {
    pub fn new(
        origin: Origin,
        indicators: Arc<Mutex<dyn IndicatorSink>>,
        audio: Arc<Mutex<dyn AudioSink>>,
        channel: Box<dyn Channel>,
    ) -> Self {
        Transmitter {
            origin,
            speed: 3,
            indicators,
            audio,
            channel,
            active: None,
            transmitting: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn speed(&self) -> u8 {
        self.speed
    }

    pub fn set_speed(&mut self, speed: u8) {
        self.speed = speed.clamp(1, 5);
    }

    pub fn is_transmitting(&self) -> bool {
        self.transmitting.load(Ordering::SeqCst)
    }

    /// Start transmitting `message` in `mode`.
    ///
    /// Broadcasts the record exactly once, then plays the mode sequence on a
    /// worker thread. If a transmission is already active it is aborted
    /// first and a grace period observed, so the request never queues and is
    /// never rejected for being re-entrant.
    pub fn transmit(&mut self, message: &str, mode: Mode) -> Result<(), TransmitError> {
        let message = message.trim().to_string();
        if message.is_empty() {
            return Err(TransmitError::EmptyMessage);
        }

        if self.is_transmitting() {
            self.abort();
            thread::sleep(RESTART_GRACE);
        }
        self.reap();

        let record = TransmissionRecord::new(&message, mode, self.speed, self.origin);
        if let Err(err) = self.channel.publish(&record) {
            // Local playback still proceeds; the other context just misses
            // this transmission.
            log::warn!("broadcast failed: {}", err);
        }

        let (handle, token) = cancel_pair();
        let unit = unit_for_speed(self.speed);
        let indicators = Arc::clone(&self.indicators);
        let audio = Arc::clone(&self.audio);
        let transmitting = Arc::clone(&self.transmitting);
        transmitting.store(true, Ordering::SeqCst);

        let worker = thread::spawn(move || {
            let outcome = {
                let mut indicators = lock(&indicators);
                let mut audio = lock(&audio);
                run_sequence(&message, mode, unit, &mut *indicators, &mut *audio, &token)
            };
            if outcome.is_err() {
                log::debug!("transmission interrupted");
            }
            reset_indicators(&mut *lock(&indicators));
            transmitting.store(false, Ordering::SeqCst);
        });

        self.active = Some(Active { handle, worker });
        Ok(())
    }

    /// Cooperatively cancel the in-flight sequence, if any, and force every
    /// indicator back to rest. No-op when idle; safe to call repeatedly.
    pub fn abort(&mut self) {
        if let Some(active) = self.active.take() {
            active.handle.cancel();
            let _ = active.worker.join();
        }
        reset_indicators(&mut *lock(&self.indicators));
    }

    /// Surface a record the far side wrote, if one is pending. The link is
    /// two-way, so the transmitting context also listens.
    ///
    /// Drains pushed notifications first and falls back to polling the slot,
    /// so poll-only transports still hear answers. The caller's filter
    /// suppresses own-origin records and already-seen ids.
    pub fn poll_incoming(&mut self, filter: &mut RecordFilter) -> Option<TransmissionRecord> {
        while let Ok(raw) = self.channel.notifications().try_recv() {
            if let Some(record) = filter.accept(&raw) {
                return Some(record);
            }
        }
        match self.channel.fetch() {
            Ok(Some(raw)) => filter.accept(&raw),
            Ok(None) => None,
            Err(err) => {
                log::debug!("slot poll failed: {}", err);
                None
            }
        }
    }

    /// Join a worker that already ran to completion.
    fn reap(&mut self) {
        if let Some(active) = self.active.take() {
            if active.worker.is_finished() {
                let _ = active.worker.join();
            } else {
                self.active = Some(active);
            }
        }
    }
}

impl Drop for Transmitter {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.handle.cancel();
            let _ = active.worker.join();
        }
    }
}

/// Dispatch one message through its mode's cadence.
pub fn run_sequence(
    message: &str,
    mode: Mode,
    unit: Duration,
    indicators: &mut dyn IndicatorSink,
    audio: &mut dyn AudioSink,
    token: &CancelToken,
) -> Result<(), Interrupted> {
    match mode {
        Mode::Morse => run_morse(message, unit, indicators, audio, token),
        Mode::Christmas => run_christmas(message, unit, indicators, audio, token),
        Mode::Binary => run_binary(message, unit, indicators, audio, token),
        Mode::Audio => run_audio(message, unit, indicators, audio, token),
        Mode::Glyphs => run_glyphs(message, unit, indicators, audio, token),
        Mode::Pulse => run_pulse(message, unit, indicators, audio, token),
        Mode::All => {
            // Receive-side presentation value; the record was still
            // broadcast, there is just nothing to play locally.
            log::debug!("no local sequence for mode 'all'");
            Ok(())
        }
    }
}

/// Morse: dot = lamp+tone for 1 unit then a 1 unit gap, dash = 3 units then
/// a 1 unit gap, 2 units between letters, 4 units between words.
pub fn run_morse(
    message: &str,
    unit: Duration,
    indicators: &mut dyn IndicatorSink,
    audio: &mut dyn AudioSink,
    token: &CancelToken,
) -> Result<(), Interrupted> {
    let morse = signal::to_morse(message);
    indicators.morse_readout(&morse);

    for ch in morse.chars() {
        token.check()?;
        match ch {
            '.' => {
                indicators.lamp(true);
                audio.tone(MORSE_TONE_HZ, unit, Waveshape::Square);
                token.wait(unit)?;
                indicators.lamp(false);
                token.wait(unit)?;
            }
            '-' => {
                indicators.lamp(true);
                audio.tone(MORSE_TONE_HZ, unit * 3, Waveshape::Square);
                token.wait(unit * 3)?;
                indicators.lamp(false);
                token.wait(unit)?;
            }
            ' ' => token.wait(unit * 2)?,
            '/' => token.wait(unit * 4)?,
            _ => {}
        }
    }
    Ok(())
}

/// Christmas lights: exactly one letter indicator lit at a time, held for
/// 3 units, tone pitch derived from the alphabet index.
pub fn run_christmas(
    message: &str,
    unit: Duration,
    indicators: &mut dyn IndicatorSink,
    audio: &mut dyn AudioSink,
    token: &CancelToken,
) -> Result<(), Interrupted> {
    let sequence = signal::to_alphabet_sequence(message);
    let hold = unit * 3;

    for step in sequence {
        token.check()?;
        indicators.letter(Some(step.letter));
        audio.tone(
            300.0 + step.index as f32 * 30.0,
            Duration::from_millis(150),
            Waveshape::Square,
        );
        token.wait(hold)?;
    }
    indicators.letter(None);
    Ok(())
}

/// Binary: show each 8-bit code as text and bit lights, one tone per byte
/// with pitch `200 + value * 2`, held for 2 units.
pub fn run_binary(
    message: &str,
    unit: Duration,
    indicators: &mut dyn IndicatorSink,
    audio: &mut dyn AudioSink,
    token: &CancelToken,
) -> Result<(), Interrupted> {
    let codes = signal::to_binary_sequence(message);
    let hold = unit * 2;

    for code in codes {
        token.check()?;
        indicators.code_readout(&code);

        // Code points above 255 encode wider than 8 bits; only the low byte
        // has lights.
        let mut bits = [false; 8];
        for (i, bit) in code.chars().rev().take(8).enumerate() {
            bits[7 - i] = bit == '1';
        }
        indicators.bits(bits);

        let value = u32::from_str_radix(&code, 2).unwrap_or(0);
        audio.tone(
            200.0 + value as f32 * 2.0,
            Duration::from_millis(100),
            Waveshape::Square,
        );
        token.wait(hold)?;
    }
    indicators.bits([false; 8]);
    indicators.code_readout(BINARY_REST);
    Ok(())
}

/// Audio waveform: one tone per character frequency while the waveform
/// renderer tracks it; tone ends slightly before the hold to avoid overlap.
pub fn run_audio(
    message: &str,
    unit: Duration,
    indicators: &mut dyn IndicatorSink,
    audio: &mut dyn AudioSink,
    token: &CancelToken,
) -> Result<(), Interrupted> {
    let frequencies = signal::to_frequencies(message);
    let hold = unit * 2;
    let tone_len = hold.saturating_sub(Duration::from_millis(50));

    for freq in frequencies {
        token.check()?;
        audio.tone(freq, tone_len, Waveshape::Square);
        indicators.waveform(freq);
        token.wait(hold)?;
    }
    indicators.waveform(0.0);
    Ok(())
}

/// Glyphs: one symbol at a time with a minimum hold floor, tone pitch
/// rising with position.
pub fn run_glyphs(
    message: &str,
    unit: Duration,
    indicators: &mut dyn IndicatorSink,
    audio: &mut dyn AudioSink,
    token: &CancelToken,
) -> Result<(), Interrupted> {
    let glyphs = signal::to_glyphs(message);
    let hold = (unit * 4).max(Duration::from_millis(200));

    for (i, glyph) in glyphs.chars().enumerate() {
        token.check()?;
        indicators.glyph(glyph);
        audio.tone(
            150.0 + i as f32 * 10.0,
            Duration::from_millis(200),
            Waveshape::Square,
        );
        token.wait(hold)?;
    }
    indicators.glyph(GLYPH_REST);
    Ok(())
}

/// Color pulse: overlay per character with a fixed low rumble and a short
/// gap between pulses.
pub fn run_pulse(
    message: &str,
    unit: Duration,
    indicators: &mut dyn IndicatorSink,
    audio: &mut dyn AudioSink,
    token: &CancelToken,
) -> Result<(), Interrupted> {
    let colors = signal::to_color_pulse(message);
    let hold = unit * 5;

    for color in colors {
        token.check()?;
        indicators.pulse(Some(color));
        audio.tone(50.0, Duration::from_millis(300), Waveshape::Square);
        token.wait(hold)?;
        indicators.pulse(None);
        token.wait(Duration::from_millis(100))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{NullAudio, NullIndicator};
    use gatelink_channel::MemoryChannel;

    #[derive(Debug, Clone, PartialEq)]
    pub enum Event {
        Lamp(bool),
        Letter(Option<char>),
        Bits([bool; 8]),
        Code(String),
        MorseText(String),
        Decoded(String),
        Glyph(char),
        Pulse(Option<String>),
        Waveform(u32),
        Blip,
        Tone(u32),
    }

    /// Captures every sink call for assertions; clones share the log.
    #[derive(Clone, Default)]
    pub struct Recorder {
        pub events: Arc<Mutex<Vec<Event>>>,
    }

    impl Recorder {
        fn push(&self, event: Event) {
            self.events.lock().unwrap().push(event);
        }

        pub fn events(&self) -> Vec<Event> {
            self.events.lock().unwrap().clone()
        }
    }

    impl IndicatorSink for Recorder {
        fn lamp(&mut self, on: bool) {
            self.push(Event::Lamp(on));
        }
        fn letter(&mut self, letter: Option<char>) {
            self.push(Event::Letter(letter));
        }
        fn bits(&mut self, bits: [bool; 8]) {
            self.push(Event::Bits(bits));
        }
        fn code_readout(&mut self, text: &str) {
            self.push(Event::Code(text.to_string()));
        }
        fn morse_readout(&mut self, text: &str) {
            self.push(Event::MorseText(text.to_string()));
        }
        fn decoded_readout(&mut self, text: &str) {
            self.push(Event::Decoded(text.to_string()));
        }
        fn glyph(&mut self, glyph: char) {
            self.push(Event::Glyph(glyph));
        }
        fn pulse(&mut self, color: Option<&str>) {
            self.push(Event::Pulse(color.map(str::to_string)));
        }
        fn waveform(&mut self, freq: f32) {
            self.push(Event::Waveform(freq as u32));
        }
        fn scope_blip(&mut self) {
            self.push(Event::Blip);
        }
    }

    impl AudioSink for Recorder {
        fn tone(&mut self, freq: f32, _duration: Duration, _shape: Waveshape) {
            self.push(Event::Tone(freq as u32));
        }
        fn noise(&mut self, _duration: Duration) {}
    }

    fn fast_unit() -> Duration {
        Duration::from_millis(1)
    }

    #[test]
    fn unit_scales_inversely_with_speed() {
        assert_eq!(unit_for_speed(1), Duration::from_millis(500));
        assert_eq!(unit_for_speed(3), Duration::from_millis(300));
        assert_eq!(unit_for_speed(5), Duration::from_millis(100));
        // Out-of-range speeds clamp instead of under/overflowing.
        assert_eq!(unit_for_speed(0), Duration::from_millis(500));
        assert_eq!(unit_for_speed(9), Duration::from_millis(100));
    }

    #[test]
    fn morse_sos_emits_nine_signals_in_order() {
        let mut recorder = Recorder::default();
        let mut audio = recorder.clone();
        let (_handle, token) = cancel_pair();

        run_morse("SOS", fast_unit(), &mut recorder, &mut audio, &token).unwrap();

        let events = recorder.events();
        assert_eq!(events[0], Event::MorseText("... --- ...".to_string()));

        let tones: Vec<&Event> = events.iter().filter(|e| matches!(e, Event::Tone(_))).collect();
        assert_eq!(tones.len(), 9);
        assert!(tones.iter().all(|t| **t == Event::Tone(800)));

        let lamp_ons = events.iter().filter(|e| **e == Event::Lamp(true)).count();
        let lamp_offs = events.iter().filter(|e| **e == Event::Lamp(false)).count();
        assert_eq!(lamp_ons, 9);
        assert_eq!(lamp_offs, 9);
    }

    #[test]
    fn binary_hi_shows_codes_and_tones() {
        let mut recorder = Recorder::default();
        let mut audio = recorder.clone();
        let (_handle, token) = cancel_pair();

        run_binary("HI", fast_unit(), &mut recorder, &mut audio, &token).unwrap();

        let events = recorder.events();
        let codes: Vec<&Event> = events.iter().filter(|e| matches!(e, Event::Code(_))).collect();
        assert_eq!(
            codes,
            vec![
                &Event::Code("01001000".to_string()),
                &Event::Code("01001001".to_string()),
                &Event::Code(BINARY_REST.to_string()),
            ]
        );

        // 'H' = 72 -> 200 + 144; 'I' = 73 -> 200 + 146.
        let tones: Vec<&Event> = events.iter().filter(|e| matches!(e, Event::Tone(_))).collect();
        assert_eq!(tones, vec![&Event::Tone(344), &Event::Tone(346)]);
    }

    #[test]
    fn christmas_lights_one_letter_at_a_time_then_dark() {
        let mut recorder = Recorder::default();
        let mut audio = recorder.clone();
        let (_handle, token) = cancel_pair();

        run_christmas("AB1", fast_unit(), &mut recorder, &mut audio, &token).unwrap();

        let letters: Vec<Event> = recorder
            .events()
            .into_iter()
            .filter(|e| matches!(e, Event::Letter(_)))
            .collect();
        assert_eq!(
            letters,
            vec![
                Event::Letter(Some('A')),
                Event::Letter(Some('B')),
                Event::Letter(None),
            ]
        );
    }

    #[test]
    fn audio_mode_resets_waveform_to_flatline() {
        let mut recorder = Recorder::default();
        let mut audio = recorder.clone();
        let (_handle, token) = cancel_pair();

        run_audio("AZ", fast_unit(), &mut recorder, &mut audio, &token).unwrap();

        let waves: Vec<Event> = recorder
            .events()
            .into_iter()
            .filter(|e| matches!(e, Event::Waveform(_)))
            .collect();
        assert_eq!(waves.len(), 3);
        assert_eq!(waves.last(), Some(&Event::Waveform(0)));
    }

    #[test]
    fn cancelled_sequence_performs_no_side_effects() {
        let mut recorder = Recorder::default();
        let mut audio = recorder.clone();
        let (handle, token) = cancel_pair();
        handle.cancel();

        assert_eq!(
            run_morse("SOS", fast_unit(), &mut recorder, &mut audio, &token),
            Err(Interrupted)
        );
        // Only the readout precedes the first cancellation check.
        let events = recorder.events();
        assert!(events.iter().all(|e| matches!(e, Event::MorseText(_))));
    }

    fn test_transmitter(recorder: &Recorder) -> Transmitter {
        let hub = MemoryChannel::new();
        Transmitter::new(
            Origin::Sender,
            Arc::new(Mutex::new(recorder.clone())),
            Arc::new(Mutex::new(recorder.clone())),
            Box::new(hub.attach()),
        )
    }

    #[test]
    fn abort_on_idle_is_a_no_op() {
        let recorder = Recorder::default();
        let mut tx = test_transmitter(&recorder);
        assert!(!tx.is_transmitting());
        tx.abort();
        tx.abort();
        assert!(!tx.is_transmitting());
    }

    #[test]
    fn empty_message_is_rejected_without_state_change() {
        let recorder = Recorder::default();
        let mut tx = test_transmitter(&recorder);
        assert_eq!(tx.transmit("   ", Mode::Morse), Err(TransmitError::EmptyMessage));
        assert!(!tx.is_transmitting());
        assert!(recorder.events().is_empty());
    }

    #[test]
    fn double_abort_leaves_idle_with_indicators_at_rest() {
        let recorder = Recorder::default();
        let mut tx = test_transmitter(&recorder);
        tx.set_speed(1); // Slow enough that the abort lands mid-sequence.
        tx.transmit("STRANGER THINGS", Mode::Morse).unwrap();
        thread::sleep(Duration::from_millis(50));

        tx.abort();
        tx.abort();
        assert!(!tx.is_transmitting());

        // The tail of the event log is the reset routine.
        let events = recorder.events();
        let tail_start = events
            .iter()
            .rposition(|e| *e == Event::Code(BINARY_REST.to_string()))
            .expect("reset ran");
        assert!(events[tail_start..].contains(&Event::Glyph(GLYPH_REST)));
        assert!(events[tail_start..].contains(&Event::Pulse(None)));
        assert!(events.iter().rev().any(|e| *e == Event::Lamp(false)));
    }

    #[test]
    fn completed_transmission_returns_to_idle() {
        let recorder = Recorder::default();
        let mut tx = test_transmitter(&recorder);
        tx.set_speed(5);
        tx.transmit("E", Mode::Glyphs).unwrap();

        // 'E' is a single glyph: one 200 ms hold plus the reset.
        for _ in 0..100 {
            if !tx.is_transmitting() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(!tx.is_transmitting());

        let events = recorder.events();
        assert!(events.contains(&Event::Glyph('ᚷ')));
        assert_eq!(events.last(), Some(&Event::Waveform(0)));
    }

    #[test]
    fn poll_incoming_surfaces_far_side_records_once() {
        let recorder = Recorder::default();
        let hub = MemoryChannel::new();
        let mut tx = Transmitter::new(
            Origin::Sender,
            Arc::new(Mutex::new(recorder.clone())),
            Arc::new(Mutex::new(recorder.clone())),
            Box::new(hub.attach()),
        );
        let mut incoming = RecordFilter::new(Origin::Sender);

        let mut far_side = hub.attach();
        far_side
            .publish(&TransmissionRecord::new(
                "GET OUT",
                Mode::Christmas,
                3,
                Origin::Receiver,
            ))
            .unwrap();

        let record = tx.poll_incoming(&mut incoming).expect("far-side record");
        assert_eq!(record.message, "GET OUT");
        assert_eq!(record.sender, Origin::Receiver);
        // The same id is never surfaced twice.
        assert!(tx.poll_incoming(&mut incoming).is_none());
    }

    #[test]
    fn poll_incoming_ignores_own_transmissions() {
        let recorder = Recorder::default();
        let mut tx = test_transmitter(&recorder);
        let mut incoming = RecordFilter::new(Origin::Sender);

        tx.set_speed(5);
        tx.transmit("E", Mode::Glyphs).unwrap();

        // The slot now holds this context's own record.
        assert!(tx.poll_incoming(&mut incoming).is_none());
    }

    #[test]
    fn null_sinks_accept_everything() {
        let (_handle, token) = cancel_pair();
        let mut ind = NullIndicator;
        let mut audio = NullAudio;
        run_sequence("OK", Mode::Pulse, fast_unit(), &mut ind, &mut audio, &token).unwrap();
    }
}
