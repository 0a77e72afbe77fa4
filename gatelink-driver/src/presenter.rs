//! The receiving half of the pipeline: replays an incoming message
//! character by character, purely visually, at a fixed cadence independent
//! of the sender's speed.

use crate::cancel::{CancelToken, Interrupted};
use crate::sink::IndicatorSink;
use gatelink_signal as signal;
use gatelink_signal::Mode;
use std::time::Duration;

/// Per-character delay when replaying an incoming transmission.
pub const DEFAULT_CADENCE: Duration = Duration::from_millis(300);

// Fixed micro-timing of the per-character Morse flash.
const RX_DOT: Duration = Duration::from_millis(100);
const RX_DASH: Duration = Duration::from_millis(250);
const RX_GAP: Duration = Duration::from_millis(50);

/// Replay `message` on the receive surfaces.
///
/// A missing or unrecognized mode falls back to the christmas-lights
/// presentation; `All` fans each character out to every surface before
/// advancing. Every character also blips the oscilloscope and extends the
/// progressive decoded readout.
pub fn present(
    message: &str,
    mode: Option<Mode>,
    cadence: Duration,
    indicators: &mut dyn IndicatorSink,
    token: &CancelToken,
) -> Result<(), Interrupted> {
    let mode = mode.unwrap_or(Mode::Christmas);
    let mut decoded = String::new();

    for ch in message.chars() {
        token.check()?;
        let upper = ch.to_ascii_uppercase();
        decoded.push(ch);
        indicators.decoded_readout(&decoded);

        if matches!(mode, Mode::Christmas | Mode::All) {
            // Non-letters have no bulb: everything goes dark for one beat.
            indicators.letter(signal::alphabet_index(upper).map(|_| upper));
        }
        if matches!(mode, Mode::Morse | Mode::All) {
            flash_morse(upper, indicators, token)?;
        }
        if matches!(mode, Mode::Binary | Mode::All) {
            let code = signal::to_binary(ch);
            let mut bits = [false; 8];
            for (i, bit) in code.chars().rev().take(8).enumerate() {
                bits[7 - i] = bit == '1';
            }
            indicators.code_readout(&code);
            indicators.bits(bits);
        }
        if matches!(mode, Mode::Glyphs | Mode::All) {
            indicators.glyph(signal::glyph_for(ch));
        }
        if matches!(mode, Mode::Pulse | Mode::All) {
            indicators.pulse(Some(signal::color_for(ch)));
        }
        indicators.scope_blip();

        token.wait(cadence)?;
    }
    Ok(())
}

/// Compressed per-character Morse flash used on the receive side.
fn flash_morse(
    ch: char,
    indicators: &mut dyn IndicatorSink,
    token: &CancelToken,
) -> Result<(), Interrupted> {
    let pattern = match signal::morse_for(ch) {
        Some(p) if p != "/" => p,
        _ => return Ok(()),
    };
    indicators.morse_readout(pattern);

    for symbol in pattern.chars() {
        let on = match symbol {
            '.' => RX_DOT,
            '-' => RX_DASH,
            _ => continue,
        };
        indicators.lamp(true);
        token.wait(on)?;
        indicators.lamp(false);
        token.wait(RX_GAP)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::cancel_pair;
    use std::sync::{Arc, Mutex};

    #[derive(Default, Clone)]
    struct Capture {
        decoded: Arc<Mutex<Vec<String>>>,
        letters: Arc<Mutex<Vec<Option<char>>>>,
        glyphs: Arc<Mutex<Vec<char>>>,
        codes: Arc<Mutex<Vec<String>>>,
        pulses: Arc<Mutex<Vec<Option<String>>>>,
        blips: Arc<Mutex<usize>>,
        lamps: Arc<Mutex<usize>>,
    }

    impl IndicatorSink for Capture {
        fn lamp(&mut self, on: bool) {
            if on {
                *self.lamps.lock().unwrap() += 1;
            }
        }
        fn letter(&mut self, letter: Option<char>) {
            self.letters.lock().unwrap().push(letter);
        }
        fn bits(&mut self, _bits: [bool; 8]) {}
        fn code_readout(&mut self, text: &str) {
            self.codes.lock().unwrap().push(text.to_string());
        }
        fn morse_readout(&mut self, _text: &str) {}
        fn decoded_readout(&mut self, text: &str) {
            self.decoded.lock().unwrap().push(text.to_string());
        }
        fn glyph(&mut self, glyph: char) {
            self.glyphs.lock().unwrap().push(glyph);
        }
        fn pulse(&mut self, color: Option<&str>) {
            self.pulses.lock().unwrap().push(color.map(str::to_string));
        }
        fn waveform(&mut self, _freq: f32) {}
        fn scope_blip(&mut self) {
            *self.blips.lock().unwrap() += 1;
        }
    }

    fn fast() -> Duration {
        Duration::from_millis(1)
    }

    #[test]
    fn decoded_readout_grows_per_character() {
        let mut capture = Capture::default();
        let (_handle, token) = cancel_pair();
        present("HI", Some(Mode::Glyphs), fast(), &mut capture, &token).unwrap();

        assert_eq!(*capture.decoded.lock().unwrap(), vec!["H", "HI"]);
        assert_eq!(*capture.glyphs.lock().unwrap(), vec!['ᚾ', 'ᛁ']);
        assert_eq!(*capture.blips.lock().unwrap(), 2);
    }

    #[test]
    fn missing_mode_falls_back_to_christmas() {
        let mut capture = Capture::default();
        let (_handle, token) = cancel_pair();
        present("A1", None, fast(), &mut capture, &token).unwrap();

        // '1' has no bulb: the indicator goes dark for that beat.
        assert_eq!(*capture.letters.lock().unwrap(), vec![Some('A'), None]);
        assert!(capture.glyphs.lock().unwrap().is_empty());
    }

    #[test]
    fn all_mode_fans_out_to_every_surface() {
        let mut capture = Capture::default();
        let (_handle, token) = cancel_pair();
        present("E", Some(Mode::All), fast(), &mut capture, &token).unwrap();

        assert_eq!(*capture.letters.lock().unwrap(), vec![Some('E')]);
        assert_eq!(*capture.glyphs.lock().unwrap(), vec!['ᚷ']);
        assert_eq!(capture.codes.lock().unwrap().len(), 1);
        assert_eq!(capture.pulses.lock().unwrap().len(), 1);
        // 'E' is a single dot.
        assert_eq!(*capture.lamps.lock().unwrap(), 1);
    }

    #[test]
    fn cancellation_stops_the_replay() {
        let mut capture = Capture::default();
        let (handle, token) = cancel_pair();
        handle.cancel();
        assert_eq!(
            present("LONG MESSAGE", Some(Mode::Pulse), fast(), &mut capture, &token),
            Err(Interrupted)
        );
        assert!(capture.decoded.lock().unwrap().is_empty());
    }
}
