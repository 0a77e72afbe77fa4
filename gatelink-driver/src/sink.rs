//! Capability traits the driver renders through.
//!
//! Surfaces are opaque addressable sinks: a signal lamp, 26 letter
//! indicators, 8 bit lights, text readouts, a glyph slot, a color overlay
//! and a waveform renderer. All methods are fire-and-forget; a sink with no
//! surface for a given call skips it silently so a missing indicator never
//! aborts the remaining sequence.

use std::time::Duration;

/// Oscillator shape for a tone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveshape {
    Square,
    Sine,
    Sawtooth,
}

/// Rest appearance of the glyph slot.
pub const GLYPH_REST: char = '_';
/// Rest appearance of the binary readout.
pub const BINARY_REST: &str = "00000000";

/// Visual surfaces driven by the pipeline.
pub trait IndicatorSink: Send {
    /// The single signal lamp (Morse).
    fn lamp(&mut self, on: bool);
    /// Exclusive letter indicator: at most one lit, `None` means all dark.
    fn letter(&mut self, letter: Option<char>);
    /// The 8 bit lights, most significant bit first.
    fn bits(&mut self, bits: [bool; 8]);
    /// Binary readout line.
    fn code_readout(&mut self, text: &str);
    /// Encoded-Morse readout line.
    fn morse_readout(&mut self, text: &str);
    /// Progressive decoded-text readout (receive side).
    fn decoded_readout(&mut self, text: &str);
    /// The glyph slot.
    fn glyph(&mut self, glyph: char);
    /// Color overlay: `Some(color)` activates it, `None` clears it.
    fn pulse(&mut self, color: Option<&str>);
    /// Target frequency of the waveform renderer; 0 is the idle flatline.
    fn waveform(&mut self, freq: f32);
    /// One-off oscilloscope spike on the receive side.
    fn scope_blip(&mut self);
}

/// Audio surface. Fire-and-forget, nothing is awaited.
pub trait AudioSink: Send {
    fn tone(&mut self, freq: f32, duration: Duration, shape: Waveshape);
    fn noise(&mut self, duration: Duration);
}

/// Indicator sink that does nothing. Useful when a context has no display
/// for a given role.
pub struct NullIndicator;

impl IndicatorSink for NullIndicator {
    fn lamp(&mut self, _on: bool) {}
    fn letter(&mut self, _letter: Option<char>) {}
    fn bits(&mut self, _bits: [bool; 8]) {}
    fn code_readout(&mut self, _text: &str) {}
    fn morse_readout(&mut self, _text: &str) {}
    fn decoded_readout(&mut self, _text: &str) {}
    fn glyph(&mut self, _glyph: char) {}
    fn pulse(&mut self, _color: Option<&str>) {}
    fn waveform(&mut self, _freq: f32) {}
    fn scope_blip(&mut self) {}
}

/// Audio sink that does nothing.
pub struct NullAudio;

impl AudioSink for NullAudio {
    fn tone(&mut self, _freq: f32, _duration: Duration, _shape: Waveshape) {}
    fn noise(&mut self, _duration: Duration) {}
}

/// Force every surface back to its rest appearance. Used on normal
/// completion and on the abort path alike.
pub fn reset_indicators(indicators: &mut dyn IndicatorSink) {
    indicators.lamp(false);
    indicators.letter(None);
    indicators.bits([false; 8]);
    indicators.code_readout(BINARY_REST);
    indicators.morse_readout("");
    indicators.glyph(GLYPH_REST);
    indicators.pulse(None);
    indicators.waveform(0.0);
}
