//! Terminal renderings of the indicator and audio surfaces.
//!
//! Each surface becomes one line of output; the timing of the lines is the
//! animation. Quiet rest-state updates (lamp off, overlay cleared) print in
//! a dimmer register so the signal pattern stays readable.

use gatelink_driver::{AudioSink, IndicatorSink, Waveshape};
use std::time::Duration;

pub struct ConsoleIndicator {
    last_decoded: String,
}

impl ConsoleIndicator {
    pub fn new() -> Self {
        ConsoleIndicator {
            last_decoded: String::new(),
        }
    }
}

impl Default for ConsoleIndicator {
    fn default() -> Self {
        Self::new()
    }
}

impl IndicatorSink for ConsoleIndicator {
    fn lamp(&mut self, on: bool) {
        if on {
            println!("  ◉ LAMP");
        } else {
            println!("  · lamp");
        }
    }

    fn letter(&mut self, letter: Option<char>) {
        match letter {
            Some(letter) => println!("  ✶ lights: {}", letter),
            None => println!("  · lights dark"),
        }
    }

    fn bits(&mut self, bits: [bool; 8]) {
        let row: String = bits.iter().map(|b| if *b { '●' } else { '○' }).collect();
        println!("  {}", row);
    }

    fn code_readout(&mut self, text: &str) {
        println!("  bin [{}]", text);
    }

    fn morse_readout(&mut self, text: &str) {
        if !text.is_empty() {
            println!("  morse: {}", text);
        }
    }

    fn decoded_readout(&mut self, text: &str) {
        // Progressive readout: print only when something new arrived.
        if text != self.last_decoded {
            self.last_decoded = text.to_string();
            println!("  >> {}", text);
        }
    }

    fn glyph(&mut self, glyph: char) {
        println!("  ᛝ [{}]", glyph);
    }

    fn pulse(&mut self, color: Option<&str>) {
        match color {
            Some(color) => println!("  ▓ pulse {}", color),
            None => println!("  · pulse out"),
        }
    }

    fn waveform(&mut self, freq: f32) {
        if freq > 0.0 {
            println!("  ~ waveform {:.0} Hz", freq);
        } else {
            println!("  ~ flatline");
        }
    }

    fn scope_blip(&mut self) {
        println!("  ~^~");
    }
}

pub struct ConsoleAudio;

impl AudioSink for ConsoleAudio {
    fn tone(&mut self, freq: f32, duration: Duration, shape: Waveshape) {
        log::debug!(
            "tone {:.0} Hz for {} ms ({})",
            freq,
            duration.as_millis(),
            shape_name(shape)
        );
    }

    fn noise(&mut self, duration: Duration) {
        log::debug!("static burst for {} ms", duration.as_millis());
    }
}

fn shape_name(shape: Waveshape) -> &'static str {
    match shape {
        Waveshape::Square => "square",
        Waveshape::Sine => "sine",
        Waveshape::Sawtooth => "sawtooth",
    }
}
