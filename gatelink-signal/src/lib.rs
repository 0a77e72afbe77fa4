//! Pure signal encoders for the gatelink communicator.
//!
//! Every function here is stateless and deterministic (the one exception is
//! [`corrupt_message`], which is explicitly randomized). The transmission
//! driver and receive presenter consume these encodings; nothing in this
//! crate performs I/O.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Signal representation chosen for a transmission.
///
/// `All` is a receive-side convenience: a record carrying it fans each
/// character out to every visual subsystem at once. The sender never runs a
/// local sequence for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Morse,
    Christmas,
    Binary,
    Audio,
    Glyphs,
    Pulse,
    All,
}

impl Mode {
    /// Parse a user-facing mode name, as typed at the runner prompt.
    pub fn parse(name: &str) -> Option<Mode> {
        match name.trim().to_ascii_lowercase().as_str() {
            "morse" => Some(Mode::Morse),
            "christmas" => Some(Mode::Christmas),
            "binary" => Some(Mode::Binary),
            "audio" => Some(Mode::Audio),
            "glyphs" => Some(Mode::Glyphs),
            "pulse" => Some(Mode::Pulse),
            "all" => Some(Mode::All),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Mode::Morse => "morse",
            Mode::Christmas => "christmas",
            Mode::Binary => "binary",
            Mode::Audio => "audio",
            Mode::Glyphs => "glyphs",
            Mode::Pulse => "pulse",
            Mode::All => "all",
        }
    }
}

/// Dot/dash pattern for a single character, or `None` for unsupported input.
pub fn morse_for(ch: char) -> Option<&'static str> {
    let pattern = match ch.to_ascii_uppercase() {
        'A' => ".-",
        'B' => "-...",
        'C' => "-.-.",
        'D' => "-..",
        'E' => ".",
        'F' => "..-.",
        'G' => "--.",
        'H' => "....",
        'I' => "..",
        'J' => ".---",
        'K' => "-.-",
        'L' => ".-..",
        'M' => "--",
        'N' => "-.",
        'O' => "---",
        'P' => ".--.",
        'Q' => "--.-",
        'R' => ".-.",
        'S' => "...",
        'T' => "-",
        'U' => "..-",
        'V' => "...-",
        'W' => ".--",
        'X' => "-..-",
        'Y' => "-.--",
        'Z' => "--..",
        '0' => "-----",
        '1' => ".----",
        '2' => "..---",
        '3' => "...--",
        '4' => "....-",
        '5' => ".....",
        '6' => "-....",
        '7' => "--...",
        '8' => "---..",
        '9' => "----.",
        ' ' => "/",
        _ => return None,
    };
    Some(pattern)
}

/// Encode a whole message to Morse. Characters join with one space, words
/// with the `/` separator; unsupported characters contribute an empty string.
pub fn to_morse(message: &str) -> String {
    message
        .chars()
        .map(|ch| morse_for(ch).unwrap_or(""))
        .collect::<Vec<_>>()
        .join(" ")
}

/// 8-bit zero-padded binary of the uppercased character's code point.
/// Exactly 8 digits for codes 0-255; wider code points keep all their bits.
pub fn to_binary(ch: char) -> String {
    let code = ch.to_ascii_uppercase() as u32;
    format!("{:08b}", code)
}

/// Per-character binary codes for a whole message.
pub fn to_binary_sequence(message: &str) -> Vec<String> {
    message.chars().map(to_binary).collect()
}

/// 0-based index within A-Z after uppercasing, or `None` for non-letters.
pub fn alphabet_index(ch: char) -> Option<u8> {
    let upper = ch.to_ascii_uppercase();
    if upper.is_ascii_uppercase() {
        Some(upper as u8 - b'A')
    } else {
        None
    }
}

/// One step of the christmas-lights sequence: which indicator to light and
/// its position in the alphabet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LetterStep {
    pub letter: char,
    pub index: u8,
}

/// Letters of the message with their alphabet indices; non-letters dropped.
pub fn to_alphabet_sequence(message: &str) -> Vec<LetterStep> {
    message
        .chars()
        .filter_map(|ch| {
            alphabet_index(ch).map(|index| LetterStep {
                letter: ch.to_ascii_uppercase(),
                index,
            })
        })
        .collect()
}

const BASE_FREQ: f32 = 200.0;
const FREQ_RANGE: f32 = 600.0;

/// Audible frequency for one character: base 200 Hz plus a fraction of the
/// 600 Hz range picked by the code point modulo 26.
pub fn frequency_for(ch: char) -> f32 {
    let code = ch.to_ascii_uppercase() as u32;
    BASE_FREQ + ((code % 26) as f32 / 26.0) * FREQ_RANGE
}

/// Frequency list for a whole message.
pub fn to_frequencies(message: &str) -> Vec<f32> {
    message.chars().map(frequency_for).collect()
}

/// Rune/symbol substitute for a character; unmapped input passes through.
pub fn glyph_for(ch: char) -> char {
    match ch.to_ascii_uppercase() {
        'A' => 'ᚠ',
        'B' => 'ᚦ',
        'C' => 'ᚱ',
        'D' => 'ᚲ',
        'E' => 'ᚷ',
        'F' => 'ᚹ',
        'G' => 'ᚻ',
        'H' => 'ᚾ',
        'I' => 'ᛁ',
        'J' => 'ᛄ',
        'K' => 'ᛈ',
        'L' => 'ᛇ',
        'M' => 'ᛉ',
        'N' => 'ᛊ',
        'O' => 'ᛏ',
        'P' => 'ᛒ',
        'Q' => 'ᛖ',
        'R' => 'ᛗ',
        'S' => 'ᛚ',
        'T' => 'ᛜ',
        'U' => 'ᛟ',
        'V' => 'ᛑ',
        'W' => 'ᚫ',
        'X' => 'ᚬ',
        'Y' => 'ᚭ',
        'Z' => 'ᚮ',
        '0' => '⓪',
        '1' => '①',
        '2' => '②',
        '3' => '③',
        '4' => '④',
        '5' => '⑤',
        '6' => '⑥',
        '7' => '⑦',
        '8' => '⑧',
        '9' => '⑨',
        other => other,
    }
}

/// Glyph string for a whole message.
pub fn to_glyphs(message: &str) -> String {
    message.chars().map(glyph_for).collect()
}

/// Fixed palette for the color-pulse mode.
pub const PULSE_COLORS: [&str; 8] = [
    "#ff0000", "#00ff00", "#0000ff", "#ffff00", "#ff00ff", "#00ffff", "#ffffff", "#ff8800",
];

/// Palette color for one character, picked by code point modulo palette size.
pub fn color_for(ch: char) -> &'static str {
    let code = ch.to_ascii_uppercase() as u32;
    PULSE_COLORS[(code as usize) % PULSE_COLORS.len()]
}

/// Color sequence for a whole message.
pub fn to_color_pulse(message: &str) -> Vec<&'static str> {
    message.chars().map(color_for).collect()
}

/// One timed element of a decoded Morse string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MorseEvent {
    /// Signal on for 1 unit.
    Dot,
    /// Signal on for 3 units.
    Dash,
    /// Silence between letters, 3 units.
    LetterSpace,
    /// Silence between words, 7 units.
    WordSpace,
}

impl MorseEvent {
    /// Duration of the event in timing units.
    pub fn units(&self) -> u8 {
        match self {
            MorseEvent::Dot => 1,
            MorseEvent::Dash => 3,
            MorseEvent::LetterSpace => 3,
            MorseEvent::WordSpace => 7,
        }
    }
}

/// Decompose an encoded Morse string into typed timing events.
///
/// A bare space separates letters; a space next to the `/` word separator is
/// part of that separator and must not also count as a letter space.
pub fn morse_timing(morse: &str) -> Vec<MorseEvent> {
    let chars: Vec<char> = morse.chars().collect();
    let mut events = Vec::new();

    for (i, ch) in chars.iter().enumerate() {
        match ch {
            '.' => events.push(MorseEvent::Dot),
            '-' => events.push(MorseEvent::Dash),
            ' ' => {
                let before = i.checked_sub(1).and_then(|j| chars.get(j));
                let after = chars.get(i + 1);
                if before == Some(&'/') || after == Some(&'/') {
                    continue;
                }
                events.push(MorseEvent::LetterSpace);
            }
            '/' => events.push(MorseEvent::WordSpace),
            _ => {}
        }
    }
    events
}

/// Symbols a possessed terminal substitutes into outgoing text.
pub const CORRUPTION_GLYPHS: [char; 10] = ['▓', '░', '█', '▒', '╳', '◈', '◉', '⌀', '☠', '⚠'];

/// Randomly replace about half the characters with corruption glyphs.
/// Character count is preserved; reseeded from the thread RNG per call.
pub fn corrupt_message(message: &str) -> String {
    let mut rng = rand::thread_rng();
    message
        .chars()
        .map(|ch| {
            if rng.gen_bool(0.5) {
                CORRUPTION_GLYPHS[rng.gen_range(0..CORRUPTION_GLYPHS.len())]
            } else {
                ch
            }
        })
        .collect()
}
