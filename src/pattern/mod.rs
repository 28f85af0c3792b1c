//! Pattern data structures for the step sequencer.
//!
//! This module provides the core types for representing tracks, their
//! 32-step patterns, and the denser piano-roll note map that sits on top of
//! them. `TrackStore` owns the live set of tracks and enforces the id and
//! numbering invariants.

mod note;
mod store;
mod track;

pub use note::{NoteEvent, NoteKey, NoteMap, DEFAULT_VELOCITY};
pub use store::{TrackError, TrackStore};
pub use track::{InstrumentKind, Track, TrackId, DEFAULT_TRACK_VOLUME};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of coarse steps in every track pattern.
pub const STEP_COUNT: usize = 32;

/// Default tempo in beats per minute.
pub const DEFAULT_TEMPO: u32 = 120;

/// Middle C, the pitch melodic instruments fall back to.
pub const MIDDLE_C: u8 = 60;

/// Standard note names for display purposes.
/// Maps MIDI note number (0-127) to note name within an octave.
pub const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Converts a MIDI note number to a human-readable note name with octave.
///
/// # Arguments
///
/// * `note` - MIDI note number (0-127)
///
/// # Returns
///
/// String representation like "C4" or "F#5"
///
/// # Examples
///
/// ```
/// use steproll::pattern::note_to_name;
///
/// let name = note_to_name(60); // Middle C
/// assert_eq!(name, "C4");
/// ```
pub fn note_to_name(note: u8) -> String {
    let octave = (note / 12) as i8 - 1; // MIDI octave convention
    let note_index = (note % 12) as usize;
    format!("{}{}", NOTE_NAMES[note_index], octave)
}

/// Converts a note name to MIDI note number.
///
/// # Arguments
///
/// * `name` - Note name like "C4" or "F#5"
///
/// # Returns
///
/// MIDI note number (0-127) or None if invalid
pub fn name_to_note(name: &str) -> Option<u8> {
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let octave_start = name
        .char_indices()
        .find(|(_, c)| c.is_ascii_digit() || *c == '-')
        .map(|(i, _)| i)?;

    let note_part = &name[..octave_start];
    let octave_part = &name[octave_start..];

    let note_index = NOTE_NAMES.iter().position(|&n| n == note_part)?;
    let octave: i16 = octave_part.parse().ok()?;

    // MIDI note = (octave + 1) * 12 + note_index
    let midi_note = (octave + 1) * 12 + note_index as i16;
    if (0..=127).contains(&midi_note) {
        Some(midi_note as u8)
    } else {
        None
    }
}

/// A rhythmic note value.
///
/// Used both as a note duration ("8n" = eighth note) and as the piano-roll
/// grid resolution, where it decides how many fine steps make up one coarse
/// step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum NoteValue {
    /// Quarter note ("4n").
    #[default]
    Quarter,
    /// Eighth note ("8n").
    Eighth,
    /// Sixteenth note ("16n").
    Sixteenth,
    /// Thirty-second note ("32n").
    ThirtySecond,
}

impl NoteValue {
    pub const ALL: [NoteValue; 4] = [
        NoteValue::Quarter,
        NoteValue::Eighth,
        NoteValue::Sixteenth,
        NoteValue::ThirtySecond,
    ];

    /// Fine piano-roll steps per coarse step when used as a grid resolution.
    pub fn subdivision(self) -> usize {
        match self {
            NoteValue::Quarter => 1,
            NoteValue::Eighth => 2,
            NoteValue::Sixteenth => 4,
            NoteValue::ThirtySecond => 8,
        }
    }

    /// Length of this note value in beats (quarter notes).
    pub fn beats(self) -> f64 {
        match self {
            NoteValue::Quarter => 1.0,
            NoteValue::Eighth => 0.5,
            NoteValue::Sixteenth => 0.25,
            NoteValue::ThirtySecond => 0.125,
        }
    }

    /// Length of this note value in seconds at the given tempo.
    pub fn seconds(self, tempo: u32) -> f64 {
        self.beats() * 60.0 / tempo.max(1) as f64
    }

    /// Short notation used in persisted data.
    pub fn as_str(self) -> &'static str {
        match self {
            NoteValue::Quarter => "4n",
            NoteValue::Eighth => "8n",
            NoteValue::Sixteenth => "16n",
            NoteValue::ThirtySecond => "32n",
        }
    }
}

impl fmt::Display for NoteValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NoteValue {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NoteValue::ALL
            .into_iter()
            .find(|v| v.as_str() == s.trim())
            .ok_or_else(|| format!("unknown note value: {s}"))
    }
}

impl TryFrom<String> for NoteValue {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NoteValue> for String {
    fn from(value: NoteValue) -> Self {
        value.as_str().to_string()
    }
}
