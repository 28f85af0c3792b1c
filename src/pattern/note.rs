//! Piano-roll note representation.
//!
//! A note event lives at a composite key of (fine step, pitch). Keying the
//! map this way lets one coarse step hold several simultaneous pitches, which
//! the plain step pattern cannot express.

use super::NoteValue;
use std::collections::BTreeMap;
use std::ops::Range;

/// Velocity assigned to notes placed in the piano-roll editor.
pub const DEFAULT_VELOCITY: f32 = 0.8;

/// Position of a note in the fine piano-roll grid.
///
/// Ordered by fine step first, then pitch, so iterating a [`NoteMap`] walks
/// the grid in time order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NoteKey {
    /// Fine time step (coarse step × subdivision + offset).
    pub fine_step: usize,
    /// Absolute MIDI pitch. Not a display row index.
    pub pitch: u8,
}

impl NoteKey {
    pub fn new(pitch: u8, fine_step: usize) -> Self {
        Self {
            fine_step,
            pitch: pitch.min(127),
        }
    }
}

/// A single note placed in the piano roll.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteEvent {
    /// MIDI note number (0-127).
    pub pitch: u8,
    /// Velocity in [0, 1].
    pub velocity: f32,
    /// How long the note sounds once triggered.
    pub duration: NoteValue,
}

impl NoteEvent {
    /// Creates a note event, clamping pitch and velocity into range.
    pub fn new(pitch: u8, velocity: f32, duration: NoteValue) -> Self {
        let velocity = if velocity.is_finite() {
            velocity.clamp(0.0, 1.0)
        } else {
            DEFAULT_VELOCITY
        };
        Self {
            pitch: pitch.min(127),
            velocity,
            duration,
        }
    }

    /// An eighth note at the editor's default velocity.
    pub fn with_pitch(pitch: u8) -> Self {
        Self::new(pitch, DEFAULT_VELOCITY, NoteValue::Eighth)
    }
}

/// The detailed (piano-roll) notes of one track.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NoteMap {
    notes: BTreeMap<NoteKey, NoteEvent>,
}

impl NoteMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a note, replacing any note already at the same key.
    ///
    /// The event's pitch is forced to the key's pitch so the two can never
    /// disagree.
    pub fn insert(&mut self, key: NoteKey, mut event: NoteEvent) -> Option<NoteEvent> {
        event.pitch = key.pitch;
        self.notes.insert(key, event)
    }

    pub fn remove(&mut self, key: NoteKey) -> Option<NoteEvent> {
        self.notes.remove(&key)
    }

    pub fn get(&self, key: NoteKey) -> Option<&NoteEvent> {
        self.notes.get(&key)
    }

    pub fn contains(&self, key: NoteKey) -> bool {
        self.notes.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn clear(&mut self) {
        self.notes.clear();
    }

    /// Iterates all notes in time order.
    pub fn iter(&self) -> impl Iterator<Item = (NoteKey, &NoteEvent)> {
        self.notes.iter().map(|(k, v)| (*k, v))
    }

    /// Returns the notes whose fine step lies in `window`, in time order.
    ///
    /// # Arguments
    ///
    /// * `window` - Fine step range (start inclusive, end exclusive)
    pub fn in_window(&self, window: Range<usize>) -> impl Iterator<Item = (NoteKey, &NoteEvent)> {
        let start = NoteKey {
            fine_step: window.start,
            pitch: 0,
        };
        let end = NoteKey {
            fine_step: window.end,
            pitch: 0,
        };
        let range = if window.start < window.end {
            self.notes.range(start..end)
        } else {
            self.notes.range(start..start)
        };
        range.map(|(k, v)| (*k, v))
    }

    /// Keeps only the notes for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(NoteKey) -> bool) {
        self.notes.retain(|key, _| keep(*key));
    }
}

impl FromIterator<(NoteKey, NoteEvent)> for NoteMap {
    fn from_iter<I: IntoIterator<Item = (NoteKey, NoteEvent)>>(iter: I) -> Self {
        let mut map = NoteMap::new();
        for (key, event) in iter {
            map.insert(key, event);
        }
        map
    }
}
