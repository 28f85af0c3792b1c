//! Sequencer track representation.
//!
//! A track holds one instrument lane: its 32-step trigger pattern, optional
//! per-step pitches, the piano-roll note map, and mute/solo flags. Tracks can
//! be muted and soloed independently; solo resolution happens at playback.

use super::note::NoteMap;
use super::{NoteValue, STEP_COUNT};
use crate::audio::VoiceHandle;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier for a track within a project.
///
/// Ids are small and compact: the lowest free id is reused after a delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(pub u32);

impl TrackId {
    /// Returns the raw ID value.
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The instrument a track plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentKind {
    Kick,
    Snare,
    Hihat,
    #[default]
    Synth,
    Fm,
    Am,
    Noise,
}

impl InstrumentKind {
    pub const ALL: [InstrumentKind; 7] = [
        InstrumentKind::Kick,
        InstrumentKind::Snare,
        InstrumentKind::Hihat,
        InstrumentKind::Synth,
        InstrumentKind::Fm,
        InstrumentKind::Am,
        InstrumentKind::Noise,
    ];

    /// Tag used in persisted data and on the command line.
    pub fn as_str(self) -> &'static str {
        match self {
            InstrumentKind::Kick => "kick",
            InstrumentKind::Snare => "snare",
            InstrumentKind::Hihat => "hihat",
            InstrumentKind::Synth => "synth",
            InstrumentKind::Fm => "fm",
            InstrumentKind::Am => "am",
            InstrumentKind::Noise => "noise",
        }
    }

    /// Whether this instrument plays the pitch it is given.
    pub fn uses_pitch(self) -> bool {
        self.params().uses_pitch
    }
}

impl fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstrumentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        InstrumentKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown instrument: {s}"))
    }
}

/// A single sequencer track.
#[derive(Debug, Clone)]
pub struct Track {
    /// Stable identity, independent of display order.
    pub id: TrackId,

    /// 1-based position among live tracks. Recomputed by the store.
    pub display_number: usize,

    /// "Track N", derived from `display_number`.
    pub name: String,

    /// Which instrument voice this track drives.
    pub instrument: InstrumentKind,

    /// Does step i trigger.
    steps: [bool; STEP_COUNT],

    /// Optional explicit pitch per step. Only meaningful where `steps[i]`.
    step_notes: [Option<u8>; STEP_COUNT],

    /// Piano-roll notes.
    pub detailed_notes: NoteMap,

    /// Grid resolution the piano-roll notes were placed with.
    pub division: NoteValue,

    pub muted: bool,

    pub soloed: bool,

    /// Channel level, 0-100. Runtime only.
    pub volume: u8,

    /// Stereo position, -100 (left) to 100 (right). Runtime only.
    pub pan: i8,

    /// Live voice handle. Runtime only, never persisted.
    pub voice: Option<VoiceHandle>,
}

/// Channel level of a new track.
pub const DEFAULT_TRACK_VOLUME: u8 = 75;

impl Track {
    /// Creates an empty synth track.
    ///
    /// # Arguments
    ///
    /// * `id` - Track identity
    /// * `display_number` - 1-based visual position
    pub fn new(id: TrackId, display_number: usize) -> Self {
        Self {
            id,
            display_number,
            name: format!("Track {}", display_number),
            instrument: InstrumentKind::Synth,
            steps: [false; STEP_COUNT],
            step_notes: [None; STEP_COUNT],
            detailed_notes: NoteMap::new(),
            division: NoteValue::default(),
            muted: false,
            soloed: false,
            volume: DEFAULT_TRACK_VOLUME,
            pan: 0,
            voice: None,
        }
    }

    pub fn steps(&self) -> &[bool; STEP_COUNT] {
        &self.steps
    }

    pub fn step_notes(&self) -> &[Option<u8>; STEP_COUNT] {
        &self.step_notes
    }

    /// Returns whether the step triggers. Out-of-range steps never do.
    pub fn is_step_active(&self, step: usize) -> bool {
        self.steps.get(step).copied().unwrap_or(false)
    }

    /// Returns the explicit pitch of an active step.
    pub fn step_note(&self, step: usize) -> Option<u8> {
        if self.is_step_active(step) {
            self.step_notes[step]
        } else {
            None
        }
    }

    /// Replaces the step pattern, dropping any pitch on inactive steps.
    pub fn set_pattern(&mut self, steps: [bool; STEP_COUNT], step_notes: [Option<u8>; STEP_COUNT]) {
        self.steps = steps;
        for (i, note) in step_notes.into_iter().enumerate() {
            self.step_notes[i] = if steps[i] { note.map(|p| p.min(127)) } else { None };
        }
    }

    /// Flips one step. Turning a step off also clears its pitch.
    ///
    /// # Returns
    ///
    /// The new state of the step, or None if `step` is out of range
    pub(crate) fn toggle_step(&mut self, step: usize) -> Option<bool> {
        let active = self.steps.get_mut(step)?;
        *active = !*active;
        let now = *active;
        if !now {
            self.step_notes[step] = None;
        }
        Some(now)
    }

    /// Clears the step pattern. Piano-roll notes are kept.
    pub fn clear_steps(&mut self) {
        self.steps = [false; STEP_COUNT];
        self.step_notes = [None; STEP_COUNT];
    }

    /// Number of active steps.
    pub fn active_step_count(&self) -> usize {
        self.steps.iter().filter(|s| **s).count()
    }

    pub(crate) fn renumber(&mut self, display_number: usize) {
        self.display_number = display_number;
        self.name = format!("Track {}", display_number);
    }
}
