//! Conversions between the coarse step pattern and the piano-roll grid.
//!
//! The piano roll works on `STEP_COUNT × subdivision` fine steps. Coarse step
//! `i` covers fine steps `[i·s, (i+1)·s)`. Going fine to coarse is lossy when
//! several pitches share one coarse step; going coarse to fine and back is
//! exact.
//!
//! Note events carry absolute MIDI pitches. Row indices exist only for the
//! grid renderer and are derived with a fixed offset from [`LOWEST_PITCH`].

mod session;

pub use session::PianoRollSession;

use crate::pattern::{NoteEvent, NoteKey, NoteMap, NoteValue, Track, MIDDLE_C, STEP_COUNT};
use std::ops::Range;

/// Pitch shown on row 0 of the grid (A0, the lowest piano key).
pub const LOWEST_PITCH: u8 = 21;

/// Number of grid rows (an 88-key piano).
pub const ROW_COUNT: usize = 88;

/// Maps a grid row to its absolute pitch.
pub fn row_to_pitch(row: usize) -> Option<u8> {
    if row < ROW_COUNT {
        Some(LOWEST_PITCH + row as u8)
    } else {
        None
    }
}

/// Maps an absolute pitch to its grid row.
pub fn pitch_to_row(pitch: u8) -> Option<usize> {
    let row = pitch.checked_sub(LOWEST_PITCH)? as usize;
    (row < ROW_COUNT).then_some(row)
}

/// Total fine steps in the grid at this resolution.
pub fn fine_step_count(division: NoteValue) -> usize {
    STEP_COUNT * division.subdivision()
}

/// The coarse step a fine step falls in, if it is inside the pattern.
pub fn coarse_step_of(fine_step: usize, division: NoteValue) -> Option<usize> {
    let coarse = fine_step / division.subdivision();
    (coarse < STEP_COUNT).then_some(coarse)
}

/// The fine steps covered by one coarse step.
pub fn fine_window(coarse_step: usize, division: NoteValue) -> Range<usize> {
    let s = division.subdivision();
    coarse_step * s..(coarse_step + 1) * s
}

/// Drops notes that fall outside the grid at this resolution.
///
/// # Returns
///
/// How many notes were dropped
pub fn clip_to_grid(notes: &mut NoteMap, division: NoteValue) -> usize {
    let limit = fine_step_count(division);
    let before = notes.len();
    notes.retain(|key| key.fine_step < limit);
    before - notes.len()
}

/// Moves notes placed at one resolution to the same musical time at another.
///
/// Going coarser can land several notes on one cell; the later one wins.
/// Notes that would leave the grid are dropped.
pub fn rescale(notes: &NoteMap, from: NoteValue, to: NoteValue) -> NoteMap {
    let (from, to) = (from.subdivision(), to.subdivision());
    let limit = STEP_COUNT * to;
    notes
        .iter()
        .filter_map(|(key, event)| {
            let fine_step = key.fine_step.checked_mul(to)? / from;
            (fine_step < limit).then(|| (NoteKey::new(key.pitch, fine_step), *event))
        })
        .collect()
}

/// A lit cell of the piano-roll grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridCell {
    pub row: usize,
    pub fine_step: usize,
    pub event: NoteEvent,
}

/// Produces the grid position of every piano-roll note of a track.
///
/// Notes whose pitch falls outside the keyboard are skipped.
pub fn to_fine_grid(track: &Track) -> Vec<GridCell> {
    track
        .detailed_notes
        .iter()
        .filter_map(|(key, event)| {
            let row = pitch_to_row(key.pitch)?;
            Some(GridCell {
                row,
                fine_step: key.fine_step,
                event: *event,
            })
        })
        .collect()
}

/// Derives the step pattern from piano-roll notes.
///
/// A coarse step is active iff any fine step in its window holds a note at
/// any pitch. Its pitch is taken from the earliest note in the window, the
/// lowest pitch winning ties. Notes past the end of the pattern are ignored.
pub fn to_coarse_pattern(
    notes: &NoteMap,
    division: NoteValue,
) -> ([bool; STEP_COUNT], [Option<u8>; STEP_COUNT]) {
    let mut steps = [false; STEP_COUNT];
    let mut step_notes = [None; STEP_COUNT];

    // NoteMap iterates by (fine step, pitch), so the first hit per step wins
    for (key, _) in notes.iter() {
        let Some(coarse) = coarse_step_of(key.fine_step, division) else {
            continue;
        };
        if !steps[coarse] {
            steps[coarse] = true;
            step_notes[coarse] = Some(key.pitch);
        }
    }

    (steps, step_notes)
}

/// Builds piano-roll notes from a step pattern.
///
/// Each active step becomes one eighth note at the start of its window,
/// pitched at the step's explicit pitch or middle C.
pub fn from_coarse_pattern(
    steps: &[bool; STEP_COUNT],
    step_notes: &[Option<u8>; STEP_COUNT],
    division: NoteValue,
) -> NoteMap {
    steps
        .iter()
        .enumerate()
        .filter(|(_, active)| **active)
        .map(|(i, _)| {
            let pitch = step_notes[i].unwrap_or(MIDDLE_C);
            let key = NoteKey::new(pitch, fine_window(i, division).start);
            (key, NoteEvent::with_pitch(pitch))
        })
        .collect()
}
