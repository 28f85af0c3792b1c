//! A piano-roll editing session for one track.
//!
//! The editor runs in its own context and shares nothing with the main view
//! except the stores. It loads one track, edits it, and on save writes the
//! per-track blob plus a merge of that single track into the project blob.

use super::{fine_step_count, rescale, row_to_pitch, to_coarse_pattern};
use crate::config::Config;
use crate::pattern::{InstrumentKind, NoteEvent, NoteKey, NoteMap, NoteValue, TrackId, STEP_COUNT};
use crate::scale::{NoteClass, Scale};
use crate::storage::{
    notes_from_entries, track_key, KeyValueStore, PerTrackBlob, ProjectBlob, Reconciler,
    SessionDefaults, StorageError, PROJECT_KEY,
};

#[derive(Debug, Clone)]
pub struct PianoRollSession {
    track: TrackId,
    notes: NoteMap,
    instrument: InstrumentKind,
    division: NoteValue,
    tempo: u32,
    scale: Scale,
    config: Config,
}

impl PianoRollSession {
    /// Opens a session for `track`.
    ///
    /// Notes come from the per-track blob when it has any, otherwise from
    /// the track's project entry. The instrument follows the same order,
    /// falling back to synth. The division is the one stored with the notes
    /// in use, then the entry's, then the project default. Unreadable blobs
    /// are logged and skipped.
    pub fn open(store: &dyn KeyValueStore, track: TrackId, config: &Config) -> Self {
        let project: Option<ProjectBlob> = read_json(store, PROJECT_KEY);
        let saved: Option<PerTrackBlob> = read_json(store, &track_key(track));
        let entry = project.as_ref().and_then(|p| {
            p.tracks
                .iter()
                .find(|(key, e)| ProjectBlob::entry_id(**key, e) == track)
                .map(|(_, e)| e)
        });

        let entry_division = entry
            .and_then(|e| e.division())
            .or_else(|| project.as_ref().and_then(ProjectBlob::division))
            .unwrap_or(config.division);
        let (notes, division) = match (&saved, entry.and_then(|e| e.piano_roll.as_ref())) {
            (Some(saved), _) if !saved.notes.is_empty() => {
                let division = saved.division().unwrap_or(entry_division);
                (saved.note_map(division), division)
            }
            (_, Some(entries)) => (notes_from_entries(entries, entry_division), entry_division),
            _ => (NoteMap::new(), entry_division),
        };

        let instrument = saved
            .as_ref()
            .and_then(|s| s.instrument.as_deref())
            .or_else(|| entry.and_then(|e| e.instrument.as_deref()))
            .and_then(|tag| tag.parse().ok())
            .unwrap_or_default();

        let tempo = project
            .as_ref()
            .and_then(ProjectBlob::tempo)
            .unwrap_or(config.default_bpm);
        let scale = project
            .as_ref()
            .and_then(|p| p.current_scale.as_deref())
            .and_then(|label| Scale::parse_label(label).ok())
            .unwrap_or_default();

        tracing::info!(track = %track, notes = notes.len(), %instrument, %division, "opened piano roll");
        Self {
            track,
            notes,
            instrument,
            division,
            tempo,
            scale,
            config: config.clone(),
        }
    }

    pub fn track(&self) -> TrackId {
        self.track
    }

    pub fn notes(&self) -> &NoteMap {
        &self.notes
    }

    pub fn instrument(&self) -> InstrumentKind {
        self.instrument
    }

    pub fn division(&self) -> NoteValue {
        self.division
    }

    pub fn tempo(&self) -> u32 {
        self.tempo
    }

    pub fn scale(&self) -> &Scale {
        &self.scale
    }

    /// Places an editor-default note. Returns false if the fine step is
    /// outside the grid.
    pub fn add_note(&mut self, pitch: u8, fine_step: usize) -> bool {
        if fine_step >= fine_step_count(self.division) {
            return false;
        }
        self.notes
            .insert(NoteKey::new(pitch, fine_step), NoteEvent::with_pitch(pitch));
        true
    }

    /// Returns true if a note was removed.
    pub fn remove_note(&mut self, pitch: u8, fine_step: usize) -> bool {
        self.notes.remove(NoteKey::new(pitch, fine_step)).is_some()
    }

    /// Flips the grid cell at (`row`, `fine_step`).
    ///
    /// # Returns
    ///
    /// Whether the cell now holds a note, or None if it is off the grid
    pub fn toggle_cell(&mut self, row: usize, fine_step: usize) -> Option<bool> {
        let pitch = row_to_pitch(row)?;
        if self.remove_note(pitch, fine_step) {
            Some(false)
        } else if self.add_note(pitch, fine_step) {
            Some(true)
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        self.notes.clear();
    }

    pub fn set_instrument(&mut self, instrument: InstrumentKind) {
        self.instrument = instrument;
    }

    /// Changes the grid resolution, moving notes to the same musical time.
    ///
    /// Going coarser can land several notes on one cell; the later one wins.
    pub fn set_division(&mut self, division: NoteValue) {
        if division == self.division {
            return;
        }
        self.notes = rescale(&self.notes, self.division, division);
        self.division = division;
    }

    /// Highlight class of a grid row under the project scale.
    pub fn classify_row(&self, row: usize) -> Option<NoteClass> {
        row_to_pitch(row).map(|pitch| self.scale.classify(pitch))
    }

    /// The step pattern the main view will show after saving.
    pub fn coarse_pattern(&self) -> ([bool; STEP_COUNT], [Option<u8>; STEP_COUNT]) {
        to_coarse_pattern(&self.notes, self.division)
    }

    /// Saves this track. Other tracks in the project blob are untouched.
    ///
    /// # Errors
    ///
    /// Returns error if either blob cannot be written
    pub fn save(&self, store: &mut dyn KeyValueStore, timestamp: u64) -> Result<(), StorageError> {
        let defaults = SessionDefaults {
            tempo: self.tempo,
            scale_label: self.scale.label(),
        };
        Reconciler::new(self.config.clone()).save_piano_roll(
            store,
            self.track,
            &self.notes,
            self.instrument,
            self.division,
            &defaults,
            timestamp,
        )
    }
}

fn read_json<T: serde::de::DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Option<T> {
    match store.get(key) {
        Ok(Some(raw)) => match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("ignoring unreadable {}: {}", key, e);
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            tracing::warn!("could not read {}: {}", key, e);
            None
        }
    }
}
