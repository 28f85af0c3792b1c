//! Serialized shapes of the project and per-track blobs.
//!
//! Field names follow the stored JSON (`currentBPM`, `stepNotes`,
//! `pianoRoll`, ...). Every field is optional on read: missing data falls
//! back to defaults instead of failing the whole document.

use crate::pattern::{
    InstrumentKind, NoteEvent, NoteKey, NoteMap, NoteValue, Track, TrackId, DEFAULT_VELOCITY,
    STEP_COUNT,
};
use crate::piano_roll;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// One piano-roll note as stored: `[noteKey, noteEvent]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteEntry(pub String, pub StoredNote);

/// The event half of a [`NoteEntry`].
///
/// `midi_note` and `step` are authoritative; the entry's key string is
/// derived from them on write and ignored on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredNote {
    pub midi_note: u8,
    pub step: usize,
    #[serde(default = "default_velocity")]
    pub velocity: f32,
    #[serde(default = "default_duration")]
    pub duration: NoteValue,
}

fn default_velocity() -> f32 {
    DEFAULT_VELOCITY
}

fn default_duration() -> NoteValue {
    NoteValue::Eighth
}

impl NoteEntry {
    pub fn new(key: NoteKey, event: &NoteEvent) -> Self {
        Self(
            format!("{}-{}", key.pitch, key.fine_step),
            StoredNote {
                midi_note: key.pitch,
                step: key.fine_step,
                velocity: event.velocity,
                duration: event.duration,
            },
        )
    }

    pub fn key(&self) -> NoteKey {
        NoteKey::new(self.1.midi_note, self.1.step)
    }

    pub fn event(&self) -> NoteEvent {
        NoteEvent::new(self.1.midi_note, self.1.velocity, self.1.duration)
    }
}

/// Flattens a note map into stored entries.
pub fn entries_from_notes(notes: &NoteMap) -> Vec<NoteEntry> {
    notes.iter().map(|(k, e)| NoteEntry::new(k, e)).collect()
}

/// Rebuilds a note map from stored entries. Later duplicates win.
///
/// Entries outside the grid at `division` are dropped, so a corrupt step
/// never reaches the editor or the scheduler.
pub fn notes_from_entries(entries: &[NoteEntry], division: NoteValue) -> NoteMap {
    let mut notes: NoteMap = entries.iter().map(|e| (e.key(), e.event())).collect();
    let dropped = piano_roll::clip_to_grid(&mut notes, division);
    if dropped > 0 {
        tracing::warn!(dropped, %division, "ignoring stored notes outside the grid");
    }
    notes
}

fn parse_division(tag: Option<&str>) -> Option<NoteValue> {
    tag?.parse().ok()
}

/// Parses a stored instrument tag, logging and dropping unknown ones.
pub(crate) fn parse_instrument(tag: Option<&str>) -> Option<InstrumentKind> {
    let tag = tag?;
    match tag.parse() {
        Ok(kind) => Some(kind),
        Err(e) => {
            tracing::warn!("ignoring stored instrument: {}", e);
            None
        }
    }
}

/// One track's entry in the project blob.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackBlob {
    #[serde(default)]
    pub id: Option<u32>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_number: Option<usize>,
    #[serde(default)]
    pub instrument: Option<String>,
    #[serde(default)]
    pub steps: Option<Vec<bool>>,
    #[serde(default)]
    pub step_notes: Option<Vec<Option<u8>>>,
    #[serde(default)]
    pub piano_roll: Option<Vec<NoteEntry>>,
    /// Resolution the `pianoRoll` steps are counted in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub piano_roll_division: Option<String>,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub soloed: bool,
}

impl TrackBlob {
    /// Captures the persistable subset of a live track.
    pub fn from_track(track: &Track) -> Self {
        Self {
            id: Some(track.id.as_u32()),
            name: Some(track.name.clone()),
            display_number: None,
            instrument: Some(track.instrument.as_str().to_string()),
            steps: Some(track.steps().to_vec()),
            step_notes: Some(track.step_notes().to_vec()),
            piano_roll: Some(entries_from_notes(&track.detailed_notes)),
            piano_roll_division: Some(track.division.as_str().to_string()),
            muted: track.muted,
            soloed: track.soloed,
        }
    }

    pub fn division(&self) -> Option<NoteValue> {
        parse_division(self.piano_roll_division.as_deref())
    }

    /// Builds a track from this entry, defaulting whatever is missing.
    ///
    /// Step arrays of the wrong length are padded or truncated to
    /// `STEP_COUNT`. The display number is provisional until the store
    /// renumbers. `default_division` applies when the entry has none.
    pub fn materialize(&self, id: TrackId, default_division: NoteValue) -> Track {
        let mut track = Track::new(id, self.display_number.unwrap_or(id.as_u32() as usize + 1));
        if let Some(kind) = parse_instrument(self.instrument.as_deref()) {
            track.instrument = kind;
        }

        let mut steps = [false; STEP_COUNT];
        for (slot, value) in steps.iter_mut().zip(self.steps.iter().flatten()) {
            *slot = *value;
        }
        let mut step_notes = [None; STEP_COUNT];
        for (slot, value) in step_notes.iter_mut().zip(self.step_notes.iter().flatten()) {
            *slot = *value;
        }
        track.set_pattern(steps, step_notes);

        track.division = self.division().unwrap_or(default_division);
        if let Some(entries) = &self.piano_roll {
            track.detailed_notes = notes_from_entries(entries, track.division);
        }
        track.muted = self.muted;
        track.soloed = self.soloed;
        track
    }
}

/// The monolithic project document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectBlob {
    #[serde(default)]
    pub tracks: BTreeMap<TrackId, TrackBlob>,
    #[serde(rename = "currentBPM", default)]
    pub current_bpm: Option<f64>,
    #[serde(rename = "currentScale", default)]
    pub current_scale: Option<String>,
    #[serde(rename = "pianoRollDivision", default, skip_serializing_if = "Option::is_none")]
    pub piano_roll_division: Option<String>,
}

impl ProjectBlob {
    /// Id of a track entry: the entry's own `id`, else its map key.
    pub fn entry_id(key: TrackId, entry: &TrackBlob) -> TrackId {
        entry.id.map(TrackId).unwrap_or(key)
    }

    /// Tempo rounded to whole BPM, if stored and sane.
    pub fn tempo(&self) -> Option<u32> {
        self.current_bpm
            .filter(|bpm| bpm.is_finite() && *bpm >= 1.0)
            .map(|bpm| bpm.round() as u32)
    }

    /// Resolution for entries that do not carry their own.
    pub fn division(&self) -> Option<NoteValue> {
        parse_division(self.piano_roll_division.as_deref())
    }
}

/// The document a piano-roll session writes for its track.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerTrackBlob {
    #[serde(default, deserialize_with = "lenient_id")]
    pub track_id: Option<u32>,
    #[serde(default)]
    pub notes: Vec<NoteEntry>,
    #[serde(default)]
    pub instrument: Option<String>,
    /// Resolution the note steps are counted in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub division: Option<String>,
    /// Milliseconds since the Unix epoch.
    #[serde(default)]
    pub timestamp: u64,
}

impl PerTrackBlob {
    pub fn new(
        id: TrackId,
        notes: &NoteMap,
        instrument: InstrumentKind,
        division: NoteValue,
        timestamp: u64,
    ) -> Self {
        Self {
            track_id: Some(id.as_u32()),
            notes: entries_from_notes(notes),
            instrument: Some(instrument.as_str().to_string()),
            division: Some(division.as_str().to_string()),
            timestamp,
        }
    }

    pub fn division(&self) -> Option<NoteValue> {
        parse_division(self.division.as_deref())
    }

    /// The stored notes, read at the blob's own resolution or `fallback`.
    pub fn note_map(&self, fallback: NoteValue) -> NoteMap {
        notes_from_entries(&self.notes, self.division().unwrap_or(fallback))
    }
}

/// Accepts a track id stored either as a number or a numeric string.
fn lenient_id<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u32),
        Text(String),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Num(n)) => Some(n),
        Some(Raw::Text(s)) => s.trim().parse().ok(),
        None => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_entry_shape() {
        let entry = NoteEntry::new(NoteKey::new(60, 5), &NoteEvent::with_pitch(60));
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json[0], "60-5");
        assert_eq!(json[1]["midiNote"], 60);
        assert_eq!(json[1]["step"], 5);
        assert_eq!(json[1]["duration"], "8n");
    }

    #[test]
    fn test_note_entry_ignores_extra_fields() {
        let raw = r#"["ignored", {"midiNote": 64, "step": 3, "color": "red", "velocity": 0.5, "duration": "16n"}]"#;
        let entry: NoteEntry = serde_json::from_str(raw).unwrap();
        assert_eq!(entry.key(), NoteKey::new(64, 3));
        assert_eq!(entry.event().duration, NoteValue::Sixteenth);
        assert_eq!(entry.event().velocity, 0.5);
    }

    #[test]
    fn test_track_blob_defaults() {
        let blob: TrackBlob = serde_json::from_str(r#"{"id": 2}"#).unwrap();
        let track = blob.materialize(TrackId(2), NoteValue::Quarter);
        assert_eq!(track.instrument, InstrumentKind::Synth);
        assert_eq!(track.active_step_count(), 0);
        assert!(track.detailed_notes.is_empty());
        assert!(!track.muted && !track.soloed);
    }

    #[test]
    fn test_track_blob_short_steps_padded() {
        let blob: TrackBlob = serde_json::from_str(
            r#"{"id": 0, "steps": [true, false, true], "stepNotes": [62, null, 70], "instrument": "fm"}"#,
        )
        .unwrap();
        let track = blob.materialize(TrackId(0), NoteValue::Quarter);
        assert_eq!(track.steps().len(), STEP_COUNT);
        assert!(track.is_step_active(0) && track.is_step_active(2));
        assert_eq!(track.step_note(2), Some(70));
        assert_eq!(track.instrument, InstrumentKind::Fm);
    }

    #[test]
    fn test_track_blob_own_division() {
        let blob: TrackBlob = serde_json::from_str(
            r#"{"id": 0, "pianoRollDivision": "8n",
                "pianoRoll": [["60-40", {"midiNote": 60, "step": 40}], ["62-64", {"midiNote": 62, "step": 64}]]}"#,
        )
        .unwrap();
        let track = blob.materialize(TrackId(0), NoteValue::Quarter);
        assert_eq!(track.division, NoteValue::Eighth);
        assert_eq!(track.detailed_notes.len(), 1);
        assert!(track.detailed_notes.contains(NoteKey::new(60, 40)));
    }

    #[test]
    fn test_corrupt_steps_dropped_on_read() {
        let raw = format!(
            r#"{{"notes": [["x", {{"midiNote": 60, "step": {}}}], ["y", {{"midiNote": 64, "step": 3}}]]}}"#,
            usize::MAX / 2
        );
        let blob: PerTrackBlob = serde_json::from_str(&raw).unwrap();
        let notes = blob.note_map(NoteValue::ThirtySecond);
        assert_eq!(notes.len(), 1);
        assert!(notes.contains(NoteKey::new(64, 3)));
    }

    #[test]
    fn test_unknown_instrument_falls_back() {
        let blob: TrackBlob = serde_json::from_str(r#"{"instrument": "theremin"}"#).unwrap();
        let track = blob.materialize(TrackId(0), NoteValue::Quarter);
        assert_eq!(track.instrument, InstrumentKind::Synth);
    }

    #[test]
    fn test_project_blob_numeric_keys() {
        let raw = r#"{"tracks": {"2": {"id": 2}, "10": {"id": 10}}, "currentBPM": 97.6, "currentScale": "D minor"}"#;
        let blob: ProjectBlob = serde_json::from_str(raw).unwrap();
        let ids: Vec<_> = blob.tracks.keys().copied().collect();
        assert_eq!(ids, vec![TrackId(2), TrackId(10)]);
        assert_eq!(blob.tempo(), Some(98));
    }

    #[test]
    fn test_per_track_lenient_id() {
        let blob: PerTrackBlob =
            serde_json::from_str(r#"{"trackId": "0", "notes": [], "timestamp": 1}"#).unwrap();
        assert_eq!(blob.track_id, Some(0));
        assert!(blob.instrument.is_none());
    }
}
