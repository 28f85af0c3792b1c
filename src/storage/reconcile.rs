//! Reconciling the project blob with per-track blobs.
//!
//! The project blob may be stale (a piano-roll session saved after it), and
//! a per-track blob may be missing (the track was never opened in the
//! editor). Loading resolves this with a fixed precedence:
//!
//! 1. No project blob: one default track.
//! 2. Project blob fails to parse or trips the corruption limits: purge and
//!    start over with one default track.
//! 3. Otherwise materialize every entry, then for each track with a per-track
//!    blob: non-empty notes replace the piano roll and re-derive the steps at
//!    that blob's division; an empty note list never erases steps; a stored
//!    instrument wins.
//! 4. Write the merged result back so the next load sees one consistent blob.
//!
//! [`validate`], [`merge`] and [`piano_roll_merge`] are pure; [`Reconciler`]
//! wraps them with the storage I/O.

use super::blob::{entries_from_notes, PerTrackBlob, ProjectBlob, TrackBlob};
use super::{track_key, KeyValueStore, StorageError, PROJECT_KEY};
use crate::config::{Config, Limits};
use crate::pattern::{InstrumentKind, NoteMap, NoteValue, TrackId, TrackStore};
use crate::piano_roll;
use crate::scale::Scale;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Why a project blob was discarded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Corruption {
    #[error("project blob could not be parsed: {0}")]
    Unparseable(String),
    #[error("project holds {count} tracks, more than the limit of {limit}")]
    TooManyTracks { count: usize, limit: usize },
    #[error("track id {id} exceeds the limit of {limit}")]
    TrackIdTooHigh { id: u32, limit: u32 },
}

/// Everything a main view needs to resume a project.
#[derive(Debug, Clone)]
pub struct ProjectState {
    pub tracks: TrackStore,
    pub tempo: u32,
    pub scale: Scale,
    pub division: NoteValue,
}

impl ProjectState {
    /// A fresh project: one empty track, default tempo and scale.
    pub fn fresh(config: &Config) -> Self {
        Self {
            tracks: TrackStore::with_default_track(),
            tempo: config.default_bpm,
            scale: Scale::default(),
            division: config.division,
        }
    }

    /// Captures the state as a project blob, ready to overwrite storage.
    pub fn to_blob(&self) -> ProjectBlob {
        snapshot(&self.tracks, self.tempo, &self.scale, self.division)
    }
}

/// How a load went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// No project blob existed.
    Fresh,
    /// The project blob was used.
    Restored,
    /// The project blob was discarded.
    Recovered(Corruption),
}

/// What a load did, for status reporting and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReport {
    pub outcome: LoadOutcome,
    /// Tracks whose steps were re-derived from per-track notes.
    pub merged: Vec<TrackId>,
    /// Tracks whose instrument came from the per-track blob.
    pub instrument_overrides: Vec<TrackId>,
    /// Tracks whose per-track blob was unreadable and ignored.
    pub skipped: Vec<TrackId>,
}

impl LoadReport {
    fn new(outcome: LoadOutcome) -> Self {
        Self {
            outcome,
            merged: Vec::new(),
            instrument_overrides: Vec::new(),
            skipped: Vec::new(),
        }
    }

    /// One-line summary for the status bar.
    pub fn status_line(&self, track_count: usize) -> String {
        match &self.outcome {
            LoadOutcome::Fresh => "New project".to_string(),
            LoadOutcome::Restored if self.skipped.is_empty() => {
                format!("Loaded {} tracks", track_count)
            }
            LoadOutcome::Restored => format!(
                "Loaded {} tracks ({} piano-roll saves unreadable)",
                track_count,
                self.skipped.len()
            ),
            LoadOutcome::Recovered(_) => "Saved project was corrupt; started fresh".to_string(),
        }
    }
}

/// Checks a parsed project blob against the corruption limits.
pub fn validate(blob: &ProjectBlob, limits: &Limits) -> Result<(), Corruption> {
    let count = blob.tracks.len();
    if count > limits.max_tracks {
        return Err(Corruption::TooManyTracks {
            count,
            limit: limits.max_tracks,
        });
    }
    let max_id = blob
        .tracks
        .iter()
        .map(|(key, entry)| ProjectBlob::entry_id(*key, entry).as_u32())
        .max();
    if let Some(id) = max_id.filter(|id| *id > limits.max_track_id) {
        return Err(Corruption::TrackIdTooHigh {
            id,
            limit: limits.max_track_id,
        });
    }
    Ok(())
}

/// Merges a validated project blob with the per-track blobs.
///
/// # Arguments
///
/// * `project` - The parsed, validated project blob
/// * `per_track` - Successfully parsed per-track blobs, by track id
/// * `config` - Supplies the tempo and division used when the blob has none
///
/// Each track is read at its own division: the per-track blob's when its
/// notes are used, then the entry's, then the project default.
pub fn merge(
    project: &ProjectBlob,
    per_track: &BTreeMap<TrackId, PerTrackBlob>,
    config: &Config,
) -> (ProjectState, LoadReport) {
    let division = project.division().unwrap_or(config.division);
    let mut report = LoadReport::new(LoadOutcome::Restored);

    let mut tracks = Vec::with_capacity(project.tracks.len());
    for (key, entry) in &project.tracks {
        let id = ProjectBlob::entry_id(*key, entry);
        let mut track = entry.materialize(id, division);

        if let Some(saved) = per_track.get(&id) {
            if !saved.notes.is_empty() {
                let track_division = saved.division().unwrap_or(track.division);
                let notes = saved.note_map(track_division);
                let (steps, step_notes) = piano_roll::to_coarse_pattern(&notes, track_division);
                track.set_pattern(steps, step_notes);
                track.detailed_notes = notes;
                track.division = track_division;
                report.merged.push(id);
                tracing::debug!(track = %id, notes = saved.notes.len(), "piano-roll notes replace steps");
            } else {
                tracing::debug!(track = %id, steps = track.active_step_count(), "empty piano-roll save, keeping steps");
            }

            if let Some(kind) = super::blob::parse_instrument(saved.instrument.as_deref()) {
                if kind != track.instrument {
                    report.instrument_overrides.push(id);
                }
                track.instrument = kind;
            }
        }
        tracks.push(track);
    }

    let scale = project
        .current_scale
        .as_deref()
        .and_then(|label| Scale::parse_label(label).ok())
        .unwrap_or_default();

    let state = ProjectState {
        tracks: TrackStore::from_tracks(tracks),
        tempo: project.tempo().unwrap_or(config.default_bpm),
        scale,
        division,
    };
    (state, report)
}

/// Captures live state as a project blob.
pub fn snapshot(tracks: &TrackStore, tempo: u32, scale: &Scale, division: NoteValue) -> ProjectBlob {
    ProjectBlob {
        tracks: tracks
            .all_tracks()
            .map(|t| (t.id, TrackBlob::from_track(t)))
            .collect(),
        current_bpm: Some(tempo as f64),
        current_scale: Some(scale.label()),
        piano_roll_division: Some(division.as_str().to_string()),
    }
}

/// Settings a piano-roll session falls back to when the project blob lacks
/// them.
#[derive(Debug, Clone)]
pub struct SessionDefaults {
    pub tempo: u32,
    pub scale_label: String,
}

/// Folds one track's piano-roll save into the raw project document.
///
/// Works on JSON values rather than typed blobs so that every other track,
/// and any field this crate does not know about, is carried through
/// untouched. Only the entry for `id` is rewritten: its existing fields are
/// kept, then `steps`, `stepNotes`, `pianoRoll`, `pianoRollDivision` and
/// `instrument` are replaced. `name`, `displayNumber`, `muted` and `soloed`
/// keep their stored values and are only filled in when absent. The root
/// `pianoRollDivision` is the project default and is never rewritten here.
pub fn piano_roll_merge(
    existing: Option<Value>,
    id: TrackId,
    notes: &NoteMap,
    instrument: InstrumentKind,
    division: NoteValue,
    defaults: &SessionDefaults,
) -> Value {
    let mut root = match existing {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };

    let (steps, step_notes) = piano_roll::to_coarse_pattern(notes, division);
    let key = id.to_string();

    let tracks = root
        .entry("tracks")
        .or_insert_with(|| Value::Object(Map::new()));
    if !tracks.is_object() {
        *tracks = Value::Object(Map::new());
    }
    if let Value::Object(tracks) = tracks {
        let entry = tracks
            .entry(key)
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        if let Value::Object(entry) = entry {
            entry.insert("id".into(), Value::from(id.as_u32()));
            entry
                .entry("name")
                .or_insert_with(|| Value::from(format!("Track {}", id.as_u32() + 1)));
            entry
                .entry("displayNumber")
                .or_insert_with(|| Value::from(id.as_u32() + 1));
            entry.insert("instrument".into(), Value::from(instrument.as_str()));
            entry.insert("steps".into(), Value::from(steps.to_vec()));
            entry.insert(
                "stepNotes".into(),
                Value::Array(step_notes.iter().map(|n| Value::from(*n)).collect()),
            );
            entry.insert(
                "pianoRoll".into(),
                serde_json::to_value(entries_from_notes(notes)).unwrap_or(Value::Array(Vec::new())),
            );
            entry.insert("pianoRollDivision".into(), Value::from(division.as_str()));
            entry.entry("muted").or_insert(Value::Bool(false));
            entry.entry("soloed").or_insert(Value::Bool(false));
        }
    }

    root.entry("currentBPM")
        .or_insert_with(|| Value::from(defaults.tempo));
    root.entry("currentScale")
        .or_insert_with(|| Value::from(defaults.scale_label.clone()));

    Value::Object(root)
}

/// Milliseconds since the Unix epoch, for per-track blob timestamps.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Reads and writes both stores with the precedence rules above.
#[derive(Debug, Clone)]
pub struct Reconciler {
    config: Config,
}

impl Reconciler {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Loads project state. Never fails: storage and parse problems degrade
    /// to a fresh project or to skipping one track's merge.
    pub fn load(&self, store: &mut dyn KeyValueStore) -> (ProjectState, LoadReport) {
        let raw = match store.get(PROJECT_KEY) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("could not read project blob, starting fresh: {}", e);
                None
            }
        };

        let Some(raw) = raw else {
            tracing::info!("no saved project, creating default track");
            let state = ProjectState::fresh(&self.config);
            self.ensure_track_blob(store, TrackId(0), InstrumentKind::Synth);
            self.persist(store, &state);
            return (state, LoadReport::new(LoadOutcome::Fresh));
        };

        let parsed = serde_json::from_str::<ProjectBlob>(&raw)
            .map_err(|e| Corruption::Unparseable(e.to_string()))
            .and_then(|blob| validate(&blob, &self.config.limits).map(|_| blob));

        let blob = match parsed {
            Ok(blob) => blob,
            Err(corruption) => {
                tracing::warn!("discarding saved project: {}", corruption);
                let state = self.reset(store);
                return (state, LoadReport::new(LoadOutcome::Recovered(corruption)));
            }
        };

        let mut per_track = BTreeMap::new();
        let mut skipped = Vec::new();
        for (key, entry) in &blob.tracks {
            let id = ProjectBlob::entry_id(*key, entry);
            match self.read_track_blob(store, id) {
                Ok(Some(saved)) => {
                    per_track.insert(id, saved);
                }
                Ok(None) => tracing::debug!(track = %id, "no piano-roll save"),
                Err(e) => {
                    tracing::warn!(track = %id, "ignoring unreadable piano-roll save: {}", e);
                    skipped.push(id);
                }
            }
        }

        let (state, mut report) = merge(&blob, &per_track, &self.config);
        report.skipped = skipped;
        tracing::info!(
            tracks = state.tracks.len(),
            merged = report.merged.len(),
            "loaded project"
        );

        self.persist(store, &state);
        (state, report)
    }

    /// Overwrites the project blob with `state`.
    pub fn save(&self, store: &mut dyn KeyValueStore, blob: &ProjectBlob) -> Result<(), StorageError> {
        let json = serde_json::to_string(blob)?;
        store.set(PROJECT_KEY, &json)?;
        tracing::debug!(tracks = blob.tracks.len(), "project saved");
        Ok(())
    }

    /// Writes a per-track blob for `id` with an empty note list.
    ///
    /// Used for new tracks so a reused id never inherits a deleted track's
    /// piano-roll notes.
    pub fn write_initial_track_blob(
        &self,
        store: &mut dyn KeyValueStore,
        id: TrackId,
        instrument: InstrumentKind,
        division: NoteValue,
    ) -> Result<(), StorageError> {
        let blob = PerTrackBlob::new(id, &NoteMap::new(), instrument, division, now_millis());
        store.set(&track_key(id), &serde_json::to_string(&blob)?)?;
        Ok(())
    }

    /// Reads the per-track blob for `id`.
    pub fn read_track_blob(
        &self,
        store: &dyn KeyValueStore,
        id: TrackId,
    ) -> Result<Option<PerTrackBlob>, StorageError> {
        match store.get(&track_key(id))? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Saves one track from a piano-roll session.
    ///
    /// Writes the per-track blob, then merges the track into the project
    /// blob without touching any other track's entry.
    pub fn save_piano_roll(
        &self,
        store: &mut dyn KeyValueStore,
        id: TrackId,
        notes: &NoteMap,
        instrument: InstrumentKind,
        division: NoteValue,
        defaults: &SessionDefaults,
        timestamp: u64,
    ) -> Result<(), StorageError> {
        let blob = PerTrackBlob::new(id, notes, instrument, division, timestamp);
        store.set(&track_key(id), &serde_json::to_string(&blob)?)?;

        let existing = match store.get(PROJECT_KEY)? {
            Some(raw) => match serde_json::from_str::<Value>(&raw) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!("project blob unreadable, rebuilding around track {}: {}", id, e);
                    None
                }
            },
            None => None,
        };
        let merged = piano_roll_merge(existing, id, notes, instrument, division, defaults);
        store.set(PROJECT_KEY, &serde_json::to_string(&merged)?)?;

        tracing::info!(track = %id, notes = notes.len(), "piano-roll session saved");
        Ok(())
    }

    /// Discards all saved state and starts over with one default track.
    fn reset(&self, store: &mut dyn KeyValueStore) -> ProjectState {
        if let Err(e) = store.remove(PROJECT_KEY) {
            tracing::error!("could not remove project blob: {}", e);
        }
        for id in 0..self.config.limits.purge_id_limit {
            if let Err(e) = store.remove(&track_key(TrackId(id))) {
                tracing::error!(track = id, "could not remove piano-roll save: {}", e);
            }
        }

        let state = ProjectState::fresh(&self.config);
        self.ensure_track_blob(store, TrackId(0), InstrumentKind::Synth);
        self.persist(store, &state);
        state
    }

    fn ensure_track_blob(&self, store: &mut dyn KeyValueStore, id: TrackId, instrument: InstrumentKind) {
        let exists = matches!(store.get(&track_key(id)), Ok(Some(_)));
        if !exists {
            if let Err(e) = self.write_initial_track_blob(store, id, instrument, self.config.division) {
                tracing::error!(track = %id, "could not create piano-roll storage: {}", e);
            }
        }
    }

    fn persist(&self, store: &mut dyn KeyValueStore, state: &ProjectState) {
        if let Err(e) = self.save(store, &state.to_blob()) {
            tracing::error!("could not write project blob: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::{NoteEvent, NoteKey, STEP_COUNT};
    use crate::storage::MemoryStore;

    fn config() -> Config {
        Config::default()
    }

    fn notes(entries: &[(u8, usize)]) -> NoteMap {
        entries
            .iter()
            .map(|&(p, s)| (NoteKey::new(p, s), NoteEvent::with_pitch(p)))
            .collect()
    }

    fn project_with_ids(ids: &[u32]) -> ProjectBlob {
        ProjectBlob {
            tracks: ids
                .iter()
                .map(|&id| {
                    (
                        TrackId(id),
                        TrackBlob {
                            id: Some(id),
                            ..Default::default()
                        },
                    )
                })
                .collect(),
            ..Default::default()
        }
    }

    fn first_step_only() -> TrackBlob {
        let mut steps = vec![false; STEP_COUNT];
        steps[0] = true;
        TrackBlob {
            id: Some(0),
            steps: Some(steps),
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_limits() {
        let limits = Limits::default();
        assert!(validate(&project_with_ids(&[0, 1, 2]), &limits).is_ok());
        assert!(validate(&project_with_ids(&[0, 10]), &limits).is_ok());
        assert_eq!(
            validate(&project_with_ids(&[0, 1, 2, 3, 4, 5, 6, 7, 8]), &limits),
            Err(Corruption::TooManyTracks { count: 9, limit: 8 })
        );
        assert_eq!(
            validate(&project_with_ids(&[0, 11]), &limits),
            Err(Corruption::TrackIdTooHigh { id: 11, limit: 10 })
        );
    }

    #[test]
    fn test_validate_custom_limits() {
        let limits = Limits {
            max_tracks: 16,
            max_track_id: 32,
            ..Limits::default()
        };
        let ids: Vec<u32> = (0..12).collect();
        assert!(validate(&project_with_ids(&ids), &limits).is_ok());
    }

    #[test]
    fn test_merge_per_track_notes_override_steps() {
        let project = ProjectBlob {
            tracks: [(TrackId(0), TrackBlob { id: Some(0), ..Default::default() })]
                .into_iter()
                .collect(),
            ..Default::default()
        };
        let saved = PerTrackBlob::new(
            TrackId(0),
            &notes(&[(60, 0), (62, 5), (64, 10)]),
            InstrumentKind::Synth,
            NoteValue::Quarter,
            1,
        );
        let per_track = [(TrackId(0), saved)].into_iter().collect();

        let (state, report) = merge(&project, &per_track, &config());
        let track = state.tracks.get(TrackId(0)).unwrap();
        assert_eq!(track.detailed_notes.len(), 3);
        assert!(track.is_step_active(0) && track.is_step_active(5) && track.is_step_active(10));
        assert_eq!(track.active_step_count(), 3);
        assert_eq!(track.step_note(5), Some(62));
        assert_eq!(report.merged, vec![TrackId(0)]);
    }

    #[test]
    fn test_merge_empty_per_track_keeps_steps() {
        let project = ProjectBlob {
            tracks: [(TrackId(0), first_step_only())].into_iter().collect(),
            ..Default::default()
        };
        let saved = PerTrackBlob::new(TrackId(0), &NoteMap::new(), InstrumentKind::Synth, NoteValue::Quarter, 1);
        let per_track = [(TrackId(0), saved)].into_iter().collect();

        let (state, report) = merge(&project, &per_track, &config());
        let track = state.tracks.get(TrackId(0)).unwrap();
        assert!(track.is_step_active(0));
        assert!(report.merged.is_empty());
    }

    #[test]
    fn test_merge_instrument_override() {
        let project = ProjectBlob {
            tracks: [(
                TrackId(0),
                TrackBlob {
                    id: Some(0),
                    instrument: Some("synth".into()),
                    ..Default::default()
                },
            )]
            .into_iter()
            .collect(),
            ..Default::default()
        };
        let saved = PerTrackBlob::new(TrackId(0), &NoteMap::new(), InstrumentKind::Fm, NoteValue::Quarter, 1);
        let per_track = [(TrackId(0), saved)].into_iter().collect();

        let (state, report) = merge(&project, &per_track, &config());
        assert_eq!(state.tracks.get(TrackId(0)).unwrap().instrument, InstrumentKind::Fm);
        assert_eq!(report.instrument_overrides, vec![TrackId(0)]);
    }

    #[test]
    fn test_merge_without_per_track_keeps_project_data() {
        let project = ProjectBlob {
            tracks: [(TrackId(0), first_step_only())].into_iter().collect(),
            current_bpm: Some(90.0),
            current_scale: Some("A minor".into()),
            ..Default::default()
        };
        let (state, _) = merge(&project, &BTreeMap::new(), &config());
        assert!(state.tracks.get(TrackId(0)).unwrap().is_step_active(0));
        assert_eq!(state.tempo, 90);
        assert_eq!(state.scale.label(), "A minor");
    }

    #[test]
    fn test_merge_renumbers() {
        let (state, _) = merge(&project_with_ids(&[2, 5, 7]), &BTreeMap::new(), &config());
        assert_eq!(
            state.tracks.numbering(),
            vec![(TrackId(2), 1), (TrackId(5), 2), (TrackId(7), 3)]
        );
    }

    #[test]
    fn test_load_fresh() {
        let mut store = MemoryStore::new();
        let reconciler = Reconciler::new(config());
        let (state, report) = reconciler.load(&mut store);

        assert_eq!(report.outcome, LoadOutcome::Fresh);
        assert_eq!(state.tracks.ids(), vec![TrackId(0)]);
        assert_eq!(
            store.keys().collect::<Vec<_>>(),
            vec![PROJECT_KEY, "soundbytez-track-0"]
        );
    }

    #[test]
    fn test_load_nine_tracks_discarded() {
        let mut store = MemoryStore::new();
        let blob = project_with_ids(&[0, 1, 2, 3, 4, 5, 6, 7, 8]);
        store
            .set(PROJECT_KEY, &serde_json::to_string(&blob).unwrap())
            .unwrap();
        store.set(&track_key(TrackId(3)), "{\"notes\":[]}").unwrap();

        let (state, report) = Reconciler::new(config()).load(&mut store);
        assert!(matches!(
            report.outcome,
            LoadOutcome::Recovered(Corruption::TooManyTracks { .. })
        ));
        assert_eq!(state.tracks.len(), 1);
        assert_eq!(state.tracks.ids(), vec![TrackId(0)]);
        assert_eq!(store.get(&track_key(TrackId(3))).unwrap(), None);
    }

    #[test]
    fn test_load_garbage_is_recovered() {
        let mut store = MemoryStore::new();
        store.set(PROJECT_KEY, "{not json").unwrap();

        let (state, report) = Reconciler::new(config()).load(&mut store);
        assert!(matches!(report.outcome, LoadOutcome::Recovered(Corruption::Unparseable(_))));
        assert_eq!(state.tracks.len(), 1);

        // Self-healed: the next load restores cleanly
        let (_, report) = Reconciler::new(config()).load(&mut store);
        assert_eq!(report.outcome, LoadOutcome::Restored);
    }

    #[test]
    fn test_load_skips_corrupt_per_track_blob() {
        let mut store = MemoryStore::new();
        let blob = project_with_ids(&[0, 1]);
        store
            .set(PROJECT_KEY, &serde_json::to_string(&blob).unwrap())
            .unwrap();
        store.set(&track_key(TrackId(0)), "][").unwrap();
        let good = PerTrackBlob::new(TrackId(1), &notes(&[(60, 7)]), InstrumentKind::Am, NoteValue::Quarter, 5);
        store
            .set(&track_key(TrackId(1)), &serde_json::to_string(&good).unwrap())
            .unwrap();

        let (state, report) = Reconciler::new(config()).load(&mut store);
        assert_eq!(report.outcome, LoadOutcome::Restored);
        assert_eq!(report.skipped, vec![TrackId(0)]);
        assert_eq!(report.merged, vec![TrackId(1)]);

        let track = state.tracks.get(TrackId(1)).unwrap();
        assert!(track.is_step_active(7));
        assert_eq!(track.instrument, InstrumentKind::Am);
    }

    #[test]
    fn test_load_writes_merged_state_back() {
        let mut store = MemoryStore::new();
        let blob = project_with_ids(&[0]);
        store
            .set(PROJECT_KEY, &serde_json::to_string(&blob).unwrap())
            .unwrap();
        let saved = PerTrackBlob::new(TrackId(0), &notes(&[(60, 2)]), InstrumentKind::Synth, NoteValue::Quarter, 5);
        store
            .set(&track_key(TrackId(0)), &serde_json::to_string(&saved).unwrap())
            .unwrap();

        Reconciler::new(config()).load(&mut store);

        let raw = store.get(PROJECT_KEY).unwrap().unwrap();
        let written: ProjectBlob = serde_json::from_str(&raw).unwrap();
        let entry = &written.tracks[&TrackId(0)];
        assert_eq!(entry.steps.as_ref().unwrap()[2], true);
        assert_eq!(entry.piano_roll.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn test_piano_roll_merge_preserves_other_tracks() {
        let existing = serde_json::json!({
            "tracks": {
                "0": {"id": 0, "name": "Track 1", "instrument": "kick", "steps": [true], "muted": true, "custom": 1},
                "1": {"id": 1, "name": "Track 2", "instrument": "synth", "soloed": true},
                "2": {"id": 2, "name": "Track 3", "instrument": "snare", "stepNotes": [null, 61]}
            },
            "currentBPM": 133,
            "currentScale": "E minor"
        });
        let defaults = SessionDefaults {
            tempo: 120,
            scale_label: "C major".into(),
        };

        let merged = piano_roll_merge(
            Some(existing.clone()),
            TrackId(1),
            &notes(&[(67, 3)]),
            InstrumentKind::Fm,
            NoteValue::Quarter,
            &defaults,
        );

        assert_eq!(merged["tracks"]["0"], existing["tracks"]["0"]);
        assert_eq!(merged["tracks"]["2"], existing["tracks"]["2"]);
        assert_eq!(merged["currentBPM"], 133);
        assert_eq!(merged["currentScale"], "E minor");

        let entry = &merged["tracks"]["1"];
        assert_eq!(entry["name"], "Track 2");
        assert_eq!(entry["soloed"], true);
        assert_eq!(entry["muted"], false);
        assert_eq!(entry["instrument"], "fm");
        assert_eq!(entry["steps"][3], true);
        assert_eq!(entry["stepNotes"][3], 67);
        assert_eq!(entry["pianoRoll"][0][0], "67-3");
        assert_eq!(entry["pianoRollDivision"], "4n");
    }

    #[test]
    fn test_piano_roll_merge_keeps_project_division() {
        let existing = serde_json::json!({
            "tracks": {
                "0": {"id": 0, "pianoRoll": [["60-4", {"midiNote": 60, "step": 4}]], "pianoRollDivision": "4n"},
                "1": {"id": 1}
            },
            "pianoRollDivision": "4n"
        });
        let defaults = SessionDefaults {
            tempo: 120,
            scale_label: "C major".into(),
        };

        let merged = piano_roll_merge(
            Some(existing.clone()),
            TrackId(1),
            &notes(&[(62, 6)]),
            InstrumentKind::Synth,
            NoteValue::Eighth,
            &defaults,
        );

        assert_eq!(merged["pianoRollDivision"], "4n");
        assert_eq!(merged["tracks"]["0"], existing["tracks"]["0"]);
        assert_eq!(merged["tracks"]["1"]["pianoRollDivision"], "8n");
        assert_eq!(merged["tracks"]["1"]["steps"][3], true);
    }

    #[test]
    fn test_merge_reads_each_track_at_its_division() {
        let project = ProjectBlob {
            tracks: [
                (TrackId(0), TrackBlob { id: Some(0), ..Default::default() }),
                (TrackId(1), TrackBlob { id: Some(1), ..Default::default() }),
            ]
            .into_iter()
            .collect(),
            piano_roll_division: Some("8n".into()),
            ..Default::default()
        };
        let quarter = PerTrackBlob::new(
            TrackId(0),
            &notes(&[(60, 4)]),
            InstrumentKind::Synth,
            NoteValue::Quarter,
            1,
        );
        let eighth = PerTrackBlob::new(
            TrackId(1),
            &notes(&[(62, 4)]),
            InstrumentKind::Synth,
            NoteValue::Eighth,
            1,
        );
        let per_track = [(TrackId(0), quarter), (TrackId(1), eighth)]
            .into_iter()
            .collect();

        let (state, _) = merge(&project, &per_track, &config());
        let first = state.tracks.get(TrackId(0)).unwrap();
        assert_eq!(first.division, NoteValue::Quarter);
        assert!(first.is_step_active(4));
        assert_eq!(first.active_step_count(), 1);

        let second = state.tracks.get(TrackId(1)).unwrap();
        assert_eq!(second.division, NoteValue::Eighth);
        assert!(second.is_step_active(2));
        assert_eq!(second.active_step_count(), 1);
        assert_eq!(state.division, NoteValue::Eighth);
    }

    #[test]
    fn test_piano_roll_merge_into_nothing() {
        let defaults = SessionDefaults {
            tempo: 100,
            scale_label: "G major".into(),
        };
        let merged = piano_roll_merge(
            None,
            TrackId(4),
            &NoteMap::new(),
            InstrumentKind::Synth,
            NoteValue::Quarter,
            &defaults,
        );
        let entry = &merged["tracks"]["4"];
        assert_eq!(entry["name"], "Track 5");
        assert_eq!(entry["displayNumber"], 5);
        assert_eq!(merged["currentBPM"], 100);

        // The result is a valid project blob
        let blob: ProjectBlob = serde_json::from_value(merged).unwrap();
        assert!(blob.tracks.contains_key(&TrackId(4)));
    }
}
