//! The live set of tracks.
//!
//! `TrackStore` owns every track and keeps the invariants that span tracks:
//! there is always at least one track, ids are gap-filled rather than
//! counted up, and display numbers run 1..N with no gaps.

use super::note::NoteMap;
use super::track::{InstrumentKind, Track, TrackId};
use super::NoteValue;
use crate::audio::VoiceHandle;
use crate::piano_roll;
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors returned by track operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackError {
    /// The only remaining track cannot be deleted.
    #[error("cannot delete the last track")]
    LastTrack,
    /// The id does not name a live track (usually a stale UI reference).
    #[error("track {0} does not exist")]
    UnknownTrack(TrackId),
    /// Step index outside `0..STEP_COUNT`.
    #[error("step {0} is out of range")]
    StepOutOfRange(usize),
}

/// Owns the mapping of track id to track.
///
/// Display order is ascending id order, so numbering is stable across
/// reloads.
#[derive(Debug, Clone)]
pub struct TrackStore {
    tracks: BTreeMap<TrackId, Track>,
}

impl TrackStore {
    /// Creates a store holding the single default track (id 0).
    pub fn with_default_track() -> Self {
        let mut tracks = BTreeMap::new();
        tracks.insert(TrackId(0), Track::new(TrackId(0), 1));
        Self { tracks }
    }

    /// Builds a store from already materialized tracks.
    ///
    /// Falls back to the default track when `tracks` is empty, and
    /// renumbers everything. Later duplicates of an id replace earlier ones.
    pub fn from_tracks(tracks: impl IntoIterator<Item = Track>) -> Self {
        let tracks: BTreeMap<TrackId, Track> = tracks.into_iter().map(|t| (t.id, t)).collect();
        if tracks.is_empty() {
            return Self::with_default_track();
        }
        let mut store = Self { tracks };
        store.renumber();
        store
    }

    /// Returns the lowest non-negative id not currently in use.
    pub fn next_free_id(&self) -> TrackId {
        let mut candidate = 0;
        for id in self.tracks.keys() {
            if id.0 != candidate {
                break;
            }
            candidate += 1;
        }
        TrackId(candidate)
    }

    /// Adds a new empty synth track.
    ///
    /// The track has no voice yet; the caller is responsible for requesting
    /// one. Until then it is silent but otherwise valid.
    ///
    /// # Returns
    ///
    /// The id of the created track
    pub fn add_track(&mut self) -> TrackId {
        let id = self.next_free_id();
        self.tracks.insert(id, Track::new(id, 0));
        self.renumber();
        tracing::info!(track = %id, count = self.tracks.len(), "added track");
        id
    }

    /// Removes a track and renumbers the rest.
    ///
    /// # Returns
    ///
    /// The removed track, so the caller can release its voice
    ///
    /// # Errors
    ///
    /// `LastTrack` if this is the only track, `UnknownTrack` if `id` is not live
    pub fn delete_track(&mut self, id: TrackId) -> Result<Track, TrackError> {
        if !self.tracks.contains_key(&id) {
            return Err(TrackError::UnknownTrack(id));
        }
        if self.tracks.len() <= 1 {
            return Err(TrackError::LastTrack);
        }
        let removed = self
            .tracks
            .remove(&id)
            .ok_or(TrackError::UnknownTrack(id))?;
        self.renumber();
        tracing::info!(track = %id, count = self.tracks.len(), "deleted track");
        Ok(removed)
    }

    /// Flips a step. Deactivating a step clears its pitch.
    ///
    /// # Returns
    ///
    /// The new state of the step
    pub fn toggle_step(&mut self, id: TrackId, step: usize) -> Result<bool, TrackError> {
        let track = self.track_mut(id)?;
        track
            .toggle_step(step)
            .ok_or(TrackError::StepOutOfRange(step))
    }

    pub fn set_mute(&mut self, id: TrackId, muted: bool) -> Result<(), TrackError> {
        self.track_mut(id)?.muted = muted;
        Ok(())
    }

    pub fn set_solo(&mut self, id: TrackId, soloed: bool) -> Result<(), TrackError> {
        self.track_mut(id)?.soloed = soloed;
        Ok(())
    }

    /// Sets a track's channel level, clamped to 0-100.
    ///
    /// # Returns
    ///
    /// The level actually stored
    pub fn set_volume(&mut self, id: TrackId, volume: u8) -> Result<u8, TrackError> {
        let track = self.track_mut(id)?;
        track.volume = volume.min(100);
        Ok(track.volume)
    }

    /// Sets a track's stereo position, clamped to -100..=100.
    pub fn set_pan(&mut self, id: TrackId, pan: i8) -> Result<i8, TrackError> {
        let track = self.track_mut(id)?;
        track.pan = pan.clamp(-100, 100);
        Ok(track.pan)
    }

    /// Changes a track's instrument. Steps and piano-roll notes are kept.
    ///
    /// # Returns
    ///
    /// The track's previous voice, which must be disposed before a new one
    /// is built for the new instrument
    pub fn set_instrument(
        &mut self,
        id: TrackId,
        instrument: InstrumentKind,
    ) -> Result<Option<VoiceHandle>, TrackError> {
        let track = self.track_mut(id)?;
        track.instrument = instrument;
        Ok(track.voice.take())
    }

    /// Attaches a freshly built voice to a track.
    ///
    /// # Returns
    ///
    /// Any voice the track already had
    pub fn attach_voice(
        &mut self,
        id: TrackId,
        voice: VoiceHandle,
    ) -> Result<Option<VoiceHandle>, TrackError> {
        Ok(self.track_mut(id)?.voice.replace(voice))
    }

    /// Clears every track's step pattern. Tracks and piano-roll notes stay.
    pub fn clear_all(&mut self) {
        for track in self.tracks.values_mut() {
            track.clear_steps();
        }
    }

    /// Replaces a track's piano-roll notes and re-derives its step pattern.
    ///
    /// # Arguments
    ///
    /// * `id` - Track to update
    /// * `notes` - The edited note map
    /// * `division` - Piano-roll grid resolution the notes were placed with
    pub fn apply_piano_roll(
        &mut self,
        id: TrackId,
        notes: NoteMap,
        division: NoteValue,
    ) -> Result<(), TrackError> {
        let track = self.track_mut(id)?;
        let (steps, step_notes) = piano_roll::to_coarse_pattern(&notes, division);
        track.set_pattern(steps, step_notes);
        track.detailed_notes = notes;
        track.division = division;
        Ok(())
    }

    /// Changes the resolution a track's piano-roll notes are counted in,
    /// moving each note to the same musical time.
    pub fn set_division(&mut self, id: TrackId, division: NoteValue) -> Result<(), TrackError> {
        let track = self.track_mut(id)?;
        if track.division != division {
            track.detailed_notes = piano_roll::rescale(&track.detailed_notes, track.division, division);
            track.division = division;
        }
        Ok(())
    }

    /// Returns a reference to a track by its ID.
    pub fn get(&self, id: TrackId) -> Option<&Track> {
        self.tracks.get(&id)
    }

    /// Returns a copy of a track's current state.
    pub fn track_snapshot(&self, id: TrackId) -> Option<Track> {
        self.tracks.get(&id).cloned()
    }

    /// Returns all tracks ordered by ascending id.
    pub fn all_tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }

    pub fn all_tracks_mut(&mut self) -> impl Iterator<Item = &mut Track> {
        self.tracks.values_mut()
    }

    pub fn ids(&self) -> Vec<TrackId> {
        self.tracks.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Whether any track is soloed right now.
    pub fn any_soloed(&self) -> bool {
        self.tracks.values().any(|t| t.soloed)
    }

    /// Returns (id, display number) for every track in display order.
    pub fn numbering(&self) -> Vec<(TrackId, usize)> {
        self.tracks
            .values()
            .map(|t| (t.id, t.display_number))
            .collect()
    }

    fn track_mut(&mut self, id: TrackId) -> Result<&mut Track, TrackError> {
        self.tracks.get_mut(&id).ok_or(TrackError::UnknownTrack(id))
    }

    fn renumber(&mut self) {
        for (index, track) in self.tracks.values_mut().enumerate() {
            track.renumber(index + 1);
        }
    }
}

impl Default for TrackStore {
    fn default() -> Self {
        Self::with_default_track()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::{NoteEvent, NoteKey, STEP_COUNT};

    fn store_with(n: usize) -> TrackStore {
        let mut store = TrackStore::with_default_track();
        for _ in 1..n {
            store.add_track();
        }
        store
    }

    #[test]
    fn test_default_store() {
        let store = TrackStore::default();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(TrackId(0)).unwrap().name, "Track 1");
    }

    #[test]
    fn test_add_track_defaults() {
        let mut store = TrackStore::default();
        let id = store.add_track();
        assert_eq!(id, TrackId(1));

        let track = store.get(id).unwrap();
        assert_eq!(track.instrument, InstrumentKind::Synth);
        assert_eq!(track.display_number, 2);
        assert_eq!(track.active_step_count(), 0);
        assert!(track.detailed_notes.is_empty());
        assert!(track.voice.is_none());
    }

    #[test]
    fn test_gap_filling_ids() {
        for k in 0..3 {
            let mut store = store_with(3);
            store.delete_track(TrackId(k)).unwrap();
            assert_eq!(store.add_track(), TrackId(k));
        }
    }

    #[test]
    fn test_delete_renumbers() {
        let mut store = store_with(3);
        store.delete_track(TrackId(0)).unwrap();
        assert_eq!(store.numbering(), vec![(TrackId(1), 1), (TrackId(2), 2)]);
        assert_eq!(store.get(TrackId(2)).unwrap().name, "Track 2");
    }

    #[test]
    fn test_add_then_delete_restores_numbering() {
        let mut store = store_with(3);
        store.delete_track(TrackId(1)).unwrap();
        let before = store.numbering();

        let id = store.add_track();
        store.delete_track(id).unwrap();
        assert_eq!(store.numbering(), before);
    }

    #[test]
    fn test_last_track_rejected() {
        let mut store = TrackStore::default();
        assert_eq!(store.delete_track(TrackId(0)).unwrap_err(), TrackError::LastTrack);
        assert_eq!(store.len(), 1);
        assert_eq!(store.numbering(), vec![(TrackId(0), 1)]);
    }

    #[test]
    fn test_unknown_track() {
        let mut store = store_with(2);
        assert_eq!(
            store.toggle_step(TrackId(9), 0),
            Err(TrackError::UnknownTrack(TrackId(9)))
        );
        assert_eq!(
            store.delete_track(TrackId(9)).unwrap_err(),
            TrackError::UnknownTrack(TrackId(9))
        );
    }

    #[test]
    fn test_toggle_step_twice() {
        let mut store = TrackStore::default();
        for step in 0..STEP_COUNT {
            let before = store.get(TrackId(0)).unwrap().is_step_active(step);
            store.toggle_step(TrackId(0), step).unwrap();
            store.toggle_step(TrackId(0), step).unwrap();
            assert_eq!(store.get(TrackId(0)).unwrap().is_step_active(step), before);
        }
        assert_eq!(
            store.toggle_step(TrackId(0), STEP_COUNT),
            Err(TrackError::StepOutOfRange(STEP_COUNT))
        );
    }

    #[test]
    fn test_mute_solo_independent() {
        let mut store = store_with(2);
        store.set_solo(TrackId(0), true).unwrap();
        store.set_solo(TrackId(1), true).unwrap();
        store.set_mute(TrackId(1), true).unwrap();

        let a = store.get(TrackId(0)).unwrap();
        let b = store.get(TrackId(1)).unwrap();
        assert!(a.soloed && !a.muted);
        assert!(b.soloed && b.muted);
    }

    #[test]
    fn test_set_instrument_keeps_pattern() {
        let mut store = TrackStore::default();
        store.toggle_step(TrackId(0), 3).unwrap();
        store.attach_voice(TrackId(0), VoiceHandle(7)).unwrap();

        let old = store.set_instrument(TrackId(0), InstrumentKind::Kick).unwrap();
        assert_eq!(old, Some(VoiceHandle(7)));

        let track = store.get(TrackId(0)).unwrap();
        assert_eq!(track.instrument, InstrumentKind::Kick);
        assert!(track.is_step_active(3));
        assert!(track.voice.is_none());
    }

    #[test]
    fn test_clear_all_keeps_notes() {
        let mut store = store_with(2);
        let notes: NoteMap = [(NoteKey::new(60, 2), NoteEvent::with_pitch(60))]
            .into_iter()
            .collect();
        store
            .apply_piano_roll(TrackId(1), notes, NoteValue::Quarter)
            .unwrap();
        store.toggle_step(TrackId(0), 0).unwrap();

        store.clear_all();
        assert_eq!(store.len(), 2);
        for track in store.all_tracks() {
            assert_eq!(track.active_step_count(), 0);
            assert!(track.step_notes().iter().all(Option::is_none));
        }
        assert_eq!(store.get(TrackId(1)).unwrap().detailed_notes.len(), 1);
    }

    #[test]
    fn test_apply_piano_roll_derives_steps() {
        let mut store = TrackStore::default();
        let notes: NoteMap = [(64, 0), (67, 5)]
            .into_iter()
            .map(|(p, s)| (NoteKey::new(p, s), NoteEvent::with_pitch(p)))
            .collect();
        store
            .apply_piano_roll(TrackId(0), notes, NoteValue::Eighth)
            .unwrap();

        let track = store.get(TrackId(0)).unwrap();
        assert!(track.is_step_active(0));
        assert!(track.is_step_active(2));
        assert_eq!(track.step_note(2), Some(67));
        assert_eq!(track.active_step_count(), 2);
        assert_eq!(track.division, NoteValue::Eighth);
    }

    #[test]
    fn test_set_division_keeps_pattern() {
        let mut store = TrackStore::default();
        let notes: NoteMap = [(NoteKey::new(60, 3), NoteEvent::with_pitch(60))]
            .into_iter()
            .collect();
        store
            .apply_piano_roll(TrackId(0), notes, NoteValue::Quarter)
            .unwrap();
        store.set_division(TrackId(0), NoteValue::Sixteenth).unwrap();

        let track = store.get(TrackId(0)).unwrap();
        assert_eq!(track.division, NoteValue::Sixteenth);
        assert!(track.detailed_notes.contains(NoteKey::new(60, 12)));
        assert!(track.is_step_active(3));
    }

    #[test]
    fn test_volume_and_pan_clamped() {
        let mut store = TrackStore::default();
        assert_eq!(store.set_volume(TrackId(0), 140), Ok(100));
        assert_eq!(store.set_volume(TrackId(0), 0), Ok(0));
        assert_eq!(store.set_pan(TrackId(0), -128), Ok(-100));
        assert_eq!(store.set_pan(TrackId(0), 35), Ok(35));

        let track = store.get(TrackId(0)).unwrap();
        assert_eq!((track.volume, track.pan), (0, 35));
        assert_eq!(store.set_volume(TrackId(9), 50), Err(TrackError::UnknownTrack(TrackId(9))));
    }

    #[test]
    fn test_from_tracks_empty_falls_back() {
        let store = TrackStore::from_tracks(Vec::new());
        assert_eq!(store.ids(), vec![TrackId(0)]);
    }
}
