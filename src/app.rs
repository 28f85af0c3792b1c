//! Application state and gesture handling for the main sequencer view.
//!
//! `App` is the one context object: it owns the tracks, the scheduler, the
//! scale, and the collaborators (storage, voices, transport, view). Every
//! mutation goes through here so that voices, persistence and the view are
//! updated in a fixed order: change state, fix up voices, save, notify.

use crate::audio::{
    note_for_pitch, PlannedNote, PlaybackScheduler, PlaybackState, Transport, VoiceBackend,
    VoiceError,
};
use crate::config::Config;
use crate::pattern::{InstrumentKind, NoteMap, NoteValue, TrackError, TrackId, TrackStore};
use crate::piano_roll::{self, GridCell};
use crate::scale::Scale;
use crate::storage::{snapshot, KeyValueStore, LoadReport, Reconciler};
use crate::view::{Gesture, Navigation, View};

/// Status shown once the voice backend is running.
pub const STATUS_READY: &str = "Audio: Ready";
pub const STATUS_PLAYING: &str = "Audio: Playing";
pub const STATUS_PAUSED: &str = "Audio: Paused";
pub const STATUS_STOPPED: &str = "Audio: Stopped";
pub const STATUS_AUDIO_ERROR: &str = "Audio: Error - Click to retry";
pub const STATUS_LAST_TRACK: &str = "Cannot delete the last track";

/// Main application state.
pub struct App<S, V, T> {
    tracks: TrackStore,
    scheduler: PlaybackScheduler,
    scale: Scale,
    /// Project default piano-roll resolution, given to new tracks.
    division: NoteValue,
    reconciler: Reconciler,
    load_report: LoadReport,

    store: S,
    voices: V,
    transport: T,
    view: Box<dyn View>,

    /// Most recent status line.
    pub status_message: Option<String>,
}

impl<S, V, T> App<S, V, T>
where
    S: KeyValueStore,
    V: VoiceBackend,
    T: Transport,
{
    /// Loads the project from `store` and builds a voice for every track.
    ///
    /// Never fails: corrupt or missing state falls back to a fresh project,
    /// and voice failures leave tracks silent.
    pub fn new(config: Config, mut store: S, voices: V, mut transport: T, view: Box<dyn View>) -> Self {
        let reconciler = Reconciler::new(config);
        let (state, load_report) = reconciler.load(&mut store);

        let scheduler = PlaybackScheduler::new(state.tempo);
        transport.set_tempo(scheduler.tempo());

        let mut app = Self {
            tracks: state.tracks,
            scheduler,
            scale: state.scale,
            division: state.division,
            reconciler,
            load_report,
            store,
            voices,
            transport,
            view,
            status_message: None,
        };

        for id in app.tracks.ids() {
            app.build_voice(id);
        }
        let numbering = app.tracks.numbering();
        app.view.track_renumbered(&numbering);
        let status = app.load_report.status_line(app.tracks.len());
        app.set_status(status);
        app
    }

    // ====== Accessors ======

    pub fn tracks(&self) -> &TrackStore {
        &self.tracks
    }

    pub fn scheduler(&self) -> &PlaybackScheduler {
        &self.scheduler
    }

    pub fn scale(&self) -> &Scale {
        &self.scale
    }

    pub fn division(&self) -> NoteValue {
        self.division
    }

    pub fn load_report(&self) -> &LoadReport {
        &self.load_report
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn voices(&self) -> &V {
        &self.voices
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Grid cells of a track's piano-roll notes, for an editor preview.
    pub fn editor_cells(&self, id: TrackId) -> Option<Vec<GridCell>> {
        self.tracks.get(id).map(piano_roll::to_fine_grid)
    }

    /// Sets a status message and forwards it to the view.
    pub fn set_status(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.view.status(&message);
        self.status_message = Some(message);
    }

    // ====== Gestures ======

    /// Dispatches one user gesture.
    pub fn handle(&mut self, gesture: Gesture) -> Navigation {
        match gesture {
            Gesture::AddTrack => {
                self.add_track();
            }
            Gesture::DeleteTrack(id) => self.delete_track(id),
            Gesture::ToggleStep(id, step) => self.toggle_step(id, step),
            Gesture::ChangeInstrument(id, kind) => self.set_instrument(id, kind),
            Gesture::SetMute(id, muted) => self.set_mute(id, muted),
            Gesture::SetSolo(id, soloed) => self.set_solo(id, soloed),
            Gesture::SetTrackVolume(id, volume) => self.set_track_volume(id, volume),
            Gesture::SetTrackPan(id, pan) => self.set_track_pan(id, pan),
            Gesture::PreviewKey(id, key) => {
                self.preview_key(id, key);
            }
            Gesture::ClearAll => self.clear_all(),
            Gesture::OpenEditor(id) => return self.open_editor(id),
            Gesture::Play => self.play(),
            Gesture::Pause => self.pause(),
            Gesture::Stop => self.stop(),
            Gesture::SetBpm(bpm) => self.set_bpm(bpm),
            Gesture::SetLoop(enabled) => self.set_loop(enabled),
            Gesture::SetMasterVolume(volume) => self.set_master_volume(volume),
            Gesture::SetKey(key) => self.set_key(&key),
            Gesture::SetMode(mode) => self.set_mode(&mode),
        }
        Navigation::Stay
    }

    // ====== Tracks ======

    /// Adds a new track and gives it a voice and empty piano-roll storage.
    pub fn add_track(&mut self) -> TrackId {
        let id = self.tracks.add_track();
        if let Err(e) = self.tracks.set_division(id, self.division) {
            self.ignore_stale(e);
        }
        if let Err(e) = self.reconciler.write_initial_track_blob(
            &mut self.store,
            id,
            InstrumentKind::Synth,
            self.division,
        ) {
            tracing::error!(track = %id, "could not create piano-roll storage: {}", e);
        }
        self.build_voice(id);
        self.save();

        let number = self.tracks.get(id).map(|t| t.display_number).unwrap_or_default();
        self.view.track_added(id, number);
        self.notify_renumbered();
        self.set_status(format!("Added Track {}", number));
        id
    }

    /// Deletes a track. The last remaining track cannot be deleted.
    pub fn delete_track(&mut self, id: TrackId) {
        match self.tracks.delete_track(id) {
            Ok(removed) => {
                if let Some(voice) = removed.voice {
                    self.voices.dispose(voice);
                }
                self.save();
                self.view.track_removed(id);
                self.notify_renumbered();
                self.set_status(format!("Deleted {}", removed.name));
            }
            Err(TrackError::LastTrack) => self.set_status(STATUS_LAST_TRACK),
            Err(e) => self.ignore_stale(e),
        }
    }

    pub fn toggle_step(&mut self, id: TrackId, step: usize) {
        match self.tracks.toggle_step(id, step) {
            Ok(active) => {
                self.save();
                self.view.step_toggled(id, step, active);
            }
            Err(e) => self.ignore_stale(e),
        }
    }

    pub fn set_mute(&mut self, id: TrackId, muted: bool) {
        match self.tracks.set_mute(id, muted) {
            Ok(()) => {
                self.save();
                self.view.track_updated(id);
            }
            Err(e) => self.ignore_stale(e),
        }
    }

    pub fn set_solo(&mut self, id: TrackId, soloed: bool) {
        match self.tracks.set_solo(id, soloed) {
            Ok(()) => {
                self.save();
                self.view.track_updated(id);
            }
            Err(e) => self.ignore_stale(e),
        }
    }

    /// Sets a track's channel level. Applied to its voice now and to any
    /// voice built later. Not saved.
    pub fn set_track_volume(&mut self, id: TrackId, volume: u8) {
        match self.tracks.set_volume(id, volume) {
            Ok(volume) => {
                if let Some(voice) = self.tracks.get(id).and_then(|t| t.voice) {
                    self.voices.set_track_volume(voice, volume);
                }
                self.view.track_updated(id);
            }
            Err(e) => self.ignore_stale(e),
        }
    }

    /// Sets a track's stereo position. Not saved.
    pub fn set_track_pan(&mut self, id: TrackId, pan: i8) {
        match self.tracks.set_pan(id, pan) {
            Ok(pan) => {
                if let Some(voice) = self.tracks.get(id).and_then(|t| t.voice) {
                    self.voices.set_track_pan(voice, pan);
                }
                self.view.track_updated(id);
            }
            Err(e) => self.ignore_stale(e),
        }
    }

    /// Switches a track's instrument, rebuilding its voice before saving.
    pub fn set_instrument(&mut self, id: TrackId, instrument: InstrumentKind) {
        match self.tracks.set_instrument(id, instrument) {
            Ok(old) => {
                if let Some(voice) = old {
                    self.voices.dispose(voice);
                }
                self.build_voice(id);
                self.save();
                self.view.instrument_changed(id, instrument);
                let name = self.tracks.get(id).map(|t| t.name.clone()).unwrap_or_default();
                self.set_status(format!("{}: {}", name, instrument));
            }
            Err(e) => self.ignore_stale(e),
        }
    }

    /// Clears every step pattern and stops playback.
    pub fn clear_all(&mut self) {
        self.tracks.clear_all();
        self.stop();
        self.save();
        for id in self.tracks.ids() {
            self.view.track_updated(id);
        }
        self.set_status("Cleared all steps");
    }

    /// Replaces a track's piano-roll notes and re-derives its steps. The
    /// notes are read at the track's own division.
    pub fn apply_piano_roll(&mut self, id: TrackId, notes: NoteMap) {
        let division = self.tracks.get(id).map_or(self.division, |t| t.division);
        match self.tracks.apply_piano_roll(id, notes, division) {
            Ok(()) => {
                self.save();
                self.view.track_updated(id);
            }
            Err(e) => self.ignore_stale(e),
        }
    }

    pub fn open_editor(&mut self, id: TrackId) -> Navigation {
        if self.tracks.get(id).is_none() {
            tracing::debug!(track = %id, "ignoring editor request for missing track");
            return Navigation::Stay;
        }
        // The editor reads from storage, so it must see the latest state
        self.save();
        Navigation::OpenEditor(id)
    }

    /// Reloads from storage, e.g. after returning from the piano-roll editor.
    pub fn reload(&mut self) {
        self.stop();
        for track in self.tracks.all_tracks_mut() {
            if let Some(voice) = track.voice.take() {
                self.voices.dispose(voice);
            }
        }

        let (state, report) = self.reconciler.load(&mut self.store);
        self.tracks = state.tracks;
        self.scale = state.scale;
        self.division = state.division;
        self.scheduler.set_bpm(state.tempo, &mut self.transport);
        self.load_report = report;

        for id in self.tracks.ids() {
            self.build_voice(id);
        }
        self.notify_renumbered();
        let status = self.load_report.status_line(self.tracks.len());
        self.set_status(status);
    }

    // ====== Playback ======

    /// Starts playback, starting the voice backend on first use.
    pub fn play(&mut self) {
        let first_start = !self.scheduler.voices_ready();
        match self.scheduler.play(&mut self.voices, &mut self.transport) {
            Ok(()) => {
                if first_start {
                    self.set_status(STATUS_READY);
                }
                self.set_status(STATUS_PLAYING);
            }
            Err(e) => {
                tracing::warn!("could not start audio: {}", e);
                self.set_status(STATUS_AUDIO_ERROR);
            }
        }
    }

    pub fn pause(&mut self) {
        if self.scheduler.state() == PlaybackState::Playing {
            self.scheduler.pause(&mut self.transport);
            self.set_status(STATUS_PAUSED);
        }
    }

    pub fn stop(&mut self) {
        let was_stopped = self.scheduler.state() == PlaybackState::Stopped;
        self.scheduler.stop(&mut self.transport);
        self.view.tick_advanced(None);
        if !was_stopped {
            self.set_status(STATUS_STOPPED);
        }
    }

    /// Handles one transport tick.
    pub fn tick(&mut self, step: usize) -> Vec<PlannedNote> {
        let planned = self.scheduler.on_tick(step, &self.tracks, &mut self.voices);
        self.view.tick_advanced(self.scheduler.current_step());
        planned
    }

    /// Sets the tempo. Tempo changes are saved immediately.
    pub fn set_bpm(&mut self, bpm: u32) {
        self.scheduler.set_bpm(bpm, &mut self.transport);
        self.save();
        self.set_status(format!("Tempo: {} BPM", self.scheduler.tempo()));
    }

    pub fn set_loop(&mut self, enabled: bool) {
        self.scheduler.set_loop(enabled, &mut self.transport);
    }

    pub fn set_master_volume(&mut self, volume: u8) {
        self.scheduler.set_master_volume(volume, &mut self.voices);
    }

    /// Plays one pitch on a track right away, outside the step grid.
    ///
    /// Starts the voice backend on first use. Drums play their own trigger
    /// whatever the pitch.
    ///
    /// # Returns
    ///
    /// The note sent to the voice, or None if nothing could sound
    pub fn preview_note(&mut self, id: TrackId, pitch: u8) -> Option<PlannedNote> {
        let track = self.tracks.get(id)?;
        let note = note_for_pitch(track, pitch);
        let voice = track.voice;

        if let Err(e) = self.scheduler.ensure_voices(&mut self.voices) {
            tracing::warn!("could not start audio: {}", e);
            self.set_status(STATUS_AUDIO_ERROR);
            return None;
        }
        let Some(voice) = voice else {
            tracing::debug!(track = %id, "no voice to preview on");
            return None;
        };
        self.voices
            .trigger(voice, note.pitch, note.duration, note.offset, note.velocity);
        Some(note)
    }

    /// Previews the scale note mapped to a computer-keyboard key.
    pub fn preview_key(&mut self, id: TrackId, key: char) -> Option<PlannedNote> {
        let pitch = self.scale.key_to_note(key)?;
        self.preview_note(id, pitch)
    }

    // ====== Scale ======

    pub fn set_key(&mut self, key: &str) {
        match self.scale.set_key(key) {
            Ok(()) => self.scale_changed(),
            Err(e) => self.set_status(e.to_string()),
        }
    }

    pub fn set_mode(&mut self, mode: &str) {
        match self.scale.set_mode(mode) {
            Ok(()) => self.scale_changed(),
            Err(e) => self.set_status(e.to_string()),
        }
    }

    fn scale_changed(&mut self) {
        self.save();
        self.set_status(format!("Scale: {}", self.scale));
    }

    // ====== Persistence ======

    /// Overwrites the project blob with the current state.
    pub fn save(&mut self) {
        let blob = snapshot(&self.tracks, self.scheduler.tempo(), &self.scale, self.division);
        if let Err(e) = self.reconciler.save(&mut self.store, &blob) {
            tracing::error!("save failed: {}", e);
            self.set_status(format!("Save failed: {}", e));
        }
    }

    // ====== Helpers ======

    fn build_voice(&mut self, id: TrackId) {
        let Some(kind) = self.tracks.get(id).map(|t| t.instrument) else {
            return;
        };
        match self.voices.create(kind) {
            Ok(handle) => {
                if let Some(track) = self.tracks.get(id) {
                    self.voices.set_track_volume(handle, track.volume);
                    self.voices.set_track_pan(handle, track.pan);
                }
                if let Ok(Some(stale)) = self.tracks.attach_voice(id, handle) {
                    self.voices.dispose(stale);
                }
            }
            Err(e) => self.voice_failed(id, e),
        }
    }

    fn voice_failed(&mut self, id: TrackId, error: VoiceError) {
        tracing::warn!(track = %id, "track stays silent: {}", error);
        self.set_status(STATUS_AUDIO_ERROR);
    }

    fn notify_renumbered(&mut self) {
        let numbering = self.tracks.numbering();
        self.view.track_renumbered(&numbering);
    }

    fn ignore_stale(&self, error: TrackError) {
        tracing::debug!("ignoring stale request: {}", error);
    }
}
