//! Step playback.
//!
//! An external [`Transport`] owns real time and calls back once per tick
//! with a step index. On each tick the scheduler decides which tracks sound
//! and what each one plays, then hands the notes to the voice backend.

use super::voice::{VoiceBackend, VoiceError};
use crate::pattern::{NoteValue, Track, TrackId, TrackStore, STEP_COUNT};
use crate::piano_roll;

/// Loop region in beats: the full 32-step pattern is two 4/4 bars.
pub const LOOP_START_BEAT: f64 = 0.0;
pub const LOOP_END_BEAT: f64 = 8.0;

/// Velocity of notes triggered from the step grid.
pub const STEP_VELOCITY: f32 = 1.0;

/// Represents the current playback state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    /// Not playing, cursor reset to the first step.
    #[default]
    Stopped,
    /// Currently playing.
    Playing,
    /// Paused at the current step.
    Paused,
}

/// The real-time clock driving playback.
pub trait Transport {
    fn start(&mut self);
    fn pause(&mut self);
    /// Stops and rewinds so the next tick is step 0.
    fn stop(&mut self);
    fn set_tempo(&mut self, bpm: u32);
    fn set_loop(&mut self, enabled: bool, start_beat: f64, end_beat: f64);
}

/// A transport advanced by hand, one tick per call to [`ManualTransport::tick`].
#[derive(Debug, Clone, Default)]
pub struct ManualTransport {
    running: bool,
    position: usize,
    tempo: u32,
    loop_region: Option<(f64, f64)>,
}

impl ManualTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next step index, or None while not running.
    ///
    /// Without a loop region, playback ends after the last step.
    pub fn tick(&mut self) -> Option<usize> {
        if !self.running {
            return None;
        }
        if self.position >= STEP_COUNT {
            if self.loop_region.is_none() {
                self.running = false;
                return None;
            }
            self.position = 0;
        }
        let step = self.position;
        self.position += 1;
        Some(step)
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn tempo(&self) -> u32 {
        self.tempo
    }

    pub fn loop_region(&self) -> Option<(f64, f64)> {
        self.loop_region
    }
}

impl Transport for ManualTransport {
    fn start(&mut self) {
        self.running = true;
    }

    fn pause(&mut self) {
        self.running = false;
    }

    fn stop(&mut self) {
        self.running = false;
        self.position = 0;
    }

    fn set_tempo(&mut self, bpm: u32) {
        self.tempo = bpm;
    }

    fn set_loop(&mut self, enabled: bool, start_beat: f64, end_beat: f64) {
        self.loop_region = enabled.then_some((start_beat, end_beat));
    }
}

/// One note the scheduler decided to play on a tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlannedNote {
    pub track: TrackId,
    /// None for unpitched voices.
    pub pitch: Option<u8>,
    pub duration: NoteValue,
    /// Seconds after the tick.
    pub offset: f64,
    pub velocity: f32,
}

/// The note a track plays for an explicit pitch, as from a step's pitch or
/// a keyboard preview.
///
/// Pitched instruments play the pitch as an eighth note. Drums ignore it and
/// play their default trigger.
pub fn note_for_pitch(track: &Track, pitch: u8) -> PlannedNote {
    let params = track.instrument.params();
    let (pitch, duration) = if params.uses_pitch {
        (Some(pitch), NoteValue::Eighth)
    } else {
        (params.trigger_pitch, params.trigger_duration)
    };
    PlannedNote {
        track: track.id,
        pitch,
        duration,
        offset: 0.0,
        velocity: STEP_VELOCITY,
    }
}

/// Decides what every track plays on one step.
///
/// A track sounds iff the step is active, it is not muted, and either no
/// track is soloed or it is. A sounding track plays, in order of
/// precedence:
///
/// 1. the step's explicit pitch;
/// 2. otherwise every piano-roll note inside the step's fine window, each
///    offset within the tick by its position in the window;
/// 3. otherwise the instrument's default trigger.
///
/// Instruments that ignore pitch always use their default trigger, at
/// whatever offset the rule above gives. Each track's fine window is taken
/// at the division its piano-roll notes were placed with.
pub fn resolve_tick(tracks: &TrackStore, step: usize, tick_secs: f64) -> Vec<PlannedNote> {
    let any_solo = tracks.any_soloed();
    let mut planned = Vec::new();

    for track in tracks.all_tracks() {
        if !track.is_step_active(step) || track.muted || (any_solo && !track.soloed) {
            continue;
        }
        let params = track.instrument.params();
        let default_note = |offset: f64, velocity: f32| PlannedNote {
            track: track.id,
            pitch: params.trigger_pitch,
            duration: params.trigger_duration,
            offset,
            velocity,
        };

        if let Some(pitch) = track.step_note(step) {
            planned.push(note_for_pitch(track, pitch));
            continue;
        }

        let window = piano_roll::fine_window(step, track.division);
        let subdivision = track.division.subdivision() as f64;
        let before = planned.len();
        for (key, event) in track.detailed_notes.in_window(window.clone()) {
            let offset = (key.fine_step - window.start) as f64 / subdivision * tick_secs;
            planned.push(if params.uses_pitch {
                PlannedNote {
                    track: track.id,
                    pitch: Some(event.pitch),
                    duration: event.duration,
                    offset,
                    velocity: event.velocity,
                }
            } else {
                default_note(offset, event.velocity)
            });
        }

        if planned.len() == before {
            planned.push(default_note(0.0, STEP_VELOCITY));
        }
    }

    planned
}

/// Transport state and per-tick note dispatch.
#[derive(Debug, Clone)]
pub struct PlaybackScheduler {
    state: PlaybackState,
    /// Step shown as "now playing", None when nothing is.
    current_step: Option<usize>,
    tempo: u32,
    looping: bool,
    master_volume: u8,
    voices_ready: bool,
}

impl PlaybackScheduler {
    pub fn new(tempo: u32) -> Self {
        Self {
            state: PlaybackState::Stopped,
            current_step: None,
            tempo: tempo.max(1),
            looping: false,
            master_volume: 100,
            voices_ready: false,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn current_step(&self) -> Option<usize> {
        self.current_step
    }

    pub fn tempo(&self) -> u32 {
        self.tempo
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    pub fn master_volume(&self) -> u8 {
        self.master_volume
    }

    pub fn voices_ready(&self) -> bool {
        self.voices_ready
    }

    /// Length of one tick (a sixteenth note) at the current tempo.
    pub fn tick_duration_secs(&self) -> f64 {
        NoteValue::Sixteenth.seconds(self.tempo)
    }

    /// Starts the voice backend if it has not been started yet.
    ///
    /// # Errors
    ///
    /// Returns `VoiceError::InitFailed` if the backend cannot start; a later
    /// call retries.
    pub fn ensure_voices(&mut self, voices: &mut dyn VoiceBackend) -> Result<(), VoiceError> {
        if !self.voices_ready {
            voices.init()?;
            voices.set_master_volume(self.master_volume);
            self.voices_ready = true;
        }
        Ok(())
    }

    /// Starts or resumes playback.
    ///
    /// # Errors
    ///
    /// Returns error if the voice backend fails to start. State is unchanged.
    pub fn play(
        &mut self,
        voices: &mut dyn VoiceBackend,
        transport: &mut dyn Transport,
    ) -> Result<(), VoiceError> {
        if self.state == PlaybackState::Playing {
            return Ok(());
        }
        self.ensure_voices(voices)?;
        transport.set_tempo(self.tempo);
        transport.start();
        tracing::info!(from = ?self.state, tempo = self.tempo, "playback started");
        self.state = PlaybackState::Playing;
        Ok(())
    }

    pub fn pause(&mut self, transport: &mut dyn Transport) {
        if self.state == PlaybackState::Playing {
            transport.pause();
            self.state = PlaybackState::Paused;
            tracing::info!("playback paused");
        }
    }

    /// Stops playback from any state and rewinds to step 0.
    pub fn stop(&mut self, transport: &mut dyn Transport) {
        transport.stop();
        self.state = PlaybackState::Stopped;
        self.current_step = None;
        tracing::info!("playback stopped");
    }

    /// Handles one transport tick.
    ///
    /// # Arguments
    ///
    /// * `step` - Step index from the transport; wrapped into the pattern
    /// * `tracks` - The live tracks, read as they are at this tick
    /// * `voices` - Backend that receives the triggers
    ///
    /// # Returns
    ///
    /// The notes played. Empty unless playing.
    pub fn on_tick(
        &mut self,
        step: usize,
        tracks: &TrackStore,
        voices: &mut dyn VoiceBackend,
    ) -> Vec<PlannedNote> {
        if self.state != PlaybackState::Playing {
            return Vec::new();
        }
        let step = step % STEP_COUNT;
        self.current_step = Some(step);

        let planned = resolve_tick(tracks, step, self.tick_duration_secs());
        if !self.voices_ready {
            return planned;
        }
        for note in &planned {
            match tracks.get(note.track).and_then(|t| t.voice) {
                Some(handle) => {
                    voices.trigger(handle, note.pitch, note.duration, note.offset, note.velocity)
                }
                None => tracing::debug!(track = %note.track, step, "no voice yet, skipping"),
            }
        }
        planned
    }

    /// Sets the tempo. Values below 1 are raised to 1.
    pub fn set_bpm(&mut self, bpm: u32, transport: &mut dyn Transport) {
        self.tempo = bpm.max(1);
        transport.set_tempo(self.tempo);
    }

    pub fn set_loop(&mut self, enabled: bool, transport: &mut dyn Transport) {
        self.looping = enabled;
        transport.set_loop(enabled, LOOP_START_BEAT, LOOP_END_BEAT);
    }

    /// Sets master volume (0-100). Applied now if voices are running,
    /// otherwise when they start.
    pub fn set_master_volume(&mut self, volume: u8, voices: &mut dyn VoiceBackend) {
        self.master_volume = volume.min(100);
        if self.voices_ready {
            voices.set_master_volume(self.master_volume);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{LogVoices, VoiceHandle};
    use crate::pattern::{InstrumentKind, NoteEvent, NoteKey, NoteMap};

    /// Records every trigger so tests can inspect them.
    #[derive(Default)]
    struct RecordingVoices {
        fail_init: bool,
        inits: usize,
        triggers: Vec<(VoiceHandle, Option<u8>, NoteValue)>,
    }

    impl VoiceBackend for RecordingVoices {
        fn init(&mut self) -> Result<(), VoiceError> {
            self.inits += 1;
            if self.fail_init {
                return Err(VoiceError::InitFailed("no device".into()));
            }
            Ok(())
        }

        fn create(&mut self, _kind: InstrumentKind) -> Result<VoiceHandle, VoiceError> {
            Ok(VoiceHandle(0))
        }

        fn dispose(&mut self, _handle: VoiceHandle) {}

        fn trigger(&mut self, h: VoiceHandle, p: Option<u8>, d: NoteValue, _t: f64, _v: f32) {
            self.triggers.push((h, p, d));
        }

        fn set_master_volume(&mut self, _volume: u8) {}

        fn set_track_volume(&mut self, _handle: VoiceHandle, _volume: u8) {}

        fn set_track_pan(&mut self, _handle: VoiceHandle, _pan: i8) {}
    }

    fn two_tracks_on_step_zero() -> TrackStore {
        let mut store = TrackStore::default();
        let b = store.add_track();
        store.toggle_step(TrackId(0), 0).unwrap();
        store.toggle_step(b, 0).unwrap();
        store
    }

    fn sounding(store: &TrackStore) -> Vec<TrackId> {
        resolve_tick(store, 0, 0.125)
            .iter()
            .map(|n| n.track)
            .collect()
    }

    #[test]
    fn test_solo_restricts_output() {
        for (mute_a, mute_b) in [(false, false), (false, true), (true, false), (true, true)] {
            let mut store = two_tracks_on_step_zero();
            store.set_solo(TrackId(0), true).unwrap();
            store.set_mute(TrackId(0), mute_a).unwrap();
            store.set_mute(TrackId(1), mute_b).unwrap();

            let expected = if mute_a { vec![] } else { vec![TrackId(0)] };
            assert_eq!(sounding(&store), expected, "mutes {mute_a} {mute_b}");
        }
    }

    #[test]
    fn test_no_solo_plays_unmuted() {
        let mut store = two_tracks_on_step_zero();
        assert_eq!(sounding(&store), vec![TrackId(0), TrackId(1)]);
        store.set_mute(TrackId(1), true).unwrap();
        assert_eq!(sounding(&store), vec![TrackId(0)]);
    }

    #[test]
    fn test_inactive_step_is_silent() {
        let store = TrackStore::default();
        assert!(resolve_tick(&store, 0, 0.125).is_empty());
    }

    #[test]
    fn test_step_pitch_wins_over_detailed_notes() {
        let mut store = TrackStore::default();
        let mut steps = [false; STEP_COUNT];
        let mut pitches = [None; STEP_COUNT];
        steps[1] = true;
        pitches[1] = Some(67);
        let track_notes: NoteMap = [(NoteKey::new(72, 1), NoteEvent::with_pitch(72))]
            .into_iter()
            .collect();
        store
            .apply_piano_roll(TrackId(0), track_notes, NoteValue::Quarter)
            .unwrap();
        // Override the derived pitch with a different explicit one
        let mut track = store.track_snapshot(TrackId(0)).unwrap();
        track.set_pattern(steps, pitches);
        let store = TrackStore::from_tracks([track]);

        let notes = resolve_tick(&store, 1, 0.125);
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].pitch, Some(67));
        assert_eq!(notes[0].duration, NoteValue::Eighth);
    }

    #[test]
    fn test_detailed_notes_offset_within_tick() {
        let mut track = Track::new(TrackId(0), 1);
        track.division = NoteValue::Sixteenth;
        let mut steps = [false; STEP_COUNT];
        steps[2] = true;
        track.set_pattern(steps, [None; STEP_COUNT]);
        track.detailed_notes = [(60, 8), (64, 8), (67, 11)]
            .into_iter()
            .map(|(p, s)| (NoteKey::new(p, s), NoteEvent::new(p, 0.5, NoteValue::Sixteenth)))
            .collect();
        let store = TrackStore::from_tracks([track]);

        let notes = resolve_tick(&store, 2, 0.2);
        assert_eq!(notes.len(), 3);
        assert_eq!(notes[0].pitch, Some(60));
        assert_eq!(notes[0].offset, 0.0);
        assert_eq!(notes[1].pitch, Some(64));
        assert!((notes[2].offset - 0.15).abs() < 1e-9);
        assert_eq!(notes[2].velocity, 0.5);
        assert_eq!(notes[2].duration, NoteValue::Sixteenth);
    }

    #[test]
    fn test_default_triggers() {
        let mut store = TrackStore::default();
        store.toggle_step(TrackId(0), 0).unwrap();
        let notes = resolve_tick(&store, 0, 0.125);
        assert_eq!(notes[0].pitch, Some(60));

        store.set_instrument(TrackId(0), InstrumentKind::Hihat).unwrap();
        let notes = resolve_tick(&store, 0, 0.125);
        assert_eq!(notes[0].pitch, None);
        assert_eq!(notes[0].duration, NoteValue::ThirtySecond);
    }

    #[test]
    fn test_tracks_use_their_own_division() {
        let notes = |pitch: u8| -> NoteMap {
            [(NoteKey::new(pitch, 4), NoteEvent::with_pitch(pitch))]
                .into_iter()
                .collect()
        };
        let mut store = TrackStore::default();
        let b = store.add_track();
        store
            .apply_piano_roll(TrackId(0), notes(60), NoteValue::Quarter)
            .unwrap();
        store.apply_piano_roll(b, notes(62), NoteValue::Eighth).unwrap();

        // Strip the derived pitches so both tracks fall through to their notes
        let tracks: Vec<Track> = store
            .all_tracks()
            .map(|t| {
                let mut t = t.clone();
                let steps = *t.steps();
                t.set_pattern(steps, [None; STEP_COUNT]);
                t
            })
            .collect();
        let store = TrackStore::from_tracks(tracks);

        let at_four = resolve_tick(&store, 4, 0.125);
        assert_eq!(at_four.len(), 1);
        assert_eq!(at_four[0].pitch, Some(60));

        let at_two = resolve_tick(&store, 2, 0.125);
        assert_eq!(at_two.len(), 1);
        assert_eq!(at_two[0].pitch, Some(62));
    }

    #[test]
    fn test_note_for_pitch() {
        let mut track = Track::new(TrackId(0), 1);
        let note = note_for_pitch(&track, 67);
        assert_eq!((note.pitch, note.duration), (Some(67), NoteValue::Eighth));

        track.instrument = InstrumentKind::Snare;
        let note = note_for_pitch(&track, 67);
        assert_eq!((note.pitch, note.duration), (None, NoteValue::Eighth));
    }

    #[test]
    fn test_drums_ignore_step_pitch() {
        let mut track = Track::new(TrackId(0), 1);
        track.instrument = InstrumentKind::Kick;
        let mut steps = [false; STEP_COUNT];
        let mut pitches = [None; STEP_COUNT];
        steps[0] = true;
        pitches[0] = Some(70);
        track.set_pattern(steps, pitches);
        let store = TrackStore::from_tracks([track]);

        let notes = resolve_tick(&store, 0, 0.125);
        assert_eq!(notes[0].pitch, Some(24));
    }

    #[test]
    fn test_state_transitions() {
        let mut scheduler = PlaybackScheduler::new(120);
        let mut voices = LogVoices::new();
        let mut transport = ManualTransport::new();

        scheduler.play(&mut voices, &mut transport).unwrap();
        assert_eq!(scheduler.state(), PlaybackState::Playing);
        assert!(transport.is_running());

        scheduler.pause(&mut transport);
        assert_eq!(scheduler.state(), PlaybackState::Paused);

        scheduler.play(&mut voices, &mut transport).unwrap();
        assert_eq!(transport.tick(), Some(0));
        assert_eq!(transport.tick(), Some(1));

        scheduler.stop(&mut transport);
        assert_eq!(scheduler.state(), PlaybackState::Stopped);
        assert_eq!(scheduler.current_step(), None);
        scheduler.play(&mut voices, &mut transport).unwrap();
        assert_eq!(transport.tick(), Some(0));
    }

    #[test]
    fn test_voice_init_failure_keeps_stopped() {
        let mut scheduler = PlaybackScheduler::new(120);
        let mut voices = RecordingVoices {
            fail_init: true,
            ..Default::default()
        };
        let mut transport = ManualTransport::new();

        assert!(scheduler.play(&mut voices, &mut transport).is_err());
        assert_eq!(scheduler.state(), PlaybackState::Stopped);
        assert!(!transport.is_running());

        voices.fail_init = false;
        scheduler.play(&mut voices, &mut transport).unwrap();
        scheduler.play(&mut voices, &mut transport).unwrap();
        assert_eq!(voices.inits, 2);
    }

    #[test]
    fn test_on_tick_triggers_attached_voices() {
        let mut store = two_tracks_on_step_zero();
        store.attach_voice(TrackId(0), VoiceHandle(3)).unwrap();

        let mut scheduler = PlaybackScheduler::new(120);
        let mut voices = RecordingVoices::default();
        let mut transport = ManualTransport::new();

        assert!(scheduler
            .on_tick(0, &store, &mut voices)
            .is_empty());

        scheduler.play(&mut voices, &mut transport).unwrap();
        let planned = scheduler.on_tick(32, &store, &mut voices);
        assert_eq!(planned.len(), 2);
        assert_eq!(scheduler.current_step(), Some(0));
        // Track 1 has no voice yet and stays silent
        assert_eq!(voices.triggers, vec![(VoiceHandle(3), Some(60), NoteValue::Eighth)]);
    }

    #[test]
    fn test_transport_settings() {
        let mut scheduler = PlaybackScheduler::new(120);
        let mut transport = ManualTransport::new();
        assert!((scheduler.tick_duration_secs() - 0.125).abs() < 1e-9);

        scheduler.set_bpm(0, &mut transport);
        assert_eq!(scheduler.tempo(), 1);
        scheduler.set_bpm(60, &mut transport);
        assert_eq!(transport.tempo(), 60);
        assert!((scheduler.tick_duration_secs() - 0.25).abs() < 1e-9);

        scheduler.set_loop(true, &mut transport);
        assert_eq!(transport.loop_region(), Some((0.0, 8.0)));
        scheduler.set_loop(false, &mut transport);
        assert_eq!(transport.loop_region(), None);
    }

    #[test]
    fn test_manual_transport_loops() {
        let mut transport = ManualTransport::new();
        transport.set_loop(true, LOOP_START_BEAT, LOOP_END_BEAT);
        transport.start();
        let steps: Vec<_> = (0..STEP_COUNT + 2).filter_map(|_| transport.tick()).collect();
        assert_eq!(steps[STEP_COUNT], 0);

        transport.set_loop(false, 0.0, 0.0);
        transport.stop();
        transport.start();
        assert_eq!((0..40).filter_map(|_| transport.tick()).count(), STEP_COUNT);
    }
}
