//! Instrument voices.
//!
//! Synthesis happens behind [`VoiceBackend`]. This module only decides what
//! to ask for: each [`InstrumentKind`] maps to one row of a parameter table
//! instead of being matched on wherever a voice is built or triggered.

use crate::pattern::{note_to_name, InstrumentKind, NoteValue, MIDDLE_C};
use std::collections::BTreeMap;
use thiserror::Error;

/// Opaque reference to a live voice owned by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VoiceHandle(pub u64);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VoiceError {
    #[error("audio subsystem failed to start: {0}")]
    InitFailed(String),
}

/// Synthesis engine family a voice is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    /// Pitched membrane (kick drum).
    Membrane,
    /// Filtered white noise.
    Noise,
    /// Inharmonic metallic partials (hi-hat).
    Metal,
    /// Single oscillator.
    Basic,
    /// Frequency modulation pair.
    Fm,
    /// Amplitude modulation pair.
    Am,
}

/// ADSR envelope, times in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    pub attack: f32,
    pub decay: f32,
    pub sustain: f32,
    pub release: f32,
}

const MELODIC_ENVELOPE: Envelope = Envelope {
    attack: 0.1,
    decay: 0.2,
    sustain: 0.3,
    release: 1.0,
};

/// Construction and trigger parameters for one instrument kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoiceParams {
    pub engine: Engine,
    pub envelope: Envelope,
    /// Pitch used when the step carries none. `None` for unpitched voices.
    pub trigger_pitch: Option<u8>,
    /// Duration of a step-triggered note.
    pub trigger_duration: NoteValue,
    /// Whether explicit pitches reach the voice.
    pub uses_pitch: bool,
}

/// Indexed by `InstrumentKind as usize`.
const VOICE_TABLE: [VoiceParams; 7] = [
    // kick
    VoiceParams {
        engine: Engine::Membrane,
        envelope: Envelope {
            attack: 0.001,
            decay: 0.4,
            sustain: 0.01,
            release: 1.4,
        },
        trigger_pitch: Some(24),
        trigger_duration: NoteValue::Eighth,
        uses_pitch: false,
    },
    // snare
    VoiceParams {
        engine: Engine::Noise,
        envelope: Envelope {
            attack: 0.001,
            decay: 0.2,
            sustain: 0.0,
            release: 0.2,
        },
        trigger_pitch: None,
        trigger_duration: NoteValue::Eighth,
        uses_pitch: false,
    },
    // hihat
    VoiceParams {
        engine: Engine::Metal,
        envelope: Envelope {
            attack: 0.001,
            decay: 0.1,
            sustain: 0.0,
            release: 0.01,
        },
        trigger_pitch: None,
        trigger_duration: NoteValue::ThirtySecond,
        uses_pitch: false,
    },
    // synth
    VoiceParams {
        engine: Engine::Basic,
        envelope: MELODIC_ENVELOPE,
        trigger_pitch: Some(MIDDLE_C),
        trigger_duration: NoteValue::Eighth,
        uses_pitch: true,
    },
    // fm
    VoiceParams {
        engine: Engine::Fm,
        envelope: MELODIC_ENVELOPE,
        trigger_pitch: Some(MIDDLE_C),
        trigger_duration: NoteValue::Eighth,
        uses_pitch: true,
    },
    // am
    VoiceParams {
        engine: Engine::Am,
        envelope: MELODIC_ENVELOPE,
        trigger_pitch: Some(MIDDLE_C),
        trigger_duration: NoteValue::Eighth,
        uses_pitch: true,
    },
    // noise
    VoiceParams {
        engine: Engine::Noise,
        envelope: Envelope {
            attack: 0.005,
            decay: 0.1,
            sustain: 0.0,
            release: 0.0,
        },
        trigger_pitch: None,
        trigger_duration: NoteValue::Eighth,
        uses_pitch: false,
    },
];

impl InstrumentKind {
    /// Looks up this instrument's voice parameters.
    pub fn params(self) -> VoiceParams {
        VOICE_TABLE[self as usize]
    }
}

/// The sound-producing side of an instrument.
///
/// Calls are synchronous from the caller's point of view. Notes are
/// fire-and-forget: each carries its own duration and needs no note-off.
pub trait VoiceBackend {
    /// Starts the audio subsystem. Called lazily before first playback.
    fn init(&mut self) -> Result<(), VoiceError>;

    /// Builds a voice for an instrument.
    fn create(&mut self, kind: InstrumentKind) -> Result<VoiceHandle, VoiceError>;

    /// Releases a voice. Unknown handles are ignored.
    fn dispose(&mut self, handle: VoiceHandle);

    /// Plays one note.
    ///
    /// # Arguments
    ///
    /// * `handle` - Voice to play on
    /// * `pitch` - MIDI pitch, or None for unpitched voices
    /// * `duration` - How long the note sounds
    /// * `time` - Offset in seconds from the current tick
    /// * `velocity` - Loudness in [0, 1]
    fn trigger(
        &mut self,
        handle: VoiceHandle,
        pitch: Option<u8>,
        duration: NoteValue,
        time: f64,
        velocity: f32,
    );

    /// Master output level, 0-100.
    fn set_master_volume(&mut self, volume: u8);

    /// Channel level of one voice, 0-100.
    fn set_track_volume(&mut self, handle: VoiceHandle, volume: u8);

    /// Stereo position of one voice, -100 (left) to 100 (right).
    fn set_track_pan(&mut self, handle: VoiceHandle, pan: i8);
}

/// Maps a -100..=100 pan slider value onto -1.0..=1.0.
pub fn pan_position(pan: i8) -> f32 {
    f32::from(pan.clamp(-100, 100)) / 100.0
}

/// Converts a 0-100 volume slider value to decibels (-60 dB at 0).
pub fn volume_to_db(volume: u8) -> f32 {
    let volume = volume.min(100);
    if volume == 0 {
        -60.0
    } else {
        (volume as f32 - 100.0) * 0.6
    }
}

#[derive(Debug, Clone, Copy)]
struct LiveVoice {
    kind: InstrumentKind,
    volume: u8,
    pan: i8,
}

/// Backend that only logs what it would play.
///
/// Keeps track of live voices so disposal and leaks are observable.
#[derive(Debug, Default)]
pub struct LogVoices {
    next_handle: u64,
    voices: BTreeMap<VoiceHandle, LiveVoice>,
    initialized: bool,
    triggered: usize,
}

impl LogVoices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live_voices(&self) -> usize {
        self.voices.len()
    }

    pub fn triggered(&self) -> usize {
        self.triggered
    }

    /// Channel volume and pan last set on a live voice.
    pub fn mix(&self, handle: VoiceHandle) -> Option<(u8, i8)> {
        self.voices.get(&handle).map(|v| (v.volume, v.pan))
    }
}

impl VoiceBackend for LogVoices {
    fn init(&mut self) -> Result<(), VoiceError> {
        if !self.initialized {
            tracing::info!("voice backend ready");
            self.initialized = true;
        }
        Ok(())
    }

    fn create(&mut self, kind: InstrumentKind) -> Result<VoiceHandle, VoiceError> {
        let handle = VoiceHandle(self.next_handle);
        self.next_handle += 1;
        self.voices.insert(
            handle,
            LiveVoice {
                kind,
                volume: 100,
                pan: 0,
            },
        );
        tracing::debug!(voice = handle.0, engine = ?kind.params().engine, "created {} voice", kind);
        Ok(handle)
    }

    fn dispose(&mut self, handle: VoiceHandle) {
        if self.voices.remove(&handle).is_some() {
            tracing::debug!(voice = handle.0, "disposed voice");
        }
    }

    fn trigger(
        &mut self,
        handle: VoiceHandle,
        pitch: Option<u8>,
        duration: NoteValue,
        time: f64,
        velocity: f32,
    ) {
        let Some(kind) = self.voices.get(&handle).map(|v| v.kind) else {
            tracing::debug!(voice = handle.0, "trigger on disposed voice ignored");
            return;
        };
        self.triggered += 1;
        let note = pitch.map(note_to_name).unwrap_or_else(|| "-".to_string());
        tracing::info!(
            "{:<6} {:<4} {:>3} +{:.3}s vel {:.2}",
            kind.as_str(),
            note,
            duration.as_str(),
            time,
            velocity
        );
    }

    fn set_master_volume(&mut self, volume: u8) {
        tracing::debug!("master volume {:.1} dB", volume_to_db(volume));
    }

    fn set_track_volume(&mut self, handle: VoiceHandle, volume: u8) {
        if let Some(voice) = self.voices.get_mut(&handle) {
            voice.volume = volume.min(100);
            tracing::debug!(voice = handle.0, "channel volume {:.1} dB", volume_to_db(volume));
        }
    }

    fn set_track_pan(&mut self, handle: VoiceHandle, pan: i8) {
        if let Some(voice) = self.voices.get_mut(&handle) {
            voice.pan = pan.clamp(-100, 100);
            tracing::debug!(voice = handle.0, "channel pan {:+.2}", pan_position(pan));
        }
    }
}
