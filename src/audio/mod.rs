//! Playback and instrument voices.
//!
//! This module provides:
//! - The voice interface and the per-instrument parameter table
//! - A logging voice backend for headless use
//! - The step scheduler and the transport it is driven by

pub mod playback;
pub mod voice;

pub use playback::{
    note_for_pitch, resolve_tick, ManualTransport, PlannedNote, PlaybackScheduler, PlaybackState,
    Transport,
};
pub use voice::{
    pan_position, volume_to_db, Engine, Envelope, LogVoices, VoiceBackend, VoiceError, VoiceHandle,
    VoiceParams,
};
