//! steproll - A 32-step sequencer core with a piano-roll editor.
//!
//! This library provides the track model, playback scheduling and the
//! two-store persistence that keeps the step grid and the piano roll in
//! agreement.

pub mod app;
pub mod audio;
pub mod config;
pub mod pattern;
pub mod piano_roll;
pub mod scale;
pub mod storage;
pub mod view;

// Re-export commonly used types
pub use app::App;
pub use audio::{LogVoices, ManualTransport, PlaybackScheduler, PlaybackState};
pub use config::Config;
pub use pattern::{InstrumentKind, Track, TrackId, TrackStore, STEP_COUNT};
pub use piano_roll::PianoRollSession;
pub use scale::Scale;
pub use storage::{FileStore, MemoryStore, Reconciler};
