//! The boundary to whatever renders the sequencer.
//!
//! The core notifies a [`View`] after state changes and receives user input
//! as [`Gesture`] values. Every notification has a no-op default so a view
//! implements only what it draws.

use crate::pattern::{InstrumentKind, TrackId};

/// Receives state-change notifications.
pub trait View {
    fn track_added(&mut self, _id: TrackId, _display_number: usize) {}

    fn track_removed(&mut self, _id: TrackId) {}

    /// Sent after any add or delete with the full (id, number) list.
    fn track_renumbered(&mut self, _numbering: &[(TrackId, usize)]) {}

    fn step_toggled(&mut self, _id: TrackId, _step: usize, _active: bool) {}

    /// The step now playing, or None once playback stops.
    fn tick_advanced(&mut self, _step: Option<usize>) {}

    fn instrument_changed(&mut self, _id: TrackId, _instrument: InstrumentKind) {}

    /// Any other track change that needs a redraw (mute, solo, clear).
    fn track_updated(&mut self, _id: TrackId) {}

    fn status(&mut self, _message: &str) {}
}

/// A view that draws nothing.
#[derive(Debug, Default)]
pub struct NullView;

impl View for NullView {}

/// A view that logs each notification.
#[derive(Debug, Default)]
pub struct LogView;

impl View for LogView {
    fn track_added(&mut self, id: TrackId, display_number: usize) {
        tracing::debug!(track = %id, "view: Track {} added", display_number);
    }

    fn track_removed(&mut self, id: TrackId) {
        tracing::debug!(track = %id, "view: track removed");
    }

    fn step_toggled(&mut self, id: TrackId, step: usize, active: bool) {
        tracing::debug!(track = %id, step, active, "view: step toggled");
    }

    fn status(&mut self, message: &str) {
        tracing::info!("{}", message);
    }
}

/// User input forwarded by the view.
#[derive(Debug, Clone, PartialEq)]
pub enum Gesture {
    AddTrack,
    DeleteTrack(TrackId),
    ToggleStep(TrackId, usize),
    ChangeInstrument(TrackId, InstrumentKind),
    SetMute(TrackId, bool),
    SetSolo(TrackId, bool),
    /// Channel level, 0-100. Not saved.
    SetTrackVolume(TrackId, u8),
    /// Stereo position, -100 to 100. Not saved.
    SetTrackPan(TrackId, i8),
    /// A computer-keyboard key pressed while a track is selected.
    PreviewKey(TrackId, char),
    ClearAll,
    /// Opens the piano-roll editor for a track.
    OpenEditor(TrackId),
    Play,
    Pause,
    Stop,
    SetBpm(u32),
    SetLoop(bool),
    SetMasterVolume(u8),
    SetKey(String),
    SetMode(String),
}

/// What the view should do after a gesture is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Navigation {
    Stay,
    /// Switch to the piano-roll editor context for this track.
    OpenEditor(TrackId),
}
