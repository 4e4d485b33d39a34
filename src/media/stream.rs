use std::fmt;
use std::sync::Arc;

use crate::types::{TrackKind, TrackSettings};

/// A single captured audio or video track
pub trait MediaTrack: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;
    fn kind(&self) -> TrackKind;
    /// Settings the device actually negotiated
    fn settings(&self) -> TrackSettings;
    /// Release the underlying hardware; idempotent
    fn stop(&self);
    fn is_live(&self) -> bool;
}

/// A set of tracks produced by one capture request
#[derive(Debug, Clone)]
pub struct MediaStream {
    id: String,
    tracks: Vec<Arc<dyn MediaTrack>>,
}

impl MediaStream {
    pub fn new(id: impl Into<String>, tracks: Vec<Arc<dyn MediaTrack>>) -> Self {
        Self {
            id: id.into(),
            tracks,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[Arc<dyn MediaTrack>] {
        &self.tracks
    }

    pub fn tracks_of(&self, kind: TrackKind) -> impl Iterator<Item = &Arc<dyn MediaTrack>> {
        self.tracks.iter().filter(move |t| t.kind() == kind)
    }

    /// Negotiated settings of the first video track
    pub fn video_settings(&self) -> Option<TrackSettings> {
        self.tracks_of(TrackKind::Video).next().map(|t| t.settings())
    }

    pub fn audio_settings(&self) -> Option<TrackSettings> {
        self.tracks_of(TrackKind::Audio).next().map(|t| t.settings())
    }

    pub fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }

    pub fn is_live(&self) -> bool {
        self.tracks.iter().any(|t| t.is_live())
    }
}
