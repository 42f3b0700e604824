//! # Local Media
//!
//! The participant's own camera and microphone. Capture itself is an
//! injected [`MediaSource`]; this module only tracks which tracks are live
//! and makes sure capture stops exactly once.
//!
//! Every peer session reads from the same source. Toggling a track here is
//! seen by all of them at once, with no renegotiation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Kind of a media track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

/// One captured track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaTrack {
    pub id: String,
    pub kind: TrackKind,
    pub enabled: bool,
}

/// A capture device session (camera + microphone).
pub trait MediaSource: Send + Sync {
    /// Current tracks and their enabled flags.
    fn tracks(&self) -> Vec<MediaTrack>;

    /// Enable or disable every track of the given kind.
    fn set_enabled(&self, kind: TrackKind, enabled: bool);

    /// Stop capture and release the devices.
    fn stop(&self);
}

/// The local capture, shared by every session of one client.
#[derive(Clone)]
pub struct LocalMedia {
    source: Arc<dyn MediaSource>,
    released: Arc<AtomicBool>,
}

impl LocalMedia {
    pub fn new(source: Arc<dyn MediaSource>) -> Self {
        Self {
            source,
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The underlying source, handed to transports so they can attach tracks.
    pub fn source(&self) -> Arc<dyn MediaSource> {
        Arc::clone(&self.source)
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    pub fn tracks(&self) -> Vec<MediaTrack> {
        self.source.tracks()
    }

    /// Flip the enabled flag of the first track of `kind` and apply it to
    /// all tracks of that kind.
    ///
    /// Returns the new flag, or `None` when there is no such track.
    pub fn toggle(&self, kind: TrackKind) -> Result<Option<bool>> {
        if self.is_released() {
            return Err(Error::MediaReleased);
        }
        let current = self.source.tracks().into_iter().find(|t| t.kind == kind);
        match current {
            Some(track) => {
                let enabled = !track.enabled;
                self.source.set_enabled(kind, enabled);
                tracing::debug!(?kind, enabled, "Toggled local track");
                Ok(Some(enabled))
            }
            None => Ok(None),
        }
    }

    pub fn toggle_audio(&self) -> Result<Option<bool>> {
        self.toggle(TrackKind::Audio)
    }

    pub fn toggle_video(&self) -> Result<Option<bool>> {
        self.toggle(TrackKind::Video)
    }

    /// Stop capture. Safe to call any number of times; the source is
    /// stopped once.
    pub fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.source.stop();
            tracing::info!("Released local media");
        }
    }
}

impl std::fmt::Debug for LocalMedia {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalMedia")
            .field("tracks", &self.source.tracks())
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeMediaSource;

    #[test]
    fn test_toggle_flips_and_reports() {
        let source = FakeMediaSource::camera_and_mic();
        let media = LocalMedia::new(source.clone());

        assert_eq!(media.toggle_audio().unwrap(), Some(false));
        assert_eq!(media.toggle_audio().unwrap(), Some(true));
        assert_eq!(media.toggle_video().unwrap(), Some(false));
        assert!(source.tracks().iter().any(|t| t.kind == TrackKind::Video && !t.enabled));
    }

    #[test]
    fn test_toggle_missing_kind() {
        let media = LocalMedia::new(FakeMediaSource::audio_only());
        assert_eq!(media.toggle_video().unwrap(), None);
    }

    #[test]
    fn test_release_is_idempotent() {
        let source = FakeMediaSource::camera_and_mic();
        let media = LocalMedia::new(source.clone());
        media.release();
        media.clone().release();
        assert_eq!(source.stop_count(), 1);
        assert!(media.is_released());
        assert!(matches!(media.toggle_audio(), Err(Error::MediaReleased)));
    }
}
