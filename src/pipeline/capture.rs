//! Capture stream
//!
//! The live media stream derived from the render target: one video track
//! (frames leaving the surface at the capture rate) and optionally the
//! source's audio track. Tracks exist only between encoder start and
//! teardown, and every track must be explicitly stopped on release so no
//! media handle outlives the operation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Kind of media track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
}

/// A stoppable media track
#[async_trait]
pub trait CaptureTrack: Send + Sync {
    fn kind(&self) -> TrackKind;

    /// Whether the track has been stopped
    fn is_stopped(&self) -> bool;

    /// Stop the track; further frames/samples are discarded
    async fn stop(&self);
}

/// Video track fed from the render target
///
/// The encode loop checks the stop gate before every frame, so stopping the
/// track halts the feed at the next frame boundary.
#[derive(Debug, Default)]
pub struct VideoTrack {
    stopped: AtomicBool,
}

#[async_trait]
impl CaptureTrack for VideoTrack {
    fn kind(&self) -> TrackKind {
        TrackKind::Video
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }

    async fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
    }
}

/// Audio track lifted from the source file
#[derive(Debug)]
pub struct AudioTrack {
    source: PathBuf,
    stopped: AtomicBool,
}

impl AudioTrack {
    pub fn new(source: PathBuf) -> Self {
        Self {
            source,
            stopped: AtomicBool::new(false),
        }
    }

    /// Source file the audio is read from, None once stopped
    pub fn source(&self) -> Option<&PathBuf> {
        if self.is_stopped() {
            None
        } else {
            Some(&self.source)
        }
    }
}

#[async_trait]
impl CaptureTrack for AudioTrack {
    fn kind(&self) -> TrackKind {
        TrackKind::Audio
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }

    async fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
    }
}

/// The live capture stream for one operation
pub struct CaptureStream {
    video: Arc<VideoTrack>,
    audio: Option<Arc<AudioTrack>>,
}

impl CaptureStream {
    /// Derive a stream from the render surface, merging in the source's
    /// audio track when it has one
    pub fn new(audio_source: Option<PathBuf>) -> Self {
        Self {
            video: Arc::new(VideoTrack::default()),
            audio: audio_source.map(|p| Arc::new(AudioTrack::new(p))),
        }
    }

    pub fn video(&self) -> Arc<VideoTrack> {
        self.video.clone()
    }

    pub fn audio(&self) -> Option<Arc<AudioTrack>> {
        self.audio.clone()
    }

    /// All tracks as trait objects, for teardown
    pub fn tracks(&self) -> Vec<Arc<dyn CaptureTrack>> {
        let mut tracks: Vec<Arc<dyn CaptureTrack>> = vec![self.video.clone()];
        if let Some(audio) = &self.audio {
            tracks.push(audio.clone());
        }
        tracks
    }

    /// Whether every track reports stopped
    pub fn all_stopped(&self) -> bool {
        self.video.is_stopped() && self.audio.as_ref().map(|a| a.is_stopped()).unwrap_or(true)
    }
}
