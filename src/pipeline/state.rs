//! Pipeline state management
//!
//! Defines the compression state machine and per-operation session tracking.
//! Every lifecycle event moves through one validated transition function, so
//! stall handling, cancellation, and teardown are exhaustive over states.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CompressError, CompressResult};
use crate::media::SourceMetadata;
use crate::preset::QualityPreset;

/// Current state of a compression operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    /// No operation in progress
    #[default]
    Idle,
    /// Loading source metadata
    Loading,
    /// Warming up the render loop until the surface has content
    Warming,
    /// Encoding frames
    Encoding,
    /// Playback ended, draining final encoder data
    Finalizing,
    /// Operation completed successfully
    Done,
    /// Operation cancelled by the caller
    Cancelled,
    /// Operation failed
    Failed,
}

impl PipelineState {
    /// Whether a transition from `self` to `next` is legal
    pub fn can_transition(self, next: PipelineState) -> bool {
        use PipelineState::*;
        match (self, next) {
            (Idle, Loading) => true,
            (Loading, Warming) | (Warming, Encoding) | (Encoding, Finalizing) => true,
            (Finalizing, Done) => true,
            // Cancellation and failure are reachable from any active state
            (Loading | Warming | Encoding | Finalizing, Cancelled | Failed) => true,
            // Terminal states reset to Idle for the next operation
            (Done | Cancelled | Failed, Idle) => true,
            _ => false,
        }
    }

    /// Whether an operation is currently in flight
    pub fn is_active(self) -> bool {
        matches!(
            self,
            PipelineState::Loading
                | PipelineState::Warming
                | PipelineState::Encoding
                | PipelineState::Finalizing
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PipelineState::Done | PipelineState::Cancelled | PipelineState::Failed
        )
    }
}

/// Shared state cell with validated transitions
#[derive(Debug, Default)]
pub struct StateCell {
    state: RwLock<PipelineState>,
}

impl StateCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> PipelineState {
        *self.state.read()
    }

    /// Move to `next`, refusing illegal transitions
    pub fn transition(&self, next: PipelineState) -> CompressResult<()> {
        let mut state = self.state.write();
        if !state.can_transition(next) {
            return Err(CompressError::Recording(format!(
                "illegal state transition {:?} -> {:?}",
                *state, next
            )));
        }
        tracing::debug!(from = ?*state, to = ?next, "Pipeline state transition");
        *state = next;
        Ok(())
    }
}

/// Per-operation session state
///
/// Constructed fresh for every operation and passed through the call chain;
/// nothing about an operation lives in module or controller globals.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionSession {
    /// Unique operation id
    pub id: Uuid,

    /// When the operation started
    pub started_at: DateTime<Utc>,

    /// When the operation ended (success, failure, or cancellation)
    pub ended_at: Option<DateTime<Utc>>,

    /// Source duration in milliseconds
    pub source_duration_ms: u64,

    /// Upright source dimensions
    pub source_width: u32,
    pub source_height: u32,

    /// Whether the source carries audio
    pub has_audio: bool,

    /// Render target dimensions
    pub target_width: u32,
    pub target_height: u32,

    /// Capture frame rate
    pub capture_fps: u32,

    /// Preset the operation runs under
    pub preset: QualityPreset,

    /// Output duration cap in milliseconds, when shorter than the source
    pub effective_duration_ms: u64,
}

impl CompressionSession {
    pub fn new(
        metadata: &SourceMetadata,
        target: (u32, u32),
        capture_fps: u32,
        preset: QualityPreset,
        max_duration_ms: Option<u64>,
    ) -> Self {
        let effective_duration_ms = match max_duration_ms {
            Some(cap) => metadata.duration_ms.min(cap),
            None => metadata.duration_ms,
        };

        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            ended_at: None,
            source_duration_ms: metadata.duration_ms,
            source_width: metadata.width,
            source_height: metadata.height,
            has_audio: metadata.has_audio,
            target_width: target.0,
            target_height: target.1,
            capture_fps,
            preset,
            effective_duration_ms,
        }
    }

    /// Mark the session as ended now
    pub fn end(&mut self) {
        self.ended_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PipelineState::*;

    #[test]
    fn test_happy_path_transitions() {
        let cell = StateCell::new();
        for next in [Loading, Warming, Encoding, Finalizing, Done, Idle] {
            cell.transition(next).unwrap();
        }
        assert_eq!(cell.get(), Idle);
    }

    #[test]
    fn test_cancel_and_fail_from_any_active_state() {
        for active in [Loading, Warming, Encoding, Finalizing] {
            assert!(active.can_transition(Cancelled));
            assert!(active.can_transition(Failed));
        }
        assert!(!Idle.can_transition(Cancelled));
        assert!(!Done.can_transition(Failed));
    }

    #[test]
    fn test_illegal_transitions_refused() {
        let cell = StateCell::new();
        assert!(cell.transition(Encoding).is_err());
        assert_eq!(cell.get(), Idle);

        cell.transition(Loading).unwrap();
        assert!(cell.transition(Finalizing).is_err());
        assert!(cell.transition(Idle).is_err());
    }

    #[test]
    fn test_active_and_terminal() {
        assert!(Encoding.is_active());
        assert!(!Idle.is_active());
        assert!(Done.is_terminal());
        assert!(Cancelled.is_terminal());
        assert!(!Warming.is_terminal());
    }

    #[test]
    fn test_session_duration_cap() {
        let metadata = SourceMetadata {
            duration_ms: 10_000,
            width: 640,
            height: 480,
            rotation_degrees: 0,
            has_audio: true,
        };
        let uncapped =
            CompressionSession::new(&metadata, (640, 480), 30, QualityPreset::Balanced, None);
        assert_eq!(uncapped.effective_duration_ms, 10_000);

        let capped = CompressionSession::new(
            &metadata,
            (640, 480),
            30,
            QualityPreset::Balanced,
            Some(4_000),
        );
        assert_eq!(capped.effective_duration_ms, 4_000);

        let loose_cap = CompressionSession::new(
            &metadata,
            (640, 480),
            30,
            QualityPreset::Balanced,
            Some(60_000),
        );
        assert_eq!(loose_cap.effective_duration_ms, 10_000);
    }
}
