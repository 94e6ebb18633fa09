//! Progress tracking
//!
//! Progress derives from playback position, never wall-clock time. Reported
//! values are clamped to [0, 100] and monotonically non-decreasing within an
//! operation; the tracker is reset only at operation start.

use serde::{Deserialize, Serialize};

/// Stages a progress update can belong to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum ProgressStage {
    /// Loading source metadata
    Loading,
    /// Encoding frames
    Compressing,
    /// Nearing completion or draining final data
    Finalizing,
    /// Operation completed
    Complete,
}

/// A single progress report
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    /// Progress percentage (0.0 to 100.0)
    pub percent: f32,

    /// Human-readable label
    pub label: String,

    /// Current stage
    pub stage: ProgressStage,
}

impl ProgressUpdate {
    pub fn loading(size_mb: f64) -> Self {
        Self {
            percent: 0.0,
            label: format!("Loading {:.0}MB video...", size_mb),
            stage: ProgressStage::Loading,
        }
    }

    pub fn processing_final_frames() -> Self {
        Self {
            percent: 98.0,
            label: "Processing final frames...".to_string(),
            stage: ProgressStage::Finalizing,
        }
    }

    pub fn saving() -> Self {
        Self {
            percent: 99.0,
            label: "Saving video...".to_string(),
            stage: ProgressStage::Finalizing,
        }
    }

    pub fn complete() -> Self {
        Self {
            percent: 100.0,
            label: "Compression complete".to_string(),
            stage: ProgressStage::Complete,
        }
    }
}

/// Monotonic, clamped progress state for one operation
#[derive(Debug, Default)]
pub struct ProgressTracker {
    last_percent: f32,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset at operation start; the one place progress may decrease
    pub fn reset(&mut self) {
        self.last_percent = 0.0;
    }

    /// Clamp to [0, 100] and hold monotonicity
    fn advance(&mut self, raw: f64) -> f32 {
        let clamped = raw.clamp(0.0, 100.0) as f32;
        if clamped > self.last_percent {
            self.last_percent = clamped;
        }
        self.last_percent
    }

    /// Build an encoding-phase update from the playback position
    ///
    /// The label switches to finalizing from 95% on, with the displayed
    /// percent held at 99 until the encoder actually closes.
    pub fn report(&mut self, position_ms: u64, duration_ms: u64) -> ProgressUpdate {
        let raw = if duration_ms > 0 {
            position_ms as f64 / duration_ms as f64 * 100.0
        } else {
            0.0
        };
        let percent = self.advance(raw);
        let rounded = percent.round() as u32;

        if rounded >= 95 {
            ProgressUpdate {
                percent,
                label: format!("Finalizing... {}%", rounded.min(99)),
                stage: ProgressStage::Finalizing,
            }
        } else {
            ProgressUpdate {
                percent,
                label: format!("Compressing... {}%", rounded),
                stage: ProgressStage::Compressing,
            }
        }
    }

    pub fn percent(&self) -> f32 {
        self.last_percent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_and_clamped() {
        let mut tracker = ProgressTracker::new();
        assert_eq!(tracker.report(1000, 10_000).percent, 10.0);
        assert_eq!(tracker.report(5000, 10_000).percent, 50.0);
        // Position regressions never lower reported progress
        assert_eq!(tracker.report(2000, 10_000).percent, 50.0);
        // Overshoot clamps to 100
        assert_eq!(tracker.report(20_000, 10_000).percent, 100.0);
    }

    #[test]
    fn test_reset_allows_decrease() {
        let mut tracker = ProgressTracker::new();
        tracker.report(9000, 10_000);
        tracker.reset();
        assert_eq!(tracker.report(100, 10_000).percent, 1.0);
    }

    #[test]
    fn test_finalizing_label_near_completion() {
        let mut tracker = ProgressTracker::new();
        let update = tracker.report(9000, 10_000);
        assert_eq!(update.stage, ProgressStage::Compressing);
        assert_eq!(update.label, "Compressing... 90%");

        let update = tracker.report(9600, 10_000);
        assert_eq!(update.stage, ProgressStage::Finalizing);
        assert_eq!(update.label, "Finalizing... 96%");

        // Displayed percent stays at 99 even when position says 100
        let update = tracker.report(10_000, 10_000);
        assert_eq!(update.label, "Finalizing... 99%");
        assert_eq!(update.percent, 100.0);
    }

    #[test]
    fn test_zero_duration_reports_zero() {
        let mut tracker = ProgressTracker::new();
        assert_eq!(tracker.report(500, 0).percent, 0.0);
    }
}
