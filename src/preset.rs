//! Quality presets
//!
//! Fixed bitrate bundles selectable by the caller. The preset is the whole
//! configuration surface of the pipeline: no other encoder tunables are
//! exposed.

use serde::{Deserialize, Serialize};

/// Quality preset levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QualityPreset {
    Low,
    #[default]
    Balanced,
    High,
}

impl QualityPreset {
    /// Target video bitrate in bits per second
    pub fn video_bitrate(&self) -> u32 {
        match self {
            QualityPreset::Low => 500_000,
            QualityPreset::Balanced => 2_000_000,
            QualityPreset::High => 5_000_000,
        }
    }

    /// Target audio bitrate in bits per second
    ///
    /// Only applied when the source carries an audio track.
    pub fn audio_bitrate(&self) -> u32 {
        match self {
            QualityPreset::Low => 64_000,
            QualityPreset::Balanced => 128_000,
            QualityPreset::High => 192_000,
        }
    }

    /// Human-readable preset label
    pub fn label(&self) -> &'static str {
        match self {
            QualityPreset::Low => "Low Quality",
            QualityPreset::Balanced => "Balanced",
            QualityPreset::High => "High Quality",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitrates_ascend_with_quality() {
        assert!(QualityPreset::Low.video_bitrate() < QualityPreset::Balanced.video_bitrate());
        assert!(QualityPreset::Balanced.video_bitrate() < QualityPreset::High.video_bitrate());
        assert!(QualityPreset::Low.audio_bitrate() < QualityPreset::Balanced.audio_bitrate());
        assert!(QualityPreset::Balanced.audio_bitrate() < QualityPreset::High.audio_bitrate());
    }

    #[test]
    fn test_default_is_balanced() {
        assert_eq!(QualityPreset::default(), QualityPreset::Balanced);
    }

    #[test]
    fn test_serde_lowercase() {
        assert_eq!(
            serde_json::to_string(&QualityPreset::Balanced).unwrap(),
            "\"balanced\""
        );
        let preset: QualityPreset = serde_json::from_str("\"high\"").unwrap();
        assert_eq!(preset, QualityPreset::High);
    }
}
