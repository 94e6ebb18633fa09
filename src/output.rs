//! Output artifact
//!
//! The result of a completed compression operation. The pipeline hands the
//! artifact back to the caller and retains no reference to it; writing the
//! bytes anywhere is the caller's job.

use serde::{Deserialize, Serialize};

/// Result of a completed compression
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputArtifact {
    /// Encoded output bytes
    #[serde(skip)]
    pub data: Vec<u8>,

    /// Suggested download filename
    pub suggested_filename: String,

    /// Output MIME type
    pub mime_type: String,

    /// Measured output duration in milliseconds
    pub duration_ms: u64,

    /// Measured output size in bytes (real encoded length)
    pub size_bytes: u64,
}

impl OutputArtifact {
    /// Percent of the original size saved by compression
    pub fn savings_percent(&self, original_size: u64) -> f64 {
        if original_size == 0 {
            return 0.0;
        }
        (original_size.saturating_sub(self.size_bytes)) as f64 / original_size as f64 * 100.0
    }
}

/// Derive the suggested output filename from the source file name
pub fn suggested_filename(source_base_name: &str) -> String {
    format!("{}_compressed.webm", source_base_name)
}

/// Format a byte count for humans
pub fn format_file_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0 Bytes".to_string();
    }
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];
    let exponent = ((bytes as f64).ln() / 1024f64.ln()).floor() as usize;
    let exponent = exponent.min(UNITS.len() - 1);
    let value = bytes as f64 / 1024f64.powi(exponent as i32);
    format!("{} {}", (value * 100.0).round() / 100.0, UNITS[exponent])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suggested_filename() {
        assert_eq!(suggested_filename("holiday"), "holiday_compressed.webm");
    }

    #[test]
    fn test_format_file_size() {
        assert_eq!(format_file_size(0), "0 Bytes");
        assert_eq!(format_file_size(512), "512 Bytes");
        assert_eq!(format_file_size(1024), "1 KB");
        assert_eq!(format_file_size(1536), "1.5 KB");
        assert_eq!(format_file_size(5 * 1024 * 1024), "5 MB");
    }

    #[test]
    fn test_savings_percent() {
        let artifact = OutputArtifact {
            data: vec![],
            suggested_filename: "a_compressed.webm".into(),
            mime_type: "video/webm".into(),
            duration_ms: 5000,
            size_bytes: 250,
        };
        assert_eq!(artifact.savings_percent(1000), 75.0);
        assert_eq!(artifact.savings_percent(0), 0.0);
        // Output larger than input never reports negative savings
        assert_eq!(artifact.savings_percent(100), 0.0);
    }
}
