//! Source asset handling
//!
//! A source asset is the caller-supplied input file together with its
//! declared media type. The asset is immutable for the life of one
//! compression operation; file selection itself (picker, drag-drop) belongs
//! to the caller.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CompressError, CompressResult};

/// A caller-supplied media asset
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceAsset {
    /// Path to the asset on disk
    pub path: PathBuf,

    /// Declared MIME type (e.g. "video/mp4")
    pub mime_type: String,

    /// Size in bytes
    pub size_bytes: u64,

    /// Original file name
    pub file_name: String,
}

impl SourceAsset {
    /// Build an asset from a path, reading its size and guessing the declared
    /// type from the extension
    pub fn from_path(path: &Path) -> CompressResult<Self> {
        let metadata = std::fs::metadata(path)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let mime_type = mime_from_extension(path);

        Ok(Self {
            path: path.to_path_buf(),
            mime_type,
            size_bytes: metadata.len(),
            file_name,
        })
    }

    /// Check that the declared type is of the expected video category
    ///
    /// Runs before any metadata load so a wrong asset never spawns a probe.
    pub fn ensure_video(&self) -> CompressResult<()> {
        if self.mime_type.starts_with("video/") {
            Ok(())
        } else {
            Err(CompressError::UnsupportedInput(format!(
                "expected a video file, got '{}'",
                self.mime_type
            )))
        }
    }

    /// File name without its final extension
    pub fn base_name(&self) -> &str {
        match self.file_name.rfind('.') {
            Some(idx) if idx > 0 => &self.file_name[..idx],
            _ => &self.file_name,
        }
    }

    /// Asset size in whole megabytes
    pub fn size_mb(&self) -> f64 {
        self.size_bytes as f64 / (1024.0 * 1024.0)
    }
}

/// Map a file extension to a declared MIME type
fn mime_from_extension(path: &Path) -> String {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        "mpg" | "mpeg" => "video/mpeg",
        "ogv" => "video/ogg",
        "3gp" => "video/3gpp",
        "wmv" => "video/x-ms-wmv",
        "ts" => "video/mp2t",
        "txt" => "text/plain",
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        _ => "application/octet-stream",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(name: &str, mime: &str) -> SourceAsset {
        SourceAsset {
            path: PathBuf::from(name),
            mime_type: mime.to_string(),
            size_bytes: 1024,
            file_name: name.to_string(),
        }
    }

    #[test]
    fn test_video_category_accepted() {
        assert!(asset("clip.mp4", "video/mp4").ensure_video().is_ok());
        assert!(asset("clip.webm", "video/webm").ensure_video().is_ok());
    }

    #[test]
    fn test_non_video_rejected() {
        let err = asset("notes.txt", "text/plain").ensure_video().unwrap_err();
        assert!(matches!(err, CompressError::UnsupportedInput(_)));
    }

    #[test]
    fn test_base_name_strips_extension() {
        assert_eq!(asset("holiday.mov", "video/quicktime").base_name(), "holiday");
        assert_eq!(asset("archive.tar.gz", "x").base_name(), "archive.tar");
        assert_eq!(asset("noext", "x").base_name(), "noext");
        // A leading dot is part of the name, not an extension separator
        assert_eq!(asset(".hidden", "x").base_name(), ".hidden");
    }

    #[test]
    fn test_mime_from_extension() {
        assert_eq!(mime_from_extension(Path::new("a.MP4")), "video/mp4");
        assert_eq!(mime_from_extension(Path::new("a.mkv")), "video/x-matroska");
        assert_eq!(mime_from_extension(Path::new("a.txt")), "text/plain");
        assert_eq!(
            mime_from_extension(Path::new("mystery.bin")),
            "application/octet-stream"
        );
    }
}
