//! Source metadata probing
//!
//! Loads duration, dimensions, rotation, and audio presence from a media
//! file via ffprobe. The whole load runs under a timeout proportional to the
//! asset size; a timeout or decode failure is a terminal `SourceLoad` error.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::asset::SourceAsset;
use crate::error::{CompressError, CompressResult};

/// Probed metadata of a source video
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceMetadata {
    /// Duration in milliseconds
    pub duration_ms: u64,

    /// Upright width in pixels (rotation metadata already applied)
    pub width: u32,

    /// Upright height in pixels
    pub height: u32,

    /// Rotation in degrees carried by the container metadata
    pub rotation_degrees: i32,

    /// Whether the source carries at least one audio stream
    pub has_audio: bool,
}

impl SourceMetadata {
    pub fn duration_secs(&self) -> f64 {
        self.duration_ms as f64 / 1000.0
    }
}

/// Metadata load timeout: 30s base plus 10s per 100MB of input
pub fn load_timeout(size_bytes: u64) -> Duration {
    let size_mb = size_bytes / (1024 * 1024);
    Duration::from_secs(30 + (size_mb / 100) * 10)
}

/// Probe a source asset under its size-proportional timeout
pub async fn probe_source(asset: &SourceAsset) -> CompressResult<SourceMetadata> {
    let timeout = load_timeout(asset.size_bytes);
    tracing::debug!(
        path = %asset.path.display(),
        timeout_secs = timeout.as_secs(),
        "Probing source metadata"
    );

    match tokio::time::timeout(timeout, probe_file(&asset.path)).await {
        Ok(result) => result,
        Err(_) => Err(CompressError::SourceLoad(format!(
            "metadata load timed out after {}s; the file may be too large or unreadable",
            timeout.as_secs()
        ))),
    }
}

/// Probe only the duration of a finished media file, if possible
pub async fn probe_duration_ms(path: &Path) -> Option<u64> {
    let output = run_ffprobe(path, &["-show_entries", "format=duration"])
        .await
        .ok()?;
    parse_duration_ms(&output)
}

async fn probe_file(path: &Path) -> CompressResult<SourceMetadata> {
    let video_out = run_ffprobe(
        path,
        &[
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height:stream_side_data=rotation",
        ],
    )
    .await?;

    let general_out = run_ffprobe(
        path,
        &["-show_entries", "format=duration:stream=codec_type"],
    )
    .await?;

    parse_probe_output(&video_out, &general_out)
}

async fn run_ffprobe(path: &Path, entries: &[&str]) -> CompressResult<String> {
    let mut args = vec!["-v", "error"];
    args.extend_from_slice(entries);
    args.extend_from_slice(&["-of", "default=noprint_wrappers=1"]);

    let path_str = path.to_string_lossy();
    let output = Command::new("ffprobe")
        .args(&args)
        .arg(path_str.as_ref())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| CompressError::SourceLoad(format!("failed to run ffprobe: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CompressError::SourceLoad(format!(
            "the file may be corrupted or in an unsupported format: {}",
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Parse the two ffprobe outputs into source metadata
///
/// `video_out` holds `width=`/`height=`/`rotation=` lines for the first
/// video stream; `general_out` holds `codec_type=` lines for every stream
/// plus the container `duration=`.
pub fn parse_probe_output(video_out: &str, general_out: &str) -> CompressResult<SourceMetadata> {
    let mut width: Option<u32> = None;
    let mut height: Option<u32> = None;
    let mut rotation: i32 = 0;

    for line in video_out.lines() {
        if let Some(value) = line.strip_prefix("width=") {
            width = value.trim().parse().ok();
        } else if let Some(value) = line.strip_prefix("height=") {
            height = value.trim().parse().ok();
        } else if let Some(value) = line.strip_prefix("rotation=") {
            rotation = value.trim().parse().unwrap_or(0);
        }
    }

    let (Some(native_width), Some(native_height)) = (width, height) else {
        return Err(CompressError::SourceLoad(
            "no decodable video stream found".to_string(),
        ));
    };
    if native_width == 0 || native_height == 0 {
        return Err(CompressError::SourceLoad(
            "video stream reports zero dimensions".to_string(),
        ));
    }

    let duration_ms = parse_duration_ms(general_out).ok_or_else(|| {
        CompressError::SourceLoad("container reports no duration".to_string())
    })?;
    if duration_ms == 0 {
        return Err(CompressError::SourceLoad(
            "container reports zero duration".to_string(),
        ));
    }

    let has_audio = general_out
        .lines()
        .any(|line| line.trim() == "codec_type=audio");

    // A quarter-turn rotation swaps the upright dimensions; the decoder
    // applies the rotation itself, so downstream only sees upright frames.
    let quarter_turn = rotation.rem_euclid(180) == 90;
    let (upright_width, upright_height) = if quarter_turn {
        (native_height, native_width)
    } else {
        (native_width, native_height)
    };

    Ok(SourceMetadata {
        duration_ms,
        width: upright_width,
        height: upright_height,
        rotation_degrees: rotation,
        has_audio,
    })
}

fn parse_duration_ms(output: &str) -> Option<u64> {
    output
        .lines()
        .find_map(|line| line.strip_prefix("duration="))
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(|secs| (secs * 1000.0).round() as u64)
}
