//! Host capability probing
//!
//! The pipeline needs three things from the host: a decoder/prober
//! (`ffprobe`), a streaming encoder (`ffmpeg`), and at least one usable WebM
//! codec pair inside that encoder. Probing runs once per `start()` call and
//! a missing capability is terminal.

use serde::Serialize;
use std::collections::HashSet;
use std::process::Stdio;
use tokio::process::Command;

use crate::error::{CompressError, CompressResult};

/// Longer-edge cap applied on constrained hosts
pub const CONSTRAINED_MAX_DIMENSION: u32 = 1280;

/// A video/audio encoder pairing for WebM output, in ffmpeg encoder names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CodecPair {
    pub video: &'static str,
    pub audio: &'static str,
}

/// Descending-preference list of WebM codec pairs
pub const CODEC_PREFERENCE: [CodecPair; 3] = [
    CodecPair { video: "libvpx-vp9", audio: "libopus" },
    CodecPair { video: "libvpx", audio: "libopus" },
    CodecPair { video: "libvpx", audio: "libvorbis" },
];

/// What the host can do
#[derive(Debug, Clone)]
pub struct Platform {
    /// Whether the `ffmpeg` binary is runnable
    pub has_encoder: bool,

    /// Whether the `ffprobe` binary is runnable
    pub has_prober: bool,

    /// Encoder names reported by `ffmpeg -encoders`
    pub encoders: HashSet<String>,

    /// Resource-constrained host: capped resolution and capture rate
    pub constrained: bool,
}

impl Platform {
    /// Probe the current host
    pub async fn detect() -> Self {
        let encoders = query_encoders().await;
        let has_encoder = encoders.is_some();
        let has_prober = binary_runs("ffprobe").await;
        let constrained = detect_constrained();

        tracing::debug!(
            has_encoder,
            has_prober,
            constrained,
            "Platform probe complete"
        );

        Self {
            has_encoder,
            has_prober,
            encoders: encoders.unwrap_or_default(),
            constrained,
        }
    }

    /// Fail unless both decode and encode capabilities are present
    pub fn ensure_capable(&self) -> CompressResult<()> {
        if !self.has_prober {
            return Err(CompressError::UnsupportedPlatform(
                "ffprobe not found; video decoding is unavailable on this host".to_string(),
            ));
        }
        if !self.has_encoder {
            return Err(CompressError::UnsupportedPlatform(
                "ffmpeg not found; video encoding is unavailable on this host".to_string(),
            ));
        }
        Ok(())
    }

    /// Pick the first mutually supported codec pair
    pub fn select_codec(&self) -> CompressResult<CodecPair> {
        select_codec(&self.encoders).ok_or_else(|| {
            CompressError::EncodingUnsupported(
                "no WebM encoder (VP9/VP8 + Opus/Vorbis) available".to_string(),
            )
        })
    }

    /// Longer-edge cap for the render target, if any
    pub fn max_dimension(&self) -> Option<u32> {
        self.constrained.then_some(CONSTRAINED_MAX_DIMENSION)
    }

    /// Capture frame rate for the render loop
    pub fn capture_fps(&self) -> u32 {
        if self.constrained {
            24
        } else {
            30
        }
    }
}

/// First preference-list entry whose encoders are both available
pub fn select_codec(available: &HashSet<String>) -> Option<CodecPair> {
    CODEC_PREFERENCE
        .iter()
        .copied()
        .find(|pair| available.contains(pair.video) && available.contains(pair.audio))
}

/// Parse `ffmpeg -encoders` output into the set of encoder names
///
/// Lines look like ` V....D libvpx-vp9           libvpx VP9 Encoder (...)`.
/// The listing is preceded by a legend terminated by a `------` line.
pub fn parse_encoders(output: &str) -> HashSet<String> {
    let mut names = HashSet::new();
    let mut in_listing = false;

    for line in output.lines() {
        if !in_listing {
            if line.trim_start().starts_with("---") {
                in_listing = true;
            }
            continue;
        }
        let mut fields = line.split_whitespace();
        let (Some(flags), Some(name)) = (fields.next(), fields.next()) else {
            continue;
        };
        // First flag column is the codec type: V video, A audio
        if flags.starts_with('V') || flags.starts_with('A') {
            names.insert(name.to_string());
        }
    }

    names
}

async fn query_encoders() -> Option<HashSet<String>> {
    let output = Command::new("ffmpeg")
        .args(["-hide_banner", "-encoders"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .await
        .ok()?;

    if !output.status.success() {
        return None;
    }

    Some(parse_encoders(&String::from_utf8_lossy(&output.stdout)))
}

async fn binary_runs(name: &str) -> bool {
    Command::new(name)
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

fn detect_constrained() -> bool {
    std::thread::available_parallelism()
        .map(|n| n.get() <= 2)
        .unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn available(names: &[&str]) -> HashSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_parse_encoders() {
        let output = "\
Encoders:
 V..... = Video
 A..... = Audio
 ------
 V....D libvpx               libvpx VP8 Encoder (codec vp8)
 V....D libvpx-vp9           libvpx VP9 Encoder (codec vp9)
 A....D libopus              libopus Opus (codec opus)
 S..... dvbsub               DVB subtitles (codec dvb_subtitle)
";
        let names = parse_encoders(output);
        assert!(names.contains("libvpx"));
        assert!(names.contains("libvpx-vp9"));
        assert!(names.contains("libopus"));
        // Subtitle encoders are not media codecs we care about
        assert!(!names.contains("dvbsub"));
        // Legend lines must not leak into the set
        assert!(!names.contains("="));
    }

    #[test]
    fn test_codec_preference_order() {
        let all = available(&["libvpx", "libvpx-vp9", "libopus", "libvorbis"]);
        assert_eq!(
            select_codec(&all),
            Some(CodecPair { video: "libvpx-vp9", audio: "libopus" })
        );

        let no_vp9 = available(&["libvpx", "libopus", "libvorbis"]);
        assert_eq!(
            select_codec(&no_vp9),
            Some(CodecPair { video: "libvpx", audio: "libopus" })
        );

        let vorbis_only = available(&["libvpx", "libvorbis"]);
        assert_eq!(
            select_codec(&vorbis_only),
            Some(CodecPair { video: "libvpx", audio: "libvorbis" })
        );
    }

    #[test]
    fn test_no_codec_available() {
        assert_eq!(select_codec(&available(&["libx264", "aac"])), None);
        assert_eq!(select_codec(&HashSet::new()), None);
    }

    #[test]
    fn test_incapable_platform_errors() {
        let platform = Platform {
            has_encoder: false,
            has_prober: false,
            encoders: HashSet::new(),
            constrained: false,
        };
        assert!(matches!(
            platform.ensure_capable(),
            Err(CompressError::UnsupportedPlatform(_))
        ));
        assert!(matches!(
            platform.select_codec(),
            Err(CompressError::EncodingUnsupported(_))
        ));
    }

    #[test]
    fn test_constrained_caps() {
        let constrained = Platform {
            has_encoder: true,
            has_prober: true,
            encoders: HashSet::new(),
            constrained: true,
        };
        assert_eq!(constrained.max_dimension(), Some(1280));
        assert_eq!(constrained.capture_fps(), 24);

        let unconstrained = Platform { constrained: false, ..constrained };
        assert_eq!(unconstrained.max_dimension(), None);
        assert_eq!(unconstrained.capture_fps(), 30);
    }
}
