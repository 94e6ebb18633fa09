//! Streaming WebM encoder
//!
//! Consumes raw RGBA frames on a subprocess pipe and encodes them, together
//! with the source's audio track when present, into a WebM file under the
//! preset bitrates. Output goes to a temp file; the finished bytes are read
//! back once the encoder exits.

use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use tempfile::NamedTempFile;

use crate::error::{CompressError, CompressResult};
use crate::platform::CodecPair;
use crate::preset::QualityPreset;

/// Everything the encoder needs to know up front
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub codec: CodecPair,
    pub preset: QualityPreset,
    /// Source file to lift the audio track from, when it has one
    pub audio_source: Option<PathBuf>,
}

/// The finished encode: real bytes plus the temp file they came from
pub struct EncodedOutput {
    pub data: Vec<u8>,
    temp: NamedTempFile,
}

impl EncodedOutput {
    /// Path of the encoded file, valid until this value is dropped
    pub fn path(&self) -> &Path {
        self.temp.path()
    }
}

/// Streaming encoder bound to a live frame feed
pub struct StreamEncoder {
    process: Option<Child>,
    stdin: Option<BufWriter<ChildStdin>>,
    output: Option<NamedTempFile>,
    frame_count: u64,
}

impl StreamEncoder {
    /// Spawn the encoder process
    pub fn start(config: &EncoderConfig) -> CompressResult<Self> {
        let output = tempfile::Builder::new()
            .prefix("vidsqueeze-")
            .suffix(".webm")
            .tempfile()
            .map_err(|e| CompressError::Recording(format!("failed to create temp file: {}", e)))?;

        let args = build_encoder_args(config, output.path());
        tracing::info!(?args, "Starting stream encoder");

        let mut process = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| CompressError::Recording(format!("failed to start encoder: {}", e)))?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| CompressError::Recording("failed to capture encoder input".to_string()))?;

        let frame_size = (config.width * config.height * 4) as usize;

        Ok(Self {
            process: Some(process),
            stdin: Some(BufWriter::with_capacity(frame_size * 2, stdin)),
            output: Some(output),
            frame_count: 0,
        })
    }

    /// Feed one RGBA frame
    pub fn write_frame(&mut self, rgba_data: &[u8]) -> CompressResult<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| CompressError::Recording("encoder already closed".to_string()))?;
        stdin
            .write_all(rgba_data)
            .map_err(|e| CompressError::Recording(format!("failed to write frame: {}", e)))?;
        self.frame_count += 1;
        Ok(())
    }

    /// Flush buffered frame data through to the encoder process
    ///
    /// Called on a fixed interval so partial progress is never lost to a
    /// crash of the feeding side.
    pub fn flush(&mut self) -> CompressResult<()> {
        if let Some(stdin) = self.stdin.as_mut() {
            stdin
                .flush()
                .map_err(|e| CompressError::Recording(format!("failed to flush encoder: {}", e)))?;
        }
        Ok(())
    }

    /// Number of frames written so far
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Close the frame feed, wait for the encoder, and collect the output
    pub fn finish(mut self) -> CompressResult<EncodedOutput> {
        // Dropping stdin signals EOF
        if let Some(mut stdin) = self.stdin.take() {
            let _ = stdin.flush();
        }

        let process = self
            .process
            .take()
            .ok_or_else(|| CompressError::Recording("encoder already stopped".to_string()))?;

        let result = process
            .wait_with_output()
            .map_err(|e| CompressError::Recording(format!("failed to wait for encoder: {}", e)))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(CompressError::Recording(format!(
                "encoder exited with error: {}",
                stderr.trim()
            )));
        }

        let temp = self
            .output
            .take()
            .ok_or_else(|| CompressError::Recording("encoder output missing".to_string()))?;
        let data = std::fs::read(temp.path())?;

        tracing::info!(
            frames = self.frame_count,
            bytes = data.len(),
            "Stream encoder finished"
        );

        Ok(EncodedOutput { data, temp })
    }

    /// Kill the encoder process immediately, discarding its output
    pub fn abort(&mut self) {
        self.stdin.take();
        if let Some(mut process) = self.process.take() {
            let _ = process.kill();
            let _ = process.wait();
        }
        self.output.take();
    }
}

impl Drop for StreamEncoder {
    fn drop(&mut self) {
        self.abort();
    }
}

/// Assemble the ffmpeg argument list for a streaming WebM encode
pub fn build_encoder_args(config: &EncoderConfig, output_path: &Path) -> Vec<String> {
    let mut args = vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-y".to_string(),
        // Input 0: raw frames on stdin at the capture rate
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pix_fmt".to_string(),
        "rgba".to_string(),
        "-s".to_string(),
        format!("{}x{}", config.width, config.height),
        "-r".to_string(),
        config.fps.to_string(),
        "-i".to_string(),
        "-".to_string(),
    ];

    // Input 1: the source again, audio only
    if let Some(audio_source) = &config.audio_source {
        args.extend([
            "-i".to_string(),
            audio_source.to_string_lossy().to_string(),
            "-map".to_string(),
            "0:v:0".to_string(),
            "-map".to_string(),
            "1:a:0".to_string(),
            // Audio must not outlive the captured video
            "-shortest".to_string(),
        ]);
    }

    args.extend([
        "-c:v".to_string(),
        config.codec.video.to_string(),
        "-b:v".to_string(),
        config.preset.video_bitrate().to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
    ]);

    if config.audio_source.is_some() {
        args.extend([
            "-c:a".to_string(),
            config.codec.audio.to_string(),
            "-b:a".to_string(),
            config.preset.audio_bitrate().to_string(),
        ]);
    }

    args.extend([
        "-f".to_string(),
        "webm".to_string(),
        output_path.to_string_lossy().to_string(),
    ]);

    args
}
