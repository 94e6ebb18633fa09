//! Raw frame decoder
//!
//! Streams a video file as raw RGBA frames over an ffmpeg pipe. The decoder
//! applies any rotation metadata itself, so every frame it hands out is
//! already upright at the given dimensions.

use std::io::{BufReader, Read};
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};

use crate::error::{CompressError, CompressResult};

/// Video decoder reading raw RGBA frames from a subprocess pipe
pub struct VideoDecoder {
    process: Child,
    stdout: BufReader<ChildStdout>,
    frame_size: usize,
    frames_read: u64,
}

impl VideoDecoder {
    /// Open a video file for decoding at the given upright dimensions
    pub fn open(video_path: &Path, width: u32, height: u32) -> CompressResult<Self> {
        let frame_size = (width * height * 4) as usize;

        tracing::debug!(
            path = %video_path.display(),
            width,
            height,
            "Opening frame decoder"
        );

        // -s pins the output size so a stray SAR never changes the pipe
        // framing; autorotation stays enabled by default.
        let path = video_path.to_string_lossy();
        let size = format!("{}x{}", width, height);
        let mut process = Command::new("ffmpeg")
            .args([
                "-hide_banner",
                "-loglevel",
                "error",
                "-i",
                path.as_ref(),
                "-f",
                "rawvideo",
                "-pix_fmt",
                "rgba",
                "-s",
                size.as_str(),
                "-",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                CompressError::SourceLoad(format!("failed to start frame decoder: {}", e))
            })?;

        let stdout = process.stdout.take().ok_or_else(|| {
            CompressError::SourceLoad("failed to capture decoder output".to_string())
        })?;

        Ok(Self {
            process,
            stdout: BufReader::with_capacity(frame_size * 2, stdout),
            frame_size,
            frames_read: 0,
        })
    }

    /// Read the next upright RGBA frame, or None at end of stream
    pub fn read_frame(&mut self) -> CompressResult<Option<Vec<u8>>> {
        let mut buffer = vec![0u8; self.frame_size];

        match self.stdout.read_exact(&mut buffer) {
            Ok(()) => {
                self.frames_read += 1;
                Ok(Some(buffer))
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(CompressError::SourceLoad(format!(
                "failed to read frame: {}",
                e
            ))),
        }
    }

    /// Number of frames read so far
    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    /// Stop the decoder process immediately
    pub fn stop(&mut self) {
        let _ = self.process.kill();
        let _ = self.process.wait();
    }
}

impl Drop for VideoDecoder {
    fn drop(&mut self) {
        self.stop();
    }
}
