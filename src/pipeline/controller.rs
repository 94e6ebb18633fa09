//! Compression controller
//!
//! Owns the whole video-to-WebM operation: validate the input, probe host
//! capability, load source metadata under a bounded timeout, warm up the
//! render loop, derive the capture stream, drive the encoder, run the
//! periodic flush / stall-detection / progress tasks, and tear everything
//! down exactly once on every exit path.

use parking_lot::{Mutex, RwLock};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::asset::SourceAsset;
use crate::error::{CompressError, CompressResult};
use crate::media::decoder::VideoDecoder;
use crate::media::encoder::{EncoderConfig, StreamEncoder};
use crate::media::probe::{probe_duration_ms, probe_source};
use crate::output::{suggested_filename, OutputArtifact};
use crate::pipeline::capture::{CaptureStream, CaptureTrack, VideoTrack};
use crate::pipeline::progress::{ProgressTracker, ProgressUpdate};
use crate::pipeline::render::{target_dimensions, RenderTarget};
use crate::pipeline::state::{CompressionSession, PipelineState, StateCell};
use crate::platform::Platform;
use crate::preset::QualityPreset;

/// Interval between encoder flush requests
const FLUSH_INTERVAL: Duration = Duration::from_millis(500);

/// Interval between playback stall checks
const STALL_CHECK_INTERVAL: Duration = Duration::from_millis(500);

/// Interval between progress reports
const PROGRESS_INTERVAL: Duration = Duration::from_millis(200);

/// Consecutive static checks before a stall triggers a nudge
const STALL_THRESHOLD: u32 = 3;

/// Position nudge applied to un-stick a stalled playback, in milliseconds
const NUDGE_EPSILON_MS: u64 = 10;

/// Frames the warm-up will decode while waiting for a non-empty one
const WARMUP_FRAME_LIMIT: u64 = 90;

/// Grace period for final encoder data after playback ends
const FINAL_FLUSH_GRACE: Duration = Duration::from_millis(100);

/// Controller configuration beyond the preset
#[derive(Debug, Clone, Default)]
pub struct ControllerConfig {
    /// Quality preset for the next operation
    pub preset: QualityPreset,

    /// Output duration cap; sources longer than this are truncated
    pub max_duration: Option<Duration>,

    /// Overall operation timeout; a stall that outlives it fails the run
    pub operation_timeout: Option<Duration>,

    /// Force constrained-host behavior on or off instead of auto-detecting
    pub constrained_override: Option<bool>,
}

/// Events emitted during a compression operation
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase", tag = "event")]
pub enum PipelineEvent {
    StateChanged { state: PipelineState },
    Progress { update: ProgressUpdate },
    Completed { duration_ms: u64, size_bytes: u64 },
    Failed { code: String, message: String },
}

/// Values shared between the encode loop and the periodic tasks
#[derive(Debug, Default)]
struct Shared {
    /// Set by the flush timer, consumed by the encode loop
    flush_requested: AtomicBool,

    /// Accumulated stall-nudge offset in milliseconds
    nudge_ms: AtomicU64,

    /// Playback position derived from encoded frames, in milliseconds
    position_ms: AtomicU64,

    /// Natural end of playback reached
    playback_ended: AtomicBool,
}

impl Shared {
    /// Playback position including nudges, as the progress side sees it
    fn effective_position(&self) -> u64 {
        self.position_ms.load(Ordering::Relaxed) + self.nudge_ms.load(Ordering::Relaxed)
    }
}

/// Cancellation handles for everything an operation attaches
///
/// All periodic tasks and capture tracks register here, and release runs
/// exactly once no matter how many exit paths reach it.
pub struct Teardown {
    released: AtomicBool,
    timers: Mutex<Vec<JoinHandle<()>>>,
    tracks: Mutex<Vec<Arc<dyn CaptureTrack>>>,
}

impl Teardown {
    pub fn new() -> Self {
        Self {
            released: AtomicBool::new(false),
            timers: Mutex::new(Vec::new()),
            tracks: Mutex::new(Vec::new()),
        }
    }

    fn add_timer(&self, handle: JoinHandle<()>) {
        self.timers.lock().push(handle);
    }

    fn add_tracks(&self, tracks: Vec<Arc<dyn CaptureTrack>>) {
        self.tracks.lock().extend(tracks);
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Abort all timers and stop all tracks; safe to call repeatedly
    pub async fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }

        let timers: Vec<JoinHandle<()>> = self.timers.lock().drain(..).collect();
        for timer in timers {
            timer.abort();
        }

        let tracks: Vec<Arc<dyn CaptureTrack>> = self.tracks.lock().drain(..).collect();
        for track in tracks {
            track.stop().await;
        }

        tracing::debug!("Operation resources released");
    }
}

impl Default for Teardown {
    fn default() -> Self {
        Self::new()
    }
}

/// The capture/record controller
pub struct CompressionController {
    config: RwLock<ControllerConfig>,
    state: Arc<StateCell>,
    cancel_flag: Arc<AtomicBool>,
    in_flight: Arc<AtomicBool>,
    event_tx: broadcast::Sender<PipelineEvent>,
    platform: Option<Platform>,
}

impl CompressionController {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            config: RwLock::new(ControllerConfig::default()),
            state: Arc::new(StateCell::new()),
            cancel_flag: Arc::new(AtomicBool::new(false)),
            in_flight: Arc::new(AtomicBool::new(false)),
            event_tx,
            platform: None,
        }
    }

    /// Use an already-probed platform instead of detecting per operation
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn with_config(self, config: ControllerConfig) -> Self {
        *self.config.write() = config;
        self
    }

    /// Select the quality preset for subsequent operations
    ///
    /// Has no effect on an operation already in flight: each run snapshots
    /// its configuration at start.
    pub fn configure(&self, preset: QualityPreset) {
        self.config.write().preset = preset;
    }

    pub fn config(&self) -> ControllerConfig {
        self.config.read().clone()
    }

    pub fn state(&self) -> PipelineState {
        self.state.get()
    }

    /// Subscribe to pipeline events
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.event_tx.subscribe()
    }

    /// Request early termination of the in-flight operation
    ///
    /// Cooperative: the flag is observed at the operation's next suspension
    /// point. Safe to call at any time; once the operation has settled this
    /// is a no-op.
    pub fn cancel(&self) {
        if !self.in_flight.load(Ordering::SeqCst) {
            tracing::debug!("Cancel requested with no operation in flight");
            return;
        }
        tracing::info!("Cancelling compression");
        self.cancel_flag.store(true, Ordering::SeqCst);
    }

    /// Run one compression operation to completion
    pub async fn start(&self, asset: &SourceAsset) -> CompressResult<OutputArtifact> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return Err(CompressError::Recording(
                "operation already in flight".to_string(),
            ));
        }

        let config = self.config.read().clone();
        let teardown = Arc::new(Teardown::new());

        // First suspension point: a cancel issued right after start() is
        // observed before any work begins.
        tokio::task::yield_now().await;

        let mut timed_out = false;
        let result = match config.operation_timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, self.run(asset, &config, &teardown)).await {
                    Ok(result) => result,
                    Err(_) => {
                        // The blocking side observes the flag and exits
                        timed_out = true;
                        self.cancel_flag.store(true, Ordering::SeqCst);
                        Err(CompressError::Recording("operation timed out".to_string()))
                    }
                }
            }
            None => self.run(asset, &config, &teardown).await,
        };

        teardown.release().await;

        // A cancel that arrived before settlement wins over any other
        // outcome, including success. A timeout is not a caller cancel even
        // though it reuses the flag to stop the blocking side.
        let result = if !timed_out && self.cancel_flag.load(Ordering::SeqCst) {
            Err(CompressError::Cancelled)
        } else {
            result
        };

        self.settle(&result);
        self.cancel_flag.store(false, Ordering::SeqCst);
        self.in_flight.store(false, Ordering::SeqCst);
        result
    }

    async fn run(
        &self,
        asset: &SourceAsset,
        config: &ControllerConfig,
        teardown: &Arc<Teardown>,
    ) -> CompressResult<OutputArtifact> {
        self.check_cancelled()?;

        // Category check runs before any metadata load
        asset.ensure_video()?;

        // Capability probe runs before anything is attached
        let mut platform = match &self.platform {
            Some(platform) => platform.clone(),
            None => Platform::detect().await,
        };
        platform.ensure_capable()?;
        if let Some(constrained) = config.constrained_override {
            platform.constrained = constrained;
        }

        self.check_cancelled()?;
        self.set_state(PipelineState::Loading)?;
        self.emit(PipelineEvent::Progress {
            update: ProgressUpdate::loading(asset.size_mb()),
        });

        let metadata = probe_source(asset).await?;
        self.check_cancelled()?;

        let target = target_dimensions(metadata.width, metadata.height, platform.max_dimension());
        let mut session = CompressionSession::new(
            &metadata,
            target,
            platform.capture_fps(),
            config.preset,
            config.max_duration.map(|d| d.as_millis() as u64),
        );
        tracing::info!(
            session = %session.id,
            duration_ms = session.source_duration_ms,
            source = %format!("{}x{}", session.source_width, session.source_height),
            target = %format!("{}x{}", session.target_width, session.target_height),
            fps = session.capture_fps,
            preset = ?session.preset,
            has_audio = session.has_audio,
            "Starting compression"
        );

        // Warm up the render loop until the surface has a non-empty frame;
        // this playback pass is discarded afterwards.
        self.set_state(PipelineState::Warming)?;
        let surface = {
            let source = asset.path.clone();
            let decode = (metadata.width, metadata.height);
            let cancel = self.cancel_flag.clone();
            tokio::task::spawn_blocking(move || run_warmup(&source, decode, target, &cancel))
                .await
                .map_err(|e| CompressError::Recording(format!("warm-up task panicked: {}", e)))??
        };
        self.check_cancelled()?;

        // Derive the capture stream and bind the encoder to it
        let stream = CaptureStream::new(session.has_audio.then(|| asset.path.clone()));
        teardown.add_tracks(stream.tracks());

        let codec = platform.select_codec()?;
        let encoder = StreamEncoder::start(&EncoderConfig {
            width: session.target_width,
            height: session.target_height,
            fps: session.capture_fps,
            codec,
            preset: session.preset,
            audio_source: stream.audio().and_then(|a| a.source().cloned()),
        })?;

        self.set_state(PipelineState::Encoding)?;

        let shared = Arc::new(Shared::default());
        self.spawn_periodic_tasks(&shared, session.effective_duration_ms, teardown);

        // Restart playback from the beginning and encode for real
        let outcome = {
            let source = asset.path.clone();
            let decode = (metadata.width, metadata.height);
            let video_track = stream.video();
            let cancel = self.cancel_flag.clone();
            let shared = shared.clone();
            let state = self.state.clone();
            let events = self.event_tx.clone();
            let fps = session.capture_fps;
            let cap_ms = session.effective_duration_ms;

            tokio::task::spawn_blocking(move || {
                run_encode_loop(
                    &source,
                    decode,
                    surface,
                    encoder,
                    &video_track,
                    &cancel,
                    &shared,
                    &state,
                    &events,
                    fps,
                    cap_ms,
                )
            })
            .await
            .map_err(|e| CompressError::Recording(format!("encode task panicked: {}", e)))??
        };

        // Measure the real output, never an approximation
        let duration_ms = match probe_duration_ms(outcome.encoded.path()).await {
            Some(ms) => ms,
            None => outcome.frames_encoded * 1000 / session.capture_fps as u64,
        };
        session.end();

        let size_bytes = outcome.encoded.data.len() as u64;
        let artifact = OutputArtifact {
            data: outcome.encoded.data,
            suggested_filename: suggested_filename(asset.base_name()),
            mime_type: "video/webm".to_string(),
            duration_ms,
            size_bytes,
        };

        tracing::info!(
            session = %session.id,
            duration_ms,
            size_bytes,
            "Compression complete"
        );
        self.emit(PipelineEvent::Progress {
            update: ProgressUpdate::complete(),
        });

        Ok(artifact)
    }

    /// Spawn the flush, stall-detection, and progress timers
    ///
    /// All three register with the teardown list so they are cancelled
    /// together as a unit; none may outlive the operation.
    fn spawn_periodic_tasks(
        &self,
        shared: &Arc<Shared>,
        effective_duration_ms: u64,
        teardown: &Arc<Teardown>,
    ) {
        // Progress reporting, driven by playback position
        {
            let shared = shared.clone();
            let events = self.event_tx.clone();
            teardown.add_timer(tokio::spawn(async move {
                let mut tracker = ProgressTracker::new();
                tracker.reset();
                let mut interval = tokio::time::interval(PROGRESS_INTERVAL);
                loop {
                    interval.tick().await;
                    if shared.playback_ended.load(Ordering::Relaxed) {
                        break;
                    }
                    let update =
                        tracker.report(shared.effective_position(), effective_duration_ms);
                    let _ = events.send(PipelineEvent::Progress { update });
                }
            }));
        }

        // Stall detection with position nudging
        {
            let shared = shared.clone();
            teardown.add_timer(tokio::spawn(async move {
                let mut interval = tokio::time::interval(STALL_CHECK_INTERVAL);
                let mut last_position = shared.effective_position();
                let mut stall_count = 0u32;
                loop {
                    interval.tick().await;
                    if shared.playback_ended.load(Ordering::Relaxed) {
                        break;
                    }
                    let position = shared.effective_position();
                    if position == last_position {
                        stall_count += 1;
                        if stall_count > STALL_THRESHOLD {
                            tracing::debug!(position, "Playback stalled, nudging");
                            shared.nudge_ms.fetch_add(NUDGE_EPSILON_MS, Ordering::Relaxed);
                        }
                    } else {
                        stall_count = 0;
                    }
                    last_position = shared.effective_position();
                }
            }));
        }

        // Periodic flush so buffered data is never lost to a crash
        {
            let shared = shared.clone();
            teardown.add_timer(tokio::spawn(async move {
                let mut interval = tokio::time::interval(FLUSH_INTERVAL);
                loop {
                    interval.tick().await;
                    if shared.playback_ended.load(Ordering::Relaxed) {
                        break;
                    }
                    shared.flush_requested.store(true, Ordering::Relaxed);
                }
            }));
        }
    }

    fn check_cancelled(&self) -> CompressResult<()> {
        if self.cancel_flag.load(Ordering::SeqCst) {
            Err(CompressError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn set_state(&self, next: PipelineState) -> CompressResult<()> {
        self.state.transition(next)?;
        self.emit(PipelineEvent::StateChanged { state: next });
        Ok(())
    }

    fn emit(&self, event: PipelineEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Record the terminal outcome and reset to Idle for the next operation
    fn settle(&self, result: &CompressResult<OutputArtifact>) {
        let terminal = match result {
            Ok(artifact) => {
                self.emit(PipelineEvent::Completed {
                    duration_ms: artifact.duration_ms,
                    size_bytes: artifact.size_bytes,
                });
                PipelineState::Done
            }
            Err(CompressError::Cancelled) => {
                self.emit(PipelineEvent::Failed {
                    code: "CANCELLED".to_string(),
                    message: "Compression cancelled".to_string(),
                });
                PipelineState::Cancelled
            }
            Err(error) => {
                tracing::error!(code = error.code(), %error, "Compression failed");
                self.emit(PipelineEvent::Failed {
                    code: error.code().to_string(),
                    message: error.to_string(),
                });
                PipelineState::Failed
            }
        };

        // Validation failures never left Idle; both transitions are
        // best-effort there.
        if self.state.get().is_active() {
            let _ = self.state.transition(terminal);
            self.emit(PipelineEvent::StateChanged { state: terminal });
        }
        if self.state.get().is_terminal() {
            let _ = self.state.transition(PipelineState::Idle);
        }
    }
}

impl Default for CompressionController {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode frames until the surface has received a non-empty one
fn run_warmup(
    source: &Path,
    decode: (u32, u32),
    target: (u32, u32),
    cancel: &AtomicBool,
) -> CompressResult<RenderTarget> {
    let mut decoder = VideoDecoder::open(source, decode.0, decode.1)?;
    let mut surface = RenderTarget::new(target.0, target.1);

    while surface.frames_drawn() < WARMUP_FRAME_LIMIT {
        if cancel.load(Ordering::SeqCst) {
            return Err(CompressError::Cancelled);
        }
        match decoder.read_frame()? {
            Some(frame) => {
                surface.draw_frame(&frame, decode.0, decode.1);
                if surface.has_content() {
                    break;
                }
            }
            None => break,
        }
    }

    if surface.frames_drawn() == 0 {
        return Err(CompressError::SourceLoad(
            "source produced no decodable frames".to_string(),
        ));
    }

    tracing::debug!(
        frames = surface.frames_drawn(),
        has_content = surface.has_content(),
        "Warm-up complete"
    );
    Ok(surface)
}

struct EncodeOutcome {
    encoded: crate::media::encoder::EncodedOutput,
    frames_encoded: u64,
}

/// The blocking frame loop: decode, redraw, feed the encoder
#[allow(clippy::too_many_arguments)]
fn run_encode_loop(
    source: &Path,
    decode: (u32, u32),
    mut surface: RenderTarget,
    mut encoder: StreamEncoder,
    video_track: &VideoTrack,
    cancel: &AtomicBool,
    shared: &Shared,
    state: &StateCell,
    events: &broadcast::Sender<PipelineEvent>,
    fps: u32,
    effective_duration_ms: u64,
) -> CompressResult<EncodeOutcome> {
    let mut decoder = VideoDecoder::open(source, decode.0, decode.1)?;

    loop {
        if cancel.load(Ordering::SeqCst) {
            return Err(CompressError::Cancelled);
        }
        if video_track.is_stopped() {
            break;
        }
        if shared.flush_requested.swap(false, Ordering::Relaxed) {
            encoder.flush()?;
        }

        let Some(frame) = decoder.read_frame()? else {
            break;
        };
        surface.draw_frame(&frame, decode.0, decode.1);
        encoder.write_frame(surface.pixels())?;

        let position = encoder.frame_count() * 1000 / fps as u64;
        shared.position_ms.store(position, Ordering::Relaxed);

        if position >= effective_duration_ms {
            tracing::debug!(position, "Duration cap reached");
            break;
        }
    }

    shared.playback_ended.store(true, Ordering::Relaxed);
    decoder.stop();

    if cancel.load(Ordering::SeqCst) {
        return Err(CompressError::Cancelled);
    }

    let _ = state.transition(PipelineState::Finalizing);
    let _ = events.send(PipelineEvent::StateChanged {
        state: PipelineState::Finalizing,
    });
    let _ = events.send(PipelineEvent::Progress {
        update: ProgressUpdate::processing_final_frames(),
    });

    // Final flush, then a short grace so the last buffered data lands
    encoder.flush()?;
    std::thread::sleep(FINAL_FLUSH_GRACE);

    let frames_encoded = encoder.frame_count();
    let encoded = encoder.finish()?;

    let _ = events.send(PipelineEvent::Progress {
        update: ProgressUpdate::saving(),
    });

    Ok(EncodeOutcome {
        encoded,
        frames_encoded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::path::PathBuf;

    fn capable_platform() -> Platform {
        Platform {
            has_encoder: true,
            has_prober: true,
            encoders: ["libvpx-vp9", "libvpx", "libopus", "libvorbis"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            constrained: false,
        }
    }

    fn incapable_platform() -> Platform {
        Platform {
            has_encoder: false,
            has_prober: false,
            encoders: HashSet::new(),
            constrained: false,
        }
    }

    fn video_asset(name: &str) -> SourceAsset {
        SourceAsset {
            path: PathBuf::from(format!("/nonexistent/{}", name)),
            mime_type: "video/mp4".to_string(),
            size_bytes: 1024,
            file_name: name.to_string(),
        }
    }

    #[tokio::test]
    async fn test_unsupported_input_rejected_before_probe() {
        let controller = CompressionController::new().with_platform(capable_platform());
        let asset = SourceAsset {
            path: PathBuf::from("/nonexistent/notes.txt"),
            mime_type: "text/plain".to_string(),
            size_bytes: 10,
            file_name: "notes.txt".to_string(),
        };

        let err = controller.start(&asset).await.unwrap_err();
        assert!(matches!(err, CompressError::UnsupportedInput(_)));
        // Validation failures never leave Idle
        assert_eq!(controller.state(), PipelineState::Idle);
    }

    #[tokio::test]
    async fn test_unsupported_platform_rejected_without_resources() {
        let controller = CompressionController::new().with_platform(incapable_platform());
        let err = controller.start(&video_asset("clip.mp4")).await.unwrap_err();
        assert!(matches!(err, CompressError::UnsupportedPlatform(_)));
        assert_eq!(controller.state(), PipelineState::Idle);
        assert!(!controller.in_flight.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_second_start_refused_while_in_flight() {
        let controller = CompressionController::new().with_platform(capable_platform());
        controller.in_flight.store(true, Ordering::SeqCst);

        let err = controller.start(&video_asset("clip.mp4")).await.unwrap_err();
        assert!(matches!(err, CompressError::Recording(_)));
    }

    #[tokio::test]
    async fn test_cancel_before_settlement_wins() {
        let controller = Arc::new(
            CompressionController::new().with_platform(capable_platform()),
        );
        let mut events = controller.subscribe();

        let handle = {
            let controller = controller.clone();
            let asset = video_asset("clip.mp4");
            tokio::spawn(async move { controller.start(&asset).await })
        };

        // Let the operation reach its first suspension point, then cancel
        tokio::task::yield_now().await;
        controller.cancel();

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, CompressError::Cancelled));
        assert_eq!(controller.state(), PipelineState::Idle);
        assert!(!controller.cancel_flag.load(Ordering::SeqCst));

        let mut saw_cancelled_event = false;
        while let Ok(event) = events.try_recv() {
            if let PipelineEvent::Failed { code, .. } = event {
                saw_cancelled_event = code == "CANCELLED";
            }
        }
        assert!(saw_cancelled_event);
    }

    #[tokio::test]
    async fn test_cancel_without_operation_is_noop() {
        let controller = CompressionController::new().with_platform(capable_platform());
        controller.cancel();
        assert!(!controller.cancel_flag.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let teardown = Teardown::new();
        let stream = CaptureStream::new(Some(PathBuf::from("/tmp/in.mp4")));
        teardown.add_tracks(stream.tracks());
        teardown.add_timer(tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }));

        assert!(!teardown.is_released());
        teardown.release().await;
        assert!(teardown.is_released());
        assert!(stream.all_stopped());

        // Second release is a no-op
        teardown.release().await;
        assert!(teardown.is_released());
    }

    #[tokio::test]
    async fn test_configure_between_operations() {
        let controller = CompressionController::new();
        assert_eq!(controller.config().preset, QualityPreset::Balanced);
        controller.configure(QualityPreset::High);
        assert_eq!(controller.config().preset, QualityPreset::High);
    }

    #[test]
    fn test_shared_position_includes_nudges() {
        let shared = Shared::default();
        shared.position_ms.store(1000, Ordering::Relaxed);
        assert_eq!(shared.effective_position(), 1000);
        shared.nudge_ms.fetch_add(NUDGE_EPSILON_MS, Ordering::Relaxed);
        shared.nudge_ms.fetch_add(NUDGE_EPSILON_MS, Ordering::Relaxed);
        assert_eq!(shared.effective_position(), 1020);
    }
}
