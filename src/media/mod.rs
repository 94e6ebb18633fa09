//! Media subprocess layer
//!
//! FFmpeg-backed probing, decoding, and encoding:
//! - metadata probing with a bounded, size-proportional timeout
//! - a decoder streaming raw RGBA frames over a pipe
//! - a streaming encoder fed frame-by-frame and flushed periodically

pub mod decoder;
pub mod encoder;
pub mod probe;

pub use decoder::VideoDecoder;
pub use encoder::StreamEncoder;
pub use probe::{probe_duration_ms, probe_source, SourceMetadata};
