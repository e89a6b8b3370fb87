//! Asynchronous frame pipeline between a frame producer (camera capture or a
//! compressed bitstream) and a sequential codec engine.
//!
//! ```text
//!  camera thread ──► add_capture ──► repack_nv12 ─┐
//!                                                 ▼
//!  app thread ─────► add_frame ──────────► FrameQueue ──► encode worker ──► write callback
//!
//!  read callback ──► decode worker ──► frame callback ──► display sink
//! ```

/// Registers FFmpeg components. Call once at startup before building the
/// FFmpeg-backed engines.
pub fn init() -> anyhow::Result<()> {
    ffmpeg_next::init().map_err(|e| anyhow::anyhow!("ffmpeg_next init: {}", e))
}

pub mod callback;
pub mod camera;
pub mod config;
pub mod decode_pipeline;
pub mod decoder;
pub mod display;
pub mod encode_pipeline;
pub mod encoder;
pub mod engine;
pub mod error;
pub mod frame;
pub mod hw;
pub mod io;
pub mod lifecycle;
pub mod packet;
pub mod queue;
pub mod repack;
pub mod scaler;
pub mod stats;
pub mod stream;

#[cfg(test)]
mod testing;

pub use camera::{CameraSource, CaptureBuffer, CaptureFeed, CaptureFormat};
pub use config::{ErrorPolicy, PipelineConfig};
pub use decode_pipeline::DecodePipeline;
pub use decoder::FfmpegDecoder;
pub use display::DisplaySink;
pub use encode_pipeline::EncodePipeline;
pub use encoder::{FfmpegEncoder, Settings as EncoderSettings};
pub use engine::{DecodeEngine, Decoded, EncodeEngine};
pub use error::{PipelineError, Result};
pub use frame::Frame;
pub use lifecycle::{PipelineState, Shutdown};
pub use packet::Packet;
pub use repack::repack_nv12;
