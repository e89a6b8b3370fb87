use thiserror::Error;

use crate::camera::CaptureFormat;

/// Errors returned synchronously by the pipeline lifecycle and submission API.
///
/// Codec engine failures inside a running worker never surface here; they are
/// handled by the configured [`ErrorPolicy`](crate::ErrorPolicy) and reported
/// through the close callback.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline handle is not initialized")]
    NotInitialized,

    #[error("no codec engine configured")]
    NoCodecConfigured,

    #[error("pipeline is already running")]
    AlreadyRunning,

    #[error("pipeline is already stopped")]
    AlreadyStopped,

    #[error("pipeline is not running")]
    NotRunning,

    #[error("capture frame format not supported: {0:?}")]
    FrameNotSupported(CaptureFormat),

    #[error("unsupported frame geometry {width}x{height}")]
    UnsupportedGeometry { width: u32, height: u32 },

    #[error("buffer too small: need {needed} bytes, have {have}")]
    BufferTooSmall { needed: usize, have: usize },

    #[error("frame queue is full ({capacity} frames pending)")]
    QueueFull { capacity: usize },

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
