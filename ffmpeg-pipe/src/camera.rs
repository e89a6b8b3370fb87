//! Camera-side input: capture buffers, the feed handle camera threads submit
//! through, and a synthetic NV12 source.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::encode_pipeline::Shared;
use crate::error::{PipelineError, Result};
use crate::frame::Frame;
use crate::repack::repack_nv12;

/// Pixel layout of a buffer delivered by a camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureFormat {
    /// Luma plane followed by one interleaved U/V plane.
    Nv12,
    Yuv420p,
    Yuyv,
    Rgb24,
    /// Driver-specific fourcc.
    Other(u32),
}

/// One camera buffer, borrowed for the duration of the capture callback.
#[derive(Debug, Clone, Copy)]
pub struct CaptureBuffer<'a> {
    pub format: CaptureFormat,
    pub width: u32,
    pub height: u32,
    pub luma: &'a [u8],
    pub chroma: &'a [u8],
    pub luma_stride: usize,
    pub chroma_stride: usize,
    /// Presentation time from the driver, if it supplies one.
    pub timestamp: Option<i64>,
}

impl<'a> CaptureBuffer<'a> {
    /// An NV12 buffer whose chroma plane starts `uv_offset` bytes into `data`,
    /// both planes sharing `stride`.
    pub fn nv12(
        data: &'a [u8],
        width: u32,
        height: u32,
        stride: usize,
        uv_offset: usize,
    ) -> Result<Self> {
        if uv_offset > data.len() {
            return Err(PipelineError::BufferTooSmall {
                needed: uv_offset,
                have: data.len(),
            });
        }
        let (luma, chroma) = data.split_at(uv_offset);
        Ok(Self {
            format: CaptureFormat::Nv12,
            width,
            height,
            luma,
            chroma,
            luma_stride: stride,
            chroma_stride: stride,
            timestamp: None,
        })
    }

    /// A buffer in a format the pipeline does not repack.
    pub fn packed(format: CaptureFormat, data: &'a [u8], width: u32, height: u32) -> Self {
        Self {
            format,
            width,
            height,
            luma: data,
            chroma: &[],
            luma_stride: width as usize,
            chroma_stride: 0,
            timestamp: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Copy into an owned planar frame with pts set from the timestamp (0
    /// when absent).
    pub fn repack(&self) -> Result<Frame> {
        if self.format != CaptureFormat::Nv12 {
            return Err(PipelineError::FrameNotSupported(self.format));
        }
        let mut frame = repack_nv12(
            self.luma,
            self.chroma,
            self.width,
            self.height,
            self.luma_stride,
            self.chroma_stride,
        )?;
        frame.set_pts(self.timestamp.unwrap_or(0));
        Ok(frame)
    }
}

/// A camera that pushes buffers into an encode pipeline from its own thread.
pub trait CameraSource: Send {
    fn start(&mut self, feed: CaptureFeed) -> anyhow::Result<()>;
    fn stop(&mut self) -> anyhow::Result<()>;
}

/// Submission handle for camera threads. Holds only a weak reference, so it
/// never keeps a pipeline alive.
#[derive(Clone)]
pub struct CaptureFeed {
    pipeline: Weak<Shared>,
}

impl CaptureFeed {
    pub(crate) fn new(pipeline: Weak<Shared>) -> Self {
        Self { pipeline }
    }

    /// Repack and enqueue, reporting every rejection.
    pub fn submit(&self, buffer: &CaptureBuffer<'_>) -> Result<()> {
        let pipeline = self.pipeline.upgrade().ok_or(PipelineError::NotInitialized)?;
        pipeline.add_capture(buffer)
    }

    /// Viewfinder-callback flavour of [`submit`](Self::submit): buffers in an
    /// unsupported format or arriving while the pipeline is not running are
    /// dropped silently. Returns whether the buffer was queued.
    pub fn on_viewfinder(&self, buffer: &CaptureBuffer<'_>) -> bool {
        match self.submit(buffer) {
            Ok(()) => true,
            Err(
                PipelineError::FrameNotSupported(_)
                | PipelineError::NotRunning
                | PipelineError::NotInitialized,
            ) => false,
            Err(err) => {
                log::warn!("dropping capture buffer: {}", err);
                false
            }
        }
    }

    /// Whether the pipeline behind this feed still exists.
    pub fn is_connected(&self) -> bool {
        self.pipeline.strong_count() > 0
    }
}

#[derive(Debug, Clone)]
pub struct SyntheticCameraConfig {
    pub width: u32,
    pub height: u32,
    /// Frames per second; 0 delivers as fast as the feed accepts them.
    pub fps: u32,
    /// Extra bytes at the end of each row, as hardware buffers carry.
    pub row_padding: usize,
    /// Stop on its own after this many buffers.
    pub frame_limit: Option<u64>,
}

impl Default for SyntheticCameraConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30,
            row_padding: 64,
            frame_limit: None,
        }
    }
}

/// Generates a moving NV12 test pattern with padded rows.
pub struct SyntheticCamera {
    config: SyntheticCameraConfig,
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
    delivered: Arc<AtomicU64>,
}

impl SyntheticCamera {
    pub fn new(config: SyntheticCameraConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
            worker: None,
            delivered: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Buffers the feed accepted so far.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// True once the capture thread has exited (frame limit reached or stopped).
    pub fn is_finished(&self) -> bool {
        self.worker.as_ref().is_none_or(|w| w.is_finished())
    }

    fn capture_loop(
        config: SyntheticCameraConfig,
        feed: CaptureFeed,
        cancel: CancellationToken,
        delivered: Arc<AtomicU64>,
    ) {
        let stride = config.width as usize + config.row_padding;
        let rows = config.height as usize;
        let uv_offset = stride * rows;
        let mut data = vec![0u8; uv_offset + stride * rows / 2];
        let interval = (config.fps > 0).then(|| Duration::from_secs(1) / config.fps);

        let mut index = 0u64;
        loop {
            if cancel.is_cancelled() {
                break;
            }
            if config.frame_limit.is_some_and(|limit| index >= limit) {
                log::debug!("synthetic camera reached {} frames", index);
                break;
            }

            fill_pattern(&mut data, config.width as usize, rows, stride, index);
            match CaptureBuffer::nv12(&data, config.width, config.height, stride, uv_offset) {
                Ok(buffer) => {
                    if feed.on_viewfinder(&buffer) {
                        delivered.fetch_add(1, Ordering::Relaxed);
                    }
                }
                Err(err) => {
                    log::error!("synthetic camera buffer: {}", err);
                    break;
                }
            }
            if !feed.is_connected() {
                log::debug!("synthetic camera feed disconnected");
                break;
            }
            index += 1;

            if let Some(interval) = interval {
                std::thread::sleep(interval);
            }
        }
    }
}

impl CameraSource for SyntheticCamera {
    fn start(&mut self, feed: CaptureFeed) -> anyhow::Result<()> {
        if self.worker.is_some() {
            anyhow::bail!("synthetic camera already started");
        }
        let (width, height) = (self.config.width, self.config.height);
        if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
            anyhow::bail!("synthetic camera needs even geometry, got {}x{}", width, height);
        }

        self.cancel = CancellationToken::new();
        let config = self.config.clone();
        let cancel = self.cancel.clone();
        let delivered = Arc::clone(&self.delivered);
        let handle = std::thread::Builder::new()
            .name("synthetic-camera".to_string())
            .spawn(move || Self::capture_loop(config, feed, cancel, delivered))?;
        self.worker = Some(handle);
        log::info!(
            "synthetic camera started {}x{}@{}",
            width,
            height,
            self.config.fps
        );
        Ok(())
    }

    fn stop(&mut self) -> anyhow::Result<()> {
        self.cancel.cancel();
        if let Some(worker) = self.worker.take() {
            worker
                .join()
                .map_err(|_| anyhow::anyhow!("synthetic camera thread panicked"))?;
            log::info!("synthetic camera stopped after {} frames", self.delivered());
        }
        Ok(())
    }
}

impl Drop for SyntheticCamera {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::error!("{}", e);
        }
    }
}

/// Diagonal luma ramp scrolling with `index`, chroma varying per row.
fn fill_pattern(data: &mut [u8], width: usize, rows: usize, stride: usize, index: u64) {
    let shift = (index * 4) as usize;
    let (luma, chroma) = data.split_at_mut(stride * rows);
    for (y, row) in luma.chunks_exact_mut(stride).enumerate() {
        for (x, px) in row[..width].iter_mut().enumerate() {
            *px = ((x + y + shift) & 0xFF) as u8;
        }
    }
    for (y, row) in chroma.chunks_exact_mut(stride).enumerate() {
        for pair in row[..width].chunks_exact_mut(2) {
            pair[0] = (64 + y * 2 % 128) as u8;
            pair[1] = (192 - y * 2 % 128) as u8;
        }
    }
}
