use std::sync::Arc;

use parking_lot::Mutex;

use crate::callback::{CloseFn, FrameFilter, Slot, WriteFn};
use crate::camera::{CaptureBuffer, CaptureFeed, CaptureFormat};
use crate::config::{ErrorPolicy, PipelineConfig};
use crate::engine::EncodeEngine;
use crate::error::{PipelineError, Result};
use crate::frame::Frame;
use crate::lifecycle::{Lifecycle, PipelineState, Shutdown, join_worker, spawn_worker};
use crate::packet::Packet;
use crate::queue::FrameQueue;
use crate::stats::{PipelineStats, StatsSnapshot};

pub(crate) struct Shared {
    lifecycle: Mutex<Lifecycle<dyn EncodeEngine>>,
    queue: FrameQueue,
    config: PipelineConfig,
    filter: Slot<FrameFilter>,
    write: Slot<WriteFn>,
    close: Slot<CloseFn>,
    stats: PipelineStats,
}

impl Shared {
    pub(crate) fn add_frame(&self, frame: Frame) -> Result<()> {
        self.queue.push(frame)?;
        self.stats.record_submitted();
        Ok(())
    }

    pub(crate) fn add_capture(&self, buffer: &CaptureBuffer<'_>) -> Result<()> {
        if buffer.format != CaptureFormat::Nv12 {
            return Err(PipelineError::FrameNotSupported(buffer.format));
        }
        if !self.queue.is_accepting() {
            return Err(PipelineError::NotRunning);
        }
        let frame = buffer.repack()?;
        let timestamp = buffer.timestamp;
        self.queue.push_with(frame, |frame, position| {
            frame.set_pts(timestamp.unwrap_or(position as i64));
            log::trace!("capture frame {}", frame);
        })?;
        self.stats.record_submitted();
        Ok(())
    }

    fn emit(&self, packet: &Packet) {
        self.stats.record_packet(packet.size());
        if self.write.call(|write| write(packet)).is_none() {
            log::trace!("no write callback, dropping {} byte packet", packet.size());
        }
    }

    /// Stop taking input and drop whatever is still queued.
    fn abort(&self) {
        let dropped = self.queue.abort();
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state == PipelineState::Running {
            lifecycle.state = PipelineState::Draining;
        }
        drop(lifecycle);
        if dropped > 0 {
            log::warn!("encode aborted, dropped {} queued frames", dropped);
        }
    }
}

/// Frame queue and dedicated encode worker around one [`EncodeEngine`].
///
/// Producers submit frames with [`add_frame`](Self::add_frame) or
/// [`add_capture`](Self::add_capture) from any thread; the worker encodes them
/// in submission order and hands each packet to the write callback.
/// [`stop`](Self::stop) lets the worker drain everything already accepted and
/// flush the engine before the close callback fires.
pub struct EncodePipeline {
    shared: Arc<Shared>,
}

impl EncodePipeline {
    pub fn new() -> Self {
        Self::with_config(PipelineConfig::default())
    }

    pub fn with_config(config: PipelineConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                lifecycle: Mutex::new(Lifecycle::new()),
                queue: FrameQueue::new(config.queue_capacity),
                config,
                filter: Slot::new(),
                write: Slot::new(),
                close: Slot::new(),
                stats: PipelineStats::default(),
            }),
        }
    }

    /// Attach or replace the engine. Rejected with `AlreadyRunning` while a
    /// worker is alive.
    pub fn configure<E: EncodeEngine + 'static>(&self, engine: E) -> Result<()> {
        self.configure_boxed(Box::new(engine))
    }

    pub fn configure_boxed(&self, engine: Box<dyn EncodeEngine>) -> Result<()> {
        self.shared.lifecycle.lock().configure(engine)?;
        log::debug!("encode engine configured");
        Ok(())
    }

    /// Called with every dequeued frame and its position in the run; `false`
    /// skips encoding it.
    pub fn set_frame_filter<F>(&self, filter: F)
    where
        F: FnMut(&Frame, u64) -> bool + Send + 'static,
    {
        self.shared.filter.set(Box::new(filter));
    }

    pub fn clear_frame_filter(&self) {
        self.shared.filter.clear();
    }

    pub fn set_write_callback<F>(&self, write: F)
    where
        F: FnMut(&Packet) + Send + 'static,
    {
        self.shared.write.set(Box::new(write));
    }

    pub fn set_close_callback<F>(&self, close: F)
    where
        F: FnMut(&Shutdown) + Send + 'static,
    {
        self.shared.close.set(Box::new(close));
    }

    pub fn start(&self) -> Result<()> {
        let previous = {
            let mut lifecycle = self.shared.lifecycle.lock();
            let previous = lifecycle.check_start()?;

            self.shared.stats.reset();
            let stale = self.shared.queue.open();
            if stale > 0 {
                log::warn!("discarded {} stale frames from previous run", stale);
            }

            let shared = Arc::clone(&self.shared);
            match spawn_worker(&self.shared.config.thread_name, move || run(shared)) {
                Ok(handle) => {
                    lifecycle.worker = Some(handle);
                    lifecycle.state = PipelineState::Running;
                }
                Err(err) => {
                    self.shared.queue.close();
                    return Err(err);
                }
            }
            previous
        };
        if let Some(previous) = previous {
            join_worker(previous);
        }
        log::info!("encode pipeline started");
        Ok(())
    }

    /// Stop accepting frames. Frames already queued are still encoded, then
    /// the engine is flushed and the close callback fires. Does not wait.
    pub fn stop(&self) -> Result<()> {
        let mut lifecycle = self.shared.lifecycle.lock();
        lifecycle.begin_stop()?;
        self.shared.queue.close();
        drop(lifecycle);
        log::info!(
            "encode pipeline draining {} queued frames",
            self.shared.queue.len()
        );
        Ok(())
    }

    /// Enqueue a frame, keeping its pts. Never waits for the worker.
    pub fn add_frame(&self, frame: Frame) -> Result<()> {
        self.shared.add_frame(frame)
    }

    /// Repack an NV12 capture buffer and enqueue it. The frame gets the
    /// buffer's timestamp, or its queue position when there is none.
    pub fn add_capture(&self, buffer: &CaptureBuffer<'_>) -> Result<()> {
        self.shared.add_capture(buffer)
    }

    /// A handle camera threads can submit through without owning the pipeline.
    pub fn capture_feed(&self) -> CaptureFeed {
        CaptureFeed::new(Arc::downgrade(&self.shared))
    }

    /// Block until the current worker has exited. Returns immediately when
    /// no worker exists. Only returns after `stop` (or an abort) for a
    /// running pipeline.
    pub fn join(&self) {
        let worker = self.shared.lifecycle.lock().worker.take();
        if let Some(worker) = worker {
            join_worker(worker);
        }
    }

    /// Stop if running, wait for the worker and release the engine. A second
    /// call is a no-op.
    pub fn close(&self) {
        let worker = {
            let mut lifecycle = self.shared.lifecycle.lock();
            if lifecycle.state == PipelineState::Closed && lifecycle.worker.is_none() {
                return;
            }
            if lifecycle.begin_stop().is_ok() {
                self.shared.queue.close();
            }
            lifecycle.worker.take()
        };
        // From inside a callback the worker is still draining accepted frames;
        // it drops the engine itself once it sees the Closed state.
        let joined = worker.is_none_or(join_worker);
        self.shared.lifecycle.lock().release();
        if joined {
            self.shared.queue.abort();
        }
        log::info!("encode pipeline closed");
    }

    pub fn state(&self) -> PipelineState {
        self.shared.lifecycle.lock().state
    }

    /// Frames accepted but not yet taken by the worker.
    pub fn pending(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.shared.config
    }
}

impl Default for EncodePipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EncodePipeline {
    fn drop(&mut self) {
        self.close();
    }
}

fn run(shared: Arc<Shared>) {
    let engine = shared.lifecycle.lock().engine.take();
    let Some(mut engine) = engine else {
        log::error!("encode worker started without an engine");
        shared.queue.abort();
        shared.lifecycle.lock().state = PipelineState::Stopped;
        return;
    };

    let mut packet = Packet::with_capacity(shared.config.packet_capacity);
    let shutdown = encode_loop(&shared, engine.as_mut(), &mut packet);

    let stats = shared.stats.snapshot();
    match &shutdown {
        Shutdown::Completed => log::info!(
            "encode worker finished: {} frames, {} skipped, {} packets, {} errors",
            stats.processed,
            stats.skipped,
            stats.packets,
            stats.errors
        ),
        Shutdown::Aborted(err) => log::error!("encode worker aborted: {:#}", err),
    }

    shared.close.call(|close| close(&shutdown));
    shared.lifecycle.lock().finish(engine);
}

fn encode_loop(shared: &Shared, engine: &mut dyn EncodeEngine, packet: &mut Packet) -> Shutdown {
    let mut position = 0u64;
    while let Some(frame) = shared.queue.pop() {
        let index = position;
        position += 1;

        let wanted = shared
            .filter
            .call(|filter| filter(&frame, index))
            .unwrap_or(true);
        if !wanted {
            log::trace!("frame {} skipped by filter", frame.pts());
            shared.stats.record_skipped();
            continue;
        }

        shared.stats.record_processed();
        packet.clear();
        match engine.encode_one(&frame, packet) {
            Ok(true) => shared.emit(packet),
            Ok(false) => log::trace!("frame {} buffered by engine", frame.pts()),
            Err(err) => {
                shared.stats.record_error();
                match shared.config.error_policy {
                    ErrorPolicy::Continue => {
                        log::warn!("encode frame {} failed: {:#}", frame.pts(), err);
                    }
                    ErrorPolicy::Abort => {
                        shared.abort();
                        return Shutdown::Aborted(err);
                    }
                }
            }
        }
    }

    loop {
        packet.clear();
        match engine.flush(packet) {
            Ok(true) => shared.emit(packet),
            Ok(false) => break,
            Err(err) => {
                shared.stats.record_error();
                match shared.config.error_policy {
                    ErrorPolicy::Continue => {
                        log::warn!("encoder flush failed: {:#}", err);
                        break;
                    }
                    ErrorPolicy::Abort => return Shutdown::Aborted(err),
                }
            }
        }
    }

    Shutdown::Completed
}

#[cfg(test)]
#[path = "encode_pipeline_test.rs"]
mod encode_pipeline_test;
