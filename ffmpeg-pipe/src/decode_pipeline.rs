use std::io::ErrorKind;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::callback::{CloseFn, FrameFn, ReadFn, Slot};
use crate::config::{ErrorPolicy, PipelineConfig};
use crate::display::DisplaySink;
use crate::engine::DecodeEngine;
use crate::error::Result;
use crate::frame::Frame;
use crate::lifecycle::{Lifecycle, PipelineState, Shutdown, join_worker, spawn_worker};
use crate::stats::{PipelineStats, StatsSnapshot};

struct Shared {
    lifecycle: Mutex<Lifecycle<dyn DecodeEngine>>,
    /// Cancelled by `stop`; replaced on every `start`.
    cancel: Mutex<CancellationToken>,
    config: PipelineConfig,
    read: Slot<ReadFn>,
    frame: Slot<FrameFn>,
    display: Slot<dyn DisplaySink>,
    close: Slot<CloseFn>,
    stats: PipelineStats,
}

impl Shared {
    /// Input ended on its own; the run can no longer be stopped.
    fn mark_draining(&self) {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state == PipelineState::Running {
            lifecycle.state = PipelineState::Draining;
        }
    }

    /// One read callback invocation. `None` ends the stream.
    fn read_chunk(&self, buf: &mut [u8], cancel: &CancellationToken) -> Option<usize> {
        loop {
            match self.read.call(|read| read(buf)) {
                None => {
                    log::warn!("no read callback registered, treating as end of stream");
                    return None;
                }
                Some(Ok(n)) => return Some(n.min(buf.len())),
                Some(Err(err)) if err.kind() == ErrorKind::Interrupted => {
                    if cancel.is_cancelled() {
                        return None;
                    }
                }
                Some(Err(err)) => {
                    log::error!("read callback failed, ending stream: {}", err);
                    self.stats.record_error();
                    return None;
                }
            }
        }
    }

    /// Deliver `first` and then whatever else the engine has ready.
    fn deliver_all(&self, engine: &mut dyn DecodeEngine, first: Option<Frame>, index: &mut u64) {
        let Some(first) = first else {
            return;
        };
        self.deliver(&first, index);
        while let Some(frame) = engine.next_frame() {
            self.deliver(&frame, index);
        }
    }

    /// Frame callback first, then the display sink.
    fn deliver(&self, frame: &Frame, index: &mut u64) {
        self.stats.record_processed();
        let current = *index;
        *index += 1;
        log::trace!("decoded frame {}: {}", current, frame);

        self.frame.call(|on_frame| on_frame(frame, current));
        if let Some(Err(err)) = self.display.call(|sink| sink.show(frame)) {
            self.stats.record_error();
            log::warn!("display sink failed on frame {}: {:#}", current, err);
        }
    }
}

/// Pull-based decode worker around one [`DecodeEngine`].
///
/// The worker reads chunks through the read callback, feeds them to the engine
/// until each is consumed, and delivers every frame to the frame callback and
/// then the display sink. End of input or [`stop`](Self::stop) is followed by a
/// single end-of-stream call into the engine and the close callback.
pub struct DecodePipeline {
    shared: Arc<Shared>,
}

impl DecodePipeline {
    pub fn new() -> Self {
        Self::with_config(PipelineConfig::default())
    }

    pub fn with_config(config: PipelineConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                lifecycle: Mutex::new(Lifecycle::new()),
                cancel: Mutex::new(CancellationToken::new()),
                config,
                read: Slot::new(),
                frame: Slot::new(),
                display: Slot::new(),
                close: Slot::new(),
                stats: PipelineStats::default(),
            }),
        }
    }

    pub fn configure<E: DecodeEngine + 'static>(&self, engine: E) -> Result<()> {
        self.configure_boxed(Box::new(engine))
    }

    pub fn configure_boxed(&self, engine: Box<dyn DecodeEngine>) -> Result<()> {
        self.shared.lifecycle.lock().configure(engine)?;
        log::debug!("decode engine configured");
        Ok(())
    }

    /// Fills the buffer with compressed input; `Ok(0)` is end of stream.
    /// Errors other than `Interrupted` also end the stream.
    pub fn set_read_callback<F>(&self, read: F)
    where
        F: FnMut(&mut [u8]) -> std::io::Result<usize> + Send + 'static,
    {
        self.shared.read.set(Box::new(read));
    }

    pub fn set_frame_callback<F>(&self, on_frame: F)
    where
        F: FnMut(&Frame, u64) + Send + 'static,
    {
        self.shared.frame.set(Box::new(on_frame));
    }

    pub fn set_display<S: DisplaySink + 'static>(&self, sink: S) {
        self.shared.display.set(Box::new(sink));
    }

    pub fn clear_display(&self) {
        self.shared.display.clear();
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

            let cancel = CancellationToken::new();
            *self.shared.cancel.lock() = cancel.clone();

            let shared = Arc::clone(&self.shared);
            let handle = spawn_worker(&self.shared.config.thread_name, move || {
                run(shared, cancel)
            })?;
            lifecycle.worker = Some(handle);
            lifecycle.state = PipelineState::Running;
            previous
        };
        if let Some(previous) = previous {
            join_worker(previous);
        }
        log::info!("decode pipeline started");
        Ok(())
    }

    /// Ask the worker to stop after the chunk it is working on. A read
    /// callback that is blocked is not interrupted. Does not wait.
    pub fn stop(&self) -> Result<()> {
        let mut lifecycle = self.shared.lifecycle.lock();
        lifecycle.begin_stop()?;
        self.shared.cancel.lock().cancel();
        drop(lifecycle);
        log::info!("decode pipeline stopping");
        Ok(())
    }

    /// Block until the current worker has exited.
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
                self.shared.cancel.lock().cancel();
            }
            lifecycle.worker.take()
        };
        if let Some(worker) = worker {
            join_worker(worker);
        }
        self.shared.lifecycle.lock().release();
        log::info!("decode pipeline closed");
    }

    pub fn state(&self) -> PipelineState {
        self.shared.lifecycle.lock().state
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.shared.config
    }
}

impl Default for DecodePipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DecodePipeline {
    fn drop(&mut self) {
        self.close();
    }
}

fn run(shared: Arc<Shared>, cancel: CancellationToken) {
    let engine = shared.lifecycle.lock().engine.take();
    let Some(mut engine) = engine else {
        log::error!("decode worker started without an engine");
        shared.lifecycle.lock().state = PipelineState::Stopped;
        return;
    };

    let shutdown = decode_loop(&shared, engine.as_mut(), &cancel);

    let stats = shared.stats.snapshot();
    match &shutdown {
        Shutdown::Completed => log::info!(
            "decode worker finished: {} chunks, {} bytes, {} frames, {} errors",
            stats.packets,
            stats.bytes,
            stats.processed,
            stats.errors
        ),
        Shutdown::Aborted(err) => log::error!("decode worker aborted: {:#}", err),
    }

    shared.close.call(|close| close(&shutdown));
    shared.lifecycle.lock().finish(engine);
}

fn decode_loop(
    shared: &Shared,
    engine: &mut dyn DecodeEngine,
    cancel: &CancellationToken,
) -> Shutdown {
    let mut buf = vec![0u8; shared.config.read_chunk_size.max(1)];
    let mut index = 0u64;

    while !cancel.is_cancelled() {
        let Some(n) = shared.read_chunk(&mut buf, cancel) else {
            break;
        };
        if n == 0 {
            log::debug!("end of input");
            break;
        }
        shared.stats.record_packet(n);

        let mut rest = &buf[..n];
        while !rest.is_empty() && !cancel.is_cancelled() {
            match engine.decode_one(rest) {
                Ok(decoded) => {
                    let consumed = decoded.consumed.min(rest.len());
                    let stalled = consumed == 0 && decoded.frame.is_none();
                    shared.deliver_all(engine, decoded.frame, &mut index);
                    if stalled {
                        log::warn!(
                            "decoder made no progress, dropping {} bytes of chunk",
                            rest.len()
                        );
                        break;
                    }
                    rest = &rest[consumed..];
                }
                Err(err) => {
                    shared.stats.record_error();
                    match shared.config.error_policy {
                        ErrorPolicy::Continue => {
                            log::warn!("decode failed, dropping {} bytes: {:#}", rest.len(), err);
                            break;
                        }
                        ErrorPolicy::Abort => {
                            shared.mark_draining();
                            return Shutdown::Aborted(err);
                        }
                    }
                }
            }
        }
    }
    shared.mark_draining();

    match engine.decode_one(&[]) {
        Ok(decoded) => shared.deliver_all(engine, decoded.frame, &mut index),
        Err(err) => {
            shared.stats.record_error();
            match shared.config.error_policy {
                ErrorPolicy::Continue => log::warn!("decoder flush failed: {:#}", err),
                ErrorPolicy::Abort => return Shutdown::Aborted(err),
            }
        }
    }

    Shutdown::Completed
}

#[cfg(test)]
#[path = "decode_pipeline_test.rs"]
mod decode_pipeline_test;
