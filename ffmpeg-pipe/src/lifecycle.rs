use std::fmt::{Display, Formatter};
use std::thread::{self, JoinHandle};

use crate::error::{PipelineError, Result};

/// Where a pipeline is in its start/stop/close cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Created or reconfigured, never started since.
    Idle,
    /// Worker alive and accepting input.
    Running,
    /// Stop requested (or input exhausted); worker finishing what it has.
    Draining,
    /// Worker finished and close callback delivered. May be started again.
    Stopped,
    /// Engine released. Only `configure` brings it back.
    Closed,
}

impl PipelineState {
    /// A worker thread exists for this state.
    pub fn is_active(self) -> bool {
        matches!(self, PipelineState::Running | PipelineState::Draining)
    }
}

impl Display for PipelineState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::Running => "running",
            PipelineState::Draining => "draining",
            PipelineState::Stopped => "stopped",
            PipelineState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// How a worker run ended, handed to the close callback.
#[derive(Debug)]
pub enum Shutdown {
    /// All input was processed and the engine flushed.
    Completed,
    /// The engine failed under [`ErrorPolicy::Abort`](crate::ErrorPolicy::Abort);
    /// pending input was dropped.
    Aborted(anyhow::Error),
}

impl Shutdown {
    pub fn is_completed(&self) -> bool {
        matches!(self, Shutdown::Completed)
    }

    pub fn error(&self) -> Option<&anyhow::Error> {
        match self {
            Shutdown::Completed => None,
            Shutdown::Aborted(err) => Some(err),
        }
    }
}

/// Engine, state and worker handle of one pipeline, guarded by a single lock
/// in the owning pipeline.
///
/// While a worker runs it owns the engine; `engine` is `None` until the worker
/// hands it back through [`Lifecycle::finish`].
pub(crate) struct Lifecycle<E: ?Sized> {
    pub state: PipelineState,
    pub engine: Option<Box<E>>,
    pub worker: Option<JoinHandle<()>>,
}

impl<E: ?Sized> Lifecycle<E> {
    pub fn new() -> Self {
        Self {
            state: PipelineState::Idle,
            engine: None,
            worker: None,
        }
    }

    /// Attach or replace the engine. Rejected while a worker is alive.
    pub fn configure(&mut self, engine: Box<E>) -> Result<()> {
        if self.state.is_active() {
            return Err(PipelineError::AlreadyRunning);
        }
        self.engine = Some(engine);
        if self.state == PipelineState::Closed {
            self.state = PipelineState::Idle;
        }
        Ok(())
    }

    /// Checks that a new worker may be spawned and hands back the finished
    /// worker of the previous run, which the caller joins outside the lock.
    pub fn check_start(&mut self) -> Result<Option<JoinHandle<()>>> {
        if self.state.is_active() {
            return Err(PipelineError::AlreadyRunning);
        }
        if self.engine.is_none() {
            return Err(PipelineError::NoCodecConfigured);
        }
        Ok(self.worker.take())
    }

    /// Running -> Draining.
    pub fn begin_stop(&mut self) -> Result<()> {
        if self.state != PipelineState::Running {
            return Err(PipelineError::AlreadyStopped);
        }
        self.state = PipelineState::Draining;
        Ok(())
    }

    /// Called by the worker once the close callback returned.
    pub fn finish(&mut self, engine: Box<E>) {
        if self.state == PipelineState::Closed {
            return;
        }
        self.engine = Some(engine);
        self.state = PipelineState::Stopped;
    }

    /// Release the engine. The worker must already be gone or be the caller.
    pub fn release(&mut self) {
        self.engine = None;
        self.state = PipelineState::Closed;
    }
}

pub(crate) fn spawn_worker<F>(name: &str, f: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .map_err(PipelineError::Spawn)
}

/// Join a worker unless it is the calling thread, which happens when
/// `close()` runs inside a callback. Returns false when the join was skipped
/// and the worker is still running.
pub(crate) fn join_worker(handle: JoinHandle<()>) -> bool {
    if handle.thread().id() == thread::current().id() {
        log::debug!("close called from worker thread, skipping join");
        return false;
    }
    if handle.join().is_err() {
        log::error!("pipeline worker panicked");
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_requires_engine() {
        let mut lifecycle: Lifecycle<u32> = Lifecycle::new();
        assert!(matches!(
            lifecycle.check_start(),
            Err(PipelineError::NoCodecConfigured)
        ));
        lifecycle.configure(Box::new(1)).unwrap();
        assert!(lifecycle.check_start().unwrap().is_none());
    }

    #[test]
    fn test_configure_rejected_while_active() {
        let mut lifecycle: Lifecycle<u32> = Lifecycle::new();
        lifecycle.configure(Box::new(1)).unwrap();
        lifecycle.state = PipelineState::Running;
        assert!(matches!(
            lifecycle.configure(Box::new(2)),
            Err(PipelineError::AlreadyRunning)
        ));
        lifecycle.begin_stop().unwrap();
        assert_eq!(lifecycle.state, PipelineState::Draining);
        assert!(matches!(
            lifecycle.begin_stop(),
            Err(PipelineError::AlreadyStopped)
        ));
        assert!(matches!(
            lifecycle.configure(Box::new(2)),
            Err(PipelineError::AlreadyRunning)
        ));
    }

    #[test]
    fn test_finish_after_release_drops_engine() {
        let mut lifecycle: Lifecycle<u32> = Lifecycle::new();
        lifecycle.state = PipelineState::Draining;
        lifecycle.release();
        lifecycle.finish(Box::new(7));
        assert_eq!(lifecycle.state, PipelineState::Closed);
        assert!(lifecycle.engine.is_none());

        lifecycle.configure(Box::new(8)).unwrap();
        assert_eq!(lifecycle.state, PipelineState::Idle);
    }

    #[test]
    fn test_join_worker_skips_self() {
        use std::sync::mpsc;

        let (handle_tx, handle_rx) = mpsc::channel::<JoinHandle<()>>();
        let (done_tx, done_rx) = mpsc::channel();
        let worker = thread::spawn(move || {
            let own = handle_rx.recv().unwrap();
            done_tx.send(join_worker(own)).unwrap();
        });
        handle_tx.send(worker).unwrap();

        let joined = done_rx
            .recv_timeout(std::time::Duration::from_secs(5))
            .expect("self-join must not deadlock");
        assert!(!joined);
    }
}
