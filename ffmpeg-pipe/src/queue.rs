use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

use crate::error::{PipelineError, Result};
use crate::frame::Frame;

struct QueueState {
    frames: VecDeque<Frame>,
    accepting: bool,
    /// Position of the next accepted frame since `open`.
    next_position: u64,
}

/// FIFO of frames waiting for the encode worker.
///
/// Producers push from any thread; exactly one consumer pops. The consumer
/// blocks on the condition while the queue is empty and still accepting, and
/// gets `None` once the queue is closed and fully drained.
pub struct FrameQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
    capacity: Option<usize>,
}

impl FrameQueue {
    /// `capacity: None` places no bound on pending frames.
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                frames: VecDeque::new(),
                accepting: false,
                next_position: 0,
            }),
            ready: Condvar::new(),
            capacity,
        }
    }

    /// Start accepting frames. Returns the number of stale frames discarded.
    pub fn open(&self) -> usize {
        let mut state = self.state.lock();
        state.accepting = true;
        state.next_position = 0;
        let stale = std::mem::take(&mut state.frames);
        drop(state);
        stale.len()
    }

    /// Enqueue a frame, taking ownership. Never waits for the consumer.
    pub fn push(&self, frame: Frame) -> Result<()> {
        self.push_with(frame, |_, _| {})
    }

    /// Like [`push`](Self::push), but `stamp` sees the frame's queue position
    /// under the lock, so positions follow dequeue order across producers.
    pub fn push_with<F>(&self, mut frame: Frame, stamp: F) -> Result<()>
    where
        F: FnOnce(&mut Frame, u64),
    {
        let mut state = self.state.lock();
        if !state.accepting {
            return Err(PipelineError::NotRunning);
        }
        if let Some(capacity) = self.capacity {
            if state.frames.len() >= capacity {
                return Err(PipelineError::QueueFull { capacity });
            }
        }
        stamp(&mut frame, state.next_position);
        state.next_position += 1;
        state.frames.push_back(frame);
        drop(state);
        self.ready.notify_one();
        Ok(())
    }

    /// Stop accepting frames and wake the consumer. Already queued frames stay
    /// queued. Returns false if the queue was not accepting.
    pub fn close(&self) -> bool {
        let mut state = self.state.lock();
        let was_accepting = std::mem::replace(&mut state.accepting, false);
        drop(state);
        self.ready.notify_all();
        was_accepting
    }

    /// Blocking dequeue. `None` means closed and empty.
    pub fn pop(&self) -> Option<Frame> {
        let mut state = self.state.lock();
        loop {
            if let Some(frame) = state.frames.pop_front() {
                return Some(frame);
            }
            if !state.accepting {
                return None;
            }
            self.ready.wait(&mut state);
        }
    }

    /// Close and drop everything still queued. Returns the number dropped.
    pub fn abort(&self) -> usize {
        let mut state = self.state.lock();
        state.accepting = false;
        let dropped = std::mem::take(&mut state.frames);
        drop(state);
        self.ready.notify_all();
        dropped.len()
    }

    pub fn len(&self) -> usize {
        self.state.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().frames.is_empty()
    }

    pub fn is_accepting(&self) -> bool {
        self.state.lock().accepting
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}
