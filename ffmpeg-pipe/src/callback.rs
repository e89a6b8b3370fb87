//! Single-handler callback slots shared between the owning handle and its
//! worker thread.

use parking_lot::Mutex;

use crate::frame::Frame;
use crate::lifecycle::Shutdown;
use crate::packet::Packet;

/// Encode side: decides whether a dequeued frame is encoded. Receives the
/// frame and its position in the current run.
pub type FrameFilter = dyn FnMut(&Frame, u64) -> bool + Send;
/// Encode side: receives every packet the engine emits, flush included.
pub type WriteFn = dyn FnMut(&Packet) + Send;
/// Decode side: receives every decoded frame with a monotonically increasing index.
pub type FrameFn = dyn FnMut(&Frame, u64) + Send;
/// Decode side: fills the buffer with compressed input. `Ok(0)` ends the stream.
pub type ReadFn = dyn FnMut(&mut [u8]) -> std::io::Result<usize> + Send;
/// Both sides: runs once per worker run after all work has finished.
pub type CloseFn = dyn FnMut(&Shutdown) + Send;

/// Holds at most one handler; setting a new one replaces the old.
///
/// The worker takes the handler out of the slot for the duration of a call,
/// so a handler may re-register itself (or anything else) without deadlocking.
/// A handler replaced during its own call is dropped afterwards.
pub struct Slot<T: ?Sized> {
    inner: Mutex<Option<Box<T>>>,
}

impl<T: ?Sized> Slot<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    pub fn set(&self, handler: Box<T>) {
        *self.inner.lock() = Some(handler);
    }

    pub fn clear(&self) {
        self.inner.lock().take();
    }

    pub fn is_set(&self) -> bool {
        self.inner.lock().is_some()
    }

    /// Invoke the current handler, if any, without holding the slot lock.
    pub fn call<R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut handler = self.inner.lock().take()?;
        let result = f(&mut handler);
        let mut slot = self.inner.lock();
        if slot.is_none() {
            *slot = Some(handler);
        }
        Some(result)
    }
}

impl<T: ?Sized> Default for Slot<T> {
    fn default() -> Self {
        Self::new()
    }
}
