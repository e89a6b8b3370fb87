//! Callbacks backed by `std::io` readers and writers.

use std::io::{self, Read, Write};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::packet::Packet;

struct WriterState<W> {
    writer: W,
    written: u64,
    error: Option<io::Error>,
}

/// Packet sink over any `Write`, shared between the write callback and the
/// code that finishes the output.
///
/// The first failed write is kept and every later packet is dropped, so the
/// output is a clean prefix of the stream rather than one with holes.
pub struct PacketWriter<W> {
    state: Arc<Mutex<WriterState<W>>>,
}

impl<W> Clone for PacketWriter<W> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<W> PacketWriter<W>
where
    W: Write + Send + 'static,
{
    pub fn new(writer: W) -> Self {
        Self {
            state: Arc::new(Mutex::new(WriterState {
                writer,
                written: 0,
                error: None,
            })),
        }
    }

    /// Write one packet in full. Key packets also flush the writer.
    pub fn write_packet(&self, packet: &Packet) {
        let mut state = self.state.lock();
        if state.error.is_some() {
            return;
        }
        let mut result = state.writer.write_all(packet.data());
        if result.is_ok() && packet.is_key() {
            result = state.writer.flush();
        }
        match result {
            Ok(()) => state.written += packet.size() as u64,
            Err(e) => {
                log::error!(
                    "failed to write {} byte packet after {} bytes, dropping the rest: {}",
                    packet.size(),
                    state.written,
                    e
                );
                state.error = Some(e);
            }
        }
    }

    /// The write callback feeding this writer.
    pub fn callback(&self) -> impl FnMut(&Packet) + Send + 'static {
        let writer = self.clone();
        move |packet: &Packet| writer.write_packet(packet)
    }

    /// Bytes written successfully so far.
    pub fn written(&self) -> u64 {
        self.state.lock().written
    }

    pub fn is_failed(&self) -> bool {
        self.state.lock().error.is_some()
    }

    /// Flush the writer and report the first failure of the run, if any.
    /// Returns the bytes written.
    pub fn finish(&self) -> io::Result<u64> {
        let mut state = self.state.lock();
        if let Some(e) = &state.error {
            return Err(io::Error::new(e.kind(), e.to_string()));
        }
        if let Err(e) = state.writer.flush() {
            let err = io::Error::new(e.kind(), e.to_string());
            state.error = Some(e);
            return Err(err);
        }
        Ok(state.written)
    }
}

/// A write callback that appends every packet in full to `writer`. Use a
/// [`PacketWriter`] directly when the outcome has to be checked.
pub fn write_callback<W>(writer: W) -> impl FnMut(&Packet) + Send + 'static
where
    W: Write + Send + 'static,
{
    PacketWriter::new(writer).callback()
}

/// A read callback pulling straight from `reader`.
pub fn read_callback<R>(
    mut reader: R,
) -> impl FnMut(&mut [u8]) -> io::Result<usize> + Send + 'static
where
    R: Read + Send + 'static,
{
    move |buf: &mut [u8]| reader.read(buf)
}
