//! Codec engine seams and the raw pass-through engines.

use bytes::BytesMut;

use crate::frame::{Frame, yuv420p_len};
use crate::packet::Packet;

/// A stateful, sequential encoder. Owned by exactly one thread at a time.
///
/// The worker clears `packet` before every call.
pub trait EncodeEngine: Send {
    /// Feed one frame. Returns `true` when `packet` now holds output.
    fn encode_one(&mut self, frame: &Frame, packet: &mut Packet) -> anyhow::Result<bool>;

    /// Drain buffered output, one packet per call, until it returns `false`.
    fn flush(&mut self, packet: &mut Packet) -> anyhow::Result<bool>;
}

/// Result of one [`DecodeEngine::decode_one`] call.
#[derive(Debug, Default)]
pub struct Decoded {
    /// Bytes of the input the engine took.
    pub consumed: usize,
    pub frame: Option<Frame>,
}

impl Decoded {
    pub fn consumed(consumed: usize) -> Self {
        Self {
            consumed,
            frame: None,
        }
    }

    pub fn with_frame(consumed: usize, frame: Frame) -> Self {
        Self {
            consumed,
            frame: Some(frame),
        }
    }
}

/// A stateful, sequential decoder fed arbitrary chunks of a bitstream.
pub trait DecodeEngine: Send {
    /// Consume a prefix of `input`, possibly yielding one frame. An empty
    /// `input` means end of stream: return any frame still buffered.
    fn decode_one(&mut self, input: &[u8]) -> anyhow::Result<Decoded>;

    /// Further frames already decoded by the last call, for engines that can
    /// produce more than one frame per input (reordering codecs at end of
    /// stream). The worker drains this after every `decode_one`.
    fn next_frame(&mut self) -> Option<Frame> {
        None
    }
}

impl<T: EncodeEngine + ?Sized> EncodeEngine for Box<T> {
    fn encode_one(&mut self, frame: &Frame, packet: &mut Packet) -> anyhow::Result<bool> {
        (**self).encode_one(frame, packet)
    }

    fn flush(&mut self, packet: &mut Packet) -> anyhow::Result<bool> {
        (**self).flush(packet)
    }
}

impl<T: DecodeEngine + ?Sized> DecodeEngine for Box<T> {
    fn decode_one(&mut self, input: &[u8]) -> anyhow::Result<Decoded> {
        (**self).decode_one(input)
    }

    fn next_frame(&mut self) -> Option<Frame> {
        (**self).next_frame()
    }
}

/// Writes every frame out as packed planar YUV 4:2:0. Each packet is a
/// keyframe carrying the frame's pts.
#[derive(Debug, Default)]
pub struct RawEncoder;

impl RawEncoder {
    pub fn new() -> Self {
        Self
    }
}

impl EncodeEngine for RawEncoder {
    fn encode_one(&mut self, frame: &Frame, packet: &mut Packet) -> anyhow::Result<bool> {
        frame.write_packed(packet.data_mut());
        packet.set_pts(Some(frame.pts()));
        packet.set_dts(Some(frame.pts()));
        packet.set_key(true);
        Ok(true)
    }

    fn flush(&mut self, _packet: &mut Packet) -> anyhow::Result<bool> {
        Ok(false)
    }
}

/// Cuts a packed planar YUV 4:2:0 byte stream of fixed geometry back into
/// frames, regardless of how the stream was chunked.
#[derive(Debug)]
pub struct RawDecoder {
    width: u32,
    height: u32,
    frame_len: usize,
    pending: BytesMut,
    next_pts: i64,
}

impl RawDecoder {
    pub fn new(width: u32, height: u32) -> anyhow::Result<Self> {
        if width == 0 || height == 0 {
            anyhow::bail!("invalid raw geometry {}x{}", width, height);
        }
        let frame_len = yuv420p_len(width, height);
        Ok(Self {
            width,
            height,
            frame_len,
            pending: BytesMut::with_capacity(frame_len),
            next_pts: 0,
        })
    }
}

impl DecodeEngine for RawDecoder {
    fn decode_one(&mut self, input: &[u8]) -> anyhow::Result<Decoded> {
        if input.is_empty() {
            if !self.pending.is_empty() {
                log::warn!(
                    "dropping {} trailing bytes of an incomplete {}x{} frame",
                    self.pending.len(),
                    self.width,
                    self.height
                );
                self.pending.clear();
            }
            return Ok(Decoded::default());
        }

        let take = input.len().min(self.frame_len - self.pending.len());
        self.pending.extend_from_slice(&input[..take]);
        if self.pending.len() < self.frame_len {
            return Ok(Decoded::consumed(take));
        }

        let data = self.pending.split().freeze();
        self.pending.reserve(self.frame_len);
        let frame = Frame::from_yuv420p(data, self.width, self.height, self.next_pts)?;
        self.next_pts += 1;
        Ok(Decoded::with_frame(take, frame))
    }
}
