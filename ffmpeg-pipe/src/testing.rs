//! Frames and fake engines shared by the unit tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::Receiver;

use bytes::Bytes;

use crate::engine::{DecodeEngine, Decoded, EncodeEngine, RawDecoder, RawEncoder};
use crate::frame::{Frame, yuv420p_len};
use crate::packet::Packet;

/// Flat frame whose luma value is the low byte of `pts`.
pub fn gray_frame(width: u32, height: u32, pts: i64) -> Frame {
    let luma = width as usize * height as usize;
    let mut data = vec![128u8; yuv420p_len(width, height)];
    data[..luma].fill(pts as u8);
    Frame::from_yuv420p(data, width, height, pts).unwrap()
}

/// `count` gray frames back to back as a packed byte stream.
pub fn raw_stream(count: i64, width: u32, height: u32) -> Vec<u8> {
    (0..count)
        .flat_map(|pts| gray_frame(width, height, pts).as_bytes().to_vec())
        .collect()
}

/// Holds `latency` frames back, releasing them only on later frames or flush.
/// Counts flush calls that returned no packet (i.e. completed flushes).
pub struct BufferedEncoder {
    latency: usize,
    pending: VecDeque<(Bytes, i64)>,
    pub flushes: Arc<AtomicUsize>,
}

impl BufferedEncoder {
    pub fn new(latency: usize) -> Self {
        Self {
            latency,
            pending: VecDeque::new(),
            flushes: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn emit(packet: &mut Packet, (data, pts): (Bytes, i64)) {
        packet.extend_from_slice(&data);
        packet.set_pts(Some(pts));
    }
}

impl EncodeEngine for BufferedEncoder {
    fn encode_one(&mut self, frame: &Frame, packet: &mut Packet) -> anyhow::Result<bool> {
        self.pending.push_back((frame.as_bytes().clone(), frame.pts()));
        if self.pending.len() <= self.latency {
            return Ok(false);
        }
        match self.pending.pop_front() {
            Some(entry) => {
                Self::emit(packet, entry);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn flush(&mut self, packet: &mut Packet) -> anyhow::Result<bool> {
        match self.pending.pop_front() {
            Some(entry) => {
                Self::emit(packet, entry);
                Ok(true)
            }
            None => {
                self.flushes.fetch_add(1, Ordering::SeqCst);
                Ok(false)
            }
        }
    }
}

/// Pass-through encoder that waits for one permit per frame.
pub struct GatedEncoder {
    permits: Receiver<()>,
}

impl GatedEncoder {
    pub fn new(permits: Receiver<()>) -> Self {
        Self { permits }
    }
}

impl EncodeEngine for GatedEncoder {
    fn encode_one(&mut self, frame: &Frame, packet: &mut Packet) -> anyhow::Result<bool> {
        // a dropped sender opens the gate for good
        let _ = self.permits.recv();
        RawEncoder.encode_one(frame, packet)
    }

    fn flush(&mut self, _packet: &mut Packet) -> anyhow::Result<bool> {
        Ok(false)
    }
}

/// Pass-through encoder that fails on the listed pts values.
pub struct FailingEncoder {
    fail_on: Vec<i64>,
}

impl FailingEncoder {
    pub fn new(fail_on: &[i64]) -> Self {
        Self {
            fail_on: fail_on.to_vec(),
        }
    }
}

impl EncodeEngine for FailingEncoder {
    fn encode_one(&mut self, frame: &Frame, packet: &mut Packet) -> anyhow::Result<bool> {
        if self.fail_on.contains(&frame.pts()) {
            anyhow::bail!("encoder rejected frame {}", frame.pts());
        }
        RawEncoder.encode_one(frame, packet)
    }

    fn flush(&mut self, _packet: &mut Packet) -> anyhow::Result<bool> {
        Ok(false)
    }
}

/// Raw decoder that keeps the latest frame back until the end-of-stream call.
pub struct DelayedDecoder {
    inner: RawDecoder,
    held: Option<Frame>,
}

impl DelayedDecoder {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            inner: RawDecoder::new(width, height).unwrap(),
            held: None,
        }
    }
}

impl DecodeEngine for DelayedDecoder {
    fn decode_one(&mut self, input: &[u8]) -> anyhow::Result<Decoded> {
        if input.is_empty() {
            return Ok(Decoded {
                consumed: 0,
                frame: self.held.take(),
            });
        }
        let mut decoded = self.inner.decode_one(input)?;
        if let Some(frame) = decoded.frame.take() {
            decoded.frame = self.held.replace(frame);
        }
        Ok(decoded)
    }
}

/// Decoder that fails on every `every`-th call, delegating otherwise.
pub struct FlakyDecoder {
    inner: RawDecoder,
    every: usize,
    calls: usize,
}

impl FlakyDecoder {
    pub fn new(width: u32, height: u32, every: usize) -> Self {
        Self {
            inner: RawDecoder::new(width, height).unwrap(),
            every,
            calls: 0,
        }
    }
}

impl DecodeEngine for FlakyDecoder {
    fn decode_one(&mut self, input: &[u8]) -> anyhow::Result<Decoded> {
        self.calls += 1;
        if !input.is_empty() && self.calls % self.every == 0 {
            anyhow::bail!("corrupt chunk at call {}", self.calls);
        }
        self.inner.decode_one(input)
    }
}

/// Decoder that never makes progress.
pub struct StuckDecoder;

impl DecodeEngine for StuckDecoder {
    fn decode_one(&mut self, _input: &[u8]) -> anyhow::Result<Decoded> {
        Ok(Decoded::default())
    }
}

/// Software MPEG-2 settings, or `None` when this FFmpeg build lacks the codec.
pub fn mpeg2_settings(width: u32, height: u32) -> Option<crate::encoder::Settings> {
    crate::init().unwrap();
    ffmpeg_next::encoder::find_by_name("mpeg2video")?;
    ffmpeg_next::decoder::find_by_name("mpeg2video")?;
    Some(crate::encoder::Settings {
        width,
        height,
        frame_rate: 25,
        codec: "mpeg2video".to_string(),
        preset: None,
        hardware: false,
        ..Default::default()
    })
}

/// Encode `count` gray frames into one MPEG-2 elementary stream.
pub fn mpeg2_stream(count: i64, width: u32, height: u32) -> Option<Vec<u8>> {
    let settings = mpeg2_settings(width, height)?;
    let mut encoder = crate::encoder::FfmpegEncoder::new(settings).unwrap();
    let mut packet = Packet::with_capacity(4096);
    let mut stream = Vec::new();
    for pts in 0..count {
        packet.clear();
        if encoder.encode_one(&gray_frame(width, height, pts), &mut packet).unwrap() {
            stream.extend_from_slice(packet.data());
        }
    }
    loop {
        packet.clear();
        if !encoder.flush(&mut packet).unwrap() {
            break;
        }
        stream.extend_from_slice(packet.data());
    }
    Some(stream)
}
