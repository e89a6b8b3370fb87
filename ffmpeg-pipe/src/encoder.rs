use std::collections::VecDeque;

use ffmpeg_next::format::Pixel;
use ffmpeg_next::{Dictionary, Rational, picture};

use crate::engine::EncodeEngine;
use crate::frame::Frame;
use crate::hw::{find_hw_encoder, pixel_format_for_encoder};
use crate::packet::Packet;
use crate::scaler::Scaler;

#[derive(Debug, Clone)]
pub struct Settings {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    /// Target bits per second; `None` leaves the codec default.
    pub bitrate: Option<usize>,
    pub keyframe_interval: u64,
    pub codec: String,
    /// Encoder input format; `None` picks one for the codec.
    pub pixel_format: Option<Pixel>,
    /// x264/x265 preset. Also switches on `tune=zerolatency`.
    pub preset: Option<String>,
    /// Probe hardware encoders before the software codec.
    pub hardware: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            frame_rate: 30,
            bitrate: None,
            keyframe_interval: 30,
            codec: "libx264".to_string(),
            pixel_format: None,
            preset: Some("ultrafast".to_string()),
            hardware: true,
        }
    }
}

/// FFmpeg-backed [`EncodeEngine`].
///
/// Frames whose format or size differ from the encoder are scaled first. The
/// engine can be reused after a flush; it reopens the codec on the next frame.
pub struct FfmpegEncoder {
    encoder: ffmpeg_next::codec::encoder::Video,
    codec_name: String,
    settings: Settings,
    scaler: Option<Scaler>,
    pending: VecDeque<ffmpeg_next::Packet>,
    frame_index: i64,
    last_pts: Option<i64>,
    eof_sent: bool,
}

impl FfmpegEncoder {
    pub fn new(settings: Settings) -> anyhow::Result<Self> {
        let (encoder, codec_name) = open(&settings)?;
        Ok(Self {
            encoder,
            codec_name,
            settings,
            scaler: None,
            pending: VecDeque::new(),
            frame_index: 0,
            last_pts: None,
            eof_sent: false,
        })
    }

    /// The codec actually opened, e.g. `h264_vaapi` when hardware was found.
    pub fn codec_name(&self) -> &str {
        &self.codec_name
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn reopen(&mut self) -> anyhow::Result<()> {
        let (encoder, codec_name) = open(&self.settings)?;
        self.encoder = encoder;
        self.codec_name = codec_name;
        self.pending.clear();
        self.frame_index = 0;
        self.last_pts = None;
        self.eof_sent = false;
        Ok(())
    }

    fn prepare(&mut self, frame: &Frame) -> anyhow::Result<ffmpeg_next::frame::Video> {
        let video = frame.to_video();
        let target = (
            self.encoder.format(),
            self.encoder.width(),
            self.encoder.height(),
        );
        if (video.format(), video.width(), video.height()) == target {
            return Ok(video);
        }

        let scaler = match self.scaler.take() {
            Some(scaler) if scaler.accepts(&video) => scaler,
            _ => Scaler::new((video.format(), video.width(), video.height()), target)?,
        };
        let scaler = self.scaler.insert(scaler);
        scaler.convert(&video)
    }

    fn receive_pending(&mut self) -> anyhow::Result<()> {
        loop {
            let mut packet = ffmpeg_next::Packet::empty();
            match self.encoder.receive_packet(&mut packet) {
                Ok(()) => self.pending.push_back(packet),
                Err(ffmpeg_next::Error::Other { errno })
                    if errno == ffmpeg_next::util::error::EAGAIN =>
                {
                    return Ok(());
                }
                Err(ffmpeg_next::Error::Eof) => return Ok(()),
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn pop_into(&mut self, packet: &mut Packet) -> bool {
        match self.pending.pop_front() {
            Some(encoded) => {
                packet.fill_from(&encoded);
                true
            }
            None => false,
        }
    }
}

impl EncodeEngine for FfmpegEncoder {
    fn encode_one(&mut self, frame: &Frame, packet: &mut Packet) -> anyhow::Result<bool> {
        if self.eof_sent {
            log::debug!("reopening {} for a new run", self.codec_name);
            self.reopen()?;
        }

        let mut video = self.prepare(frame)?;
        // codecs reject non-increasing pts
        let pts = match self.last_pts {
            Some(last) if frame.pts() <= last => last + 1,
            _ => frame.pts(),
        };
        self.last_pts = Some(pts);
        video.set_pts(Some(pts));

        let interval = self.settings.keyframe_interval.max(1) as i64;
        if self.frame_index % interval == 0 {
            video.set_kind(picture::Type::I);
        }
        self.frame_index += 1;

        self.encoder.send_frame(&video)?;
        self.receive_pending()?;
        Ok(self.pop_into(packet))
    }

    fn flush(&mut self, packet: &mut Packet) -> anyhow::Result<bool> {
        if !self.eof_sent {
            self.encoder.send_eof()?;
            self.eof_sent = true;
            self.receive_pending()?;
        }
        Ok(self.pop_into(packet))
    }
}

/// Open the configured codec, trying a hardware encoder first when allowed.
fn open(settings: &Settings) -> anyhow::Result<(ffmpeg_next::codec::encoder::Video, String)> {
    if settings.hardware {
        if let Some(hw_codec) = find_hw_encoder(&settings.codec) {
            let hw_name = hw_codec.name().to_string();
            log::info!("attempting hardware encoder: {}", hw_name);
            match open_codec(hw_codec, &hw_name, settings) {
                Ok(encoder) => return Ok((encoder, hw_name)),
                Err(e) => log::warn!(
                    "hardware encoder {} failed: {}, falling back to {}",
                    hw_name,
                    e,
                    settings.codec
                ),
            }
        }
    }

    let codec = ffmpeg_next::encoder::find_by_name(&settings.codec)
        .ok_or(anyhow::anyhow!("codec not found: {}", settings.codec))?;
    let encoder = open_codec(codec, &settings.codec, settings)?;
    log::info!(
        "encoder opened: {} {}x{}@{}",
        settings.codec,
        settings.width,
        settings.height,
        settings.frame_rate
    );
    Ok((encoder, settings.codec.clone()))
}

fn open_codec(
    codec: ffmpeg_next::Codec,
    name: &str,
    settings: &Settings,
) -> anyhow::Result<ffmpeg_next::codec::encoder::Video> {
    let mut encoder = ffmpeg_next::codec::Context::new_with_codec(codec)
        .encoder()
        .video()?;
    let rate = Rational::new(settings.frame_rate.max(1) as i32, 1);
    encoder.set_width(settings.width);
    encoder.set_height(settings.height);
    encoder.set_format(
        settings
            .pixel_format
            .unwrap_or_else(|| pixel_format_for_encoder(name)),
    );
    encoder.set_frame_rate(Some(rate));
    encoder.set_time_base(rate.invert());
    encoder.set_gop(settings.keyframe_interval.min(u32::MAX as u64) as u32);
    encoder.set_max_b_frames(0);
    if let Some(bitrate) = settings.bitrate {
        encoder.set_bit_rate(bitrate);
    }

    let mut opts = Dictionary::new();
    if let Some(preset) = &settings.preset {
        opts.set("preset", preset);
        opts.set("tune", "zerolatency");
    }
    Ok(encoder.open_with(opts)?)
}

#[cfg(test)]
#[path = "encoder_test.rs"]
mod encoder_test;
