use std::collections::VecDeque;
use std::os::raw::c_int;
use std::ptr::{self, NonNull};

use anyhow::Context as _;
use ffmpeg_next::codec::Id;
use ffmpeg_next::ffi;
use ffmpeg_next::format::Pixel;
use ffmpeg_next::frame::Video;

use crate::engine::{DecodeEngine, Decoded};
use crate::frame::Frame;
use crate::hw::find_hw_decoder;
use crate::scaler::Scaler;

/// Splits an elementary stream into packets, independent of how it was read.
struct Parser {
    ctx: NonNull<ffi::AVCodecParserContext>,
}

impl Parser {
    fn new(codec_id: Id) -> anyhow::Result<Self> {
        let ctx = unsafe { ffi::av_parser_init(ffi::AVCodecID::from(codec_id) as c_int) };
        NonNull::new(ctx)
            .map(|ctx| Self { ctx })
            .ok_or(anyhow::anyhow!("no bitstream parser for {:?}", codec_id))
    }

    /// Feed `input`; an empty slice flushes the parser. Returns the bytes taken
    /// and a complete packet, if one was cut.
    fn parse(
        &mut self,
        avctx: *mut ffi::AVCodecContext,
        input: &[u8],
    ) -> anyhow::Result<(usize, Option<ffmpeg_next::Packet>)> {
        let mut out: *mut u8 = ptr::null_mut();
        let mut out_len: c_int = 0;
        let (buf, len) = if input.is_empty() {
            (ptr::null(), 0)
        } else {
            (
                input.as_ptr(),
                c_int::try_from(input.len()).unwrap_or(c_int::MAX),
            )
        };

        let used = unsafe {
            ffi::av_parser_parse2(
                self.ctx.as_ptr(),
                avctx,
                &mut out,
                &mut out_len,
                buf,
                len,
                ffi::AV_NOPTS_VALUE,
                ffi::AV_NOPTS_VALUE,
                0,
            )
        };
        if used < 0 {
            return Err(ffmpeg_next::Error::from(used)).context("bitstream parser failed");
        }

        let packet = (out_len > 0 && !out.is_null()).then(|| {
            let data = unsafe { std::slice::from_raw_parts(out, out_len as usize) };
            ffmpeg_next::Packet::copy(data)
        });
        Ok((used as usize, packet))
    }
}

impl Drop for Parser {
    fn drop(&mut self) {
        unsafe { ffi::av_parser_close(self.ctx.as_ptr()) };
    }
}

// The parser context is only touched by the thread that owns the engine.
unsafe impl Send for Parser {}

/// FFmpeg-backed [`DecodeEngine`] for elementary streams (H.264 Annex B,
/// MPEG-2, ...). Output is converted to planar 4:2:0 when the codec produces
/// anything else.
pub struct FfmpegDecoder {
    decoder: ffmpeg_next::codec::decoder::Video,
    parser: Parser,
    codec_id: Id,
    codec_name: String,
    scaler: Option<Scaler>,
    pending: VecDeque<Frame>,
    decoded: i64,
    eof_sent: bool,
}

impl FfmpegDecoder {
    /// Decoder for `codec_name`, preferring a hardware decoder for the same
    /// codec when one opens.
    pub fn new(codec_name: &str) -> anyhow::Result<Self> {
        Self::open(codec_name, true)
    }

    /// Software decoder only.
    pub fn software(codec_name: &str) -> anyhow::Result<Self> {
        Self::open(codec_name, false)
    }

    fn open(codec_name: &str, hardware: bool) -> anyhow::Result<Self> {
        let software = ffmpeg_next::decoder::find_by_name(codec_name)
            .ok_or(anyhow::anyhow!("decoder not found: {}", codec_name))?;
        let codec_id = software.id();

        let mut chosen = None;
        if hardware {
            if let Some(hw_codec) = find_hw_decoder(codec_id) {
                match open_codec(hw_codec) {
                    Ok(decoder) => chosen = Some((decoder, hw_codec.name().to_string())),
                    Err(e) => log::warn!(
                        "hardware decoder {} failed: {}, falling back to {}",
                        hw_codec.name(),
                        e,
                        codec_name
                    ),
                }
            }
        }
        let (decoder, codec_name) = match chosen {
            Some(chosen) => chosen,
            None => (open_codec(software)?, software.name().to_string()),
        };
        log::info!("decoder opened: {}", codec_name);

        Ok(Self {
            decoder,
            parser: Parser::new(codec_id)?,
            codec_id,
            codec_name,
            scaler: None,
            pending: VecDeque::new(),
            decoded: 0,
            eof_sent: false,
        })
    }

    pub fn codec_name(&self) -> &str {
        &self.codec_name
    }

    fn send(&mut self, packet: &ffmpeg_next::Packet) -> anyhow::Result<()> {
        self.decoder.send_packet(packet)?;
        self.receive_pending()
    }

    fn receive_pending(&mut self) -> anyhow::Result<()> {
        loop {
            let mut video = Video::empty();
            match self.decoder.receive_frame(&mut video) {
                Ok(()) => {
                    let frame = self.to_frame(video)?;
                    self.pending.push_back(frame);
                }
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

    fn to_frame(&mut self, mut video: Video) -> anyhow::Result<Frame> {
        if video.pts().is_none() {
            video.set_pts(Some(self.decoded));
        }
        self.decoded += 1;

        if video.format() == Pixel::YUV420P {
            return Frame::try_from(&video);
        }
        let scaler = match self.scaler.take() {
            Some(scaler) if scaler.accepts(&video) => scaler,
            _ => Scaler::to_yuv420p(&video)?,
        };
        let converted = self.scaler.insert(scaler).convert(&video)?;
        Frame::try_from(&converted)
    }

    fn finish(&mut self) -> anyhow::Result<()> {
        if self.eof_sent {
            return Ok(());
        }
        let avctx = unsafe { self.decoder.as_mut_ptr() };
        let (_, tail) = self.parser.parse(avctx, &[])?;
        if let Some(tail) = tail {
            self.send(&tail)?;
        }
        self.decoder.send_eof()?;
        self.eof_sent = true;
        self.receive_pending()
    }

    /// Make the decoder usable again after end of stream.
    fn rewind(&mut self) -> anyhow::Result<()> {
        log::debug!("resetting {} for a new stream", self.codec_name);
        self.decoder.flush();
        self.parser = Parser::new(self.codec_id)?;
        self.pending.clear();
        self.decoded = 0;
        self.eof_sent = false;
        Ok(())
    }
}

impl DecodeEngine for FfmpegDecoder {
    fn decode_one(&mut self, input: &[u8]) -> anyhow::Result<Decoded> {
        if input.is_empty() {
            self.finish()?;
            return Ok(Decoded {
                consumed: 0,
                frame: self.pending.pop_front(),
            });
        }
        if self.eof_sent {
            self.rewind()?;
        }

        let avctx = unsafe { self.decoder.as_mut_ptr() };
        let (consumed, packet) = self.parser.parse(avctx, input)?;
        if let Some(packet) = packet {
            self.send(&packet)?;
        }
        Ok(Decoded {
            consumed,
            frame: self.pending.pop_front(),
        })
    }

    fn next_frame(&mut self) -> Option<Frame> {
        self.pending.pop_front()
    }
}

fn open_codec(codec: ffmpeg_next::Codec) -> anyhow::Result<ffmpeg_next::codec::decoder::Video> {
    let decoder = ffmpeg_next::codec::Context::new_with_codec(codec)
        .decoder()
        .open_as(codec)?
        .video()?;
    Ok(decoder)
}

#[cfg(test)]
#[path = "decoder_test.rs"]
mod decoder_test;
