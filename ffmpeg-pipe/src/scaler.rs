use ffmpeg_next::format::Pixel;
use ffmpeg_next::frame::Video;
use ffmpeg_next::software::scaling::{Context, flag::Flags};

/// Pixel format and size conversion for the FFmpeg engines.
///
/// Built lazily for one input geometry; [`Scaler::accepts`] tells the owner
/// when the input changed and a new scaler is needed.
pub struct Scaler {
    context: Context,
    src: (Pixel, u32, u32),
    dst: (Pixel, u32, u32),
}

impl Scaler {
    pub fn new(src: (Pixel, u32, u32), dst: (Pixel, u32, u32)) -> anyhow::Result<Self> {
        let context = Context::get(src.0, src.1, src.2, dst.0, dst.1, dst.2, Flags::BILINEAR)?;
        log::debug!(
            "scaler {:?} {}x{} -> {:?} {}x{}",
            src.0,
            src.1,
            src.2,
            dst.0,
            dst.1,
            dst.2
        );
        Ok(Self { context, src, dst })
    }

    /// Scaler for an arbitrary decoder output into pipeline frames.
    pub fn to_yuv420p(frame: &Video) -> anyhow::Result<Self> {
        let (width, height) = (frame.width(), frame.height());
        Self::new(
            (frame.format(), width, height),
            (Pixel::YUV420P, width, height),
        )
    }

    pub fn accepts(&self, frame: &Video) -> bool {
        self.src == (frame.format(), frame.width(), frame.height())
    }

    pub fn output(&self) -> (Pixel, u32, u32) {
        self.dst
    }

    /// Convert into a new frame, keeping the source pts.
    pub fn convert(&mut self, frame: &Video) -> anyhow::Result<Video> {
        let mut converted = Video::empty();
        self.context.run(frame, &mut converted)?;
        converted.set_pts(frame.pts());
        Ok(converted)
    }
}

// SwsContext is only touched by the thread that currently owns the engine.
unsafe impl Send for Scaler {}
