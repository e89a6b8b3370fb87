//! Display sinks fed by the decode worker after the frame callback.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use jpeg_encoder::{ColorType, Encoder};
use parking_lot::Mutex;

use crate::frame::{Frame, PLANES, chroma_size};

pub trait DisplaySink: Send {
    fn show(&mut self, frame: &Frame) -> anyhow::Result<()>;
}

/// Lets the caller keep a handle on a sink that the pipeline owns.
impl<S: DisplaySink + ?Sized> DisplaySink for Arc<Mutex<S>> {
    fn show(&mut self, frame: &Frame) -> anyhow::Result<()> {
        self.lock().show(frame)
    }
}

/// A planar YUV 4:2:0 surface with row-aligned strides, the layout window
/// systems hand out for video overlays.
///
/// Frames are copied plane by plane, row by row. A frame larger than the
/// surface is clipped to it; a smaller one leaves the remainder untouched.
pub struct PlanarSurface {
    width: u32,
    height: u32,
    offsets: [usize; PLANES],
    strides: [usize; PLANES],
    data: Vec<u8>,
    frames_shown: u64,
}

impl PlanarSurface {
    /// `align` rounds every plane's stride up to a multiple of itself.
    pub fn new(width: u32, height: u32, align: usize) -> Self {
        let align = align.max(1);
        let (cw, ch) = chroma_size(width, height);
        let luma_stride = (width as usize).next_multiple_of(align);
        let chroma_stride = cw.next_multiple_of(align);

        let luma_len = luma_stride * height as usize;
        let chroma_len = chroma_stride * ch;
        Self {
            width,
            height,
            offsets: [0, luma_len, luma_len + chroma_len],
            strides: [luma_stride, chroma_stride, chroma_stride],
            data: vec![0; luma_len + 2 * chroma_len],
            frames_shown: 0,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self, plane: usize) -> usize {
        self.strides[plane]
    }

    /// One row of `plane`, including its padding.
    pub fn row(&self, plane: usize, row: usize) -> &[u8] {
        let start = self.offsets[plane] + row * self.strides[plane];
        &self.data[start..start + self.strides[plane]]
    }

    pub fn frames_shown(&self) -> u64 {
        self.frames_shown
    }

    fn plane_rows(&self, plane: usize) -> usize {
        if plane == 0 {
            self.height as usize
        } else {
            chroma_size(self.width, self.height).1
        }
    }

    fn plane_width(&self, plane: usize) -> usize {
        if plane == 0 {
            self.width as usize
        } else {
            chroma_size(self.width, self.height).0
        }
    }
}

impl DisplaySink for PlanarSurface {
    fn show(&mut self, frame: &Frame) -> anyhow::Result<()> {
        if frame.width() != self.width || frame.height() != self.height {
            log::debug!(
                "clipping {}x{} frame to {}x{} surface",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            );
        }
        for plane in 0..PLANES {
            let rows = self.plane_rows(plane).min(frame.plane_rows(plane));
            let cols = self.plane_width(plane).min(frame.plane_width(plane));
            for row in 0..rows {
                let src = &frame.row(plane, row)[..cols];
                let start = self.offsets[plane] + row * self.strides[plane];
                self.data[start..start + cols].copy_from_slice(src);
            }
        }
        self.frames_shown += 1;
        Ok(())
    }
}

/// Writes every `every`-th frame as `frame_NNNNNN.jpg` into a directory.
pub struct JpegSnapshots {
    dir: PathBuf,
    every: u64,
    quality: u8,
    seen: u64,
    written: Vec<PathBuf>,
}

impl JpegSnapshots {
    pub fn new(dir: impl AsRef<Path>, every: u64, quality: u8) -> anyhow::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            every: every.max(1),
            quality: quality.clamp(1, 100),
            seen: 0,
            written: Vec::new(),
        })
    }

    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }
}

impl DisplaySink for JpegSnapshots {
    fn show(&mut self, frame: &Frame) -> anyhow::Result<()> {
        let index = self.seen;
        self.seen += 1;
        if index % self.every != 0 {
            return Ok(());
        }

        let width = u16::try_from(frame.width())?;
        let height = u16::try_from(frame.height())?;
        let path = self.dir.join(format!("frame_{:06}.jpg", index));
        let encoder = Encoder::new_file(&path, self.quality)?;
        encoder.encode(&frame.to_rgb(), width, height, ColorType::Rgb)?;
        log::debug!("wrote snapshot {}", path.display());
        self.written.push(path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::gray_frame;

    #[test]
    fn surface_copies_planes_into_aligned_rows() {
        let data: Vec<u8> = (0..24).collect();
        let frame = Frame::from_yuv420p(data, 4, 4, 0).unwrap();
        let mut surface = PlanarSurface::new(4, 4, 8);
        assert_eq!(surface.stride(0), 8);
        assert_eq!(surface.stride(1), 8);

        surface.show(&frame).unwrap();
        assert_eq!(&surface.row(0, 1)[..4], &[4, 5, 6, 7]);
        assert_eq!(&surface.row(0, 1)[4..], &[0, 0, 0, 0]);
        assert_eq!(&surface.row(1, 1)[..2], &[18, 19]);
        assert_eq!(&surface.row(2, 0)[..2], &[20, 21]);
        assert_eq!(surface.frames_shown(), 1);
    }

    #[test]
    fn surface_clips_larger_frames() {
        let mut surface = PlanarSurface::new(2, 2, 1);
        surface.show(&gray_frame(6, 4, 9)).unwrap();
        assert_eq!(surface.row(0, 0), &[9, 9]);
        assert_eq!(surface.row(0, 1), &[9, 9]);
        assert_eq!(surface.row(1, 0), &[128]);
    }

    #[test]
    fn shared_surface_stays_readable() {
        let surface = Arc::new(Mutex::new(PlanarSurface::new(4, 4, 4)));
        let mut sink: Box<dyn DisplaySink> = Box::new(Arc::clone(&surface));
        sink.show(&gray_frame(4, 4, 3)).unwrap();
        assert_eq!(surface.lock().row(0, 3), &[3, 3, 3, 3]);
    }

    #[test]
    fn snapshots_every_nth_frame() {
        let dir = std::env::temp_dir().join(format!("ffmpeg-pipe-snap-{}", std::process::id()));
        let mut sink = JpegSnapshots::new(&dir, 2, 80).unwrap();
        for pts in 0..5 {
            sink.show(&gray_frame(16, 16, pts)).unwrap();
        }

        let names: Vec<String> = sink
            .written()
            .iter()
            .filter_map(|p| p.file_name()?.to_str().map(str::to_string))
            .collect();
        assert_eq!(
            names,
            vec!["frame_000000.jpg", "frame_000002.jpg", "frame_000004.jpg"]
        );
        for path in sink.written() {
            let bytes = std::fs::read(path).unwrap();
            assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        }
        let _ = std::fs::remove_dir_all(&dir);
    }
}
