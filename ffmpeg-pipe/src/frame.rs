use std::fmt::{Display, Formatter};

use bytes::{Bytes, BytesMut};
use ffmpeg_next::format::Pixel;

use crate::error::{PipelineError, Result};

/// Number of planes in a planar YUV 4:2:0 frame.
pub const PLANES: usize = 3;

/// Width and height of one chroma plane for a 4:2:0 picture.
pub fn chroma_size(width: u32, height: u32) -> (usize, usize) {
    (width.div_ceil(2) as usize, height.div_ceil(2) as usize)
}

/// Byte length of a tightly packed planar YUV 4:2:0 picture.
pub fn yuv420p_len(width: u32, height: u32) -> usize {
    let (cw, ch) = chroma_size(width, height);
    width as usize * height as usize + 2 * cw * ch
}

/// One planar YUV 4:2:0 picture.
///
/// All three planes are views into a single allocation, so the picture moves
/// between threads as one unit and is released exactly once, when the last
/// owner drops it.
#[derive(Clone)]
pub struct Frame {
    buf: Bytes,
    offsets: [usize; PLANES],
    strides: [usize; PLANES],
    width: u32,
    height: u32,
    pts: i64,
}

impl Frame {
    /// Wraps a tightly packed Y|U|V buffer (stride == plane width).
    pub fn from_yuv420p(data: impl Into<Bytes>, width: u32, height: u32, pts: i64) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(PipelineError::UnsupportedGeometry { width, height });
        }
        let buf = data.into();
        let needed = yuv420p_len(width, height);
        if buf.len() < needed {
            return Err(PipelineError::BufferTooSmall {
                needed,
                have: buf.len(),
            });
        }

        let (cw, ch) = chroma_size(width, height);
        let luma = width as usize * height as usize;
        Ok(Self {
            buf,
            offsets: [0, luma, luma + cw * ch],
            strides: [width as usize, cw, cw],
            width,
            height,
            pts,
        })
    }

    /// Wraps a buffer with arbitrary plane offsets and strides, e.g. a padded
    /// hardware layout.
    pub fn with_layout(
        data: impl Into<Bytes>,
        width: u32,
        height: u32,
        offsets: [usize; PLANES],
        strides: [usize; PLANES],
        pts: i64,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(PipelineError::UnsupportedGeometry { width, height });
        }
        let buf = data.into();
        for plane in 0..PLANES {
            let (plane_width, rows) = plane_dims(width, height, plane);
            if strides[plane] < plane_width {
                return Err(PipelineError::UnsupportedGeometry { width, height });
            }
            let needed = offsets[plane] + strides[plane] * (rows - 1) + plane_width;
            if buf.len() < needed {
                return Err(PipelineError::BufferTooSmall {
                    needed,
                    have: buf.len(),
                });
            }
        }

        Ok(Self {
            buf,
            offsets,
            strides,
            width,
            height,
            pts,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pts(&self) -> i64 {
        self.pts
    }

    pub fn set_pts(&mut self, pts: i64) {
        self.pts = pts;
    }

    /// Bytes per row of `plane` (0 = Y, 1 = U, 2 = V).
    pub fn stride(&self, plane: usize) -> usize {
        self.strides[plane]
    }

    /// Visible width in bytes of `plane`.
    pub fn plane_width(&self, plane: usize) -> usize {
        plane_dims(self.width, self.height, plane).0
    }

    /// Number of rows in `plane`.
    pub fn plane_rows(&self, plane: usize) -> usize {
        plane_dims(self.width, self.height, plane).1
    }

    /// The whole plane including any row padding, starting at its first row.
    pub fn plane(&self, plane: usize) -> &[u8] {
        let (plane_width, rows) = plane_dims(self.width, self.height, plane);
        let start = self.offsets[plane];
        let end = start + self.strides[plane] * (rows - 1) + plane_width;
        &self.buf[start..end]
    }

    /// Visible bytes of one row of `plane`.
    pub fn row(&self, plane: usize, row: usize) -> &[u8] {
        let start = self.offsets[plane] + row * self.strides[plane];
        &self.buf[start..start + self.plane_width(plane)]
    }

    pub fn y(&self) -> &[u8] {
        self.plane(0)
    }

    pub fn u(&self) -> &[u8] {
        self.plane(1)
    }

    pub fn v(&self) -> &[u8] {
        self.plane(2)
    }

    /// The underlying allocation shared by all three planes.
    pub fn as_bytes(&self) -> &Bytes {
        &self.buf
    }

    /// True when the planes are laid out back to back without row padding.
    pub fn is_packed(&self) -> bool {
        let (cw, ch) = chroma_size(self.width, self.height);
        let luma = self.width as usize * self.height as usize;
        self.strides == [self.width as usize, cw, cw]
            && self.offsets == [0, luma, luma + cw * ch]
    }

    /// Appends the visible pixels as packed Y|U|V to `out`.
    pub fn write_packed(&self, out: &mut BytesMut) {
        if self.is_packed() {
            out.extend_from_slice(&self.buf[..yuv420p_len(self.width, self.height)]);
            return;
        }
        out.reserve(yuv420p_len(self.width, self.height));
        for plane in 0..PLANES {
            for row in 0..self.plane_rows(plane) {
                out.extend_from_slice(self.row(plane, row));
            }
        }
    }

    /// Convert to interleaved RGB24 (BT.601, full swing).
    pub fn to_rgb(&self) -> Vec<u8> {
        let width = self.width as usize;
        let height = self.height as usize;
        let mut rgb = Vec::with_capacity(width * height * 3);

        for j in 0..height {
            let y_row = self.row(0, j);
            let u_row = self.row(1, j / 2);
            let v_row = self.row(2, j / 2);
            for i in 0..width {
                let y = y_row[i] as f32;
                let u = u_row[i / 2] as f32 - 128.0;
                let v = v_row[i / 2] as f32 - 128.0;

                let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
                let g = (y - 0.344136 * u - 0.714136 * v).clamp(0.0, 255.0) as u8;
                let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;

                rgb.push(r);
                rgb.push(g);
                rgb.push(b);
            }
        }

        rgb
    }

    /// Copy into a freshly allocated FFmpeg YUV420P frame.
    pub fn to_video(&self) -> ffmpeg_next::frame::Video {
        let mut video = ffmpeg_next::frame::Video::new(Pixel::YUV420P, self.width, self.height);
        for plane in 0..PLANES {
            let dst_stride = video.stride(plane);
            let dst = video.data_mut(plane);
            for row in 0..self.plane_rows(plane) {
                let src = self.row(plane, row);
                let start = row * dst_stride;
                dst[start..start + src.len()].copy_from_slice(src);
            }
        }
        video.set_pts(Some(self.pts));
        video
    }
}

fn plane_dims(width: u32, height: u32, plane: usize) -> (usize, usize) {
    if plane == 0 {
        (width as usize, height as usize)
    } else {
        chroma_size(width, height)
    }
}

impl TryFrom<&ffmpeg_next::frame::Video> for Frame {
    type Error = anyhow::Error;

    fn try_from(video: &ffmpeg_next::frame::Video) -> Result<Self, Self::Error> {
        if video.format() != Pixel::YUV420P {
            anyhow::bail!("expected yuv420p frame, got {:?}", video.format());
        }
        let (width, height) = (video.width(), video.height());
        let mut buf = BytesMut::with_capacity(yuv420p_len(width, height));
        for plane in 0..PLANES {
            let (plane_width, rows) = plane_dims(width, height, plane);
            let stride = video.stride(plane);
            let data = video.data(plane);
            for row in 0..rows {
                let start = row * stride;
                buf.extend_from_slice(&data[start..start + plane_width]);
            }
        }
        Ok(Frame::from_yuv420p(
            buf.freeze(),
            width,
            height,
            video.pts().unwrap_or(0),
        )?)
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("strides", &self.strides)
            .field("pts", &self.pts)
            .finish()
    }
}

impl Display for Frame {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "Frame {}x{}, pts: {}, data_len: {}",
            self.width,
            self.height,
            self.pts,
            self.buf.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_planes_share_one_allocation() {
        let data: Vec<u8> = (0..24).collect();
        let frame = Frame::from_yuv420p(data, 4, 4, 7).unwrap();

        assert!(frame.is_packed());
        assert_eq!(frame.y(), &(0..16).collect::<Vec<u8>>()[..]);
        assert_eq!(frame.u(), &[16, 17, 18, 19]);
        assert_eq!(frame.v(), &[20, 21, 22, 23]);
        assert_eq!(frame.stride(0), 4);
        assert_eq!(frame.stride(1), 2);
        assert_eq!(frame.pts(), 7);

        let base = frame.as_bytes().as_ptr() as usize;
        let v = frame.v().as_ptr() as usize;
        assert!(v >= base && v < base + frame.as_bytes().len());
    }

    #[test]
    fn short_buffer_is_rejected() {
        let err = Frame::from_yuv420p(vec![0u8; 23], 4, 4, 0).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::BufferTooSmall {
                needed: 24,
                have: 23
            }
        ));
    }

    #[test]
    fn odd_geometry_rounds_chroma_up() {
        assert_eq!(chroma_size(3, 5), (2, 3));
        assert_eq!(yuv420p_len(3, 5), 15 + 12);
        let frame = Frame::from_yuv420p(vec![1u8; 27], 3, 5, 0).unwrap();
        assert_eq!(frame.plane_width(1), 2);
        assert_eq!(frame.plane_rows(2), 3);
    }

    #[test]
    fn padded_layout_packs_visible_pixels() {
        // 2x2 picture, luma stride 4, chroma stride 3.
        let data = vec![
            1, 2, 0, 0, //
            3, 4, 0, 0, //
            5, 0, 0, //
            6,
        ];
        let frame = Frame::with_layout(data, 2, 2, [0, 8, 11], [4, 3, 3], 0).unwrap();
        assert!(!frame.is_packed());
        assert_eq!(frame.row(0, 1), &[3, 4]);

        let mut out = BytesMut::new();
        frame.write_packed(&mut out);
        assert_eq!(&out[..], &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn stride_narrower_than_width_is_rejected() {
        let err = Frame::with_layout(vec![0u8; 64], 4, 4, [0, 16, 20], [3, 2, 2], 0).unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedGeometry { .. }));
    }

    #[test]
    fn neutral_chroma_gives_gray_rgb() {
        let mut data = vec![100u8; 4];
        data.extend_from_slice(&[128, 128]);
        let frame = Frame::from_yuv420p(data, 2, 2, 0).unwrap();
        let rgb = frame.to_rgb();
        assert_eq!(rgb.len(), 12);
        assert!(rgb.iter().all(|&c| c == 100));
    }
}
