//! Camera-native NV12 to planar YUV 4:2:0 repacking.

use crate::error::{PipelineError, Result};
use crate::frame::{Frame, yuv420p_len};

/// Repack an NV12 picture (one luma plane, one interleaved U/V plane, rows
/// possibly padded to a hardware stride) into a packed planar [`Frame`].
///
/// The output has luma stride `width` and chroma strides `width / 2`, all in a
/// single `width * height * 3 / 2` allocation. Nothing borrowed from the source
/// is retained. The returned frame has pts 0.
pub fn repack_nv12(
    src_luma: &[u8],
    src_chroma: &[u8],
    width: u32,
    height: u32,
    luma_stride: usize,
    chroma_stride: usize,
) -> Result<Frame> {
    if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
        return Err(PipelineError::UnsupportedGeometry { width, height });
    }
    let w = width as usize;
    let h = height as usize;
    if luma_stride < w || chroma_stride < w {
        return Err(PipelineError::UnsupportedGeometry { width, height });
    }

    let luma_needed = luma_stride * (h - 1) + w;
    if src_luma.len() < luma_needed {
        return Err(PipelineError::BufferTooSmall {
            needed: luma_needed,
            have: src_luma.len(),
        });
    }
    let chroma_rows = h / 2;
    let chroma_needed = chroma_stride * (chroma_rows - 1) + w;
    if src_chroma.len() < chroma_needed {
        return Err(PipelineError::BufferTooSmall {
            needed: chroma_needed,
            have: src_chroma.len(),
        });
    }

    let mut buf = vec![0u8; yuv420p_len(width, height)];
    let (luma, chroma) = buf.split_at_mut(w * h);
    let (dst_u, dst_v) = chroma.split_at_mut(w * h / 4);

    for (row, dst) in luma.chunks_exact_mut(w).enumerate() {
        let start = row * luma_stride;
        dst.copy_from_slice(&src_luma[start..start + w]);
    }

    let half = w / 2;
    for row in 0..chroma_rows {
        let start = row * chroma_stride;
        let src = &src_chroma[start..start + w];
        let u_row = &mut dst_u[row * half..(row + 1) * half];
        let v_row = &mut dst_v[row * half..(row + 1) * half];
        for ((pair, u), v) in src.chunks_exact(2).zip(u_row.iter_mut()).zip(v_row.iter_mut()) {
            *u = pair[0];
            *v = pair[1];
        }
    }

    Frame::from_yuv420p(buf, width, height, 0)
}

#[cfg(test)]
#[path = "repack_test.rs"]
mod repack_test;
