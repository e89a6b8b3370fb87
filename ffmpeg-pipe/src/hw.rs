//! Hardware codec discovery with software fallback.
//!
//! Candidates are probed in order (CUDA, VAAPI, QSV, V4L2 M2M). A candidate
//! being compiled into FFmpeg does not mean the device exists, so callers
//! still have to fall back when opening it fails.

use ffmpeg_next::codec::Id;
use ffmpeg_next::format::Pixel;

/// Hardware decoder names to try for `codec_id`, best first.
pub fn hw_decoder_candidates(codec_id: Id) -> &'static [&'static str] {
    match codec_id {
        Id::H264 => &["h264_cuvid", "h264_qsv", "h264_v4l2m2m"],
        Id::HEVC => &["hevc_cuvid", "hevc_qsv", "hevc_v4l2m2m"],
        Id::VP8 => &["vp8_cuvid", "vp8_qsv", "vp8_v4l2m2m"],
        Id::VP9 => &["vp9_cuvid", "vp9_qsv", "vp9_v4l2m2m"],
        Id::AV1 => &["av1_cuvid", "av1_qsv"],
        Id::MPEG2VIDEO => &["mpeg2_cuvid", "mpeg2_qsv", "mpeg2_v4l2m2m"],
        _ => &[],
    }
}

/// Hardware encoder names to try in place of the software `codec_name`.
pub fn hw_encoder_candidates(codec_name: &str) -> &'static [&'static str] {
    match codec_name {
        "libx264" | "h264" => &["h264_nvenc", "h264_vaapi", "h264_qsv", "h264_v4l2m2m"],
        "libx265" | "hevc" | "h265" => &["hevc_nvenc", "hevc_vaapi", "hevc_qsv", "hevc_v4l2m2m"],
        "libvpx-vp9" | "vp9" => &["vp9_vaapi", "vp9_qsv"],
        "libaom-av1" | "libsvtav1" | "av1" => &["av1_nvenc", "av1_vaapi", "av1_qsv"],
        _ => &[],
    }
}

pub fn is_hw_codec(codec_name: &str) -> bool {
    ["nvenc", "cuvid", "vaapi", "qsv", "v4l2m2m"]
        .iter()
        .any(|suffix| codec_name.contains(suffix))
}

pub fn find_hw_decoder(codec_id: Id) -> Option<ffmpeg_next::Codec> {
    hw_decoder_candidates(codec_id).iter().find_map(|name| {
        let codec = ffmpeg_next::decoder::find_by_name(name)?;
        log::info!("found hardware decoder: {}", name);
        Some(codec)
    })
}

pub fn find_hw_encoder(codec_name: &str) -> Option<ffmpeg_next::Codec> {
    hw_encoder_candidates(codec_name).iter().find_map(|name| {
        let codec = ffmpeg_next::encoder::find_by_name(name)?;
        log::info!("found hardware encoder: {}", name);
        Some(codec)
    })
}

/// Input pixel format an encoder is fed with. Hardware encoders take NV12,
/// software ones planar 4:2:0, which is what pipeline frames already are.
pub fn pixel_format_for_encoder(codec_name: &str) -> Pixel {
    if is_hw_codec(codec_name) {
        Pixel::NV12
    } else {
        Pixel::YUV420P
    }
}
