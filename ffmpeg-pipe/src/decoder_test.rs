use super::*;
use crate::decode_pipeline::DecodePipeline;
use crate::io::read_callback;
use crate::testing::mpeg2_stream;

fn decode_all(decoder: &mut FfmpegDecoder, stream: &[u8], chunk: usize) -> Vec<Frame> {
    let mut frames = Vec::new();
    for piece in stream.chunks(chunk) {
        let mut rest = piece;
        while !rest.is_empty() {
            let decoded = decoder.decode_one(rest).unwrap();
            rest = &rest[decoded.consumed..];
            frames.extend(decoded.frame);
            while let Some(frame) = decoder.next_frame() {
                frames.push(frame);
            }
        }
    }
    let tail = decoder.decode_one(&[]).unwrap();
    frames.extend(tail.frame);
    while let Some(frame) = decoder.next_frame() {
        frames.push(frame);
    }
    frames
}

#[test]
fn test_missing_decoder() {
    crate::init().unwrap();
    assert!(FfmpegDecoder::software("no-such-codec").is_err());
}

#[test]
fn test_decodes_elementary_stream() {
    let Some(stream) = mpeg2_stream(10, 64, 48) else {
        eprintln!("mpeg2video not available, skipping");
        return;
    };
    let mut decoder = FfmpegDecoder::software("mpeg2video").unwrap();
    let frames = decode_all(&mut decoder, &stream, 100);

    assert_eq!(frames.len(), 10);
    for frame in &frames {
        assert_eq!((frame.width(), frame.height()), (64, 48));
        assert_eq!(frame.as_bytes().len(), 64 * 48 * 3 / 2);
    }
}

#[test]
fn test_decoder_reusable_after_end_of_stream() {
    let Some(stream) = mpeg2_stream(4, 64, 48) else {
        eprintln!("mpeg2video not available, skipping");
        return;
    };
    let mut decoder = FfmpegDecoder::software("mpeg2video").unwrap();
    assert_eq!(decode_all(&mut decoder, &stream, 4096).len(), 4);
    assert_eq!(decode_all(&mut decoder, &stream, 4096).len(), 4);
}

#[test]
fn test_pipeline_with_ffmpeg_decoder() {
    let Some(stream) = mpeg2_stream(6, 64, 48) else {
        eprintln!("mpeg2video not available, skipping");
        return;
    };
    let pipeline = DecodePipeline::new();
    pipeline
        .configure(FfmpegDecoder::software("mpeg2video").unwrap())
        .unwrap();
    pipeline.set_read_callback(read_callback(std::io::Cursor::new(stream)));

    let (tx, rx) = std::sync::mpsc::channel();
    pipeline.set_frame_callback(move |frame, index| {
        let _ = tx.send((index, frame.width()));
    });
    pipeline.start().unwrap();
    pipeline.join();

    let frames: Vec<_> = rx.try_iter().collect();
    assert_eq!(frames.len(), 6);
    assert_eq!(frames[5], (5, 64));
    assert_eq!(pipeline.stats().processed, 6);
}
