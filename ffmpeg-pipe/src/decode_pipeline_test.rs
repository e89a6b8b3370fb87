use std::io::{self, Cursor, Read};
use std::sync::{Arc, mpsc};
use std::time::Duration;

use parking_lot::Mutex;

use super::*;
use crate::display::PlanarSurface;
use crate::engine::RawDecoder;
use crate::error::PipelineError;
use crate::testing::{DelayedDecoder, FlakyDecoder, StuckDecoder, gray_frame, raw_stream};

#[derive(Debug, PartialEq)]
enum Event {
    Frame(u64, i64),
    Display(i64),
    Close(bool),
}

type Events = Arc<Mutex<Vec<Event>>>;

struct RecordingSink(Events);

impl DisplaySink for RecordingSink {
    fn show(&mut self, frame: &Frame) -> anyhow::Result<()> {
        self.0.lock().push(Event::Display(frame.pts()));
        Ok(())
    }
}

/// Serves `data` through the read callback, at most `chunk` bytes per call.
fn serve(pipeline: &DecodePipeline, data: Vec<u8>, chunk: usize) {
    let mut cursor = Cursor::new(data);
    pipeline.set_read_callback(move |buf| {
        let len = buf.len().min(chunk);
        cursor.read(&mut buf[..len])
    });
}

fn record(pipeline: &DecodePipeline) -> (Events, mpsc::Receiver<()>) {
    let events: Events = Arc::default();
    let (done_tx, done_rx) = mpsc::channel();

    let sink = Arc::clone(&events);
    pipeline.set_frame_callback(move |frame, index| {
        sink.lock().push(Event::Frame(index, frame.pts()));
    });
    pipeline.set_display(RecordingSink(Arc::clone(&events)));

    let sink = Arc::clone(&events);
    pipeline.set_close_callback(move |shutdown| {
        sink.lock().push(Event::Close(shutdown.is_completed()));
        let _ = done_tx.send(());
    });
    (events, done_rx)
}

fn frame_indexes(events: &Events) -> Vec<u64> {
    events
        .lock()
        .iter()
        .filter_map(|e| match e {
            Event::Frame(index, _) => Some(*index),
            _ => None,
        })
        .collect()
}

fn wait_closed(done: &mpsc::Receiver<()>) {
    done.recv_timeout(Duration::from_secs(5))
        .expect("close callback not delivered");
}

#[test]
fn test_lifecycle_rejects() {
    let pipeline = DecodePipeline::new();
    assert!(matches!(pipeline.stop(), Err(PipelineError::AlreadyStopped)));
    assert!(matches!(
        pipeline.start(),
        Err(PipelineError::NoCodecConfigured)
    ));
}

#[test]
fn test_decodes_raw_stream_in_uneven_chunks() {
    let pipeline = DecodePipeline::new();
    pipeline.configure(RawDecoder::new(4, 4).unwrap()).unwrap();
    let stream = raw_stream(5, 4, 4);
    serve(&pipeline, stream.clone(), 7);
    let (events, done) = record(&pipeline);

    pipeline.start().unwrap();
    wait_closed(&done);
    pipeline.join();

    let mut expected = Vec::new();
    for pts in 0..5 {
        expected.push(Event::Frame(pts as u64, pts));
        expected.push(Event::Display(pts));
    }
    expected.push(Event::Close(true));
    assert_eq!(*events.lock(), expected);

    assert_eq!(pipeline.state(), PipelineState::Stopped);
    let stats = pipeline.stats();
    assert_eq!(stats.bytes, stream.len() as u64);
    assert_eq!(stats.processed, 5);
    assert_eq!(stats.packets, stream.len().div_ceil(7) as u64);
}

#[test]
fn test_chunk_size_comes_from_config() {
    let config = PipelineConfig::default().with_read_chunk_size(10);
    let pipeline = DecodePipeline::with_config(config);
    pipeline.configure(RawDecoder::new(2, 2).unwrap()).unwrap();

    let sizes = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&sizes);
    let mut cursor = Cursor::new(raw_stream(4, 2, 2));
    pipeline.set_read_callback(move |buf| {
        seen.lock().push(buf.len());
        cursor.read(buf)
    });
    let (_events, done) = record(&pipeline);

    pipeline.start().unwrap();
    wait_closed(&done);
    assert!(sizes.lock().iter().all(|&len| len == 10));
}

#[test]
fn test_trailing_frame_delivered_by_final_flush() {
    let pipeline = DecodePipeline::new();
    pipeline.configure(DelayedDecoder::new(2, 2)).unwrap();
    serve(&pipeline, raw_stream(3, 2, 2), 4096);
    let (events, done) = record(&pipeline);

    pipeline.start().unwrap();
    wait_closed(&done);

    assert_eq!(frame_indexes(&events), vec![0, 1, 2]);
    assert_eq!(events.lock().last(), Some(&Event::Close(true)));
}

#[test]
fn test_display_sink_receives_decoded_pixels() {
    let pipeline = DecodePipeline::new();
    pipeline.configure(RawDecoder::new(4, 4).unwrap()).unwrap();
    serve(&pipeline, raw_stream(3, 4, 4), 4096);
    let surface = Arc::new(Mutex::new(PlanarSurface::new(4, 4, 16)));
    pipeline.set_display(Arc::clone(&surface));

    pipeline.start().unwrap();
    while pipeline.state() != PipelineState::Stopped {
        std::thread::sleep(Duration::from_millis(1));
    }

    let surface = surface.lock();
    assert_eq!(surface.frames_shown(), 3);
    assert_eq!(&surface.row(0, 0)[..4], gray_frame(4, 4, 2).row(0, 0));
}

#[test]
fn test_engine_error_continue_drops_chunk() {
    let pipeline = DecodePipeline::new();
    // every third call fails; 2x2 frames are 6 bytes, served 6 at a time
    pipeline.configure(FlakyDecoder::new(2, 2, 3)).unwrap();
    serve(&pipeline, raw_stream(6, 2, 2), 6);
    let (events, done) = record(&pipeline);

    pipeline.start().unwrap();
    wait_closed(&done);

    assert_eq!(frame_indexes(&events), vec![0, 1, 2, 3]);
    assert_eq!(pipeline.stats().errors, 2);
    assert_eq!(events.lock().last(), Some(&Event::Close(true)));
}

#[test]
fn test_engine_error_abort_reports() {
    let config = PipelineConfig::default().with_error_policy(ErrorPolicy::Abort);
    let pipeline = DecodePipeline::with_config(config);
    pipeline.configure(FlakyDecoder::new(2, 2, 3)).unwrap();
    serve(&pipeline, raw_stream(6, 2, 2), 6);

    let errors = Arc::new(Mutex::new(Vec::new()));
    let (events, done) = record(&pipeline);
    let seen = Arc::clone(&errors);
    let sink = Arc::clone(&events);
    let (abort_tx, abort_rx) = mpsc::channel();
    pipeline.set_close_callback(move |shutdown| {
        if let Some(err) = shutdown.error() {
            seen.lock().push(err.to_string());
        }
        sink.lock().push(Event::Close(shutdown.is_completed()));
        let _ = abort_tx.send(());
    });
    drop(done);

    pipeline.start().unwrap();
    wait_closed(&abort_rx);

    assert_eq!(frame_indexes(&events), vec![0, 1]);
    assert_eq!(events.lock().last(), Some(&Event::Close(false)));
    assert_eq!(*errors.lock(), vec!["corrupt chunk at call 3".to_string()]);
}

#[test]
fn test_stalled_engine_does_not_spin() {
    let pipeline = DecodePipeline::new();
    pipeline.configure(StuckDecoder).unwrap();
    serve(&pipeline, vec![1u8; 64], 16);
    let (events, done) = record(&pipeline);

    pipeline.start().unwrap();
    wait_closed(&done);

    assert_eq!(*events.lock(), vec![Event::Close(true)]);
    assert_eq!(pipeline.stats().packets, 4);
}

#[test]
fn test_stop_ends_endless_stream() {
    let pipeline = DecodePipeline::new();
    pipeline.configure(DelayedDecoder::new(2, 2)).unwrap();
    pipeline.set_read_callback(|buf| {
        buf.fill(9);
        Ok(buf.len())
    });
    let (events, done) = record(&pipeline);

    pipeline.start().unwrap();
    assert!(matches!(pipeline.start(), Err(PipelineError::AlreadyRunning)));
    while frame_indexes(&events).len() < 3 {
        std::thread::sleep(Duration::from_millis(1));
    }
    pipeline.stop().unwrap();
    wait_closed(&done);
    pipeline.join();

    let indexes = frame_indexes(&events);
    assert_eq!(indexes, (0..indexes.len() as u64).collect::<Vec<_>>());
    assert_eq!(events.lock().last(), Some(&Event::Close(true)));
    assert_eq!(pipeline.state(), PipelineState::Stopped);
}

#[test]
fn test_read_errors() {
    let pipeline = DecodePipeline::new();
    pipeline.configure(RawDecoder::new(2, 2).unwrap()).unwrap();
    let mut calls = 0;
    pipeline.set_read_callback(move |buf| {
        calls += 1;
        match calls {
            1 => Err(io::Error::from(io::ErrorKind::Interrupted)),
            2 => {
                buf[..6].copy_from_slice(&[1, 2, 3, 4, 5, 6]);
                Ok(6)
            }
            _ => Err(io::Error::other("device gone")),
        }
    });
    let (events, done) = record(&pipeline);

    pipeline.start().unwrap();
    wait_closed(&done);

    assert_eq!(frame_indexes(&events), vec![0]);
    assert_eq!(events.lock().last(), Some(&Event::Close(true)));
    assert_eq!(pipeline.stats().errors, 1);
}

#[test]
fn test_missing_read_callback_is_end_of_stream() {
    let pipeline = DecodePipeline::new();
    pipeline.configure(RawDecoder::new(2, 2).unwrap()).unwrap();
    let (events, done) = record(&pipeline);

    pipeline.start().unwrap();
    wait_closed(&done);
    assert_eq!(*events.lock(), vec![Event::Close(true)]);
}

#[test]
fn test_close_and_reconfigure() {
    let pipeline = DecodePipeline::new();
    pipeline.configure(RawDecoder::new(2, 2).unwrap()).unwrap();
    serve(&pipeline, raw_stream(2, 2, 2), 4096);
    let (events, done) = record(&pipeline);

    pipeline.start().unwrap();
    wait_closed(&done);
    pipeline.close();
    pipeline.close();
    assert_eq!(pipeline.state(), PipelineState::Closed);
    assert!(matches!(
        pipeline.start(),
        Err(PipelineError::NoCodecConfigured)
    ));

    pipeline.configure(RawDecoder::new(2, 2).unwrap()).unwrap();
    serve(&pipeline, raw_stream(1, 2, 2), 4096);
    let (second, done) = record(&pipeline);
    pipeline.start().unwrap();
    wait_closed(&done);

    assert_eq!(frame_indexes(&events), vec![0, 1]);
    assert_eq!(frame_indexes(&second), vec![0]);
}
