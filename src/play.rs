use std::fs::File;
use std::io::BufReader;

use anyhow::Context;
use ffmpeg_pipe::display::JpegSnapshots;
use ffmpeg_pipe::engine::RawDecoder;
use ffmpeg_pipe::stream::frame_stream;
use ffmpeg_pipe::{DecodePipeline, FfmpegDecoder};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::cli::PlayArgs;
use crate::config::AppConfig;

pub async fn run(
    args: PlayArgs,
    config: &AppConfig,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let pipeline = DecodePipeline::with_config(config.pipeline.clone());
    match args.codec.as_str() {
        "raw" => pipeline.configure(RawDecoder::new(args.width, args.height)?)?,
        codec if args.software => pipeline.configure(FfmpegDecoder::software(codec)?)?,
        codec => pipeline.configure(FfmpegDecoder::new(codec)?)?,
    }

    let file = File::open(&args.input)
        .with_context(|| format!("opening {}", args.input.display()))?;
    pipeline.set_read_callback(ffmpeg_pipe::io::read_callback(BufReader::new(file)));
    if let Some(dir) = &args.snapshots {
        pipeline.set_display(JpegSnapshots::new(dir, args.every, args.quality)?);
    }

    let mut frames = frame_stream(&pipeline);
    pipeline.start()?;

    let mut stopping = false;
    let result = loop {
        tokio::select! {
            item = frames.next() => match item {
                Some(Ok((index, frame))) => log::debug!("frame {}: {}", index, frame),
                Some(Err(err)) => break Err(err),
                None => break Ok(()),
            },
            _ = cancel.cancelled(), if !stopping => {
                log::info!("interrupted, stopping playback");
                stopping = true;
                if let Err(e) = pipeline.stop() {
                    log::debug!("stop: {}", e);
                }
            },
        }
    };

    let stats = pipeline.stats();
    pipeline.close();
    log::info!(
        "decoded {} frames from {} ({} bytes read, {} errors)",
        stats.processed,
        args.input.display(),
        stats.bytes,
        stats.errors
    );
    result
}
