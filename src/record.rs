use std::fs::File;
use std::io::{BufWriter, Write};
use std::time::Duration;

use anyhow::Context;
use ffmpeg_pipe::camera::{SyntheticCamera, SyntheticCameraConfig};
use ffmpeg_pipe::engine::RawEncoder;
use ffmpeg_pipe::io::PacketWriter;
use ffmpeg_pipe::{
    CameraSource, EncodePipeline, EncoderSettings, FfmpegEncoder, PipelineError, PipelineState,
};
use tokio_util::sync::CancellationToken;

use crate::cli::RecordArgs;
use crate::config::AppConfig;

pub async fn run(
    args: RecordArgs,
    config: &AppConfig,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let file = File::create(&args.output)
        .with_context(|| format!("creating {}", args.output.display()))?;
    record_into(args, config, cancel, BufWriter::new(file)).await
}

async fn record_into<W>(
    args: RecordArgs,
    config: &AppConfig,
    cancel: CancellationToken,
    output: W,
) -> anyhow::Result<()>
where
    W: Write + Send + 'static,
{
    let pipeline = EncodePipeline::with_config(config.pipeline.clone());
    if args.codec == "raw" {
        pipeline.configure(RawEncoder::new())?;
    } else {
        let settings = EncoderSettings {
            width: args.width,
            height: args.height,
            frame_rate: args.fps,
            bitrate: config.encoder.bitrate,
            keyframe_interval: config.encoder.keyframe_interval,
            codec: args.codec.clone(),
            preset: config.encoder.preset.clone(),
            hardware: !args.software,
            ..Default::default()
        };
        let encoder = FfmpegEncoder::new(settings)?;
        log::info!("encoding with {}", encoder.codec_name());
        pipeline.configure(encoder)?;
    }

    let writer = PacketWriter::new(output);
    pipeline.set_write_callback(writer.callback());

    let (done_tx, done_rx) = tokio::sync::oneshot::channel();
    let mut done_tx = Some(done_tx);
    let finisher = writer.clone();
    pipeline.set_close_callback(move |shutdown| {
        let aborted = shutdown.error().map(|e| format!("{:#}", e));
        let written = finisher.finish();
        if let Some(tx) = done_tx.take() {
            let _ = tx.send((aborted, written));
        }
    });
    pipeline.start()?;

    let mut camera = SyntheticCamera::new(SyntheticCameraConfig {
        width: args.width,
        height: args.height,
        fps: args.fps,
        frame_limit: args.frames,
        ..Default::default()
    });
    camera.start(pipeline.capture_feed())?;

    let mut ticker = tokio::time::interval(Duration::from_millis(100));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                log::info!("interrupted, draining");
                break;
            },
            _ = ticker.tick() => {
                if camera.is_finished() {
                    break;
                }
                if pipeline.state() == PipelineState::Stopped {
                    log::warn!("encode worker stopped early");
                    break;
                }
            },
        }
    }
    camera.stop()?;

    match pipeline.stop() {
        Ok(()) | Err(PipelineError::AlreadyStopped) => {}
        Err(e) => return Err(e.into()),
    }
    let (aborted, written) = done_rx.await.context("encode worker exited without closing")?;
    let stats = pipeline.stats();
    pipeline.close();

    if let Some(err) = aborted {
        anyhow::bail!("encoding aborted: {}", err);
    }
    let written = written.with_context(|| format!("writing {}", args.output.display()))?;
    log::info!(
        "recorded {} of {} frames into {} ({} packets, {} bytes)",
        stats.processed,
        camera.delivered(),
        args.output.display(),
        stats.packets,
        written
    );
    Ok(())
}
