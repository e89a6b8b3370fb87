use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "lite-cam")]
#[command(about = "Camera capture and playback through the ffmpeg-pipe frame pipeline")]
pub struct Cli {
    /// JSON file with pipeline and encoder overrides
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Encode the synthetic camera into an elementary stream file
    Record(RecordArgs),
    /// Decode a stream file, optionally saving JPEG snapshots
    Play(PlayArgs),
}

#[derive(Args, Debug)]
pub struct RecordArgs {
    /// Output file
    pub output: PathBuf,

    /// Codec name, or "raw" for planar YUV 4:2:0
    #[arg(long, default_value = "libx264")]
    pub codec: String,

    #[arg(long, default_value = "640")]
    pub width: u32,

    #[arg(long, default_value = "480")]
    pub height: u32,

    #[arg(long, default_value = "30")]
    pub fps: u32,

    /// Stop after this many frames; runs until Ctrl-C otherwise
    #[arg(short = 'n', long)]
    pub frames: Option<u64>,

    /// Skip hardware encoder probing
    #[arg(long)]
    pub software: bool,
}

#[derive(Args, Debug)]
pub struct PlayArgs {
    /// Input file
    pub input: PathBuf,

    /// Codec name, or "raw" for planar YUV 4:2:0
    #[arg(long, default_value = "h264")]
    pub codec: String,

    /// Frame width, required for raw input
    #[arg(long, default_value = "640")]
    pub width: u32,

    /// Frame height, required for raw input
    #[arg(long, default_value = "480")]
    pub height: u32,

    /// Directory for JPEG snapshots
    #[arg(long)]
    pub snapshots: Option<PathBuf>,

    /// Save every n-th frame
    #[arg(long, default_value = "30")]
    pub every: u64,

    #[arg(long, default_value = "85")]
    pub quality: u8,

    /// Skip hardware decoder probing
    #[arg(long)]
    pub software: bool,
}
