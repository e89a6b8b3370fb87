use clap::Parser;
use tokio_util::sync::CancellationToken;

mod cli;
mod config;
mod play;
mod record;

use cli::{Cli, Command};

fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .filter_module("ffmpeg_next", log::LevelFilter::Warn)
        .filter_module("ffmpeg_pipe", log::LevelFilter::Debug)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();
    ffmpeg_pipe::init()?;
    let config = config::AppConfig::load(cli.config.as_deref())?;

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_clone.cancel();
        }
    });

    match cli.command {
        Command::Record(args) => record::run(args, &config, cancel).await,
        Command::Play(args) => play::run(args, &config, cancel).await,
    }
}
