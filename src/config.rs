use std::path::Path;

use anyhow::Context;
use ffmpeg_pipe::PipelineConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub pipeline: PipelineConfig,
    pub encoder: EncoderConfig,
}

/// Encoder knobs that are not on the command line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    pub bitrate: Option<usize>,
    pub keyframe_interval: u64,
    pub preset: Option<String>,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            bitrate: None,
            keyframe_interval: 30,
            preset: Some("ultrafast".to_string()),
        }
    }
}

impl AppConfig {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = serde_json::from_str(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        log::debug!("loaded config from {}", path.display());
        Ok(config)
    }
}
