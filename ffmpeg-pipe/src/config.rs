use serde::{Deserialize, Serialize};

use crate::packet::DEFAULT_PACKET_CAPACITY;

/// Bytes requested from the read callback per decode iteration.
pub const DEFAULT_READ_CHUNK_SIZE: usize = 4096;

/// What a worker does when the codec engine reports an error mid-stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Log and count the failure, then carry on with the next frame or chunk.
    #[default]
    Continue,
    /// Stop the worker, drop pending input and report the error through the
    /// close callback.
    Abort,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum frames waiting in the encode queue. `None` = unbounded.
    pub queue_capacity: Option<usize>,
    pub error_policy: ErrorPolicy,
    pub read_chunk_size: usize,
    /// Initial size of the encode worker's reusable packet buffer.
    pub packet_capacity: usize,
    pub thread_name: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: None,
            error_policy: ErrorPolicy::default(),
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            packet_capacity: DEFAULT_PACKET_CAPACITY,
            thread_name: "ffmpeg-pipe".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    pub fn with_read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size.max(1);
        self
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}
