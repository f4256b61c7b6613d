// Stream layer - the operation set every transport implements, and the
// hardware engine that implements it on top of a RawDevice

pub mod engine;
pub mod gapless;

pub use engine::HwStream;
pub use gapless::GaplessState;

use crate::codec::Codec;
use crate::device::{BufferConfig, GaplessMetadata, Task, TaskStatus};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default maximum time a transfer waits in poll()
pub const DEFAULT_MAX_POLL_WAIT: Duration = Duration::from_secs(20);

/// Transport state of a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Closed,
    Opening,
    Ready,
    Running,
    Paused,
    Draining,
}

/// How a blocking transfer treats a poll timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitPolicy {
    /// Timeout ends the transfer with whatever was moved so far
    #[default]
    Lenient,
    /// Timeout on the first wait, before anything moved, is `Error::Timeout`
    Strict,
}

/// Per-handle behaviour chosen at open time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamOptions {
    /// `None` waits until the driver signals
    pub max_poll_wait: Option<Duration>,
    pub nonblocking: bool,
    /// Check codec and fragment bounds against the device caps before committing
    pub validate_caps: bool,
    pub wait_policy: WaitPolicy,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            max_poll_wait: Some(DEFAULT_MAX_POLL_WAIT),
            nonblocking: false,
            validate_caps: false,
            wait_policy: WaitPolicy::Lenient,
        }
    }
}

/// Requested stream configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamConfig {
    pub buffer: BufferConfig,
    pub codec: Codec,
}

impl StreamConfig {
    pub fn new(fragment_size: u32, fragments: u32, codec: Codec) -> Self {
        Self {
            buffer: BufferConfig::new(fragment_size, fragments),
            codec,
        }
    }
}

/// Hardware pointer snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    /// Bytes available for the next write (playback) or read (capture)
    pub avail: u64,
    /// Audio rendered/captured by the DSP so far
    pub tstamp: Duration,
}

/// Convert a frame count to wall time without overflowing on long streams
pub fn frames_to_duration(frames: u64, rate: u32) -> Duration {
    let rate = u64::from(rate);
    let secs = frames / rate;
    let nanos = (frames % rate) * 1_000_000_000 / rate;
    Duration::new(secs, nanos as u32)
}

/// Operations shared by the hardware engine and plugin transports
pub trait CompressOps {
    fn close(&mut self) -> Result<()>;

    fn write(&mut self, buf: &[u8]) -> Result<usize>;
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    fn start(&mut self) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
    fn pause(&mut self) -> Result<()>;
    fn resume(&mut self) -> Result<()>;
    fn drain(&mut self) -> Result<()>;

    fn partial_drain(&mut self) -> Result<()>;
    fn next_track(&mut self) -> Result<()>;
    fn set_gapless_metadata(&mut self, metadata: &GaplessMetadata) -> Result<()>;
    fn set_codec_params(&mut self, codec: &Codec) -> Result<()>;

    fn get_position(&mut self) -> Result<Position>;
    fn get_tstamp(&mut self) -> Result<(u32, u32)>;
    fn get_tstamp64(&mut self) -> Result<(u64, u32)>;

    /// Block until the ring buffer is ready for the next transfer
    fn wait(&mut self, timeout: Option<Duration>) -> Result<()>;
    fn set_nonblock(&mut self, nonblock: bool);
    fn set_max_poll_wait(&mut self, wait: Option<Duration>);

    fn is_running(&self) -> bool;
    fn is_ready(&self) -> bool;
    fn last_error(&self) -> &str;
    fn config(&self) -> BufferConfig;

    fn task_create(&mut self, task: &mut Task) -> Result<()>;
    fn task_start(&mut self, task: &mut Task) -> Result<()>;
    fn task_stop(&mut self, task: &Task) -> Result<()>;
    fn task_free(&mut self, task: &Task) -> Result<()>;
    fn task_status(&mut self, seqno: u64) -> Result<TaskStatus>;
}
