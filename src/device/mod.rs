// Device layer - addressing, the raw node interface, capability queries
// Everything above this talks to a `RawDevice`, so tests can swap in a scripted one

pub mod abi;
pub mod caps;
pub mod node;

#[cfg(test)]
pub(crate) mod mock;

pub use caps::Capabilities;
pub use node::NodeDevice;

use crate::codec::Codec;
use crate::error::{Error, Result};
use nix::errno::Errno;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Playback: the caller writes compressed data to the device
pub const COMPRESS_OUT: u32 = 0x2000_0000;
/// Capture: the caller reads compressed data from the device
pub const COMPRESS_IN: u32 = 0x1000_0000;
/// Offload task node (memory to memory)
pub const COMPRESS_ACCEL: u32 = 0x4000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Playback,
    Capture,
    Accel,
}

impl Direction {
    /// Exactly one direction flag must be present
    pub fn from_flags(flags: u32) -> Result<Self> {
        let out = flags & COMPRESS_OUT != 0;
        let input = flags & COMPRESS_IN != 0;
        let accel = flags & COMPRESS_ACCEL != 0;

        match (out, input, accel) {
            (true, false, false) => Ok(Direction::Playback),
            (false, true, false) => Ok(Direction::Capture),
            (false, false, true) => Ok(Direction::Accel),
            (false, false, false) => Err(Error::InvalidArgument(
                "can't deduce device direction from given flags".to_string(),
            )),
            _ => Err(Error::InvalidArgument(format!(
                "ambiguous direction flags {flags:#x}"
            ))),
        }
    }

    /// Direction value the kernel reports in `snd_compr_caps`
    pub fn kernel_direction(self) -> u32 {
        match self {
            Direction::Playback => abi::SND_COMPRESS_PLAYBACK,
            Direction::Capture => abi::SND_COMPRESS_CAPTURE,
            Direction::Accel => abi::SND_COMPRESS_ACCEL,
        }
    }
}

/// Device node for a (card, device) pair
pub fn node_path(card: u32, device: u32) -> PathBuf {
    PathBuf::from(format!("/dev/snd/comprC{card}D{device}"))
}

/// A parsed device name
///
/// `hw:<card>,<device>` addresses a hardware node; anything else is
/// `<plugin>:<custom data>` and is routed to a plugin library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceName {
    Hw { card: u32, device: u32 },
    Plugin { plugin: String, data: String },
}

impl DeviceName {
    pub fn parse(name: &str) -> Result<Self> {
        if let Some(rest) = name.strip_prefix("hw:") {
            let parsed = rest.split_once(',').and_then(|(card, device)| {
                Some((card.trim().parse().ok()?, device.trim().parse().ok()?))
            });
            return match parsed {
                Some((card, device)) => Ok(DeviceName::Hw { card, device }),
                None => Err(Error::InvalidArgument(format!("Invalid device name {name}"))),
            };
        }

        let (plugin, data) = name.split_once(':').unwrap_or((name, ""));
        if plugin.is_empty() {
            return Err(Error::InvalidArgument(format!("Invalid device name {name}")));
        }
        Ok(DeviceName::Plugin {
            plugin: plugin.to_string(),
            data: data.to_string(),
        })
    }
}

impl std::fmt::Display for DeviceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceName::Hw { card, device } => write!(f, "hw:{card},{device}"),
            DeviceName::Plugin { plugin, data } => write!(f, "{plugin}:{data}"),
        }
    }
}

/// Requested or committed ring buffer layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Fragment size in bytes, 0 = device default
    pub fragment_size: u32,
    /// Number of fragments, 0 = device default
    pub fragments: u32,
}

impl BufferConfig {
    pub fn new(fragment_size: u32, fragments: u32) -> Self {
        Self {
            fragment_size,
            fragments,
        }
    }

    pub fn is_unset(&self) -> bool {
        self.fragment_size == 0 || self.fragments == 0
    }

    pub fn buffer_bytes(&self) -> usize {
        self.fragment_size as usize * self.fragments as usize
    }
}

/// Encoder delay/padding for gapless playback, in samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GaplessMetadata {
    pub encoder_delay: u32,
    pub encoder_padding: u32,
}

/// Raw hardware timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawTimestamp {
    pub byte_offset: u32,
    pub copied_total: u64,
    pub pcm_frames: u64,
    pub pcm_io_frames: u64,
    pub sampling_rate: u32,
}

impl From<abi::snd_compr_tstamp> for RawTimestamp {
    fn from(t: abi::snd_compr_tstamp) -> Self {
        Self {
            byte_offset: t.byte_offset,
            copied_total: t.copied_total as u64,
            pcm_frames: t.pcm_frames as u64,
            pcm_io_frames: t.pcm_io_frames as u64,
            sampling_rate: t.sampling_rate,
        }
    }
}

impl From<abi::snd_compr_tstamp64> for RawTimestamp {
    fn from(t: abi::snd_compr_tstamp64) -> Self {
        Self {
            byte_offset: t.byte_offset,
            copied_total: t.copied_total,
            pcm_frames: t.pcm_frames,
            pcm_io_frames: t.pcm_io_frames,
            sampling_rate: t.sampling_rate,
        }
    }
}

/// Bytes free (playback) or buffered (capture), plus the timestamp at query time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Availability {
    pub avail: u64,
    pub tstamp: RawTimestamp,
}

/// Transport commands without a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Pause,
    Resume,
    Drain,
    NextTrack,
    PartialDrain,
}

/// Which readiness event a wait should look for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitFor {
    Writable,
    Readable,
    Either,
}

/// Result of one poll on the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Ready,
    TimedOut,
    /// POLLERR reported on the descriptor
    PollError,
}

/// Task submitted to an accel node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Task {
    pub seqno: u64,
    pub origin_seqno: u64,
    pub input_fd: i32,
    pub output_fd: i32,
    pub input_size: u64,
    pub flags: u32,
}

impl From<&Task> for abi::snd_compr_task {
    fn from(task: &Task) -> Self {
        Self {
            seqno: task.seqno,
            origin_seqno: task.origin_seqno,
            input_fd: task.input_fd,
            output_fd: task.output_fd,
            input_size: task.input_size,
            flags: task.flags,
            reserved: [0; 16],
        }
    }
}

impl From<abi::snd_compr_task> for Task {
    fn from(task: abi::snd_compr_task) -> Self {
        Self {
            seqno: task.seqno,
            origin_seqno: task.origin_seqno,
            input_fd: task.input_fd,
            output_fd: task.output_fd,
            input_size: task.input_size,
            flags: task.flags,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Idle,
    Active,
    Finished,
    Unknown(u8),
}

impl From<u8> for TaskState {
    fn from(state: u8) -> Self {
        match state {
            0 => TaskState::Idle,
            1 => TaskState::Active,
            2 => TaskState::Finished,
            other => TaskState::Unknown(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskStatus {
    pub seqno: u64,
    pub input_size: u64,
    pub output_size: u64,
    pub output_flags: u32,
    pub state: TaskState,
}

impl From<abi::snd_compr_task_status> for TaskStatus {
    fn from(status: abi::snd_compr_task_status) -> Self {
        Self {
            seqno: status.seqno,
            input_size: status.input_size,
            output_size: status.output_size,
            output_flags: status.output_flags,
            state: TaskState::from(status.state),
        }
    }
}

/// Raw calls into a compress node
///
/// One method per ioctl or syscall. No policy lives here: the stream engine
/// decides when to call what. Errors are the bare errno of the failed call.
pub trait RawDevice {
    fn protocol_version(&mut self) -> std::result::Result<u32, Errno>;
    fn get_caps(&mut self) -> std::result::Result<abi::snd_compr_caps, Errno>;
    fn set_params(&mut self, buffer: BufferConfig, codec: &Codec) -> std::result::Result<(), Errno>;
    fn set_metadata(&mut self, key: u32, value: u32) -> std::result::Result<(), Errno>;
    fn avail(&mut self) -> std::result::Result<Availability, Errno>;
    fn avail64(&mut self) -> std::result::Result<Availability, Errno>;
    fn tstamp(&mut self) -> std::result::Result<RawTimestamp, Errno>;
    fn tstamp64(&mut self) -> std::result::Result<RawTimestamp, Errno>;
    fn command(&mut self, command: Command) -> std::result::Result<(), Errno>;
    fn write(&mut self, buf: &[u8]) -> std::result::Result<usize, Errno>;
    fn read(&mut self, buf: &mut [u8]) -> std::result::Result<usize, Errno>;
    /// `timeout` of `None` blocks until the driver signals
    fn wait(&mut self, what: WaitFor, timeout: Option<Duration>)
        -> std::result::Result<WaitOutcome, Errno>;
    fn task_create(&mut self, task: &mut Task) -> std::result::Result<(), Errno>;
    fn task_start(&mut self, task: &mut Task) -> std::result::Result<(), Errno>;
    fn task_stop(&mut self, seqno: u64) -> std::result::Result<(), Errno>;
    fn task_free(&mut self, seqno: u64) -> std::result::Result<(), Errno>;
    fn task_status(&mut self, seqno: u64) -> std::result::Result<TaskStatus, Errno>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_from_flags() {
        assert_eq!(Direction::from_flags(COMPRESS_OUT).unwrap(), Direction::Playback);
        assert_eq!(Direction::from_flags(COMPRESS_IN).unwrap(), Direction::Capture);
        assert_eq!(Direction::from_flags(COMPRESS_ACCEL).unwrap(), Direction::Accel);

        assert!(matches!(
            Direction::from_flags(0),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            Direction::from_flags(COMPRESS_OUT | COMPRESS_IN),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_node_path() {
        assert_eq!(node_path(1, 2), PathBuf::from("/dev/snd/comprC1D2"));
    }

    #[test]
    fn test_device_name_parsing() {
        assert_eq!(
            DeviceName::parse("hw:0,3").unwrap(),
            DeviceName::Hw { card: 0, device: 3 }
        );
        assert_eq!(
            DeviceName::parse("dsp:stream=4").unwrap(),
            DeviceName::Plugin {
                plugin: "dsp".to_string(),
                data: "stream=4".to_string()
            }
        );
        assert_eq!(
            DeviceName::parse("virt").unwrap(),
            DeviceName::Plugin {
                plugin: "virt".to_string(),
                data: String::new()
            }
        );
        assert!(DeviceName::parse("hw:1").is_err());
        assert!(DeviceName::parse("hw:a,b").is_err());
        assert!(DeviceName::parse(":x").is_err());
    }

    #[test]
    fn test_device_name_display() {
        let name = DeviceName::Hw { card: 2, device: 5 };
        assert_eq!(name.to_string(), "hw:2,5");
    }

    #[test]
    fn test_task_state() {
        assert_eq!(TaskState::from(2), TaskState::Finished);
        assert_eq!(TaskState::from(9), TaskState::Unknown(9));
    }
}
