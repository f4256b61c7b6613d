//! Backend selection
//!
//! `hw:<card>,<device>` names go to the device node engine; any other
//! `<plugin>:<data>` name is served by a plugin library (with the `plugin`
//! feature). Both sides implement [`CompressOps`], and [`Compress`] forwards
//! to whichever one was opened.

#[cfg(feature = "plugin")]
pub mod plugin;

#[cfg(feature = "plugin")]
pub use plugin::PluginStream;

use crate::codec::{codec_id_from_str, Codec};
use crate::device::{
    BufferConfig, Capabilities, DeviceName, Direction, GaplessMetadata, NodeDevice, Task,
    TaskStatus,
};
use crate::error::{Error, Result};
use crate::stream::{CompressOps, HwStream, Position, StreamConfig, StreamOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const PLUGIN_DIR_ENV: &str = "COMPRESS_OFFLOAD_PLUGIN_DIR";
pub const DEFAULT_PLUGIN_DIR: &str = "/usr/lib/compress-offload/";

/// Plugin directory: environment override, then config, then the built-in default
pub fn resolve_plugin_dir(configured: Option<&Path>) -> PathBuf {
    if let Some(dir) = std::env::var_os(PLUGIN_DIR_ENV) {
        return PathBuf::from(dir);
    }
    configured
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_PLUGIN_DIR))
}

/// An open compress stream on either backend
#[derive(Debug)]
pub enum Compress {
    Hw(HwStream),
    #[cfg(feature = "plugin")]
    Plugin(PluginStream),
}

macro_rules! dispatch {
    ($self:expr, $stream:ident => $body:expr) => {
        match $self {
            Compress::Hw($stream) => $body,
            #[cfg(feature = "plugin")]
            Compress::Plugin($stream) => $body,
        }
    };
}

impl Compress {
    /// Open a hardware node by card and device number
    pub fn open(
        card: u32,
        device: u32,
        flags: u32,
        config: &StreamConfig,
        options: StreamOptions,
    ) -> Result<Self> {
        HwStream::open(card, device, flags, config, options).map(Compress::Hw)
    }

    /// Open by name, loading plugins from `plugin_dir`
    pub fn open_by_name(
        name: &str,
        flags: u32,
        config: &StreamConfig,
        options: StreamOptions,
        plugin_dir: &Path,
    ) -> Result<Self> {
        match DeviceName::parse(name)? {
            DeviceName::Hw { card, device } => Self::open(card, device, flags, config, options),
            DeviceName::Plugin { plugin, .. } => open_plugin(&plugin, name, flags, config, options, plugin_dir),
        }
    }

    pub fn is_plugin(&self) -> bool {
        !matches!(self, Compress::Hw(_))
    }

    /// The hardware engine, when this is a device node stream
    pub fn as_hw(&mut self) -> Option<&mut HwStream> {
        match self {
            Compress::Hw(stream) => Some(stream),
            #[cfg(feature = "plugin")]
            Compress::Plugin(_) => None,
        }
    }
}

#[cfg(feature = "plugin")]
fn open_plugin(
    plugin: &str,
    name: &str,
    flags: u32,
    config: &StreamConfig,
    options: StreamOptions,
    plugin_dir: &Path,
) -> Result<Compress> {
    Direction::from_flags(flags)?;
    debug!("{}: routing to plugin {}", name, plugin);
    PluginStream::open(plugin_dir, plugin, name, flags, config, options).map(Compress::Plugin)
}

#[cfg(not(feature = "plugin"))]
fn open_plugin(
    plugin: &str,
    name: &str,
    _flags: u32,
    _config: &StreamConfig,
    _options: StreamOptions,
    _plugin_dir: &Path,
) -> Result<Compress> {
    debug!("{}: plugin support not built", name);
    Err(Error::PluginLoad {
        name: plugin.to_string(),
        reason: "built without plugin support".to_string(),
    })
}

/// Open the node, check its codec list, release it
pub fn is_codec_supported(card: u32, device: u32, flags: u32, codec: &Codec) -> Result<bool> {
    let direction = Direction::from_flags(flags)?;
    let mut node = NodeDevice::open(card, device, direction)?;
    let caps = Capabilities::query(&mut node, &format!("hw:{card},{device}"))?;
    Ok(caps.supports_codec(codec.id))
}

/// Name-based variant of [`is_codec_supported`]; plugins answer for themselves
pub fn is_codec_supported_by_name(
    name: &str,
    flags: u32,
    codec: &Codec,
    plugin_dir: &Path,
) -> Result<bool> {
    match DeviceName::parse(name)? {
        DeviceName::Hw { card, device } => is_codec_supported(card, device, flags, codec),
        DeviceName::Plugin { plugin, .. } => plugin_supports(&plugin, name, flags, codec, plugin_dir),
    }
}

#[cfg(feature = "plugin")]
fn plugin_supports(plugin: &str, name: &str, flags: u32, codec: &Codec, dir: &Path) -> Result<bool> {
    Direction::from_flags(flags)?;
    let (_library, ops) = plugin::load(dir, plugin)?;
    Ok(plugin::is_codec_supported(&ops, name, flags, codec))
}

#[cfg(not(feature = "plugin"))]
fn plugin_supports(plugin: &str, _name: &str, _flags: u32, _codec: &Codec, _dir: &Path) -> Result<bool> {
    Err(Error::PluginLoad {
        name: plugin.to_string(),
        reason: "built without plugin support".to_string(),
    })
}

/// Codec id from a name such as "mp3", or a decimal/hex id
pub fn parse_codec(text: &str) -> Result<u32> {
    codec_id_from_str(text).ok_or_else(|| Error::InvalidArgument(format!("unknown codec {text}")))
}

impl CompressOps for Compress {
    fn close(&mut self) -> Result<()> {
        dispatch!(self, s => s.close())
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        dispatch!(self, s => s.write(buf))
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        dispatch!(self, s => s.read(buf))
    }

    fn start(&mut self) -> Result<()> {
        dispatch!(self, s => s.start())
    }

    fn stop(&mut self) -> Result<()> {
        dispatch!(self, s => s.stop())
    }

    fn pause(&mut self) -> Result<()> {
        dispatch!(self, s => s.pause())
    }

    fn resume(&mut self) -> Result<()> {
        dispatch!(self, s => s.resume())
    }

    fn drain(&mut self) -> Result<()> {
        dispatch!(self, s => s.drain())
    }

    fn partial_drain(&mut self) -> Result<()> {
        dispatch!(self, s => s.partial_drain())
    }

    fn next_track(&mut self) -> Result<()> {
        dispatch!(self, s => s.next_track())
    }

    fn set_gapless_metadata(&mut self, metadata: &GaplessMetadata) -> Result<()> {
        dispatch!(self, s => s.set_gapless_metadata(metadata))
    }

    fn set_codec_params(&mut self, codec: &Codec) -> Result<()> {
        dispatch!(self, s => s.set_codec_params(codec))
    }

    fn get_position(&mut self) -> Result<Position> {
        dispatch!(self, s => s.get_position())
    }

    fn get_tstamp(&mut self) -> Result<(u32, u32)> {
        dispatch!(self, s => s.get_tstamp())
    }

    fn get_tstamp64(&mut self) -> Result<(u64, u32)> {
        dispatch!(self, s => s.get_tstamp64())
    }

    fn wait(&mut self, timeout: Option<Duration>) -> Result<()> {
        dispatch!(self, s => s.wait(timeout))
    }

    fn set_nonblock(&mut self, nonblock: bool) {
        dispatch!(self, s => s.set_nonblock(nonblock))
    }

    fn set_max_poll_wait(&mut self, wait: Option<Duration>) {
        dispatch!(self, s => s.set_max_poll_wait(wait))
    }

    fn is_running(&self) -> bool {
        dispatch!(self, s => s.is_running())
    }

    fn is_ready(&self) -> bool {
        dispatch!(self, s => s.is_ready())
    }

    fn last_error(&self) -> &str {
        dispatch!(self, s => s.last_error())
    }

    fn config(&self) -> BufferConfig {
        dispatch!(self, s => s.config())
    }

    fn task_create(&mut self, task: &mut Task) -> Result<()> {
        dispatch!(self, s => s.task_create(task))
    }

    fn task_start(&mut self, task: &mut Task) -> Result<()> {
        dispatch!(self, s => s.task_start(task))
    }

    fn task_stop(&mut self, task: &Task) -> Result<()> {
        dispatch!(self, s => s.task_stop(task))
    }

    fn task_free(&mut self, task: &Task) -> Result<()> {
        dispatch!(self, s => s.task_free(task))
    }

    fn task_status(&mut self, seqno: u64) -> Result<TaskStatus> {
        dispatch!(self, s => s.task_status(seqno))
    }
}
