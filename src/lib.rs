// compress-offload - userspace side of the ALSA compressed audio offload API
// Device access, stream engine and transports, plus what the tools need around them

pub mod backend;   // hw vs plugin transport selection
pub mod codec;     // codec ids and parameters
pub mod config;    // settings file
pub mod device;    // kernel ABI, device node, capabilities
pub mod error;
pub mod formats;   // mp3/wave helpers for the tools
pub mod logging;
pub mod stream;    // lifecycle, flow-controlled I/O, gapless

// Export the stuff callers actually use
pub use backend::{
    is_codec_supported, is_codec_supported_by_name, resolve_plugin_dir, Compress,
    DEFAULT_PLUGIN_DIR, PLUGIN_DIR_ENV,
};
pub use codec::{Codec, PcmFormat};
pub use config::Config;
pub use device::{
    BufferConfig, Capabilities, DeviceName, Direction, GaplessMetadata, Task, TaskStatus,
    COMPRESS_ACCEL, COMPRESS_IN, COMPRESS_OUT,
};
pub use error::{Error, Result};
pub use stream::{
    CompressOps, HwStream, Position, StreamConfig, StreamOptions, StreamState, WaitPolicy,
};
