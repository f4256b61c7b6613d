//! Kernel ABI for the compress offload character device
//!
//! Layouts follow `include/uapi/sound/compress_offload.h`. The kernel marks
//! every structure `packed, aligned(4)`, which is `repr(C, packed(4))` here.
//! Fields of packed structs must be copied out before borrowing them.

#![allow(non_camel_case_types)]

use crate::codec::Codec;

pub const MAX_NUM_CODECS: usize = 32;

pub const fn protocol_version(major: u32, minor: u32, sub: u32) -> u32 {
    (major << 16) | (minor << 8) | sub
}

/// Split a protocol version back into (major, minor, sub)
pub const fn protocol_parts(version: u32) -> (u32, u32, u32) {
    ((version >> 16) & 0xffff, (version >> 8) & 0xff, version & 0xff)
}

/// First protocol with SET_METADATA / NEXT_TRACK / PARTIAL_DRAIN
pub const PROTOCOL_GAPLESS: u32 = protocol_version(0, 1, 1);
/// First protocol with the 64-bit AVAIL/TSTAMP ioctls
pub const PROTOCOL_AVAIL64: u32 = protocol_version(0, 4, 0);

pub const SNDRV_COMPRESS_ENCODER_PADDING: u32 = 1;
pub const SNDRV_COMPRESS_ENCODER_DELAY: u32 = 2;

pub const SND_COMPRESS_PLAYBACK: u32 = 0;
pub const SND_COMPRESS_CAPTURE: u32 = 1;
pub const SND_COMPRESS_ACCEL: u32 = 2;

pub const SND_COMPRESS_TFLG_NEW_STREAM: u32 = 1 << 0;

#[repr(C, packed(4))]
#[derive(Debug, Clone, Copy, Default)]
pub struct snd_compressed_buffer {
    pub fragment_size: u32,
    pub fragments: u32,
}

#[repr(C, packed(4))]
#[derive(Debug, Clone, Copy, Default)]
pub struct snd_codec {
    pub id: u32,
    pub ch_in: u32,
    pub ch_out: u32,
    pub sample_rate: u32,
    pub bit_rate: u32,
    pub rate_control: u32,
    pub profile: u32,
    pub level: u32,
    pub ch_mode: u32,
    pub format: u32,
    pub align: u32,
    pub options: [u32; 16],
    pub pcm_format: u32,
    pub reserved: [u32; 2],
}

impl From<&Codec> for snd_codec {
    fn from(codec: &Codec) -> Self {
        Self {
            id: codec.id,
            ch_in: codec.ch_in,
            ch_out: codec.ch_out,
            sample_rate: codec.sample_rate,
            bit_rate: codec.bit_rate,
            rate_control: codec.rate_control,
            profile: codec.profile,
            level: codec.level,
            ch_mode: codec.ch_mode,
            format: codec.format,
            align: codec.align,
            options: codec.options,
            pcm_format: codec.pcm_format,
            reserved: [0; 2],
        }
    }
}

#[repr(C, packed(4))]
#[derive(Debug, Clone, Copy, Default)]
pub struct snd_compr_params {
    pub buffer: snd_compressed_buffer,
    pub codec: snd_codec,
    pub no_wake_mode: u8,
}

#[repr(C, packed(4))]
#[derive(Debug, Clone, Copy, Default)]
pub struct snd_compr_tstamp {
    pub byte_offset: u32,
    pub copied_total: u32,
    pub pcm_frames: u32,
    pub pcm_io_frames: u32,
    pub sampling_rate: u32,
}

#[repr(C, packed(4))]
#[derive(Debug, Clone, Copy, Default)]
pub struct snd_compr_avail {
    pub avail: u64,
    pub tstamp: snd_compr_tstamp,
}

#[repr(C, packed(4))]
#[derive(Debug, Clone, Copy, Default)]
pub struct snd_compr_tstamp64 {
    pub byte_offset: u32,
    pub copied_total: u64,
    pub pcm_frames: u64,
    pub pcm_io_frames: u64,
    pub sampling_rate: u32,
}

#[repr(C, packed(4))]
#[derive(Debug, Clone, Copy, Default)]
pub struct snd_compr_avail64 {
    pub avail: u64,
    pub tstamp: snd_compr_tstamp64,
}

#[repr(C, packed(4))]
#[derive(Debug, Clone, Copy, Default)]
pub struct snd_compr_caps {
    pub num_codecs: u32,
    pub direction: u32,
    pub min_fragment_size: u32,
    pub max_fragment_size: u32,
    pub min_fragments: u32,
    pub max_fragments: u32,
    pub codecs: [u32; MAX_NUM_CODECS],
    pub reserved: [u32; 11],
}

#[repr(C, packed(4))]
#[derive(Debug, Clone, Copy, Default)]
pub struct snd_compr_metadata {
    pub key: u32,
    pub value: [u32; 8],
}

#[repr(C, packed(4))]
#[derive(Debug, Clone, Copy, Default)]
pub struct snd_compr_task {
    pub seqno: u64,
    pub origin_seqno: u64,
    pub input_fd: i32,
    pub output_fd: i32,
    pub input_size: u64,
    pub flags: u32,
    pub reserved: [u8; 16],
}

#[repr(C, packed(4))]
#[derive(Debug, Clone, Copy, Default)]
pub struct snd_compr_task_status {
    pub seqno: u64,
    pub input_size: u64,
    pub output_size: u64,
    pub output_flags: u32,
    pub state: u8,
    pub reserved: [u8; 15],
}

const COMPRESS_MAGIC: u8 = b'C';

nix::ioctl_read!(compr_ioctl_version, COMPRESS_MAGIC, 0x00, libc::c_int);
nix::ioctl_readwrite!(compr_get_caps, COMPRESS_MAGIC, 0x10, snd_compr_caps);
nix::ioctl_write_ptr!(compr_set_params, COMPRESS_MAGIC, 0x12, snd_compr_params);
nix::ioctl_write_ptr!(compr_set_metadata, COMPRESS_MAGIC, 0x14, snd_compr_metadata);
nix::ioctl_read!(compr_tstamp, COMPRESS_MAGIC, 0x20, snd_compr_tstamp);
nix::ioctl_read!(compr_avail, COMPRESS_MAGIC, 0x21, snd_compr_avail);
nix::ioctl_read!(compr_tstamp64, COMPRESS_MAGIC, 0x22, snd_compr_tstamp64);
nix::ioctl_read!(compr_avail64, COMPRESS_MAGIC, 0x23, snd_compr_avail64);
nix::ioctl_none!(compr_pause, COMPRESS_MAGIC, 0x30);
nix::ioctl_none!(compr_resume, COMPRESS_MAGIC, 0x31);
nix::ioctl_none!(compr_start, COMPRESS_MAGIC, 0x32);
nix::ioctl_none!(compr_stop, COMPRESS_MAGIC, 0x33);
nix::ioctl_none!(compr_drain, COMPRESS_MAGIC, 0x34);
nix::ioctl_none!(compr_next_track, COMPRESS_MAGIC, 0x35);
nix::ioctl_none!(compr_partial_drain, COMPRESS_MAGIC, 0x36);
nix::ioctl_readwrite!(compr_task_create, COMPRESS_MAGIC, 0x60, snd_compr_task);
nix::ioctl_write_ptr!(compr_task_free, COMPRESS_MAGIC, 0x61, u64);
nix::ioctl_readwrite!(compr_task_start, COMPRESS_MAGIC, 0x62, snd_compr_task);
nix::ioctl_write_ptr!(compr_task_stop, COMPRESS_MAGIC, 0x63, u64);
nix::ioctl_readwrite!(compr_task_status, COMPRESS_MAGIC, 0x68, snd_compr_task_status);
