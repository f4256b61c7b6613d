// Codec identifiers and the codec description handed to the device

use serde::{Deserialize, Serialize};

pub const SND_AUDIOCODEC_PCM: u32 = 0x01;
pub const SND_AUDIOCODEC_MP3: u32 = 0x02;
pub const SND_AUDIOCODEC_AMR: u32 = 0x03;
pub const SND_AUDIOCODEC_AMRWB: u32 = 0x04;
pub const SND_AUDIOCODEC_AMRWBPLUS: u32 = 0x05;
pub const SND_AUDIOCODEC_AAC: u32 = 0x06;
pub const SND_AUDIOCODEC_WMA: u32 = 0x07;
pub const SND_AUDIOCODEC_REAL: u32 = 0x08;
pub const SND_AUDIOCODEC_VORBIS: u32 = 0x09;
pub const SND_AUDIOCODEC_FLAC: u32 = 0x0A;
pub const SND_AUDIOCODEC_IEC61937: u32 = 0x0B;
pub const SND_AUDIOCODEC_G723_1: u32 = 0x0C;
pub const SND_AUDIOCODEC_G729: u32 = 0x0D;
pub const SND_AUDIOCODEC_BESPOKE: u32 = 0x0E;
pub const SND_AUDIOCODEC_ALAC: u32 = 0x0F;
pub const SND_AUDIOCODEC_APE: u32 = 0x10;

pub const SND_AUDIOPROFILE_IEC61937_SPDIF: u32 = 0x1;

/// Linear PCM sample layouts, valued as ALSA `SNDRV_PCM_FORMAT_*`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcmFormat {
    U8,
    S16Le,
    /// 24 bits in a 32-bit container
    S24Le,
    /// 24 bits packed in 3 bytes
    S24Packed,
    S32Le,
}

impl PcmFormat {
    pub const ALL: [PcmFormat; 5] = [
        PcmFormat::U8,
        PcmFormat::S16Le,
        PcmFormat::S24Le,
        PcmFormat::S24Packed,
        PcmFormat::S32Le,
    ];

    pub fn value(self) -> u32 {
        match self {
            PcmFormat::U8 => 1,
            PcmFormat::S16Le => 2,
            PcmFormat::S24Le => 6,
            PcmFormat::S32Le => 10,
            PcmFormat::S24Packed => 32,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PcmFormat::U8 => "U8",
            PcmFormat::S16Le => "S16_LE",
            PcmFormat::S24Le => "S24_LE",
            PcmFormat::S24Packed => "S24_3LE",
            PcmFormat::S32Le => "S32_LE",
        }
    }

    /// Bits each sample occupies in memory
    pub fn physical_bits(self) -> u16 {
        match self {
            PcmFormat::U8 => 8,
            PcmFormat::S16Le => 16,
            PcmFormat::S24Packed => 24,
            PcmFormat::S24Le | PcmFormat::S32Le => 32,
        }
    }

    /// Layout of WAVE samples stored `bits` wide
    pub fn from_wave_bits(bits: u16) -> Option<Self> {
        match bits {
            8 => Some(PcmFormat::U8),
            16 => Some(PcmFormat::S16Le),
            24 => Some(PcmFormat::S24Packed),
            32 => Some(PcmFormat::S32Le),
            _ => None,
        }
    }
}

impl std::str::FromStr for PcmFormat {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PcmFormat::ALL
            .into_iter()
            .find(|format| format.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| crate::error::Error::InvalidArgument(format!("unknown PCM format {s}")))
    }
}

/// Name table used by the command line tools
pub const CODEC_NAMES: &[(&str, u32)] = &[
    ("PCM", SND_AUDIOCODEC_PCM),
    ("MP3", SND_AUDIOCODEC_MP3),
    ("AMR", SND_AUDIOCODEC_AMR),
    ("AMRWB", SND_AUDIOCODEC_AMRWB),
    ("AMRWBPLUS", SND_AUDIOCODEC_AMRWBPLUS),
    ("AAC", SND_AUDIOCODEC_AAC),
    ("WMA", SND_AUDIOCODEC_WMA),
    ("REAL", SND_AUDIOCODEC_REAL),
    ("VORBIS", SND_AUDIOCODEC_VORBIS),
    ("FLAC", SND_AUDIOCODEC_FLAC),
    ("IEC61937", SND_AUDIOCODEC_IEC61937),
    ("G723_1", SND_AUDIOCODEC_G723_1),
    ("G729", SND_AUDIOCODEC_G729),
    ("BESPOKE", SND_AUDIOCODEC_BESPOKE),
    ("ALAC", SND_AUDIOCODEC_ALAC),
    ("APE", SND_AUDIOCODEC_APE),
];

/// Look up a codec id by name ("MP3") or by number ("2", "0x0b")
pub fn codec_id_from_str(s: &str) -> Option<u32> {
    if let Some((_, id)) = CODEC_NAMES
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(s))
    {
        return Some(*id);
    }

    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        return u32::from_str_radix(hex, 16).ok();
    }
    s.parse().ok()
}

pub fn codec_name(id: u32) -> Option<&'static str> {
    CODEC_NAMES
        .iter()
        .find(|(_, codec)| *codec == id)
        .map(|(name, _)| *name)
}

/// Codec parameters for a stream, mirrors the kernel `snd_codec`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Codec {
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
    /// Codec specific option union, kept opaque
    pub options: [u32; 16],
    pub pcm_format: u32,
}

impl Codec {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn with_channels(mut self, channels: u32) -> Self {
        self.ch_in = channels;
        self.ch_out = channels;
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_bit_rate(mut self, bit_rate: u32) -> Self {
        self.bit_rate = bit_rate;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_lookup() {
        assert_eq!(codec_id_from_str("MP3"), Some(SND_AUDIOCODEC_MP3));
        assert_eq!(codec_id_from_str("iec61937"), Some(SND_AUDIOCODEC_IEC61937));
        assert_eq!(codec_id_from_str("0x0a"), Some(SND_AUDIOCODEC_FLAC));
        assert_eq!(codec_id_from_str("6"), Some(SND_AUDIOCODEC_AAC));
        assert_eq!(codec_id_from_str("OPUS"), None);
    }

    #[test]
    fn test_codec_name() {
        assert_eq!(codec_name(SND_AUDIOCODEC_PCM), Some("PCM"));
        assert_eq!(codec_name(0x99), None);
    }

    #[test]
    fn test_pcm_formats() {
        assert_eq!("s24_le".parse::<PcmFormat>().unwrap(), PcmFormat::S24Le);
        assert_eq!("S24_3LE".parse::<PcmFormat>().unwrap().value(), 32);
        assert!("S20_LE".parse::<PcmFormat>().is_err());

        assert_eq!(PcmFormat::S24Le.physical_bits(), 32);
        assert_eq!(PcmFormat::from_wave_bits(24), Some(PcmFormat::S24Packed));
        assert_eq!(PcmFormat::from_wave_bits(12), None);
    }

    #[test]
    fn test_builder() {
        let codec = Codec::new(SND_AUDIOCODEC_MP3)
            .with_channels(2)
            .with_sample_rate(44100)
            .with_bit_rate(128_000);
        assert_eq!(codec.ch_in, 2);
        assert_eq!(codec.ch_out, 2);
        assert_eq!(codec.sample_rate, 44100);
        assert_eq!(codec.bit_rate, 128_000);
    }
}
