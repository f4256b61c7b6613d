//! MPEG audio frame header, enough to describe the stream to the DSP

use super::HeaderError;

const SAMPLE_RATES: [[u32; 3]; 3] = [
    [44100, 48000, 32000], // MPEG-1
    [22050, 24000, 16000], // MPEG-2
    [11025, 12000, 8000],  // MPEG-2.5
];

// kbit/s, indexed [version][layer - 1][bitrate index]
const BIT_RATES: [[[u32; 15]; 3]; 3] = [
    [
        [0, 32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448],
        [0, 32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384],
        [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320],
    ],
    [
        [0, 32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256],
        [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160],
        [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160],
    ],
    [
        [0, 32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256],
        [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160],
        [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160],
    ],
];

const CHANNEL_MODE_MONO: u8 = 0x03;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mp3Header {
    pub channels: u32,
    pub sample_rate: u32,
    /// bits per second
    pub bit_rate: u32,
}

/// Decode the first four bytes of an MPEG audio frame
pub fn parse_header(bytes: &[u8; 4]) -> Result<Mp3Header, HeaderError> {
    if bytes[0] != 0xff || bytes[1] & 0xe0 != 0xe0 {
        return Err(HeaderError::NoSync);
    }

    let version = match (bytes[1] >> 3) & 0x03 {
        0 => 2,
        2 => 1,
        3 => 0,
        _ => return Err(HeaderError::Invalid),
    };
    let layer = 4 - usize::from((bytes[1] >> 1) & 0x03);
    let bit_rate_idx = usize::from(bytes[2] >> 4);
    let sample_rate_idx = usize::from((bytes[2] >> 2) & 0x03);
    let channel_mode = (bytes[3] >> 6) & 0x03;

    if sample_rate_idx == 3 || layer == 4 || bit_rate_idx == 15 {
        return Err(HeaderError::Invalid);
    }

    Ok(Mp3Header {
        channels: if channel_mode == CHANNEL_MODE_MONO { 1 } else { 2 },
        sample_rate: SAMPLE_RATES[version][sample_rate_idx],
        bit_rate: BIT_RATES[version][layer - 1][bit_rate_idx] * 1000,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mpeg1_layer3() {
        // 128 kbit/s, 44.1 kHz, joint stereo
        let header = parse_header(&[0xff, 0xfb, 0x90, 0x64]).unwrap();
        assert_eq!(
            header,
            Mp3Header {
                channels: 2,
                sample_rate: 44100,
                bit_rate: 128_000,
            }
        );
    }

    #[test]
    fn test_mpeg2_mono() {
        // MPEG-2 layer 3, 64 kbit/s, 24 kHz, mono
        let header = parse_header(&[0xff, 0xf3, 0x84, 0xc4]).unwrap();
        assert_eq!(header.channels, 1);
        assert_eq!(header.sample_rate, 24000);
        assert_eq!(header.bit_rate, 64_000);
    }

    #[test]
    fn test_rejects_bad_headers() {
        assert_eq!(parse_header(b"ID3\x03"), Err(HeaderError::NoSync));
        // free-format bitrate index 15
        assert_eq!(
            parse_header(&[0xff, 0xfb, 0xf0, 0x00]),
            Err(HeaderError::Invalid)
        );
        // reserved sample rate
        assert_eq!(
            parse_header(&[0xff, 0xfb, 0x9c, 0x00]),
            Err(HeaderError::Invalid)
        );
        // reserved layer
        assert_eq!(
            parse_header(&[0xff, 0xf9, 0x90, 0x00]),
            Err(HeaderError::Invalid)
        );
    }
}
