//! RIFF/WAVE headers: the canonical 44-byte form we write, and a reader
//! that walks the chunks of whatever a file carries

use super::HeaderError;

pub const WAVE_HEADER_SIZE: usize = 44;

const FORMAT_PCM: u16 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaveHeader {
    pub channels: u16,
    pub rate: u32,
    pub sample_bits: u16,
    pub data_size: u32,
}

impl WaveHeader {
    pub fn new(channels: u16, rate: u32, sample_bits: u16) -> Self {
        Self {
            channels,
            rate,
            sample_bits,
            data_size: 0,
        }
    }

    pub fn set_data_size(&mut self, size: u32) {
        self.data_size = size;
    }

    /// Bytes per frame, saturating for channel counts no real file has
    pub fn block_align(&self) -> u16 {
        self.channels.saturating_mul(self.sample_bits / 8)
    }

    pub fn byte_rate(&self) -> u32 {
        let frame = u32::from(self.channels) * u32::from(self.sample_bits / 8);
        self.rate.saturating_mul(frame)
    }

    /// Parse the start of a WAVE file
    ///
    /// Returns the header and the offset where sample data begins. Chunks
    /// other than `fmt ` and `data` are skipped; only integer PCM is accepted.
    pub fn parse(bytes: &[u8]) -> Result<(Self, usize), HeaderError> {
        if bytes.len() < 12 {
            return Err(HeaderError::Truncated);
        }
        if &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
            return Err(HeaderError::NoSync);
        }

        let mut format: Option<Self> = None;
        let mut pos = 12usize;
        loop {
            let chunk = bytes.get(pos..pos + 8).ok_or(HeaderError::Truncated)?;
            let id = &chunk[0..4];
            let size = u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);
            let body = pos + 8;

            match id {
                b"fmt " => {
                    if size < 16 {
                        return Err(HeaderError::Invalid);
                    }
                    let fmt = bytes.get(body..body + 16).ok_or(HeaderError::Truncated)?;
                    let le16 = |at: usize| u16::from_le_bytes([fmt[at], fmt[at + 1]]);
                    let tag = le16(0);
                    let channels = le16(2);
                    let rate = u32::from_le_bytes([fmt[4], fmt[5], fmt[6], fmt[7]]);
                    let sample_bits = le16(14);

                    if tag != FORMAT_PCM || channels == 0 || rate == 0 {
                        return Err(HeaderError::Invalid);
                    }
                    if sample_bits == 0 || sample_bits % 8 != 0 {
                        return Err(HeaderError::Invalid);
                    }
                    format = Some(Self::new(channels, rate, sample_bits));
                }
                b"data" => {
                    let mut header = format.ok_or(HeaderError::Invalid)?;
                    header.set_data_size(size);
                    return Ok((header, body));
                }
                _ => {}
            }

            // chunks are padded to an even length
            let skip = usize::try_from(size).map_err(|_| HeaderError::Invalid)?;
            pos = body
                .checked_add(skip)
                .and_then(|end| end.checked_add(skip & 1))
                .ok_or(HeaderError::Invalid)?;
        }
    }

    pub fn to_bytes(&self) -> [u8; WAVE_HEADER_SIZE] {
        let mut out = [0u8; WAVE_HEADER_SIZE];
        let riff_size = (WAVE_HEADER_SIZE as u32 - 8).saturating_add(self.data_size);

        out[0..4].copy_from_slice(b"RIFF");
        out[4..8].copy_from_slice(&riff_size.to_le_bytes());
        out[8..12].copy_from_slice(b"WAVE");

        out[12..16].copy_from_slice(b"fmt ");
        out[16..20].copy_from_slice(&16u32.to_le_bytes());
        out[20..22].copy_from_slice(&FORMAT_PCM.to_le_bytes());
        out[22..24].copy_from_slice(&self.channels.to_le_bytes());
        out[24..28].copy_from_slice(&self.rate.to_le_bytes());
        out[28..32].copy_from_slice(&self.byte_rate().to_le_bytes());
        out[32..34].copy_from_slice(&self.block_align().to_le_bytes());
        out[34..36].copy_from_slice(&self.sample_bits.to_le_bytes());

        out[36..40].copy_from_slice(b"data");
        out[40..44].copy_from_slice(&self.data_size.to_le_bytes());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let mut header = WaveHeader::new(2, 48000, 16);
        header.set_data_size(1000);
        let bytes = header.to_bytes();

        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()), 36 + 1000);
        assert_eq!(&bytes[8..16], b"WAVEfmt ");
        assert_eq!(u16::from_le_bytes([bytes[20], bytes[21]]), 1);
        assert_eq!(u16::from_le_bytes([bytes[22], bytes[23]]), 2);
        assert_eq!(u32::from_le_bytes(bytes[24..28].try_into().unwrap()), 48000);
        assert_eq!(u32::from_le_bytes(bytes[28..32].try_into().unwrap()), 192_000);
        assert_eq!(u16::from_le_bytes([bytes[32], bytes[33]]), 4);
        assert_eq!(u16::from_le_bytes([bytes[34], bytes[35]]), 16);
        assert_eq!(&bytes[36..40], b"data");
        assert_eq!(u32::from_le_bytes(bytes[40..44].try_into().unwrap()), 1000);
    }

    #[test]
    fn test_huge_channel_count_saturates() {
        let header = WaveHeader::new(u16::MAX, 192_000, 32);
        assert_eq!(header.block_align(), u16::MAX);
        assert_eq!(header.byte_rate(), u32::MAX);
        // still serialises
        assert_eq!(header.to_bytes().len(), WAVE_HEADER_SIZE);
    }

    #[test]
    fn test_parse_what_we_write() {
        let mut written = WaveHeader::new(2, 44100, 16);
        written.set_data_size(4410);
        let (parsed, offset) = WaveHeader::parse(&written.to_bytes()).unwrap();
        assert_eq!(parsed, written);
        assert_eq!(offset, WAVE_HEADER_SIZE);
    }

    #[test]
    fn test_parse_skips_extra_chunks() {
        let header = WaveHeader::new(1, 8000, 8).to_bytes();
        let mut bytes = header[..36].to_vec();
        // odd sized LIST chunk plus its pad byte
        bytes.extend_from_slice(b"LIST");
        bytes.extend_from_slice(&3u32.to_le_bytes());
        bytes.extend_from_slice(b"abc\0");
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&100u32.to_le_bytes());

        let (parsed, offset) = WaveHeader::parse(&bytes).unwrap();
        assert_eq!(parsed.channels, 1);
        assert_eq!(parsed.rate, 8000);
        assert_eq!(parsed.data_size, 100);
        assert_eq!(offset, bytes.len());
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert_eq!(WaveHeader::parse(b"RIFF"), Err(HeaderError::Truncated));
        assert_eq!(
            WaveHeader::parse(b"RIFX\0\0\0\0WAVEfmt "),
            Err(HeaderError::NoSync)
        );

        let bytes = WaveHeader::new(2, 48000, 16).to_bytes();
        assert_eq!(WaveHeader::parse(&bytes[..40]), Err(HeaderError::Truncated));

        let mut float = bytes;
        float[20] = 3;
        assert_eq!(WaveHeader::parse(&float), Err(HeaderError::Invalid));

        // data before fmt
        let mut data_first = b"RIFF\0\0\0\0WAVE".to_vec();
        data_first.extend_from_slice(b"data\0\0\0\0");
        assert_eq!(WaveHeader::parse(&data_first), Err(HeaderError::Invalid));
    }

    #[test]
    fn test_mono_32_bit_rates() {
        let header = WaveHeader::new(1, 44100, 32);
        assert_eq!(header.block_align(), 4);
        assert_eq!(header.byte_rate(), 176_400);
    }
}
