//! Device capability snapshot and the open-time config policy built on it

use super::abi::{snd_compr_caps, MAX_NUM_CODECS};
use super::{BufferConfig, Direction, RawDevice};
use crate::codec::Codec;
use crate::error::{Error, Result};
use tracing::debug;

/// Capability limits reported by the device
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub codecs: Vec<u32>,
    pub direction: u32,
    pub min_fragment_size: u32,
    pub max_fragment_size: u32,
    pub min_fragments: u32,
    pub max_fragments: u32,
}

impl From<snd_compr_caps> for Capabilities {
    fn from(caps: snd_compr_caps) -> Self {
        let count = (caps.num_codecs as usize).min(MAX_NUM_CODECS);
        let codecs = caps.codecs;
        Self {
            codecs: codecs[..count].to_vec(),
            direction: caps.direction,
            min_fragment_size: caps.min_fragment_size,
            max_fragment_size: caps.max_fragment_size,
            min_fragments: caps.min_fragments,
            max_fragments: caps.max_fragments,
        }
    }
}

impl Capabilities {
    /// Read the capability snapshot from an open device
    ///
    /// `name` only labels the error when the device refuses the query.
    pub fn query<D: RawDevice + ?Sized>(device: &mut D, name: &str) -> Result<Self> {
        let caps = device.get_caps().map_err(|errno| Error::NoDevice {
            path: name.to_string(),
            errno,
        })?;
        let caps = Self::from(caps);
        debug!(
            "device caps: {} codecs, fragment size {}..={}, fragments {}..={}",
            caps.codecs.len(),
            caps.min_fragment_size,
            caps.max_fragment_size,
            caps.min_fragments,
            caps.max_fragments
        );
        Ok(caps)
    }

    pub fn supports_codec(&self, id: u32) -> bool {
        self.codecs.contains(&id)
    }

    /// Fill a "don't care" request with device defaults
    ///
    /// Smallest fragment, most fragments: low latency without starving the DSP.
    /// A zero in either field replaces both.
    pub fn fill_defaults(&self, requested: BufferConfig) -> BufferConfig {
        if requested.is_unset() {
            BufferConfig::new(self.min_fragment_size, self.max_fragments)
        } else {
            requested
        }
    }

    /// Check an explicit request against the reported limits
    pub fn validate(&self, buffer: BufferConfig, codec: &Codec, direction: Direction) -> Result<()> {
        if self.direction != direction.kernel_direction() {
            return Err(Error::InvalidArgument(format!(
                "device streams in direction {}, opened for {:?}",
                self.direction, direction
            )));
        }
        if !self.supports_codec(codec.id) {
            return Err(Error::UnsupportedCodec(codec.id));
        }

        check_range(
            "fragment size",
            buffer.fragment_size,
            self.min_fragment_size,
            self.max_fragment_size,
        )?;
        check_range(
            "fragments",
            buffer.fragments,
            self.min_fragments,
            self.max_fragments,
        )?;

        Ok(())
    }
}

fn check_range(what: &'static str, requested: u32, min: u32, max: u32) -> Result<()> {
    if requested < min || requested > max {
        return Err(Error::OutOfRange {
            what,
            requested,
            min,
            max,
        });
    }
    Ok(())
}
