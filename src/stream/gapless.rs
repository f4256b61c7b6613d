//! Gapless track transition state
//!
//! The order is metadata → next track → (codec params) → partial drain.
//! Metadata for the track after next may be set while a track is armed,
//! so the armed state remembers whether that has happened.

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GaplessState {
    #[default]
    Idle,
    /// Encoder delay/padding sent, next track not yet signalled
    MetadataSet,
    /// Next track signalled, partial drain still pending
    TrackArmed { metadata_set: bool },
}

impl GaplessState {
    pub fn metadata_set(self) -> bool {
        matches!(
            self,
            GaplessState::MetadataSet | GaplessState::TrackArmed { metadata_set: true }
        )
    }

    pub fn track_armed(self) -> bool {
        matches!(self, GaplessState::TrackArmed { .. })
    }

    /// State after a successful metadata write
    pub fn on_metadata(self) -> Self {
        match self {
            GaplessState::Idle | GaplessState::MetadataSet => GaplessState::MetadataSet,
            GaplessState::TrackArmed { .. } => GaplessState::TrackArmed { metadata_set: true },
        }
    }

    /// Validate a next-track request; the returned state applies once the device accepts it
    pub fn next_track(self) -> Result<Self> {
        if !self.metadata_set() {
            return Err(Error::PermissionDenied("metadata not set".to_string()));
        }
        Ok(GaplessState::TrackArmed {
            metadata_set: false,
        })
    }

    /// Codec parameters may only change between next-track and partial drain
    pub fn check_codec_change(self) -> Result<()> {
        if !self.track_armed() {
            return Err(Error::PermissionDenied(
                "set CODEC params while next track not signalled is not allowed".to_string(),
            ));
        }
        Ok(())
    }

    /// Validate a partial drain; the returned state applies once the drain completes
    pub fn partial_drain(self) -> Result<Self> {
        match self {
            GaplessState::TrackArmed { metadata_set } => Ok(if metadata_set {
                GaplessState::MetadataSet
            } else {
                GaplessState::Idle
            }),
            _ => Err(Error::PermissionDenied(
                "next track not signalled".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_transition_cycle() {
        let state = GaplessState::Idle.on_metadata();
        assert_eq!(state, GaplessState::MetadataSet);

        let state = state.next_track().unwrap();
        assert_eq!(state, GaplessState::TrackArmed { metadata_set: false });
        assert!(state.check_codec_change().is_ok());

        let state = state.partial_drain().unwrap();
        assert_eq!(state, GaplessState::Idle);
    }

    #[test]
    fn test_metadata_for_following_track_survives_drain() {
        let state = GaplessState::Idle
            .on_metadata()
            .next_track()
            .unwrap()
            .on_metadata();
        assert_eq!(state, GaplessState::TrackArmed { metadata_set: true });

        let state = state.partial_drain().unwrap();
        assert_eq!(state, GaplessState::MetadataSet);
        assert!(state.next_track().is_ok());
    }

    #[test]
    fn test_out_of_order_calls_are_denied() {
        assert!(matches!(
            GaplessState::Idle.next_track(),
            Err(Error::PermissionDenied(_))
        ));
        assert!(matches!(
            GaplessState::Idle.partial_drain(),
            Err(Error::PermissionDenied(_))
        ));
        assert!(matches!(
            GaplessState::MetadataSet.partial_drain(),
            Err(Error::PermissionDenied(_))
        ));
        assert!(GaplessState::MetadataSet.check_codec_change().is_err());
    }

    #[test]
    fn test_next_track_consumes_metadata() {
        let armed = GaplessState::MetadataSet.next_track().unwrap();
        assert!(!armed.metadata_set());
        assert!(armed.next_track().is_err());
    }
}
