//! Error types for compress stream operations

use nix::errno::Errno;
use thiserror::Error;

/// Longest error text kept on a handle, in bytes
pub const ERROR_TEXT_MAX: usize = 128;

/// Errors that can occur while driving a compress stream
#[derive(Error, Debug)]
pub enum Error {
    /// Bad direction flags, bad device name, wrong direction for the call
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation attempted in a state that doesn't allow it
    #[error("device not ready: {0}")]
    NotReady(String),

    /// The device node could not be opened or queried
    #[error("cannot open device '{path}': {errno}")]
    NoDevice { path: String, errno: Errno },

    /// Requested codec is not in the device capability list
    #[error("codec {0} is not supported by the device")]
    UnsupportedCodec(u32),

    /// Requested fragment configuration outside the device limits
    #[error("requested {what} {requested} is outside supported range {min}..={max}")]
    OutOfRange {
        what: &'static str,
        requested: u32,
        min: u32,
        max: u32,
    },

    /// ioctl/read/write/poll hard failure
    #[error("{context}: {errno}")]
    Io { context: String, errno: Errno },

    /// Poll expired while the strict wait policy was active
    #[error("poll timed out")]
    Timeout,

    /// Gapless call made out of order
    #[error("operation not permitted: {0}")]
    PermissionDenied(String),

    /// Plugin library exported an ops table with the wrong magic
    #[error("plugin '{name}' is incompatible: magic {found:#010x}, expected {expected:#010x}")]
    IncompatiblePlugin {
        name: String,
        found: u32,
        expected: u32,
    },

    /// Plugin library could not be loaded or resolved
    #[error("cannot load plugin '{name}': {reason}")]
    PluginLoad { name: String, reason: String },

    /// Device reported a zero sample rate, usually during teardown
    #[error("sample rate unknown")]
    NoTimestampData,

    /// The kernel protocol version lacks the requested call
    #[error("not supported by kernel protocol {major}.{minor}.{sub}: {what}")]
    Unsupported {
        what: &'static str,
        major: u32,
        minor: u32,
        sub: u32,
    },
}

impl Error {
    pub fn io(context: impl Into<String>, errno: Errno) -> Self {
        Error::Io {
            context: context.into(),
            errno,
        }
    }

    /// System error number matching this error
    pub fn errno(&self) -> Errno {
        match self {
            Error::InvalidArgument(_) => Errno::EINVAL,
            Error::NotReady(_) => Errno::ENODEV,
            Error::NoDevice { errno, .. } => *errno,
            Error::UnsupportedCodec(_) => Errno::ENXIO,
            Error::OutOfRange { .. } => Errno::EINVAL,
            Error::Io { errno, .. } => *errno,
            Error::Timeout => Errno::ETIME,
            Error::PermissionDenied(_) => Errno::EPERM,
            Error::IncompatiblePlugin { .. } => Errno::ENXIO,
            Error::PluginLoad { .. } => Errno::ENOENT,
            Error::NoTimestampData => Errno::ENODATA,
            Error::Unsupported { .. } => Errno::ENXIO,
        }
    }

    /// Rebuild an error from a negative errno returned across the plugin ABI
    pub fn from_errno(errno: Errno, text: String) -> Self {
        match errno {
            Errno::EINVAL => Error::InvalidArgument(text),
            Errno::ENODEV => Error::NotReady(text),
            Errno::EPERM => Error::PermissionDenied(text),
            Errno::ETIME => Error::Timeout,
            Errno::ENODATA => Error::NoTimestampData,
            _ => Error::Io {
                context: text,
                errno,
            },
        }
    }
}

/// Result type for compress operations
pub type Result<T> = std::result::Result<T, Error>;

/// Cut `text` down to [`ERROR_TEXT_MAX`] bytes on a char boundary
pub(crate) fn bounded(mut text: String) -> String {
    if text.len() > ERROR_TEXT_MAX {
        let mut end = ERROR_TEXT_MAX;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(Error::Timeout.errno(), Errno::ETIME);
        assert_eq!(Error::PermissionDenied("x".into()).errno(), Errno::EPERM);
        assert_eq!(Error::io("cannot get avail", Errno::EBUSY).errno(), Errno::EBUSY);
    }

    #[test]
    fn test_from_errno_round_trip() {
        let err = Error::from_errno(Errno::EPERM, "metadata not set".into());
        assert!(matches!(err, Error::PermissionDenied(_)));

        let err = Error::from_errno(Errno::EIO, "write failed".into());
        assert_eq!(err.errno(), Errno::EIO);
    }

    #[test]
    fn test_bounded_text() {
        let long = "é".repeat(100);
        let cut = bounded(long);
        assert!(cut.len() <= ERROR_TEXT_MAX);
        assert!(cut.chars().all(|c| c == 'é'));

        assert_eq!(bounded("short".into()), "short");
    }
}
