//! Codec error types.

use thiserror::Error;

/// Why a frame could not be encoded or decoded as an [`Envelope`].
///
/// Any decode variant means the frame was malformed; the receive path drops
/// such frames without affecting any transaction.
///
/// [`Envelope`]: crate::Envelope
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The frame ended before a field was complete.
    #[error("truncated envelope: needed {needed} bytes for {field}, {remaining} remaining")]
    Truncated {
        /// Field being read.
        field: &'static str,
        /// Bytes required.
        needed: usize,
        /// Bytes left in the frame.
        remaining: usize,
    },

    /// The frame was written by an unknown wire version.
    #[error("unsupported envelope version {0}")]
    UnsupportedVersion(u8),

    /// Status byte is not a known [`Status`](crate::Status).
    #[error("unknown envelope status {0}")]
    UnknownStatus(u8),

    /// Error-presence flag is neither 0 nor 1.
    #[error("invalid error flag {0}")]
    InvalidErrorFlag(u8),

    /// A non-error envelope carried an error block.
    #[error("error block on {status} envelope")]
    UnexpectedError {
        /// Status the envelope declared.
        status: crate::Status,
    },

    /// A string field was not valid UTF-8.
    #[error("field {field} is not valid UTF-8")]
    InvalidUtf8 {
        /// Offending field.
        field: &'static str,
    },

    /// Bytes remained after the last field.
    #[error("{0} trailing bytes after envelope")]
    TrailingBytes(usize),

    /// The frame exceeds [`MAX_ENVELOPE_SIZE`](crate::constants::MAX_ENVELOPE_SIZE).
    #[error("envelope of {size} bytes exceeds maximum of {max}")]
    TooLarge {
        /// Size of the frame or field.
        size: usize,
        /// Limit that was exceeded.
        max: usize,
    },
}
