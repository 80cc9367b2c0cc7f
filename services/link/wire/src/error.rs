//! Wire codec error types.

use thiserror::Error;

/// Wire codec errors
///
/// Every variant describes a frame that cannot be trusted. Accessors return
/// these instead of reading past the end of the buffer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Buffer shorter than the smallest possible frame
    #[error("frame too short: {len} bytes, need at least {min}")]
    TooShort {
        /// Bytes available
        len: usize,
        /// Bytes required
        min: usize,
    },

    /// An offset points outside the buffer
    #[error("offset {offset} out of bounds for buffer of {len} bytes")]
    OutOfBounds {
        /// Offending absolute position
        offset: usize,
        /// Buffer length
        len: usize,
    },

    /// Vtable header is inconsistent
    #[error("malformed vtable at {offset}")]
    Vtable {
        /// Vtable position
        offset: usize,
    },

    /// String bytes are not UTF-8
    #[error("string at {offset} is not valid utf-8")]
    Utf8 {
        /// String position
        offset: usize,
    },

    /// Size prefix disagrees with the bytes that follow it
    #[error("size prefix declares {declared} bytes, {actual} available")]
    SizePrefix {
        /// Declared length
        declared: usize,
        /// Available length
        actual: usize,
    },
}

/// Result alias for codec operations
pub type Result<T> = std::result::Result<T, WireError>;
