//! Error types for image capture, reconstruction and classification.
//!
//! Failures are per-module and non-fatal to an overall scan: callers are
//! expected to convert an acquisition error into an `unreachable` report
//! rather than aborting.

use thiserror::Error;

/// Main error type for imago operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The remote copy came back short or empty.
    #[error("short read from remote process at {address:#x} (wanted {wanted:#x} bytes)")]
    Unreadable { address: u64, wanted: usize },

    /// Operation requires a live captured buffer and none exists.
    #[error("no captured buffer to operate on")]
    NoBuffer,

    /// The captured buffer is not structurally parseable as an image.
    #[error("buffer does not hold a structurally valid image: {0}")]
    InvalidPe(&'static str),

    /// A requested size does not fit the captured image layout.
    #[error("requested size {requested:#x} out of range for the captured image")]
    OutOfRange { requested: usize },

    /// File I/O errors from dump operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for imago operations.
pub type Result<T> = std::result::Result<T, Error>;
