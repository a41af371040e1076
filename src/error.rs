//! The seven error kinds used across the installer, switcher, and daemon.
//!
//! Library code returns `Result<T, MbtoolError>`; the binary edges (`main`,
//! the daemon accept loop) convert these into `color_eyre::Report` with
//! `.wrap_err(...)` the way `katsu`'s top-level commands do.

use thiserror::Error;

/// One of the seven error kinds named in the design's error handling section.
#[derive(Debug, Error)]
pub enum MbtoolError {
    /// Device definition invalid, unknown ROM id, missing required `info.prop` key.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A checksum was recorded but does not match the freshly computed one.
    #[error("integrity mismatch for {file}: expected {expected}, got {actual}")]
    IntegrityMismatch {
        file: String,
        expected: String,
        actual: String,
    },

    /// No checksum has been recorded yet; recoverable with `force_update_checksums`.
    #[error("no checksum recorded for {file}")]
    IntegrityMissing { file: String },

    /// A detached-signature check against the embedded trust anchor failed.
    #[error("signature invalid for {file}")]
    SignatureInvalid { file: String },

    /// Disk full, no free loop device, and similar quantity-bearing failures.
    #[error("resource exhausted: needed {needed} bytes, {available} available")]
    ResourceExhaustion { needed: u64, available: u64 },

    /// A mount/unmount/read/write call failed with an OS error.
    #[error("I/O error during {op}: {source}")]
    TransientIO {
        op: String,
        #[source]
        source: std::io::Error,
    },

    /// Malformed RPC request, unknown discriminant, or invalid file handle.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
}

impl MbtoolError {
    pub fn io(op: impl Into<String>, source: std::io::Error) -> Self {
        Self::TransientIO { op: op.into(), source }
    }
}

pub type Result<T> = std::result::Result<T, MbtoolError>;
