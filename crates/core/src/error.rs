//! Error types for guardant-core.

use std::io;
use thiserror::Error;

/// Core library error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Lock file could not be created or the advisory lock could not be taken.
    #[error("lock acquisition failed for {path}: {source}")]
    LockAcquisitionFailed {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Derived lock path does not fit a platform path buffer.
    #[error("lock path too long: {len} bytes (limit {max})")]
    LockPathTooLong { len: usize, max: usize },

    /// Device node could not be opened for read/write.
    #[error("cannot open device {path}: {source}")]
    DeviceOpenFailed {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Probe found no recognized dongle signature.
    #[error("unsupported device: {0}")]
    UnsupportedDevice(String),

    /// Transfer did not complete within the transport timeout.
    #[error("transfer timed out: {0}")]
    TransferTimeout(String),

    /// Fewer bytes moved than requested.
    #[error("short transfer: {actual} of {expected} bytes")]
    TransferShort { expected: usize, actual: usize },

    /// USB interface claim (bulk) or hiddev flag setup (HID) failed.
    #[error("interface claim failed: {0}")]
    InterfaceClaimFailed(#[source] io::Error),

    /// Exchange lengths not aligned to the pack size, or pack size out of bounds.
    #[error("invalid exchange length: {field} = {value} (pack size {pack_size})")]
    ProtocolLengthInvalid {
        field: &'static str,
        value: usize,
        pack_size: usize,
    },

    /// None of the usbfs root candidates exist.
    #[error("usbfs root not found (tried {0})")]
    EnumerationRootNotFound(String),

    /// Closing a device handle, lock descriptor or claimed interface failed.
    #[error("failed to release {what}: {source}")]
    ResourceRelease {
        what: &'static str,
        #[source]
        source: io::Error,
    },

    /// Other OS-level I/O failure during a transfer.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, Error>;
