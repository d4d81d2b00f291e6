//! Device sessions: an open device handle paired with the lock that guards it.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::lock::{close_reporting, LockFile};
use std::fs::{File, OpenOptions};
use std::os::fd::{AsFd, BorrowedFd};
use tracing::{debug, warn};

/// An open device under its bucket lock.
///
/// The lock is taken before the device is opened and is released only after
/// the device handle is closed. Fields drop in declaration order, so a session
/// dropped on an error path closes the device before unlocking as well.
#[derive(Debug)]
pub struct DeviceSession {
    device: File,
    lock: LockFile,
    path: String,
}

impl DeviceSession {
    /// Lock the bucket for `path`, then open the device read/write.
    pub fn open(config: &Config, path: &str) -> Result<Self> {
        let lock = LockFile::acquire(config, path)?;

        let device = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| Error::DeviceOpenFailed {
                path: path.to_string(),
                source,
            })?;

        debug!(device = path, lock = %lock.path().display(), "Session opened");
        Ok(Self {
            device,
            lock,
            path: path.to_string(),
        })
    }

    /// Device path this session was opened on.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The open device handle.
    pub fn device(&self) -> &File {
        &self.device
    }

    /// Borrowed descriptor of the device, for ioctls.
    pub fn fd(&self) -> BorrowedFd<'_> {
        self.device.as_fd()
    }

    /// Close the device, then the lock. Both are always attempted; the first failure wins.
    pub fn close(self) -> Result<()> {
        let Self { device, lock, path } = self;

        let device_closed = close_reporting(device, "device handle");
        if let Err(e) = &device_closed {
            warn!(device = %path, error = %e, "Device close failed, releasing lock anyway");
        }
        let lock_released = lock.release();

        debug!(device = %path, "Session closed");
        device_closed.and(lock_released)
    }
}
