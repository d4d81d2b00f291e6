//! Cross-process device locking.
//!
//! Each device path hashes into one of [`LOCK_BUCKETS`] lock files under the
//! configured lock directory. A session holds an exclusive advisory write lock
//! on that file for the whole lifetime of its device handle, so two sessions
//! whose paths share a bucket never touch their devices concurrently. Bucket
//! collisions between unrelated devices only cost some serialization.
//!
//! Locks are open-file-description locks: they conflict between two sessions
//! of the same process as well as with classic `fcntl` record locks taken by
//! other processes on the same file.

use crate::config::Config;
use crate::error::{Error, Result};
use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg};
use nix::sys::stat::{umask, Mode};
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::fd::{AsRawFd, IntoRawFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Number of distinct lock files.
pub const LOCK_BUCKETS: u64 = 97;

/// Delay between attempts after a transient locking failure.
pub const LOCK_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Permissions of a freshly created lock file (before umask, which is relaxed).
const LOCK_FILE_MODE: u32 = 0o666;

/// Hash a device path into its lock bucket: `sum(byte[i] * (i + 1)) mod 97`.
pub fn lock_bucket(device_path: &str) -> u64 {
    device_path
        .bytes()
        .enumerate()
        .fold(0, |acc, (i, b)| (acc + b as u64 * (i as u64 + 1)) % LOCK_BUCKETS)
}

/// Derive the lock file path for `device_path` inside `lock_dir`.
///
/// The directory is used verbatim; a `/` is inserted only when it is empty or
/// does not already end with one. Fails if the result would not fit `PATH_MAX`.
pub fn lock_path(lock_dir: &Path, device_path: &str) -> Result<PathBuf> {
    let dir = lock_dir.as_os_str();
    let mut path = OsString::from(dir);
    if !dir.as_bytes().ends_with(b"/") {
        path.push("/");
    }
    path.push(format!("grd{:02}.lock", lock_bucket(device_path)));

    let max = libc::PATH_MAX as usize;
    if path.len() >= max {
        return Err(Error::LockPathTooLong {
            len: path.len(),
            max,
        });
    }
    Ok(PathBuf::from(path))
}

/// Serializes umask changes between threads of this process.
static UMASK_SERIAL: Mutex<()> = Mutex::new(());

/// Process umask relaxed for the guard's lifetime; restored on drop.
struct UmaskGuard {
    previous: Mode,
    _serial: MutexGuard<'static, ()>,
}

impl UmaskGuard {
    fn relax() -> Self {
        let serial = UMASK_SERIAL.lock().unwrap_or_else(|e| e.into_inner());
        Self {
            previous: umask(Mode::empty()),
            _serial: serial,
        }
    }
}

impl Drop for UmaskGuard {
    fn drop(&mut self) {
        umask(self.previous);
    }
}

/// Whether a failed lock attempt should be retried after [`LOCK_RETRY_BACKOFF`].
pub fn is_transient_lock_error(errno: Errno) -> bool {
    matches!(errno, Errno::EDEADLK | Errno::EINTR | Errno::ENOLCK)
}

fn write_lock_request() -> libc::flock {
    // SAFETY: an all-zero flock is a valid value; zero l_start/l_len covers the whole file
    // and l_pid must be zero for open-file-description locks.
    let mut request: libc::flock = unsafe { std::mem::zeroed() };
    request.l_type = libc::F_WRLCK as libc::c_short;
    request.l_whence = libc::SEEK_SET as libc::c_short;
    request
}

/// An exclusive advisory lock on one lock bucket. Released when closed or dropped.
#[derive(Debug)]
pub struct LockFile {
    file: File,
    path: PathBuf,
}

impl LockFile {
    /// Take the lock guarding `device_path`, blocking until it is available.
    pub fn acquire(config: &Config, device_path: &str) -> Result<Self> {
        let path = lock_path(&config.lock_dir, device_path)?;
        let failed = |source: io::Error| Error::LockAcquisitionFailed {
            path: path.display().to_string(),
            source,
        };

        let file = {
            let _umask = UmaskGuard::relax();
            OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .mode(LOCK_FILE_MODE)
                .open(&path)
                .map_err(failed)?
        };

        let request = write_lock_request();
        loop {
            match fcntl(file.as_raw_fd(), FcntlArg::F_OFD_SETLKW(&request)) {
                Ok(_) => break,
                Err(errno) if is_transient_lock_error(errno) => {
                    debug!(lock = %path.display(), %errno, "Lock busy, retrying");
                    thread::sleep(LOCK_RETRY_BACKOFF);
                }
                Err(errno) => return Err(failed(errno.into())),
            }
        }
        debug!(lock = %path.display(), device = device_path, "Lock acquired");

        let lock = Self { file, path };
        lock.record_owner();
        Ok(lock)
    }

    /// Path of the underlying lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Store our pid in the lock file for whoever inspects it by hand.
    fn record_owner(&self) {
        let pid = i64::from(nix::unistd::getpid().as_raw());
        if let Err(e) = (&self.file).write_all(&pid.to_ne_bytes()) {
            warn!(lock = %self.path.display(), error = %e, "Could not record lock owner");
        }
    }

    /// Close the lock descriptor, releasing the lock, and report close errors.
    pub fn release(self) -> Result<()> {
        let path = self.path;
        close_reporting(self.file, "lock file")?;
        debug!(lock = %path.display(), "Lock released");
        Ok(())
    }
}

/// Close `file` explicitly so a failing `close(2)` is reported rather than ignored.
pub(crate) fn close_reporting(file: File, what: &'static str) -> Result<()> {
    nix::unistd::close(file.into_raw_fd()).map_err(|errno| Error::ResourceRelease {
        what,
        source: errno.into(),
    })
}
