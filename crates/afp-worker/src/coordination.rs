//! Cross-process coordination artifacts.
//!
//! Worker processes share no memory; they coordinate through two files
//! under the invoking user's runtime directory. The connect lock is an
//! advisory exclusive `flock(2)` held for the duration of a connection
//! attempt. The breaker marker is an empty file whose modification time
//! is the moment all retries were exhausted; while the cooldown has not
//! elapsed every worker fails fast. Neither file stores content, only
//! existence and mtime carry meaning. The kernel drops the flock on
//! process exit, abnormal termination included.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

const LOCK_FILE: &str = "afp-worker.connect.lock";
const BREAKER_FILE: &str = "afp-worker.breaker";

/// Fixed locations of the coordination files.
#[derive(Debug, Clone)]
pub struct CoordinationPaths {
    pub lock: PathBuf,
    pub breaker: PathBuf,
}

impl CoordinationPaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            lock: dir.join(LOCK_FILE),
            breaker: dir.join(BREAKER_FILE),
        }
    }

    /// `$XDG_RUNTIME_DIR`, or the system temp dir when unset.
    pub fn default_dir() -> PathBuf {
        std::env::var_os("XDG_RUNTIME_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir)
    }
}

/// Exclusive advisory connect lock. Unlocked on drop.
#[derive(Debug)]
pub struct ConnectLock {
    _file: File,
}

impl ConnectLock {
    /// Acquire with unbounded wait. A worker waits as long as a sibling's
    /// connect attempt, including its retries, takes.
    pub fn acquire(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        tracing::debug!(path = %path.display(), "connect lock acquired");
        Ok(Self { _file: file })
    }
}

/// Circuit-breaker marker with an mtime cooldown clock.
#[derive(Debug, Clone)]
pub struct BreakerMarker {
    path: PathBuf,
    cooldown: Duration,
}

impl BreakerMarker {
    pub fn new(path: PathBuf, cooldown: Duration) -> Self {
        Self { path, cooldown }
    }

    /// Remaining cooldown, or `None` when the breaker is not tripped.
    /// Observing an elapsed cooldown removes the marker.
    pub fn remaining(&self) -> Option<Duration> {
        let mtime = fs::metadata(&self.path).ok()?.modified().ok()?;
        let elapsed = SystemTime::now()
            .duration_since(mtime)
            .unwrap_or(Duration::ZERO);
        if elapsed < self.cooldown {
            Some(self.cooldown - elapsed)
        } else {
            let _ = fs::remove_file(&self.path);
            None
        }
    }

    /// Record that all retries were exhausted now.
    pub fn trip(&self) {
        if let Err(e) = fs::write(&self.path, b"") {
            tracing::warn!(path = %self.path.display(), error = %e, "could not write breaker marker");
        } else {
            tracing::warn!(
                path = %self.path.display(),
                cooldown_secs = self.cooldown.as_secs(),
                "circuit breaker tripped"
            );
        }
    }

    /// Remove the marker after a successful connection.
    pub fn clear(&self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Hard wall-clock limit on a connect call, enforced by `alarm(2)`.
///
/// The default SIGALRM disposition terminates the process; this is a
/// cancellation of last resort against a wedged library call that never
/// returns, not a graceful cancellation. Dropping the guard disarms the
/// alarm, so early returns cannot leave it pending.
#[derive(Debug)]
pub struct AlarmGuard {
    armed: bool,
}

impl AlarmGuard {
    /// Arm for `timeout`, rounded up to a whole second. A zero timeout
    /// disables the alarm entirely.
    pub fn arm(timeout: Duration) -> Self {
        if timeout.is_zero() {
            return Self { armed: false };
        }
        let secs = timeout.as_secs().max(1) as libc::c_uint;
        unsafe { libc::alarm(secs) };
        Self { armed: true }
    }
}

impl Drop for AlarmGuard {
    fn drop(&mut self) {
        if self.armed {
            unsafe { libc::alarm(0) };
        }
    }
}
