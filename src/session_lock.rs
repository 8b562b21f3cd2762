//! Exclusive advisory lock on a user's state directory.
//!
//! The lock serializes every counting transaction for one user across
//! independent processes. Acquisition never blocks indefinitely: on
//! contention it retries a bounded number of times and then fails.
//! The lock is held by an open directory handle, so it is released when
//! the [`SessionLock`] is dropped or when the holding process dies.

use crate::errors::SessionError;
use crate::value_store::USER_DIR_MODE;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{DirBuilder, File};
use std::io::ErrorKind;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default number of retries after the first failed attempt.
pub const DEFAULT_LOCK_RETRIES: u32 = 3;

/// Default pause between attempts (milliseconds).
pub const DEFAULT_LOCK_RETRY_DELAY_MS: u64 = 1000;

/// Bounded retry policy for lock acquisition.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LockPolicy {
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

fn default_retries() -> u32 {
    DEFAULT_LOCK_RETRIES
}

fn default_retry_delay_ms() -> u64 {
    DEFAULT_LOCK_RETRY_DELAY_MS
}

impl LockPolicy {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Total number of lock attempts, the first one included.
    pub fn attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}

/// A held lock on a per-user state directory. Unlocks on drop.
#[derive(Debug)]
pub struct SessionLock {
    dir: File,
    path: PathBuf,
}

impl SessionLock {
    /// Creates `path` if needed, opens it, and takes an exclusive flock.
    ///
    /// # Errors
    ///
    /// - [`SessionError::LockDirectory`] if the directory cannot be created or opened
    /// - [`SessionError::LockContended`] if the lock is still held after every retry
    /// - [`SessionError::Lock`] if flock fails for another reason
    pub fn acquire(path: &Path, policy: &LockPolicy) -> Result<Self, SessionError> {
        DirBuilder::new()
            .recursive(true)
            .mode(USER_DIR_MODE)
            .create(path)
            .map_err(|e| SessionError::LockDirectory {
                path: path.to_path_buf(),
                message: format!("mkdir: {}", e),
            })?;

        let dir = File::open(path).map_err(|e| SessionError::LockDirectory {
            path: path.to_path_buf(),
            message: format!("open: {}", e),
        })?;

        let attempts = policy.attempts();
        for attempt in 1..=attempts {
            match dir.try_lock_exclusive() {
                Ok(()) => {
                    tracing::debug!(path = %path.display(), attempt, "session lock acquired");
                    return Ok(Self {
                        dir,
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    let remaining = attempts - attempt;
                    if remaining == 0 {
                        break;
                    }
                    tracing::warn!(
                        "Failed to lock {}, trying {} more times.",
                        path.display(),
                        remaining
                    );
                    std::thread::sleep(policy.retry_delay());
                }
                Err(e) => {
                    return Err(SessionError::Lock {
                        path: path.to_path_buf(),
                        message: e.to_string(),
                    });
                }
            }
        }

        tracing::error!("Failed to lock {}.", path.display());
        Err(SessionError::LockContended {
            path: path.to_path_buf(),
            attempts,
        })
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        // Closing the handle releases the lock as well; unlock first so the
        // release does not depend on other clones of the descriptor.
        if let Err(e) = FileExt::unlock(&self.dir) {
            tracing::debug!(path = %self.path.display(), "unlock failed: {}", e);
        }
    }
}

#[cfg(test)]
#[path = "tests/session_lock_tests.rs"]
mod tests;
