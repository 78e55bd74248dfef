//! Advisory lock file guarding a problem's work directory
//!
//! Only the CLI takes it (around test building and cleaning); the cache and
//! the judge never look at it.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

pub const LOCK_FILE: &str = "lock";

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("{path} is locked by another process ({holder})")]
    Busy { path: PathBuf, holder: String },

    #[error("IO error on lock {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Retry policy for contended locks
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, the first one included
    pub max_attempts: usize,

    pub initial_backoff: Duration,

    /// Cap for a single wait
    pub max_backoff: Duration,

    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Fail on the first conflict
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Wait before attempt number `attempt` (0-indexed)
    pub fn backoff_duration(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::from_secs(0);
        }

        let base_millis = self.initial_backoff.as_millis() as f64;
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let backoff = Duration::from_millis((base_millis * self.backoff_multiplier.powi(exponent)) as u64);
        backoff.min(self.max_backoff)
    }
}

/// Held lock; the file is removed on drop
#[derive(Debug)]
pub struct DirLock {
    path: PathBuf,
}

impl DirLock {
    /// Create `dir/lock` exclusively, recording `reason` in it
    pub fn acquire(dir: &Path, reason: &str, policy: &RetryPolicy) -> Result<Self, LockError> {
        let path = dir.join(LOCK_FILE);
        let attempts = policy.max_attempts.max(1);

        for attempt in 0..attempts {
            let wait = policy.backoff_duration(attempt);
            if !wait.is_zero() {
                debug!("Waiting {:?} for {}", wait, path.display());
                std::thread::sleep(wait);
            }

            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    if let Err(source) = file.write_all(reason.as_bytes()) {
                        let _ = fs::remove_file(&path);
                        return Err(LockError::Io { path, source });
                    }
                    debug!("Acquired {} ({})", path.display(), reason);
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(source) => return Err(LockError::Io { path, source }),
            }
        }

        let holder = fs::read_to_string(&path)
            .map(|text| text.trim().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        Err(LockError::Busy { path, holder })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path)
            && e.kind() != ErrorKind::NotFound
        {
            warn!("Failed to release {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn quick() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(20),
            backoff_multiplier: 2.0,
        }
    }

    #[test]
    fn test_backoff_calculation() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.backoff_duration(0), Duration::from_secs(0));
        assert_eq!(policy.backoff_duration(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_duration(2), Duration::from_secs(2));
        assert_eq!(policy.backoff_duration(3), Duration::from_secs(4));
        assert_eq!(policy.backoff_duration(10), Duration::from_secs(60));
    }

    #[test]
    fn test_lock_is_exclusive() {
        let tmp = TempDir::new().unwrap();
        let held = DirLock::acquire(tmp.path(), "building tests", &quick()).unwrap();

        let err = DirLock::acquire(tmp.path(), "cleaning", &quick()).unwrap_err();
        match err {
            LockError::Busy { holder, .. } => assert_eq!(holder, "building tests"),
            other => panic!("unexpected error: {other}"),
        }

        drop(held);
        assert!(!tmp.path().join(LOCK_FILE).exists());
        let again = DirLock::acquire(tmp.path(), "cleaning", &RetryPolicy::no_retry()).unwrap();
        assert_eq!(fs::read_to_string(again.path()).unwrap(), "cleaning");
    }

    #[test]
    fn test_waits_for_release() {
        let tmp = TempDir::new().unwrap();
        let held = DirLock::acquire(tmp.path(), "first", &RetryPolicy::no_retry()).unwrap();

        let releaser = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            drop(held);
        });
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(50),
            backoff_multiplier: 2.0,
        };
        let second = DirLock::acquire(tmp.path(), "second", &policy);
        releaser.join().unwrap();
        assert!(second.is_ok());
    }
}
