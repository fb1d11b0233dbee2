//! Cross-process lock directory
//!
//! Write access to a store file `P` is guarded by a lock directory `P.lock/`.
//! Directory creation is atomic (fails if it exists), which gives us the
//! cross-process mutual exclusion primitive without any platform locking API.
//! The holder records `pid\ntimestamp_ms` in `P.lock/pid` so contenders can
//! decide whether the holder is still alive.
//!
//! Staleness rules, checked in order when acquisition fails:
//! 1. pid file unreadable: stale once the lock directory mtime is older
//!    than [`GRACE_MS`].
//! 2. recorded timestamp older than [`MAX_AGE_MS`]: stale regardless of
//!    whether the pid is alive (guards against PID reuse).
//! 3. otherwise probe the pid with signal 0: absent process means stale.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::StoreError;
use crate::now_ms;

/// Age after which a lock with an unreadable pid file is considered stale
pub const GRACE_MS: u64 = 5_000;

/// Age after which a lock is stale regardless of pid liveness
pub const MAX_AGE_MS: u64 = 300_000;

/// Interval between acquisition attempts
pub const LOCK_POLL_MS: u64 = 200;

/// Default overall acquisition timeout
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 30_000;

/// A held cross-process lock; released on drop
pub struct FileLock {
    lock_dir: PathBuf,
    released: bool,
}

impl FileLock {
    /// Acquire the lock for `store_path`, polling until `timeout`
    pub async fn acquire(store_path: &Path, timeout: Duration) -> Result<Self, StoreError> {
        let lock_dir = lock_dir_for(store_path);
        let deadline = std::time::Instant::now() + timeout;

        loop {
            match try_acquire(&lock_dir) {
                Ok(true) => {
                    debug!(lock_dir = %lock_dir.display(), "acquired store lock");
                    return Ok(Self {
                        lock_dir,
                        released: false,
                    });
                }
                Ok(false) => {}
                Err(e) => warn!(lock_dir = %lock_dir.display(), error = %e, "lock probe failed"),
            }

            if std::time::Instant::now() >= deadline {
                // One last sweep in case the holder died during our wait
                if is_stale(&lock_dir) {
                    let _ = remove_lock(&lock_dir);
                    if let Ok(true) = try_acquire(&lock_dir) {
                        return Ok(Self {
                            lock_dir,
                            released: false,
                        });
                    }
                }
                return Err(StoreError::LockTimeout {
                    path: lock_dir,
                    waited_ms: timeout.as_millis() as u64,
                });
            }

            tokio::time::sleep(Duration::from_millis(LOCK_POLL_MS)).await;
        }
    }

    /// Release the lock early (also happens on drop)
    pub fn release(&mut self) {
        if !self.released {
            self.released = true;
            if let Err(e) = remove_lock(&self.lock_dir) {
                warn!(lock_dir = %self.lock_dir.display(), error = %e, "failed to release lock");
            }
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        self.release();
    }
}

/// The lock directory path for a store file
pub fn lock_dir_for(store_path: &Path) -> PathBuf {
    let mut os = store_path.as_os_str().to_os_string();
    os.push(".lock");
    PathBuf::from(os)
}

/// One acquisition attempt. Returns Ok(true) on success, Ok(false) when the
/// lock is held by a live process.
fn try_acquire(lock_dir: &Path) -> Result<bool, StoreError> {
    match fs::create_dir(lock_dir) {
        Ok(()) => {
            let pid_line = format!("{}\n{}", std::process::id(), now_ms());
            fs::write(lock_dir.join("pid"), pid_line)?;
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            if is_stale(lock_dir) {
                debug!(lock_dir = %lock_dir.display(), "removing stale lock");
                remove_lock(lock_dir)?;
                // Retry on the next poll; another contender may win the race
                Ok(false)
            } else {
                Ok(false)
            }
        }
        Err(e) => Err(e.into()),
    }
}

/// Decide whether an existing lock directory belongs to a dead holder
fn is_stale(lock_dir: &Path) -> bool {
    let pid_path = lock_dir.join("pid");

    let contents = match fs::read_to_string(&pid_path) {
        Ok(c) => c,
        Err(_) => {
            // No readable pid file: fall back to directory age
            return dir_age_ms(lock_dir).map(|age| age > GRACE_MS).unwrap_or(false);
        }
    };

    let mut lines = contents.lines();
    let pid: Option<i32> = lines.next().and_then(|l| l.trim().parse().ok());
    let stamp: Option<i64> = lines.next().and_then(|l| l.trim().parse().ok());

    if let Some(stamp) = stamp {
        let age = now_ms().saturating_sub(stamp);
        if age > MAX_AGE_MS as i64 {
            // Too old to trust even a live pid (the pid may have been reused)
            return true;
        }
    }

    match pid {
        Some(pid) => !process_alive(pid),
        None => dir_age_ms(lock_dir).map(|age| age > GRACE_MS).unwrap_or(false),
    }
}

/// 0-signal probe: does the process exist?
fn process_alive(pid: i32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(nix::errno::Errno::ESRCH) => false,
        // EPERM and friends mean the process exists but is not ours
        Err(_) => true,
    }
}

fn dir_age_ms(lock_dir: &Path) -> Option<u64> {
    let mtime = fs::metadata(lock_dir).ok()?.modified().ok()?;
    mtime.elapsed().ok().map(|d| d.as_millis() as u64)
}

/// Remove pid file then directory; missing entries are fine
fn remove_lock(lock_dir: &Path) -> Result<(), StoreError> {
    match fs::remove_file(lock_dir.join("pid")) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    match fs::remove_dir(lock_dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_acquire_and_release() {
        let temp = tempdir().unwrap();
        let store_path = temp.path().join("agent.db");

        let lock = FileLock::acquire(&store_path, Duration::from_secs(5)).await.unwrap();
        assert!(lock_dir_for(&store_path).exists());

        drop(lock);
        assert!(!lock_dir_for(&store_path).exists());
    }

    #[tokio::test]
    async fn test_held_lock_times_out() {
        let temp = tempdir().unwrap();
        let store_path = temp.path().join("agent.db");

        let _held = FileLock::acquire(&store_path, Duration::from_secs(5)).await.unwrap();

        // Second acquisition from the same (live) process must time out
        let result = FileLock::acquire(&store_path, Duration::from_millis(500)).await;
        assert!(matches!(result, Err(StoreError::LockTimeout { .. })));
    }

    #[tokio::test]
    async fn test_dead_pid_is_stale() {
        let temp = tempdir().unwrap();
        let store_path = temp.path().join("agent.db");
        let lock_dir = lock_dir_for(&store_path);

        // Fabricate a lock held by a pid that cannot exist
        fs::create_dir(&lock_dir).unwrap();
        fs::write(lock_dir.join("pid"), format!("{}\n{}", i32::MAX - 1, now_ms())).unwrap();

        let lock = FileLock::acquire(&store_path, Duration::from_secs(5)).await.unwrap();
        drop(lock);
    }

    #[tokio::test]
    async fn test_ancient_timestamp_is_stale_despite_live_pid() {
        let temp = tempdir().unwrap();
        let store_path = temp.path().join("agent.db");
        let lock_dir = lock_dir_for(&store_path);

        // Our own (definitely live) pid, but a timestamp past MAX_AGE_MS
        fs::create_dir(&lock_dir).unwrap();
        let ancient = now_ms() - (MAX_AGE_MS as i64) - 1_000;
        fs::write(lock_dir.join("pid"), format!("{}\n{}", std::process::id(), ancient)).unwrap();

        let lock = FileLock::acquire(&store_path, Duration::from_secs(5)).await.unwrap();
        drop(lock);
    }

    #[tokio::test]
    async fn test_unreadable_pid_respects_grace() {
        let temp = tempdir().unwrap();
        let store_path = temp.path().join("agent.db");
        let lock_dir = lock_dir_for(&store_path);

        // Lock dir with no pid file, freshly created: inside the grace
        // window, so held
        fs::create_dir(&lock_dir).unwrap();
        let result = FileLock::acquire(&store_path, Duration::from_millis(400)).await;
        assert!(matches!(result, Err(StoreError::LockTimeout { .. })));
    }

    #[test]
    fn test_lock_dir_name() {
        let dir = lock_dir_for(Path::new("/data/agent.db"));
        assert_eq!(dir, PathBuf::from("/data/agent.db.lock"));
    }
}
