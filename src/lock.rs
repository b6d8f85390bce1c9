//! Single-writer arbitration between emulator processes
//!
//! The lock is a file holding the owner's PID as decimal text. A lock whose
//! PID no longer names a running process is stale and is broken by the next
//! process that tries to acquire or wait on it.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use sense_emu_registers::SensorFile;
use tracing::{debug, info, warn};

use crate::error::LockError;

/// How often [`EmulatorLock::wait`] re-checks the lock file
const WAIT_POLL: Duration = Duration::from_millis(100);

/// An empty lock file is re-read this many times before it counts as
/// abandoned by a creator that died before writing its PID
const EMPTY_LOCK_RETRIES: u32 = 10;
const EMPTY_LOCK_POLL: Duration = Duration::from_millis(10);

/// Create attempts made by [`EmulatorLock::acquire`]
const ACQUIRE_ATTEMPTS: u32 = 3;

/// PID-file lock naming the process that drives the sensors
#[derive(Debug, Clone)]
pub struct EmulatorLock {
    path: PathBuf,
}

impl Default for EmulatorLock {
    fn default() -> Self {
        Self::new()
    }
}

impl EmulatorLock {
    /// Lock file in the default state directory
    pub fn new() -> Self {
        Self::at(SensorFile::Lock.path())
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the lock for this process
    ///
    /// A stale lock is removed first. Creation is exclusive, so of two
    /// processes racing for a free lock exactly one wins.
    pub fn acquire(&self) -> Result<(), LockError> {
        let pid = std::process::id();
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.break_if_stale()?;

            let e = match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.path)
            {
                Ok(mut file) => {
                    writeln!(file, "{}", pid)?;
                    info!("Acquired emulator lock {} as {}", self.path.display(), pid);
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => e,
                Err(e) => return Err(e.into()),
            };

            match self.read_settled() {
                Some(content) => match parse_pid(&content) {
                    Some(pid) => return Err(LockError::AlreadyLocked { pid }),
                    // Still empty; the next pass breaks it
                    None if content.trim().is_empty() && attempt < ACQUIRE_ATTEMPTS => {}
                    None => {
                        return Err(LockError::Corrupt {
                            path: self.path.clone(),
                            content,
                        })
                    }
                },
                // Released between our create and read
                None if attempt < ACQUIRE_ATTEMPTS => {}
                None => return Err(LockError::Io(e)),
            }
        }
    }

    /// Remove the lock file, whoever holds it
    pub fn release(&self) -> Result<(), LockError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!("Released emulator lock {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Wait until a live process holds the lock
    ///
    /// `None` waits indefinitely. Returns false if `timeout` elapses first.
    /// Stale locks met while waiting are broken.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if let Err(e) = self.break_if_stale() {
                warn!("Failed to break stale lock {}: {}", self.path.display(), e);
            }
            if self.is_held() {
                return true;
            }
            let wait = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return false;
                    }
                    remaining.min(WAIT_POLL)
                }
                None => WAIT_POLL,
            };
            std::thread::sleep(wait);
        }
    }

    /// PID recorded in the lock file, if it exists and parses
    pub fn holder(&self) -> Option<u32> {
        self.read_content().as_deref().and_then(parse_pid)
    }

    /// Whether the lock file names a running process
    pub fn is_held(&self) -> bool {
        self.holder().is_some_and(pid_exists)
    }

    /// Whether the lock file names a process that no longer exists
    pub fn is_stale(&self) -> bool {
        self.holder().is_some_and(|pid| !pid_exists(pid))
    }

    /// Whether this process holds the lock
    pub fn is_mine(&self) -> bool {
        self.holder() == Some(std::process::id())
    }

    /// Remove a lock left by a dead process, or one that never got a PID
    fn break_if_stale(&self) -> Result<(), LockError> {
        let Some(content) = self.read_settled() else {
            return Ok(());
        };
        match parse_pid(&content) {
            Some(pid) if !pid_exists(pid) => {
                warn!(
                    "Breaking stale emulator lock {} left by process {}",
                    self.path.display(),
                    pid
                );
                self.release()?;
            }
            None if content.trim().is_empty() => {
                warn!("Breaking empty emulator lock {}", self.path.display());
                self.release()?;
            }
            _ => {}
        }
        Ok(())
    }

    fn read_content(&self) -> Option<String> {
        fs::read_to_string(&self.path).ok()
    }

    /// Lock file content, giving a creator that has not yet written its
    /// PID a moment to do so
    fn read_settled(&self) -> Option<String> {
        let mut content = self.read_content()?;
        for _ in 0..EMPTY_LOCK_RETRIES {
            if !content.trim().is_empty() {
                break;
            }
            std::thread::sleep(EMPTY_LOCK_POLL);
            content = self.read_content()?;
        }
        Some(content)
    }
}

fn parse_pid(content: &str) -> Option<u32> {
    content.trim().parse().ok()
}

/// Whether `pid` names a running process
///
/// A process owned by another user still counts as running.
#[cfg(unix)]
pub fn pid_exists(pid: u32) -> bool {
    if pid == 0 {
        return true;
    }
    // Negative values would address a process group
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: signal 0 only checks that the target exists and may be signalled.
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    match io::Error::last_os_error().raw_os_error() {
        Some(libc::ESRCH) => false,
        _ => true,
    }
}

/// Whether `pid` names a running process
///
/// A process owned by another user still counts as running.
#[cfg(windows)]
pub fn pid_exists(pid: u32) -> bool {
    use windows_sys::Win32::Foundation::{
        CloseHandle, GetLastError, ERROR_ACCESS_DENIED, ERROR_INVALID_PARAMETER, STILL_ACTIVE,
    };
    use windows_sys::Win32::System::Threading::{
        GetExitCodeProcess, OpenProcess, PROCESS_QUERY_INFORMATION,
    };

    if pid == 0 {
        return true;
    }
    // SAFETY: the handle is checked for null before use and closed once.
    unsafe {
        let handle = OpenProcess(PROCESS_QUERY_INFORMATION, 0, pid);
        if handle.is_null() {
            return match GetLastError() {
                ERROR_ACCESS_DENIED => true,
                ERROR_INVALID_PARAMETER => false,
                _ => true,
            };
        }
        let mut code: u32 = 0;
        let ok = GetExitCodeProcess(handle, &mut code);
        CloseHandle(handle);
        ok == 0 || code == STILL_ACTIVE as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A PID no live process can have
    const DEAD_PID: u32 = i32::MAX as u32;

    fn lock_in(dir: &tempfile::TempDir) -> EmulatorLock {
        EmulatorLock::at(SensorFile::Lock.path_in(dir.path()))
    }

    #[test]
    fn test_own_pid_exists() {
        assert!(pid_exists(std::process::id()));
        assert!(!pid_exists(DEAD_PID));
    }

    #[test]
    fn test_acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock_in(&dir);
        assert!(!lock.is_held());

        lock.acquire().unwrap();
        assert!(lock.is_held());
        assert!(lock.is_mine());
        assert_eq!(
            fs::read_to_string(lock.path()).unwrap(),
            format!("{}\n", std::process::id())
        );

        lock.release().unwrap();
        assert!(!lock.path().exists());
        // Releasing a free lock is fine
        lock.release().unwrap();
    }

    #[test]
    fn test_second_acquire_fails_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock_in(&dir);
        lock.acquire().unwrap();

        match lock_in(&dir).acquire() {
            Err(LockError::AlreadyLocked { pid }) => assert_eq!(pid, std::process::id()),
            other => panic!("expected AlreadyLocked, got {:?}", other),
        }
    }

    #[test]
    fn test_stale_lock_is_broken() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock_in(&dir);
        fs::write(lock.path(), format!("{}\n", DEAD_PID)).unwrap();
        assert!(lock.is_stale());
        assert!(!lock.is_held());

        lock.acquire().unwrap();
        assert!(lock.is_mine());
    }

    #[test]
    fn test_corrupt_lock_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock_in(&dir);
        fs::write(lock.path(), "not a pid").unwrap();
        assert!(!lock.is_stale());
        assert!(matches!(lock.acquire(), Err(LockError::Corrupt { .. })));
    }

    #[test]
    fn test_empty_lock_is_broken() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock_in(&dir);
        fs::write(lock.path(), "").unwrap();

        lock.acquire().unwrap();
        assert!(lock.is_mine());
    }

    #[test]
    fn test_empty_lock_waits_for_pid() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock_in(&dir);
        fs::write(lock.path(), "").unwrap();

        let path = lock.path().to_path_buf();
        let writer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            fs::write(path, format!("{}\n", std::process::id())).unwrap();
        });
        match lock.acquire() {
            Err(LockError::AlreadyLocked { pid }) => assert_eq!(pid, std::process::id()),
            other => panic!("expected AlreadyLocked, got {:?}", other),
        }
        writer.join().unwrap();
    }

    #[test]
    fn test_wait_breaks_empty_lock() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock_in(&dir);
        fs::write(lock.path(), "").unwrap();
        assert!(!lock.wait(Some(Duration::from_millis(150))));
        assert!(!lock.path().exists());
    }

    #[test]
    fn test_wait_times_out_on_free_lock() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock_in(&dir);
        let started = Instant::now();
        assert!(!lock.wait(Some(Duration::from_millis(250))));
        assert!(started.elapsed() >= Duration::from_millis(250));
    }

    #[test]
    fn test_wait_breaks_stale_lock() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock_in(&dir);
        fs::write(lock.path(), format!("{}\n", DEAD_PID)).unwrap();
        assert!(!lock.wait(Some(Duration::from_millis(150))));
        assert!(!lock.path().exists());
    }

    #[test]
    fn test_wait_sees_holder() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock_in(&dir);
        let path = lock.path().to_path_buf();
        let holder = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(200));
            EmulatorLock::at(path).acquire().unwrap();
        });
        assert!(lock.wait(Some(Duration::from_secs(5))));
        holder.join().unwrap();
    }
}
