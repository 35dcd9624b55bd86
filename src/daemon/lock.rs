// Single-instance lock file
//
// The running instance holds an exclusive advisory lock on the lock file for
// its whole lifetime and records its PID inside it. Other processes use the
// lock state to detect a live holder and the PID to name it.

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::errors::LaunchError;

const RELEASE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Exclusive ownership of the lock file; released on drop
#[derive(Debug)]
pub struct LockGuard {
    file: Option<File>,
    path: PathBuf,
}

impl LockGuard {
    /// Open (creating if absent) and exclusively lock `path`
    ///
    /// Fails with [`LaunchError::LockHeld`] when another handle, in this or
    /// any other process, already holds the lock.
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self, LaunchError> {
        let path = path.as_ref().to_path_buf();
        let lock_error = |source: io::Error| LaunchError::Lock {
            path: path.clone(),
            source,
        };

        // No truncate here: the current holder's PID must survive a failed attempt
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .map_err(lock_error)?;

        if let Err(e) = FileExt::try_lock_exclusive(&file) {
            if is_contended(&e) {
                let pid = read_pid(&mut file);
                return Err(LaunchError::LockHeld {
                    path: path.clone(),
                    pid,
                });
            }
            return Err(lock_error(e));
        }

        let pid = std::process::id();
        write_pid(&mut file, pid).map_err(lock_error)?;
        info!(pid = pid, path = %path.display(), "Lock file acquired");

        Ok(Self {
            file: Some(file),
            path,
        })
    }

    /// Release the lock explicitly, reporting any failure
    pub fn release(mut self) -> Result<(), LaunchError> {
        self.unlock()
    }

    /// Get lock file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn unlock(&mut self) -> Result<(), LaunchError> {
        if let Some(file) = self.file.take() {
            FileExt::unlock(&file).map_err(|source| LaunchError::Lock {
                path: self.path.clone(),
                source,
            })?;
            debug!(path = %self.path.display(), "Lock file released");
        }
        Ok(())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = self.unlock() {
            warn!(error = %e, "Failed to release lock file");
        }
    }
}

/// Check whether any process currently holds the lock on `path`
pub fn is_locked(path: &Path) -> Result<bool, LaunchError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(source) => {
            return Err(LaunchError::Lock {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    match FileExt::try_lock_shared(&file) {
        Ok(()) => {
            let _ = FileExt::unlock(&file);
            Ok(false)
        }
        Err(e) if is_contended(&e) => Ok(true),
        Err(source) => Err(LaunchError::Lock {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Find the process holding the lock on `path`, if any
///
/// Returns `None` when the file is absent or unlocked. A locked file with
/// unreadable content falls back to scanning `/proc` on Linux.
pub fn detect_holder(path: &Path) -> Result<Option<u32>, LaunchError> {
    if !is_locked(path)? {
        return Ok(None);
    }

    let recorded = File::open(path).ok().and_then(|mut file| read_pid(&mut file));
    if recorded.is_some() {
        return Ok(recorded);
    }

    #[cfg(target_os = "linux")]
    {
        Ok(scan_proc_for_holder(path))
    }

    #[cfg(not(target_os = "linux"))]
    {
        Ok(None)
    }
}

/// Send SIGTERM to `pid`
///
/// Returns `Ok(false)` if the process no longer exists. Does not wait for
/// the process to exit.
#[cfg(unix)]
pub fn terminate(pid: u32) -> Result<bool, LaunchError> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if pid == std::process::id() {
        return Err(LaunchError::Signal(
            "refusing to terminate the current process".to_string(),
        ));
    }
    if !is_signalable(pid) {
        return Err(LaunchError::Signal(format!(
            "refusing to terminate PID {}",
            pid
        )));
    }
    let raw = i32::try_from(pid)
        .map_err(|_| LaunchError::Signal(format!("PID {} out of range", pid)))?;

    match kill(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) => {
            info!(pid = pid, "Sent SIGTERM to previous instance");
            Ok(true)
        }
        Err(Errno::ESRCH) => {
            debug!(pid = pid, "Previous instance already gone");
            Ok(false)
        }
        Err(e) => Err(LaunchError::Signal(format!(
            "failed to signal PID {}: {}",
            pid, e
        ))),
    }
}

#[cfg(not(unix))]
pub fn terminate(pid: u32) -> Result<bool, LaunchError> {
    Err(LaunchError::Signal(format!(
        "terminating PID {} is only supported on unix",
        pid
    )))
}

/// Check if a process with the given PID exists
///
/// kill(pid, 0) checks existence without sending a signal
#[cfg(unix)]
pub fn process_exists(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    match i32::try_from(pid) {
        Ok(raw) => kill(Pid::from_raw(raw), None).is_ok(),
        Err(_) => false,
    }
}

#[cfg(not(unix))]
pub fn process_exists(_pid: u32) -> bool {
    false
}

/// Poll until nobody holds the lock on `path` or `timeout` lapses
///
/// Returns whether the lock was observed free.
pub async fn wait_for_release(path: &Path, timeout: Duration) -> Result<bool, LaunchError> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if !is_locked(path)? {
            return Ok(true);
        }
        if tokio::time::Instant::now() >= deadline {
            return Ok(false);
        }
        tokio::time::sleep(RELEASE_POLL_INTERVAL).await;
    }
}

fn is_contended(e: &io::Error) -> bool {
    e.kind() == fs2::lock_contended_error().kind()
}

fn read_pid(file: &mut File) -> Option<u32> {
    let mut contents = String::new();
    file.seek(SeekFrom::Start(0)).ok()?;
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok().filter(|pid| is_signalable(*pid))
}

/// PID 0 addresses our own process group and PID 1 is init; neither names a holder
fn is_signalable(pid: u32) -> bool {
    pid > 1
}

fn write_pid(file: &mut File, pid: u32) -> io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    writeln!(file, "{}", pid)?;
    file.flush()
}

#[cfg(target_os = "linux")]
fn scan_proc_for_holder(path: &Path) -> Option<u32> {
    let target = fs::canonicalize(path).ok()?;
    let own = std::process::id();

    for entry in fs::read_dir("/proc").ok()?.flatten() {
        let pid: u32 = match entry.file_name().to_str().and_then(|s| s.parse().ok()) {
            Some(pid) if pid != own && is_signalable(pid) => pid,
            _ => continue,
        };
        let Ok(fds) = fs::read_dir(entry.path().join("fd")) else {
            continue;
        };
        for fd in fds.flatten() {
            if fs::read_link(fd.path()).map_or(false, |link| link == target) {
                debug!(pid = pid, path = %path.display(), "Found lock holder via /proc");
                return Some(pid);
            }
        }
    }
    None
}
