// Instance lifecycle management
//
// Status, stop and stale-instance replacement, all driven by the lock file.

use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use super::lock::{detect_holder, terminate, wait_for_release};
use crate::errors::LaunchError;

/// What the lock file says about the running instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStatus {
    /// Nobody holds the lock
    Stopped,
    /// Lock is held; PID is known unless the holder could not be identified
    Running { pid: Option<u32> },
}

/// Inspect the lock file
pub fn instance_status(lock_path: &Path) -> Result<InstanceStatus, LaunchError> {
    if super::lock::is_locked(lock_path)? {
        Ok(InstanceStatus::Running {
            pid: detect_holder(lock_path)?,
        })
    } else {
        Ok(InstanceStatus::Stopped)
    }
}

/// Terminate the instance holding `lock_path` and wait up to `wait` for it to let go
///
/// Returns the PID that was signalled, or `None` if no instance was running.
pub async fn stop_instance(lock_path: &Path, wait: Duration) -> Result<Option<u32>, LaunchError> {
    let Some(pid) = detect_holder(lock_path)? else {
        return Ok(None);
    };

    terminate(pid)?;
    if wait_for_release(lock_path, wait).await? {
        info!(pid = pid, "Instance stopped");
        Ok(Some(pid))
    } else {
        Err(LaunchError::Signal(format!(
            "instance {} did not release {} within {:?}",
            pid,
            lock_path.display(),
            wait
        )))
    }
}

/// Terminate a previous instance before a new one is launched
///
/// Best effort: the termination request always precedes the new spawn, but
/// the old process may still be running when `wait` lapses. The new
/// instance's own lock acquisition decides the outcome in that case.
pub async fn replace_stale_instance(
    lock_path: &Path,
    wait: Duration,
) -> Result<Option<u32>, LaunchError> {
    let Some(pid) = detect_holder(lock_path)? else {
        return Ok(None);
    };

    println!("Detected a running ginga instance, PID {}", pid);
    if !terminate(pid)? {
        return Ok(Some(pid));
    }

    if !wait_for_release(lock_path, wait).await? {
        warn!(
            pid = pid,
            lock = %lock_path.display(),
            "Previous instance still holds the lock; the new instance may fail to start"
        );
    }
    Ok(Some(pid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::LockGuard;
    use tempfile::TempDir;

    #[test]
    fn test_status_follows_lock() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("Ginga.lock");

        assert_eq!(instance_status(&lock_path).unwrap(), InstanceStatus::Stopped);

        let guard = LockGuard::acquire(&lock_path).unwrap();
        assert_eq!(
            instance_status(&lock_path).unwrap(),
            InstanceStatus::Running {
                pid: Some(std::process::id())
            }
        );

        drop(guard);
        assert_eq!(instance_status(&lock_path).unwrap(), InstanceStatus::Stopped);
    }

    #[tokio::test]
    async fn test_nothing_to_replace_or_stop() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("Ginga.lock");

        assert_eq!(
            replace_stale_instance(&lock_path, Duration::ZERO).await.unwrap(),
            None
        );
        assert_eq!(stop_instance(&lock_path, Duration::ZERO).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_never_signals_own_process() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("Ginga.lock");
        let _guard = LockGuard::acquire(&lock_path).unwrap();

        let err = stop_instance(&lock_path, Duration::ZERO).await.unwrap_err();
        assert!(matches!(err, LaunchError::Signal(_)));
    }
}
