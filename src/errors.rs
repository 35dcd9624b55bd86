// Error taxonomy and user-friendly error messages
//
// Typed errors for every failure the launcher can hit, plus helpers that
// turn the fatal ones into actionable messages for the operator.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures of the launch, lock, serve and drain phases
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Lock file could not be created or opened
    #[error("failed to open lock file {}: {source}", .path.display())]
    Lock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Another live process holds the lock file
    #[error("lock file {} is held by another instance{}", .path.display(), holder_suffix(.pid))]
    LockHeld { path: PathBuf, pid: Option<u32> },

    /// Re-executing the binary as a detached child failed
    #[error("failed to spawn daemon {}: {source}", .exe.display())]
    Spawn {
        exe: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Server could not bind or stopped accepting
    #[error("HTTP server failed on {address}: {source}")]
    Listen {
        address: String,
        #[source]
        source: io::Error,
    },

    /// Drain sequence ended abnormally
    #[error("graceful drain failed: {0}")]
    Drain(String),

    /// Signal handlers could not be installed or the signal could not be sent
    #[error("signal error: {0}")]
    Signal(String),

    /// Config file unreadable or malformed
    #[error("invalid configuration {}: {message}", .path.display())]
    Config { path: PathBuf, message: String },
}

fn holder_suffix(pid: &Option<u32>) -> String {
    match pid {
        Some(pid) => format!(" (PID: {})", pid),
        None => String::new(),
    }
}

/// Format an instance-already-running error
pub fn instance_already_running_error(lock_path: &str, pid: Option<u32>) -> String {
    let holder = match pid {
        Some(pid) => format!("PID: {}", pid),
        None => "PID unknown".to_string(),
    };
    format!(
        "Another ginga instance is already running ({})\n\n\
        \x1b[1;33mLock file:\x1b[0m {}\n\n\
        \x1b[1;32mTry:\x1b[0m\n\
        1. Replace it with a fresh background instance:\n\
           \x1b[36mginga daemon\x1b[0m\n\n\
        2. Stop the running instance:\n\
           \x1b[36mginga stop\x1b[0m",
        holder, lock_path
    )
}

/// Wrap a generic error with a suggestion
pub fn wrap_error_with_suggestion(error: impl fmt::Display, suggestion: &str) -> String {
    format!(
        "{}\n\n\
        \x1b[1;33mSuggestion:\x1b[0m {}",
        error, suggestion
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_held_display_includes_pid() {
        let err = LaunchError::LockHeld {
            path: PathBuf::from("Ginga.lock"),
            pid: Some(4242),
        };
        let msg = err.to_string();
        assert!(msg.contains("Ginga.lock"));
        assert!(msg.contains("4242"));

        let err = LaunchError::LockHeld {
            path: PathBuf::from("Ginga.lock"),
            pid: None,
        };
        assert!(!err.to_string().contains("PID"));
    }

    #[test]
    fn test_already_running_has_helpful_message() {
        let msg = instance_already_running_error("Ginga.lock", Some(7));
        assert!(msg.contains("PID: 7"));
        assert!(msg.contains("ginga stop"));
        assert!(msg.contains("ginga daemon"));
    }

    #[test]
    fn test_spawn_error_keeps_source() {
        use std::error::Error as _;

        let err = LaunchError::Spawn {
            exe: PathBuf::from("/nonexistent/ginga"),
            source: io::Error::new(io::ErrorKind::NotFound, "no such file"),
        };
        assert!(err.source().is_some());
        assert!(err.to_string().contains("/nonexistent/ginga"));
    }
}
