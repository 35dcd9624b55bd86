// Configuration structs

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Default listen address when neither `-ip` nor the config file sets one
pub const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0:5200";

/// Default lock file, relative to the working directory
pub const DEFAULT_LOCK_FILE: &str = "Ginga.lock";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bind address (host:port)
    pub listen_address: String,

    /// Single-instance lock file
    pub lock_file: PathBuf,

    pub stream: StreamConfig,

    pub shutdown: ShutdownConfig,

    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_address: DEFAULT_LISTEN_ADDRESS.to_string(),
            lock_file: PathBuf::from(DEFAULT_LOCK_FILE),
            stream: StreamConfig::default(),
            shutdown: ShutdownConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Shape of the `/chunked` response
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Number of numbered fragments between the opening and closing markup
    pub fragments: usize,

    /// Delay after each numbered fragment, in milliseconds
    pub interval_ms: u64,
}

impl StreamConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            fragments: 10,
            interval_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Upper bound on the graceful drain; 0 waits for in-flight streams forever
    pub drain_timeout_secs: u64,

    /// How long `daemon` mode waits for a terminated stale instance to release the lock
    pub stale_wait_ms: u64,
}

impl ShutdownConfig {
    pub fn drain_timeout(&self) -> Option<Duration> {
        match self.drain_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn stale_wait(&self) -> Duration {
        Duration::from_millis(self.stale_wait_ms)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout_secs: 30,
            stale_wait_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    pub level: String,

    /// Append logs to this file in addition to stderr
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}
