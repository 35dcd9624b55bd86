// Configuration module
// Public interface for configuration loading

mod loader;
mod settings;

pub use loader::{load_config, parse_config, DEFAULT_CONFIG_FILE};
pub use settings::{
    Config, LoggingConfig, ShutdownConfig, StreamConfig, DEFAULT_LISTEN_ADDRESS, DEFAULT_LOCK_FILE,
};
