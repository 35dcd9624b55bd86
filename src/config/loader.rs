// Configuration loader
// Loads settings from an explicit path, ./ginga.toml, or built-in defaults

use std::fs;
use std::path::{Path, PathBuf};

use super::settings::Config;
use crate::errors::LaunchError;

/// Config file picked up from the working directory when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "ginga.toml";

/// Load configuration
///
/// An explicit path must exist. Without one, `./ginga.toml` is used when
/// present and the defaults otherwise.
pub fn load_config(explicit: Option<&Path>) -> Result<Config, LaunchError> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => {
            let candidate = PathBuf::from(DEFAULT_CONFIG_FILE);
            if !candidate.exists() {
                return Ok(Config::default());
            }
            candidate
        }
    };

    let contents = fs::read_to_string(&path).map_err(|e| LaunchError::Config {
        path: path.clone(),
        message: e.to_string(),
    })?;

    parse_config(&path, &contents)
}

/// Parse TOML contents; missing keys fall back to defaults
pub fn parse_config(path: &Path, contents: &str) -> Result<Config, LaunchError> {
    let config: Config = toml::from_str(contents).map_err(|e| LaunchError::Config {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    if config.listen_address.trim().is_empty() {
        return Err(LaunchError::Config {
            path: path.to_path_buf(),
            message: "listen_address must not be empty".to_string(),
        });
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_empty_file_yields_defaults() {
        let config = parse_config(Path::new("ginga.toml"), "").unwrap();
        assert_eq!(config.listen_address, "0.0.0.0:5200");
        assert_eq!(config.lock_file, PathBuf::from("Ginga.lock"));
        assert_eq!(config.stream.fragments, 10);
        assert_eq!(config.stream.interval(), Duration::from_secs(1));
        assert_eq!(config.shutdown.drain_timeout(), Some(Duration::from_secs(30)));
        assert!(config.logging.file.is_none());
    }

    #[test]
    fn test_partial_override() {
        let toml = r#"
            listen_address = "127.0.0.1:9000"

            [stream]
            interval_ms = 50

            [shutdown]
            drain_timeout_secs = 0

            [logging]
            file = "ginga.log"
        "#;
        let config = parse_config(Path::new("ginga.toml"), toml).unwrap();
        assert_eq!(config.listen_address, "127.0.0.1:9000");
        assert_eq!(config.stream.fragments, 10);
        assert_eq!(config.stream.interval(), Duration::from_millis(50));
        assert_eq!(config.shutdown.drain_timeout(), None);
        assert_eq!(config.logging.file, Some(PathBuf::from("ginga.log")));
    }

    #[test]
    fn test_malformed_toml_is_config_error() {
        let err = parse_config(Path::new("bad.toml"), "listen_address = [").unwrap_err();
        assert!(matches!(err, LaunchError::Config { .. }));
        assert!(err.to_string().contains("bad.toml"));
    }

    #[test]
    fn test_empty_listen_address_rejected() {
        let err = parse_config(Path::new("ginga.toml"), "listen_address = \"  \"").unwrap_err();
        assert!(err.to_string().contains("listen_address"));
    }

    #[test]
    fn test_explicit_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(load_config(Some(&missing)).is_err());
    }

    #[test]
    fn test_explicit_file_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ginga.toml");
        std::fs::write(&path, "lock_file = \"/tmp/other.lock\"\n").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.lock_file, PathBuf::from("/tmp/other.lock"));
    }
}
