//! Configuration for the SFTP engine and its reference handler.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root directory the reference `handlers::fs` backend resolves
    /// every path argument against.
    pub root_dir: PathBuf,

    /// Reject all write-intent operations (`OPEN` with write access,
    /// `REMOVE`, `MKDIR`, `RMDIR`, `RENAME`, `SYMLINK`, any
    /// `SETSTAT`/`FSETSTAT`) with `PERMISSION_DENIED`.
    pub readonly: bool,

    /// Swap the wire order of `SYMLINK`'s path arguments for v3 clients
    /// (OpenSSH historical accident; see the symlink-order REDESIGN
    /// FLAG) and flip the advertised `symlink-order@…` extension value
    /// to match.
    pub reverse_symlink: bool,

    /// Worker pool size. The pool is instantiated lazily; this only
    /// governs how many concurrent workers exist once it is.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Bounded work-queue capacity; a full queue blocks the reader task
    /// (backpressure).
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("/srv/sftp"),
            readonly: false,
            reverse_symlink: false,
            pool_size: default_pool_size(),
            queue_capacity: default_queue_capacity(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,
    /// Log format (text or json).
    pub format: LogFormat,
    /// Optional log file path (logs to stderr if not specified).
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            file: None,
        }
    }
}

/// Log format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Plain text logging for human readability.
    Text,
    /// JSON structured logging, one object per line.
    Json,
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns [`crate::Error::Config`] if the file cannot be read or
    /// does not parse as valid configuration TOML.
    pub fn from_file(path: &str) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("failed to read config file: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Validate configuration invariants that `serde` cannot express.
    ///
    /// # Errors
    /// Returns [`crate::Error::Config`] if `root_dir` does not exist or
    /// is not a directory, or if `pool_size`/`queue_capacity` is zero.
    pub fn validate(&self) -> crate::Result<()> {
        if !self.root_dir.exists() {
            return Err(crate::Error::Config(format!(
                "root directory does not exist: {:?}",
                self.root_dir
            )));
        }
        if !self.root_dir.is_dir() {
            return Err(crate::Error::Config(format!(
                "root path is not a directory: {:?}",
                self.root_dir
            )));
        }
        if self.pool_size == 0 {
            return Err(crate::Error::Config("pool_size must be at least 1".to_string()));
        }
        if self.queue_capacity == 0 {
            return Err(crate::Error::Config(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_pool_size() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    64
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_has_reference_pool_size() {
        let config = Config::default();
        assert_eq!(config.pool_size, 4);
    }

    #[test]
    fn validate_rejects_missing_root_dir() {
        let mut config = Config::default();
        config.root_dir = PathBuf::from("/nonexistent/path/for/sftp-core/tests");
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_accepts_existing_directory() {
        let dir = std::env::temp_dir();
        let mut config = Config::default();
        config.root_dir = dir;
        config.validate().unwrap();
    }

    #[test]
    fn from_file_parses_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "root_dir = \"/tmp\"\nreadonly = true\npool_size = 8").unwrap();
        let config = Config::from_file(file.path().to_str().unwrap()).unwrap();
        assert!(config.readonly);
        assert_eq!(config.pool_size, 8);
    }
}
