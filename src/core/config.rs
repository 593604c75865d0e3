//! Fetch configuration
//!
//! Every knob has a default; a JSON file can override any subset of them and
//! the CLI overrides the file.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::buffer::DEFAULT_BUFFER_CAPACITY;
use crate::core::error::{Error, Result};
use crate::core::planner::MAX_PARALLEL;

/// Settings for the HTTP transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub connect_timeout_secs: u64,
    /// Whole-request timeout; 0 disables it
    pub request_timeout_secs: u64,
    pub user_agent: String,
    pub max_redirects: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            request_timeout_secs: 0,
            user_agent: format!("rangefetch/{}", env!("RANGEFETCH_VERSION")),
            max_redirects: 10,
        }
    }
}

impl TransportConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }
}

/// Settings for one fetch session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Wave length and buffer capacity in bytes
    pub chunk_size: usize,
    /// Sub-requests per full wave
    pub max_parallel: usize,
    /// Publish the discovery response headers ahead of the body
    pub include_headers: bool,
    /// Upper bound on a single readiness wait in blocking drivers
    pub poll_timeout_ms: u64,
    pub transport: TransportConfig,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_BUFFER_CAPACITY,
            max_parallel: MAX_PARALLEL,
            include_headers: true,
            poll_timeout_ms: 100,
            transport: TransportConfig::default(),
        }
    }
}

impl FetchConfig {
    /// Load a JSON configuration file; missing fields keep their defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: FetchConfig = serde_json::from_str(&text)?;
        config.validate()?;
        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_parallel == 0 || self.max_parallel > MAX_PARALLEL {
            return Err(Error::InvalidInput(format!(
                "max_parallel must be between 1 and {MAX_PARALLEL}, got {}",
                self.max_parallel
            )));
        }
        if self.chunk_size < self.max_parallel {
            return Err(Error::InvalidInput(format!(
                "chunk_size ({}) must be at least max_parallel ({})",
                self.chunk_size, self.max_parallel
            )));
        }
        if self.poll_timeout_ms == 0 {
            return Err(Error::InvalidInput(
                "poll_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_are_valid() {
        let config = FetchConfig::default();
        assert_eq!(config.chunk_size, 1024 * 1024);
        assert_eq!(config.max_parallel, 6);
        assert!(config.include_headers);
        assert!(config.validate().is_ok());
        assert!(config.transport.user_agent.starts_with("rangefetch/"));
        assert_eq!(config.transport.request_timeout(), None);
    }

    #[test]
    fn test_validate_rejects_bad_parallelism() {
        let mut config = FetchConfig::default();
        config.max_parallel = 0;
        assert!(config.validate().is_err());
        config.max_parallel = 7;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_tiny_chunk() {
        let config = FetchConfig {
            chunk_size: 3,
            max_parallel: 4,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_load_partial_json() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"chunk_size": 4096, "include_headers": false, "transport": {{"connect_timeout_secs": 3}}}}"#
        )
        .unwrap();

        let config = FetchConfig::load(file.path()).unwrap();
        assert_eq!(config.chunk_size, 4096);
        assert!(!config.include_headers);
        assert_eq!(config.max_parallel, MAX_PARALLEL);
        assert_eq!(config.transport.connect_timeout(), Duration::from_secs(3));
        assert_eq!(config.transport.max_redirects, 10);
    }

    #[test]
    fn test_load_rejects_malformed_json() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(matches!(
            FetchConfig::load(file.path()),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            FetchConfig::load("/nonexistent/rangefetch.json"),
            Err(Error::IoError(_))
        ));
    }
}
