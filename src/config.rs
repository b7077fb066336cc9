use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cli::Args;
use crate::defaults;
use crate::error::{Result, StatsError};

/// Runtime configuration of the stats subsystem.
///
/// Missing fields in a configuration file fall back to [`crate::defaults`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Filesystem path of the control socket.
    pub socket_path: PathBuf,
    /// Slots in every plugin's datapoint ring.
    pub buffer_capacity: usize,
    /// Pending-connection backlog of the control socket.
    pub listen_backlog: i32,
    /// Period of the flush tick, in milliseconds.
    pub tick_interval_ms: u64,
    /// Upper bound on readiness events handled per wait.
    pub max_events: usize,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(defaults::SOCKET_PATH),
            buffer_capacity: defaults::BUFFER_CAPACITY,
            listen_backlog: defaults::LISTEN_BACKLOG,
            tick_interval_ms: defaults::TICK_INTERVAL.as_millis() as u64,
            max_events: defaults::MAX_EVENTS,
        }
    }
}

impl StatsConfig {
    /// Load a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Build the configuration for the binary: the optional file first, then
    /// any command-line overrides.
    pub fn from_args(args: &Args) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        if let Some(path) = &args.socket_path {
            config.socket_path = path.clone();
        }
        if let Some(capacity) = args.buffer_capacity {
            config.buffer_capacity = capacity;
        }
        if let Some(backlog) = args.backlog {
            config.listen_backlog = backlog;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.socket_path.as_os_str().is_empty() {
            return Err(StatsError::Config("socket_path must not be empty".into()));
        }
        if self.buffer_capacity == 0 {
            return Err(StatsError::Config("buffer_capacity must be greater than 0".into()));
        }
        if self.listen_backlog <= 0 {
            return Err(StatsError::Config("listen_backlog must be greater than 0".into()));
        }
        if self.tick_interval_ms == 0 {
            return Err(StatsError::Config("tick_interval_ms must be greater than 0".into()));
        }
        if self.max_events == 0 {
            return Err(StatsError::Config("max_events must be greater than 0".into()));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_stats_config_default() {
        let config = StatsConfig::default();

        assert_eq!(config.socket_path, PathBuf::from("/tmp/forwarder-stats.sock"));
        assert_eq!(config.buffer_capacity, 60);
        assert_eq!(config.listen_backlog, 5);
        assert_eq!(config.tick_interval(), Duration::from_secs(1));
        assert_eq!(config.max_events, 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let zero_capacity = StatsConfig {
            buffer_capacity: 0,
            ..Default::default()
        };
        assert!(matches!(zero_capacity.validate(), Err(StatsError::Config(_))));

        let zero_tick = StatsConfig {
            tick_interval_ms: 0,
            ..Default::default()
        };
        assert!(zero_tick.validate().is_err());

        let empty_path = StatsConfig {
            socket_path: PathBuf::new(),
            ..Default::default()
        };
        assert!(empty_path.validate().is_err());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "buffer_capacity": 10, "socket_path": "/tmp/x.sock" }}"#).unwrap();

        let config = StatsConfig::from_file(file.path()).unwrap();
        assert_eq!(config.buffer_capacity, 10);
        assert_eq!(config.socket_path, PathBuf::from("/tmp/x.sock"));
        assert_eq!(config.listen_backlog, defaults::LISTEN_BACKLOG);
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            StatsConfig::from_file(file.path()),
            Err(StatsError::ConfigFile(_))
        ));
    }

    #[test]
    fn test_args_override_file_values() {
        let args = Args {
            socket_path: Some(PathBuf::from("/tmp/override.sock")),
            buffer_capacity: Some(3),
            ..Default::default()
        };
        let config = StatsConfig::from_args(&args).unwrap();
        assert_eq!(config.socket_path, PathBuf::from("/tmp/override.sock"));
        assert_eq!(config.buffer_capacity, 3);
        assert_eq!(config.max_events, defaults::MAX_EVENTS);
    }
}
