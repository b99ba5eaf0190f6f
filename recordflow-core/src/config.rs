//! Environment-driven settings
//!
//! Resolves where prepared datasets live and the loader defaults.

use std::path::PathBuf;

/// Root directory for prepared datasets
pub const DATA_DIR_ENV: &str = "RECORDFLOW_DATA_DIR";

/// Default loader worker count
pub const WORKER_COUNT_ENV: &str = "RECORDFLOW_WORKER_COUNT";

/// Tracing filter for the binaries
pub const LOG_ENV: &str = "RECORDFLOW_LOG";

/// Directory name used under `$HOME` when no data dir is configured
const DEFAULT_DATA_DIR_NAME: &str = "recordflow_datasets";

/// Process-wide settings
#[derive(Debug, Clone)]
pub struct Settings {
    /// Root directory holding `<name>/<version>/` dataset trees
    pub data_dir: PathBuf,
    /// Default number of loader workers
    pub worker_count: usize,
    /// Tracing filter directive
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            worker_count: 0,
            log_filter: "info".into(),
        }
    }
}

impl Settings {
    /// Load settings from the environment, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            data_dir: std::env::var(DATA_DIR_ENV)
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            worker_count: std::env::var(WORKER_COUNT_ENV)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.worker_count),
            log_filter: std::env::var(LOG_ENV).unwrap_or(defaults.log_filter),
        }
    }

    /// Override the data directory
    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }
}

/// `$HOME/recordflow_datasets`, or a relative directory when HOME is unset
fn default_data_dir() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) if !home.is_empty() => PathBuf::from(home).join(DEFAULT_DATA_DIR_NAME),
        _ => PathBuf::from(DEFAULT_DATA_DIR_NAME),
    }
}

/// Resolve an optional explicit data dir against the environment
pub fn resolve_data_dir(explicit: Option<PathBuf>) -> PathBuf {
    explicit.unwrap_or_else(|| Settings::from_env().data_dir)
}

/// Install the fmt subscriber used by the binaries
///
/// Logs go to stderr so command output on stdout stays machine readable.
pub fn init_tracing(filter: &str) {
    let filter = tracing_subscriber::EnvFilter::try_new(filter)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_data_dir_wins() {
        let dir = resolve_data_dir(Some(PathBuf::from("/tmp/explicit")));
        assert_eq!(dir, PathBuf::from("/tmp/explicit"));
    }

    #[test]
    fn test_default_ends_with_dir_name() {
        let settings = Settings::default();
        assert!(settings.data_dir.ends_with(DEFAULT_DATA_DIR_NAME));
        assert_eq!(settings.worker_count, 0);
    }
}
