//! Linearizer configuration

use serde::{Deserialize, Serialize};

/// Default advisory buffering ceiling (4 MiB)
pub const DEFAULT_MAX_BUFFER: u64 = 4 * 1024 * 1024;

/// Linearizer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinearizerConfig {
    /// Advisory ceiling on buffered, undelivered bytes.
    ///
    /// Never rejects data; reserved for admission control above the
    /// linearizer.
    #[serde(default = "default_max_buffer")]
    pub max_buffer: u64,

    /// Emit a warning when buffered bytes first exceed `max_buffer`
    #[serde(default = "default_true")]
    pub log_overruns: bool,
}

impl LinearizerConfig {
    /// Set the advisory buffering ceiling
    #[must_use]
    pub fn with_max_buffer(mut self, max_buffer: u64) -> Self {
        self.max_buffer = max_buffer;
        self
    }

    /// Enable or disable overrun warnings
    #[must_use]
    pub fn with_log_overruns(mut self, enabled: bool) -> Self {
        self.log_overruns = enabled;
        self
    }
}

impl Default for LinearizerConfig {
    fn default() -> Self {
        Self {
            max_buffer: DEFAULT_MAX_BUFFER,
            log_overruns: true,
        }
    }
}

fn default_max_buffer() -> u64 {
    DEFAULT_MAX_BUFFER
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LinearizerConfig::default();
        assert_eq!(config.max_buffer, DEFAULT_MAX_BUFFER);
        assert!(config.log_overruns);
    }

    #[test]
    fn test_builder() {
        let config = LinearizerConfig::default()
            .with_max_buffer(1024)
            .with_log_overruns(false);
        assert_eq!(config.max_buffer, 1024);
        assert!(!config.log_overruns);
    }

    #[test]
    fn test_deserialize_missing_fields_use_defaults() {
        let config: LinearizerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, LinearizerConfig::default());

        let config: LinearizerConfig = serde_json::from_str(r#"{"max_buffer": 64}"#).unwrap();
        assert_eq!(config.max_buffer, 64);
        assert!(config.log_overruns);
    }
}
