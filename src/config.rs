//! Engine configuration.

use crate::error::{PipelineError, Result};
use crate::statistics::DEFAULT_WINDOW_LENGTH;
use serde::{Deserialize, Serialize};

/// Tunables for a [`Pipeline`](crate::Pipeline).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Load above which the pipeline reports itself overloaded
    #[serde(default = "default_max_capacity")]
    pub max_capacity: usize,

    /// Bound of the entry queue and of every inter-stage queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Samples kept per stage by the statistics recorder
    #[serde(default = "default_statistics_window")]
    pub statistics_window: usize,
}

fn default_max_capacity() -> usize {
    16
}

fn default_queue_capacity() -> usize {
    64
}

fn default_statistics_window() -> usize {
    DEFAULT_WINDOW_LENGTH
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_capacity: default_max_capacity(),
            queue_capacity: default_queue_capacity(),
            statistics_window: default_statistics_window(),
        }
    }
}

impl PipelineConfig {
    /// Default configuration with the given maximum capacity
    pub fn with_max_capacity(max_capacity: usize) -> Self {
        Self {
            max_capacity,
            ..Self::default()
        }
    }

    /// Set the queue capacity
    pub fn queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    /// Set the statistics window length
    pub fn statistics_window(mut self, statistics_window: usize) -> Self {
        self.statistics_window = statistics_window;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_capacity == 0 {
            return Err(PipelineError::ConfigError(
                "max_capacity must be positive".into(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(PipelineError::ConfigError(
                "queue_capacity must be positive".into(),
            ));
        }
        if self.statistics_window == 0 {
            return Err(PipelineError::ConfigError(
                "statistics_window must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_capacity, 16);
        assert_eq!(config.queue_capacity, 64);
        assert_eq!(config.statistics_window, 500);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: PipelineConfig = serde_json::from_str(r#"{ "max_capacity": 4 }"#).unwrap();
        assert_eq!(config, PipelineConfig::with_max_capacity(4));
    }

    #[test]
    fn test_zero_values_rejected() {
        assert!(PipelineConfig::with_max_capacity(0).validate().is_err());
        assert!(PipelineConfig::default().queue_capacity(0).validate().is_err());
        assert!(PipelineConfig::default().statistics_window(0).validate().is_err());
    }
}
