//! # Playback Configuration
//!
//! Tuning for format probing, the engine buffer wait, the frame pool, and
//! the engine event channel.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{PlaybackError, Result};

/// Playback pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Sample rate used when probing the output host.
    ///
    /// Default: 44100 Hz.
    #[serde(default = "default_probe_sample_rate")]
    pub probe_sample_rate: u32,

    /// Channel count used when probing the output host.
    ///
    /// Default: 2.
    #[serde(default = "default_probe_channels")]
    pub probe_channels: u16,

    /// Interval between checks for the engine's ring region.
    ///
    /// Default: 50 ms.
    #[serde(default = "default_buffer_poll_interval")]
    pub buffer_poll_interval: Duration,

    /// Give up waiting for the engine's ring region after this long.
    ///
    /// Default: 5 seconds.
    #[serde(default = "default_buffer_wait_timeout")]
    pub buffer_wait_timeout: Duration,

    /// Idle frames kept by the frame pool.
    ///
    /// Default: 6.
    #[serde(default = "default_frame_pool_size")]
    pub frame_pool_size: usize,

    /// Samples per frame the pool pre-allocates for. 441 samples is 10 ms at
    /// 44.1 kHz, the quantum most render graphs request.
    ///
    /// Default: 441.
    #[serde(default = "default_nominal_quantum_samples")]
    pub nominal_quantum_samples: usize,

    /// Engine events buffered between the engine thread and the session pump.
    /// Events beyond this are dropped with a warning.
    ///
    /// Default: 256.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            probe_sample_rate: default_probe_sample_rate(),
            probe_channels: default_probe_channels(),
            buffer_poll_interval: default_buffer_poll_interval(),
            buffer_wait_timeout: default_buffer_wait_timeout(),
            frame_pool_size: default_frame_pool_size(),
            nominal_quantum_samples: default_nominal_quantum_samples(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

impl PlaybackConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.probe_sample_rate == 0 {
            return Err(PlaybackError::Config(
                "probe_sample_rate must be > 0".to_string(),
            ));
        }

        if self.probe_channels == 0 {
            return Err(PlaybackError::Config("probe_channels must be > 0".to_string()));
        }

        if self.buffer_poll_interval.is_zero() {
            return Err(PlaybackError::Config(
                "buffer_poll_interval must be > 0".to_string(),
            ));
        }

        if self.buffer_wait_timeout < self.buffer_poll_interval {
            return Err(PlaybackError::Config(
                "buffer_wait_timeout cannot be shorter than buffer_poll_interval".to_string(),
            ));
        }

        if self.nominal_quantum_samples == 0 {
            return Err(PlaybackError::Config(
                "nominal_quantum_samples must be > 0".to_string(),
            ));
        }

        if self.event_channel_capacity == 0 {
            return Err(PlaybackError::Config(
                "event_channel_capacity must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

// Default value functions for serde

fn default_probe_sample_rate() -> u32 {
    44_100
}

fn default_probe_channels() -> u16 {
    2
}

fn default_buffer_poll_interval() -> Duration {
    Duration::from_millis(50)
}

fn default_buffer_wait_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_frame_pool_size() -> usize {
    6
}

fn default_nominal_quantum_samples() -> usize {
    441
}

fn default_event_channel_capacity() -> usize {
    256
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PlaybackConfig::default();
        assert_eq!(config.probe_sample_rate, 44_100);
        assert_eq!(config.probe_channels, 2);
        assert_eq!(config.buffer_poll_interval, Duration::from_millis(50));
        assert_eq!(config.buffer_wait_timeout, Duration::from_secs(5));
        assert_eq!(config.frame_pool_size, 6);
        assert_eq!(config.nominal_quantum_samples, 441);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pool_size_zero_is_valid() {
        let config = PlaybackConfig {
            frame_pool_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_timeout_shorter_than_poll_rejected() {
        let config = PlaybackConfig {
            buffer_wait_timeout: Duration::from_millis(10),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(PlaybackError::Config(_))));
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let config: PlaybackConfig = serde_json::from_str(r#"{"frame_pool_size": 3}"#).unwrap();
        assert_eq!(config.frame_pool_size, 3);
        assert_eq!(config.nominal_quantum_samples, 441);
        assert_eq!(config.event_channel_capacity, 256);
    }
}
