//! # Playback Error Types
//!
//! Errors raised by format negotiation, the ring buffer bridge, and the
//! playback engine session.

use std::time::Duration;

use bridge_traits::BridgeError;
use thiserror::Error;

/// Errors that can occur during playback operations.
#[derive(Error, Debug)]
pub enum PlaybackError {
    // ========================================================================
    // Format Errors
    // ========================================================================
    /// No candidate PCM layout is accepted by both the host and the engine.
    #[error("No PCM format is supported by both the output device and the engine")]
    NoCompatibleFormat,

    /// Format parameters are unusable (zero channels, zero-width samples).
    #[error("Invalid audio format: {0}")]
    InvalidFormat(String),

    // ========================================================================
    // Engine Errors
    // ========================================================================
    /// The engine refused to create an instance.
    #[error("Engine creation failed: {0}")]
    EngineCreationFailed(String),

    /// The engine reported an unrecoverable state.
    #[error("Engine panicked: {0}")]
    EnginePanicked(String),

    /// `initialize()` has not completed.
    #[error("Playback session not initialized")]
    NotInitialized,

    /// An operation required a live engine instance.
    #[error("No connected engine instance")]
    NotConnected,

    /// A caller-supplied value was rejected before reaching the engine.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // ========================================================================
    // Ring Buffer Errors
    // ========================================================================
    /// The engine never published its ring region.
    #[error("Engine ring buffer not available after {waited:?}")]
    RingBufferTimeout { waited: Duration },

    /// The engine published a region the bridge cannot use.
    #[error("Invalid engine ring buffer: {0}")]
    InvalidRingBuffer(String),

    /// The bridge was used after disposal.
    #[error("Ring buffer bridge disposed")]
    BridgeDisposed,

    // ========================================================================
    // Platform/Adapter Errors
    // ========================================================================
    /// Platform audio device encountered an error.
    #[error("Audio device error: {0}")]
    AudioDeviceError(String),

    /// Host bridge failure.
    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    // ========================================================================
    // Generic Errors
    // ========================================================================
    /// Configuration value out of range.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error (should not occur in normal operation).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PlaybackError {
    /// Returns `true` if the session must be torn down after this error.
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(
            self,
            PlaybackError::RingBufferTimeout { .. }
                | PlaybackError::EngineCreationFailed(_)
                | PlaybackError::EnginePanicked(_)
                | PlaybackError::InvalidRingBuffer(_)
        )
    }

    /// Returns `true` if this error is transient and the operation can be retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PlaybackError::AudioDeviceError(_)
                | PlaybackError::NotConnected
                | PlaybackError::Bridge(BridgeError::OperationFailed(_))
        )
    }

    /// Returns `true` if this error is related to PCM format issues.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            PlaybackError::NoCompatibleFormat | PlaybackError::InvalidFormat(_)
        )
    }
}

/// Result type for playback operations.
pub type Result<T> = std::result::Result<T, PlaybackError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(PlaybackError::RingBufferTimeout {
            waited: Duration::from_secs(5)
        }
        .is_fatal_to_session());
        assert!(PlaybackError::EnginePanicked("x".into()).is_fatal_to_session());
        assert!(!PlaybackError::NotConnected.is_fatal_to_session());
        assert!(!PlaybackError::NoCompatibleFormat.is_fatal_to_session());
    }

    #[test]
    fn test_format_and_transient_classification() {
        assert!(PlaybackError::NoCompatibleFormat.is_format_error());
        assert!(!PlaybackError::NoCompatibleFormat.is_transient());
        assert!(PlaybackError::from(BridgeError::OperationFailed("busy".into())).is_transient());
    }

    #[test]
    fn test_timeout_message_includes_duration() {
        let err = PlaybackError::RingBufferTimeout {
            waited: Duration::from_secs(5),
        };
        assert_eq!(err.to_string(), "Engine ring buffer not available after 5s");
    }
}
