//! # Playback Module
//!
//! Real-time delivery of engine PCM to the platform audio output.
//!
//! ## Overview
//!
//! This module handles:
//! - PCM format negotiation between the engine and the output host
//! - Reading the engine's ring region without copying past its write cursor
//! - Pooled frame buffers for the render callback
//! - Engine instance lifecycle, transports, and event relaying

pub mod bridge;
pub mod config;
pub mod error;
pub mod format;
pub mod frame_pool;
pub mod ring_buffer;
pub mod session;

#[cfg(test)]
pub(crate) mod test_support;

pub use bridge::{BridgeMonitor, BridgeState, BridgeStats, RingBufferBridge};
pub use config::PlaybackConfig;
pub use error::{PlaybackError, Result};
pub use format::{FormatNegotiator, NegotiatedFormat, CANDIDATE_FORMATS};
pub use frame_pool::{FramePool, FrameWriteGuard, PooledFrame};
pub use ring_buffer::EngineRingBuffer;
pub use session::{PlaybackEngineSession, SessionSnapshot};
