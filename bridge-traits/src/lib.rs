//! # Host Bridge Traits
//!
//! Contracts between the playback core and the things it does not own: the
//! native decode engine, the platform audio output, the UI thread, and the
//! remote catalog.
//!
//! ## Traits
//!
//! ### Decode Engine
//! - [`EngineBackend`](engine::EngineBackend) - Creates engine instances and exposes the PCM ring
//! - [`EngineInstance`](engine::EngineInstance) - Transport calls on one live instance
//! - [`EngineAudioBuffer`](engine::EngineAudioBuffer) - Ring region, write cursor, read cursor publication
//!
//! ### Audio Output
//! - [`AudioOutputHost`](playback::AudioOutputHost) - Format probing and stream creation
//! - [`QuantumSource`](playback::QuantumSource) - Pull-based PCM supplier for the render thread
//! - [`RenderStream`](playback::RenderStream) - Start/stop handle on a live stream
//!
//! ### Platform Integration
//! - [`UiExecutor`](background::UiExecutor) - Posts notifications onto the UI thread
//! - [`TrackMetadataProvider`](metadata::TrackMetadataProvider) - Catalog lookups by track id
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for credential expiry
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Platform Requirements
//!
//! | Platform | Implementation Crate | Status |
//! |----------|---------------------|--------|
//! | Desktop  | `bridge-desktop`    | ✅ Output + UI executor |
//! | Engine   | host-provided FFI   | 📋 Injected at runtime |
//!
//! ## Fail-Fast Strategy
//!
//! The core fails fast with descriptive errors when a required capability is
//! missing:
//!
//! ```ignore
//! let backend = builder.engine_backend
//!     .ok_or_else(|| Error::CapabilityMissing {
//!         capability: "EngineBackend".to_string(),
//!         message: "No decode engine backend provided.".to_string(),
//!     })?;
//! ```
//!
//! ## Thread Safety
//!
//! Every bridge here is touched by at least two threads (application thread
//! plus an engine or audio thread). Bounds are expressed through the marker
//! traits in [`platform`].

pub mod background;
pub mod engine;
pub mod error;
pub mod metadata;
pub mod platform;
pub mod playback;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use background::{ImmediateExecutor, UiExecutor, UiJob};
pub use engine::{
    Bitrate, DeviceType, EngineAudioBuffer, EngineBackend, EngineConfig, EngineEvent,
    EngineEventCallback, EngineInstance, EngineRegion, EngineSampleFormat, PcmDescriptor,
    PlaybackState, RepeatMode, SessionState, TrackInfo,
};
pub use metadata::{Credential, TrackMetadata, TrackMetadataProvider};
pub use playback::{AudioFormat, AudioOutputHost, QuantumSource, RenderStream, SampleEncoding};
pub use time::{Clock, LogEntry, LogLevel, LoggerSink, ManualClock, SystemClock};
