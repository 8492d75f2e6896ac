//! Decode engine contract.
//!
//! The native engine fetches, decrypts, and decodes audio on its own threads.
//! The core talks to it through three narrow surfaces:
//!
//! - [`EngineBackend`] constructs engine instances from an [`EngineConfig`] and
//!   exposes the process-wide PCM ring region through [`EngineAudioBuffer`].
//! - [`EngineInstance`] carries the transport calls. Dropping the box destroys
//!   the native instance.
//! - [`EngineEvent`] is delivered asynchronously through the callback registered
//!   at construction time, from an engine-owned thread.
//!
//! Host adapters (FFI wrappers, in-process engines, test doubles) implement
//! these traits; the core never sees raw handles.

use std::fmt;
use std::path::PathBuf;
use std::ptr::NonNull;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    error::Result,
    platform::{PlatformSend, PlatformSendSync},
    playback::SampleEncoding,
};

// ============================================================================
// Engine Configuration
// ============================================================================

/// PCM sample layouts the engine can emit into its ring region.
///
/// The discriminant is the numeric id the engine ABI expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EngineSampleFormat {
    F64 = 0,
    F32 = 1,
    S32 = 2,
    /// 24-bit samples padded to 4 bytes.
    S24 = 3,
    /// 24-bit samples packed into 3 bytes.
    S24_3 = 4,
    S16 = 5,
}

impl EngineSampleFormat {
    /// Numeric id understood by the engine.
    pub fn engine_id(self) -> u32 {
        self as u32
    }

    /// Resolve an engine id back to a format.
    pub fn from_engine_id(id: u32) -> Option<Self> {
        match id {
            0 => Some(Self::F64),
            1 => Some(Self::F32),
            2 => Some(Self::S32),
            3 => Some(Self::S24),
            4 => Some(Self::S24_3),
            5 => Some(Self::S16),
            _ => None,
        }
    }

    pub fn bits_per_sample(self) -> u16 {
        match self {
            Self::F64 => 64,
            Self::F32 | Self::S32 => 32,
            Self::S24 | Self::S24_3 => 24,
            Self::S16 => 16,
        }
    }

    /// Bytes one sample occupies in the ring region.
    pub fn bytes_per_sample(self) -> u16 {
        match self {
            Self::F64 => 8,
            Self::F32 | Self::S32 | Self::S24 => 4,
            Self::S24_3 => 3,
            Self::S16 => 2,
        }
    }

    pub fn encoding(self) -> SampleEncoding {
        match self {
            Self::F64 | Self::F32 => SampleEncoding::Float,
            _ => SampleEncoding::SignedInt,
        }
    }
}

/// Streaming bitrate requested from the remote service (kbps).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Bitrate {
    B96,
    B160,
    #[default]
    B320,
}

impl Bitrate {
    pub fn kbps(self) -> u32 {
        match self {
            Bitrate::B96 => 96,
            Bitrate::B160 => 160,
            Bitrate::B320 => 320,
        }
    }
}

/// Device class announced to the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    #[default]
    Computer,
    Smartphone,
    GameConsole,
    Speaker,
}

impl DeviceType {
    /// Identifier string passed to the engine.
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceType::Computer => "computer",
            DeviceType::Smartphone => "smartphone",
            DeviceType::GameConsole => "gameconsole",
            DeviceType::Speaker => "speaker",
        }
    }
}

/// Everything an engine instance needs at construction time.
#[derive(Clone)]
pub struct EngineConfig {
    pub device_name: String,
    pub device_type: DeviceType,
    pub cache_dir: PathBuf,
    pub enable_discovery: bool,
    pub enable_volume_normalisation: bool,
    pub bitrate: Bitrate,
    /// PCM layout the engine must write into its ring region.
    pub format: EngineSampleFormat,
    pub access_token: String,
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("device_name", &self.device_name)
            .field("device_type", &self.device_type)
            .field("cache_dir", &self.cache_dir)
            .field("enable_discovery", &self.enable_discovery)
            .field(
                "enable_volume_normalisation",
                &self.enable_volume_normalisation,
            )
            .field("bitrate", &self.bitrate)
            .field("format", &self.format)
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

// ============================================================================
// Playback Domain Types
// ============================================================================

/// Playback lifecycle as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PlaybackState {
    #[default]
    Stopped,
    Loading,
    Playing,
    Paused,
}

/// Repeat behaviour for the current context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RepeatMode {
    #[default]
    Off,
    Context,
    Track,
}

impl RepeatMode {
    pub fn engine_code(self) -> u32 {
        match self {
            RepeatMode::Off => 0,
            RepeatMode::Context => 1,
            RepeatMode::Track => 2,
        }
    }

    pub fn from_engine_code(code: u32) -> Self {
        match code {
            1 => RepeatMode::Context,
            2 => RepeatMode::Track,
            _ => RepeatMode::Off,
        }
    }
}

/// Snapshot of the track the engine is playing.
///
/// Never mutated in place: a track change produces a new value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TrackInfo {
    pub uri: String,
    pub name: String,
    pub artist: String,
    pub album: String,
    pub cover_url: Option<String>,
    pub duration: Duration,
}

impl TrackInfo {
    pub fn duration_ms(&self) -> u32 {
        self.duration.as_millis().min(u32::MAX as u128) as u32
    }
}

/// Connection state of the engine's remote session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SessionState {
    pub is_connected: bool,
    pub user_name: Option<String>,
    pub auth_needed: bool,
}

// ============================================================================
// Engine Events
// ============================================================================

/// Events emitted by the engine, one variant per event kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum EngineEvent {
    LogMessage { message: String },
    SessionConnected { user: String },
    SessionDisconnected { user: String },
    AuthNeeded,
    TrackChanged { track: TrackInfo },
    PlaybackPaused,
    PlaybackResumed,
    PlaybackStopped,
    PlaybackLoading,
    EndOfTrack,
    VolumeChanged { volume: u16 },
    ShuffleChanged { enabled: bool },
    RepeatChanged { mode: RepeatMode },
    PositionChanged { position_ms: u32 },
    PositionCorrected { position_ms: u32 },
    /// The engine reached an unrecoverable state.
    Panic { message: String },
}

impl EngineEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            EngineEvent::LogMessage { .. } => "log_message",
            EngineEvent::SessionConnected { .. } => "session_connected",
            EngineEvent::SessionDisconnected { .. } => "session_disconnected",
            EngineEvent::AuthNeeded => "auth_needed",
            EngineEvent::TrackChanged { .. } => "track_changed",
            EngineEvent::PlaybackPaused => "playback_paused",
            EngineEvent::PlaybackResumed => "playback_resumed",
            EngineEvent::PlaybackStopped => "playback_stopped",
            EngineEvent::PlaybackLoading => "playback_loading",
            EngineEvent::EndOfTrack => "end_of_track",
            EngineEvent::VolumeChanged { .. } => "volume_changed",
            EngineEvent::ShuffleChanged { .. } => "shuffle_changed",
            EngineEvent::RepeatChanged { .. } => "repeat_changed",
            EngineEvent::PositionChanged { .. } => "position_changed",
            EngineEvent::PositionCorrected { .. } => "position_corrected",
            EngineEvent::Panic { .. } => "panic",
        }
    }
}

/// Callback registered with an engine instance. Invoked from engine threads;
/// implementations must return quickly and never block.
pub type EngineEventCallback = Arc<dyn Fn(EngineEvent) + Send + Sync>;

// ============================================================================
// Ring Region
// ============================================================================

/// Base address and capacity of the engine-owned PCM ring.
#[derive(Debug, Clone, Copy)]
pub struct EngineRegion {
    base: NonNull<u8>,
    capacity: usize,
}

// SAFETY: the region is plain bytes owned by the engine for its whole
// lifetime; cross-thread access is coordinated by the cursor protocol.
unsafe impl Send for EngineRegion {}
unsafe impl Sync for EngineRegion {}

impl EngineRegion {
    /// Wrap an engine-provided pointer. Returns `None` for a null base or a
    /// zero capacity.
    ///
    /// # Safety
    ///
    /// `base` must point to `capacity` bytes readable for as long as the
    /// [`EngineAudioBuffer`] that returned it is alive, and the engine must
    /// publish its write cursor only after the preceding bytes are written.
    pub unsafe fn from_raw_parts(base: *mut u8, capacity: usize) -> Option<Self> {
        if capacity == 0 {
            return None;
        }
        NonNull::new(base).map(|base| Self { base, capacity })
    }

    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// PCM layout reported by the engine for its ring region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmDescriptor {
    pub format_id: u32,
    pub sample_rate: u32,
    pub channels: u16,
}

impl PcmDescriptor {
    pub fn sample_format(&self) -> Option<EngineSampleFormat> {
        EngineSampleFormat::from_engine_id(self.format_id)
    }
}

/// Request/response view of the engine's ring region.
///
/// The engine owns the write cursor; the core owns the read cursor and
/// publishes it through [`set_read_cursor`](Self::set_read_cursor).
pub trait EngineAudioBuffer: PlatformSendSync {
    /// Region descriptor, or `None` while the engine has not allocated it.
    fn region(&self) -> Option<EngineRegion>;

    /// Current write cursor in bytes. Must be a single atomic load.
    fn write_cursor(&self) -> usize;

    /// Publish the core's read cursor so the engine can reclaim space.
    fn set_read_cursor(&self, position: usize);

    fn pcm_descriptor(&self) -> PcmDescriptor;
}

// ============================================================================
// Engine Lifecycle
// ============================================================================

/// Factory for engine instances.
pub trait EngineBackend: PlatformSendSync {
    /// Construct a new instance. The callback stays registered until the
    /// returned instance is dropped.
    fn create(
        &self,
        config: EngineConfig,
        on_event: EngineEventCallback,
    ) -> Result<Box<dyn EngineInstance>>;

    /// Handle to the ring region the engine writes decoded PCM into.
    fn audio_buffer(&self) -> Arc<dyn EngineAudioBuffer>;
}

/// Transport surface of one live engine instance. Dropping it destroys the
/// native instance.
pub trait EngineInstance: PlatformSend + Sync {
    fn load(&self, uri: &str, start_playing: bool);
    fn play(&self);
    fn pause(&self);
    fn next(&self);
    fn previous(&self);
    fn seek(&self, position_ms: u32);
    fn set_volume(&self, volume: u16);
    fn set_shuffle(&self, enabled: bool);
    fn set_repeat(&self, mode: RepeatMode);
    fn position_ms(&self) -> u32;
    fn duration_ms(&self) -> u32;
    fn current_track(&self) -> Option<TrackInfo>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_format_ids_round_trip_in_probe_order() {
        let ids: Vec<u32> = [
            EngineSampleFormat::F64,
            EngineSampleFormat::F32,
            EngineSampleFormat::S32,
            EngineSampleFormat::S24,
            EngineSampleFormat::S24_3,
            EngineSampleFormat::S16,
        ]
        .iter()
        .map(|f| f.engine_id())
        .collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(
            EngineSampleFormat::from_engine_id(4),
            Some(EngineSampleFormat::S24_3)
        );
        assert_eq!(EngineSampleFormat::from_engine_id(9), None);
    }

    #[test]
    fn padded_and_packed_24_bit_differ_in_width() {
        assert_eq!(EngineSampleFormat::S24.bits_per_sample(), 24);
        assert_eq!(EngineSampleFormat::S24.bytes_per_sample(), 4);
        assert_eq!(EngineSampleFormat::S24_3.bytes_per_sample(), 3);
    }

    #[test]
    fn engine_config_debug_hides_token() {
        let config = EngineConfig {
            device_name: "desk".to_string(),
            device_type: DeviceType::Computer,
            cache_dir: PathBuf::from("/tmp/cache"),
            enable_discovery: false,
            enable_volume_normalisation: false,
            bitrate: Bitrate::B320,
            format: EngineSampleFormat::S16,
            access_token: "very-secret".to_string(),
        };
        let debug = format!("{:?}", config);
        assert!(!debug.contains("very-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn region_rejects_null_and_empty() {
        let mut bytes = [0u8; 8];
        unsafe {
            assert!(EngineRegion::from_raw_parts(std::ptr::null_mut(), 8).is_none());
            assert!(EngineRegion::from_raw_parts(bytes.as_mut_ptr(), 0).is_none());
            let region = EngineRegion::from_raw_parts(bytes.as_mut_ptr(), 8).unwrap();
            assert_eq!(region.capacity(), 8);
        }
    }

    #[test]
    fn repeat_mode_codes() {
        assert_eq!(RepeatMode::Track.engine_code(), 2);
        assert_eq!(RepeatMode::from_engine_code(1), RepeatMode::Context);
        assert_eq!(RepeatMode::from_engine_code(42), RepeatMode::Off);
    }

    #[test]
    fn event_serializes_with_tag() {
        let event = EngineEvent::VolumeChanged { volume: 512 };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"VolumeChanged\""));
        assert_eq!(event.kind(), "volume_changed");
    }
}
