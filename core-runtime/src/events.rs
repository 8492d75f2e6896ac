//! # Event Bus System
//!
//! Typed fan-out of session and playback events using `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! Engine callbacks arrive on engine-owned threads. The playback session
//! drains them on its pump task, updates its cached state, and re-emits them
//! here as [`CoreEvent`]s. Any number of subscribers (the media orchestrator,
//! host UI glue, tests) can then listen independently.
//!
//! ```text
//! ┌────────────┐  callback   ┌─────────┐   emit   ┌──────────┐  subscribe  ┌──────────────┐
//! │   Engine   ├────────────>│ Session ├─────────>│ EventBus ├────────────>│ Orchestrator │
//! │  threads   │  (mpsc)     │  pump   │          │          ├────────────>│ Host UI      │
//! └────────────┘             └─────────┘          └──────────┘             └──────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, PlaybackEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(64);
//! let mut rx = bus.subscribe();
//!
//! bus.emit(CoreEvent::Playback(PlaybackEvent::Paused)).ok();
//!
//! assert_eq!(rx.recv().await.unwrap(), CoreEvent::Playback(PlaybackEvent::Paused));
//! # }
//! ```
//!
//! ## Delivery
//!
//! - Emitting never blocks. With no subscribers `emit` returns an error that
//!   callers are free to ignore.
//! - A subscriber that falls more than `capacity` events behind receives
//!   `RecvError::Lagged` and continues from the oldest retained event.
//! - Position updates are frequent; keep subscribers cheap.

use bridge_traits::engine::{RepeatMode, TrackInfo};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

// Re-export commonly used types
pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// Position updates arrive roughly every 100 ms, so this covers several
/// seconds of a stalled subscriber.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event published on the bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Connection and engine lifecycle
    Session(SessionEvent),
    /// Transport and track state
    Playback(PlaybackEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Session(e) => e.description(),
            CoreEvent::Playback(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Session(SessionEvent::Panicked { .. }) => EventSeverity::Error,
            CoreEvent::Session(SessionEvent::AuthNeeded) => EventSeverity::Warning,
            CoreEvent::Session(SessionEvent::Disconnected { .. }) => EventSeverity::Warning,
            CoreEvent::Session(SessionEvent::Connected { .. }) => EventSeverity::Info,
            CoreEvent::Playback(PlaybackEvent::TrackChanged { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Session Events
// ============================================================================

/// Events about the engine instance and its remote session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SessionEvent {
    /// The engine authenticated with the remote service.
    Connected {
        /// Account name reported by the engine.
        user: String,
    },
    /// The remote session ended.
    Disconnected { user: String },
    /// The credential was rejected or is missing.
    AuthNeeded,
    /// The engine panicked. The instance and its audio bridge are gone;
    /// a new `connect` is required.
    Panicked { message: String },
    /// Diagnostic line emitted by the engine.
    EngineLog { message: String },
}

impl SessionEvent {
    fn description(&self) -> &str {
        match self {
            SessionEvent::Connected { .. } => "Session connected",
            SessionEvent::Disconnected { .. } => "Session disconnected",
            SessionEvent::AuthNeeded => "Authentication needed",
            SessionEvent::Panicked { .. } => "Engine panicked",
            SessionEvent::EngineLog { .. } => "Engine log message",
        }
    }
}

// ============================================================================
// Playback Events
// ============================================================================

/// Events related to audio playback.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum PlaybackEvent {
    /// A new track became current.
    TrackChanged { track: TrackInfo },
    Paused,
    Resumed,
    Stopped,
    /// The engine is buffering the next track.
    Loading,
    /// The current track finished naturally.
    EndOfTrack,
    /// Engine volume changed (0..=65535).
    VolumeChanged { volume: u16 },
    ShuffleChanged { enabled: bool },
    RepeatChanged { mode: RepeatMode },
    /// Natural progression of the playhead.
    PositionChanged { position_ms: u32 },
    /// The engine jumped the playhead (seek or resync).
    PositionCorrected { position_ms: u32 },
}

impl PlaybackEvent {
    fn description(&self) -> &str {
        match self {
            PlaybackEvent::TrackChanged { .. } => "Track changed",
            PlaybackEvent::Paused => "Playback paused",
            PlaybackEvent::Resumed => "Playback resumed",
            PlaybackEvent::Stopped => "Playback stopped",
            PlaybackEvent::Loading => "Playback loading",
            PlaybackEvent::EndOfTrack => "Track completed",
            PlaybackEvent::VolumeChanged { .. } => "Volume changed",
            PlaybackEvent::ShuffleChanged { .. } => "Shuffle changed",
            PlaybackEvent::RepeatChanged { .. } => "Repeat mode changed",
            PlaybackEvent::PositionChanged { .. } => "Playback position changed",
            PlaybackEvent::PositionCorrected { .. } => "Playback position corrected",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Cloning the bus shares the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Events retained per subscriber before it lags.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Creates a new event bus with [`DEFAULT_EVENT_BUFFER_SIZE`].
    #[allow(clippy::should_implement_trait)]
    pub fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an
    /// error when nobody is listening.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

/// Type alias for event filter functions.
type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A `broadcast::Receiver` with an optional filter.
///
/// # Example
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let bus = EventBus::new(16);
/// let session_only = EventStream::new(bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Session(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` will be returned.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// `RecvError::Lagged(n)` if the subscriber fell behind by `n` events,
    /// `RecvError::Closed` once every sender is dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.matches(&event) {
                return Ok(event);
            }
        }
    }

    /// Non-blocking receive. `None` when nothing matching is queued.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.matches(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }

    fn matches(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
