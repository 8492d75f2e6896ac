//! # Media Orchestrator
//!
//! Application-facing playback state. Merges session events, catalog
//! metadata, and periodic position reads into one [`MediaState`] value and
//! delivers every change to listeners through the host's [`UiExecutor`].
//!
//! ## State updates
//!
//! State is never mutated in place. Each update clones the current value,
//! applies the change, and swaps the new `Arc` in under a short lock, so a
//! listener always sees a complete snapshot.
//!
//! ## Background tasks
//!
//! [`MediaOrchestrator::start`] spawns three tasks, all stopped by
//! [`MediaOrchestrator::shutdown`]:
//! - the session event loop
//! - the position poll (while playing)
//! - the volume debounce flush
//!
//! Each track change also starts a catalog lookup in its own task. A newer
//! track aborts it, and a result for a track no longer playing is dropped.
//! When the event loop falls behind the bus, state is resynced from the
//! session snapshot.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bridge_traits::{
    Clock, Credential, PlaybackState, RepeatMode, TrackInfo, TrackMetadata,
    TrackMetadataProvider, UiExecutor,
};
use core_playback::PlaybackEngineSession;
use core_runtime::events::{CoreEvent, PlaybackEvent, SessionEvent};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{error::RecvError, Receiver};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{CoreError, Result};

// ============================================================================
// Configuration
// ============================================================================

/// Orchestrator timing and recovery options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Interval between playhead reads while playing.
    ///
    /// Default: 100 ms.
    #[serde(default = "default_position_poll_interval")]
    pub position_poll_interval: Duration,

    /// Interval at which the latest requested volume is sent to the engine.
    ///
    /// Default: 100 ms.
    #[serde(default = "default_volume_debounce")]
    pub volume_debounce: Duration,

    /// Reconnect once with the held credential after an engine panic.
    ///
    /// Default: true.
    #[serde(default = "default_reconnect_after_panic")]
    pub reconnect_after_panic: bool,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            position_poll_interval: default_position_poll_interval(),
            volume_debounce: default_volume_debounce(),
            reconnect_after_panic: default_reconnect_after_panic(),
        }
    }
}

impl MediaConfig {
    pub fn validate(&self) -> Result<()> {
        if self.position_poll_interval.is_zero() {
            return Err(CoreError::Config(
                "position_poll_interval must be > 0".to_string(),
            ));
        }
        if self.volume_debounce.is_zero() {
            return Err(CoreError::Config("volume_debounce must be > 0".to_string()));
        }
        Ok(())
    }
}

fn default_position_poll_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_volume_debounce() -> Duration {
    Duration::from_millis(100)
}

fn default_reconnect_after_panic() -> bool {
    true
}

// ============================================================================
// State
// ============================================================================

/// Everything a now-playing UI needs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaState {
    pub playback_state: PlaybackState,
    pub track: Option<Arc<TrackInfo>>,
    /// Catalog metadata for `track`, when the lookup succeeded.
    pub metadata: Option<Arc<TrackMetadata>>,
    pub position_ms: u32,
    pub duration_ms: u32,
    /// Engine volume, 0..=65535.
    pub volume: u16,
    pub shuffle: bool,
    pub repeat: RepeatMode,
    pub is_connected: bool,
    pub auth_needed: bool,
}

/// Callback invoked on the UI executor after every state change.
pub type MediaStateListener = Arc<dyn Fn(&MediaState) + Send + Sync>;

/// Handle returned by [`MediaOrchestrator::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// System transport buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaCommand {
    Play,
    Pause,
    Stop,
    Next,
    Previous,
}

/// Convert a UI volume percentage to the engine's 16-bit scale.
///
/// Out-of-range and NaN inputs are clamped; the result is truncated.
pub fn percent_to_volume(percent: f64) -> u16 {
    let percent = if percent.is_nan() {
        0.0
    } else {
        percent.clamp(0.0, 100.0)
    };
    (percent * 65535.0 / 100.0) as u16
}

/// Bare catalog id from a `scheme:track:id` URI. `None` for other kinds.
pub fn track_id_from_uri(uri: &str) -> Option<&str> {
    let mut parts = uri.splitn(3, ':');
    let _scheme = parts.next()?;
    let kind = parts.next()?;
    let id = parts.next()?;
    (kind == "track" && !id.is_empty()).then_some(id)
}

// ============================================================================
// Orchestrator
// ============================================================================

struct MediaInner {
    session: PlaybackEngineSession,
    metadata: Option<Arc<dyn TrackMetadataProvider>>,
    executor: Arc<dyn UiExecutor>,
    clock: Arc<dyn Clock>,
    config: MediaConfig,
    state: RwLock<Arc<MediaState>>,
    listeners: RwLock<Vec<(ListenerId, MediaStateListener)>>,
    next_listener: AtomicU64,
    credential: RwLock<Option<Credential>>,
    pending_volume: Mutex<Option<u16>>,
    reconnect_attempted: AtomicBool,
    started: AtomicBool,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    lookup: Mutex<Option<JoinHandle<()>>>,
}

/// Observable playback state on top of a [`PlaybackEngineSession`].
#[derive(Clone)]
pub struct MediaOrchestrator {
    inner: Arc<MediaInner>,
}

impl MediaOrchestrator {
    pub fn new(
        session: PlaybackEngineSession,
        metadata: Option<Arc<dyn TrackMetadataProvider>>,
        executor: Arc<dyn UiExecutor>,
        clock: Arc<dyn Clock>,
        config: MediaConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(MediaInner {
                session,
                metadata,
                executor,
                clock,
                config,
                state: RwLock::new(Arc::new(MediaState::default())),
                listeners: RwLock::new(Vec::new()),
                next_listener: AtomicU64::new(1),
                credential: RwLock::new(None),
                pending_volume: Mutex::new(None),
                reconnect_attempted: AtomicBool::new(false),
                started: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                tasks: Mutex::new(Vec::new()),
                lookup: Mutex::new(None),
            }),
        })
    }

    /// Spawn the background tasks. Idempotent. Must be called from within a
    /// Tokio runtime.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        let cancel = self.inner.cancel.clone();
        let config = &self.inner.config;

        let tasks = vec![
            tokio::spawn(run_event_loop(
                weak.clone(),
                self.inner.session.subscribe(),
                cancel.clone(),
            )),
            tokio::spawn(run_position_poll(
                weak.clone(),
                config.position_poll_interval,
                cancel.clone(),
            )),
            tokio::spawn(run_volume_debounce(weak, config.volume_debounce, cancel)),
        ];
        self.inner.tasks.lock().extend(tasks);

        info!(
            poll_ms = config.position_poll_interval.as_millis() as u64,
            debounce_ms = config.volume_debounce.as_millis() as u64,
            "Media orchestrator started"
        );
    }

    /// Stop the background tasks and shut the session down. Idempotent.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        if let Some(lookup) = self.inner.lookup.lock().take() {
            lookup.abort();
        }
        let tasks: Vec<_> = self.inner.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "Media task ended abnormally");
                }
            }
        }
        self.inner.session.shutdown().await;
    }

    // ========================================================================
    // State & Listeners
    // ========================================================================

    /// Current state snapshot.
    pub fn state(&self) -> Arc<MediaState> {
        self.inner.state.read().clone()
    }

    pub fn add_listener(&self, listener: MediaStateListener) -> ListenerId {
        let id = ListenerId(self.inner.next_listener.fetch_add(1, Ordering::Relaxed));
        self.inner.listeners.write().push((id, listener));
        id
    }

    /// Returns `false` if `id` was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn session(&self) -> &PlaybackEngineSession {
        &self.inner.session
    }

    // ========================================================================
    // Credentials
    // ========================================================================

    /// Store a credential from the host's login flow. A valid credential
    /// connects the engine right away.
    pub async fn update_credential(&self, credential: Credential) -> Result<()> {
        let expired = credential.is_expired(self.inner.clock.as_ref());
        let token = credential.access_token.clone();
        *self.inner.credential.write() = Some(credential);

        if expired {
            warn!("Received an already expired credential");
            self.inner.update_state(|s| s.auth_needed = true);
            return Ok(());
        }

        self.inner.update_state(|s| s.auth_needed = false);
        self.inner.session.connect(&token).await?;
        Ok(())
    }

    pub fn clear_credential(&self) {
        *self.inner.credential.write() = None;
    }

    // ========================================================================
    // Transports
    // ========================================================================

    /// Connect with the held credential and play `uri`.
    ///
    /// # Errors
    ///
    /// [`CoreError::AuthRequired`] when no credential is held or it has
    /// expired. The state is flagged `auth_needed` so the host can start its
    /// login flow.
    pub async fn play_track(&self, uri: &str) -> Result<()> {
        let token = match self.inner.valid_token() {
            Some(token) => token,
            None => {
                info!(uri, "Playback requested without a valid credential");
                self.inner.update_state(|s| s.auth_needed = true);
                return Err(CoreError::AuthRequired);
            }
        };

        self.inner.session.connect(&token).await?;
        self.inner.session.load_and_play(uri).await?;
        Ok(())
    }

    pub fn pause(&self) {
        self.inner.session.pause();
    }

    pub fn resume(&self) {
        self.inner.session.resume();
    }

    pub fn stop(&self) {
        self.inner.session.stop();
    }

    pub fn next(&self) {
        self.inner.session.next();
    }

    pub fn previous(&self) {
        self.inner.session.previous();
    }

    pub fn seek(&self, position_ms: u32) {
        self.inner.session.seek(position_ms);
    }

    pub fn set_shuffle(&self, enabled: bool) {
        self.inner.session.set_shuffle(enabled);
    }

    pub fn set_repeat(&self, mode: RepeatMode) {
        self.inner.session.set_repeat(mode);
    }

    /// Send an engine volume immediately.
    pub fn set_volume(&self, volume: u16) {
        self.inner.session.set_volume(volume);
    }

    /// Queue a volume change from a slider. Only the latest value per
    /// debounce interval reaches the engine.
    pub fn set_volume_debounced(&self, percent: f64) {
        *self.inner.pending_volume.lock() = Some(percent_to_volume(percent));
    }

    /// Dispatch a system transport button.
    pub fn handle_command(&self, command: MediaCommand) {
        debug!(?command, "Transport command");
        match command {
            MediaCommand::Play => self.resume(),
            MediaCommand::Pause => self.pause(),
            MediaCommand::Stop => self.stop(),
            MediaCommand::Next => self.next(),
            MediaCommand::Previous => self.previous(),
        }
    }
}

impl std::fmt::Debug for MediaOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaOrchestrator")
            .field("state", &self.state())
            .field("listeners", &self.inner.listeners.read().len())
            .finish()
    }
}

impl MediaInner {
    fn valid_token(&self) -> Option<String> {
        self.credential
            .read()
            .as_ref()
            .filter(|c| !c.is_expired(self.clock.as_ref()))
            .map(|c| c.access_token.clone())
    }

    /// Clone-mutate-swap. Listeners are notified only when the value changed.
    fn update_state(&self, mutate: impl FnOnce(&mut MediaState)) {
        let next = {
            let mut current = self.state.write();
            let mut next = MediaState::clone(&current);
            mutate(&mut next);
            if next == **current {
                return;
            }
            let next = Arc::new(next);
            *current = next.clone();
            next
        };
        self.notify(next);
    }

    fn notify(&self, state: Arc<MediaState>) {
        let listeners: Vec<MediaStateListener> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        if listeners.is_empty() {
            return;
        }
        self.executor.post(Box::new(move || {
            for listener in &listeners {
                listener(&state);
            }
        }));
    }

    async fn on_core_event(self: &Arc<Self>, event: CoreEvent) {
        match event {
            CoreEvent::Session(event) => self.on_session_event(event).await,
            CoreEvent::Playback(event) => self.on_playback_event(event).await,
        }
    }

    async fn on_session_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::Connected { .. } => {
                self.reconnect_attempted.store(false, Ordering::SeqCst);
                self.update_state(|s| {
                    s.is_connected = true;
                    s.auth_needed = false;
                });
            }
            SessionEvent::Disconnected { .. } => {
                self.update_state(|s| s.is_connected = false);
            }
            SessionEvent::AuthNeeded => {
                self.update_state(|s| {
                    s.is_connected = false;
                    s.auth_needed = true;
                });
            }
            SessionEvent::Panicked { message } => {
                self.update_state(|s| {
                    s.is_connected = false;
                    s.playback_state = PlaybackState::Stopped;
                });
                self.recover_from_panic(&message).await;
            }
            SessionEvent::EngineLog { .. } => {}
        }
    }

    async fn recover_from_panic(&self, message: &str) {
        if !self.config.reconnect_after_panic {
            return;
        }
        if self.reconnect_attempted.swap(true, Ordering::SeqCst) {
            warn!(message, "Engine panicked again, not reconnecting");
            return;
        }
        let Some(token) = self.valid_token() else {
            info!("Engine panicked with no valid credential, waiting for login");
            self.update_state(|s| s.auth_needed = true);
            return;
        };

        info!("Reconnecting after engine panic");
        if let Err(e) = self.session.connect(&token).await {
            warn!(error = %e, "Reconnect after panic failed");
        }
    }

    async fn on_playback_event(self: &Arc<Self>, event: PlaybackEvent) {
        match event {
            PlaybackEvent::TrackChanged { track } => self.on_track_changed(Arc::new(track)),
            PlaybackEvent::Paused => self.update_state(|s| s.playback_state = PlaybackState::Paused),
            PlaybackEvent::Resumed => {
                self.update_state(|s| s.playback_state = PlaybackState::Playing)
            }
            PlaybackEvent::Stopped => {
                self.update_state(|s| s.playback_state = PlaybackState::Stopped)
            }
            PlaybackEvent::Loading => {
                self.update_state(|s| s.playback_state = PlaybackState::Loading)
            }
            PlaybackEvent::EndOfTrack => debug!("End of track"),
            PlaybackEvent::VolumeChanged { volume } => self.update_state(|s| s.volume = volume),
            PlaybackEvent::ShuffleChanged { enabled } => self.update_state(|s| s.shuffle = enabled),
            PlaybackEvent::RepeatChanged { mode } => self.update_state(|s| s.repeat = mode),
            PlaybackEvent::PositionChanged { position_ms }
            | PlaybackEvent::PositionCorrected { position_ms } => {
                self.update_state(|s| s.position_ms = position_ms)
            }
        }
    }

    /// Swap the new track in at once; catalog metadata follows from a
    /// background lookup.
    fn on_track_changed(self: &Arc<Self>, track: Arc<TrackInfo>) {
        let duration_ms = track.duration_ms();
        debug!(uri = %track.uri, duration_ms, "Applying track change");

        self.update_state(|s| {
            s.track = Some(track.clone());
            s.metadata = None;
            s.duration_ms = duration_ms;
            s.position_ms = 0;
        });

        let track_id = track_id_from_uri(&track.uri).map(str::to_owned);
        let lookup = match (&self.metadata, track_id) {
            (Some(provider), Some(id)) => {
                let provider = provider.clone();
                let weak = Arc::downgrade(self);
                let cancel = self.cancel.clone();
                Some(tokio::spawn(async move {
                    let result = tokio::select! {
                        _ = cancel.cancelled() => return,
                        result = provider.track_metadata(&id) => result,
                    };
                    if let Some(inner) = weak.upgrade() {
                        inner.apply_metadata(&track, &id, result);
                    }
                }))
            }
            _ => None,
        };

        let previous = std::mem::replace(&mut *self.lookup.lock(), lookup);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn apply_metadata(
        &self,
        track: &Arc<TrackInfo>,
        track_id: &str,
        result: bridge_traits::error::Result<Option<TrackMetadata>>,
    ) {
        let metadata = match result {
            Ok(Some(found)) => Arc::new(found),
            Ok(None) => {
                debug!(track_id, "No catalog metadata for track");
                return;
            }
            Err(e) => {
                warn!(track_id, error = %e, "Metadata lookup failed");
                return;
            }
        };

        let mut stale = false;
        self.update_state(|s| {
            if !s.track.as_ref().is_some_and(|current| Arc::ptr_eq(current, track)) {
                stale = true;
                return;
            }
            if s.duration_ms == 0 {
                s.duration_ms = metadata.duration_ms;
            }
            s.metadata = Some(metadata);
        });
        if stale {
            debug!(track_id, "Discarding metadata for a track no longer playing");
        }
    }

    /// Re-read the session snapshot after events were dropped.
    fn resync_from_session(self: &Arc<Self>) {
        let snapshot = self.session.snapshot();

        let track_changed = match (&self.state.read().track, &snapshot.track) {
            (Some(current), Some(latest)) => current.uri != latest.uri,
            (None, Some(_)) => true,
            _ => false,
        };
        if track_changed {
            if let Some(track) = snapshot.track.clone() {
                self.on_track_changed(track);
            }
        }

        self.update_state(|s| {
            s.playback_state = snapshot.playback_state;
            s.position_ms = snapshot.position_ms;
            s.volume = snapshot.volume;
            s.shuffle = snapshot.shuffle;
            s.repeat = snapshot.repeat;
            s.is_connected = snapshot.session.is_connected;
        });
    }
}

impl Drop for MediaInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ============================================================================
// Background Tasks
// ============================================================================

async fn run_event_loop(
    inner: Weak<MediaInner>,
    mut events: Receiver<CoreEvent>,
    cancel: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            received = events.recv() => received,
        };
        match received {
            Ok(event) => {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                inner.on_core_event(event).await;
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Media orchestrator fell behind session events, resyncing");
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                inner.resync_from_session();
            }
            Err(RecvError::Closed) => break,
        }
    }
    debug!("Media event loop stopped");
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

async fn run_position_poll(inner: Weak<MediaInner>, period: Duration, cancel: CancellationToken) {
    let mut ticker = ticker(period);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if inner.state.read().playback_state != PlaybackState::Playing {
            continue;
        }
        let position_ms = inner.session.get_position_ms();
        inner.update_state(|s| s.position_ms = position_ms);
    }
}

async fn run_volume_debounce(inner: Weak<MediaInner>, period: Duration, cancel: CancellationToken) {
    let mut ticker = ticker(period);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let pending = inner.pending_volume.lock().take();
        if let Some(volume) = pending {
            debug!(volume, "Flushing debounced volume");
            inner.session.set_volume(volume);
            inner.update_state(|s| s.volume = volume);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_to_volume() {
        assert_eq!(percent_to_volume(0.0), 0);
        assert_eq!(percent_to_volume(100.0), 65535);
        assert_eq!(percent_to_volume(50.0), 32767);
        assert_eq!(percent_to_volume(-5.0), 0);
        assert_eq!(percent_to_volume(250.0), 65535);
        assert_eq!(percent_to_volume(f64::NAN), 0);
    }

    #[test]
    fn test_track_id_from_uri() {
        assert_eq!(
            track_id_from_uri("spotify:track:4uLU6hMCjMI75M1A2tKUQC"),
            Some("4uLU6hMCjMI75M1A2tKUQC")
        );
        assert_eq!(track_id_from_uri("spotify:album:abc"), None);
        assert_eq!(track_id_from_uri("spotify:track:"), None);
        assert_eq!(track_id_from_uri("4uLU6hMCjMI75M1A2tKUQC"), None);
    }

    #[test]
    fn test_media_config_defaults() {
        let config = MediaConfig::default();
        assert_eq!(config.position_poll_interval, Duration::from_millis(100));
        assert_eq!(config.volume_debounce, Duration::from_millis(100));
        assert!(config.reconnect_after_panic);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_media_config_rejects_zero_intervals() {
        let config = MediaConfig {
            volume_debounce: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));
    }

    #[test]
    fn test_media_config_partial_json() {
        let config: MediaConfig =
            serde_json::from_str(r#"{"reconnect_after_panic": false}"#).unwrap();
        assert!(!config.reconnect_after_panic);
        assert_eq!(config.volume_debounce, Duration::from_millis(100));
    }
}
