//! # Playback Engine Session
//!
//! Owns at most one engine instance and the ring buffer bridge that feeds its
//! PCM to the output host.
//!
//! ## Event flow
//!
//! ```text
//! engine thread ──try_send──▶ bounded mpsc ──▶ pump task ──▶ snapshot + EventBus
//! ```
//!
//! The engine callback never blocks: a full channel drops the event with a
//! warning. Each instance is tagged with a generation number and events from
//! a destroyed instance are discarded by the pump.
//!
//! ## Failure policy
//!
//! `Panic`, a bridge timeout, and engine creation failures are fatal to the
//! current instance: it is destroyed together with the bridge and the caller
//! must `connect` again. Reconnecting is left to the orchestrator.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use bridge_traits::{
    AudioOutputHost, EngineBackend, EngineEvent, EngineEventCallback, EngineInstance,
    PlaybackState, RepeatMode, SessionState, TrackInfo,
};
use core_runtime::config::DeviceIdentity;
use core_runtime::events::{CoreEvent, EventBus, PlaybackEvent, SessionEvent};
use core_runtime::logging::{redact_if_sensitive, strip_path, ENGINE_LOG_TARGET};
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast::Receiver;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::bridge::{BridgeMonitor, BridgeState, BridgeStats, RingBufferBridge};
use crate::config::PlaybackConfig;
use crate::error::{PlaybackError, Result};
use crate::format::{FormatNegotiator, NegotiatedFormat};

/// Cached view of the engine, updated only by engine events.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub session: SessionState,
    pub playback_state: PlaybackState,
    pub track: Option<Arc<TrackInfo>>,
    pub position_ms: u32,
    pub volume: u16,
    pub shuffle: bool,
    pub repeat: RepeatMode,
}

type QueuedEvent = (u64, EngineEvent);

struct LiveEngine {
    instance: Box<dyn EngineInstance>,
    token: String,
}

struct SessionInner {
    backend: Arc<dyn EngineBackend>,
    output_host: Arc<dyn AudioOutputHost>,
    identity: DeviceIdentity,
    config: PlaybackConfig,
    events: EventBus,
    format: RwLock<Option<NegotiatedFormat>>,
    // Declared before `engine` so the bridge is released first on drop.
    bridge: tokio::sync::Mutex<Option<RingBufferBridge>>,
    bridge_setup: tokio::sync::Mutex<()>,
    monitor: RwLock<Option<BridgeMonitor>>,
    engine: Mutex<Option<LiveEngine>>,
    generation: AtomicU64,
    snapshot: RwLock<SessionSnapshot>,
    event_tx: mpsc::Sender<QueuedEvent>,
    event_rx: Mutex<Option<mpsc::Receiver<QueuedEvent>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

/// One engine instance plus its audio bridge.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct PlaybackEngineSession {
    inner: Arc<SessionInner>,
}

impl PlaybackEngineSession {
    /// Create an idle session. Nothing touches the engine or the output host
    /// until [`initialize`](Self::initialize).
    pub fn new(
        backend: Arc<dyn EngineBackend>,
        output_host: Arc<dyn AudioOutputHost>,
        identity: DeviceIdentity,
        config: PlaybackConfig,
        events: EventBus,
    ) -> Result<Self> {
        config.validate()?;
        let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity);

        debug!(
            device = %identity.device_name,
            cache_dir = strip_path(&identity.cache_dir.to_string_lossy()),
            "Creating playback session"
        );

        Ok(Self {
            inner: Arc::new(SessionInner {
                backend,
                output_host,
                identity,
                config,
                events,
                format: RwLock::new(None),
                bridge: tokio::sync::Mutex::new(None),
                bridge_setup: tokio::sync::Mutex::new(()),
                monitor: RwLock::new(None),
                engine: Mutex::new(None),
                generation: AtomicU64::new(0),
                snapshot: RwLock::new(SessionSnapshot::default()),
                event_tx,
                event_rx: Mutex::new(Some(event_rx)),
                pump: Mutex::new(None),
            }),
        })
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Negotiate the PCM format and start the event pump. Idempotent.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// [`PlaybackError::NoCompatibleFormat`] when the output host accepts
    /// none of the engine's formats.
    pub async fn initialize(&self) -> Result<NegotiatedFormat> {
        let existing = *self.inner.format.read();
        if let Some(format) = existing {
            return Ok(format);
        }

        let negotiator = FormatNegotiator::new(self.inner.output_host.clone(), &self.inner.config);
        let negotiated = tokio::task::spawn_blocking(move || negotiator.probe())
            .await
            .map_err(|e| PlaybackError::Internal(format!("format probe task failed: {e}")))??;

        *self.inner.format.write() = Some(negotiated);
        self.start_pump();

        info!(format = ?negotiated.engine_format, "Playback session initialized");
        Ok(negotiated)
    }

    /// Create the engine instance for `access_token`.
    ///
    /// A live instance created with the same token is kept. Any other live
    /// instance is destroyed, together with its bridge, before the new one is
    /// created.
    pub async fn connect(&self, access_token: &str) -> Result<()> {
        let format = (*self.inner.format.read()).ok_or(PlaybackError::NotInitialized)?;
        if access_token.is_empty() {
            return Err(PlaybackError::InvalidArgument(
                "access token is empty".to_string(),
            ));
        }

        let unchanged = self
            .inner
            .engine
            .lock()
            .as_ref()
            .is_some_and(|live| live.token == access_token);
        if unchanged {
            debug!("Engine already connected with this credential");
            return Ok(());
        }

        self.inner.teardown().await;

        let generation = self.inner.generation.load(Ordering::SeqCst);
        let engine_config = self
            .inner
            .identity
            .engine_config(format.engine_format, access_token);

        info!(
            device = %engine_config.device_name,
            format = ?format.engine_format,
            bitrate = engine_config.bitrate.kbps(),
            access_token = %redact_if_sensitive("access_token", access_token),
            "Creating engine instance"
        );

        let instance = self
            .inner
            .backend
            .create(engine_config, self.event_callback(generation))
            .map_err(|e| {
                error!(error = %e, "Engine creation failed");
                PlaybackError::EngineCreationFailed(e.to_string())
            })?;

        *self.inner.engine.lock() = Some(LiveEngine {
            instance,
            token: access_token.to_string(),
        });
        Ok(())
    }

    /// Load `uri` and start playing it.
    ///
    /// The first call after `connect` waits for the engine to allocate its
    /// ring buffer and brings up the audio bridge, which can take seconds.
    ///
    /// # Errors
    ///
    /// - [`PlaybackError::NotConnected`] without a live instance, or when the
    ///   instance was torn down while the bridge was starting.
    /// - [`PlaybackError::RingBufferTimeout`] if the engine never publishes
    ///   its buffer. The instance is destroyed.
    pub async fn load_and_play(&self, uri: &str) -> Result<()> {
        let uri = uri.trim();
        if uri.is_empty() {
            return Err(PlaybackError::InvalidArgument("track uri is empty".to_string()));
        }
        let format = (*self.inner.format.read()).ok_or(PlaybackError::NotInitialized)?;

        let generation = {
            let engine = self.inner.engine.lock();
            let live = engine.as_ref().ok_or(PlaybackError::NotConnected)?;
            info!(uri, "Loading track");
            live.instance.load(uri, true);
            self.inner.generation.load(Ordering::SeqCst)
        };

        if self.inner.resume_active_bridge().await {
            return Ok(());
        }

        // Concurrent loads wait here rather than on the bridge slot, which the
        // event pump needs for pause and resume.
        let _setup = self.inner.bridge_setup.lock().await;
        if self.inner.resume_active_bridge().await {
            return Ok(());
        }

        let mut bridge = RingBufferBridge::new(
            format.audio,
            self.inner.backend.audio_buffer(),
            self.inner.output_host.clone(),
            self.inner.config.clone(),
        )?;
        *self.inner.monitor.write() = Some(bridge.monitor());

        if let Err(e) = bridge.initialize().await {
            error!(error = %e, "Audio bridge failed to start");
            if self.inner.generation.load(Ordering::SeqCst) != generation {
                *self.inner.monitor.write() = None;
            } else if e.is_fatal_to_session() {
                self.inner.teardown().await;
                self.inner.update_snapshot(|s| {
                    s.playback_state = PlaybackState::Stopped;
                    s.session.is_connected = false;
                });
            }
            return Err(e);
        }

        let mut slot = self.inner.bridge.lock().await;
        if self.inner.generation.load(Ordering::SeqCst) != generation {
            drop(slot);
            info!("Engine instance replaced while the audio bridge started");
            bridge.dispose();
            *self.inner.monitor.write() = None;
            return Err(PlaybackError::NotConnected);
        }
        *slot = Some(bridge);
        Ok(())
    }

    /// Destroy the instance and the bridge and stop the event pump. The
    /// session cannot be reused afterwards. Idempotent.
    pub async fn shutdown(&self) {
        self.inner.teardown().await;
        if let Some(pump) = self.inner.pump.lock().take() {
            pump.abort();
        }
        self.inner.update_snapshot(|s| {
            s.playback_state = PlaybackState::Stopped;
            s.session.is_connected = false;
        });
        info!("Playback session shut down");
    }

    // ========================================================================
    // Transports (no-ops without a live instance)
    // ========================================================================

    pub fn pause(&self) {
        self.with_instance("pause", |engine| engine.pause());
    }

    pub fn resume(&self) {
        self.with_instance("resume", |engine| engine.play());
    }

    /// The engine has no separate stop; this pauses.
    pub fn stop(&self) {
        self.with_instance("stop", |engine| engine.pause());
    }

    pub fn seek(&self, position_ms: u32) {
        self.with_instance("seek", |engine| engine.seek(position_ms));
    }

    pub fn next(&self) {
        self.with_instance("next", |engine| engine.next());
    }

    pub fn previous(&self) {
        self.with_instance("previous", |engine| engine.previous());
    }

    /// Engine volume, 0..=65535.
    pub fn set_volume(&self, volume: u16) {
        self.with_instance("set_volume", |engine| engine.set_volume(volume));
    }

    pub fn set_shuffle(&self, enabled: bool) {
        self.with_instance("set_shuffle", |engine| engine.set_shuffle(enabled));
    }

    pub fn set_repeat(&self, mode: RepeatMode) {
        self.with_instance("set_repeat", |engine| engine.set_repeat(mode));
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Playhead position. Falls back to the last reported position when no
    /// instance is live.
    pub fn get_position_ms(&self) -> u32 {
        self.with_instance("position", |engine| engine.position_ms())
            .unwrap_or_else(|| self.inner.snapshot.read().position_ms)
    }

    pub fn duration_ms(&self) -> u32 {
        self.with_instance("duration", |engine| engine.duration_ms())
            .unwrap_or_else(|| {
                self.inner
                    .snapshot
                    .read()
                    .track
                    .as_ref()
                    .map_or(0, |track| track.duration_ms())
            })
    }

    pub fn current_track(&self) -> Option<TrackInfo> {
        self.with_instance("current_track", |engine| engine.current_track())
            .flatten()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.snapshot.read().clone()
    }

    /// Whether an engine instance is live. The remote session may still be
    /// connecting; see [`SessionSnapshot::session`].
    pub fn has_instance(&self) -> bool {
        self.inner.engine.lock().is_some()
    }

    pub fn format(&self) -> Option<NegotiatedFormat> {
        *self.inner.format.read()
    }

    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.inner.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// [`BridgeState::Uninitialized`] while no bridge exists.
    pub fn bridge_state(&self) -> BridgeState {
        self.inner
            .monitor
            .read()
            .as_ref()
            .map_or(BridgeState::Uninitialized, BridgeMonitor::state)
    }

    pub fn bridge_stats(&self) -> Option<BridgeStats> {
        self.inner.monitor.read().as_ref().map(BridgeMonitor::stats)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn with_instance<R>(&self, op: &'static str, f: impl FnOnce(&dyn EngineInstance) -> R) -> Option<R> {
        let engine = self.inner.engine.lock();
        match engine.as_ref() {
            Some(live) => Some(f(live.instance.as_ref())),
            None => {
                trace!(op, "No engine instance, ignoring");
                None
            }
        }
    }

    fn event_callback(&self, generation: u64) -> EngineEventCallback {
        let tx = self.inner.event_tx.clone();
        Arc::new(move |event: EngineEvent| {
            if let Err(mpsc::error::TrySendError::Full((_, event))) = tx.try_send((generation, event))
            {
                warn!(kind = event.kind(), "Engine event channel full, dropping event");
            }
        })
    }

    fn start_pump(&self) {
        let mut pump = self.inner.pump.lock();
        if pump.is_some() {
            return;
        }
        let Some(rx) = self.inner.event_rx.lock().take() else {
            return;
        };
        *pump = Some(tokio::spawn(run_pump(Arc::downgrade(&self.inner), rx)));
    }
}

impl std::fmt::Debug for PlaybackEngineSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackEngineSession")
            .field("device", &self.inner.identity.device_name)
            .field("format", &self.format())
            .field("has_instance", &self.has_instance())
            .field("bridge_state", &self.bridge_state())
            .finish()
    }
}

async fn run_pump(session: Weak<SessionInner>, mut rx: mpsc::Receiver<QueuedEvent>) {
    while let Some((generation, event)) = rx.recv().await {
        let Some(inner) = session.upgrade() else {
            break;
        };
        inner.handle_engine_event(generation, event).await;
    }
    debug!("Engine event pump stopped");
}

impl SessionInner {
    fn update_snapshot(&self, f: impl FnOnce(&mut SessionSnapshot)) {
        f(&mut self.snapshot.write());
    }

    /// Dispose the bridge and destroy the engine instance. Events still
    /// queued from the destroyed instance are invalidated.
    async fn teardown(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);

        if let Some(mut bridge) = self.bridge.lock().await.take() {
            bridge.dispose();
        }
        *self.monitor.write() = None;

        let destroyed = self.engine.lock().take();
        if destroyed.is_some() {
            drop(destroyed);
            info!("Engine instance destroyed");
        }
    }

    /// Restart the installed bridge if it is active. The slot lock is held
    /// only for the check.
    async fn resume_active_bridge(&self) -> bool {
        let slot = self.bridge.lock().await;
        match slot.as_ref() {
            Some(bridge) if bridge.state() == BridgeState::Active => {
                if let Err(e) = bridge.start() {
                    warn!(error = %e, "Failed to resume render stream");
                }
                true
            }
            _ => false,
        }
    }

    async fn set_render_running(&self, running: bool) {
        let slot = self.bridge.lock().await;
        let Some(bridge) = slot.as_ref() else {
            return;
        };
        let result = if running { bridge.start() } else { bridge.stop() };
        if let Err(e) = result {
            debug!(error = %e, running, "Render stream toggle failed");
        }
    }

    async fn handle_engine_event(&self, generation: u64, event: EngineEvent) {
        let current = self.generation.load(Ordering::SeqCst);
        if generation != current {
            debug!(
                kind = event.kind(),
                generation, current, "Discarding event from destroyed engine instance"
            );
            return;
        }

        let core_event = match event {
            EngineEvent::LogMessage { message } => {
                info!(target: ENGINE_LOG_TARGET, "{message}");
                CoreEvent::Session(SessionEvent::EngineLog { message })
            }
            EngineEvent::SessionConnected { user } => {
                info!(user = %user, "Engine session connected");
                self.update_snapshot(|s| {
                    s.session.is_connected = true;
                    s.session.user_name = Some(user.clone());
                    s.session.auth_needed = false;
                });
                CoreEvent::Session(SessionEvent::Connected { user })
            }
            EngineEvent::SessionDisconnected { user } => {
                warn!(user = %user, "Engine session disconnected");
                self.update_snapshot(|s| s.session.is_connected = false);
                CoreEvent::Session(SessionEvent::Disconnected { user })
            }
            EngineEvent::AuthNeeded => {
                warn!("Engine requires authentication");
                self.update_snapshot(|s| {
                    s.session.is_connected = false;
                    s.session.auth_needed = true;
                });
                CoreEvent::Session(SessionEvent::AuthNeeded)
            }
            EngineEvent::TrackChanged { track } => {
                info!(uri = %track.uri, name = %track.name, "Track changed");
                let shared = Arc::new(track.clone());
                self.update_snapshot(|s| {
                    s.track = Some(shared);
                    s.position_ms = 0;
                });
                CoreEvent::Playback(PlaybackEvent::TrackChanged { track })
            }
            EngineEvent::PlaybackPaused => {
                self.update_snapshot(|s| s.playback_state = PlaybackState::Paused);
                self.set_render_running(false).await;
                CoreEvent::Playback(PlaybackEvent::Paused)
            }
            EngineEvent::PlaybackResumed => {
                self.update_snapshot(|s| s.playback_state = PlaybackState::Playing);
                self.set_render_running(true).await;
                CoreEvent::Playback(PlaybackEvent::Resumed)
            }
            EngineEvent::PlaybackStopped => {
                self.update_snapshot(|s| s.playback_state = PlaybackState::Stopped);
                self.set_render_running(false).await;
                CoreEvent::Playback(PlaybackEvent::Stopped)
            }
            EngineEvent::PlaybackLoading => {
                self.update_snapshot(|s| s.playback_state = PlaybackState::Loading);
                CoreEvent::Playback(PlaybackEvent::Loading)
            }
            EngineEvent::EndOfTrack => CoreEvent::Playback(PlaybackEvent::EndOfTrack),
            EngineEvent::VolumeChanged { volume } => {
                self.update_snapshot(|s| s.volume = volume);
                CoreEvent::Playback(PlaybackEvent::VolumeChanged { volume })
            }
            EngineEvent::ShuffleChanged { enabled } => {
                self.update_snapshot(|s| s.shuffle = enabled);
                CoreEvent::Playback(PlaybackEvent::ShuffleChanged { enabled })
            }
            EngineEvent::RepeatChanged { mode } => {
                self.update_snapshot(|s| s.repeat = mode);
                CoreEvent::Playback(PlaybackEvent::RepeatChanged { mode })
            }
            EngineEvent::PositionChanged { position_ms } => {
                self.update_snapshot(|s| s.position_ms = position_ms);
                CoreEvent::Playback(PlaybackEvent::PositionChanged { position_ms })
            }
            EngineEvent::PositionCorrected { position_ms } => {
                self.update_snapshot(|s| s.position_ms = position_ms);
                CoreEvent::Playback(PlaybackEvent::PositionCorrected { position_ms })
            }
            EngineEvent::Panic { message } => {
                error!(message = %message, "Engine panicked, tearing down instance");
                self.teardown().await;
                self.update_snapshot(|s| {
                    s.playback_state = PlaybackState::Stopped;
                    s.session.is_connected = false;
                });
                CoreEvent::Session(SessionEvent::Panicked { message })
            }
        };

        if self.events.emit(core_event).is_err() {
            trace!("No event subscribers");
        }
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.get_mut().take() {
            pump.abort();
        }
    }
}
