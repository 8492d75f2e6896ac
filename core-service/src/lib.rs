//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (engine backend,
//! audio output, UI dispatch, catalog lookups) into the shared Rust core.
//! Desktop apps typically enable the `desktop-shims` feature, which lets
//! [`CoreConfig`] default the output host and UI executor to the adapters in
//! `bridge-desktop`.
//!
//! ```ignore
//! let config = CoreConfig::builder()
//!     .device_name("Living Room")
//!     .cache_dir(cache_dir)
//!     .engine_backend(backend)
//!     .build()?;
//! let core = bootstrap(config, PlaybackConfig::default(), MediaConfig::default()).await?;
//! core.media().update_credential(credential).await?;
//! core.media().play_track("spotify:track:4uLU6hMCjMI75M1A2tKUQC").await?;
//! ```

pub mod error;
pub mod media;

pub use error::{CoreError, Result};
pub use media::{
    ListenerId, MediaCommand, MediaConfig, MediaOrchestrator, MediaState, MediaStateListener,
};

pub use core_playback::PlaybackConfig;
pub use core_runtime::config::{CoreConfig, CoreConfigBuilder};

#[cfg(feature = "desktop-shims")]
pub use bridge_desktop::{CpalOutputHost, ThreadUiExecutor};

use std::sync::Arc;

use bridge_traits::{
    AudioOutputHost, Clock, EngineBackend, TrackMetadataProvider, UiExecutor,
};
use core_playback::PlaybackEngineSession;
use core_runtime::events::{CoreEvent, EventBus};
use tokio::sync::broadcast::Receiver;
use tracing::info;

/// Aggregated handle to all bridge dependencies the core requires.
pub struct CoreDependencies {
    pub engine_backend: Arc<dyn EngineBackend>,
    pub output_host: Arc<dyn AudioOutputHost>,
    pub ui_executor: Arc<dyn UiExecutor>,
    pub metadata_provider: Option<Arc<dyn TrackMetadataProvider>>,
    pub clock: Arc<dyn Clock>,
}

impl CoreDependencies {
    /// Construct a dependency bundle from explicit bridge handles.
    pub fn new(
        engine_backend: Arc<dyn EngineBackend>,
        output_host: Arc<dyn AudioOutputHost>,
        ui_executor: Arc<dyn UiExecutor>,
        metadata_provider: Option<Arc<dyn TrackMetadataProvider>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            engine_backend,
            output_host,
            ui_executor,
            metadata_provider,
            clock,
        }
    }
}

impl From<&CoreConfig> for CoreDependencies {
    fn from(config: &CoreConfig) -> Self {
        Self::new(
            config.engine_backend.clone(),
            config.output_host.clone(),
            config.ui_executor.clone(),
            config.metadata_provider.clone(),
            config.clock.clone(),
        )
    }
}

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct CoreService {
    deps: Arc<CoreDependencies>,
    events: EventBus,
    session: PlaybackEngineSession,
    media: MediaOrchestrator,
}

impl CoreService {
    /// Access the bridge dependencies being used by the service.
    pub fn dependencies(&self) -> Arc<CoreDependencies> {
        Arc::clone(&self.deps)
    }

    pub fn media(&self) -> &MediaOrchestrator {
        &self.media
    }

    pub fn session(&self) -> &PlaybackEngineSession {
        &self.session
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.events.subscribe()
    }

    /// Stop background tasks and destroy the engine instance.
    pub async fn shutdown(&self) {
        self.media.shutdown().await;
        info!("Core service shut down");
    }
}

/// Validate configuration, negotiate the audio format, and start the media
/// orchestrator.
///
/// Must be called from within a Tokio runtime.
///
/// # Errors
///
/// - [`CoreError::Runtime`] for invalid core configuration
/// - [`CoreError::Playback`] when no PCM format is shared with the output
///   device, or the playback configuration is invalid
/// - [`CoreError::Config`] for invalid media configuration
pub async fn bootstrap(
    config: CoreConfig,
    playback: PlaybackConfig,
    media: MediaConfig,
) -> Result<CoreService> {
    config.validate()?;
    let deps = Arc::new(CoreDependencies::from(&config));
    let events = EventBus::new(config.event_buffer_size);

    let session = PlaybackEngineSession::new(
        deps.engine_backend.clone(),
        deps.output_host.clone(),
        config.identity.clone(),
        playback,
        events.clone(),
    )?;
    let format = session.initialize().await?;

    let media = MediaOrchestrator::new(
        session.clone(),
        deps.metadata_provider.clone(),
        deps.ui_executor.clone(),
        deps.clock.clone(),
        media,
    )?;
    media.start();

    info!(
        device = %config.identity.device_name,
        device_type = config.identity.device_type.as_str(),
        format = ?format.engine_format,
        "Core service started"
    );

    Ok(CoreService {
        deps,
        events,
        session,
        media,
    })
}
